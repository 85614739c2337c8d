//! Shader front end for the software-renderer core.
//!
//! This crate decodes the legacy token-stream shader ISA into an
//! [`Instruction`] array and runs the static analyses the back end
//! relies on: dynamic-branching detection, sampler usage, dirty
//! constant ranges and (for pixel shaders) per-component interpolant
//! liveness. The same [`Instruction`] model is the target of the
//! tree-IR code emitter, so synthesized shaders share every analysis.

#![warn(missing_docs)]
#![deny(trivial_numeric_casts, unused_extern_crates)]

pub mod instruction;
pub mod interpolant;
pub mod opcode;
pub mod parse;
pub mod pixel;
pub mod shader;
pub mod swizzle;
pub mod vertex;

pub use crate::instruction::{
    Control, DestinationParameter, Instruction, Modifier, ParameterType, RelativeAddress,
    SamplerType, Semantic, SourceParameter, Usage,
};
pub use crate::opcode::Opcode;
pub use crate::parse::{ParseError, ShaderType};
pub use crate::pixel::{PixelShader, MAX_INPUT_VARYINGS};
pub use crate::shader::Shader;
pub use crate::vertex::{VertexShader, MAX_INPUT_ATTRIBUTES, MAX_OUTPUT_VARYINGS};
