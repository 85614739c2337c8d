//! CPU shader translation and JIT execution core.
//!
//! `prism` ties the pipeline together: the shader front end
//! ([`prism_shader`]) parses legacy token streams and analyzes them,
//! the tree-IR emitter ([`prism_glsl`]) lowers a typed expression
//! tree into the same instruction model, the machine encoder
//! ([`prism_asm`]) and JIT back end ([`prism_jit`]) materialize the
//! instruction stream as executable x86-64 code, and the dispatch
//! driver in this crate runs the result across a compute grid.
//!
//! The crate exposes exactly the core surface: [`create_program`] /
//! [`Program`] with its reflection accessors. Device objects,
//! rasterization, texture sampling and presentation live in the
//! surrounding driver layers and are not represented here.

#![warn(missing_docs)]
#![deny(trivial_numeric_casts, unused_extern_crates)]

pub mod dispatch;
pub mod program;

pub use crate::dispatch::{
    dispatch, DispatchShape, InvocationContext, SubgroupStep, YieldResult, BATCH_COUNT, SIMD_WIDTH,
};
pub use crate::program::{builtin, BindingTable, Program, ProgramError, PUSH_CONSTANT_BASE};

pub use prism_asm::Assembler;
pub use prism_glsl::{
    Arena, Attribute, CompileContext, Node, NodeId, NodeKind, ShaderObject, Uniform, Varying,
};
pub use prism_jit::{RegisterFile, Routine};
pub use prism_shader::{PixelShader, Shader, ShaderType, VertexShader};

/// Compiles a tree-IR shader into a runnable [`Program`].
///
/// The shader object selects the stage and collects reflection; a
/// semantic error in the tree fails the whole program.
pub fn create_program(
    arena: &mut Arena,
    root: NodeId,
    object: ShaderObject,
) -> Result<Program, ProgramError> {
    Program::from_tree(arena, root, object)
}
