//! Tree-IR front end: a typed expression tree, its depth-first code
//! emitter, and the register allocation + reflection that goes with
//! it.
//!
//! The tree is arena-allocated ([`tree::Arena`]) and referenced by
//! stable [`tree::NodeId`] indices; compilation never follows raw
//! pointers and never mutates the tree. [`emit::compile`] walks the
//! tree twice (global scope, then function bodies) and appends
//! [`prism_shader::Instruction`]s to the target shader while filling
//! in the reflection tables consumed by the program API.

#![warn(missing_docs)]
#![deny(trivial_numeric_casts, unused_extern_crates)]

pub mod context;
pub mod emit;
pub mod reflection;
pub mod tree;
pub mod types;

pub use crate::context::{CompileContext, Diagnostic};
pub use crate::emit::{compile, ShaderObject, Target};
pub use crate::reflection::{Attribute, Uniform, Varying};
pub use crate::tree::{
    AggregateOp, Arena, BinaryOp, BranchOp, ConstantValue, LoopKind, Node, NodeId, NodeKind,
    UnaryOp,
};
pub use crate::types::{BasicType, Field, Precision, Qualifier, Type};
