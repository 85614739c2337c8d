//! JIT back end: turns a shader instruction stream into executable
//! machine code.
//!
//! [`lower::compile`] drives [`prism_asm`] to emit SSE code over a
//! [`lower::RegisterFile`] context block, then [`code::CodeMemory`]
//! copies the bytes into fresh pages, resolves fixups and flips the
//! mapping executable. The resulting [`lower::Routine`] is a callable
//! owned by the program that requested it.

#![warn(missing_docs)]
#![deny(trivial_numeric_casts, unused_extern_crates)]

pub mod code;
pub mod constants;
pub mod lower;

use thiserror::Error;

pub use crate::code::CodeMemory;
pub use crate::lower::{compile, RegisterFile, Routine, RoutineFn, RoutineInfo};

/// Reasons code generation can refuse or fail.
#[derive(Debug, Error)]
pub enum LowerError {
    /// An opcode the back end refuses.
    #[error("unsupported opcode {opcode:#x}")]
    Unsupported {
        /// The numeric opcode value.
        opcode: u32,
    },
    /// A register file with no runtime storage.
    #[error("unsupported register file {file}")]
    UnsupportedRegisterFile {
        /// The parameter-type code.
        file: u32,
    },
    /// A comparison control outside the defined range.
    #[error("unsupported comparison control")]
    UnsupportedControl,
    /// A register index beyond the file's bounds.
    #[error("register {index} out of range for file {file}")]
    RegisterOutOfRange {
        /// The parameter-type code.
        file: u32,
        /// The offending index.
        index: u32,
    },
    /// Control-flow instructions did not nest.
    #[error("unbalanced structured control flow")]
    UnbalancedControlFlow,
    /// A call targeted a label that was never defined.
    #[error("call to undefined function label {label}")]
    UndefinedFunction {
        /// The label index.
        label: u32,
    },
    /// A resolved fixup value did not fit its 4-byte field.
    #[error("fixup at {position} out of range")]
    FixupOutOfRange {
        /// Buffer offset of the field.
        position: u32,
    },
    /// Mapping or protecting executable memory failed.
    #[error("executable memory: {0}")]
    Memory(#[from] region::Error),
}
