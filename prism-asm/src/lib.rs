//! Direct x86-64 machine-code emission.
//!
//! A stateful [`Assembler`] appends encoded instructions to an
//! append-only buffer. Branch targets are [`Label`]s that keep their
//! pending patch sites threaded through the buffer until bound;
//! references to out-of-buffer symbols become
//! [`Fixup`](buffer::Fixup)s resolved when the code is materialized
//! into executable memory.
//!
//! The emitter covers the integer ISA plus SSE through SSE4.1; REX,
//! ModR/M and SIB bytes are computed by pure helpers in [`rex`] and
//! [`address`].

#![warn(missing_docs)]
#![deny(trivial_numeric_casts, unused_extern_crates)]

pub mod address;
pub mod assembler;
pub mod buffer;
pub mod label;
pub mod reg;
pub mod rex;
mod sse;

pub use crate::address::{AsmAddress, GprMem, Scale, XmmMem};
pub use crate::assembler::{Assembler, DEFAULT_BUNDLE_ALIGN};
pub use crate::buffer::{Fixup, FixupKind, Symbol};
pub use crate::label::Label;
pub use crate::reg::{Condition, Gpr, Type, Xmm};
