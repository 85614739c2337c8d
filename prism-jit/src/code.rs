//! Executable code memory.
//!
//! The assembler emits into a writable buffer; before first
//! invocation the bytes are copied into a fresh page-backed mapping,
//! outstanding fixups are resolved against the final addresses, and
//! the mapping is flipped to read+execute. The mapping lives as long
//! as the owning program.

use crate::LowerError;

use prism_asm::{Fixup, FixupKind};

/// An executable mapping holding one materialized routine.
pub struct CodeMemory {
    allocation: region::Allocation,
    len: usize,
}

impl std::fmt::Debug for CodeMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeMemory")
            .field("base", &self.as_ptr())
            .field("len", &self.len)
            .finish()
    }
}

impl CodeMemory {
    /// Copies `code` (plus a trailing 16-byte-aligned constant pool)
    /// into fresh pages, resolves `fixups` and makes the result
    /// executable.
    ///
    /// Fixup symbols index into `pool`: symbol `i` resolves to the
    /// address of pool entry `i`.
    pub fn materialize(
        code: &[u8],
        fixups: &[Fixup],
        pool: &[[f32; 4]],
    ) -> Result<CodeMemory, LowerError> {
        let pool_offset = align_up(code.len(), 16);
        let total = pool_offset + pool.len() * 16;

        let mut allocation =
            region::alloc(total.max(1), region::Protection::READ_WRITE).map_err(LowerError::from)?;

        let base = allocation.as_mut_ptr::<u8>();
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), base, code.len());
            // hlt-fill the alignment gap ahead of the pool.
            for i in code.len()..pool_offset {
                *base.add(i) = 0xF4;
            }
            std::ptr::copy_nonoverlapping(
                pool.as_ptr().cast::<u8>(),
                base.add(pool_offset),
                pool.len() * 16,
            );
        }

        for fixup in fixups {
            let target = pool_offset as u64 + u64::from(fixup.symbol.0) * 16;
            let position = fixup.position as usize;
            debug_assert!(position + 4 <= code.len());

            let value = match fixup.kind {
                FixupKind::PcRel => {
                    // The addend already accounts for the field width
                    // and any trailing instruction bytes.
                    target as i64 - i64::from(fixup.position) + fixup.addend
                }
                FixupKind::Absolute => base as i64 + target as i64 + fixup.addend,
            };
            let value = i32::try_from(value).map_err(|_| LowerError::FixupOutOfRange {
                position: fixup.position,
            })?;
            unsafe {
                let field = base.add(position).cast::<i32>();
                field.write_unaligned(value);
            }
        }

        unsafe {
            region::protect(base, total.max(1), region::Protection::READ_EXECUTE)
                .map_err(LowerError::from)?;
        }

        Ok(CodeMemory {
            allocation,
            len: total,
        })
    }

    /// Base address of the executable region.
    pub fn as_ptr(&self) -> *const u8 {
        self.allocation.as_ptr::<u8>()
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// The mapping is immutable once protected; sharing across dispatch
// threads is safe.
unsafe impl Send for CodeMemory {}
unsafe impl Sync for CodeMemory {}

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}
