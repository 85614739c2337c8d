//! The append-only code buffer and its relocation records.

use smallvec::SmallVec;

/// Relocation kinds a fixup can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    /// The 4-byte field receives the absolute address of the symbol
    /// (sign-extended move or pointer slot patched at bind time).
    Absolute,
    /// The 4-byte field receives `symbol - end_of_field`; the addend
    /// pre-compensates for trailing instruction bytes.
    PcRel,
}

/// An opaque symbol a fixup refers to, resolved by the consumer when
/// the code is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(pub u32);

/// A deferred relocation attached to a buffer position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    /// Byte offset of the 4-byte field to patch.
    pub position: u32,
    /// How to patch it.
    pub kind: FixupKind,
    /// What it refers to.
    pub symbol: Symbol,
    /// Added to the resolved value.
    pub addend: i64,
}

/// Append-only byte buffer with in-place patching for label
/// resolution.
#[derive(Debug, Default)]
pub struct AssemblerBuffer {
    bytes: Vec<u8>,
    fixups: SmallVec<[Fixup; 8]>,
}

impl AssemblerBuffer {
    /// An empty buffer.
    pub fn new() -> AssemblerBuffer {
        AssemblerBuffer::default()
    }

    /// Current emission position.
    #[inline]
    pub fn position(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Appends one byte.
    #[inline]
    pub fn put1(&mut self, value: u8) {
        self.bytes.push(value);
    }

    /// Appends two little-endian bytes.
    #[inline]
    pub fn put2(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends four little-endian bytes.
    #[inline]
    pub fn put4(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends eight little-endian bytes.
    #[inline]
    pub fn put8(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Reads a 32-bit value previously emitted at `position`.
    pub fn load32(&self, position: u32) -> u32 {
        let position = position as usize;
        u32::from_le_bytes(
            self.bytes[position..position + 4]
                .try_into()
                .expect("patch position in range"),
        )
    }

    /// Overwrites a 32-bit field at `position`.
    pub fn store32(&mut self, position: u32, value: u32) {
        let position = position as usize;
        self.bytes[position..position + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Overwrites one byte at `position`.
    pub fn store8(&mut self, position: u32, value: u8) {
        self.bytes[position as usize] = value;
    }

    /// Records a fixup for the 4-byte field that starts at the
    /// current position.
    pub fn add_fixup(&mut self, kind: FixupKind, symbol: Symbol, addend: i64) {
        let position = self.position();
        self.fixups.push(Fixup {
            position,
            kind,
            symbol,
            addend,
        });
    }

    /// The pending fixups, in emission order.
    pub fn fixups(&self) -> &[Fixup] {
        debug_assert!(self
            .fixups
            .iter()
            .all(|fixup| fixup.position + 4 <= self.position()));
        &self.fixups
    }

    /// The emitted bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patching_round_trips() {
        let mut buffer = AssemblerBuffer::new();
        buffer.put1(0x90);
        buffer.put4(0xDEAD_BEEF);
        assert_eq!(buffer.load32(1), 0xDEAD_BEEF);
        buffer.store32(1, 0x0102_0304);
        assert_eq!(buffer.bytes(), &[0x90, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn fixups_never_point_past_the_buffer() {
        let mut buffer = AssemblerBuffer::new();
        buffer.put1(0xE8);
        buffer.add_fixup(FixupKind::PcRel, Symbol(7), -4);
        buffer.put4(0);
        for fixup in buffer.fixups() {
            assert!(fixup.position + 4 <= buffer.position());
        }
    }
}
