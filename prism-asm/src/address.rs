//! Memory operands and their ModR/M/SIB/displacement encoding.

use crate::buffer::{AssemblerBuffer, FixupKind, Symbol};
use crate::reg::Gpr;
use crate::rex::{encode_modrm, encode_sib, low8_will_sign_extend_to_32, RexFlags};

/// Index scale factors.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    One = 0,
    Two = 1,
    Four = 2,
    Eight = 3,
}

impl Scale {
    /// Construct from a byte multiplier.
    ///
    /// # Panics
    ///
    /// Panics unless `bytes` is 1, 2, 4 or 8.
    pub fn from_bytes(bytes: u8) -> Scale {
        match bytes {
            1 => Scale::One,
            2 => Scale::Two,
            4 => Scale::Four,
            8 => Scale::Eight,
            _ => panic!("invalid scale {}", bytes),
        }
    }

    #[inline]
    fn enc(self) -> u8 {
        self as u8
    }
}

/// An x86-64 memory operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmAddress {
    /// `[base + disp]`.
    BaseDisp {
        /// Base register.
        base: Gpr,
        /// Signed displacement.
        disp: i32,
    },
    /// `[base + index * scale + disp]`.
    BaseIndexDisp {
        /// Base register.
        base: Gpr,
        /// Index register; never rsp.
        index: Gpr,
        /// Index multiplier.
        scale: Scale,
        /// Signed displacement.
        disp: i32,
    },
    /// `[rip + symbol]`; emits a pc-relative fixup for the 4-byte
    /// displacement field.
    RipRelative {
        /// The referent.
        target: Symbol,
    },
}

impl AsmAddress {
    /// `[base]`.
    pub fn base(base: Gpr) -> AsmAddress {
        AsmAddress::BaseDisp { base, disp: 0 }
    }

    /// `[base + disp]`.
    pub fn base_disp(base: Gpr, disp: i32) -> AsmAddress {
        AsmAddress::BaseDisp { base, disp }
    }

    /// `[base + index * scale + disp]`.
    pub fn base_index_disp(base: Gpr, index: Gpr, scale: Scale, disp: i32) -> AsmAddress {
        assert!(index != Gpr::Rsp, "rsp cannot be an index register");
        AsmAddress::BaseIndexDisp {
            base,
            index,
            scale,
            disp,
        }
    }

    /// Emits the REX prefix for this operand with `enc_g` in the reg
    /// field.
    pub fn emit_rex_prefix(&self, rex: RexFlags, enc_g: u8, buffer: &mut AssemblerBuffer) {
        match self {
            AsmAddress::BaseDisp { base, .. } => {
                rex.emit_two_op(buffer, enc_g, base.enc());
            }
            AsmAddress::BaseIndexDisp { base, index, .. } => {
                rex.emit_three_op(buffer, enc_g, index.enc(), base.enc());
            }
            AsmAddress::RipRelative { .. } => {
                // REX.B is zero for rip-relative forms.
                rex.emit_two_op(buffer, enc_g, 0);
            }
        }
    }

    /// Emits the ModR/M byte, optional SIB byte and displacement.
    ///
    /// `bytes_at_end` is the number of instruction bytes that follow
    /// the displacement field (immediates); rip-relative fixups
    /// compensate for them through the stored addend.
    pub fn emit_modrm_sib_disp(&self, enc_g: u8, bytes_at_end: u8, buffer: &mut AssemblerBuffer) {
        match *self {
            AsmAddress::BaseDisp { base, disp } => {
                let enc_e = base.enc();
                let mut imm = Disp::new(disp);

                if enc_e & 7 == Gpr::Rsp.enc() {
                    // rsp/r12 base forces a SIB byte whose index field
                    // 0b100 means "no index".
                    buffer.put1(encode_modrm(imm.m0d(), enc_g & 7, 0b100));
                    buffer.put1(0b00_100_100);
                    imm.emit(buffer);
                } else {
                    // rbp/r13 with mod=00 would mean rip-relative, so
                    // force at least a zero byte displacement.
                    if enc_e & 7 == Gpr::Rbp.enc() {
                        imm.force_immediate();
                    }
                    buffer.put1(encode_modrm(imm.m0d(), enc_g & 7, enc_e & 7));
                    imm.emit(buffer);
                }
            }

            AsmAddress::BaseIndexDisp {
                base,
                index,
                scale,
                disp,
            } => {
                let enc_base = base.enc();
                let enc_index = index.enc();
                debug_assert!(enc_index != Gpr::Rsp.enc());

                let mut imm = Disp::new(disp);
                if enc_base & 7 == Gpr::Rbp.enc() {
                    imm.force_immediate();
                }

                buffer.put1(encode_modrm(imm.m0d(), enc_g & 7, 0b100));
                buffer.put1(encode_sib(scale.enc(), enc_index & 7, enc_base & 7));
                imm.emit(buffer);
            }

            AsmAddress::RipRelative { target } => {
                // mod=00, rm=101 selects rip+disp32.
                buffer.put1(encode_modrm(0b00, enc_g & 7, 0b101));

                // The address is relative to the end of the
                // instruction, but the relocation is relative to the
                // end of this field, so pre-subtract the trailing
                // bytes along with the field itself.
                buffer.add_fixup(FixupKind::PcRel, target, -4 - i64::from(bytes_at_end));
                buffer.put4(0);
            }
        }
    }
}

/// A general-purpose register or memory operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GprMem {
    /// Register operand.
    Gpr(Gpr),
    /// Memory operand.
    Mem(AsmAddress),
}

impl From<Gpr> for GprMem {
    fn from(gpr: Gpr) -> GprMem {
        GprMem::Gpr(gpr)
    }
}

impl From<AsmAddress> for GprMem {
    fn from(address: AsmAddress) -> GprMem {
        GprMem::Mem(address)
    }
}

/// An XMM register or memory operand.
#[derive(Debug, Clone, PartialEq)]
pub enum XmmMem {
    /// Register operand.
    Xmm(crate::reg::Xmm),
    /// Memory operand.
    Mem(AsmAddress),
}

impl From<crate::reg::Xmm> for XmmMem {
    fn from(xmm: crate::reg::Xmm) -> XmmMem {
        XmmMem::Xmm(xmm)
    }
}

impl From<AsmAddress> for XmmMem {
    fn from(address: AsmAddress) -> XmmMem {
        XmmMem::Mem(address)
    }
}

/// Displacement classified by its ModR/M encoding.
#[derive(Debug, Clone, Copy)]
enum Disp {
    None,
    Disp8(i8),
    Disp32(i32),
}

impl Disp {
    fn new(value: i32) -> Disp {
        if value == 0 {
            Disp::None
        } else if low8_will_sign_extend_to_32(value) {
            Disp::Disp8(value as i8)
        } else {
            Disp::Disp32(value)
        }
    }

    /// Upgrades `None` to an explicit zero byte (rbp/r13 bases).
    fn force_immediate(&mut self) {
        if let Disp::None = self {
            *self = Disp::Disp8(0);
        }
    }

    fn m0d(self) -> u8 {
        match self {
            Disp::None => 0b00,
            Disp::Disp8(_) => 0b01,
            Disp::Disp32(_) => 0b10,
        }
    }

    fn emit(self, buffer: &mut AssemblerBuffer) {
        match self {
            Disp::None => {}
            Disp::Disp8(value) => buffer.put1(value as u8),
            Disp::Disp32(value) => buffer.put4(value as u32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(address: &AsmAddress, enc_g: u8) -> Vec<u8> {
        let mut buffer = AssemblerBuffer::new();
        address.emit_modrm_sib_disp(enc_g, 0, &mut buffer);
        buffer.bytes().to_vec()
    }

    #[test]
    fn plain_base() {
        assert_eq!(encode(&AsmAddress::base(Gpr::Rdi), 1), vec![0x0F]);
    }

    #[test]
    fn rsp_base_needs_sib() {
        assert_eq!(encode(&AsmAddress::base(Gpr::Rsp), 0), vec![0x04, 0x24]);
        assert_eq!(
            encode(&AsmAddress::base_disp(Gpr::Rsp, 16), 0),
            vec![0x44, 0x24, 0x10]
        );
    }

    #[test]
    fn rbp_base_needs_displacement() {
        assert_eq!(encode(&AsmAddress::base(Gpr::Rbp), 0), vec![0x45, 0x00]);
    }

    #[test]
    fn wide_displacement() {
        assert_eq!(
            encode(&AsmAddress::base_disp(Gpr::Rax, 0x1000), 0),
            vec![0x80, 0x00, 0x10, 0x00, 0x00]
        );
    }

    #[test]
    fn base_index_scale() {
        // [rax + rcx*4 + 8], reg = rdx
        assert_eq!(
            encode(
                &AsmAddress::base_index_disp(Gpr::Rax, Gpr::Rcx, Scale::Four, 8),
                2
            ),
            vec![0x54, 0x88, 0x08]
        );
    }

    #[test]
    fn rip_relative_records_fixup() {
        let mut buffer = AssemblerBuffer::new();
        let address = AsmAddress::RipRelative { target: Symbol(3) };
        address.emit_modrm_sib_disp(0, 1, &mut buffer);
        assert_eq!(buffer.bytes()[0], 0x05);
        let fixup = buffer.fixups()[0];
        assert_eq!(fixup.kind, FixupKind::PcRel);
        assert_eq!(fixup.addend, -5);
        assert_eq!(fixup.position, 1);
    }
}
