//! SSE/SSE2/SSE4.1 instruction forms.
//!
//! Scalar operations take a [`Type`] of `F32` or `F64` selecting the
//! `F3`/`F2` prefix; packed-integer operations take the element size.

use crate::address::{AsmAddress, GprMem, XmmMem};
use crate::assembler::Assembler;
use crate::reg::{Gpr, Type, Xmm};
use crate::rex::RexFlags;

/// Opcode escape maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Map {
    /// `0F xx`.
    _0F,
    /// `0F 38 xx`.
    _0F38,
    /// `0F 3A xx`.
    _0F3A,
}

enum Rm<'a> {
    Reg(u8),
    Mem(&'a AsmAddress),
}

impl Assembler {
    /// Core SSE emission: optional mandatory prefix, REX, escape
    /// bytes, opcode, ModRM (+ trailing immediate accounted for in
    /// rip-relative displacements).
    fn emit_sse(
        &mut self,
        prefix: Option<u8>,
        map: Map,
        opcode: u8,
        enc_g: u8,
        rm: Rm<'_>,
        w: bool,
        imm: Option<u8>,
    ) {
        if let Some(prefix) = prefix {
            self.buffer.put1(prefix);
        }
        let rex = if w {
            RexFlags::set_w()
        } else {
            RexFlags::clear_w()
        };
        match rm {
            Rm::Reg(enc_e) => {
                rex.emit_two_op(&mut self.buffer, enc_g, enc_e);
                self.put_escape(map, opcode);
                self.buffer
                    .put1(0b1100_0000 | ((enc_g & 7) << 3) | (enc_e & 7));
            }
            Rm::Mem(address) => {
                address.emit_rex_prefix(rex, enc_g, &mut self.buffer);
                self.put_escape(map, opcode);
                let trailing = imm.map_or(0, |_| 1);
                address.emit_modrm_sib_disp(enc_g, trailing, &mut self.buffer);
            }
        }
        if let Some(imm) = imm {
            self.buffer.put1(imm);
        }
    }

    fn put_escape(&mut self, map: Map, opcode: u8) {
        self.buffer.put1(0x0F);
        match map {
            Map::_0F => {}
            Map::_0F38 => self.buffer.put1(0x38),
            Map::_0F3A => self.buffer.put1(0x3A),
        }
        self.buffer.put1(opcode);
    }

    fn xmm_rm(&mut self, prefix: Option<u8>, map: Map, opcode: u8, dst: Xmm, src: &XmmMem) {
        match src {
            XmmMem::Xmm(src) => {
                self.emit_sse(prefix, map, opcode, dst.enc(), Rm::Reg(src.enc()), false, None)
            }
            XmmMem::Mem(address) => {
                self.emit_sse(prefix, map, opcode, dst.enc(), Rm::Mem(address), false, None)
            }
        }
    }

    fn xmm_rm_imm(
        &mut self,
        prefix: Option<u8>,
        map: Map,
        opcode: u8,
        dst: Xmm,
        src: &XmmMem,
        imm: u8,
    ) {
        match src {
            XmmMem::Xmm(src) => self.emit_sse(
                prefix,
                map,
                opcode,
                dst.enc(),
                Rm::Reg(src.enc()),
                false,
                Some(imm),
            ),
            XmmMem::Mem(address) => self.emit_sse(
                prefix,
                map,
                opcode,
                dst.enc(),
                Rm::Mem(address),
                false,
                Some(imm),
            ),
        }
    }

    fn scalar_prefix(ty: Type) -> u8 {
        match ty {
            Type::F32 => 0xF3,
            Type::F64 => 0xF2,
            _ => panic!("scalar SSE operation needs F32 or F64"),
        }
    }

    // ------------------------------------------------------------------
    // Scalar float arithmetic
    // ------------------------------------------------------------------

    /// `movss`/`movsd` load or register move.
    pub fn movss(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(Self::scalar_prefix(ty)), Map::_0F, 0x10, dst, &src);
    }

    /// `movss`/`movsd` store.
    pub fn movss_store(&mut self, ty: Type, dst: AsmAddress, src: Xmm) {
        self.emit_sse(
            Some(Self::scalar_prefix(ty)),
            Map::_0F,
            0x11,
            src.enc(),
            Rm::Mem(&dst),
            false,
            None,
        );
    }

    /// `addss`/`addsd`.
    pub fn addss(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(Self::scalar_prefix(ty)), Map::_0F, 0x58, dst, &src);
    }

    /// `subss`/`subsd`.
    pub fn subss(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(Self::scalar_prefix(ty)), Map::_0F, 0x5C, dst, &src);
    }

    /// `mulss`/`mulsd`.
    pub fn mulss(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(Self::scalar_prefix(ty)), Map::_0F, 0x59, dst, &src);
    }

    /// `divss`/`divsd`.
    pub fn divss(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(Self::scalar_prefix(ty)), Map::_0F, 0x5E, dst, &src);
    }

    /// `minss`/`minsd`.
    pub fn minss(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(Self::scalar_prefix(ty)), Map::_0F, 0x5D, dst, &src);
    }

    /// `maxss`/`maxsd`.
    pub fn maxss(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(Self::scalar_prefix(ty)), Map::_0F, 0x5F, dst, &src);
    }

    /// `sqrtss`/`sqrtsd`.
    pub fn sqrtss(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(Self::scalar_prefix(ty)), Map::_0F, 0x51, dst, &src);
    }

    /// `ucomiss`/`ucomisd` — unordered compare into EFLAGS.
    pub fn ucomiss(&mut self, ty: Type, left: Xmm, right: XmmMem) {
        let prefix = match ty {
            Type::F32 => None,
            Type::F64 => Some(0x66),
            _ => panic!("ucomiss needs F32 or F64"),
        };
        self.xmm_rm(prefix, Map::_0F, 0x2E, left, &right);
    }

    // ------------------------------------------------------------------
    // Packed float arithmetic and logic
    // ------------------------------------------------------------------

    /// `addps`.
    pub fn addps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x58, dst, &src);
    }

    /// `subps`.
    pub fn subps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x5C, dst, &src);
    }

    /// `mulps`.
    pub fn mulps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x59, dst, &src);
    }

    /// `divps`.
    pub fn divps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x5E, dst, &src);
    }

    /// `minps`.
    pub fn minps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x5D, dst, &src);
    }

    /// `maxps`.
    pub fn maxps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x5F, dst, &src);
    }

    /// `sqrtps`.
    pub fn sqrtps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x51, dst, &src);
    }

    /// `rsqrtps` — reciprocal square-root estimate.
    pub fn rsqrtps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x52, dst, &src);
    }

    /// `rcpps` — reciprocal estimate.
    pub fn rcpps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x53, dst, &src);
    }

    /// `andps`.
    pub fn andps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x54, dst, &src);
    }

    /// `andnps`.
    pub fn andnps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x55, dst, &src);
    }

    /// `orps`.
    pub fn orps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x56, dst, &src);
    }

    /// `xorps`.
    pub fn xorps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x57, dst, &src);
    }

    /// `cmpps dst, src, predicate`.
    pub fn cmpps(&mut self, dst: Xmm, src: XmmMem, predicate: u8) {
        self.xmm_rm_imm(None, Map::_0F, 0xC2, dst, &src, predicate);
    }

    /// `shufps dst, src, selector`.
    pub fn shufps(&mut self, dst: Xmm, src: XmmMem, selector: u8) {
        self.xmm_rm_imm(None, Map::_0F, 0xC6, dst, &src, selector);
    }

    /// `unpcklps`.
    pub fn unpcklps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x14, dst, &src);
    }

    /// `unpckhps`.
    pub fn unpckhps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x15, dst, &src);
    }

    /// `movhlps dst, src` — high pair of src into low pair of dst.
    pub fn movhlps(&mut self, dst: Xmm, src: Xmm) {
        self.emit_sse(None, Map::_0F, 0x12, dst.enc(), Rm::Reg(src.enc()), false, None);
    }

    /// `movlhps dst, src` — low pair of src into high pair of dst.
    pub fn movlhps(&mut self, dst: Xmm, src: Xmm) {
        self.emit_sse(None, Map::_0F, 0x16, dst.enc(), Rm::Reg(src.enc()), false, None);
    }

    /// `movmskps dst, src` — sign-bit mask of four lanes.
    pub fn movmskps(&mut self, dst: Gpr, src: Xmm) {
        self.emit_sse(None, Map::_0F, 0x50, dst.enc(), Rm::Reg(src.enc()), false, None);
    }

    // ------------------------------------------------------------------
    // Whole-register moves
    // ------------------------------------------------------------------

    /// `movaps` (register or aligned load).
    pub fn movaps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x28, dst, &src);
    }

    /// `movaps` aligned store.
    pub fn movaps_store(&mut self, dst: AsmAddress, src: Xmm) {
        self.emit_sse(None, Map::_0F, 0x29, src.enc(), Rm::Mem(&dst), false, None);
    }

    /// `movups` (register or unaligned load).
    pub fn movups(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x10, dst, &src);
    }

    /// `movups` unaligned store.
    pub fn movups_store(&mut self, dst: AsmAddress, src: Xmm) {
        self.emit_sse(None, Map::_0F, 0x11, src.enc(), Rm::Mem(&dst), false, None);
    }

    /// `movd`/`movq dst_xmm, src_gpr_or_mem` (`I64` selects movq).
    pub fn movd(&mut self, src_ty: Type, dst: Xmm, src: GprMem) {
        let w = src_ty.is_64();
        match &src {
            GprMem::Gpr(src) => {
                self.emit_sse(Some(0x66), Map::_0F, 0x6E, dst.enc(), Rm::Reg(src.enc()), w, None)
            }
            GprMem::Mem(address) => {
                self.emit_sse(Some(0x66), Map::_0F, 0x6E, dst.enc(), Rm::Mem(address), w, None)
            }
        }
    }

    /// `movd`/`movq dst_gpr_or_mem, src_xmm`.
    pub fn movd_store(&mut self, dst_ty: Type, dst: GprMem, src: Xmm) {
        let w = dst_ty.is_64();
        match &dst {
            GprMem::Gpr(dst) => {
                self.emit_sse(Some(0x66), Map::_0F, 0x7E, src.enc(), Rm::Reg(dst.enc()), w, None)
            }
            GprMem::Mem(address) => {
                self.emit_sse(Some(0x66), Map::_0F, 0x7E, src.enc(), Rm::Mem(address), w, None)
            }
        }
    }

    /// `movq dst, src` — low quadword move between XMM registers or
    /// from memory.
    pub fn movq(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0xF3), Map::_0F, 0x7E, dst, &src);
    }

    /// `movq [address], src`.
    pub fn movq_store(&mut self, dst: AsmAddress, src: Xmm) {
        self.emit_sse(Some(0x66), Map::_0F, 0xD6, src.enc(), Rm::Mem(&dst), false, None);
    }

    // ------------------------------------------------------------------
    // Packed integer arithmetic
    // ------------------------------------------------------------------

    fn packed_int_opcode(ty: Type, byte: u8, word: u8, dword: u8) -> u8 {
        match ty {
            Type::I8 => byte,
            Type::I16 => word,
            Type::I32 => dword,
            _ => panic!("unsupported packed element size"),
        }
    }

    /// `padd{b,w,d}`.
    pub fn padd(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        let opcode = Self::packed_int_opcode(ty, 0xFC, 0xFD, 0xFE);
        self.xmm_rm(Some(0x66), Map::_0F, opcode, dst, &src);
    }

    /// `psub{b,w,d}`.
    pub fn psub(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        let opcode = Self::packed_int_opcode(ty, 0xF8, 0xF9, 0xFA);
        self.xmm_rm(Some(0x66), Map::_0F, opcode, dst, &src);
    }

    /// `pmullw`/`pmulld`.
    pub fn pmull(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        match ty {
            Type::I16 => self.xmm_rm(Some(0x66), Map::_0F, 0xD5, dst, &src),
            Type::I32 => self.xmm_rm(Some(0x66), Map::_0F38, 0x40, dst, &src),
            _ => panic!("pmull takes I16 or I32 elements"),
        }
    }

    /// `pmulhw` — signed high product.
    pub fn pmulhw(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F, 0xE5, dst, &src);
    }

    /// `pmulhuw` — unsigned high product.
    pub fn pmulhuw(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F, 0xE4, dst, &src);
    }

    /// `pmuludq` — 32×32→64 unsigned multiply.
    pub fn pmuludq(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F, 0xF4, dst, &src);
    }

    /// `pmaddwd`.
    pub fn pmaddwd(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F, 0xF5, dst, &src);
    }

    /// `pand`.
    pub fn pand(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F, 0xDB, dst, &src);
    }

    /// `pandn`.
    pub fn pandn(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F, 0xDF, dst, &src);
    }

    /// `por`.
    pub fn por(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F, 0xEB, dst, &src);
    }

    /// `pxor`.
    pub fn pxor(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F, 0xEF, dst, &src);
    }

    /// `pcmpeq{b,w,d}`.
    pub fn pcmpeq(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        let opcode = Self::packed_int_opcode(ty, 0x74, 0x75, 0x76);
        self.xmm_rm(Some(0x66), Map::_0F, opcode, dst, &src);
    }

    /// `pcmpgt{b,w,d}`.
    pub fn pcmpgt(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        let opcode = Self::packed_int_opcode(ty, 0x64, 0x65, 0x66);
        self.xmm_rm(Some(0x66), Map::_0F, opcode, dst, &src);
    }

    // ------------------------------------------------------------------
    // Packed shifts
    // ------------------------------------------------------------------

    fn packed_shift_opcode(ty: Type, word: u8, dword: u8, qword: u8) -> u8 {
        match ty {
            Type::I16 => word,
            Type::I32 => dword,
            Type::I64 => qword,
            _ => panic!("unsupported packed shift element size"),
        }
    }

    fn packed_shift_imm(&mut self, ty: Type, ext: u8, dst: Xmm, imm: u8) {
        let opcode = Self::packed_shift_opcode(ty, 0x71, 0x72, 0x73);
        self.buffer.put1(0x66);
        RexFlags::clear_w().emit_one_op(&mut self.buffer, dst.enc());
        self.put_escape(Map::_0F, opcode);
        self.buffer
            .put1(0b1100_0000 | ((ext & 7) << 3) | (dst.enc() & 7));
        self.buffer.put1(imm);
    }

    /// `psll{w,d,q} dst, src` — shift left by register count.
    pub fn psll(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        let opcode = Self::packed_shift_opcode(ty, 0xF1, 0xF2, 0xF3);
        self.xmm_rm(Some(0x66), Map::_0F, opcode, dst, &src);
    }

    /// `psll{w,d,q} dst, imm`.
    pub fn psll_imm(&mut self, ty: Type, dst: Xmm, imm: u8) {
        self.packed_shift_imm(ty, 6, dst, imm);
    }

    /// `psrl{w,d,q} dst, src`.
    pub fn psrl(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        let opcode = Self::packed_shift_opcode(ty, 0xD1, 0xD2, 0xD3);
        self.xmm_rm(Some(0x66), Map::_0F, opcode, dst, &src);
    }

    /// `psrl{w,d,q} dst, imm`.
    pub fn psrl_imm(&mut self, ty: Type, dst: Xmm, imm: u8) {
        self.packed_shift_imm(ty, 2, dst, imm);
    }

    /// `psra{w,d} dst, src`.
    pub fn psra(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        let opcode = match ty {
            Type::I16 => 0xE1,
            Type::I32 => 0xE2,
            _ => panic!("psra takes I16 or I32 elements"),
        };
        self.xmm_rm(Some(0x66), Map::_0F, opcode, dst, &src);
    }

    /// `psra{w,d} dst, imm`.
    pub fn psra_imm(&mut self, ty: Type, dst: Xmm, imm: u8) {
        assert!(matches!(ty, Type::I16 | Type::I32), "no 64-bit psra");
        self.packed_shift_imm(ty, 4, dst, imm);
    }

    // ------------------------------------------------------------------
    // Pack, unpack, shuffle, blend
    // ------------------------------------------------------------------

    /// `punpckl{bw,wd,dq}`.
    pub fn punpckl(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        let opcode = Self::packed_int_opcode(ty, 0x60, 0x61, 0x62);
        self.xmm_rm(Some(0x66), Map::_0F, opcode, dst, &src);
    }

    /// `punpckh{bw,wd,dq}`.
    pub fn punpckh(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        let opcode = Self::packed_int_opcode(ty, 0x68, 0x69, 0x6A);
        self.xmm_rm(Some(0x66), Map::_0F, opcode, dst, &src);
    }

    /// `packsswb`/`packssdw` — signed saturating narrow.
    pub fn packss(&mut self, ty: Type, dst: Xmm, src: XmmMem) {
        let opcode = match ty {
            Type::I16 => 0x63,
            Type::I32 => 0x6B,
            _ => panic!("packss takes I16 or I32 elements"),
        };
        self.xmm_rm(Some(0x66), Map::_0F, opcode, dst, &src);
    }

    /// `packuswb` — unsigned saturating narrow from words.
    pub fn packus(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F, 0x67, dst, &src);
    }

    /// `pshufb`.
    pub fn pshufb(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F38, 0x00, dst, &src);
    }

    /// `pshufd dst, src, selector`.
    pub fn pshufd(&mut self, dst: Xmm, src: XmmMem, selector: u8) {
        self.xmm_rm_imm(Some(0x66), Map::_0F, 0x70, dst, &src, selector);
    }

    /// `pblendvb dst, src` (implicit xmm0 mask).
    pub fn pblendvb(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F38, 0x10, dst, &src);
    }

    /// `blendvps dst, src` (implicit xmm0 mask).
    pub fn blendvps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F38, 0x14, dst, &src);
    }

    /// `blendps dst, src, mask` — lane blend by immediate mask.
    pub fn blendps(&mut self, dst: Xmm, src: XmmMem, mask: u8) {
        self.xmm_rm_imm(Some(0x66), Map::_0F3A, 0x0C, dst, &src, mask);
    }

    // ------------------------------------------------------------------
    // Insert / extract
    // ------------------------------------------------------------------

    /// `pinsr{b,w,d,q} dst, src, lane`.
    pub fn pinsr(&mut self, ty: Type, dst: Xmm, src: GprMem, lane: u8) {
        let (map, opcode, w) = match ty {
            Type::I8 => (Map::_0F3A, 0x20, false),
            Type::I16 => (Map::_0F, 0xC4, false),
            Type::I32 => (Map::_0F3A, 0x22, false),
            Type::I64 => (Map::_0F3A, 0x22, true),
            _ => panic!("unsupported pinsr element size"),
        };
        match &src {
            GprMem::Gpr(src) => self.emit_sse(
                Some(0x66),
                map,
                opcode,
                dst.enc(),
                Rm::Reg(src.enc()),
                w,
                Some(lane),
            ),
            GprMem::Mem(address) => self.emit_sse(
                Some(0x66),
                map,
                opcode,
                dst.enc(),
                Rm::Mem(address),
                w,
                Some(lane),
            ),
        }
    }

    /// `pextr{b,w,d,q} dst, src, lane`.
    pub fn pextr(&mut self, ty: Type, dst: Gpr, src: Xmm, lane: u8) {
        match ty {
            // The 3A-map forms encode the GPR in r/m.
            Type::I8 => self.emit_sse(
                Some(0x66),
                Map::_0F3A,
                0x14,
                src.enc(),
                Rm::Reg(dst.enc()),
                false,
                Some(lane),
            ),
            Type::I16 => self.emit_sse(
                Some(0x66),
                Map::_0F,
                0xC5,
                dst.enc(),
                Rm::Reg(src.enc()),
                false,
                Some(lane),
            ),
            Type::I32 => self.emit_sse(
                Some(0x66),
                Map::_0F3A,
                0x16,
                src.enc(),
                Rm::Reg(dst.enc()),
                false,
                Some(lane),
            ),
            Type::I64 => self.emit_sse(
                Some(0x66),
                Map::_0F3A,
                0x16,
                src.enc(),
                Rm::Reg(dst.enc()),
                true,
                Some(lane),
            ),
            _ => panic!("unsupported pextr element size"),
        }
    }

    /// `insertps dst, src, selector`.
    pub fn insertps(&mut self, dst: Xmm, src: XmmMem, selector: u8) {
        self.xmm_rm_imm(Some(0x66), Map::_0F3A, 0x21, dst, &src, selector);
    }

    /// `roundps dst, src, mode`.
    pub fn roundps(&mut self, dst: Xmm, src: XmmMem, mode: u8) {
        self.xmm_rm_imm(Some(0x66), Map::_0F3A, 0x08, dst, &src, mode);
    }

    /// `roundss`/`roundsd dst, src, mode`.
    pub fn roundss(&mut self, ty: Type, dst: Xmm, src: XmmMem, mode: u8) {
        let opcode = match ty {
            Type::F32 => 0x0A,
            Type::F64 => 0x0B,
            _ => panic!("roundss needs F32 or F64"),
        };
        self.xmm_rm_imm(Some(0x66), Map::_0F3A, opcode, dst, &src, mode);
    }

    /// `pmovmskb dst, src` — byte sign-bit mask.
    pub fn pmovmskb(&mut self, dst: Gpr, src: Xmm) {
        self.emit_sse(
            Some(0x66),
            Map::_0F,
            0xD7,
            dst.enc(),
            Rm::Reg(src.enc()),
            false,
            None,
        );
    }

    // ------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------

    /// `cvtsi2ss`/`cvtsi2sd dst, src` (`src_ty` selects 32/64-bit
    /// source).
    pub fn cvtsi2ss(&mut self, dst_ty: Type, src_ty: Type, dst: Xmm, src: GprMem) {
        let w = src_ty.is_64();
        let prefix = Some(Self::scalar_prefix(dst_ty));
        match &src {
            GprMem::Gpr(src) => {
                self.emit_sse(prefix, Map::_0F, 0x2A, dst.enc(), Rm::Reg(src.enc()), w, None)
            }
            GprMem::Mem(address) => {
                self.emit_sse(prefix, Map::_0F, 0x2A, dst.enc(), Rm::Mem(address), w, None)
            }
        }
    }

    /// `cvttss2si`/`cvttsd2si dst, src` — truncating convert.
    pub fn cvttss2si(&mut self, dst_ty: Type, src_ty: Type, dst: Gpr, src: XmmMem) {
        let w = dst_ty.is_64();
        let prefix = Some(Self::scalar_prefix(src_ty));
        match &src {
            XmmMem::Xmm(src) => {
                self.emit_sse(prefix, Map::_0F, 0x2C, dst.enc(), Rm::Reg(src.enc()), w, None)
            }
            XmmMem::Mem(address) => {
                self.emit_sse(prefix, Map::_0F, 0x2C, dst.enc(), Rm::Mem(address), w, None)
            }
        }
    }

    /// `cvtss2si`/`cvtsd2si dst, src` — rounding convert.
    pub fn cvtss2si(&mut self, dst_ty: Type, src_ty: Type, dst: Gpr, src: XmmMem) {
        let w = dst_ty.is_64();
        let prefix = Some(Self::scalar_prefix(src_ty));
        match &src {
            XmmMem::Xmm(src) => {
                self.emit_sse(prefix, Map::_0F, 0x2D, dst.enc(), Rm::Reg(src.enc()), w, None)
            }
            XmmMem::Mem(address) => {
                self.emit_sse(prefix, Map::_0F, 0x2D, dst.enc(), Rm::Mem(address), w, None)
            }
        }
    }

    /// `cvtdq2ps` — packed int to float.
    pub fn cvtdq2ps(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(None, Map::_0F, 0x5B, dst, &src);
    }

    /// `cvttps2dq` — packed float to int, truncating.
    pub fn cvttps2dq(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0xF3), Map::_0F, 0x5B, dst, &src);
    }

    /// `cvtps2dq` — packed float to int, rounding.
    pub fn cvtps2dq(&mut self, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(0x66), Map::_0F, 0x5B, dst, &src);
    }

    /// `cvtss2sd`/`cvtsd2ss` — scalar float width change (`src_ty`
    /// names the source width).
    pub fn cvtfloat2float(&mut self, src_ty: Type, dst: Xmm, src: XmmMem) {
        self.xmm_rm(Some(Self::scalar_prefix(src_ty)), Map::_0F, 0x5A, dst, &src);
    }

    // ------------------------------------------------------------------
    // XMM stack save/restore
    // ------------------------------------------------------------------

    /// Saves an XMM register through 16 bytes of stack.
    pub fn push_xmm(&mut self, reg: Xmm) {
        self.stack_sub(16);
        self.movups_store(AsmAddress::base(Gpr::Rsp), reg);
    }

    /// Restores an XMM register pushed by [`Assembler::push_xmm`].
    pub fn pop_xmm(&mut self, reg: Xmm) {
        self.movups(reg, XmmMem::Mem(AsmAddress::base(Gpr::Rsp)));
        self.stack_add(16);
    }
}
