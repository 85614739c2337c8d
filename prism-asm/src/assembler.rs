//! The assembler proper: general-purpose instruction forms, labels,
//! branches and alignment.
//!
//! Multi-byte values are emitted little-endian. Every emit method
//! appends at the current buffer position; branch targets resolve
//! through [`Label`]s, external references through pc-relative
//! [`Fixup`](crate::buffer::Fixup)s.

use crate::address::{AsmAddress, GprMem};
use crate::buffer::{AssemblerBuffer, Fixup, FixupKind, Symbol};
use crate::label::Label;
use crate::reg::{Condition, Gpr, Type};
use crate::rex::{encode_modrm, low8_will_sign_extend_to_32, RexFlags};

/// Default bundle size for function-entry alignment.
pub const DEFAULT_BUNDLE_ALIGN: u32 = 16;

const MAX_NOP_SIZE: u32 = 8;

/// An x86-64 machine-code emitter over one code buffer.
#[derive(Debug)]
pub struct Assembler {
    pub(crate) buffer: AssemblerBuffer,
    bundle_align: u32,
}

impl Default for Assembler {
    fn default() -> Assembler {
        Assembler::new()
    }
}

impl Assembler {
    /// A fresh assembler with the default bundle alignment.
    pub fn new() -> Assembler {
        Assembler::with_bundle_align(DEFAULT_BUNDLE_ALIGN)
    }

    /// A fresh assembler with a custom (power-of-two) bundle size.
    pub fn with_bundle_align(bundle_align: u32) -> Assembler {
        assert!(bundle_align.is_power_of_two());
        Assembler {
            buffer: AssemblerBuffer::new(),
            bundle_align,
        }
    }

    /// Current emission offset.
    #[inline]
    pub fn position(&self) -> u32 {
        self.buffer.position()
    }

    /// The emitted code so far.
    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }

    /// Pending relocation fixups.
    pub fn fixups(&self) -> &[Fixup] {
        self.buffer.fixups()
    }

    // ------------------------------------------------------------------
    // Shared encoding helpers
    // ------------------------------------------------------------------

    fn rex_for(ty: Type) -> RexFlags {
        if ty.is_64() {
            RexFlags::set_w()
        } else {
            RexFlags::clear_w()
        }
    }

    fn operand_size_prefix(&mut self, ty: Type) {
        if ty.needs_operand_size_prefix() {
            self.buffer.put1(0x66);
        }
    }

    fn emit_register_operand(&mut self, reg: u8, rm: u8) {
        self.buffer.put1(encode_modrm(0b11, reg & 7, rm & 7));
    }

    /// reg ← r/m form with a one-byte opcode (`opcode8` used for
    /// byte-sized operations).
    fn rm_form(&mut self, ty: Type, opcode8: u8, opcode: u8, dst: Gpr, src: &GprMem) {
        self.operand_size_prefix(ty);
        let mut rex = Self::rex_for(ty);
        if ty.is_byte() {
            rex.always_emit_if_8bit_needed(dst.enc());
            if let GprMem::Gpr(src) = src {
                rex.always_emit_if_8bit_needed(src.enc());
            }
        }
        let op = if ty.is_byte() { opcode8 } else { opcode };
        match src {
            GprMem::Gpr(src) => {
                rex.emit_two_op(&mut self.buffer, dst.enc(), src.enc());
                self.buffer.put1(op);
                self.emit_register_operand(dst.enc(), src.enc());
            }
            GprMem::Mem(address) => {
                address.emit_rex_prefix(rex, dst.enc(), &mut self.buffer);
                self.buffer.put1(op);
                address.emit_modrm_sib_disp(dst.enc(), 0, &mut self.buffer);
            }
        }
    }

    /// m ← reg store form.
    fn mr_form(&mut self, ty: Type, opcode8: u8, opcode: u8, dst: &AsmAddress, src: Gpr) {
        self.operand_size_prefix(ty);
        let mut rex = Self::rex_for(ty);
        if ty.is_byte() {
            rex.always_emit_if_8bit_needed(src.enc());
        }
        let op = if ty.is_byte() { opcode8 } else { opcode };
        dst.emit_rex_prefix(rex, src.enc(), &mut self.buffer);
        self.buffer.put1(op);
        dst.emit_modrm_sib_disp(src.enc(), 0, &mut self.buffer);
    }

    /// Two-byte (0F-escaped) reg ← r/m form.
    fn rm_form_0f(&mut self, ty: Type, opcode: u8, dst: Gpr, src: &GprMem) {
        self.operand_size_prefix(ty);
        let rex = Self::rex_for(ty);
        match src {
            GprMem::Gpr(src) => {
                rex.emit_two_op(&mut self.buffer, dst.enc(), src.enc());
                self.buffer.put1(0x0F);
                self.buffer.put1(opcode);
                self.emit_register_operand(dst.enc(), src.enc());
            }
            GprMem::Mem(address) => {
                address.emit_rex_prefix(rex, dst.enc(), &mut self.buffer);
                self.buffer.put1(0x0F);
                self.buffer.put1(opcode);
                address.emit_modrm_sib_disp(dst.enc(), 0, &mut self.buffer);
            }
        }
    }

    /// Group-family form with the operand in r/m and a fixed
    /// extension in the reg field.
    fn ext_form(&mut self, ty: Type, opcode8: u8, opcode: u8, ext: u8, operand: &GprMem) {
        self.operand_size_prefix(ty);
        let mut rex = Self::rex_for(ty);
        if ty.is_byte() {
            if let GprMem::Gpr(reg) = operand {
                rex.always_emit_if_8bit_needed(reg.enc());
            }
        }
        let op = if ty.is_byte() { opcode8 } else { opcode };
        match operand {
            GprMem::Gpr(reg) => {
                rex.emit_one_op(&mut self.buffer, reg.enc());
                self.buffer.put1(op);
                self.emit_register_operand(ext, reg.enc());
            }
            GprMem::Mem(address) => {
                address.emit_rex_prefix(rex, ext, &mut self.buffer);
                self.buffer.put1(op);
                address.emit_modrm_sib_disp(ext, 0, &mut self.buffer);
            }
        }
    }

    // ------------------------------------------------------------------
    // ALU group: add/adc/sub/sbb/and/or/xor/cmp
    // ------------------------------------------------------------------

    fn alu_rm(&mut self, ty: Type, base: u8, dst: Gpr, src: &GprMem) {
        self.rm_form(ty, base + 0x2, base + 0x3, dst, src);
    }

    fn alu_mr(&mut self, ty: Type, base: u8, dst: &AsmAddress, src: Gpr) {
        self.mr_form(ty, base, base + 0x1, dst, src);
    }

    fn alu_imm(&mut self, ty: Type, ext: u8, dst: &GprMem, imm: i32) {
        if ty.is_byte() {
            self.ext_form(ty, 0x80, 0x80, ext, dst);
            self.buffer.put1(imm as u8);
        } else if low8_will_sign_extend_to_32(imm) {
            self.ext_form(ty, 0x83, 0x83, ext, dst);
            self.buffer.put1(imm as u8);
        } else {
            self.ext_form(ty, 0x81, 0x81, ext, dst);
            if ty.needs_operand_size_prefix() {
                // 0x66 was already emitted by ext_form; the immediate
                // narrows with the operand.
                self.buffer.put2(imm as u16);
            } else {
                self.buffer.put4(imm as u32);
            }
        }
    }

    /// `add dst, src`.
    pub fn add(&mut self, ty: Type, dst: Gpr, src: GprMem) {
        self.alu_rm(ty, 0x00, dst, &src);
    }

    /// `add [dst], src`.
    pub fn add_store(&mut self, ty: Type, dst: AsmAddress, src: Gpr) {
        self.alu_mr(ty, 0x00, &dst, src);
    }

    /// `add dst, imm`.
    pub fn add_imm(&mut self, ty: Type, dst: GprMem, imm: i32) {
        self.alu_imm(ty, 0, &dst, imm);
    }

    /// `adc dst, src`.
    pub fn adc(&mut self, ty: Type, dst: Gpr, src: GprMem) {
        self.alu_rm(ty, 0x10, dst, &src);
    }

    /// `adc dst, imm`.
    pub fn adc_imm(&mut self, ty: Type, dst: GprMem, imm: i32) {
        self.alu_imm(ty, 2, &dst, imm);
    }

    /// `sub dst, src`.
    pub fn sub(&mut self, ty: Type, dst: Gpr, src: GprMem) {
        self.alu_rm(ty, 0x28, dst, &src);
    }

    /// `sub [dst], src`.
    pub fn sub_store(&mut self, ty: Type, dst: AsmAddress, src: Gpr) {
        self.alu_mr(ty, 0x28, &dst, src);
    }

    /// `sub dst, imm`.
    pub fn sub_imm(&mut self, ty: Type, dst: GprMem, imm: i32) {
        self.alu_imm(ty, 5, &dst, imm);
    }

    /// `sbb dst, src`.
    pub fn sbb(&mut self, ty: Type, dst: Gpr, src: GprMem) {
        self.alu_rm(ty, 0x18, dst, &src);
    }

    /// `sbb dst, imm`.
    pub fn sbb_imm(&mut self, ty: Type, dst: GprMem, imm: i32) {
        self.alu_imm(ty, 3, &dst, imm);
    }

    /// `and dst, src`.
    pub fn and(&mut self, ty: Type, dst: Gpr, src: GprMem) {
        self.alu_rm(ty, 0x20, dst, &src);
    }

    /// `and dst, imm`.
    pub fn and_imm(&mut self, ty: Type, dst: GprMem, imm: i32) {
        self.alu_imm(ty, 4, &dst, imm);
    }

    /// `or dst, src`.
    pub fn or(&mut self, ty: Type, dst: Gpr, src: GprMem) {
        self.alu_rm(ty, 0x08, dst, &src);
    }

    /// `or dst, imm`.
    pub fn or_imm(&mut self, ty: Type, dst: GprMem, imm: i32) {
        self.alu_imm(ty, 1, &dst, imm);
    }

    /// `xor dst, src`.
    pub fn xor(&mut self, ty: Type, dst: Gpr, src: GprMem) {
        self.alu_rm(ty, 0x30, dst, &src);
    }

    /// `xor dst, imm`.
    pub fn xor_imm(&mut self, ty: Type, dst: GprMem, imm: i32) {
        self.alu_imm(ty, 6, &dst, imm);
    }

    /// `cmp left, right`.
    pub fn cmp(&mut self, ty: Type, left: Gpr, right: GprMem) {
        self.alu_rm(ty, 0x38, left, &right);
    }

    /// `cmp [left], right`.
    pub fn cmp_store(&mut self, ty: Type, left: AsmAddress, right: Gpr) {
        self.alu_mr(ty, 0x38, &left, right);
    }

    /// `cmp left, imm`.
    pub fn cmp_imm(&mut self, ty: Type, left: GprMem, imm: i32) {
        self.alu_imm(ty, 7, &left, imm);
    }

    /// `test dst, src` (flags only).
    pub fn test(&mut self, ty: Type, dst: GprMem, src: Gpr) {
        match &dst {
            GprMem::Gpr(reg) => {
                self.operand_size_prefix(ty);
                let mut rex = Self::rex_for(ty);
                if ty.is_byte() {
                    rex.always_emit_if_8bit_needed(reg.enc());
                    rex.always_emit_if_8bit_needed(src.enc());
                }
                rex.emit_two_op(&mut self.buffer, src.enc(), reg.enc());
                self.buffer.put1(if ty.is_byte() { 0x84 } else { 0x85 });
                self.emit_register_operand(src.enc(), reg.enc());
            }
            GprMem::Mem(address) => {
                self.operand_size_prefix(ty);
                let mut rex = Self::rex_for(ty);
                if ty.is_byte() {
                    rex.always_emit_if_8bit_needed(src.enc());
                }
                address.emit_rex_prefix(rex, src.enc(), &mut self.buffer);
                self.buffer.put1(if ty.is_byte() { 0x84 } else { 0x85 });
                address.emit_modrm_sib_disp(src.enc(), 0, &mut self.buffer);
            }
        }
    }

    /// `test dst, imm`.
    pub fn test_imm(&mut self, ty: Type, dst: GprMem, imm: i32) {
        self.ext_form(ty, 0xF6, 0xF7, 0, &dst);
        if ty.is_byte() {
            self.buffer.put1(imm as u8);
        } else if ty.needs_operand_size_prefix() {
            self.buffer.put2(imm as u16);
        } else {
            self.buffer.put4(imm as u32);
        }
    }

    // ------------------------------------------------------------------
    // Unary group: neg/not; multiplicative group
    // ------------------------------------------------------------------

    /// `neg operand`.
    pub fn neg(&mut self, ty: Type, operand: GprMem) {
        self.ext_form(ty, 0xF6, 0xF7, 3, &operand);
    }

    /// `not operand`.
    pub fn not(&mut self, ty: Type, operand: GprMem) {
        self.ext_form(ty, 0xF6, 0xF7, 2, &operand);
    }

    /// `mul operand` (unsigned, rdx:rax).
    pub fn mul(&mut self, ty: Type, operand: GprMem) {
        self.ext_form(ty, 0xF6, 0xF7, 4, &operand);
    }

    /// One-operand `imul` (signed, rdx:rax).
    pub fn imul_rdx_rax(&mut self, ty: Type, operand: GprMem) {
        self.ext_form(ty, 0xF6, 0xF7, 5, &operand);
    }

    /// Two-operand `imul dst, src`.
    pub fn imul(&mut self, ty: Type, dst: Gpr, src: GprMem) {
        debug_assert!(!ty.is_byte());
        self.rm_form_0f(ty, 0xAF, dst, &src);
    }

    /// Three-operand `imul dst, src, imm`.
    pub fn imul_imm(&mut self, ty: Type, dst: Gpr, src: GprMem, imm: i32) {
        debug_assert!(!ty.is_byte());
        self.operand_size_prefix(ty);
        let rex = Self::rex_for(ty);
        let short = low8_will_sign_extend_to_32(imm);
        let opcode = if short { 0x6B } else { 0x69 };
        match &src {
            GprMem::Gpr(src) => {
                rex.emit_two_op(&mut self.buffer, dst.enc(), src.enc());
                self.buffer.put1(opcode);
                self.emit_register_operand(dst.enc(), src.enc());
            }
            GprMem::Mem(address) => {
                address.emit_rex_prefix(rex, dst.enc(), &mut self.buffer);
                self.buffer.put1(opcode);
                let imm_len = if short { 1 } else { 4 };
                address.emit_modrm_sib_disp(dst.enc(), imm_len, &mut self.buffer);
            }
        }
        if short {
            self.buffer.put1(imm as u8);
        } else {
            self.buffer.put4(imm as u32);
        }
    }

    /// `div operand` (unsigned, rdx:rax).
    pub fn div(&mut self, ty: Type, operand: GprMem) {
        self.ext_form(ty, 0xF6, 0xF7, 6, &operand);
    }

    /// `idiv operand` (signed, rdx:rax).
    pub fn idiv(&mut self, ty: Type, operand: GprMem) {
        self.ext_form(ty, 0xF6, 0xF7, 7, &operand);
    }

    /// `cbw` — sign-extend al into ax.
    pub fn cbw(&mut self) {
        self.buffer.put1(0x66);
        self.buffer.put1(0x98);
    }

    /// `cwd` — sign-extend ax into dx:ax.
    pub fn cwd(&mut self) {
        self.buffer.put1(0x66);
        self.buffer.put1(0x99);
    }

    /// `cdq` — sign-extend eax into edx:eax.
    pub fn cdq(&mut self) {
        self.buffer.put1(0x99);
    }

    /// `cqo` — sign-extend rax into rdx:rax.
    pub fn cqo(&mut self) {
        self.buffer.put1(0x48);
        self.buffer.put1(0x99);
    }

    // ------------------------------------------------------------------
    // Shifts and double shifts
    // ------------------------------------------------------------------

    fn shift_imm(&mut self, ty: Type, ext: u8, operand: &GprMem, imm: u8) {
        if imm == 1 {
            self.ext_form(ty, 0xD0, 0xD1, ext, operand);
        } else {
            self.ext_form(ty, 0xC0, 0xC1, ext, operand);
            self.buffer.put1(imm);
        }
    }

    fn shift_cl(&mut self, ty: Type, ext: u8, operand: &GprMem) {
        self.ext_form(ty, 0xD2, 0xD3, ext, operand);
    }

    /// `shl operand, imm`.
    pub fn shl_imm(&mut self, ty: Type, operand: GprMem, imm: u8) {
        self.shift_imm(ty, 4, &operand, imm);
    }

    /// `shl operand, cl`.
    pub fn shl_cl(&mut self, ty: Type, operand: GprMem) {
        self.shift_cl(ty, 4, &operand);
    }

    /// `shr operand, imm`.
    pub fn shr_imm(&mut self, ty: Type, operand: GprMem, imm: u8) {
        self.shift_imm(ty, 5, &operand, imm);
    }

    /// `shr operand, cl`.
    pub fn shr_cl(&mut self, ty: Type, operand: GprMem) {
        self.shift_cl(ty, 5, &operand);
    }

    /// `sar operand, imm`.
    pub fn sar_imm(&mut self, ty: Type, operand: GprMem, imm: u8) {
        self.shift_imm(ty, 7, &operand, imm);
    }

    /// `sar operand, cl`.
    pub fn sar_cl(&mut self, ty: Type, operand: GprMem) {
        self.shift_cl(ty, 7, &operand);
    }

    /// `rol operand, imm`.
    pub fn rol_imm(&mut self, ty: Type, operand: GprMem, imm: u8) {
        self.shift_imm(ty, 0, &operand, imm);
    }

    /// `rol operand, cl`.
    pub fn rol_cl(&mut self, ty: Type, operand: GprMem) {
        self.shift_cl(ty, 0, &operand);
    }

    /// `shld dst, src, imm` — shift dst left, filling from src.
    pub fn shld_imm(&mut self, ty: Type, dst: Gpr, src: Gpr, imm: u8) {
        self.operand_size_prefix(ty);
        Self::rex_for(ty).emit_two_op(&mut self.buffer, src.enc(), dst.enc());
        self.buffer.put1(0x0F);
        self.buffer.put1(0xA4);
        self.emit_register_operand(src.enc(), dst.enc());
        self.buffer.put1(imm);
    }

    /// `shld dst, src, cl`.
    pub fn shld_cl(&mut self, ty: Type, dst: Gpr, src: Gpr) {
        self.operand_size_prefix(ty);
        Self::rex_for(ty).emit_two_op(&mut self.buffer, src.enc(), dst.enc());
        self.buffer.put1(0x0F);
        self.buffer.put1(0xA5);
        self.emit_register_operand(src.enc(), dst.enc());
    }

    /// `shrd dst, src, imm` — shift dst right, filling from src.
    pub fn shrd_imm(&mut self, ty: Type, dst: Gpr, src: Gpr, imm: u8) {
        self.operand_size_prefix(ty);
        Self::rex_for(ty).emit_two_op(&mut self.buffer, src.enc(), dst.enc());
        self.buffer.put1(0x0F);
        self.buffer.put1(0xAC);
        self.emit_register_operand(src.enc(), dst.enc());
        self.buffer.put1(imm);
    }

    /// `shrd dst, src, cl`.
    pub fn shrd_cl(&mut self, ty: Type, dst: Gpr, src: Gpr) {
        self.operand_size_prefix(ty);
        Self::rex_for(ty).emit_two_op(&mut self.buffer, src.enc(), dst.enc());
        self.buffer.put1(0x0F);
        self.buffer.put1(0xAD);
        self.emit_register_operand(src.enc(), dst.enc());
    }

    // ------------------------------------------------------------------
    // Moves and extensions
    // ------------------------------------------------------------------

    /// `mov dst, src` (register or load).
    pub fn mov(&mut self, ty: Type, dst: Gpr, src: GprMem) {
        self.rm_form(ty, 0x8A, 0x8B, dst, &src);
    }

    /// `mov [dst], src`.
    pub fn mov_store(&mut self, ty: Type, dst: AsmAddress, src: Gpr) {
        self.mr_form(ty, 0x88, 0x89, &dst, src);
    }

    /// `mov dst, imm` with the shortest fitting encoding.
    pub fn mov_imm(&mut self, ty: Type, dst: Gpr, imm: i64) {
        match ty {
            Type::I64 => {
                if i32::try_from(imm).is_ok() {
                    // Sign-extended 32-bit immediate form.
                    RexFlags::set_w().emit_one_op(&mut self.buffer, dst.enc());
                    self.buffer.put1(0xC7);
                    self.emit_register_operand(0, dst.enc());
                    self.buffer.put4(imm as u32);
                } else {
                    self.movabs(dst, imm as u64);
                }
            }
            Type::I8 => {
                let mut rex = RexFlags::clear_w();
                rex.always_emit_if_8bit_needed(dst.enc());
                rex.emit_one_op(&mut self.buffer, dst.enc());
                self.buffer.put1(0xB0 + (dst.enc() & 7));
                self.buffer.put1(imm as u8);
            }
            Type::I16 => {
                self.buffer.put1(0x66);
                RexFlags::clear_w().emit_one_op(&mut self.buffer, dst.enc());
                self.buffer.put1(0xB8 + (dst.enc() & 7));
                self.buffer.put2(imm as u16);
            }
            _ => {
                RexFlags::clear_w().emit_one_op(&mut self.buffer, dst.enc());
                self.buffer.put1(0xB8 + (dst.enc() & 7));
                self.buffer.put4(imm as u32);
            }
        }
    }

    /// `mov [dst], imm`.
    pub fn mov_imm_store(&mut self, ty: Type, dst: AsmAddress, imm: i32) {
        self.operand_size_prefix(ty);
        let rex = Self::rex_for(ty);
        let opcode = if ty.is_byte() { 0xC6 } else { 0xC7 };
        let imm_len = if ty.is_byte() {
            1
        } else if ty.needs_operand_size_prefix() {
            2
        } else {
            4
        };
        dst.emit_rex_prefix(rex, 0, &mut self.buffer);
        self.buffer.put1(opcode);
        dst.emit_modrm_sib_disp(0, imm_len, &mut self.buffer);
        match imm_len {
            1 => self.buffer.put1(imm as u8),
            2 => self.buffer.put2(imm as u16),
            _ => self.buffer.put4(imm as u32),
        }
    }

    /// `movabs dst, imm64`.
    pub fn movabs(&mut self, dst: Gpr, imm: u64) {
        RexFlags::set_w().emit_one_op(&mut self.buffer, dst.enc());
        self.buffer.put1(0xB8 + (dst.enc() & 7));
        self.buffer.put8(imm);
    }

    /// `movzx dst, src` — zero extension from `src_ty` into a 32-bit
    /// destination (the upper 32 bits clear architecturally).
    pub fn movzx(&mut self, src_ty: Type, dst: Gpr, src: GprMem) {
        let opcode = match src_ty {
            Type::I8 => 0xB6,
            Type::I16 => 0xB7,
            _ => panic!("movzx source must be 8- or 16-bit"),
        };
        let mut rex = RexFlags::clear_w();
        if src_ty.is_byte() {
            if let GprMem::Gpr(src) = &src {
                rex.always_emit_if_8bit_needed(src.enc());
            }
        }
        match &src {
            GprMem::Gpr(src) => {
                rex.emit_two_op(&mut self.buffer, dst.enc(), src.enc());
                self.buffer.put1(0x0F);
                self.buffer.put1(opcode);
                self.emit_register_operand(dst.enc(), src.enc());
            }
            GprMem::Mem(address) => {
                address.emit_rex_prefix(rex, dst.enc(), &mut self.buffer);
                self.buffer.put1(0x0F);
                self.buffer.put1(opcode);
                address.emit_modrm_sib_disp(dst.enc(), 0, &mut self.buffer);
            }
        }
    }

    /// `movsx dst, src` — sign extension from `src_ty` into a 64-bit
    /// destination.
    pub fn movsx(&mut self, src_ty: Type, dst: Gpr, src: GprMem) {
        let (escape, opcode) = match src_ty {
            Type::I8 => (true, 0xBE),
            Type::I16 => (true, 0xBF),
            Type::I32 => (false, 0x63),
            _ => panic!("movsx source must be 8-, 16- or 32-bit"),
        };
        let mut rex = RexFlags::set_w();
        if src_ty.is_byte() {
            if let GprMem::Gpr(src) = &src {
                rex.always_emit_if_8bit_needed(src.enc());
            }
        }
        match &src {
            GprMem::Gpr(src) => {
                rex.emit_two_op(&mut self.buffer, dst.enc(), src.enc());
                if escape {
                    self.buffer.put1(0x0F);
                }
                self.buffer.put1(opcode);
                self.emit_register_operand(dst.enc(), src.enc());
            }
            GprMem::Mem(address) => {
                address.emit_rex_prefix(rex, dst.enc(), &mut self.buffer);
                if escape {
                    self.buffer.put1(0x0F);
                }
                self.buffer.put1(opcode);
                address.emit_modrm_sib_disp(dst.enc(), 0, &mut self.buffer);
            }
        }
    }

    /// `lea dst, [address]`.
    pub fn lea(&mut self, ty: Type, dst: Gpr, address: AsmAddress) {
        debug_assert!(matches!(ty, Type::I32 | Type::I64));
        let rex = Self::rex_for(ty);
        address.emit_rex_prefix(rex, dst.enc(), &mut self.buffer);
        self.buffer.put1(0x8D);
        address.emit_modrm_sib_disp(dst.enc(), 0, &mut self.buffer);
    }

    // ------------------------------------------------------------------
    // Bit scans and tests
    // ------------------------------------------------------------------

    /// `bsf dst, src` — lowest set bit index.
    pub fn bsf(&mut self, ty: Type, dst: Gpr, src: GprMem) {
        self.rm_form_0f(ty, 0xBC, dst, &src);
    }

    /// `bsr dst, src` — highest set bit index.
    pub fn bsr(&mut self, ty: Type, dst: Gpr, src: GprMem) {
        self.rm_form_0f(ty, 0xBD, dst, &src);
    }

    /// `bt base, offset` — bit test into CF.
    pub fn bt(&mut self, ty: Type, base: Gpr, offset: Gpr) {
        self.operand_size_prefix(ty);
        Self::rex_for(ty).emit_two_op(&mut self.buffer, offset.enc(), base.enc());
        self.buffer.put1(0x0F);
        self.buffer.put1(0xA3);
        self.emit_register_operand(offset.enc(), base.enc());
    }

    /// `bswap reg`.
    pub fn bswap(&mut self, ty: Type, reg: Gpr) {
        debug_assert!(matches!(ty, Type::I32 | Type::I64));
        Self::rex_for(ty).emit_one_op(&mut self.buffer, reg.enc());
        self.buffer.put1(0x0F);
        self.buffer.put1(0xC8 + (reg.enc() & 7));
    }

    // ------------------------------------------------------------------
    // Conditionals
    // ------------------------------------------------------------------

    /// `setcc dst` — byte destination.
    pub fn setcc(&mut self, condition: Condition, dst: Gpr) {
        let mut rex = RexFlags::clear_w();
        rex.always_emit_if_8bit_needed(dst.enc());
        rex.emit_one_op(&mut self.buffer, dst.enc());
        self.buffer.put1(0x0F);
        self.buffer.put1(0x90 + condition.enc());
        self.emit_register_operand(0, dst.enc());
    }

    /// `cmovcc dst, src` — 16/32/64-bit conditional move.
    pub fn cmov(&mut self, ty: Type, condition: Condition, dst: Gpr, src: GprMem) {
        debug_assert!(!ty.is_byte());
        self.rm_form_0f(ty, 0x40 + condition.enc(), dst, &src);
    }

    // ------------------------------------------------------------------
    // Branches, calls, labels
    // ------------------------------------------------------------------

    /// Conditional branch. Bound targets use the shortest fitting
    /// form; unbound ones reserve one byte when `near`, else four.
    pub fn j(&mut self, condition: Condition, label: &mut Label, near: bool) {
        if label.is_bound() {
            const SHORT_SIZE: i64 = 2;
            const LONG_SIZE: i64 = 6;
            let offset = i64::from(label.position()) - i64::from(self.buffer.position());
            debug_assert!(offset <= 0);
            if i8::try_from(offset - SHORT_SIZE).is_ok() {
                self.buffer.put1(0x70 + condition.enc());
                self.buffer.put1((offset - SHORT_SIZE) as u8);
            } else {
                self.buffer.put1(0x0F);
                self.buffer.put1(0x80 + condition.enc());
                self.buffer.put4((offset - LONG_SIZE) as u32);
            }
        } else if near {
            self.buffer.put1(0x70 + condition.enc());
            self.emit_near_label_link(label);
        } else {
            self.buffer.put1(0x0F);
            self.buffer.put1(0x80 + condition.enc());
            self.emit_label_link(label);
        }
    }

    /// Unconditional branch to a label.
    pub fn jmp(&mut self, label: &mut Label, near: bool) {
        if label.is_bound() {
            const SHORT_SIZE: i64 = 2;
            const LONG_SIZE: i64 = 5;
            let offset = i64::from(label.position()) - i64::from(self.buffer.position());
            debug_assert!(offset <= 0);
            if i8::try_from(offset - SHORT_SIZE).is_ok() {
                self.buffer.put1(0xEB);
                self.buffer.put1((offset - SHORT_SIZE) as u8);
            } else {
                self.buffer.put1(0xE9);
                self.buffer.put4((offset - LONG_SIZE) as u32);
            }
        } else if near {
            self.buffer.put1(0xEB);
            self.emit_near_label_link(label);
        } else {
            self.buffer.put1(0xE9);
            self.emit_label_link(label);
        }
    }

    /// `jmp reg`.
    pub fn jmp_reg(&mut self, reg: Gpr) {
        RexFlags::clear_w().emit_one_op(&mut self.buffer, reg.enc());
        self.buffer.put1(0xFF);
        self.emit_register_operand(4, reg.enc());
    }

    /// `call label` (direct, within this function's buffer).
    pub fn call_label(&mut self, label: &mut Label) {
        if label.is_bound() {
            const LONG_SIZE: i64 = 5;
            let offset = i64::from(label.position()) - i64::from(self.buffer.position());
            debug_assert!(offset <= 0);
            self.buffer.put1(0xE8);
            self.buffer.put4((offset - LONG_SIZE) as u32);
        } else {
            self.buffer.put1(0xE8);
            self.emit_label_link(label);
        }
    }

    /// `call reg` (indirect).
    pub fn call_reg(&mut self, reg: Gpr) {
        RexFlags::clear_w().emit_one_op(&mut self.buffer, reg.enc());
        self.buffer.put1(0xFF);
        self.emit_register_operand(2, reg.enc());
    }

    /// `call [address]` (indirect).
    pub fn call_mem(&mut self, address: AsmAddress) {
        address.emit_rex_prefix(RexFlags::clear_w(), 2, &mut self.buffer);
        self.buffer.put1(0xFF);
        address.emit_modrm_sib_disp(2, 0, &mut self.buffer);
    }

    /// `call symbol` (relocatable, pc-relative fixup).
    pub fn call_symbol(&mut self, symbol: Symbol) {
        self.buffer.put1(0xE8);
        self.buffer.add_fixup(FixupKind::PcRel, symbol, -4);
        self.buffer.put4(0);
    }

    /// Binds `label` to the current position, patching every pending
    /// site.
    ///
    /// # Panics
    ///
    /// Panics if the label was already bound.
    pub fn bind(&mut self, label: &mut Label) {
        let bound = self.buffer.position();
        assert!(!label.is_bound(), "labels can only be bound once");
        log::trace!("binding label at {:#x}", bound);

        while label.is_linked() {
            let position = label.link_head();
            let next = self.buffer.load32(position);
            let offset = i64::from(bound) - i64::from(position + 4);
            self.buffer.store32(position, offset as u32);
            label.set_link_head(next);
        }
        for position in label.take_near_links() {
            let offset = i64::from(bound) - i64::from(position + 1);
            let offset = i8::try_from(offset).expect("near branch out of range");
            self.buffer.store8(position, offset as u8);
        }
        label.bind_to(bound);
    }

    fn emit_label_link(&mut self, label: &mut Label) {
        let position = self.buffer.position();
        let previous_head = label.link_to(position);
        self.buffer.put4(previous_head);
    }

    fn emit_near_label_link(&mut self, label: &mut Label) {
        let position = self.buffer.position();
        label.near_link_to(position);
        self.buffer.put1(0);
    }

    // ------------------------------------------------------------------
    // Stack operations
    // ------------------------------------------------------------------

    /// `push reg`.
    pub fn push(&mut self, reg: Gpr) {
        RexFlags::clear_w().emit_one_op(&mut self.buffer, reg.enc());
        self.buffer.put1(0x50 + (reg.enc() & 7));
    }

    /// `push imm`.
    pub fn push_imm(&mut self, imm: i32) {
        if low8_will_sign_extend_to_32(imm) {
            self.buffer.put1(0x6A);
            self.buffer.put1(imm as u8);
        } else {
            self.buffer.put1(0x68);
            self.buffer.put4(imm as u32);
        }
    }

    /// `pop reg`.
    pub fn pop(&mut self, reg: Gpr) {
        RexFlags::clear_w().emit_one_op(&mut self.buffer, reg.enc());
        self.buffer.put1(0x58 + (reg.enc() & 7));
    }

    /// `pop [address]`.
    pub fn pop_mem(&mut self, address: AsmAddress) {
        address.emit_rex_prefix(RexFlags::clear_w(), 0, &mut self.buffer);
        self.buffer.put1(0x8F);
        address.emit_modrm_sib_disp(0, 0, &mut self.buffer);
    }

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    /// `mfence`.
    pub fn mfence(&mut self) {
        self.buffer.put1(0x0F);
        self.buffer.put1(0xAE);
        self.buffer.put1(0xF0);
    }

    /// `cmpxchg [address], src`, optionally locked.
    pub fn cmpxchg(&mut self, ty: Type, address: AsmAddress, src: Gpr, locked: bool) {
        if locked {
            self.buffer.put1(0xF0);
        }
        self.operand_size_prefix(ty);
        let mut rex = Self::rex_for(ty);
        if ty.is_byte() {
            rex.always_emit_if_8bit_needed(src.enc());
        }
        address.emit_rex_prefix(rex, src.enc(), &mut self.buffer);
        self.buffer.put1(0x0F);
        self.buffer.put1(if ty.is_byte() { 0xB0 } else { 0xB1 });
        address.emit_modrm_sib_disp(src.enc(), 0, &mut self.buffer);
    }

    /// `cmpxchg8b [address]`, optionally locked.
    pub fn cmpxchg8b(&mut self, address: AsmAddress, locked: bool) {
        if locked {
            self.buffer.put1(0xF0);
        }
        address.emit_rex_prefix(RexFlags::clear_w(), 1, &mut self.buffer);
        self.buffer.put1(0x0F);
        self.buffer.put1(0xC7);
        address.emit_modrm_sib_disp(1, 0, &mut self.buffer);
    }

    /// `xadd [address], src`, optionally locked.
    pub fn xadd(&mut self, ty: Type, address: AsmAddress, src: Gpr, locked: bool) {
        if locked {
            self.buffer.put1(0xF0);
        }
        self.operand_size_prefix(ty);
        let mut rex = Self::rex_for(ty);
        if ty.is_byte() {
            rex.always_emit_if_8bit_needed(src.enc());
        }
        address.emit_rex_prefix(rex, src.enc(), &mut self.buffer);
        self.buffer.put1(0x0F);
        self.buffer.put1(if ty.is_byte() { 0xC0 } else { 0xC1 });
        address.emit_modrm_sib_disp(src.enc(), 0, &mut self.buffer);
    }

    /// `xchg [address], src` (implicitly locked by the hardware).
    pub fn xchg(&mut self, ty: Type, address: AsmAddress, src: Gpr) {
        self.operand_size_prefix(ty);
        let mut rex = Self::rex_for(ty);
        if ty.is_byte() {
            rex.always_emit_if_8bit_needed(src.enc());
        }
        address.emit_rex_prefix(rex, src.enc(), &mut self.buffer);
        self.buffer.put1(if ty.is_byte() { 0x86 } else { 0x87 });
        address.emit_modrm_sib_disp(src.enc(), 0, &mut self.buffer);
    }

    // ------------------------------------------------------------------
    // Miscellaneous
    // ------------------------------------------------------------------

    /// `ret`.
    pub fn ret(&mut self) {
        self.buffer.put1(0xC3);
    }

    /// `ret imm16` (callee pops).
    pub fn ret_imm(&mut self, imm: u16) {
        self.buffer.put1(0xC2);
        self.buffer.put2(imm);
    }

    /// `int3`.
    pub fn int3(&mut self) {
        self.buffer.put1(0xCC);
    }

    /// `hlt`.
    pub fn hlt(&mut self) {
        self.buffer.put1(0xF4);
    }

    /// `ud2`.
    pub fn ud2(&mut self) {
        self.buffer.put1(0x0F);
        self.buffer.put1(0x0B);
    }

    /// Canonical multi-byte NOP of `size` bytes (1..=8).
    pub fn nop(&mut self, size: u32) {
        match size {
            1 => self.buffer.put1(0x90),
            2 => {
                self.buffer.put1(0x66);
                self.buffer.put1(0x90);
            }
            3 => {
                self.buffer.put1(0x0F);
                self.buffer.put1(0x1F);
                self.buffer.put1(0x00);
            }
            4 => {
                self.buffer.put1(0x0F);
                self.buffer.put1(0x1F);
                self.buffer.put1(0x40);
                self.buffer.put1(0x00);
            }
            5 => {
                self.buffer.put1(0x0F);
                self.buffer.put1(0x1F);
                self.buffer.put1(0x44);
                self.buffer.put1(0x00);
                self.buffer.put1(0x00);
            }
            6 => {
                self.buffer.put1(0x66);
                self.buffer.put1(0x0F);
                self.buffer.put1(0x1F);
                self.buffer.put1(0x44);
                self.buffer.put1(0x00);
                self.buffer.put1(0x00);
            }
            7 => {
                self.buffer.put1(0x0F);
                self.buffer.put1(0x1F);
                self.buffer.put1(0x80);
                self.buffer.put4(0);
            }
            8 => {
                self.buffer.put1(0x0F);
                self.buffer.put1(0x1F);
                self.buffer.put1(0x84);
                self.buffer.put1(0x00);
                self.buffer.put4(0);
            }
            _ => panic!("unsupported nop size {}", size),
        }
    }

    /// Pads with NOPs until `position + offset` is `alignment`-aligned.
    pub fn align(&mut self, alignment: u32, offset: u32) {
        assert!(alignment.is_power_of_two());
        let position = offset + self.buffer.position();
        let modulo = position & (alignment - 1);
        if modulo == 0 {
            return;
        }
        let mut needed = alignment - modulo;
        while needed > MAX_NOP_SIZE {
            self.nop(MAX_NOP_SIZE);
            needed -= MAX_NOP_SIZE;
        }
        if needed > 0 {
            self.nop(needed);
        }
        debug_assert_eq!((offset + self.buffer.position()) & (alignment - 1), 0);
    }

    /// Pads to the next bundle boundary with `hlt`, for function
    /// entries in the immutable-code region.
    pub fn align_function(&mut self) {
        let align = self.bundle_align;
        let mut needed = offset_to_alignment(self.buffer.position(), align);
        while needed > 0 {
            self.hlt();
            needed -= 1;
        }
    }

    // ------------------------------------------------------------------
    // Prolog / epilog helpers
    // ------------------------------------------------------------------

    /// `push rbp; mov rbp, rsp`.
    pub fn link_frame(&mut self) {
        self.push(Gpr::Rbp);
        self.mov(Type::I64, Gpr::Rbp, GprMem::Gpr(Gpr::Rsp));
    }

    /// `mov rsp, rbp; pop rbp`.
    pub fn unlink_frame(&mut self) {
        self.mov(Type::I64, Gpr::Rsp, GprMem::Gpr(Gpr::Rbp));
        self.pop(Gpr::Rbp);
    }

    /// `sub rsp, bytes`.
    pub fn stack_sub(&mut self, bytes: i32) {
        if bytes != 0 {
            self.sub_imm(Type::I64, GprMem::Gpr(Gpr::Rsp), bytes);
        }
    }

    /// `add rsp, bytes`.
    pub fn stack_add(&mut self, bytes: i32) {
        if bytes != 0 {
            self.add_imm(Type::I64, GprMem::Gpr(Gpr::Rsp), bytes);
        }
    }

    /// Pushes each register in order.
    pub fn push_gprs(&mut self, regs: &[Gpr]) {
        for &reg in regs {
            self.push(reg);
        }
    }

    /// Pops the registers pushed by [`Assembler::push_gprs`], in
    /// reverse.
    pub fn pop_gprs(&mut self, regs: &[Gpr]) {
        for &reg in regs.iter().rev() {
            self.pop(reg);
        }
    }
}

fn offset_to_alignment(position: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    let modulo = position & (alignment - 1);
    if modulo == 0 {
        0
    } else {
        alignment - modulo
    }
}
