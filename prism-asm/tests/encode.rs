//! Byte-exact encoding checks against reference encodings.

use prism_asm::{
    AsmAddress, Assembler, Condition, Gpr, GprMem, Label, Scale, Type, Xmm, XmmMem,
};

fn assemble(f: impl FnOnce(&mut Assembler)) -> Vec<u8> {
    let mut assembler = Assembler::new();
    f(&mut assembler);
    assembler.bytes().to_vec()
}

#[test]
fn lock_cmpxchg_mem_reg() {
    // lock cmpxchg [rdi], ecx
    let bytes = assemble(|a| {
        a.cmpxchg(Type::I32, AsmAddress::base(Gpr::Rdi), Gpr::Rcx, true);
    });
    assert_eq!(bytes, vec![0xF0, 0x0F, 0xB1, 0x0F]);
}

#[test]
fn basic_moves() {
    // mov rax, rbx
    assert_eq!(
        assemble(|a| a.mov(Type::I64, Gpr::Rax, GprMem::Gpr(Gpr::Rbx))),
        vec![0x48, 0x8B, 0xC3]
    );
    // mov eax, [rdi + 8]
    assert_eq!(
        assemble(|a| a.mov(Type::I32, Gpr::Rax, GprMem::Mem(AsmAddress::base_disp(Gpr::Rdi, 8)))),
        vec![0x8B, 0x47, 0x08]
    );
    // mov [rdi], esi
    assert_eq!(
        assemble(|a| a.mov_store(Type::I32, AsmAddress::base(Gpr::Rdi), Gpr::Rsi)),
        vec![0x89, 0x37]
    );
    // mov r10d, 7
    assert_eq!(
        assemble(|a| a.mov_imm(Type::I32, Gpr::R10, 7)),
        vec![0x41, 0xBA, 0x07, 0x00, 0x00, 0x00]
    );
    // movabs rax, 0x1122334455667788
    assert_eq!(
        assemble(|a| a.movabs(Gpr::Rax, 0x1122_3344_5566_7788)),
        vec![0x48, 0xB8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
    );
}

#[test]
fn movzx_byte_clears_upper_bits() {
    // movzx eax, cl
    assert_eq!(
        assemble(|a| a.movzx(Type::I8, Gpr::Rax, GprMem::Gpr(Gpr::Rcx))),
        vec![0x0F, 0xB6, 0xC1]
    );
    // movzx eax, sil needs a REX prefix to reach sil.
    assert_eq!(
        assemble(|a| a.movzx(Type::I8, Gpr::Rax, GprMem::Gpr(Gpr::Rsi))),
        vec![0x40, 0x0F, 0xB6, 0xC6]
    );
}

#[test]
fn movsx_sign_extends_to_64() {
    // movsx rax, cl
    assert_eq!(
        assemble(|a| a.movsx(Type::I8, Gpr::Rax, GprMem::Gpr(Gpr::Rcx))),
        vec![0x48, 0x0F, 0xBE, 0xC1]
    );
    // movsxd rax, ecx
    assert_eq!(
        assemble(|a| a.movsx(Type::I32, Gpr::Rax, GprMem::Gpr(Gpr::Rcx))),
        vec![0x48, 0x63, 0xC1]
    );
}

#[test]
fn alu_forms() {
    // add eax, ecx
    assert_eq!(
        assemble(|a| a.add(Type::I32, Gpr::Rax, GprMem::Gpr(Gpr::Rcx))),
        vec![0x03, 0xC1]
    );
    // add rax, [rdi]
    assert_eq!(
        assemble(|a| a.add(Type::I64, Gpr::Rax, GprMem::Mem(AsmAddress::base(Gpr::Rdi)))),
        vec![0x48, 0x03, 0x07]
    );
    // sub rsp, 16 — short immediate form
    assert_eq!(
        assemble(|a| a.stack_sub(16)),
        vec![0x48, 0x83, 0xEC, 0x10]
    );
    // xor eax, eax
    assert_eq!(
        assemble(|a| a.xor(Type::I32, Gpr::Rax, GprMem::Gpr(Gpr::Rax))),
        vec![0x33, 0xC0]
    );
    // cmp eax, 1000 — long immediate form
    assert_eq!(
        assemble(|a| a.cmp_imm(Type::I32, GprMem::Gpr(Gpr::Rax), 1000)),
        vec![0x81, 0xF8, 0xE8, 0x03, 0x00, 0x00]
    );
    // test eax, eax
    assert_eq!(
        assemble(|a| a.test(Type::I32, GprMem::Gpr(Gpr::Rax), Gpr::Rax)),
        vec![0x85, 0xC0]
    );
}

#[test]
fn shifts() {
    // shl eax, 1 uses the one-shift opcode
    assert_eq!(
        assemble(|a| a.shl_imm(Type::I32, GprMem::Gpr(Gpr::Rax), 1)),
        vec![0xD1, 0xE0]
    );
    // shr eax, 5
    assert_eq!(
        assemble(|a| a.shr_imm(Type::I32, GprMem::Gpr(Gpr::Rax), 5)),
        vec![0xC1, 0xE8, 0x05]
    );
    // sar rdx, cl
    assert_eq!(
        assemble(|a| a.sar_cl(Type::I64, GprMem::Gpr(Gpr::Rdx))),
        vec![0x48, 0xD3, 0xFA]
    );
    // shld eax, ebx, 3
    assert_eq!(
        assemble(|a| a.shld_imm(Type::I32, Gpr::Rax, Gpr::Rbx, 3)),
        vec![0x0F, 0xA4, 0xD8, 0x03]
    );
}

#[test]
fn bit_scans() {
    // bsf eax, ecx / bsr eax, ecx
    assert_eq!(
        assemble(|a| a.bsf(Type::I32, Gpr::Rax, GprMem::Gpr(Gpr::Rcx))),
        vec![0x0F, 0xBC, 0xC1]
    );
    assert_eq!(
        assemble(|a| a.bsr(Type::I32, Gpr::Rax, GprMem::Gpr(Gpr::Rcx))),
        vec![0x0F, 0xBD, 0xC1]
    );
    // For a one-bit value the two scans agree, and the zero runs on
    // either side plus the bit itself cover the full width.
    for bit in 0..32u32 {
        let x = 1u32 << bit;
        assert_eq!(x.trailing_zeros(), 31 - x.leading_zeros());
        assert_eq!(x.trailing_zeros() + x.leading_zeros() + 1, 32);
    }
}

#[test]
fn setcc_and_cmov() {
    // sete al
    assert_eq!(
        assemble(|a| a.setcc(Condition::Equal, Gpr::Rax)),
        vec![0x0F, 0x94, 0xC0]
    );
    // setb sil forces REX
    assert_eq!(
        assemble(|a| a.setcc(Condition::Below, Gpr::Rsi)),
        vec![0x40, 0x0F, 0x92, 0xC6]
    );
    // cmovne rax, rcx
    assert_eq!(
        assemble(|a| a.cmov(Type::I64, Condition::NotEqual, Gpr::Rax, GprMem::Gpr(Gpr::Rcx))),
        vec![0x48, 0x0F, 0x45, 0xC1]
    );
}

#[test]
fn push_pop_and_frame() {
    assert_eq!(assemble(|a| a.push(Gpr::Rbp)), vec![0x55]);
    assert_eq!(assemble(|a| a.push(Gpr::R12)), vec![0x41, 0x54]);
    assert_eq!(assemble(|a| a.pop(Gpr::Rbp)), vec![0x5D]);
    // push rbp; mov rbp, rsp
    assert_eq!(assemble(|a| a.link_frame()), vec![0x55, 0x48, 0x8B, 0xEC]);
}

#[test]
fn forward_label_resolution() {
    // jne forward; nop; forward:
    let mut assembler = Assembler::new();
    let mut label = Label::new();
    assembler.j(Condition::NotEqual, &mut label, false);
    assembler.nop(1);
    assembler.bind(&mut label);
    let bytes = assembler.bytes();
    // 0F 85 rel32 where rel32 = target - (site + 4) = 7 - 6 = 1.
    assert_eq!(bytes, &[0x0F, 0x85, 0x01, 0x00, 0x00, 0x00, 0x90]);
}

#[test]
fn near_label_resolution() {
    let mut assembler = Assembler::new();
    let mut label = Label::new();
    assembler.j(Condition::Equal, &mut label, true);
    assembler.nop(3);
    assembler.bind(&mut label);
    let bytes = assembler.bytes();
    // 74 rel8 where rel8 = 5 - 2 = 3.
    assert_eq!(bytes[0], 0x74);
    assert_eq!(bytes[1], 0x03);
}

#[test]
fn multiple_links_all_patch() {
    let mut assembler = Assembler::new();
    let mut label = Label::new();
    assembler.jmp(&mut label, false); // site at 1, 5 bytes
    assembler.jmp(&mut label, false); // site at 6
    assembler.nop(2);
    assembler.bind(&mut label); // bound at 12

    let bytes = assembler.bytes();
    let first = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
    let second = u32::from_le_bytes(bytes[6..10].try_into().unwrap());
    // Each site stores bound − (site + 4).
    assert_eq!(first, 12 - (1 + 4));
    assert_eq!(second, 12 - (6 + 4));
}

#[test]
fn backward_branch_uses_short_form_when_close() {
    let mut assembler = Assembler::new();
    let mut label = Label::new();
    assembler.bind(&mut label);
    assembler.nop(2);
    assembler.jmp(&mut label, false);
    // EB rel8: rel8 = 0 - (2 + 2) = -4.
    assert_eq!(&assembler.bytes()[2..], &[0xEB, 0xFC]);
}

#[test]
#[should_panic(expected = "bound once")]
fn binding_twice_panics() {
    let mut assembler = Assembler::new();
    let mut label = Label::new();
    assembler.bind(&mut label);
    assembler.bind(&mut label);
}

#[test]
fn calls() {
    // call rax
    assert_eq!(assemble(|a| a.call_reg(Gpr::Rax)), vec![0xFF, 0xD0]);
    // call [rbx + 8]
    assert_eq!(
        assemble(|a| a.call_mem(AsmAddress::base_disp(Gpr::Rbx, 8))),
        vec![0xFF, 0x53, 0x08]
    );
    // call symbol emits a pc-relative fixup with addend −4.
    let mut assembler = Assembler::new();
    assembler.call_symbol(prism_asm::Symbol(42));
    assert_eq!(assembler.bytes(), &[0xE8, 0x00, 0x00, 0x00, 0x00]);
    let fixup = assembler.fixups()[0];
    assert_eq!(fixup.addend, -4);
    assert_eq!(fixup.symbol, prism_asm::Symbol(42));
}

#[test]
fn nops_and_alignment() {
    assert_eq!(assemble(|a| a.nop(1)), vec![0x90]);
    assert_eq!(assemble(|a| a.nop(3)), vec![0x0F, 0x1F, 0x00]);
    assert_eq!(
        assemble(|a| a.nop(8)),
        vec![0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00]
    );

    // Align to 16 from offset 3.
    let mut assembler = Assembler::new();
    assembler.nop(3);
    assembler.align(16, 0);
    assert_eq!(assembler.position() % 16, 0);

    // Function alignment pads with hlt.
    let mut assembler = Assembler::new();
    assembler.ret();
    assembler.align_function();
    assert_eq!(assembler.position(), 16);
    assert!(assembler.bytes()[1..].iter().all(|&b| b == 0xF4));
}

#[test]
fn multiplicative_and_sign_extension() {
    // imul rax, rcx
    assert_eq!(
        assemble(|a| a.imul(Type::I64, Gpr::Rax, GprMem::Gpr(Gpr::Rcx))),
        vec![0x48, 0x0F, 0xAF, 0xC1]
    );
    // imul eax, ecx, 100 (imm8 form)
    assert_eq!(
        assemble(|a| a.imul_imm(Type::I32, Gpr::Rax, GprMem::Gpr(Gpr::Rcx), 100)),
        vec![0x6B, 0xC1, 0x64]
    );
    // idiv ecx
    assert_eq!(
        assemble(|a| a.idiv(Type::I32, GprMem::Gpr(Gpr::Rcx))),
        vec![0xF7, 0xF9]
    );
    assert_eq!(assemble(|a| a.cdq()), vec![0x99]);
    assert_eq!(assemble(|a| a.cqo()), vec![0x48, 0x99]);
}

#[test]
fn sse_scalar_and_packed() {
    // addss xmm0, xmm1
    assert_eq!(
        assemble(|a| a.addss(Type::F32, Xmm::Xmm0, XmmMem::Xmm(Xmm::Xmm1))),
        vec![0xF3, 0x0F, 0x58, 0xC1]
    );
    // addsd xmm0, xmm1
    assert_eq!(
        assemble(|a| a.addss(Type::F64, Xmm::Xmm0, XmmMem::Xmm(Xmm::Xmm1))),
        vec![0xF2, 0x0F, 0x58, 0xC1]
    );
    // addps xmm2, [rdi]
    assert_eq!(
        assemble(|a| a.addps(Xmm::Xmm2, XmmMem::Mem(AsmAddress::base(Gpr::Rdi)))),
        vec![0x0F, 0x58, 0x17]
    );
    // movups xmm8, [rax] needs REX.R
    assert_eq!(
        assemble(|a| a.movups(Xmm::Xmm8, XmmMem::Mem(AsmAddress::base(Gpr::Rax)))),
        vec![0x44, 0x0F, 0x10, 0x00]
    );
    // movups [rdi + 16], xmm1
    assert_eq!(
        assemble(|a| a.movups_store(AsmAddress::base_disp(Gpr::Rdi, 16), Xmm::Xmm1)),
        vec![0x0F, 0x11, 0x4F, 0x10]
    );
    // xorps xmm0, xmm0
    assert_eq!(
        assemble(|a| a.xorps(Xmm::Xmm0, XmmMem::Xmm(Xmm::Xmm0))),
        vec![0x0F, 0x57, 0xC0]
    );
    // shufps xmm0, xmm1, 0x1B
    assert_eq!(
        assemble(|a| a.shufps(Xmm::Xmm0, XmmMem::Xmm(Xmm::Xmm1), 0x1B)),
        vec![0x0F, 0xC6, 0xC1, 0x1B]
    );
    // movmskps eax, xmm3
    assert_eq!(
        assemble(|a| a.movmskps(Gpr::Rax, Xmm::Xmm3)),
        vec![0x0F, 0x50, 0xC3]
    );
}

#[test]
fn sse_integer_and_sse41() {
    // paddd xmm0, xmm1
    assert_eq!(
        assemble(|a| a.padd(Type::I32, Xmm::Xmm0, XmmMem::Xmm(Xmm::Xmm1))),
        vec![0x66, 0x0F, 0xFE, 0xC1]
    );
    // pmulld xmm0, xmm1 (SSE4.1, 0F 38 map)
    assert_eq!(
        assemble(|a| a.pmull(Type::I32, Xmm::Xmm0, XmmMem::Xmm(Xmm::Xmm1))),
        vec![0x66, 0x0F, 0x38, 0x40, 0xC1]
    );
    // pslld xmm2, 4 (immediate shift, /6)
    assert_eq!(
        assemble(|a| a.psll_imm(Type::I32, Xmm::Xmm2, 4)),
        vec![0x66, 0x0F, 0x72, 0xF2, 0x04]
    );
    // pshufd xmm0, xmm1, 0x4E
    assert_eq!(
        assemble(|a| a.pshufd(Xmm::Xmm0, XmmMem::Xmm(Xmm::Xmm1), 0x4E)),
        vec![0x66, 0x0F, 0x70, 0xC1, 0x4E]
    );
    // pextrd eax, xmm1, 2
    assert_eq!(
        assemble(|a| a.pextr(Type::I32, Gpr::Rax, Xmm::Xmm1, 2)),
        vec![0x66, 0x0F, 0x3A, 0x16, 0xC8, 0x02]
    );
    // pinsrd xmm1, eax, 3
    assert_eq!(
        assemble(|a| a.pinsr(Type::I32, Xmm::Xmm1, GprMem::Gpr(Gpr::Rax), 3)),
        vec![0x66, 0x0F, 0x3A, 0x22, 0xC8, 0x03]
    );
    // pmovmskb eax, xmm0
    assert_eq!(
        assemble(|a| a.pmovmskb(Gpr::Rax, Xmm::Xmm0)),
        vec![0x66, 0x0F, 0xD7, 0xC0]
    );
    // blendvps xmm1, xmm2
    assert_eq!(
        assemble(|a| a.blendvps(Xmm::Xmm1, XmmMem::Xmm(Xmm::Xmm2))),
        vec![0x66, 0x0F, 0x38, 0x14, 0xCA]
    );
    // roundps xmm0, xmm1, 1 (floor)
    assert_eq!(
        assemble(|a| a.roundps(Xmm::Xmm0, XmmMem::Xmm(Xmm::Xmm1), 1)),
        vec![0x66, 0x0F, 0x3A, 0x08, 0xC1, 0x01]
    );
}

#[test]
fn conversions() {
    // cvtsi2ss xmm0, eax
    assert_eq!(
        assemble(|a| a.cvtsi2ss(Type::F32, Type::I32, Xmm::Xmm0, GprMem::Gpr(Gpr::Rax))),
        vec![0xF3, 0x0F, 0x2A, 0xC0]
    );
    // cvtsi2ss xmm0, rax
    assert_eq!(
        assemble(|a| a.cvtsi2ss(Type::F32, Type::I64, Xmm::Xmm0, GprMem::Gpr(Gpr::Rax))),
        vec![0xF3, 0x48, 0x0F, 0x2A, 0xC0]
    );
    // cvttss2si eax, xmm1
    assert_eq!(
        assemble(|a| a.cvttss2si(Type::I32, Type::F32, Gpr::Rax, XmmMem::Xmm(Xmm::Xmm1))),
        vec![0xF3, 0x0F, 0x2C, 0xC1]
    );
    // cvtdq2ps xmm0, xmm1 / cvttps2dq xmm0, xmm1
    assert_eq!(
        assemble(|a| a.cvtdq2ps(Xmm::Xmm0, XmmMem::Xmm(Xmm::Xmm1))),
        vec![0x0F, 0x5B, 0xC1]
    );
    assert_eq!(
        assemble(|a| a.cvttps2dq(Xmm::Xmm0, XmmMem::Xmm(Xmm::Xmm1))),
        vec![0xF3, 0x0F, 0x5B, 0xC1]
    );
}

#[test]
fn memory_operand_with_index() {
    // mov eax, [rbx + rcx*8 + 0x20]
    assert_eq!(
        assemble(|a| a.mov(
            Type::I32,
            Gpr::Rax,
            GprMem::Mem(AsmAddress::base_index_disp(
                Gpr::Rbx,
                Gpr::Rcx,
                Scale::Eight,
                0x20
            ))
        )),
        vec![0x8B, 0x44, 0xCB, 0x20]
    );
}

#[test]
fn sync_operations() {
    assert_eq!(assemble(|a| a.mfence()), vec![0x0F, 0xAE, 0xF0]);
    // lock xadd [rsi], edx
    assert_eq!(
        assemble(|a| a.xadd(Type::I32, AsmAddress::base(Gpr::Rsi), Gpr::Rdx, true)),
        vec![0xF0, 0x0F, 0xC1, 0x16]
    );
    // xchg [rdi], eax
    assert_eq!(
        assemble(|a| a.xchg(Type::I32, AsmAddress::base(Gpr::Rdi), Gpr::Rax)),
        vec![0x87, 0x07]
    );
    // lock cmpxchg8b [rdi]
    assert_eq!(
        assemble(|a| a.cmpxchg8b(AsmAddress::base(Gpr::Rdi), true)),
        vec![0xF0, 0x0F, 0xC7, 0x0F]
    );
}
