//! Register definitions and hardware encodings.

/// General-purpose registers, by hardware encoding.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    /// The hardware encoding, 0..=15.
    #[inline]
    pub fn enc(self) -> u8 {
        self as u8
    }

    /// Whether the REX.B/R/X extension bit is needed.
    #[inline]
    pub fn is_extended(self) -> bool {
        self.enc() >= 8
    }
}

/// SSE registers, by hardware encoding.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
    Xmm8 = 8,
    Xmm9 = 9,
    Xmm10 = 10,
    Xmm11 = 11,
    Xmm12 = 12,
    Xmm13 = 13,
    Xmm14 = 14,
    Xmm15 = 15,
}

impl Xmm {
    /// The hardware encoding, 0..=15.
    #[inline]
    pub fn enc(self) -> u8 {
        self as u8
    }
}

/// Operand sizes. The float/vector entries select SSE prefixes; they
/// never change GPR encodings.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    V128,
}

impl Type {
    /// Whether this size forces REX.W.
    #[inline]
    pub fn is_64(self) -> bool {
        self == Type::I64
    }

    /// Whether this is the byte size, which changes opcode selection.
    #[inline]
    pub fn is_byte(self) -> bool {
        self == Type::I8
    }

    /// Whether the 0x66 operand-size prefix is required.
    #[inline]
    pub fn needs_operand_size_prefix(self) -> bool {
        self == Type::I16
    }
}

/// Condition codes, in hardware encoding order.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Condition {
    Overflow = 0,
    NoOverflow = 1,
    Below = 2,
    AboveEqual = 3,
    Equal = 4,
    NotEqual = 5,
    BelowEqual = 6,
    Above = 7,
    Sign = 8,
    NoSign = 9,
    Parity = 10,
    NoParity = 11,
    Less = 12,
    GreaterEqual = 13,
    LessEqual = 14,
    Greater = 15,
}

impl Condition {
    /// The 4-bit encoding added to the base opcode.
    #[inline]
    pub fn enc(self) -> u8 {
        self as u8
    }
}
