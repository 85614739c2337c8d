//! Shader opcodes.
//!
//! The low half of the enum space mirrors the legacy token-stream ISA
//! verbatim (the discriminant is the wire value). Values at `0x10000`
//! and above are internal opcodes produced by the tree-IR emitter and
//! never appear in a token stream.

/// A shader operation.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    Nop = 0,
    Mov,
    Add,
    Sub,
    Mad,
    Mul,
    Rcp,
    Rsq,
    Dp3,
    Dp4,
    Min,
    Max,
    Slt,
    Sge,
    Exp,
    Log,
    Lit,
    Dst,
    Lrp,
    Frc,
    M4x4,
    M4x3,
    M3x4,
    M3x3,
    M3x2,
    Call,
    CallNz,
    Loop,
    Ret,
    EndLoop,
    Label,
    Dcl,
    Pow,
    Crs,
    Sgn,
    Abs,
    Nrm,
    SinCos,
    Rep,
    EndRep,
    If,
    IfC,
    Else,
    EndIf,
    Break,
    BreakC,
    MovA,
    DefB,
    DefI,

    TexCoord = 64,
    TexKill,
    Tex,
    TexBem,
    TexBemL,
    TexReg2Ar,
    TexReg2Gb,
    TexM3x2Pad,
    TexM3x2Tex,
    TexM3x3Pad,
    TexM3x3Tex,
    Reserved0,
    TexM3x3Spec,
    TexM3x3VSpec,
    ExpP,
    LogP,
    Cnd,
    Def,
    TexReg2Rgb,
    TexDp3Tex,
    TexM3x2Depth,
    TexDp3,
    TexM3x3,
    TexDepth,
    Cmp,
    Bem,
    Dp2Add,
    Dsx,
    Dsy,
    TexLdd,
    SetP,
    TexLdl,
    BreakP,

    Phase = 0xFFFD,
    Comment = 0xFFFE,
    End = 0xFFFF,

    Ps10 = 0xFFFF0100,
    Ps11 = 0xFFFF0101,
    Ps12 = 0xFFFF0102,
    Ps13 = 0xFFFF0103,
    Ps14 = 0xFFFF0104,
    Ps20 = 0xFFFF0200,
    Ps2x = 0xFFFF0201,
    Ps30 = 0xFFFF0300,

    Vs10 = 0xFFFE0100,
    Vs11 = 0xFFFE0101,
    Vs20 = 0xFFFE0200,
    Vs2x = 0xFFFE0201,
    Vs2Sw = 0xFFFE02FF,
    Vs30 = 0xFFFE0300,
    Vs3Sw = 0xFFFE03FF,

    // Internal opcodes; no wire encoding.
    Null = 0x10000,
    Div,
    Mod,
    Discard,
    Continue,
    While,
    EndWhile,
    Test,
    Leave,
    Select,
    Extract,
    Insert,
    ICmp,
    And,
    Or,
    Xor,
    Not,
    B2F,
    F2B,
    Trunc,
    Floor,
    Ceil,
    Exp2,
    Log2,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Step,
    Smooth,
    Fwidth,
    Any,
    All,
    Dp2,
    Len2,
    Len3,
    Len4,
    Dist1,
    Dist2,
    Dist3,
    Dist4,
    Nrm2,
    Nrm4,
    Forward1,
    Forward2,
    Forward3,
    Forward4,
    Reflect1,
    Reflect2,
    Reflect3,
    Reflect4,
    Refract1,
    Refract2,
    Refract3,
    Refract4,
}

/// Operand counts for version < 2.0 streams, indexed by wire opcode.
/// `-1` marks values that cannot appear.
#[rustfmt::skip]
const OPERAND_COUNT: [i8; 97] = [
    0,   // NOP = 0
    2,   // MOV
    3,   // ADD
    3,   // SUB
    4,   // MAD
    3,   // MUL
    2,   // RCP
    2,   // RSQ
    3,   // DP3
    3,   // DP4
    3,   // MIN
    3,   // MAX
    3,   // SLT
    3,   // SGE
    2,   // EXP
    2,   // LOG
    2,   // LIT
    3,   // DST
    4,   // LRP
    2,   // FRC
    3,   // M4x4
    3,   // M4x3
    3,   // M3x4
    3,   // M3x3
    3,   // M3x2
    1,   // CALL
    2,   // CALLNZ
    2,   // LOOP
    0,   // RET
    0,   // ENDLOOP
    1,   // LABEL
    2,   // DCL
    3,   // POW
    3,   // CRS
    4,   // SGN
    2,   // ABS
    2,   // NRM
    4,   // SINCOS
    1,   // REP
    0,   // ENDREP
    1,   // IF
    2,   // IFC
    0,   // ELSE
    0,   // ENDIF
    0,   // BREAK
    2,   // BREAKC
    2,   // MOVA
    2,   // DEFB
    5,   // DEFI
    -1, -1, -1, -1, -1, -1, -1, -1,   // 49..56
    -1, -1, -1, -1, -1, -1, -1,       // 57..63
    1,   // TEXCOORD = 64
    1,   // TEXKILL
    1,   // TEX
    2,   // TEXBEM
    2,   // TEXBEML
    2,   // TEXREG2AR
    2,   // TEXREG2GB
    2,   // TEXM3x2PAD
    2,   // TEXM3x2TEX
    2,   // TEXM3x3PAD
    2,   // TEXM3x3TEX
    -1,  // RESERVED0
    3,   // TEXM3x3SPEC
    2,   // TEXM3x3VSPEC
    2,   // EXPP
    2,   // LOGP
    4,   // CND
    5,   // DEF
    2,   // TEXREG2RGB
    2,   // TEXDP3TEX
    2,   // TEXM3x2DEPTH
    2,   // TEXDP3
    2,   // TEXM3x3
    1,   // TEXDEPTH
    4,   // CMP
    3,   // BEM
    4,   // DP2ADD
    2,   // DSX
    2,   // DSY
    5,   // TEXLDD
    3,   // SETP
    3,   // TEXLDL
    2,   // BREAKP
];

impl Opcode {
    /// Decodes the low 16 bits of an instruction token into a wire
    /// opcode. Returns `None` for values with no wire meaning.
    pub fn from_wire(value: u16) -> Option<Opcode> {
        Some(match value {
            0 => Opcode::Nop,
            1 => Opcode::Mov,
            2 => Opcode::Add,
            3 => Opcode::Sub,
            4 => Opcode::Mad,
            5 => Opcode::Mul,
            6 => Opcode::Rcp,
            7 => Opcode::Rsq,
            8 => Opcode::Dp3,
            9 => Opcode::Dp4,
            10 => Opcode::Min,
            11 => Opcode::Max,
            12 => Opcode::Slt,
            13 => Opcode::Sge,
            14 => Opcode::Exp,
            15 => Opcode::Log,
            16 => Opcode::Lit,
            17 => Opcode::Dst,
            18 => Opcode::Lrp,
            19 => Opcode::Frc,
            20 => Opcode::M4x4,
            21 => Opcode::M4x3,
            22 => Opcode::M3x4,
            23 => Opcode::M3x3,
            24 => Opcode::M3x2,
            25 => Opcode::Call,
            26 => Opcode::CallNz,
            27 => Opcode::Loop,
            28 => Opcode::Ret,
            29 => Opcode::EndLoop,
            30 => Opcode::Label,
            31 => Opcode::Dcl,
            32 => Opcode::Pow,
            33 => Opcode::Crs,
            34 => Opcode::Sgn,
            35 => Opcode::Abs,
            36 => Opcode::Nrm,
            37 => Opcode::SinCos,
            38 => Opcode::Rep,
            39 => Opcode::EndRep,
            40 => Opcode::If,
            41 => Opcode::IfC,
            42 => Opcode::Else,
            43 => Opcode::EndIf,
            44 => Opcode::Break,
            45 => Opcode::BreakC,
            46 => Opcode::MovA,
            47 => Opcode::DefB,
            48 => Opcode::DefI,
            64 => Opcode::TexCoord,
            65 => Opcode::TexKill,
            66 => Opcode::Tex,
            67 => Opcode::TexBem,
            68 => Opcode::TexBemL,
            69 => Opcode::TexReg2Ar,
            70 => Opcode::TexReg2Gb,
            71 => Opcode::TexM3x2Pad,
            72 => Opcode::TexM3x2Tex,
            73 => Opcode::TexM3x3Pad,
            74 => Opcode::TexM3x3Tex,
            75 => Opcode::Reserved0,
            76 => Opcode::TexM3x3Spec,
            77 => Opcode::TexM3x3VSpec,
            78 => Opcode::ExpP,
            79 => Opcode::LogP,
            80 => Opcode::Cnd,
            81 => Opcode::Def,
            82 => Opcode::TexReg2Rgb,
            83 => Opcode::TexDp3Tex,
            84 => Opcode::TexM3x2Depth,
            85 => Opcode::TexDp3,
            86 => Opcode::TexM3x3,
            87 => Opcode::TexDepth,
            88 => Opcode::Cmp,
            89 => Opcode::Bem,
            90 => Opcode::Dp2Add,
            91 => Opcode::Dsx,
            92 => Opcode::Dsy,
            93 => Opcode::TexLdd,
            94 => Opcode::SetP,
            95 => Opcode::TexLdl,
            96 => Opcode::BreakP,
            0xFFFD => Opcode::Phase,
            0xFFFE => Opcode::Comment,
            0xFFFF => Opcode::End,
            _ => return None,
        })
    }

    /// The wire value of this opcode, if it has one.
    pub fn wire(self) -> Option<u16> {
        let value = self as u32;
        if value <= 96 || value == 0xFFFD || value == 0xFFFE || value == 0xFFFF {
            Some(value as u16)
        } else {
            None
        }
    }

    /// Whether this is a stream header (version) opcode.
    pub fn is_version(self) -> bool {
        let value = self as u32;
        (value & 0xFFFF_0000) == 0xFFFF_0000 || (value & 0xFFFF_0000) == 0xFFFE_0000
    }

    /// Decodes a full header token into a version opcode.
    pub fn from_version_token(token: u32) -> Option<Opcode> {
        Some(match token {
            0xFFFF_0100 => Opcode::Ps10,
            0xFFFF_0101 => Opcode::Ps11,
            0xFFFF_0102 => Opcode::Ps12,
            0xFFFF_0103 => Opcode::Ps13,
            0xFFFF_0104 => Opcode::Ps14,
            0xFFFF_0200 => Opcode::Ps20,
            0xFFFF_0201 => Opcode::Ps2x,
            0xFFFF_0300 => Opcode::Ps30,
            0xFFFE_0100 => Opcode::Vs10,
            0xFFFE_0101 => Opcode::Vs11,
            0xFFFE_0200 => Opcode::Vs20,
            0xFFFE_0201 => Opcode::Vs2x,
            0xFFFE_02FF => Opcode::Vs2Sw,
            0xFFFE_0300 => Opcode::Vs30,
            0xFFFE_03FF => Opcode::Vs3Sw,
            _ => return None,
        })
    }

    /// Operand count for version < 2.0 streams.
    ///
    /// Returns `None` for opcodes that cannot appear in a pre-2.0
    /// stream.
    pub fn operand_count(self) -> Option<usize> {
        let wire = self.wire()? as usize;
        if wire >= OPERAND_COUNT.len() {
            return None;
        }
        match OPERAND_COUNT[wire] {
            n if n >= 0 => Some(n as usize),
            _ => None,
        }
    }

    /// Branch-family opcodes carry no destination operand; all tokens
    /// after the operation token are sources.
    pub fn has_no_destination(self) -> bool {
        matches!(
            self,
            Opcode::If
                | Opcode::IfC
                | Opcode::Loop
                | Opcode::Rep
                | Opcode::BreakC
                | Opcode::BreakP
        )
    }

    /// Opcodes whose sources are literal constants rather than
    /// register references.
    pub fn has_literal_sources(self) -> bool {
        matches!(self, Opcode::Def | Opcode::DefB | Opcode::DefI)
    }

    /// Sample-family opcodes, for sampler usage analysis.
    pub fn samples_texture(self) -> bool {
        matches!(
            self,
            Opcode::Tex
                | Opcode::TexBem
                | Opcode::TexBemL
                | Opcode::TexReg2Ar
                | Opcode::TexReg2Gb
                | Opcode::TexM3x2Tex
                | Opcode::TexM3x3Tex
                | Opcode::TexM3x3Spec
                | Opcode::TexM3x3VSpec
                | Opcode::TexReg2Rgb
                | Opcode::TexDp3Tex
                | Opcode::TexM3x2Depth
                | Opcode::TexLdd
                | Opcode::TexLdl
        )
    }

    /// The dot-product opcode for vectors of dimension `size`.
    pub fn dp(size: usize) -> Opcode {
        match size {
            2 => Opcode::Dp2,
            3 => Opcode::Dp3,
            4 => Opcode::Dp4,
            _ => panic!("no dot product of dimension {}", size),
        }
    }

    /// The length opcode for vectors of dimension `size`.
    pub fn len(size: usize) -> Opcode {
        match size {
            1 => Opcode::Abs,
            2 => Opcode::Len2,
            3 => Opcode::Len3,
            4 => Opcode::Len4,
            _ => panic!("no length of dimension {}", size),
        }
    }

    /// The distance opcode for vectors of dimension `size`.
    pub fn dist(size: usize) -> Opcode {
        match size {
            1 => Opcode::Dist1,
            2 => Opcode::Dist2,
            3 => Opcode::Dist3,
            4 => Opcode::Dist4,
            _ => panic!("no distance of dimension {}", size),
        }
    }

    /// The normalize opcode for vectors of dimension `size`.
    pub fn nrm(size: usize) -> Opcode {
        match size {
            2 => Opcode::Nrm2,
            3 => Opcode::Nrm,
            4 => Opcode::Nrm4,
            _ => panic!("no normalize of dimension {}", size),
        }
    }

    /// The faceforward opcode for vectors of dimension `size`.
    pub fn forward(size: usize) -> Opcode {
        match size {
            1 => Opcode::Forward1,
            2 => Opcode::Forward2,
            3 => Opcode::Forward3,
            4 => Opcode::Forward4,
            _ => panic!("no faceforward of dimension {}", size),
        }
    }

    /// The reflect opcode for vectors of dimension `size`.
    pub fn reflect(size: usize) -> Opcode {
        match size {
            1 => Opcode::Reflect1,
            2 => Opcode::Reflect2,
            3 => Opcode::Reflect3,
            4 => Opcode::Reflect4,
            _ => panic!("no reflect of dimension {}", size),
        }
    }

    /// The refract opcode for vectors of dimension `size`.
    pub fn refract(size: usize) -> Opcode {
        match size {
            1 => Opcode::Refract1,
            2 => Opcode::Refract2,
            3 => Opcode::Refract3,
            4 => Opcode::Refract4,
            _ => panic!("no refract of dimension {}", size),
        }
    }
}

/// Total token count (operands only, excluding the operation token)
/// consumed by the instruction starting with `token`.
///
/// For comments this is the payload length from the high bits; for
/// version ≥ 2.0 instructions it is the embedded 4-bit length field.
/// Returns `None` when the opcode cannot appear in a stream of the
/// given version.
pub fn instruction_size(token: u32, version: u16) -> Option<usize> {
    if token & 0x0000_FFFF == Opcode::Comment as u32 {
        return Some(((token & 0x7FFF_0000) >> 16) as usize);
    }

    // Version tokens and stream sentinels consume nothing.
    if (token & 0xFFFF_0000) == 0xFFFF_0000 || (token & 0xFFFF_0000) == 0xFFFE_0000 {
        return Some(0);
    }
    let wire = (token & 0x0000_FFFF) as u16;
    if wire == Opcode::Phase as u16 || wire == Opcode::End as u16 {
        return Some(0);
    }

    let opcode = Opcode::from_wire(wire)?;

    let mut length = if version >= 0x0200 {
        ((token & 0x0F00_0000) >> 24) as usize
    } else {
        opcode.operand_count()?
    };

    // Shader model 1.4 reads an extra texture-coordinate operand.
    if version == 0x0104 {
        match opcode {
            Opcode::Tex | Opcode::TexCoord => length += 1,
            _ => {}
        }
    }

    Some(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip() {
        for value in 0u16..=96 {
            if let Some(op) = Opcode::from_wire(value) {
                assert_eq!(op.wire(), Some(value));
            }
        }
        assert_eq!(Opcode::from_wire(49), None);
        assert_eq!(Opcode::from_wire(63), None);
        assert_eq!(Opcode::While.wire(), None);
    }

    #[test]
    fn pre_2_0_operand_counts() {
        assert_eq!(Opcode::Nop.operand_count(), Some(0));
        assert_eq!(Opcode::Mov.operand_count(), Some(2));
        assert_eq!(Opcode::Mad.operand_count(), Some(4));
        assert_eq!(Opcode::Def.operand_count(), Some(5));
        assert_eq!(Opcode::Reserved0.operand_count(), None);
    }

    #[test]
    fn embedded_length_used_from_2_0() {
        // ADD carries its operand count in bits 27:24 from 2.0 on.
        assert_eq!(instruction_size(0x0600_0002, 0x0200), Some(6));
        assert_eq!(instruction_size(0x0300_0002, 0x0200), Some(3));
        // Pre-2.0 the table value wins.
        assert_eq!(instruction_size(0x0000_0002, 0x0101), Some(3));
    }

    #[test]
    fn sm_1_4_tex_adjustment() {
        let tex = Opcode::Tex as u32;
        assert_eq!(instruction_size(tex, 0x0101), Some(1));
        assert_eq!(instruction_size(tex, 0x0104), Some(2));
        let texcoord = Opcode::TexCoord as u32;
        assert_eq!(instruction_size(texcoord, 0x0104), Some(2));
    }

    #[test]
    fn comment_length_from_high_bits() {
        let comment = 0x0005_FFFE;
        assert_eq!(instruction_size(comment, 0x0300), Some(5));
    }
}
