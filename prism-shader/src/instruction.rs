//! The instruction model shared by the token-stream parser and the
//! tree-IR emitter.

use crate::opcode::Opcode;
use crate::parse::ParseError;
use crate::swizzle;

use smallvec::SmallVec;

type TokenBuffer = SmallVec<[u32; 8]>;

/// Register files addressable by instruction parameters.
///
/// The wire encoding splits the 6-bit file code across two token
/// fields; see [`Parameter` token layout](crate::parse).
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParameterType {
    Temp = 0,
    Input = 1,
    Const = 2,
    /// Texture coordinate register in pixel shaders, address register
    /// in vertex shaders (the wire value is shared).
    Texture = 3,
    RastOut = 4,
    AttrOut = 5,
    /// Texture-coordinate output before 3.0, general output from 3.0.
    Output = 6,
    ConstInt = 7,
    ColorOut = 8,
    DepthOut = 9,
    Sampler = 10,
    Const2 = 11,
    Const3 = 12,
    Const4 = 13,
    ConstBool = 14,
    Loop = 15,
    TempFloat16 = 16,
    MiscType = 17,
    Label = 18,
    Predicate = 19,

    // Internal parameter kinds; no wire encoding.
    FloatLiteral = 20,
    BoolLiteral = 21,
    IntLiteral = 22,

    Void = 0xFF,
}

impl ParameterType {
    /// The address register file (shares the wire value of `Texture`).
    pub const ADDR: ParameterType = ParameterType::Texture;

    pub(crate) fn from_wire(code: u32) -> Result<ParameterType, ParseError> {
        Ok(match code {
            0 => ParameterType::Temp,
            1 => ParameterType::Input,
            2 => ParameterType::Const,
            3 => ParameterType::Texture,
            4 => ParameterType::RastOut,
            5 => ParameterType::AttrOut,
            6 => ParameterType::Output,
            7 => ParameterType::ConstInt,
            8 => ParameterType::ColorOut,
            9 => ParameterType::DepthOut,
            10 => ParameterType::Sampler,
            11 => ParameterType::Const2,
            12 => ParameterType::Const3,
            13 => ParameterType::Const4,
            14 => ParameterType::ConstBool,
            15 => ParameterType::Loop,
            16 => ParameterType::TempFloat16,
            17 => ParameterType::MiscType,
            18 => ParameterType::Label,
            19 => ParameterType::Predicate,
            _ => return Err(ParseError::InvalidRegisterFile { code }),
        })
    }
}

/// Source-operand modifiers.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Modifier {
    None = 0,
    Negate,
    Bias,
    BiasNegate,
    Sign,
    SignNegate,
    Complement,
    X2,
    X2Negate,
    Dz,
    Dw,
    Abs,
    AbsNegate,
    Not,
}

impl Modifier {
    pub(crate) fn from_wire(bits: u32) -> Result<Modifier, ParseError> {
        Ok(match bits {
            0 => Modifier::None,
            1 => Modifier::Negate,
            2 => Modifier::Bias,
            3 => Modifier::BiasNegate,
            4 => Modifier::Sign,
            5 => Modifier::SignNegate,
            6 => Modifier::Complement,
            7 => Modifier::X2,
            8 => Modifier::X2Negate,
            9 => Modifier::Dz,
            10 => Modifier::Dw,
            11 => Modifier::Abs,
            12 => Modifier::AbsNegate,
            13 => Modifier::Not,
            _ => return Err(ParseError::InvalidModifier { bits }),
        })
    }
}

/// Comparison control for the CMP/IFC/BREAKC/SETP family.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Control {
    Reserved0 = 0,
    Gt = 1,
    Eq = 2,
    Ge = 3,
    Lt = 4,
    Ne = 5,
    Le = 6,
    Reserved1 = 7,
}

impl Control {
    pub(crate) fn from_wire(bits: u32) -> Control {
        match bits & 0x7 {
            1 => Control::Gt,
            2 => Control::Eq,
            3 => Control::Ge,
            4 => Control::Lt,
            5 => Control::Ne,
            6 => Control::Le,
            7 => Control::Reserved1,
            _ => Control::Reserved0,
        }
    }
}

/// Vertex input/output usage declared by `DCL` and assigned to
/// varying registers at link time.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Usage {
    Position = 0,
    BlendWeight = 1,
    BlendIndices = 2,
    Normal = 3,
    PointSize = 4,
    TexCoord = 5,
    Tangent = 6,
    Binormal = 7,
    TessFactor = 8,
    PositionT = 9,
    Color = 10,
    Fog = 11,
    Depth = 12,
    Sample = 13,
}

impl Usage {
    pub(crate) fn from_wire(bits: u32) -> Result<Usage, ParseError> {
        Ok(match bits {
            0 => Usage::Position,
            1 => Usage::BlendWeight,
            2 => Usage::BlendIndices,
            3 => Usage::Normal,
            4 => Usage::PointSize,
            5 => Usage::TexCoord,
            6 => Usage::Tangent,
            7 => Usage::Binormal,
            8 => Usage::TessFactor,
            9 => Usage::PositionT,
            10 => Usage::Color,
            11 => Usage::Fog,
            12 => Usage::Depth,
            13 => Usage::Sample,
            _ => return Err(ParseError::InvalidUsage { bits }),
        })
    }
}

/// Sampler dimensionality declared by `DCL`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SamplerType {
    Unknown = 0,
    Sampler1D = 1,
    Sampler2D = 2,
    SamplerCube = 3,
    SamplerVolume = 4,
}

impl SamplerType {
    pub(crate) fn from_wire(bits: u32) -> SamplerType {
        match bits {
            1 => SamplerType::Sampler1D,
            2 => SamplerType::Sampler2D,
            3 => SamplerType::SamplerCube,
            4 => SamplerType::SamplerVolume,
            _ => SamplerType::Unknown,
        }
    }
}

/// A `(usage, usage-index)` pair attached to a register component.
/// Inactive entries carry the `0xFF` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Semantic {
    pub usage: u8,
    pub index: u8,
    pub centroid: bool,
}

impl Semantic {
    /// An inactive semantic.
    pub const NONE: Semantic = Semantic {
        usage: 0xFF,
        index: 0xFF,
        centroid: false,
    };

    pub fn new(usage: Usage, index: u8) -> Semantic {
        Semantic {
            usage: usage as u8,
            index,
            centroid: false,
        }
    }

    pub fn active(&self) -> bool {
        self.usage != 0xFF
    }
}

impl Default for Semantic {
    fn default() -> Semantic {
        Semantic::NONE
    }
}

/// Relative-addressing reference carried by a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeAddress {
    pub ty: ParameterType,
    pub index: u32,
    pub swizzle: u8,
    /// Register stride multiplier applied by the emitter; always 1 on
    /// the wire.
    pub scale: u32,
    /// Clear when indexing a vertex uniform, as a hint that the
    /// address is not uniform across a primitive.
    pub deterministic: bool,
}

impl RelativeAddress {
    pub const NONE: RelativeAddress = RelativeAddress {
        ty: ParameterType::Void,
        index: 0,
        swizzle: 0,
        scale: 1,
        deterministic: true,
    };
}

impl Default for RelativeAddress {
    fn default() -> RelativeAddress {
        RelativeAddress::NONE
    }
}

/// A destination operand.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationParameter {
    pub ty: ParameterType,
    pub index: u32,
    pub relative: bool,
    pub rel: RelativeAddress,
    /// 4-bit component write mask.
    pub mask: u8,
    pub saturate: bool,
    pub partial_precision: bool,
    pub centroid: bool,
    /// Sign-extended 4-bit result shift; only valid before 2.0.
    pub shift: i8,
    /// Set by the emitter for integer-typed destinations.
    pub integer: bool,
}

impl Default for DestinationParameter {
    fn default() -> DestinationParameter {
        DestinationParameter {
            ty: ParameterType::Void,
            index: 0,
            relative: false,
            rel: RelativeAddress::NONE,
            mask: 0xF,
            saturate: false,
            partial_precision: false,
            centroid: false,
            shift: 0,
            integer: false,
        }
    }
}

/// A source operand.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceParameter {
    pub ty: ParameterType,
    pub index: u32,
    /// Literal payload for `FloatLiteral` parameters; lane 0 doubles
    /// as the raw token bits for `DEF`/`DEFI`/`DEFB` sources.
    pub value: [f32; 4],
    pub relative: bool,
    pub rel: RelativeAddress,
    pub swizzle: u8,
    pub modifier: Modifier,
}

impl SourceParameter {
    /// Raw token bits of a literal source.
    pub fn literal_bits(&self) -> u32 {
        self.value[0].to_bits()
    }
}

impl Default for SourceParameter {
    fn default() -> SourceParameter {
        SourceParameter {
            ty: ParameterType::Void,
            index: 0,
            value: [0.0; 4],
            relative: false,
            rel: RelativeAddress::NONE,
            swizzle: swizzle::IDENTITY,
            modifier: Modifier::None,
        }
    }
}

/// One parsed (or emitted) shader instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub control: Control,
    /// Projected texture lookup (`TEX` only; aliases the control
    /// field's low bit on the wire).
    pub project: bool,
    /// Biased texture lookup (`TEX` only; aliases the control field's
    /// second bit on the wire).
    pub bias: bool,
    pub predicate: bool,
    pub predicate_not: bool,
    pub predicate_swizzle: u8,
    pub coissue: bool,
    pub sampler_type: SamplerType,
    pub usage: Usage,
    pub usage_index: u8,
    pub dst: DestinationParameter,
    pub src: [SourceParameter; 4],
}

impl Instruction {
    /// A fresh instruction with no operands, for the emitter.
    pub fn new(opcode: Opcode) -> Instruction {
        Instruction {
            opcode,
            control: Control::Reserved0,
            project: false,
            bias: false,
            predicate: false,
            predicate_not: false,
            predicate_swizzle: swizzle::IDENTITY,
            coissue: false,
            sampler_type: SamplerType::Unknown,
            usage: Usage::Position,
            usage_index: 0,
            dst: DestinationParameter::default(),
            src: [
                SourceParameter::default(),
                SourceParameter::default(),
                SourceParameter::default(),
                SourceParameter::default(),
            ],
        }
    }

    /// Parses one instruction from `tokens`, whose first element is
    /// the operation token and which holds `size` operand tokens.
    pub fn parse(tokens: &[u32], size: usize, major_version: u8) -> Result<Instruction, ParseError> {
        let mut cursor = Cursor {
            tokens,
            offset: 0,
            remaining: size,
        };

        let mut instruction = Instruction::parse_operation_token(cursor.next()?, major_version)?;

        if instruction.opcode.has_no_destination() {
            for i in 0.. {
                if cursor.remaining == 0 {
                    break;
                }
                if i == 4 {
                    return Err(ParseError::TooManyOperands {
                        opcode: instruction.opcode as u32,
                    });
                }
                instruction.parse_source_token(i, &mut cursor, major_version)?;
            }
        } else if instruction.opcode == Opcode::Dcl {
            instruction.parse_declaration_token(cursor.next()?)?;
            instruction.parse_destination_token(&mut cursor, major_version)?;
        } else {
            if cursor.remaining > 0 {
                instruction.parse_destination_token(&mut cursor, major_version)?;
            }

            if instruction.predicate {
                let token = cursor.next()?;
                instruction.predicate_not =
                    Modifier::from_wire((token & 0x0F00_0000) >> 24)? == Modifier::Not;
                instruction.predicate_swizzle = ((token & 0x00FF_0000) >> 16) as u8;
            }

            let mut i = 0;
            while cursor.remaining > 0 {
                if i == 4 {
                    return Err(ParseError::TooManyOperands {
                        opcode: instruction.opcode as u32,
                    });
                }
                instruction.parse_source_token(i, &mut cursor, major_version)?;
                i += 1;
            }
        }

        Ok(instruction)
    }

    fn parse_operation_token(token: u32, major_version: u8) -> Result<Instruction, ParseError> {
        let wire = (token & 0x0000_FFFF) as u16;
        let opcode = Opcode::from_wire(wire).ok_or(ParseError::UnknownOpcode { opcode: wire })?;
        let mut instruction = Instruction::new(opcode);

        let control_bits = (token & 0x00FF_0000) >> 16;
        instruction.control = Control::from_wire(control_bits);
        instruction.project = control_bits & 0x1 != 0;
        instruction.bias = control_bits & 0x2 != 0;

        let length = (token & 0x0F00_0000) >> 24;
        instruction.predicate = token & 0x1000_0000 != 0;
        instruction.coissue = token & 0x4000_0000 != 0;

        if major_version < 2 && length != 0 {
            return Err(ParseError::ReservedBits { token });
        }
        if major_version < 2 && instruction.predicate {
            return Err(ParseError::ReservedBits { token });
        }
        if token & 0x2000_0000 != 0 {
            return Err(ParseError::ReservedBits { token });
        }
        if major_version >= 2 && instruction.coissue {
            return Err(ParseError::ReservedBits { token });
        }
        if token & 0x8000_0000 != 0 {
            return Err(ParseError::ReservedBits { token });
        }

        Ok(instruction)
    }

    fn parse_declaration_token(&mut self, token: u32) -> Result<(), ParseError> {
        self.sampler_type = SamplerType::from_wire((token & 0x7800_0000) >> 27);
        self.usage = Usage::from_wire(token & 0x0000_001F)?;
        self.usage_index = ((token & 0x000F_0000) >> 16) as u8;
        Ok(())
    }

    fn parse_destination_token(
        &mut self,
        cursor: &mut Cursor,
        major_version: u8,
    ) -> Result<(), ParseError> {
        let token = cursor.next()?;

        self.dst.index = token & 0x0000_07FF;
        self.dst.ty = ParameterType::from_wire(((token & 0x0000_1800) >> 8) | ((token & 0x7000_0000) >> 28))?;
        self.dst.relative = token & 0x0000_2000 != 0;
        self.dst.rel = RelativeAddress {
            ty: ParameterType::ADDR,
            index: 0,
            swizzle: 0,
            scale: 1,
            deterministic: true,
        };

        if self.dst.relative {
            if major_version >= 3 {
                let rel = cursor.next()?;
                self.dst.rel.ty =
                    ParameterType::from_wire(((rel & 0x0000_1800) >> 8) | ((rel & 0x7000_0000) >> 28))?;
                self.dst.rel.swizzle = ((rel & 0x00FF_0000) >> 16) as u8;
            } else {
                return Err(ParseError::ReservedBits { token });
            }
        }

        if token & 0x0000_C000 != 0 {
            return Err(ParseError::ReservedBits { token });
        }

        self.dst.mask = ((token & 0x000F_0000) >> 16) as u8;
        self.dst.saturate = token & 0x0010_0000 != 0;
        self.dst.partial_precision = token & 0x0020_0000 != 0;
        self.dst.centroid = token & 0x0040_0000 != 0;
        // Sign-extend the 4-bit shift field.
        self.dst.shift = (((token & 0x0F00_0000) >> 20) as i8) >> 4;

        if major_version >= 2 && self.dst.shift != 0 {
            return Err(ParseError::ReservedBits { token });
        }
        if token & 0x8000_0000 != 0x8000_0000 {
            return Err(ParseError::ReservedBits { token });
        }

        Ok(())
    }

    fn parse_source_token(
        &mut self,
        i: usize,
        cursor: &mut Cursor,
        major_version: u8,
    ) -> Result<(), ParseError> {
        let token = cursor.next()?;
        let src = &mut self.src[i];

        if self.opcode.has_literal_sources() {
            src.value[0] = f32::from_bits(token);
            src.ty = match self.opcode {
                Opcode::Def => ParameterType::FloatLiteral,
                Opcode::DefB => ParameterType::BoolLiteral,
                Opcode::DefI => ParameterType::IntLiteral,
                _ => unreachable!(),
            };
            return Ok(());
        }

        src.index = token & 0x0000_07FF;
        src.ty = ParameterType::from_wire(((token & 0x0000_1800) >> 8) | ((token & 0x7000_0000) >> 28))?;
        src.relative = token & 0x0000_2000 != 0;

        if token & 0x0000_C000 != 0 {
            return Err(ParseError::ReservedBits { token });
        }

        src.swizzle = ((token & 0x00FF_0000) >> 16) as u8;
        src.modifier = Modifier::from_wire((token & 0x0F00_0000) >> 24)?;

        if token & 0x8000_0000 != 0x8000_0000 {
            return Err(ParseError::ReservedBits { token });
        }

        if src.relative && major_version >= 2 {
            let rel = cursor.next()?;
            src.rel.ty =
                ParameterType::from_wire(((rel & 0x0000_1800) >> 8) | ((rel & 0x7000_0000) >> 28))?;
            src.rel.swizzle = ((rel & 0x00FF_0000) >> 16) as u8;
        }

        Ok(())
    }

    /// Re-encodes this instruction to tokens, appending to `out`.
    /// The inverse of [`Instruction::parse`] for wire-valid
    /// instructions.
    pub fn encode(&self, version: u16, out: &mut Vec<u32>) {
        if self.opcode.is_version() {
            out.push(self.opcode as u32);
            return;
        }

        let major_version = (version >> 8) as u8;
        let wire = self
            .opcode
            .wire()
            .expect("internal opcode has no token encoding") as u32;

        let mut operands = TokenBuffer::new();

        if self.opcode.has_no_destination() {
            for src in &self.src {
                if src.ty != ParameterType::Void {
                    encode_source(src, major_version, &mut operands);
                }
            }
        } else if self.opcode == Opcode::Dcl {
            let decl = ((self.sampler_type as u32) << 27)
                | ((self.usage_index as u32) << 16)
                | (self.usage as u32)
                | 0x8000_0000;
            operands.push(decl);
            encode_destination(&self.dst, major_version, &mut operands);
        } else if self.opcode.has_literal_sources() {
            encode_destination(&self.dst, major_version, &mut operands);
            for src in &self.src {
                if src.ty != ParameterType::Void {
                    operands.push(src.literal_bits());
                }
            }
        } else {
            if self.dst.ty != ParameterType::Void {
                encode_destination(&self.dst, major_version, &mut operands);
            }
            if self.predicate {
                let mut token = 0x8000_0000 | ((self.predicate_swizzle as u32) << 16);
                if self.predicate_not {
                    token |= (Modifier::Not as u32) << 24;
                }
                token |= file_code_bits(ParameterType::Predicate);
                operands.push(token);
            }
            for src in &self.src {
                if src.ty != ParameterType::Void {
                    encode_source(src, major_version, &mut operands);
                }
            }
        }

        let mut operation = wire
            | ((control_bits(self) as u32) << 16)
            | ((self.predicate as u32) << 28)
            | ((self.coissue as u32) << 30);
        if major_version >= 2 {
            operation |= (operands.len() as u32) << 24;
        }

        out.push(operation);
        out.extend_from_slice(&operands);
    }
}

fn control_bits(instruction: &Instruction) -> u8 {
    let mut bits = instruction.control as u8;
    if instruction.project {
        bits |= 0x1;
    }
    if instruction.bias {
        bits |= 0x2;
    }
    bits
}

fn file_code_bits(ty: ParameterType) -> u32 {
    let code = ty as u32;
    ((code & 0x7) << 28) | (((code >> 3) & 0x3) << 11)
}

fn encode_destination(dst: &DestinationParameter, major_version: u8, out: &mut TokenBuffer) {
    let mut token = 0x8000_0000
        | (dst.index & 0x7FF)
        | file_code_bits(dst.ty)
        | ((dst.mask as u32) << 16);
    if dst.relative {
        token |= 0x0000_2000;
    }
    if dst.saturate {
        token |= 0x0010_0000;
    }
    if dst.partial_precision {
        token |= 0x0020_0000;
    }
    if dst.centroid {
        token |= 0x0040_0000;
    }
    if major_version < 2 {
        token |= ((dst.shift as u32) & 0xF) << 24;
    }
    out.push(token);

    if dst.relative && major_version >= 3 {
        out.push(relative_token(&dst.rel));
    }
}

fn encode_source(src: &SourceParameter, major_version: u8, out: &mut TokenBuffer) {
    let mut token = 0x8000_0000
        | (src.index & 0x7FF)
        | file_code_bits(src.ty)
        | ((src.swizzle as u32) << 16)
        | ((src.modifier as u32) << 24);
    if src.relative {
        token |= 0x0000_2000;
    }
    out.push(token);

    if src.relative && major_version >= 2 {
        out.push(relative_token(&src.rel));
    }
}

fn relative_token(rel: &RelativeAddress) -> u32 {
    0x8000_0000 | file_code_bits(rel.ty) | ((rel.swizzle as u32) << 16)
}

struct Cursor<'a> {
    tokens: &'a [u32],
    offset: usize,
    remaining: usize,
}

impl<'a> Cursor<'a> {
    fn next(&mut self) -> Result<u32, ParseError> {
        // The operation token itself is not counted in `remaining`.
        if self.offset > 0 {
            if self.remaining == 0 {
                return Err(ParseError::Truncated);
            }
            self.remaining -= 1;
        }
        let token = self
            .tokens
            .get(self.offset)
            .copied()
            .ok_or(ParseError::Truncated)?;
        self.offset += 1;
        Ok(token)
    }
}
