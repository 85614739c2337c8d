//! Token-stream validation and parsing.
//!
//! A stream is a sequence of 32-bit tokens terminated by
//! `0x0000FFFF`. The header token carries the shader type in its high
//! half and the packed `major.minor` version in its low half. Comment
//! tokens (`0x0000FFFE` low half) carry a payload length in their
//! high 15 bits and are skipped.

use crate::instruction::Instruction;
use crate::opcode::{instruction_size, Opcode};

use thiserror::Error;

/// The stream terminator token.
pub const END_TOKEN: u32 = 0x0000_FFFF;

/// Low half of a comment token.
pub const COMMENT_TOKEN: u32 = 0x0000_FFFE;

/// Shader stage, as encoded in the header token's high half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ShaderType {
    /// Pixel (fragment) shader.
    Pixel = 0xFFFF,
    /// Vertex shader.
    Vertex = 0xFFFE,
    /// Geometry shader.
    Geometry = 0xFFFD,
}

/// Token-stream rejection reasons.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The header token does not name the expected shader type, or
    /// the version exceeds 3.0.
    #[error("bad shader header token {token:#010x}")]
    BadHeader {
        /// The offending header token.
        token: u32,
    },
    /// An opcode value with no wire meaning.
    #[error("unknown opcode {opcode:#06x}")]
    UnknownOpcode {
        /// The low half of the operation token.
        opcode: u16,
    },
    /// An opcode the target stage refuses.
    #[error("unsupported opcode {opcode:#06x}")]
    Unsupported {
        /// The low half of the operation token.
        opcode: u16,
    },
    /// A reserved bit pattern was set.
    #[error("reserved bits set in token {token:#010x}")]
    ReservedBits {
        /// The offending token.
        token: u32,
    },
    /// The stream ended before its terminator.
    #[error("truncated token stream")]
    Truncated,
    /// A register-file code outside the wire range.
    #[error("invalid register file code {code}")]
    InvalidRegisterFile {
        /// The 6-bit file code.
        code: u32,
    },
    /// A source modifier outside the wire range.
    #[error("invalid source modifier {bits}")]
    InvalidModifier {
        /// The 4-bit modifier field.
        bits: u32,
    },
    /// A declaration usage outside the wire range.
    #[error("invalid declaration usage {bits}")]
    InvalidUsage {
        /// The 5-bit usage field.
        bits: u32,
    },
    /// More than four source operands.
    #[error("too many operands for opcode {opcode:#x}")]
    TooManyOperands {
        /// The operation's opcode value.
        opcode: u32,
    },
}

/// Pre-validates a stream against the expected stage.
///
/// Returns the instruction count (header included), or zero when the
/// stream must be rejected, mirroring the contract of the original
/// front end: a zero count means "not a shader we accept" while
/// structural violations surface later as hard parse errors.
pub fn validate(tokens: &[u32], expected: ShaderType) -> usize {
    let header = match tokens.first() {
        Some(&token) => token,
        None => return 0,
    };

    let shader_type = (header >> 16) as u16;
    let major_version = ((header & 0x0000_FF00) >> 8) as u8;
    let version = (header & 0x0000_FFFF) as u16;

    if shader_type != expected as u16 || major_version > 3 {
        return 0;
    }

    let mut count = 1;
    let mut i = 0;
    loop {
        let token = match tokens.get(i) {
            Some(&token) => token,
            None => return 0,
        };
        if token == END_TOKEN {
            break;
        }

        if token & 0x0000_FFFF == COMMENT_TOKEN {
            i += ((token & 0x7FFF_0000) >> 16) as usize;
        } else {
            let at_header = i == 0;
            let wire = (token & 0x0000_FFFF) as u16;

            if !at_header {
                if Opcode::from_wire(wire).is_none() {
                    return 0;
                }
                if !opcode_supported(wire, expected, version) {
                    return 0;
                }
                count += 1;
            }

            match instruction_size(token, version) {
                Some(size) => i += size,
                None => return 0,
            }
        }
        i += 1;
    }

    count
}

fn opcode_supported(wire: u16, stage: ShaderType, version: u16) -> bool {
    let opcode = match Opcode::from_wire(wire) {
        Some(opcode) => opcode,
        None => return false,
    };

    match stage {
        ShaderType::Pixel => !matches!(opcode, Opcode::Reserved0 | Opcode::MovA),
        ShaderType::Vertex => {
            // The pixel-only texture family and pixel-only arithmetic
            // never appear in a vertex stream; TEXLDL is the 3.0
            // exception.
            let pixel_only = matches!(
                opcode,
                Opcode::TexCoord
                    | Opcode::TexKill
                    | Opcode::Tex
                    | Opcode::TexBem
                    | Opcode::TexBemL
                    | Opcode::TexReg2Ar
                    | Opcode::TexReg2Gb
                    | Opcode::TexM3x2Pad
                    | Opcode::TexM3x2Tex
                    | Opcode::TexM3x3Pad
                    | Opcode::TexM3x3Tex
                    | Opcode::Reserved0
                    | Opcode::TexM3x3Spec
                    | Opcode::TexM3x3VSpec
                    | Opcode::TexReg2Rgb
                    | Opcode::TexDp3Tex
                    | Opcode::TexM3x2Depth
                    | Opcode::TexDp3
                    | Opcode::TexM3x3
                    | Opcode::TexDepth
                    | Opcode::Cmp
                    | Opcode::Bem
                    | Opcode::Dp2Add
                    | Opcode::Dsx
                    | Opcode::Dsy
                    | Opcode::TexLdd
                    | Opcode::Cnd
                    | Opcode::BreakP
            );
            let texldl_ok = opcode != Opcode::TexLdl || version >= 0x0300;
            !pixel_only && texldl_ok
        }
        ShaderType::Geometry => true,
    }
}

/// Parses a validated stream into its instruction array.
///
/// The first entry is the version instruction; comments are skipped;
/// the terminator is not represented.
pub fn parse(tokens: &[u32], expected: ShaderType) -> Result<Vec<Instruction>, ParseError> {
    let length = validate(tokens, expected);
    if length == 0 {
        let header = tokens.first().copied().unwrap_or(0);
        // Distinguish "wrong kind of shader" from "contains an opcode
        // we refuse" for diagnostics.
        let shader_type = (header >> 16) as u16;
        let major_version = ((header & 0x0000_FF00) >> 8) as u8;
        if shader_type != expected as u16 || major_version > 3 {
            return Err(ParseError::BadHeader { token: header });
        }
        return Err(first_unsupported(tokens, expected));
    }

    let header = tokens[0];
    let version = (header & 0x0000_FFFF) as u16;
    let major_version = (version >> 8) as u8;

    let mut instructions = Vec::with_capacity(length);
    instructions.push(Instruction::new(
        Opcode::from_version_token(header).ok_or(ParseError::BadHeader { token: header })?,
    ));

    let mut i = 1;
    while instructions.len() < length {
        // Skip comment blocks.
        while tokens.get(i).copied().ok_or(ParseError::Truncated)? & 0x0000_FFFF == COMMENT_TOKEN {
            let token = tokens[i];
            i += ((token & 0x7FFF_0000) >> 16) as usize + 1;
        }

        let token = tokens.get(i).copied().ok_or(ParseError::Truncated)?;
        let size = instruction_size(token, version).ok_or(ParseError::UnknownOpcode {
            opcode: (token & 0xFFFF) as u16,
        })?;
        if i + size >= tokens.len() {
            return Err(ParseError::Truncated);
        }

        instructions.push(Instruction::parse(&tokens[i..], size, major_version)?);
        i += size + 1;
    }

    Ok(instructions)
}

fn first_unsupported(tokens: &[u32], expected: ShaderType) -> ParseError {
    let version = (tokens[0] & 0x0000_FFFF) as u16;
    let mut i = 1;
    while let Some(&token) = tokens.get(i) {
        if token == END_TOKEN {
            break;
        }
        if token & 0x0000_FFFF == COMMENT_TOKEN {
            i += ((token & 0x7FFF_0000) >> 16) as usize + 1;
            continue;
        }
        let wire = (token & 0x0000_FFFF) as u16;
        if Opcode::from_wire(wire).is_none() {
            return ParseError::UnknownOpcode { opcode: wire };
        }
        if !opcode_supported(wire, expected, version) {
            return ParseError::Unsupported { opcode: wire };
        }
        match instruction_size(token, version) {
            Some(size) => i += size + 1,
            None => return ParseError::UnknownOpcode { opcode: wire },
        }
    }
    ParseError::Truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pixel_shader_parses_to_header_only() {
        let tokens = [0xFFFF_0300, END_TOKEN];
        assert_eq!(validate(&tokens, ShaderType::Pixel), 1);

        let instructions = parse(&tokens, ShaderType::Pixel).unwrap();
        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].opcode, Opcode::Ps30);
    }

    #[test]
    fn wrong_stage_is_rejected() {
        let tokens = [0xFFFF_0300, END_TOKEN];
        assert_eq!(validate(&tokens, ShaderType::Vertex), 0);
        assert!(matches!(
            parse(&tokens, ShaderType::Vertex),
            Err(ParseError::BadHeader { .. })
        ));
    }

    #[test]
    fn version_above_3_0_is_rejected() {
        let tokens = [0xFFFF_0400, END_TOKEN];
        assert_eq!(validate(&tokens, ShaderType::Pixel), 0);
    }

    #[test]
    fn comments_are_skipped() {
        // Two payload words of comment between header and end.
        let tokens = [0xFFFF_0300, 0x0002_FFFE, 0xDEAD_BEEF, 0xCAFE_F00D, END_TOKEN];
        assert_eq!(validate(&tokens, ShaderType::Pixel), 1);
        let instructions = parse(&tokens, ShaderType::Pixel).unwrap();
        assert_eq!(instructions.len(), 1);
    }

    #[test]
    fn mova_rejected_in_pixel_shaders() {
        // mova a0, c0 would be token 46; any operands are irrelevant
        // because validation rejects on the opcode itself.
        let tokens = [
            0xFFFF_0200,
            0x0200_0000 | Opcode::MovA as u32,
            0xB00F_0000,             // dst a0.xyzw
            0xA000_0000 | 0xE4 << 16, // src c0.xyzw
            END_TOKEN,
        ];
        assert_eq!(validate(&tokens, ShaderType::Pixel), 0);
        assert!(matches!(
            parse(&tokens, ShaderType::Pixel),
            Err(ParseError::Unsupported { opcode }) if opcode == Opcode::MovA as u16
        ));
    }

    #[test]
    fn missing_terminator_is_truncated() {
        let tokens = [0xFFFF_0300];
        assert_eq!(validate(&tokens, ShaderType::Pixel), 0);
    }
}
