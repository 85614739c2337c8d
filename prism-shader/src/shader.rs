//! The `Shader` container: token stream, parsed instructions and the
//! analyses shared by every stage.

use crate::instruction::{Instruction, ParameterType};
use crate::opcode::{instruction_size, Opcode};
use crate::parse::{self, ParseError, ShaderType, COMMENT_TOKEN, END_TOKEN};

/// A parsed (or synthesized) shader.
///
/// Constructed either from a legacy token stream, in which case the
/// raw tokens are retained for re-emission, or empty by the tree-IR
/// emitter, which appends instructions as it lowers the tree.
#[derive(Debug, Clone)]
pub struct Shader {
    shader_type: ShaderType,
    version: u16,
    tokens: Vec<u32>,
    pub(crate) instructions: Vec<Instruction>,

    /// Highest `DEF`-assigned float constant index + 1.
    pub dirty_constants_f: u32,
    /// Highest `DEFI`-assigned integer constant index + 1.
    pub dirty_constants_i: u32,
    /// Highest `DEFB`-assigned boolean constant index + 1.
    pub dirty_constants_b: u32,

    dynamic_branching: bool,
    sampler_mask: u16,
    hash: u64,
}

impl Shader {
    /// Parses a token stream and runs the stage-independent analyses.
    pub fn from_tokens(tokens: &[u32], expected: ShaderType) -> Result<Shader, ParseError> {
        let instructions = parse::parse(tokens, expected)?;
        let token_count = stream_length(tokens);
        let version = (tokens[0] & 0x0000_FFFF) as u16;

        let mut shader = Shader {
            shader_type: expected,
            version,
            tokens: tokens[..token_count].to_vec(),
            instructions,
            dirty_constants_f: 0,
            dirty_constants_i: 0,
            dirty_constants_b: 0,
            dynamic_branching: false,
            sampler_mask: 0,
            hash: 0,
        };

        shader.hash = shader.compute_hash();
        shader.analyze();

        log::debug!(
            "parsed {:?} shader v{}.{}: {} instructions, hash {:#018x}",
            expected,
            shader.major_version(),
            shader.minor_version(),
            shader.len(),
            shader.hash
        );

        Ok(shader)
    }

    /// An empty shader for the code emitter to append to.
    pub fn new(shader_type: ShaderType, version: u16) -> Shader {
        Shader {
            shader_type,
            version,
            tokens: Vec::new(),
            instructions: Vec::new(),
            dirty_constants_f: 0,
            dirty_constants_i: 0,
            dirty_constants_b: 0,
            dynamic_branching: false,
            sampler_mask: 0,
            hash: 0,
        }
    }

    /// Appends an emitted instruction and returns its index.
    pub fn append(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    /// Marks sampler `index` as referenced.
    pub fn declare_sampler(&mut self, index: u32) {
        self.sampler_mask |= 1 << index;
    }

    /// The parsed instruction array (version instruction first for
    /// token-built shaders).
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Mutable access for in-place patching by the emitter.
    pub fn instructions_mut(&mut self) -> &mut [Instruction] {
        &mut self.instructions
    }

    /// Number of parsed instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the instruction array is empty.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn shader_type(&self) -> ShaderType {
        self.shader_type
    }

    /// Packed `major << 8 | minor` version.
    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn major_version(&self) -> u8 {
        (self.version >> 8) as u8
    }

    pub fn minor_version(&self) -> u8 {
        (self.version & 0xFF) as u8
    }

    /// FNV-1 hash of the comment-stripped token stream.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The retained raw token stream (terminator included); empty for
    /// synthesized shaders.
    pub fn function(&self) -> &[u32] {
        &self.tokens
    }

    /// True when any branching construct keys on a non-constant
    /// condition.
    pub fn contains_dynamic_branching(&self) -> bool {
        self.dynamic_branching
    }

    /// Whether sampler `index` is referenced by a sample instruction.
    pub fn uses_sampler(&self, index: u32) -> bool {
        self.sampler_mask & (1 << index) != 0
    }

    /// The referenced-sampler bitmask.
    pub fn sampler_mask(&self) -> u16 {
        self.sampler_mask
    }

    /// Re-encodes the instruction array into a token stream
    /// (terminator included, comments absent).
    pub fn serialize(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.tokens.len());
        for instruction in &self.instructions {
            instruction.encode(self.version, &mut out);
        }
        out.push(END_TOKEN);
        out
    }

    /// Recomputes the stage-independent analyses. The emitter calls
    /// this once its instruction stream is final.
    pub fn analyze(&mut self) {
        self.analyze_dirty_constants();
        self.analyze_dynamic_branching();
        self.analyze_samplers();
    }

    fn analyze_dirty_constants(&mut self) {
        self.dirty_constants_f = 0;
        self.dirty_constants_i = 0;
        self.dirty_constants_b = 0;

        for instruction in &self.instructions {
            let watermark = instruction.dst.index + 1;
            match instruction.opcode {
                Opcode::Def => {
                    self.dirty_constants_f = self.dirty_constants_f.max(watermark);
                }
                Opcode::DefI => {
                    self.dirty_constants_i = self.dirty_constants_i.max(watermark);
                }
                Opcode::DefB => {
                    self.dirty_constants_b = self.dirty_constants_b.max(watermark);
                }
                _ => {}
            }
        }
    }

    fn analyze_dynamic_branching(&mut self) {
        self.dynamic_branching = false;

        for instruction in &self.instructions {
            match instruction.opcode {
                Opcode::CallNz
                | Opcode::If
                | Opcode::IfC
                | Opcode::Break
                | Opcode::BreakC
                | Opcode::SetP
                | Opcode::BreakP => {
                    if instruction.src[0].ty != ParameterType::ConstBool {
                        self.dynamic_branching = true;
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    fn analyze_samplers(&mut self) {
        self.sampler_mask = 0;

        for instruction in &self.instructions {
            if instruction.opcode.samples_texture() {
                if self.major_version() >= 2 {
                    debug_assert_eq!(instruction.src[1].ty, ParameterType::Sampler);
                    self.sampler_mask |= 1 << instruction.src[1].index;
                } else {
                    self.sampler_mask |= 1 << instruction.dst.index;
                }
            }
        }
    }

    fn compute_hash(&self) -> u64 {
        let mut stripped = self.tokens.clone();
        remove_comments(&mut stripped, self.version);
        fnv1(&stripped)
    }
}

/// Length of the stream in tokens, terminator included.
fn stream_length(tokens: &[u32]) -> usize {
    let version = (tokens[0] & 0x0000_FFFF) as u16;
    let mut i = 0;
    while tokens[i] != END_TOKEN {
        i += instruction_size(tokens[i], version).unwrap_or(0) + 1;
    }
    i + 1
}

/// Overwrites comment blocks with NOP tokens in place, so the hash is
/// insensitive to embedded debug text.
fn remove_comments(tokens: &mut [u32], version: u16) {
    let mut i = 0;
    while i < tokens.len() {
        let size = instruction_size(tokens[i], version).unwrap_or(0) + 1;

        if tokens[i] & 0x0000_FFFF == COMMENT_TOKEN {
            for token in tokens.iter_mut().skip(i).take(size) {
                *token = Opcode::Nop as u32;
            }
        }

        i += size;
    }
}

/// 64-bit FNV-1 over the little-endian bytes of the tokens.
fn fnv1(tokens: &[u32]) -> u64 {
    const OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;

    let mut hash = OFFSET_BASIS;
    for token in tokens {
        for byte in token.to_le_bytes() {
            hash = hash.wrapping_mul(PRIME) ^ u64::from(byte);
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Modifier;

    fn mov_ps30() -> Vec<u32> {
        // ps_3_0: mov r0.xyzw, v0.xyzw
        vec![
            0xFFFF_0300,
            0x0200_0000 | Opcode::Mov as u32,
            0x800F_0000,              // dst r0, mask xyzw
            0x9000_0000 | 0xE4 << 16, // src v0.xyzw
            END_TOKEN,
        ]
    }

    #[test]
    fn parse_and_reserialize_round_trips() {
        let tokens = mov_ps30();
        let shader = Shader::from_tokens(&tokens, ShaderType::Pixel).unwrap();
        assert_eq!(shader.serialize(), tokens);
    }

    #[test]
    fn round_trip_drops_comments() {
        let mut tokens = mov_ps30();
        // Splice a comment ahead of the mov.
        tokens.splice(1..1, [0x0002_FFFE, 0x1234_5678, 0x9ABC_DEF0]);
        let shader = Shader::from_tokens(&tokens, ShaderType::Pixel).unwrap();
        assert_eq!(shader.serialize(), mov_ps30());
    }

    #[test]
    fn hash_ignores_comment_payload() {
        let mut a = mov_ps30();
        let mut b = mov_ps30();
        a.splice(1..1, [0x0001_FFFE, 0x1111_1111]);
        b.splice(1..1, [0x0001_FFFE, 0x2222_2222]);

        let sa = Shader::from_tokens(&a, ShaderType::Pixel).unwrap();
        let sb = Shader::from_tokens(&b, ShaderType::Pixel).unwrap();
        assert_eq!(sa.hash(), sb.hash());
    }

    #[test]
    fn def_tracks_dirty_constant_watermark() {
        // def c7, 1.0, 0.0, 0.0, 1.0
        let one = 1.0f32.to_bits();
        let zero = 0.0f32.to_bits();
        let tokens = vec![
            0xFFFF_0300,
            0x0500_0000 | Opcode::Def as u32,
            0xA00F_0007,
            one,
            zero,
            zero,
            one,
            END_TOKEN,
        ];
        let shader = Shader::from_tokens(&tokens, ShaderType::Pixel).unwrap();
        assert_eq!(shader.dirty_constants_f, 8);
        assert_eq!(shader.dirty_constants_i, 0);
    }

    #[test]
    fn dynamic_branching_requires_non_constant_condition() {
        // if b0 — boolean constant register, still static.
        let static_if = vec![
            0xFFFF_0300,
            0x0100_0000 | Opcode::If as u32,
            0x8000_0000 | file_bits(14) | 0xE4 << 16, // b0
            0x0000_0000 | Opcode::EndIf as u32,
            END_TOKEN,
        ];
        let shader = Shader::from_tokens(&static_if, ShaderType::Pixel).unwrap();
        assert!(!shader.contains_dynamic_branching());

        // if r0 — temp register, dynamic.
        let dynamic_if = vec![
            0xFFFF_0300,
            0x0100_0000 | Opcode::If as u32,
            0x8000_0000 | 0xE4 << 16, // r0
            0x0000_0000 | Opcode::EndIf as u32,
            END_TOKEN,
        ];
        let shader = Shader::from_tokens(&dynamic_if, ShaderType::Pixel).unwrap();
        assert!(shader.contains_dynamic_branching());
    }

    #[test]
    fn sampler_mask_from_sample_sources() {
        // texld r0, t0, s3 (SM2: sampler is src1)
        let tokens = vec![
            0xFFFF_0200,
            0x0300_0000 | Opcode::Tex as u32,
            0x800F_0000,                          // dst r0
            0x8000_0000 | file_bits(3) | 0xE4 << 16, // t0
            0x8000_0003 | file_bits(10) | 0xE4 << 16, // s3
            END_TOKEN,
        ];
        let shader = Shader::from_tokens(&tokens, ShaderType::Pixel).unwrap();
        assert!(shader.uses_sampler(3));
        assert!(!shader.uses_sampler(0));
        assert_eq!(shader.sampler_mask(), 1 << 3);
    }

    #[test]
    fn predicate_token_parses_modifier_and_swizzle() {
        // (!p0.x) add r0, r0, r1 in ps_3_0
        let tokens = vec![
            0xFFFF_0300,
            0x1400_0000 | Opcode::Add as u32, // predicated, length 4
            0x800F_0000,
            0x8000_0000
                | file_bits(19)
                | (Modifier::Not as u32) << 24
                | 0x00 << 16,
            0x8000_0000 | 0xE4 << 16,
            0x8000_0001 | 0xE4 << 16,
            END_TOKEN,
        ];
        let shader = Shader::from_tokens(&tokens, ShaderType::Pixel).unwrap();
        let add = &shader.instructions()[1];
        assert!(add.predicate);
        assert!(add.predicate_not);
        assert_eq!(add.predicate_swizzle, 0x00);
        assert_eq!(add.src[0].index, 0);
        assert_eq!(add.src[1].index, 1);
    }

    fn file_bits(code: u32) -> u32 {
        ((code & 0x7) << 28) | (((code >> 3) & 0x3) << 11)
    }
}
