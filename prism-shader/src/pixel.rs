//! Pixel-shader specific analyses: depth override, kill, interpolant
//! liveness and input semantics.

use crate::instruction::{ParameterType, SamplerType, Semantic, Usage};
use crate::interpolant::{components_read, source_rule, SourceRule, CROSS_LANE_MASKS};
use crate::opcode::Opcode;
use crate::parse::{ParseError, ShaderType};
use crate::shader::Shader;
use crate::swizzle::mask_contains_component;

use std::ops::{Deref, DerefMut};

/// Input varying register budget for pixel shaders.
pub const MAX_INPUT_VARYINGS: usize = 10;

/// A pixel shader with its per-component input semantic table.
#[derive(Debug, Clone)]
pub struct PixelShader {
    shader: Shader,

    /// `semantic[register][component]`: the interpolant feeding each
    /// input component, or the inactive sentinel.
    pub semantic: [[Semantic; 4]; MAX_INPUT_VARYINGS],

    pub v_pos_declared: bool,
    pub v_face_declared: bool,

    z_override: bool,
    kill: bool,
    centroid: bool,
}

impl PixelShader {
    /// Parses and analyzes a pixel-shader token stream.
    pub fn from_tokens(tokens: &[u32]) -> Result<PixelShader, ParseError> {
        let shader = Shader::from_tokens(tokens, ShaderType::Pixel)?;
        let mut pixel = PixelShader::wrap(shader);
        pixel.analyze();
        Ok(pixel)
    }

    /// An empty pixel shader for the code emitter.
    pub fn new(version: u16) -> PixelShader {
        PixelShader::wrap(Shader::new(ShaderType::Pixel, version))
    }

    fn wrap(shader: Shader) -> PixelShader {
        PixelShader {
            shader,
            semantic: [[Semantic::NONE; 4]; MAX_INPUT_VARYINGS],
            v_pos_declared: false,
            v_face_declared: false,
            z_override: false,
            kill: false,
            centroid: false,
        }
    }

    /// Whether the shader writes depth explicitly.
    pub fn depth_override(&self) -> bool {
        self.z_override
    }

    /// Whether the shader can discard fragments.
    pub fn contains_kill(&self) -> bool {
        self.kill
    }

    /// Whether any input is centroid-interpolated.
    pub fn contains_centroid(&self) -> bool {
        self.centroid
    }

    pub fn uses_diffuse(&self, component: usize) -> bool {
        self.semantic[0][component].active()
    }

    pub fn uses_specular(&self, component: usize) -> bool {
        self.semantic[1][component].active()
    }

    pub fn uses_texture(&self, coordinate: usize, component: usize) -> bool {
        self.semantic[2 + coordinate][component].active()
    }

    /// Runs every pixel-stage analysis.
    pub fn analyze(&mut self) {
        self.analyze_z_override();
        self.analyze_kill();
        self.analyze_interpolants();
        self.shader.analyze();
    }

    fn analyze_z_override(&mut self) {
        self.z_override = self.shader.instructions().iter().any(|instruction| {
            instruction.opcode == Opcode::TexM3x2Depth
                || instruction.opcode == Opcode::TexDepth
                || instruction.dst.ty == ParameterType::DepthOut
        });
    }

    fn analyze_kill(&mut self) {
        self.kill = self
            .shader
            .instructions()
            .iter()
            .any(|instruction| instruction.opcode == Opcode::TexKill);
    }

    fn analyze_interpolants(&mut self) {
        self.v_pos_declared = false;
        self.v_face_declared = false;
        self.centroid = false;

        if self.shader.version() < 0x0300 {
            self.analyze_legacy_interpolants();
        } else {
            self.analyze_declared_inputs();
        }

        if self.shader.version() >= 0x0200 {
            self.record_centroid_declarations();
        }
    }

    /// Pre-3.0: default color/texcoord mapping, then clear components
    /// no instruction actually consumes.
    fn analyze_legacy_interpolants(&mut self) {
        for component in 0..4 {
            self.semantic[0][component] = Semantic::new(Usage::Color, 0);
            self.semantic[1][component] = Semantic::new(Usage::Color, 1);
        }
        for coordinate in 0..8u8 {
            for component in 0..4 {
                self.semantic[2 + coordinate as usize][component] =
                    Semantic::new(Usage::TexCoord, coordinate);
            }
        }

        let mut sampler_type = [SamplerType::Unknown; 16];
        for instruction in self.shader.instructions() {
            if instruction.dst.ty == ParameterType::Sampler {
                sampler_type[instruction.dst.index as usize] = instruction.sampler_type;
            }
        }

        let mut interpolant = [[false; 4]; MAX_INPUT_VARYINGS];
        let version = self.shader.version();
        let major_version = self.shader.major_version();

        for instruction in self.shader.instructions() {
            // Texture-coordinate destinations imply coordinate reads.
            if instruction.dst.ty == ParameterType::Texture {
                let index = instruction.dst.index as usize + 2;

                match instruction.opcode {
                    Opcode::Tex
                    | Opcode::TexBem
                    | Opcode::TexBemL
                    | Opcode::TexCoord
                    | Opcode::TexDp3
                    | Opcode::TexDp3Tex
                    | Opcode::TexM3x2Depth
                    | Opcode::TexM3x2Pad
                    | Opcode::TexM3x2Tex
                    | Opcode::TexM3x3
                    | Opcode::TexM3x3Pad
                    | Opcode::TexM3x3Tex => {
                        mark_components(&mut interpolant[index], 0x7);
                    }
                    Opcode::TexKill => {
                        if major_version < 2 {
                            mark_components(&mut interpolant[index], 0x7);
                        } else {
                            mark_components(&mut interpolant[index], 0xF);
                        }
                    }
                    Opcode::TexM3x3VSpec => {
                        mark_components(&mut interpolant[index], 0x7);
                        interpolant[index - 2][3] = true;
                        interpolant[index - 1][3] = true;
                        interpolant[index][3] = true;
                    }
                    Opcode::Dcl => {}
                    _ => {
                        debug_assert!(version < 0x0104, "arithmetic write to a coordinate register");
                    }
                }
            }

            for argument in 0..4 {
                let src = &instruction.src[argument];
                if src.ty != ParameterType::Input && src.ty != ParameterType::Texture {
                    continue;
                }

                let mut index = src.index as usize;
                if src.ty == ParameterType::Texture {
                    index += 2;
                }
                let swizzle = src.swizzle;
                let mask = instruction.dst.mask;

                let rule = match source_rule(instruction.opcode, argument) {
                    Some(rule) => rule,
                    None => continue,
                };

                match rule {
                    SourceRule::TexSample => {
                        self.mark_sample_coordinates(
                            &mut interpolant,
                            instruction,
                            index,
                            &sampler_type,
                        );
                    }
                    SourceRule::MatrixRows(row_rule) => {
                        // One row per write-mask bit, consecutive
                        // registers.
                        for row in 0..4 {
                            if mask_contains_component(mask, row) {
                                let read = components_read(*row_rule, swizzle, mask);
                                mark_components(&mut interpolant[index + row], read);
                            }
                        }
                    }
                    SourceRule::Cross => {
                        for (lane, &lane_mask) in CROSS_LANE_MASKS.iter().enumerate() {
                            if mask_contains_component(mask, lane) {
                                let read =
                                    components_read(SourceRule::SwizzledMasked(lane_mask), swizzle, mask);
                                mark_components(&mut interpolant[index], read);
                            }
                        }
                    }
                    rule => {
                        let read = components_read(rule, swizzle, mask);
                        mark_components(&mut interpolant[index], read);
                    }
                }
            }
        }

        for index in 0..MAX_INPUT_VARYINGS {
            for component in 0..4 {
                if !interpolant[index][component] {
                    self.semantic[index][component] = Semantic::NONE;
                }
            }
        }
    }

    fn mark_sample_coordinates(
        &self,
        interpolant: &mut [[bool; 4]; MAX_INPUT_VARYINGS],
        instruction: &crate::instruction::Instruction,
        index: usize,
        sampler_type: &[SamplerType; 16],
    ) {
        let version = self.shader.version();
        let sampler = instruction.src[1].index as usize;

        match sampler_type[sampler] {
            SamplerType::Unknown => {
                if version == 0x0104 {
                    if instruction.src[0].swizzle & 0x30 == 0x20 {
                        // .xyz projection
                        mark_components(&mut interpolant[index], 0x7);
                    } else {
                        // .xyw projection
                        mark_components(&mut interpolant[index], 0xB);
                    }
                } else {
                    debug_assert!(false, "sampled without a declaration");
                }
            }
            SamplerType::Sampler1D => mark_components(&mut interpolant[index], 0x1),
            SamplerType::Sampler2D => mark_components(&mut interpolant[index], 0x3),
            SamplerType::SamplerCube | SamplerType::SamplerVolume => {
                mark_components(&mut interpolant[index], 0x7)
            }
        }

        if instruction.bias || instruction.project {
            interpolant[index][3] = true;
        }

        if version == 0x0104 && instruction.opcode == Opcode::Tex {
            match instruction.src[0].modifier {
                crate::instruction::Modifier::Dz => interpolant[index][2] = true,
                crate::instruction::Modifier::Dw => interpolant[index][3] = true,
                _ => {}
            }
        }
    }

    /// 3.0: inputs are declared; read the DCLs.
    fn analyze_declared_inputs(&mut self) {
        for instruction in self.shader.instructions() {
            if instruction.opcode != Opcode::Dcl {
                continue;
            }

            match instruction.dst.ty {
                ParameterType::Input => {
                    let semantic = Semantic {
                        usage: instruction.usage as u8,
                        index: instruction.usage_index,
                        centroid: false,
                    };
                    let register = instruction.dst.index as usize;
                    for component in 0..4 {
                        if mask_contains_component(instruction.dst.mask, component) {
                            self.semantic[register][component] = semantic;
                        }
                    }
                }
                ParameterType::MiscType => match instruction.dst.index {
                    0 => self.v_pos_declared = true,
                    1 => self.v_face_declared = true,
                    index => debug_assert!(false, "unknown misc register {}", index),
                },
                _ => {}
            }
        }
    }

    fn record_centroid_declarations(&mut self) {
        for instruction in self.shader.instructions() {
            if instruction.opcode != Opcode::Dcl {
                continue;
            }

            let centroid = instruction.dst.centroid;
            let register = instruction.dst.index as usize;

            match instruction.dst.ty {
                ParameterType::Input => self.semantic[register][0].centroid = centroid,
                ParameterType::Texture => self.semantic[2 + register][0].centroid = centroid,
                _ => continue,
            }

            self.centroid = self.centroid || centroid;
        }
    }
}

fn mark_components(components: &mut [bool; 4], mask: u8) {
    for (component, flag) in components.iter_mut().enumerate() {
        if mask_contains_component(mask, component) {
            *flag = true;
        }
    }
}

impl Deref for PixelShader {
    type Target = Shader;

    fn deref(&self) -> &Shader {
        &self.shader
    }
}

impl DerefMut for PixelShader {
    fn deref_mut(&mut self) -> &mut Shader {
        &mut self.shader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::END_TOKEN;

    fn file_bits(code: u32) -> u32 {
        ((code & 0x7) << 28) | (((code >> 3) & 0x3) << 11)
    }

    #[test]
    fn empty_shader_has_no_live_interpolants() {
        let tokens = [0xFFFF_0200, END_TOKEN];
        let shader = PixelShader::from_tokens(&tokens).unwrap();
        for register in 0..MAX_INPUT_VARYINGS {
            for component in 0..4 {
                assert!(!shader.semantic[register][component].active());
            }
        }
        assert!(!shader.depth_override());
        assert!(!shader.contains_kill());
    }

    #[test]
    fn mov_from_diffuse_marks_masked_components() {
        // ps_2_0: mov r0.xy, v0
        let tokens = [
            0xFFFF_0200,
            0x0200_0000 | Opcode::Mov as u32,
            0x8003_0000,              // dst r0.xy
            0x9000_0000 | 0xE4 << 16, // src v0.xyzw
            END_TOKEN,
        ];
        let shader = PixelShader::from_tokens(&tokens).unwrap();
        assert!(shader.uses_diffuse(0));
        assert!(shader.uses_diffuse(1));
        assert!(!shader.uses_diffuse(2));
        assert!(!shader.uses_diffuse(3));
    }

    #[test]
    fn sampling_marks_coordinates_by_sampler_kind() {
        // ps_2_0: dcl_2d s0; texld r0, t1, s0
        let tokens = [
            0xFFFF_0200,
            0x0200_0000 | Opcode::Dcl as u32,
            0x8000_0000 | (SamplerType::Sampler2D as u32) << 27,
            0x8000_0000 | file_bits(10) | 0xF << 16, // dst s0
            0x0300_0000 | Opcode::Tex as u32,
            0x800F_0000,                              // dst r0
            0x8000_0001 | file_bits(3) | 0xE4 << 16, // t1
            0x8000_0000 | file_bits(10) | 0xE4 << 16, // s0
            END_TOKEN,
        ];
        let shader = PixelShader::from_tokens(&tokens).unwrap();
        // t1 maps to semantic slot 3; a 2D sampler reads xy.
        assert!(shader.uses_texture(1, 0));
        assert!(shader.uses_texture(1, 1));
        assert!(!shader.uses_texture(1, 2));
        assert!(!shader.uses_texture(1, 3));
    }

    #[test]
    fn texkill_and_depth_out_detected() {
        // ps_2_0: texkill t0
        let tokens = [
            0xFFFF_0200,
            0x0100_0000 | Opcode::TexKill as u32,
            0x8000_0000 | file_bits(3) | 0xF << 16,
            END_TOKEN,
        ];
        let shader = PixelShader::from_tokens(&tokens).unwrap();
        assert!(shader.contains_kill());
    }

    #[test]
    fn sm3_inputs_come_from_declarations() {
        // ps_3_0: dcl_texcoord1 v2.xy
        let tokens = [
            0xFFFF_0300,
            0x0200_0000 | Opcode::Dcl as u32,
            0x8000_0000 | (Usage::TexCoord as u32) | 1 << 16,
            0x8000_0002 | file_bits(1) | 0x3 << 16,
            END_TOKEN,
        ];
        let shader = PixelShader::from_tokens(&tokens).unwrap();
        let semantic = shader.semantic[2][0];
        assert!(semantic.active());
        assert_eq!(semantic.usage, Usage::TexCoord as u8);
        assert_eq!(semantic.index, 1);
        assert!(shader.semantic[2][1].active());
        assert!(!shader.semantic[2][2].active());
    }

    #[test]
    fn misc_declarations_set_flags() {
        // ps_3_0: dcl vPos (misc register 0)
        let tokens = [
            0xFFFF_0300,
            0x0200_0000 | Opcode::Dcl as u32,
            0x8000_0000,
            0x8000_0000 | file_bits(17) | 0xF << 16,
            END_TOKEN,
        ];
        let shader = PixelShader::from_tokens(&tokens).unwrap();
        assert!(shader.v_pos_declared);
        assert!(!shader.v_face_declared);
    }
}
