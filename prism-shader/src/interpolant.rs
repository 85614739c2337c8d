//! Declarative component-liveness rules for legacy (pre-3.0) pixel
//! shaders.
//!
//! Each rule describes which components of a source register an
//! opcode reads, as a function of the source swizzle and the
//! destination write mask. The interpolant analysis dispatches on
//! this table instead of a hand-unrolled switch, which also makes the
//! table testable for totality.

use crate::opcode::Opcode;
use crate::swizzle::{swizzle_contains_component, swizzle_contains_component_masked};

/// How an opcode consumes one of its source arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRule {
    /// Every lane named by the swizzle is read.
    Swizzled,
    /// Lanes named by the swizzle, gated by a fixed lane mask.
    SwizzledMasked(u8),
    /// Lanes named by the swizzle, gated by the write mask.
    SwizzledWriteMask,
    /// Lanes named by the swizzle, gated by `0x7 | write_mask`.
    SwizzledXyzOrWriteMask,
    /// The xyz components unconditionally.
    Xyz,
    /// All four components unconditionally.
    Xyzw,
    /// Nothing is read from the register file.
    Nothing,
    /// Rows of a matrix operand; the row count and per-row mask come
    /// from the write mask, each row applying the embedded rule.
    MatrixRows(&'static SourceRule),
    /// Cross-product component pattern (each result lane reads the
    /// other two lanes).
    Cross,
    /// Consumption depends on the sampler declaration; resolved by
    /// the analysis driver.
    TexSample,
}

const M3_ROW: SourceRule = SourceRule::SwizzledMasked(0x7);
const M4_ROW: SourceRule = SourceRule::Swizzled;

/// The consumption rule for `(opcode, argument)`, or `None` when the
/// opcode never reads a register source in a pre-3.0 pixel shader.
pub fn source_rule(opcode: Opcode, argument: usize) -> Option<SourceRule> {
    use Opcode::*;

    Some(match opcode {
        Tex | TexLdd | TexLdl => SourceRule::TexSample,

        M3x2 | M3x3 | M3x4 => {
            if argument == 1 {
                SourceRule::MatrixRows(&M3_ROW)
            } else {
                M3_ROW
            }
        }
        M4x3 | M4x4 => {
            if argument == 1 {
                SourceRule::MatrixRows(&M4_ROW)
            } else {
                M4_ROW
            }
        }

        Crs => SourceRule::Cross,

        Dp2Add => {
            if argument < 2 {
                SourceRule::SwizzledMasked(0x3)
            } else {
                SourceRule::Swizzled
            }
        }
        Dp3 => SourceRule::SwizzledMasked(0x7),
        Dp4 => SourceRule::Swizzled,

        SinCos | Exp | Log | Pow | Rcp | Rsq => SourceRule::Swizzled,

        Nrm => SourceRule::SwizzledXyzOrWriteMask,

        Mov | Add | Sub | Mul | Mad | Abs | Cmp | Cnd | Frc | Lrp | Max | Min | SetP
        | BreakC | Dsx | Dsy => SourceRule::SwizzledWriteMask,

        TexCoord => SourceRule::Xyzw,

        TexDp3 | TexDp3Tex | TexM3x2Pad | TexM3x3Pad | TexM3x2Tex | TexM3x3Spec
        | TexM3x3VSpec | TexBem | TexBemL | TexM3x2Depth | TexM3x3 | TexM3x3Tex => {
            SourceRule::Xyz
        }

        TexReg2Ar | TexReg2Gb | TexReg2Rgb => SourceRule::Nothing,

        Dcl | Def | DefI | DefB | Nop | End | Comment | Phase => return None,

        // Anything else reads conservatively.
        _ => SourceRule::Xyzw,
    })
}

/// Applies a non-matrix rule, returning the 4-bit mask of components
/// read from the source register.
pub fn components_read(rule: SourceRule, swizzle: u8, write_mask: u8) -> u8 {
    let mut read = 0;
    for component in 0..4u8 {
        let hit = match rule {
            SourceRule::Swizzled => swizzle_contains_component(swizzle, component),
            SourceRule::SwizzledMasked(mask) => {
                swizzle_contains_component_masked(swizzle, component, mask)
            }
            SourceRule::SwizzledWriteMask => {
                swizzle_contains_component_masked(swizzle, component, write_mask)
            }
            SourceRule::SwizzledXyzOrWriteMask => {
                swizzle_contains_component_masked(swizzle, component, 0x7 | write_mask)
            }
            SourceRule::Xyz => component < 3,
            SourceRule::Xyzw => true,
            SourceRule::Nothing => false,
            SourceRule::MatrixRows(_) | SourceRule::Cross | SourceRule::TexSample => {
                unreachable!("rule requires the analysis driver")
            }
        };
        if hit {
            read |= 1 << component;
        }
    }
    read
}

/// Per-lane masks of the cross-product pattern: writing component `c`
/// reads the other two of xyz.
pub const CROSS_LANE_MASKS: [u8; 3] = [0x6, 0x5, 0x3];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swizzle::IDENTITY;

    /// Every wire opcode that can appear with register sources in a
    /// pre-2.0 pixel shader must have a rule for each argument slot.
    #[test]
    fn table_is_total_for_legacy_arithmetic() {
        let arithmetic = [
            Opcode::Mov,
            Opcode::Add,
            Opcode::Sub,
            Opcode::Mad,
            Opcode::Mul,
            Opcode::Rcp,
            Opcode::Rsq,
            Opcode::Dp3,
            Opcode::Dp4,
            Opcode::Min,
            Opcode::Max,
            Opcode::Slt,
            Opcode::Sge,
            Opcode::Exp,
            Opcode::Log,
            Opcode::Lit,
            Opcode::Dst,
            Opcode::Lrp,
            Opcode::Frc,
            Opcode::M4x4,
            Opcode::M4x3,
            Opcode::M3x4,
            Opcode::M3x3,
            Opcode::M3x2,
            Opcode::Pow,
            Opcode::Crs,
            Opcode::Sgn,
            Opcode::Abs,
            Opcode::Nrm,
            Opcode::SinCos,
            Opcode::Cmp,
            Opcode::Cnd,
            Opcode::Bem,
            Opcode::Dp2Add,
            Opcode::Dsx,
            Opcode::Dsy,
            Opcode::TexCoord,
            Opcode::Tex,
            Opcode::TexBem,
            Opcode::TexBemL,
            Opcode::TexReg2Ar,
            Opcode::TexReg2Gb,
            Opcode::TexReg2Rgb,
            Opcode::TexDp3,
            Opcode::TexDp3Tex,
            Opcode::TexM3x2Pad,
            Opcode::TexM3x2Tex,
            Opcode::TexM3x3Pad,
            Opcode::TexM3x3Tex,
            Opcode::TexM3x3Spec,
            Opcode::TexM3x3VSpec,
            Opcode::TexM3x2Depth,
            Opcode::TexM3x3,
            Opcode::TexDepth,
        ];
        for opcode in arithmetic {
            for argument in 0..4 {
                assert!(
                    source_rule(opcode, argument).is_some(),
                    "no rule for {:?} argument {}",
                    opcode,
                    argument
                );
            }
        }
    }

    #[test]
    fn declarations_have_no_rule() {
        assert_eq!(source_rule(Opcode::Dcl, 0), None);
        assert_eq!(source_rule(Opcode::Def, 0), None);
    }

    #[test]
    fn write_mask_gates_plain_arithmetic() {
        // mov r0.x, v0.xyzw only reads v0.x.
        let rule = source_rule(Opcode::Mov, 0).unwrap();
        assert_eq!(components_read(rule, IDENTITY, 0x1), 0x1);
        assert_eq!(components_read(rule, IDENTITY, 0xF), 0xF);
        // With a broadcast swizzle even a full mask reads one lane.
        assert_eq!(components_read(rule, 0x00, 0xF), 0x1);
    }

    #[test]
    fn dot_products_ignore_write_mask() {
        let dp3 = source_rule(Opcode::Dp3, 0).unwrap();
        assert_eq!(components_read(dp3, IDENTITY, 0x1), 0x7);
        let dp4 = source_rule(Opcode::Dp4, 0).unwrap();
        assert_eq!(components_read(dp4, IDENTITY, 0x1), 0xF);
    }
}
