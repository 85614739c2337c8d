//! Process-global constant tables used by lowered code.
//!
//! The vector masks are cheap enough to inline as pool literals; the
//! half-to-float table is built once on first use and shared by every
//! compilation.

use lazy_static::lazy_static;

/// `roundps` immediate: round toward negative infinity.
pub const ROUND_FLOOR: u8 = 0x1;
/// `roundps` immediate: round toward positive infinity.
pub const ROUND_CEIL: u8 = 0x2;
/// `roundps` immediate: round toward zero.
pub const ROUND_TRUNCATE: u8 = 0x3;

/// `cmpps` predicates.
pub const CMP_EQ: u8 = 0;
/// Less-than predicate.
pub const CMP_LT: u8 = 1;
/// Less-or-equal predicate.
pub const CMP_LE: u8 = 2;
/// Not-equal predicate.
pub const CMP_NEQ: u8 = 4;

/// All lanes 1.0.
pub const ONES: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Sign-bit mask in every lane.
pub const SIGN_MASK: [f32; 4] = [f32::from_bits(0x8000_0000); 4];

/// Everything but the sign bit, in every lane.
pub const ABS_MASK: [f32; 4] = [f32::from_bits(0x7FFF_FFFF); 4];

/// All-bits x and y lanes.
pub const XY_MASK: [f32; 4] = [
    f32::from_bits(0xFFFF_FFFF),
    f32::from_bits(0xFFFF_FFFF),
    f32::from_bits(0),
    f32::from_bits(0),
];

/// All-bits x, y and z lanes.
pub const XYZ_MASK: [f32; 4] = [
    f32::from_bits(0xFFFF_FFFF),
    f32::from_bits(0xFFFF_FFFF),
    f32::from_bits(0xFFFF_FFFF),
    f32::from_bits(0),
];

lazy_static! {
    /// Half-precision to single-precision conversion table, indexed
    /// by the raw 16-bit pattern.
    pub static ref HALF_TO_FLOAT: Vec<f32> = {
        (0..=0xFFFFu32).map(|bits| half_to_float(bits as u16)).collect()
    };
}

/// Scalar half→float conversion used to seed the table.
fn half_to_float(half: u16) -> f32 {
    let sign = u32::from(half >> 15) << 31;
    let exponent = u32::from((half >> 10) & 0x1F);
    let mantissa = u32::from(half & 0x3FF);

    let bits = if exponent == 0 {
        if mantissa == 0 {
            sign
        } else {
            // Normalize the subnormal.
            let shift = mantissa.leading_zeros() - 21;
            let mantissa = (mantissa << (shift + 1)) & 0x3FF;
            let exponent = 127 - 15 - shift;
            sign | (exponent << 23) | (mantissa << 13)
        }
    } else if exponent == 0x1F {
        // Infinities and NaNs.
        sign | 0x7F80_0000 | (mantissa << 13)
    } else {
        sign | ((exponent + 127 - 15) << 23) | (mantissa << 13)
    };

    f32::from_bits(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_conversions() {
        assert_eq!(half_to_float(0x0000), 0.0);
        assert_eq!(half_to_float(0x3C00), 1.0);
        assert_eq!(half_to_float(0xBC00), -1.0);
        assert_eq!(half_to_float(0x4000), 2.0);
        assert_eq!(half_to_float(0x3800), 0.5);
        assert!(half_to_float(0x7C00).is_infinite());
        assert!(half_to_float(0x7C01).is_nan());
        // Smallest subnormal.
        assert_eq!(half_to_float(0x0001), 5.960_464_5e-8);
    }

    #[test]
    fn table_agrees_with_scalar_conversion() {
        assert_eq!(HALF_TO_FLOAT.len(), 65536);
        assert_eq!(HALF_TO_FLOAT[0x3C00], 1.0);
        assert_eq!(HALF_TO_FLOAT[0x4200], 3.0);
    }
}
