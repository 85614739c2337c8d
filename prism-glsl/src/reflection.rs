//! Reflection metadata produced alongside the instruction stream:
//! active uniforms, attributes, varyings and their register
//! assignments. Types use the GL numeric codes so the API layer can
//! hand them out unchanged.

use crate::types::{BasicType, Precision, Type};

/// GL type codes used by the reflection tables.
#[allow(missing_docs)]
pub mod gl {
    pub const NONE: u32 = 0;
    pub const FLOAT: u32 = 0x1406;
    pub const FLOAT_VEC2: u32 = 0x8B50;
    pub const FLOAT_VEC3: u32 = 0x8B51;
    pub const FLOAT_VEC4: u32 = 0x8B52;
    pub const INT: u32 = 0x1404;
    pub const INT_VEC2: u32 = 0x8B53;
    pub const INT_VEC3: u32 = 0x8B54;
    pub const INT_VEC4: u32 = 0x8B55;
    pub const BOOL: u32 = 0x8B56;
    pub const BOOL_VEC2: u32 = 0x8B57;
    pub const BOOL_VEC3: u32 = 0x8B58;
    pub const BOOL_VEC4: u32 = 0x8B59;
    pub const FLOAT_MAT2: u32 = 0x8B5A;
    pub const FLOAT_MAT3: u32 = 0x8B5B;
    pub const FLOAT_MAT4: u32 = 0x8B5C;
    pub const SAMPLER_2D: u32 = 0x8B5E;
    pub const SAMPLER_CUBE: u32 = 0x8B60;
    pub const SAMPLER_EXTERNAL_OES: u32 = 0x8D66;
    pub const LOW_FLOAT: u32 = 0x8DF0;
    pub const MEDIUM_FLOAT: u32 = 0x8DF1;
    pub const HIGH_FLOAT: u32 = 0x8DF2;
    pub const LOW_INT: u32 = 0x8DF3;
    pub const MEDIUM_INT: u32 = 0x8DF4;
    pub const HIGH_INT: u32 = 0x8DF5;
}

/// An active uniform (or sampler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uniform {
    /// GL type code.
    pub ty: u32,
    /// GL precision code.
    pub precision: u32,
    /// Flattened name (`light[2].direction` style for structs).
    pub name: String,
    /// Array length; 0 for non-arrays.
    pub array_size: u32,
    /// First register in the constant (or sampler) file.
    pub register_index: u32,
}

/// An active vertex attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// GL type code.
    pub ty: u32,
    /// Attribute name.
    pub name: String,
    /// Array length; 0 for non-arrays.
    pub array_size: u32,
    /// Bound location, -1 until linked.
    pub location: i32,
    /// First input register.
    pub register_index: u32,
}

/// A varying, packed against the other stage at link time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Varying {
    /// GL type code.
    pub ty: u32,
    /// Varying name.
    pub name: String,
    /// Array length; 0 for non-arrays.
    pub array_size: u32,
    /// First varying register, -1 until assigned.
    pub register: i32,
    /// First register column, -1 until assigned.
    pub column: i32,
}

impl Varying {
    /// Whether the varying is an array.
    pub fn is_array(&self) -> bool {
        self.array_size >= 1
    }

    /// Element count (arrays report their length, scalars 1).
    pub fn size(&self) -> u32 {
        self.array_size.max(1)
    }
}

/// The GL type code of a tree type.
pub fn variable_type(ty: &Type) -> u32 {
    match ty.basic {
        BasicType::Float => {
            if ty.is_matrix() {
                match ty.nominal_size {
                    2 => gl::FLOAT_MAT2,
                    3 => gl::FLOAT_MAT3,
                    4 => gl::FLOAT_MAT4,
                    _ => gl::NONE,
                }
            } else {
                match ty.nominal_size {
                    1 => gl::FLOAT,
                    2 => gl::FLOAT_VEC2,
                    3 => gl::FLOAT_VEC3,
                    4 => gl::FLOAT_VEC4,
                    _ => gl::NONE,
                }
            }
        }
        BasicType::Int => match ty.nominal_size {
            1 => gl::INT,
            2 => gl::INT_VEC2,
            3 => gl::INT_VEC3,
            4 => gl::INT_VEC4,
            _ => gl::NONE,
        },
        BasicType::Bool => match ty.nominal_size {
            1 => gl::BOOL,
            2 => gl::BOOL_VEC2,
            3 => gl::BOOL_VEC3,
            4 => gl::BOOL_VEC4,
            _ => gl::NONE,
        },
        BasicType::Sampler2D => gl::SAMPLER_2D,
        BasicType::SamplerCube => gl::SAMPLER_CUBE,
        BasicType::SamplerExternal => gl::SAMPLER_EXTERNAL_OES,
        _ => gl::NONE,
    }
}

/// The GL precision code of a tree type.
pub fn variable_precision(ty: &Type) -> u32 {
    match ty.basic {
        BasicType::Float => match ty.precision {
            Precision::High => gl::HIGH_FLOAT,
            Precision::Medium => gl::MEDIUM_FLOAT,
            Precision::Low => gl::LOW_FLOAT,
        },
        BasicType::Int => match ty.precision {
            Precision::High => gl::HIGH_INT,
            Precision::Medium => gl::MEDIUM_INT,
            Precision::Low => gl::LOW_INT,
        },
        // Booleans and samplers carry no precision.
        _ => gl::NONE,
    }
}
