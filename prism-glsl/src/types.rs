//! The type lattice of the tree IR: basic types, precision and
//! storage qualifiers, and register-count arithmetic.

/// Basic (element) types.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicType {
    Void,
    Float,
    Int,
    Bool,
    Sampler2D,
    SamplerCube,
    SamplerExternal,
    Struct,
}

impl BasicType {
    /// Whether this is one of the sampler types.
    pub fn is_sampler(self) -> bool {
        matches!(
            self,
            BasicType::Sampler2D | BasicType::SamplerCube | BasicType::SamplerExternal
        )
    }
}

/// Precision qualifiers. Carried through to reflection; the register
/// allocator ignores them.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Low,
    Medium,
    High,
}

/// Storage qualifiers. The qualifier decides the register file an
/// identifier lands in.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualifier {
    Temporary,
    Global,
    Const,
    Attribute,
    Uniform,
    VaryingIn,
    VaryingOut,
    InvariantVaryingIn,
    InvariantVaryingOut,
    In,
    Out,
    InOut,
    ConstReadOnly,
    Position,
    PointSize,
    FragCoord,
    FrontFacing,
    PointCoord,
    FragColor,
    FragData,
}

/// A named struct field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name within the struct.
    pub name: String,
    /// Field type.
    pub ty: Type,
}

/// The full type of a tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    /// Element type.
    pub basic: BasicType,
    /// Precision qualifier.
    pub precision: Precision,
    /// Storage qualifier.
    pub qualifier: Qualifier,
    /// Vector or matrix dimension, 1..=4.
    pub nominal_size: u8,
    /// Whether this is a square matrix of `nominal_size` columns.
    pub matrix: bool,
    /// Array length; 0 for non-arrays.
    pub array_size: u32,
    /// Struct fields; empty unless `basic == Struct`.
    pub fields: Vec<Field>,
}

impl Type {
    /// A scalar/vector float type with the given size and qualifier.
    pub fn float(nominal_size: u8, qualifier: Qualifier) -> Type {
        Type {
            basic: BasicType::Float,
            precision: Precision::High,
            qualifier,
            nominal_size,
            matrix: false,
            array_size: 0,
            fields: Vec::new(),
        }
    }

    /// A square float matrix type.
    pub fn matrix(dim: u8, qualifier: Qualifier) -> Type {
        Type {
            basic: BasicType::Float,
            precision: Precision::High,
            qualifier,
            nominal_size: dim,
            matrix: true,
            array_size: 0,
            fields: Vec::new(),
        }
    }

    /// A scalar/vector of `basic` with the given size.
    pub fn of(basic: BasicType, nominal_size: u8, qualifier: Qualifier) -> Type {
        Type {
            basic,
            precision: Precision::High,
            qualifier,
            nominal_size,
            matrix: false,
            array_size: 0,
            fields: Vec::new(),
        }
    }

    /// Returns a copy of this type with `array_size` elements.
    pub fn array_of(mut self, array_size: u32) -> Type {
        self.array_size = array_size;
        self
    }

    pub fn is_scalar(&self) -> bool {
        self.nominal_size == 1 && !self.matrix && !self.is_struct() && !self.is_array()
    }

    pub fn is_vector(&self) -> bool {
        self.nominal_size > 1 && !self.matrix && !self.is_struct()
    }

    pub fn is_matrix(&self) -> bool {
        self.matrix
    }

    pub fn is_array(&self) -> bool {
        self.array_size > 0
    }

    pub fn is_struct(&self) -> bool {
        self.basic == BasicType::Struct
    }

    /// Whether a value of this type fits one register.
    pub fn is_register(&self) -> bool {
        !self.matrix && !self.is_struct() && !self.is_array()
    }

    /// Registers occupied by one array element (the whole value for
    /// non-arrays).
    pub fn element_register_count(&self) -> u32 {
        if self.is_struct() {
            self.fields
                .iter()
                .map(|field| field.ty.total_register_count())
                .sum()
        } else if self.matrix {
            u32::from(self.nominal_size)
        } else {
            1
        }
    }

    /// Total registers occupied by a value of this type.
    pub fn total_register_count(&self) -> u32 {
        if self.is_array() {
            self.array_size * self.element_register_count()
        } else {
            self.element_register_count()
        }
    }

    /// Scalar component count of one array element.
    pub fn element_size(&self) -> u32 {
        if self.is_struct() {
            self.fields.iter().map(|field| field.ty.object_size_one()).sum()
        } else if self.matrix {
            u32::from(self.nominal_size) * u32::from(self.nominal_size)
        } else {
            u32::from(self.nominal_size)
        }
    }

    /// Scalar component count of the whole value.
    pub fn object_size(&self) -> u32 {
        if self.is_array() {
            self.array_size * self.element_size()
        } else {
            self.element_size()
        }
    }

    fn object_size_one(&self) -> u32 {
        self.object_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec4() -> Type {
        Type::float(4, Qualifier::Temporary)
    }

    fn light_struct() -> Type {
        Type {
            basic: BasicType::Struct,
            precision: Precision::High,
            qualifier: Qualifier::Uniform,
            nominal_size: 1,
            matrix: false,
            array_size: 0,
            fields: vec![
                Field {
                    name: "direction".into(),
                    ty: Type::float(3, Qualifier::Uniform),
                },
                Field {
                    name: "transform".into(),
                    ty: Type::matrix(4, Qualifier::Uniform),
                },
                Field {
                    name: "intensity".into(),
                    ty: Type::float(1, Qualifier::Uniform),
                },
            ],
        }
    }

    #[test]
    fn struct_register_count_is_field_sum() {
        let s = light_struct();
        let field_sum: u32 = s
            .fields
            .iter()
            .map(|field| field.ty.total_register_count())
            .sum();
        assert_eq!(s.total_register_count(), field_sum);
        assert_eq!(s.total_register_count(), 1 + 4 + 1);
    }

    #[test]
    fn array_register_count_multiplies_element() {
        let a = light_struct().array_of(3);
        assert_eq!(
            a.total_register_count(),
            3 * light_struct().element_register_count()
        );
        let v = vec4().array_of(7);
        assert_eq!(v.total_register_count(), 7);
    }

    #[test]
    fn matrix_spans_one_register_per_column() {
        let m = Type::matrix(3, Qualifier::Uniform);
        assert_eq!(m.element_register_count(), 3);
        assert_eq!(m.total_register_count(), 3);
        assert_eq!(m.object_size(), 9);
    }

    #[test]
    fn register_predicate() {
        assert!(vec4().is_register());
        assert!(!Type::matrix(2, Qualifier::Temporary).is_register());
        assert!(!vec4().array_of(2).is_register());
        assert!(!light_struct().is_register());
    }
}
