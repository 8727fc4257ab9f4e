//! Bit layouts of the structural codes, one table per family.
//!
//! Fields are listed least significant first. Types take 4 bits
//! ([`crate::object::TypeCode`]), operators 8 bits ([`crate::object::Opcode`]),
//! formats 2 bits ([`super::Format`]) and flags 1 bit.

/// One field of a structural code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub name: &'static str,
    pub shift: u32,
    pub width: u32,
}

impl BitField {
    pub const fn new(name: &'static str, shift: u32, width: u32) -> Self {
        Self { name, shift, width }
    }

    const fn mask(self) -> u64 {
        (1u64 << self.width) - 1
    }

    /// Place `value` into this field
    pub fn pack(self, value: u64) -> u64 {
        debug_assert!(
            value <= self.mask(),
            "value {} does not fit field {}",
            value,
            self.name
        );
        (value & self.mask()) << self.shift
    }

    /// Read this field back out of `code`
    pub fn extract(self, code: u64) -> u64 {
        (code >> self.shift) & self.mask()
    }

    pub fn flag(self, code: u64) -> bool {
        self.extract(code) != 0
    }
}

/// OR together a list of packed fields
pub fn pack(fields: &[(BitField, u64)]) -> u64 {
    fields
        .iter()
        .fold(0u64, |code, (field, value)| code | field.pack(*value))
}

/// Matrix multiply, `C<M> = A*B` over a semiring
pub mod mxm {
    use super::BitField;

    pub const A_FORMAT: BitField = BitField::new("a_format", 0, 2);
    pub const B_FORMAT: BitField = BitField::new("b_format", 2, 2);
    pub const C_FORMAT: BitField = BitField::new("c_format", 4, 2);
    pub const M_FORMAT: BitField = BitField::new("m_format", 6, 2);
    pub const HAS_MASK: BitField = BitField::new("has_mask", 8, 1);
    pub const MASK_STRUCT: BitField = BitField::new("mask_struct", 9, 1);
    pub const MASK_COMP: BitField = BitField::new("mask_comp", 10, 1);
    pub const A_ISO: BitField = BitField::new("a_iso", 11, 1);
    pub const B_ISO: BitField = BitField::new("b_iso", 12, 1);
    pub const C_ISO: BitField = BitField::new("c_iso", 13, 1);
    pub const FLIPXY: BitField = BitField::new("flipxy", 14, 1);
    pub const BTYPE: BitField = BitField::new("btype", 15, 4);
    pub const ATYPE: BitField = BitField::new("atype", 19, 4);
    pub const CTYPE: BitField = BitField::new("ctype", 23, 4);
    pub const YTYPE: BitField = BitField::new("ytype", 27, 4);
    pub const XTYPE: BitField = BitField::new("xtype", 31, 4);
    pub const ZTYPE: BitField = BitField::new("ztype", 35, 4);
    pub const MULT: BitField = BitField::new("mult", 39, 8);
    pub const ADD: BitField = BitField::new("add", 47, 8);

    pub const LAYOUT: &[BitField] = &[
        A_FORMAT, B_FORMAT, C_FORMAT, M_FORMAT, HAS_MASK, MASK_STRUCT, MASK_COMP, A_ISO, B_ISO,
        C_ISO, FLIPXY, BTYPE, ATYPE, CTYPE, YTYPE, XTYPE, ZTYPE, MULT, ADD,
    ];
}

/// Element-wise add / emult / union, `C<M> = A op B`
pub mod ewise {
    use super::BitField;

    pub const A_FORMAT: BitField = BitField::new("a_format", 0, 2);
    pub const B_FORMAT: BitField = BitField::new("b_format", 2, 2);
    pub const C_FORMAT: BitField = BitField::new("c_format", 4, 2);
    pub const M_FORMAT: BitField = BitField::new("m_format", 6, 2);
    pub const HAS_MASK: BitField = BitField::new("has_mask", 8, 1);
    pub const MASK_STRUCT: BitField = BitField::new("mask_struct", 9, 1);
    pub const MASK_COMP: BitField = BitField::new("mask_comp", 10, 1);
    pub const A_ISO: BitField = BitField::new("a_iso", 11, 1);
    pub const B_ISO: BitField = BitField::new("b_iso", 12, 1);
    pub const C_ISO: BitField = BitField::new("c_iso", 13, 1);
    pub const FLIPXY: BitField = BitField::new("flipxy", 14, 1);
    pub const BTYPE: BitField = BitField::new("btype", 15, 4);
    pub const ATYPE: BitField = BitField::new("atype", 19, 4);
    pub const CTYPE: BitField = BitField::new("ctype", 23, 4);
    pub const YTYPE: BitField = BitField::new("ytype", 27, 4);
    pub const XTYPE: BitField = BitField::new("xtype", 31, 4);
    pub const ZTYPE: BitField = BitField::new("ztype", 35, 4);
    pub const OP: BitField = BitField::new("op", 39, 8);

    pub const LAYOUT: &[BitField] = &[
        A_FORMAT, B_FORMAT, C_FORMAT, M_FORMAT, HAS_MASK, MASK_STRUCT, MASK_COMP, A_ISO, B_ISO,
        C_ISO, FLIPXY, BTYPE, ATYPE, CTYPE, YTYPE, XTYPE, ZTYPE, OP,
    ];
}

/// Apply a unary operator or a binary operator with one bound scalar
pub mod apply {
    use super::BitField;

    pub const A_FORMAT: BitField = BitField::new("a_format", 0, 2);
    pub const C_FORMAT: BitField = BitField::new("c_format", 2, 2);
    pub const A_ISO: BitField = BitField::new("a_iso", 4, 1);
    pub const C_ISO: BitField = BitField::new("c_iso", 5, 1);
    pub const ATYPE: BitField = BitField::new("atype", 6, 4);
    pub const CTYPE: BitField = BitField::new("ctype", 10, 4);
    pub const YTYPE: BitField = BitField::new("ytype", 14, 4);
    pub const XTYPE: BitField = BitField::new("xtype", 18, 4);
    pub const ZTYPE: BitField = BitField::new("ztype", 22, 4);
    pub const OP: BitField = BitField::new("op", 26, 8);

    pub const LAYOUT: &[BitField] = &[
        A_FORMAT, C_FORMAT, A_ISO, C_ISO, ATYPE, CTYPE, YTYPE, XTYPE, ZTYPE, OP,
    ];
}

/// Reduce a matrix to a scalar with a monoid
pub mod reduce {
    use super::BitField;

    pub const A_FORMAT: BitField = BitField::new("a_format", 0, 2);
    pub const A_ISO: BitField = BitField::new("a_iso", 2, 1);
    pub const HAS_TERMINAL: BitField = BitField::new("has_terminal", 3, 1);
    pub const ATYPE: BitField = BitField::new("atype", 4, 4);
    pub const ZTYPE: BitField = BitField::new("ztype", 8, 4);
    pub const OP: BitField = BitField::new("op", 12, 8);

    pub const LAYOUT: &[BitField] = &[A_FORMAT, A_ISO, HAS_TERMINAL, ATYPE, ZTYPE, OP];
}

/// Select entries with an index-unary operator
pub mod select {
    use super::BitField;

    pub const A_FORMAT: BitField = BitField::new("a_format", 0, 2);
    pub const A_ISO: BitField = BitField::new("a_iso", 2, 1);
    pub const C_ISO: BitField = BitField::new("c_iso", 3, 1);
    pub const FLIPIJ: BitField = BitField::new("flipij", 4, 1);
    pub const ATYPE: BitField = BitField::new("atype", 5, 4);
    pub const YTYPE: BitField = BitField::new("ytype", 9, 4);
    pub const XTYPE: BitField = BitField::new("xtype", 13, 4);
    pub const OP: BitField = BitField::new("op", 17, 8);

    pub const LAYOUT: &[BitField] = &[A_FORMAT, A_ISO, C_ISO, FLIPIJ, ATYPE, YTYPE, XTYPE, OP];
}

/// Build a matrix from tuples, combining duplicates with an operator
pub mod build {
    use super::BitField;

    pub const INDEX64: BitField = BitField::new("index64", 0, 1);
    pub const TTYPE: BitField = BitField::new("ttype", 1, 4);
    pub const STYPE: BitField = BitField::new("stype", 5, 4);
    pub const ZTYPE: BitField = BitField::new("ztype", 9, 4);
    pub const XTYPE: BitField = BitField::new("xtype", 13, 4);
    pub const OP: BitField = BitField::new("op", 17, 8);

    pub const LAYOUT: &[BitField] = &[INDEX64, TTYPE, STYPE, ZTYPE, XTYPE, OP];
}

/// A user operator compiled on its own, for use by generic kernels
pub mod user_op {
    use super::BitField;

    pub const ZTYPE: BitField = BitField::new("ztype", 0, 4);
    pub const XTYPE: BitField = BitField::new("xtype", 4, 4);
    pub const YTYPE: BitField = BitField::new("ytype", 8, 4);
    pub const OP: BitField = BitField::new("op", 12, 8);

    pub const LAYOUT: &[BitField] = &[ZTYPE, XTYPE, YTYPE, OP];
}

/// A user type compiled on its own (size and layout probe)
pub mod user_type {
    use super::BitField;

    pub const TYPE: BitField = BitField::new("type", 0, 4);

    pub const LAYOUT: &[BitField] = &[TYPE];
}
