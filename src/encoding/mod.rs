//! Specialization encoding
//!
//! An operation description (family, operators, types, formats, flags) is
//! packed into a fixed-size [`Encoding`]: the kernel kind, a 64-bit
//! structural code built from per-family bit fields, and the length of the
//! optional suffix naming user-defined objects.
//!
//! Bit layouts live in [`layout`]; the per-family encoders live in
//! [`problem`].

pub mod layout;
pub mod problem;

pub use layout::BitField;
pub use problem::{
    ApplyMethod, ApplyProblem, BuildProblem, DefinitionSlots, EwiseMethod, EwiseProblem, Mask,
    MxmMethod, MxmProblem, Operand, ReduceProblem, SelectProblem, Specialization, UserDefinition,
};

use std::fmt;

/// Storage format of one operand, 2 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Format {
    Hypersparse = 0,
    #[default]
    Sparse = 1,
    Bitmap = 2,
    Full = 3,
}

impl Format {
    /// Decode a 2-bit format field
    pub fn from_bits(bits: u64) -> Format {
        match bits & 0x3 {
            0 => Format::Hypersparse,
            1 => Format::Sparse,
            2 => Format::Bitmap,
            _ => Format::Full,
        }
    }
}

/// Kernel family: selects the bit layout, the macro generator and the
/// kernel template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelFamily {
    Apply,
    Build,
    Ewise,
    Mxm,
    Reduce,
    Select,
    UserOp,
    UserType,
}

impl KernelFamily {
    /// Template file name stem (`sj_jit_kernel_<family>.c`)
    pub fn name(self) -> &'static str {
        match self {
            KernelFamily::Apply => "apply",
            KernelFamily::Build => "build",
            KernelFamily::Ewise => "ewise",
            KernelFamily::Mxm => "mxm",
            KernelFamily::Reduce => "reduce",
            KernelFamily::Select => "select",
            KernelFamily::UserOp => "user_op",
            KernelFamily::UserType => "user_type",
        }
    }

    /// Bit layout of the structural code
    pub fn layout(self) -> &'static [BitField] {
        match self {
            KernelFamily::Apply => layout::apply::LAYOUT,
            KernelFamily::Build => layout::build::LAYOUT,
            KernelFamily::Ewise => layout::ewise::LAYOUT,
            KernelFamily::Mxm => layout::mxm::LAYOUT,
            KernelFamily::Reduce => layout::reduce::LAYOUT,
            KernelFamily::Select => layout::select::LAYOUT,
            KernelFamily::UserOp => layout::user_op::LAYOUT,
            KernelFamily::UserType => layout::user_type::LAYOUT,
        }
    }

    /// Number of hex digits the structural code takes in a kernel name
    pub fn code_digits(self) -> usize {
        let bits = self
            .layout()
            .iter()
            .map(|f| f.shift + f.width)
            .max()
            .unwrap_or(0) as usize;
        bits.div_ceil(4).max(1)
    }

    /// Kernels of this family wrap user definitions directly and are
    /// validated every time they are looked up.
    pub fn always_validate(self) -> bool {
        matches!(self, KernelFamily::UserOp | KernelFamily::UserType)
    }
}

impl fmt::Display for KernelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The specific kernel within a family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum KernelKind {
    ApplyUnop = 1,
    ApplyBind1st = 2,
    ApplyBind2nd = 3,
    Build = 4,
    EwiseAdd = 5,
    EwiseEmult = 6,
    EwiseUnion = 7,
    MxmDot = 8,
    MxmSaxpy = 9,
    Reduce = 10,
    Select = 11,
    UserOp = 12,
    UserType = 13,
}

impl KernelKind {
    pub const ALL: [KernelKind; 13] = [
        KernelKind::ApplyUnop,
        KernelKind::ApplyBind1st,
        KernelKind::ApplyBind2nd,
        KernelKind::Build,
        KernelKind::EwiseAdd,
        KernelKind::EwiseEmult,
        KernelKind::EwiseUnion,
        KernelKind::MxmDot,
        KernelKind::MxmSaxpy,
        KernelKind::Reduce,
        KernelKind::Select,
        KernelKind::UserOp,
        KernelKind::UserType,
    ];

    pub fn family(self) -> KernelFamily {
        match self {
            KernelKind::ApplyUnop | KernelKind::ApplyBind1st | KernelKind::ApplyBind2nd => {
                KernelFamily::Apply
            }
            KernelKind::Build => KernelFamily::Build,
            KernelKind::EwiseAdd | KernelKind::EwiseEmult | KernelKind::EwiseUnion => {
                KernelFamily::Ewise
            }
            KernelKind::MxmDot | KernelKind::MxmSaxpy => KernelFamily::Mxm,
            KernelKind::Reduce => KernelFamily::Reduce,
            KernelKind::Select => KernelFamily::Select,
            KernelKind::UserOp => KernelFamily::UserOp,
            KernelKind::UserType => KernelFamily::UserType,
        }
    }

    /// Name used in kernel names and file names
    pub fn name(self) -> &'static str {
        match self {
            KernelKind::ApplyUnop => "apply_unop",
            KernelKind::ApplyBind1st => "apply_bind1st",
            KernelKind::ApplyBind2nd => "apply_bind2nd",
            KernelKind::Build => "build",
            KernelKind::EwiseAdd => "ewise_add",
            KernelKind::EwiseEmult => "ewise_emult",
            KernelKind::EwiseUnion => "ewise_union",
            KernelKind::MxmDot => "mxm_dot",
            KernelKind::MxmSaxpy => "mxm_saxpy",
            KernelKind::Reduce => "reduce",
            KernelKind::Select => "select",
            KernelKind::UserOp => "user_op",
            KernelKind::UserType => "user_type",
        }
    }

    pub fn from_name(name: &str) -> Option<KernelKind> {
        KernelKind::ALL.iter().copied().find(|k| k.name() == name)
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-size record identifying a specialization.
///
/// Two encodings are the same specialization iff kind, code and suffix
/// length are equal; the suffix bytes themselves are compared by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Encoding {
    pub kind: KernelKind,
    pub code: u64,
    pub suffix_len: u32,
}

impl Encoding {
    /// Size of [`Encoding::to_bytes`]
    pub const BYTES: usize = 16;

    pub fn new(kind: KernelKind, code: u64, suffix_len: u32) -> Self {
        Self {
            kind,
            code,
            suffix_len,
        }
    }

    pub fn family(&self) -> KernelFamily {
        self.kind.family()
    }

    /// Raw little-endian bytes the identity hash is computed over
    pub fn to_bytes(&self) -> [u8; Self::BYTES] {
        let mut bytes = [0u8; Self::BYTES];
        bytes[0..8].copy_from_slice(&self.code.to_le_bytes());
        bytes[8..12].copy_from_slice(&(self.kind as u32).to_le_bytes());
        bytes[12..16].copy_from_slice(&self.suffix_len.to_le_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_roundtrip() {
        for kind in KernelKind::ALL {
            assert_eq!(KernelKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(KernelKind::from_name("mxm"), None);
    }

    #[test]
    fn test_code_digits() {
        assert_eq!(KernelFamily::Mxm.code_digits(), 14);
        assert_eq!(KernelFamily::Ewise.code_digits(), 12);
        assert_eq!(KernelFamily::Apply.code_digits(), 9);
        assert_eq!(KernelFamily::Reduce.code_digits(), 5);
        assert_eq!(KernelFamily::UserType.code_digits(), 1);
    }

    #[test]
    fn test_encoding_bytes() {
        let enc = Encoding::new(KernelKind::MxmDot, 0x0102_0304_0506_0708, 5);
        let bytes = enc.to_bytes();
        assert_eq!(&bytes[0..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[8..12], &(KernelKind::MxmDot as u32).to_le_bytes());
        assert_eq!(&bytes[12..16], &5u32.to_le_bytes());
    }

    #[test]
    fn test_format_from_bits() {
        for format in [Format::Hypersparse, Format::Sparse, Format::Bitmap, Format::Full] {
            assert_eq!(Format::from_bits(format as u64), format);
        }
    }

    #[test]
    fn test_always_validate() {
        assert!(KernelFamily::UserOp.always_validate());
        assert!(KernelFamily::UserType.always_validate());
        assert!(!KernelFamily::Mxm.always_validate());
    }
}
