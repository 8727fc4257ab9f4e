//! Type, operator, monoid and semiring descriptors
//!
//! These are the views the JIT needs of the objects owned by the matrix
//! subsystem: a type code, a byte size, an optional C definition (user
//! objects only) and a 64-bit object hash.
//!
//! Object hashes follow one convention everywhere:
//! - `0` ([`NOT_HASHED`]): builtin, nothing to disambiguate
//! - `u64::MAX` ([`NOT_JITABLE`]): user object that cannot be compiled
//! - anything else: hash of the object's name

use crate::identity::{NOT_HASHED, NOT_JITABLE, hash_bytes};
use std::fmt;

/// Builtin type code, packed into 4 bits of a structural code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeCode {
    Bool = 1,
    Int8 = 2,
    UInt8 = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Fp32 = 10,
    Fp64 = 11,
    Fc32 = 12,
    Fc64 = 13,
    /// User-defined type
    User = 14,
}

impl TypeCode {
    pub(crate) fn from_bits(bits: u64) -> Option<TypeCode> {
        use TypeCode::*;
        Some(match bits {
            1 => Bool,
            2 => Int8,
            3 => UInt8,
            4 => Int16,
            5 => UInt16,
            6 => Int32,
            7 => UInt32,
            8 => Int64,
            9 => UInt64,
            10 => Fp32,
            11 => Fp64,
            12 => Fc32,
            13 => Fc64,
            14 => User,
            _ => return None,
        })
    }

    /// C spelling of a builtin type
    pub fn c_name(self) -> Option<&'static str> {
        use TypeCode::*;
        Some(match self {
            Bool => "bool",
            Int8 => "int8_t",
            UInt8 => "uint8_t",
            Int16 => "int16_t",
            UInt16 => "uint16_t",
            Int32 => "int32_t",
            UInt32 => "uint32_t",
            Int64 => "int64_t",
            UInt64 => "uint64_t",
            Fp32 => "float",
            Fp64 => "double",
            Fc32 => "float complex",
            Fc64 => "double complex",
            User => return None,
        })
    }

    /// Short suffix used in builtin object names (`plus_fp64`)
    pub fn short_name(self) -> &'static str {
        use TypeCode::*;
        match self {
            Bool => "bool",
            Int8 => "int8",
            UInt8 => "uint8",
            Int16 => "int16",
            UInt16 => "uint16",
            Int32 => "int32",
            UInt32 => "uint32",
            Int64 => "int64",
            UInt64 => "uint64",
            Fp32 => "fp32",
            Fp64 => "fp64",
            Fc32 => "fc32",
            Fc64 => "fc64",
            User => "udt",
        }
    }

    /// Size in bytes of a builtin type
    pub fn size(self) -> usize {
        use TypeCode::*;
        match self {
            Bool | Int8 | UInt8 => 1,
            Int16 | UInt16 => 2,
            Int32 | UInt32 | Fp32 => 4,
            Int64 | UInt64 | Fp64 | Fc32 => 8,
            Fc64 => 16,
            User => 0,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeCode::Fp32 | TypeCode::Fp64)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, TypeCode::Fc32 | TypeCode::Fc64)
    }
}

/// Operator opcode, packed into 8 bits of a structural code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// No operator (e.g. build without a dup operator)
    Nop = 0,

    // unary
    Identity = 1,
    Ainv = 2,
    Abs = 3,
    Minv = 4,
    Lnot = 5,
    Bnot = 6,
    Sqrt = 7,
    Exp = 8,
    Log = 9,
    One = 10,

    // binary
    First = 32,
    Second = 33,
    Any = 34,
    Pair = 35,
    Min = 36,
    Max = 37,
    Plus = 38,
    Minus = 39,
    Rminus = 40,
    Times = 41,
    Div = 42,
    Rdiv = 43,
    Pow = 44,
    Iseq = 45,
    Isne = 46,
    Isgt = 47,
    Islt = 48,
    Isge = 49,
    Isle = 50,
    Lor = 51,
    Land = 52,
    Lxor = 53,
    Eq = 54,
    Ne = 55,
    Gt = 56,
    Lt = 57,
    Ge = 58,
    Le = 59,
    Bor = 60,
    Band = 61,
    Bxor = 62,

    // index-unary (select)
    Tril = 80,
    Triu = 81,
    Diag = 82,
    Offdiag = 83,
    RowLe = 84,
    ColLe = 85,
    ValueEq = 86,
    ValueNe = 87,
    ValueGt = 88,
    ValueLt = 89,

    // user-defined
    UserUnary = 253,
    UserBinary = 254,
    UserIndex = 255,
}

impl Opcode {
    pub(crate) fn from_bits(bits: u64) -> Option<Opcode> {
        use Opcode::*;
        const TABLE: &[Opcode] = &[
            Nop, Identity, Ainv, Abs, Minv, Lnot, Bnot, Sqrt, Exp, Log, One, First, Second, Any,
            Pair, Min, Max, Plus, Minus, Rminus, Times, Div, Rdiv, Pow, Iseq, Isne, Isgt, Islt,
            Isge, Isle, Lor, Land, Lxor, Eq, Ne, Gt, Lt, Ge, Le, Bor, Band, Bxor, Tril, Triu,
            Diag, Offdiag, RowLe, ColLe, ValueEq, ValueNe, ValueGt, ValueLt, UserUnary,
            UserBinary, UserIndex,
        ];
        TABLE.iter().copied().find(|op| *op as u64 == bits)
    }

    pub fn is_unary(self) -> bool {
        (1..32).contains(&(self as u8)) || self == Opcode::UserUnary
    }

    pub fn is_binary(self) -> bool {
        (32..80).contains(&(self as u8)) || self == Opcode::UserBinary
    }

    pub fn is_index_unary(self) -> bool {
        (80..128).contains(&(self as u8)) || self == Opcode::UserIndex
    }

    pub fn is_user(self) -> bool {
        matches!(
            self,
            Opcode::UserUnary | Opcode::UserBinary | Opcode::UserIndex
        )
    }

    /// Lower-case name used for builtin object names
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "nop",
            Identity => "identity",
            Ainv => "ainv",
            Abs => "abs",
            Minv => "minv",
            Lnot => "lnot",
            Bnot => "bnot",
            Sqrt => "sqrt",
            Exp => "exp",
            Log => "log",
            One => "one",
            First => "first",
            Second => "second",
            Any => "any",
            Pair => "pair",
            Min => "min",
            Max => "max",
            Plus => "plus",
            Minus => "minus",
            Rminus => "rminus",
            Times => "times",
            Div => "div",
            Rdiv => "rdiv",
            Pow => "pow",
            Iseq => "iseq",
            Isne => "isne",
            Isgt => "isgt",
            Islt => "islt",
            Isge => "isge",
            Isle => "isle",
            Lor => "lor",
            Land => "land",
            Lxor => "lxor",
            Eq => "eq",
            Ne => "ne",
            Gt => "gt",
            Lt => "lt",
            Ge => "ge",
            Le => "le",
            Bor => "bor",
            Band => "band",
            Bxor => "bxor",
            Tril => "tril",
            Triu => "triu",
            Diag => "diag",
            Offdiag => "offdiag",
            RowLe => "rowle",
            ColLe => "colle",
            ValueEq => "valueeq",
            ValueNe => "valuene",
            ValueGt => "valuegt",
            ValueLt => "valuelt",
            UserUnary | UserBinary | UserIndex => "user",
        }
    }

    /// Collapse boolean operators onto their canonical equivalents.
    ///
    /// Applied when the operator's input type is `bool`, so that e.g.
    /// `plus_bool`, `max_bool` and `lor_bool` share one kernel.
    pub fn boolean_rename(self) -> Opcode {
        use Opcode::*;
        match self {
            // div(x,y) = x, rdiv(x,y) = y
            Div => First,
            Rdiv => Second,
            Minus | Rminus | Ne | Isne => Lxor,
            Max | Plus => Lor,
            Min | Times => Land,
            Iseq => Eq,
            Isgt => Gt,
            Islt => Lt,
            Isge => Ge,
            Isle => Le,
            // 1^0 = 1, 1^1 = 1, 0^0 = 1, 0^1 = 0
            Pow => Ge,
            Ainv | Abs | Minv => Identity,
            other => other,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Is `name` usable as a C identifier (and therefore as a kernel suffix)?
pub fn is_c_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn user_hash(name: &str, defn: Option<&str>) -> u64 {
    let jitable = defn.is_some() && is_c_identifier(name);
    hash_bytes(name.as_bytes(), jitable)
}

/// A builtin or user-defined type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitType {
    code: TypeCode,
    name: String,
    size: usize,
    defn: Option<String>,
    hash: u64,
}

impl JitType {
    /// A builtin type
    pub fn builtin(code: TypeCode) -> Self {
        debug_assert!(code != TypeCode::User);
        Self {
            code,
            name: code.short_name().to_string(),
            size: code.size(),
            defn: None,
            hash: NOT_HASHED,
        }
    }

    /// A user-defined type. Without a definition (or with a name that is
    /// not a C identifier) the type cannot be compiled into kernels.
    pub fn user(name: impl Into<String>, size: usize, defn: Option<&str>) -> Self {
        let name = name.into();
        let hash = user_hash(&name, defn);
        Self {
            code: TypeCode::User,
            name,
            size,
            defn: defn.map(str::to_string),
            hash,
        }
    }

    pub fn code(&self) -> TypeCode {
        self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn defn(&self) -> Option<&str> {
        self.defn.as_deref()
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn is_user(&self) -> bool {
        self.code == TypeCode::User
    }

    /// C spelling of the type: the builtin name or the user type's name
    pub fn c_name(&self) -> &str {
        self.code.c_name().unwrap_or(&self.name)
    }
}

/// A unary, binary or index-unary operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitOp {
    opcode: Opcode,
    name: String,
    ztype: JitType,
    xtype: JitType,
    ytype: Option<JitType>,
    defn: Option<String>,
    hash: u64,
}

impl JitOp {
    /// A builtin operator, named `<opcode>_<xtype>` (`plus_fp64`)
    pub fn builtin(opcode: Opcode, ztype: JitType, xtype: JitType, ytype: Option<JitType>) -> Self {
        debug_assert!(!opcode.is_user());
        let name = format!("{}_{}", opcode.name(), xtype.code().short_name());
        // a builtin operator over a user type (first_udt) carries the type's identity
        let hash = if xtype.is_user() { xtype.hash() } else { NOT_HASHED };
        Self {
            opcode,
            name,
            ztype,
            xtype,
            ytype,
            defn: None,
            hash,
        }
    }

    /// A builtin binary operator with all three types equal
    pub fn binary(opcode: Opcode, ty: &JitType) -> Self {
        let ztype = if matches!(
            opcode,
            Opcode::Eq | Opcode::Ne | Opcode::Gt | Opcode::Lt | Opcode::Ge | Opcode::Le
        ) {
            JitType::builtin(TypeCode::Bool)
        } else {
            ty.clone()
        };
        Self::builtin(opcode, ztype, ty.clone(), Some(ty.clone()))
    }

    /// A builtin unary operator with `z` and `x` of the same type
    pub fn unary(opcode: Opcode, ty: &JitType) -> Self {
        Self::builtin(opcode, ty.clone(), ty.clone(), None)
    }

    /// A user-defined unary operator `z = f(x)`
    pub fn user_unary(
        name: impl Into<String>,
        ztype: JitType,
        xtype: JitType,
        defn: Option<&str>,
    ) -> Self {
        Self::user(Opcode::UserUnary, name.into(), ztype, xtype, None, defn)
    }

    /// A user-defined binary operator `z = f(x, y)`
    pub fn user_binary(
        name: impl Into<String>,
        ztype: JitType,
        xtype: JitType,
        ytype: JitType,
        defn: Option<&str>,
    ) -> Self {
        Self::user(Opcode::UserBinary, name.into(), ztype, xtype, Some(ytype), defn)
    }

    /// A user-defined index-unary operator `z = f(x, i, j, y)`
    pub fn user_index(
        name: impl Into<String>,
        ztype: JitType,
        xtype: JitType,
        ytype: JitType,
        defn: Option<&str>,
    ) -> Self {
        Self::user(Opcode::UserIndex, name.into(), ztype, xtype, Some(ytype), defn)
    }

    fn user(
        opcode: Opcode,
        name: String,
        ztype: JitType,
        xtype: JitType,
        ytype: Option<JitType>,
        defn: Option<&str>,
    ) -> Self {
        let hash = user_hash(&name, defn);
        Self {
            opcode,
            name,
            ztype,
            xtype,
            ytype,
            defn: defn.map(str::to_string),
            hash,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ztype(&self) -> &JitType {
        &self.ztype
    }

    pub fn xtype(&self) -> &JitType {
        &self.xtype
    }

    pub fn ytype(&self) -> Option<&JitType> {
        self.ytype.as_ref()
    }

    pub fn defn(&self) -> Option<&str> {
        self.defn.as_deref()
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn is_user(&self) -> bool {
        self.opcode.is_user()
    }

    /// Opcode as it goes into an encoding, after boolean renaming
    pub fn encoded_opcode(&self) -> Opcode {
        if !self.is_user() && self.xtype.code() == TypeCode::Bool {
            self.opcode.boolean_rename()
        } else {
            self.opcode
        }
    }
}

/// A monoid: an associative binary operator with an identity and an
/// optional terminal value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitMonoid {
    op: JitOp,
    name: String,
    identity: Vec<u8>,
    terminal: Option<Vec<u8>>,
    hash: u64,
}

impl JitMonoid {
    /// A builtin monoid; its identity and terminal are implied by the
    /// operator and type and compiled in directly.
    pub fn builtin(op: JitOp) -> Self {
        let name = op.name().to_string();
        let hash = op.hash();
        Self {
            op,
            name,
            identity: Vec::new(),
            terminal: None,
            hash,
        }
    }

    /// A user monoid with explicit identity/terminal bytes. The values are
    /// compiled into the kernel and checked again whenever it is reused.
    pub fn user(
        name: impl Into<String>,
        op: JitOp,
        identity: Vec<u8>,
        terminal: Option<Vec<u8>>,
    ) -> Self {
        let name = name.into();
        let hash = if op.hash() == NOT_JITABLE {
            NOT_JITABLE
        } else {
            hash_bytes(name.as_bytes(), is_c_identifier(&name))
        };
        Self {
            op,
            name,
            identity,
            terminal,
            hash,
        }
    }

    pub fn op(&self) -> &JitOp {
        &self.op
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn is_user(&self) -> bool {
        self.hash != NOT_HASHED
    }

    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    pub fn terminal(&self) -> Option<&[u8]> {
        self.terminal.as_deref()
    }
}

/// A semiring: additive monoid plus multiplicative operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitSemiring {
    add: JitMonoid,
    multiply: JitOp,
    name: String,
    hash: u64,
}

impl JitSemiring {
    /// Build a semiring. It is builtin iff both parts are builtin.
    pub fn new(add: JitMonoid, multiply: JitOp) -> Self {
        let name = format!("{}_{}", add.name(), multiply.name());
        let hash = match (add.hash(), multiply.hash()) {
            (NOT_HASHED, NOT_HASHED) => NOT_HASHED,
            (NOT_JITABLE, _) | (_, NOT_JITABLE) => NOT_JITABLE,
            _ => hash_bytes(name.as_bytes(), is_c_identifier(&name)),
        };
        Self {
            add,
            multiply,
            name,
            hash,
        }
    }

    pub fn add(&self) -> &JitMonoid {
        &self.add
    }

    pub fn multiply(&self) -> &JitOp {
        &self.multiply
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}
