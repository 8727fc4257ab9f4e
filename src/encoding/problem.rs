//! Per-family encoders
//!
//! Each problem type describes one operation in the terms the JIT cares
//! about and encodes it into a [`Specialization`]: the kernel identity plus
//! the user definitions the kernel has to be built from and validated
//! against.

use super::layout::{self, pack};
use super::{Format, KernelKind};
use crate::identity::{KernelIdentity, NOT_HASHED, NOT_JITABLE, hash_bytes};
use crate::object::{JitMonoid, JitOp, JitSemiring, JitType, Opcode, TypeCode};
use crate::validator::{DEFINITION_SLOTS, Definitions, MonoidValues};

/// One matrix operand: its type, storage format and whether all its
/// values are equal (iso)
#[derive(Debug, Clone, Copy)]
pub struct Operand<'a> {
    pub ty: &'a JitType,
    pub format: Format,
    pub iso: bool,
}

impl<'a> Operand<'a> {
    pub fn new(ty: &'a JitType, format: Format) -> Self {
        Self {
            ty,
            format,
            iso: false,
        }
    }

    pub fn iso(mut self) -> Self {
        self.iso = true;
        self
    }
}

/// Optional write mask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mask {
    pub format: Format,
    pub structural: bool,
    pub complement: bool,
}

/// Name and definition of a user object placed in a definition slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDefinition {
    pub name: String,
    pub defn: Option<String>,
}

/// User objects of a specialization, by slot.
///
/// | Family | 0 | 1 | 2 | 3 | 4 |
/// |---|---|---|---|---|---|
/// | mxm | add op | multiply op | C type | A type | B type |
/// | ewise | op | | C type | A type | B type |
/// | apply | op | | C type | A type | bound scalar type |
/// | reduce | monoid op | | Z type | A type | |
/// | select | op | | | A type | thunk type |
/// | build | dup op | | T type | S type | |
/// | user_op | op | | Z type | X type | Y type |
/// | user_type | | | type | | |
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionSlots(pub [Option<UserDefinition>; DEFINITION_SLOTS]);

impl DefinitionSlots {
    pub fn get(&self, slot: usize) -> Option<&UserDefinition> {
        self.0.get(slot).and_then(Option::as_ref)
    }

    /// The definition strings the validator expects
    pub fn definitions(&self) -> Definitions {
        Definitions(std::array::from_fn(|i| {
            self.0[i].as_ref().and_then(|u| u.defn.clone())
        }))
    }
}

/// Result of encoding an operation: everything needed to look up, build
/// and validate its kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specialization {
    identity: KernelIdentity,
    slots: DefinitionSlots,
    user_types: Vec<(&'static str, String)>,
    monoid: Option<MonoidValues>,
}

impl Specialization {
    pub fn identity(&self) -> &KernelIdentity {
        &self.identity
    }

    pub fn slots(&self) -> &DefinitionSlots {
        &self.slots
    }

    pub fn definitions(&self) -> Definitions {
        self.slots.definitions()
    }

    pub fn monoid(&self) -> Option<&MonoidValues> {
        self.monoid.as_ref()
    }

    /// Name of the user type playing `role` (a layout field name such as
    /// `"ctype"`), if that field holds a user type
    pub fn user_type_name(&self, role: &str) -> Option<&str> {
        self.user_types
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, name)| name.as_str())
    }

    /// A user operator compiled on its own
    pub fn user_op(op: &JitOp) -> Specialization {
        use layout::user_op as f;
        let mut objects = ObjectSet::new();
        objects.op(Some(0), op);
        objects.ty(Some(2), "ztype", op.ztype());
        objects.ty(Some(3), "xtype", op.xtype());
        let ycode = match op.ytype() {
            Some(y) => {
                objects.ty(Some(4), "ytype", y);
                type_bits(y)
            }
            None => 0,
        };
        let code = pack(&[
            (f::ZTYPE, type_bits(op.ztype())),
            (f::XTYPE, type_bits(op.xtype())),
            (f::YTYPE, ycode),
            (f::OP, op.opcode() as u64),
        ]);
        objects.finish(KernelKind::UserOp, code)
    }

    /// A user type compiled on its own
    pub fn user_type(ty: &JitType) -> Specialization {
        let mut objects = ObjectSet::new();
        objects.ty(Some(2), "type", ty);
        let code = layout::user_type::TYPE.pack(type_bits(ty));
        objects.finish(KernelKind::UserType, code)
    }
}

fn type_bits(ty: &JitType) -> u64 {
    ty.code() as u64
}

fn format_bits(format: Format) -> u64 {
    format as u64
}

/// Collects the user objects of a problem while it is encoded
struct ObjectSet {
    names: Vec<String>,
    jitable: bool,
    slots: DefinitionSlots,
    user_types: Vec<(&'static str, String)>,
    monoid: Option<MonoidValues>,
}

impl ObjectSet {
    fn new() -> Self {
        Self {
            names: Vec::new(),
            jitable: true,
            slots: DefinitionSlots::default(),
            user_types: Vec::new(),
            monoid: None,
        }
    }

    fn note(&mut self, name: &str, hash: u64) {
        match hash {
            NOT_HASHED => {}
            NOT_JITABLE => self.jitable = false,
            _ => {
                if !self.names.iter().any(|n| n == name) {
                    self.names.push(name.to_string());
                }
            }
        }
    }

    fn place(&mut self, slot: Option<usize>, name: &str, defn: Option<&str>) {
        if let Some(slot) = slot {
            if self.slots.0[slot].is_none() {
                self.slots.0[slot] = Some(UserDefinition {
                    name: name.to_string(),
                    defn: defn.map(str::to_string),
                });
            }
        }
    }

    fn ty(&mut self, slot: Option<usize>, role: &'static str, ty: &JitType) {
        if ty.is_user() {
            self.note(ty.name(), ty.hash());
            self.place(slot, ty.name(), ty.defn());
            self.user_types.push((role, ty.name().to_string()));
        }
    }

    fn op(&mut self, slot: Option<usize>, op: &JitOp) {
        self.note(op.name(), op.hash());
        if op.is_user() {
            self.place(slot, op.name(), op.defn());
        }
    }

    fn monoid(&mut self, slot: Option<usize>, monoid: &JitMonoid) {
        self.op(slot, monoid.op());
        if monoid.is_user() {
            self.note(monoid.name(), monoid.hash());
            self.monoid = Some(MonoidValues {
                identity: monoid.identity().to_vec(),
                terminal: monoid.terminal().map(<[u8]>::to_vec),
            });
        }
    }

    fn semiring(&mut self, semiring: &JitSemiring) {
        if semiring.hash() == NOT_HASHED {
            return;
        }
        self.note(semiring.name(), semiring.hash());
        self.monoid(Some(0), semiring.add());
        self.op(Some(1), semiring.multiply());
    }

    fn finish(self, kind: KernelKind, code: u64) -> Specialization {
        let (suffix, object_hash) = if !self.jitable {
            (None, NOT_JITABLE)
        } else if self.names.is_empty() {
            (None, NOT_HASHED)
        } else {
            let suffix = self.names.join("__");
            let hash = hash_bytes(suffix.as_bytes(), true);
            (Some(suffix), hash)
        };
        Specialization {
            identity: KernelIdentity::new(kind, code, suffix, object_hash),
            slots: self.slots,
            user_types: self.user_types,
            monoid: self.monoid,
        }
    }
}

/// Which matrix multiply kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MxmMethod {
    Dot,
    Saxpy,
}

/// `C<M> = A*B` over a semiring
#[derive(Debug, Clone, Copy)]
pub struct MxmProblem<'a> {
    pub method: MxmMethod,
    pub semiring: &'a JitSemiring,
    pub flipxy: bool,
    pub c: Operand<'a>,
    pub a: Operand<'a>,
    pub b: Operand<'a>,
    pub mask: Option<Mask>,
}

impl MxmProblem<'_> {
    pub fn encode(&self) -> Specialization {
        use layout::mxm as f;
        let add = self.semiring.add().op();
        let mult = self.semiring.multiply();
        let mask = self.mask.unwrap_or_default();

        // with flipxy the multiply sees (b, a)
        let (xop, yop) = if self.flipxy {
            (mult.ytype().unwrap_or(mult.xtype()), mult.xtype())
        } else {
            (mult.xtype(), mult.ytype().unwrap_or(mult.xtype()))
        };

        let code = pack(&[
            (f::A_FORMAT, format_bits(self.a.format)),
            (f::B_FORMAT, format_bits(self.b.format)),
            (f::C_FORMAT, format_bits(self.c.format)),
            (f::M_FORMAT, format_bits(mask.format)),
            (f::HAS_MASK, self.mask.is_some() as u64),
            (f::MASK_STRUCT, mask.structural as u64),
            (f::MASK_COMP, mask.complement as u64),
            (f::A_ISO, self.a.iso as u64),
            (f::B_ISO, self.b.iso as u64),
            (f::C_ISO, self.c.iso as u64),
            (f::FLIPXY, self.flipxy as u64),
            (f::BTYPE, type_bits(self.b.ty)),
            (f::ATYPE, type_bits(self.a.ty)),
            (f::CTYPE, type_bits(self.c.ty)),
            (f::YTYPE, type_bits(yop)),
            (f::XTYPE, type_bits(xop)),
            (f::ZTYPE, type_bits(add.ztype())),
            (f::MULT, mult.encoded_opcode() as u64),
            (f::ADD, add.encoded_opcode() as u64),
        ]);

        let mut objects = ObjectSet::new();
        objects.semiring(self.semiring);
        objects.ty(Some(2), "ctype", self.c.ty);
        objects.ty(Some(3), "atype", self.a.ty);
        objects.ty(Some(4), "btype", self.b.ty);
        objects.ty(None, "xtype", xop);
        objects.ty(None, "ytype", yop);
        objects.ty(None, "ztype", add.ztype());
        let kind = match self.method {
            MxmMethod::Dot => KernelKind::MxmDot,
            MxmMethod::Saxpy => KernelKind::MxmSaxpy,
        };
        objects.finish(kind, code)
    }
}

/// Which element-wise kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EwiseMethod {
    /// Set union of the patterns
    Add,
    /// Set intersection of the patterns
    Emult,
    /// Set union with explicit fill values
    Union,
}

/// `C<M> = A op B`
#[derive(Debug, Clone, Copy)]
pub struct EwiseProblem<'a> {
    pub method: EwiseMethod,
    pub op: &'a JitOp,
    pub flipxy: bool,
    pub c: Operand<'a>,
    pub a: Operand<'a>,
    pub b: Operand<'a>,
    pub mask: Option<Mask>,
}

impl EwiseProblem<'_> {
    pub fn encode(&self) -> Specialization {
        use layout::ewise as f;
        let mask = self.mask.unwrap_or_default();
        let ytype = self.op.ytype().unwrap_or(self.op.xtype());
        let code = pack(&[
            (f::A_FORMAT, format_bits(self.a.format)),
            (f::B_FORMAT, format_bits(self.b.format)),
            (f::C_FORMAT, format_bits(self.c.format)),
            (f::M_FORMAT, format_bits(mask.format)),
            (f::HAS_MASK, self.mask.is_some() as u64),
            (f::MASK_STRUCT, mask.structural as u64),
            (f::MASK_COMP, mask.complement as u64),
            (f::A_ISO, self.a.iso as u64),
            (f::B_ISO, self.b.iso as u64),
            (f::C_ISO, self.c.iso as u64),
            (f::FLIPXY, self.flipxy as u64),
            (f::BTYPE, type_bits(self.b.ty)),
            (f::ATYPE, type_bits(self.a.ty)),
            (f::CTYPE, type_bits(self.c.ty)),
            (f::YTYPE, type_bits(ytype)),
            (f::XTYPE, type_bits(self.op.xtype())),
            (f::ZTYPE, type_bits(self.op.ztype())),
            (f::OP, self.op.encoded_opcode() as u64),
        ]);

        let mut objects = ObjectSet::new();
        objects.op(Some(0), self.op);
        objects.ty(Some(2), "ctype", self.c.ty);
        objects.ty(Some(3), "atype", self.a.ty);
        objects.ty(Some(4), "btype", self.b.ty);
        objects.ty(None, "xtype", self.op.xtype());
        objects.ty(None, "ytype", ytype);
        objects.ty(None, "ztype", self.op.ztype());
        let kind = match self.method {
            EwiseMethod::Add => KernelKind::EwiseAdd,
            EwiseMethod::Emult => KernelKind::EwiseEmult,
            EwiseMethod::Union => KernelKind::EwiseUnion,
        };
        objects.finish(kind, code)
    }
}

/// Which apply kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMethod {
    /// `z = f(a)`
    Unop,
    /// `z = f(s, a)` with a bound scalar `s`
    Bind1st,
    /// `z = f(a, s)` with a bound scalar `s`
    Bind2nd,
}

/// `C = op(A)`
#[derive(Debug, Clone, Copy)]
pub struct ApplyProblem<'a> {
    pub method: ApplyMethod,
    pub op: &'a JitOp,
    pub c: Operand<'a>,
    pub a: Operand<'a>,
}

impl ApplyProblem<'_> {
    pub fn encode(&self) -> Specialization {
        use layout::apply as f;
        let ytype = self.op.ytype();
        let code = pack(&[
            (f::A_FORMAT, format_bits(self.a.format)),
            (f::C_FORMAT, format_bits(self.c.format)),
            (f::A_ISO, self.a.iso as u64),
            (f::C_ISO, self.c.iso as u64),
            (f::ATYPE, type_bits(self.a.ty)),
            (f::CTYPE, type_bits(self.c.ty)),
            (f::YTYPE, ytype.map_or(0, type_bits)),
            (f::XTYPE, type_bits(self.op.xtype())),
            (f::ZTYPE, type_bits(self.op.ztype())),
            (f::OP, self.op.encoded_opcode() as u64),
        ]);

        let mut objects = ObjectSet::new();
        objects.op(Some(0), self.op);
        objects.ty(Some(2), "ctype", self.c.ty);
        objects.ty(Some(3), "atype", self.a.ty);
        if let Some(y) = ytype {
            objects.ty(Some(4), "ytype", y);
        }
        objects.ty(None, "xtype", self.op.xtype());
        objects.ty(None, "ztype", self.op.ztype());
        let kind = match self.method {
            ApplyMethod::Unop => KernelKind::ApplyUnop,
            ApplyMethod::Bind1st => KernelKind::ApplyBind1st,
            ApplyMethod::Bind2nd => KernelKind::ApplyBind2nd,
        };
        objects.finish(kind, code)
    }
}

/// `s = reduce(A)` with a monoid
#[derive(Debug, Clone, Copy)]
pub struct ReduceProblem<'a> {
    pub monoid: &'a JitMonoid,
    pub a: Operand<'a>,
}

impl ReduceProblem<'_> {
    pub fn encode(&self) -> Specialization {
        use layout::reduce as f;
        let op = self.monoid.op();
        let has_terminal = if self.monoid.is_user() {
            self.monoid.terminal().is_some()
        } else {
            builtin_has_terminal(op.encoded_opcode(), op.ztype().code())
        };
        let code = pack(&[
            (f::A_FORMAT, format_bits(self.a.format)),
            (f::A_ISO, self.a.iso as u64),
            (f::HAS_TERMINAL, has_terminal as u64),
            (f::ATYPE, type_bits(self.a.ty)),
            (f::ZTYPE, type_bits(op.ztype())),
            (f::OP, op.encoded_opcode() as u64),
        ]);

        let mut objects = ObjectSet::new();
        objects.monoid(Some(0), self.monoid);
        objects.ty(Some(2), "ztype", op.ztype());
        objects.ty(Some(3), "atype", self.a.ty);
        objects.finish(KernelKind::Reduce, code)
    }
}

/// Builtin monoids with a terminal value: min/max over integers (and
/// floats, at ±inf), times over integers, and the logical ones.
fn builtin_has_terminal(opcode: Opcode, ztype: TypeCode) -> bool {
    match opcode {
        Opcode::Min | Opcode::Max => !ztype.is_complex(),
        Opcode::Times => !ztype.is_float() && !ztype.is_complex(),
        Opcode::Lor | Opcode::Land | Opcode::Any | Opcode::Band | Opcode::Bor => true,
        _ => false,
    }
}

/// `C = select(A, op, y)`
#[derive(Debug, Clone, Copy)]
pub struct SelectProblem<'a> {
    pub op: &'a JitOp,
    pub flipij: bool,
    pub c_iso: bool,
    pub a: Operand<'a>,
}

impl SelectProblem<'_> {
    pub fn encode(&self) -> Specialization {
        use layout::select as f;
        let ytype = self.op.ytype();
        let code = pack(&[
            (f::A_FORMAT, format_bits(self.a.format)),
            (f::A_ISO, self.a.iso as u64),
            (f::C_ISO, self.c_iso as u64),
            (f::FLIPIJ, self.flipij as u64),
            (f::ATYPE, type_bits(self.a.ty)),
            (f::YTYPE, ytype.map_or(0, type_bits)),
            (f::XTYPE, type_bits(self.op.xtype())),
            (f::OP, self.op.opcode() as u64),
        ]);

        let mut objects = ObjectSet::new();
        objects.op(Some(0), self.op);
        objects.ty(Some(3), "atype", self.a.ty);
        if let Some(y) = ytype {
            objects.ty(Some(4), "ytype", y);
        }
        objects.ty(None, "xtype", self.op.xtype());
        objects.finish(KernelKind::Select, code)
    }
}

/// Build a matrix from `(i, j, s)` tuples into type `T`
#[derive(Debug, Clone, Copy)]
pub struct BuildProblem<'a> {
    pub dup: Option<&'a JitOp>,
    pub ttype: &'a JitType,
    pub stype: &'a JitType,
    pub index64: bool,
}

impl BuildProblem<'_> {
    pub fn encode(&self) -> Specialization {
        use layout::build as f;
        let (opcode, ztype, xtype) = match self.dup {
            Some(op) => (
                op.encoded_opcode() as u64,
                type_bits(op.ztype()),
                type_bits(op.xtype()),
            ),
            None => (Opcode::Nop as u64, 0, 0),
        };
        let code = pack(&[
            (f::INDEX64, self.index64 as u64),
            (f::TTYPE, type_bits(self.ttype)),
            (f::STYPE, type_bits(self.stype)),
            (f::ZTYPE, ztype),
            (f::XTYPE, xtype),
            (f::OP, opcode),
        ]);

        let mut objects = ObjectSet::new();
        if let Some(op) = self.dup {
            objects.op(Some(0), op);
            objects.ty(None, "ztype", op.ztype());
            objects.ty(None, "xtype", op.xtype());
        }
        objects.ty(Some(2), "ttype", self.ttype);
        objects.ty(Some(3), "stype", self.stype);
        objects.finish(KernelKind::Build, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NOT_JITABLE;
    use crate::object::JitMonoid;

    fn fp64() -> JitType {
        JitType::builtin(TypeCode::Fp64)
    }

    fn plus_times(ty: &JitType) -> JitSemiring {
        JitSemiring::new(
            JitMonoid::builtin(JitOp::binary(Opcode::Plus, ty)),
            JitOp::binary(Opcode::Times, ty),
        )
    }

    fn mxm<'a>(sr: &'a JitSemiring, ty: &'a JitType) -> MxmProblem<'a> {
        MxmProblem {
            method: MxmMethod::Dot,
            semiring: sr,
            flipxy: false,
            c: Operand::new(ty, Format::Full),
            a: Operand::new(ty, Format::Sparse),
            b: Operand::new(ty, Format::Sparse),
            mask: None,
        }
    }

    #[test]
    fn test_mxm_is_deterministic() {
        let ty = fp64();
        let sr = plus_times(&ty);
        let a = mxm(&sr, &ty).encode();
        let b = mxm(&sr, &ty).encode();
        assert_eq!(a, b);
        assert_eq!(a.identity().suffix(), None);
        assert!(a.definitions().is_empty());
        assert_eq!(a.identity().kind(), KernelKind::MxmDot);
    }

    #[test]
    fn test_mxm_fields() {
        let ty = fp64();
        let sr = plus_times(&ty);
        let mut p = mxm(&sr, &ty);
        p.mask = Some(Mask {
            format: Format::Bitmap,
            structural: true,
            complement: true,
        });
        let code = p.encode().identity().code();
        use layout::mxm as f;
        assert_eq!(f::ADD.extract(code), Opcode::Plus as u64);
        assert_eq!(f::MULT.extract(code), Opcode::Times as u64);
        assert_eq!(f::CTYPE.extract(code), TypeCode::Fp64 as u64);
        assert_eq!(f::C_FORMAT.extract(code), Format::Full as u64);
        assert_eq!(f::M_FORMAT.extract(code), Format::Bitmap as u64);
        assert!(f::HAS_MASK.flag(code));
        assert!(f::MASK_STRUCT.flag(code));
        assert!(f::MASK_COMP.flag(code));
    }

    #[test]
    fn test_boolean_semirings_share_a_kernel() {
        let b = JitType::builtin(TypeCode::Bool);
        let plus_times = plus_times(&b);
        let lor_land = JitSemiring::new(
            JitMonoid::builtin(JitOp::binary(Opcode::Lor, &b)),
            JitOp::binary(Opcode::Land, &b),
        );
        let x = mxm(&plus_times, &b).encode();
        let y = mxm(&lor_land, &b).encode();
        assert_eq!(x.identity(), y.identity());
    }

    #[test]
    fn test_user_semiring_gets_suffix_and_slots() {
        let ty = fp64();
        let add = JitOp::user_binary("myadd", ty.clone(), ty.clone(), ty.clone(), Some("z = x + y"));
        let mult = JitOp::binary(Opcode::Times, &ty);
        let sr = JitSemiring::new(JitMonoid::user("mymonoid", add, vec![0; 8], None), mult);
        let spec = mxm(&sr, &ty).encode();
        let suffix = spec.identity().suffix().unwrap();
        assert!(suffix.starts_with(sr.name()));
        assert!(suffix.contains("myadd"));
        assert_eq!(spec.definitions().get(0), Some("z = x + y"));
        assert_eq!(spec.definitions().get(1), None);
        assert_eq!(spec.monoid().map(|m| m.identity.len()), Some(8));
    }

    #[test]
    fn test_opaque_user_op_is_not_jitable() {
        let ty = fp64();
        let op = JitOp::user_binary("opaque", ty.clone(), ty.clone(), ty.clone(), None);
        let spec = EwiseProblem {
            method: EwiseMethod::Add,
            op: &op,
            flipxy: false,
            c: Operand::new(&ty, Format::Sparse),
            a: Operand::new(&ty, Format::Sparse),
            b: Operand::new(&ty, Format::Sparse),
            mask: None,
        }
        .encode();
        assert_eq!(spec.identity().hash(), NOT_JITABLE);
        assert!(!spec.identity().is_jitable());
    }

    #[test]
    fn test_user_type_roles() {
        let udt = JitType::user("mytype", 16, Some("typedef struct { double a, b ; } mytype ;"));
        let op = JitOp::unary(Opcode::Identity, &udt);
        let spec = ApplyProblem {
            method: ApplyMethod::Unop,
            op: &op,
            c: Operand::new(&udt, Format::Full),
            a: Operand::new(&udt, Format::Full),
        }
        .encode();
        assert_eq!(spec.user_type_name("ctype"), Some("mytype"));
        assert_eq!(spec.user_type_name("atype"), Some("mytype"));
        assert_eq!(spec.slots().get(2).map(|u| u.name.as_str()), Some("mytype"));
        assert!(spec.identity().suffix().unwrap().contains("mytype"));
    }

    #[test]
    fn test_user_op_and_type_specializations() {
        let ty = fp64();
        let op = JitOp::user_binary("myadd", ty.clone(), ty.clone(), ty.clone(), Some("z = x + y"));
        let spec = Specialization::user_op(&op);
        assert_eq!(spec.identity().kind(), KernelKind::UserOp);
        assert_eq!(spec.identity().suffix(), Some("myadd"));
        assert_eq!(
            layout::user_op::OP.extract(spec.identity().code()),
            Opcode::UserBinary as u64
        );

        let udt = JitType::user("mytype", 8, Some("typedef double mytype ;"));
        let spec = Specialization::user_type(&udt);
        assert_eq!(spec.identity().kind(), KernelKind::UserType);
        assert_eq!(spec.definitions().get(2), Some("typedef double mytype ;"));
    }

    #[test]
    fn test_reduce_terminal() {
        let i32t = JitType::builtin(TypeCode::Int32);
        let max = JitMonoid::builtin(JitOp::binary(Opcode::Max, &i32t));
        let plus = JitMonoid::builtin(JitOp::binary(Opcode::Plus, &i32t));
        let a = Operand::new(&i32t, Format::Sparse);
        let with = ReduceProblem { monoid: &max, a }.encode();
        let without = ReduceProblem { monoid: &plus, a }.encode();
        assert!(layout::reduce::HAS_TERMINAL.flag(with.identity().code()));
        assert!(!layout::reduce::HAS_TERMINAL.flag(without.identity().code()));
    }

    #[test]
    fn test_build_without_dup() {
        let ty = fp64();
        let spec = BuildProblem {
            dup: None,
            ttype: &ty,
            stype: &ty,
            index64: true,
        }
        .encode();
        let code = spec.identity().code();
        assert_eq!(layout::build::OP.extract(code), Opcode::Nop as u64);
        assert!(layout::build::INDEX64.flag(code));
    }
}
