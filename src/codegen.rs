//! Kernel source generation
//!
//! A generated kernel is a small C file:
//!
//! ```text
//! header comment
//! source preface (configurable)
//! #include "sj_jit_kernel.h"
//! specialization macros           <- emit_macros
//! user type/operator definitions  <- verbatim
//! symbol renaming for PreJIT builds
//! #include "template/sj_jit_kernel_<family>.c"
//! query entry point               <- hash, version, definitions, monoid bytes
//! ```
//!
//! Everything the template needs is decoded from the structural code; the
//! only other inputs are the user object names and definitions.

use crate::backend::{KERNEL_SYMBOL, QUERY_SYMBOL};
use crate::encoding::layout::{self, BitField};
use crate::encoding::{KernelFamily, KernelKind, Specialization};
use crate::identity::KernelName;
use crate::object::{Opcode, TypeCode};
use crate::validator::{DEFINITION_SLOTS, MonoidValues, Version};
use log::debug;
use std::fmt::{self, Write};

/// Macro defined on the compiler command line for runtime builds. Without
/// it the entry points are renamed after the kernel, so PreJIT kernels can
/// be linked side by side.
pub const RUNTIME_MACRO: &str = "SJ_JIT_RUNTIME";

/// Name of the shared kernel header
pub const KERNEL_HEADER: &str = "sj_jit_kernel.h";

/// Template path, relative to the source directory
pub fn template_path(family: KernelFamily) -> String {
    format!("template/sj_jit_kernel_{}.c", family.name())
}

/// Exported query symbol of a PreJIT kernel
pub fn prejit_query_symbol(name: &KernelName) -> String {
    format!("{}_query", name)
}

/// Render the complete source file for `spec`
pub fn render_source(spec: &Specialization, preface: &str) -> Result<String, fmt::Error> {
    let mut out = String::new();
    write_source(&mut out, spec, preface)?;
    debug!("jit: rendered {} ({} bytes)", spec.identity().name(), out.len());
    Ok(out)
}

/// Write the complete source file for `spec` into `out`
pub fn write_source(out: &mut impl Write, spec: &Specialization, preface: &str) -> fmt::Result {
    let identity = spec.identity();
    let name = identity.name();
    let family = identity.family();

    let rule = format!("//{}", "-".repeat(78));
    writeln!(out, "{}", rule)?;
    writeln!(out, "// {}.c", name)?;
    writeln!(out, "{}", rule)?;
    writeln!(
        out,
        "// Generated by semiring-jit {}; do not edit.",
        Version::current()
    )?;
    writeln!(out, "// hash: {:016x}", identity.hash())?;
    writeln!(out, "{}", rule)?;
    out.write_char('\n')?;

    if !preface.is_empty() {
        out.write_str(preface)?;
        if !preface.ends_with('\n') {
            out.write_char('\n')?;
        }
        out.write_char('\n')?;
    }

    writeln!(out, "#include \"{}\"\n", KERNEL_HEADER)?;

    writeln!(out, "// {} specialization", identity.kind())?;
    emit_macros(out, spec)?;
    out.write_char('\n')?;

    emit_definitions(out, spec)?;

    writeln!(out, "#ifndef {}", RUNTIME_MACRO)?;
    writeln!(out, "#define {} {}", KERNEL_SYMBOL, name)?;
    writeln!(out, "#define {} {}", QUERY_SYMBOL, prejit_query_symbol(&name))?;
    writeln!(out, "#endif\n")?;

    writeln!(out, "#include \"{}\"\n", template_path(family))?;

    emit_query(out, spec)
}

/// Emit the `#define`s that specialize the family template
pub fn emit_macros(out: &mut impl Write, spec: &Specialization) -> fmt::Result {
    let identity = spec.identity();
    let family = identity.family();
    let code = identity.code();

    // formats, flags and types straight from the layout
    for field in family.layout() {
        match field.width {
            8 => {}
            4 => {
                if let Some(ty) = type_name(spec, *field, code) {
                    writeln!(out, "#define {} {}", type_macro(field.name), ty)?;
                }
            }
            _ => {
                writeln!(
                    out,
                    "#define SJ_{} {}",
                    field.name.to_ascii_uppercase(),
                    field.extract(code)
                )?;
            }
        }
    }

    let user_op = |slot: usize| spec.slots().get(slot).map(|u| u.name.as_str());

    match family {
        KernelFamily::Mxm => {
            use layout::mxm as f;
            let add = opcode(f::ADD, code);
            let mult = opcode(f::MULT, code);
            writeln!(out, "#define SJ_ADD(z,x,y) {}", binop_body(add, user_op(0)))?;
            let mult_body = binop_body(mult, user_op(1));
            if f::FLIPXY.flag(code) {
                writeln!(out, "#define SJ_MULT(z,x,y) {}", swap_xy(&mult_body))?;
            } else {
                writeln!(out, "#define SJ_MULT(z,x,y) {}", mult_body)?;
            }
            emit_monoid(out, spec, add, type_code(f::ZTYPE, code))?;
        }
        KernelFamily::Ewise => {
            use layout::ewise as f;
            let body = binop_body(opcode(f::OP, code), user_op(0));
            let body = if f::FLIPXY.flag(code) {
                swap_xy(&body)
            } else {
                body
            };
            writeln!(out, "#define SJ_BINOP(z,x,y) {}", body)?;
        }
        KernelFamily::Apply => {
            let op = opcode(layout::apply::OP, code);
            match identity.kind() {
                KernelKind::ApplyBind1st => {
                    writeln!(out, "#define SJ_BINOP(z,x,y) {}", binop_body(op, user_op(0)))?;
                    writeln!(out, "#define SJ_APPLY(z,a,s) SJ_BINOP(z,s,a)")?;
                }
                KernelKind::ApplyBind2nd => {
                    writeln!(out, "#define SJ_BINOP(z,x,y) {}", binop_body(op, user_op(0)))?;
                    writeln!(out, "#define SJ_APPLY(z,a,s) SJ_BINOP(z,a,s)")?;
                }
                _ => {
                    writeln!(out, "#define SJ_UNOP(z,x) {}", unop_body(op, user_op(0)))?;
                    writeln!(out, "#define SJ_APPLY(z,a,s) SJ_UNOP(z,a)")?;
                }
            }
        }
        KernelFamily::Reduce => {
            use layout::reduce as f;
            let op = opcode(f::OP, code);
            writeln!(out, "#define SJ_ADD(z,x,y) {}", binop_body(op, user_op(0)))?;
            emit_monoid(out, spec, op, type_code(f::ZTYPE, code))?;
        }
        KernelFamily::Select => {
            use layout::select as f;
            let body = idxop_body(opcode(f::OP, code), user_op(0));
            let body = if f::FLIPIJ.flag(code) {
                body.replace("(i)", "(@)")
                    .replace("(j)", "(i)")
                    .replace("(@)", "(j)")
            } else {
                body
            };
            writeln!(out, "#define SJ_IDXUNOP(z,x,i,j,y) {}", body)?;
        }
        KernelFamily::Build => {
            let op = opcode(layout::build::OP, code);
            let body = if op == Opcode::Nop {
                binop_body(Opcode::Second, None)
            } else {
                binop_body(op, user_op(0))
            };
            writeln!(out, "#define SJ_DUP(z,x,y) {}", body)?;
        }
        KernelFamily::UserOp => {
            let op = opcode(layout::user_op::OP, code);
            let name = user_op(0).unwrap_or("sj_missing_op");
            writeln!(out, "#define SJ_USER_OP {}", name)?;
            let call = match op {
                Opcode::UserUnary => unop_body(op, Some(name)),
                Opcode::UserIndex => idxop_body(op, Some(name)),
                _ => binop_body(op, Some(name)),
            };
            writeln!(out, "#define SJ_USER_CALL {}", call)?;
            writeln!(out, "#define SJ_USER_OPCODE {}", op as u8)?;
        }
        KernelFamily::UserType => {}
    }
    Ok(())
}

fn opcode(field: BitField, code: u64) -> Opcode {
    Opcode::from_bits(field.extract(code)).unwrap_or(Opcode::Nop)
}

fn type_code(field: BitField, code: u64) -> Option<TypeCode> {
    TypeCode::from_bits(field.extract(code))
}

/// `atype` -> `SJ_A_TYPE`, `type` -> `SJ_TYPE`
fn type_macro(field: &str) -> String {
    match field.strip_suffix("type") {
        Some("") | None => "SJ_TYPE".to_string(),
        Some(prefix) => format!("SJ_{}_TYPE", prefix.to_ascii_uppercase()),
    }
}

fn type_name(spec: &Specialization, field: BitField, code: u64) -> Option<String> {
    match type_code(field, code)? {
        TypeCode::User => spec.user_type_name(field.name).map(str::to_string),
        builtin => builtin.c_name().map(str::to_string),
    }
}

fn swap_xy(body: &str) -> String {
    body.replace("(x)", "(@)")
        .replace("(y)", "(x)")
        .replace("(@)", "(y)")
}

fn unop_body(op: Opcode, user: Option<&str>) -> String {
    use Opcode::*;
    let expr = match op {
        UserUnary => return format!("{} (&(z), &(x))", user.unwrap_or("sj_missing_op")),
        Identity => "(x)",
        Ainv => "-(x)",
        Abs => "(((x) < 0) ? -(x) : (x))",
        Minv => "1 / (x)",
        Lnot => "!(x)",
        Bnot => "~(x)",
        Sqrt => "sqrt (x)",
        Exp => "exp (x)",
        Log => "log (x)",
        One => "1",
        _ => "(x)",
    };
    format!("(z) = {}", expr)
}

fn binop_body(op: Opcode, user: Option<&str>) -> String {
    use Opcode::*;
    let expr = match op {
        UserBinary => {
            return format!(
                "{} (&(z), &(x), &(y))",
                user.unwrap_or("sj_missing_op")
            );
        }
        First => "(x)",
        Second | Any => "(y)",
        Pair => "1",
        Min => "(((x) < (y)) ? (x) : (y))",
        Max => "(((x) > (y)) ? (x) : (y))",
        Plus => "(x) + (y)",
        Minus => "(x) - (y)",
        Rminus => "(y) - (x)",
        Times => "(x) * (y)",
        Div => "(x) / (y)",
        Rdiv => "(y) / (x)",
        Pow => "pow ((x), (y))",
        Iseq | Eq => "((x) == (y))",
        Isne | Ne => "((x) != (y))",
        Isgt | Gt => "((x) > (y))",
        Islt | Lt => "((x) < (y))",
        Isge | Ge => "((x) >= (y))",
        Isle | Le => "((x) <= (y))",
        Lor => "(((x) != 0) || ((y) != 0))",
        Land => "(((x) != 0) && ((y) != 0))",
        Lxor => "(((x) != 0) != ((y) != 0))",
        Bor => "(x) | (y)",
        Band => "(x) & (y)",
        Bxor => "(x) ^ (y)",
        _ => "(y)",
    };
    format!("(z) = {}", expr)
}

fn idxop_body(op: Opcode, user: Option<&str>) -> String {
    use Opcode::*;
    let expr = match op {
        UserIndex => {
            return format!(
                "{} (&(z), &(x), (i), (j), &(y))",
                user.unwrap_or("sj_missing_op")
            );
        }
        Tril => "((j) <= ((i) + (y)))",
        Triu => "((j) >= ((i) + (y)))",
        Diag => "((j) == ((i) + (y)))",
        Offdiag => "((j) != ((i) + (y)))",
        RowLe => "((i) <= (y))",
        ColLe => "((j) <= (y))",
        ValueEq => "((x) == (y))",
        ValueNe => "((x) != (y))",
        ValueGt => "((x) > (y))",
        ValueLt => "((x) < (y))",
        _ => "1",
    };
    format!("(z) = {}", expr)
}

fn type_limits(ty: TypeCode) -> Option<(&'static str, &'static str)> {
    use TypeCode::*;
    Some(match ty {
        Bool => ("false", "true"),
        Int8 => ("INT8_MIN", "INT8_MAX"),
        UInt8 => ("0", "UINT8_MAX"),
        Int16 => ("INT16_MIN", "INT16_MAX"),
        UInt16 => ("0", "UINT16_MAX"),
        Int32 => ("INT32_MIN", "INT32_MAX"),
        UInt32 => ("0", "UINT32_MAX"),
        Int64 => ("INT64_MIN", "INT64_MAX"),
        UInt64 => ("0", "UINT64_MAX"),
        Fp32 | Fp64 => ("(-INFINITY)", "INFINITY"),
        Fc32 | Fc64 | User => return None,
    })
}

/// Identity and terminal value of a builtin monoid, as C expressions
fn builtin_monoid(op: Opcode, ztype: TypeCode) -> (Option<String>, Option<String>) {
    use Opcode::*;
    let limits = type_limits(ztype);
    let integral = !ztype.is_float() && !ztype.is_complex();
    let s = |v: &str| Some(v.to_string());
    match op {
        Plus | Lor | Lxor | Bor | Bxor => {
            let terminal = match op {
                Lor => s("true"),
                Bor => s("~0"),
                _ => None,
            };
            (s("0"), terminal)
        }
        Times => (s("1"), if integral { s("0") } else { None }),
        Land => (s("1"), s("false")),
        Eq => (s("true"), None),
        Band => (s("~0"), s("0")),
        Min => (limits.map(|l| l.1.to_string()), limits.map(|l| l.0.to_string())),
        Max => (limits.map(|l| l.0.to_string()), limits.map(|l| l.1.to_string())),
        Any => (s("0"), s("0")),
        _ => (None, None),
    }
}

fn emit_monoid(
    out: &mut impl Write,
    spec: &Specialization,
    op: Opcode,
    ztype: Option<TypeCode>,
) -> fmt::Result {
    if let Some(values) = spec.monoid() {
        writeln!(
            out,
            "#define SJ_IDENTITY_INIT(z) memcpy (&(z), sj_monoid_identity, sizeof (z))"
        )?;
        if values.terminal.is_some() {
            writeln!(out, "#define SJ_HAS_TERMINAL 1")?;
            writeln!(
                out,
                "#define SJ_IS_TERMINAL(z) (memcmp (&(z), sj_monoid_terminal, sizeof (z)) == 0)"
            )?;
        } else {
            writeln!(out, "#define SJ_HAS_TERMINAL 0")?;
            writeln!(out, "#define SJ_IS_TERMINAL(z) 0")?;
        }
        return Ok(());
    }
    let (identity, terminal) = match ztype {
        Some(z) => builtin_monoid(op, z),
        None => (None, None),
    };
    let identity = identity.unwrap_or_else(|| "0".to_string());
    writeln!(out, "#define SJ_IDENTITY_INIT(z) (z) = {}", identity)?;
    match terminal {
        Some(t) if op == Opcode::Any => {
            writeln!(out, "#define SJ_HAS_TERMINAL 1")?;
            writeln!(out, "#define SJ_IS_TERMINAL(z) 1 /* {} */", t)?;
        }
        Some(t) => {
            writeln!(out, "#define SJ_HAS_TERMINAL 1")?;
            writeln!(out, "#define SJ_IS_TERMINAL(z) ((z) == {})", t)?;
        }
        None => {
            writeln!(out, "#define SJ_HAS_TERMINAL 0")?;
            writeln!(out, "#define SJ_IS_TERMINAL(z) 0")?;
        }
    }
    Ok(())
}

/// User definitions, types before operators, each once
fn emit_definitions(out: &mut impl Write, spec: &Specialization) -> fmt::Result {
    let mut seen: Vec<&str> = Vec::new();
    for slot in [2, 3, 4, 0, 1] {
        let Some(user) = spec.slots().get(slot) else {
            continue;
        };
        let Some(defn) = user.defn.as_deref() else {
            continue;
        };
        if seen.contains(&user.name.as_str()) {
            continue;
        }
        seen.push(&user.name);
        let guard = format!("SJ_DEFINED_{}", user.name);
        writeln!(out, "#ifndef {}", guard)?;
        writeln!(out, "#define {}", guard)?;
        out.write_str(defn)?;
        if !defn.ends_with('\n') {
            out.write_char('\n')?;
        }
        writeln!(out, "#endif\n")?;
    }
    if let Some(values) = spec.monoid() {
        emit_bytes(out, "sj_monoid_identity", &values.identity)?;
        if let Some(terminal) = &values.terminal {
            emit_bytes(out, "sj_monoid_terminal", terminal)?;
        }
        out.write_char('\n')?;
    }
    Ok(())
}

fn emit_bytes(out: &mut impl Write, name: &str, bytes: &[u8]) -> fmt::Result {
    // C has no zero-length arrays
    let len = bytes.len().max(1);
    write!(out, "static const uint8_t {} [{}] = {{", name, len)?;
    if bytes.is_empty() {
        out.write_str(" 0")?;
    }
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.write_char(',')?;
        }
        write!(out, " 0x{:02x}", b)?;
    }
    out.write_str(" } ;\n")
}

/// Escape `s` as the body of a C string literal. Non-printable and
/// non-ASCII bytes become three-digit octal escapes so the compiled string
/// is byte-identical to `s`.
pub fn escape_c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for b in s.bytes() {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            // avoid trigraphs
            b'?' => out.push_str("\\?"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:03o}", b)),
        }
    }
    out
}

fn emit_query(out: &mut impl Write, spec: &Specialization) -> fmt::Result {
    let identity = spec.identity();
    let version = Version::current();
    let definitions = spec.definitions();
    let empty = MonoidValues {
        identity: Vec::new(),
        terminal: None,
    };
    let monoid = spec.monoid().unwrap_or(&empty);
    let term_len = monoid.terminal.as_ref().map_or(0, Vec::len);

    writeln!(out, "static const char *sj_query_defn [{}] =", DEFINITION_SLOTS)?;
    out.write_str("{\n")?;
    for slot in 0..DEFINITION_SLOTS {
        match definitions.get(slot) {
            Some(d) => {
                writeln!(out, "    \"{}\",", escape_c_string(d))?;
            }
            None => out.write_str("    NULL,\n")?,
        }
    }
    out.write_str("} ;\n\n")?;

    emit_bytes(out, "sj_query_identity", &monoid.identity)?;
    emit_bytes(
        out,
        "sj_query_terminal",
        monoid.terminal.as_deref().unwrap_or(&[]),
    )?;
    out.write_char('\n')?;

    writeln!(out, "SJ_PUBLIC bool {}", QUERY_SYMBOL)?;
    out.write_str(
        "(\n    uint64_t *hash,\n    int *version,\n    const char **defn,\n    \
         const void *id,\n    size_t id_size,\n    const void *term,\n    size_t term_size\n)\n{\n",
    )?;
    writeln!(out, "    (*hash) = 0x{:016x}ULL ;", identity.hash())?;
    writeln!(out, "    version [0] = {} ;", version.major)?;
    writeln!(out, "    version [1] = {} ;", version.minor)?;
    writeln!(out, "    version [2] = {} ;", version.patch)?;
    writeln!(
        out,
        "    for (int k = 0 ; k < {} ; k++) defn [k] = sj_query_defn [k] ;",
        DEFINITION_SLOTS
    )?;
    writeln!(
        out,
        "    if (id_size != {} || term_size != {}) return (false) ;",
        monoid.identity.len(),
        term_len
    )?;
    out.write_str(
        "    if (id_size > 0 && memcmp (id, sj_query_identity, id_size) != 0) return (false) ;\n",
    )?;
    out.write_str(
        "    if (term_size > 0 && memcmp (term, sj_query_terminal, term_size) != 0) return (false) ;\n",
    )?;
    out.write_str("    return (true) ;\n}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{EwiseMethod, EwiseProblem, Format, MxmMethod, MxmProblem, Operand};
    use crate::object::{JitMonoid, JitOp, JitSemiring, JitType};
    use rstest::rstest;

    fn fp64() -> JitType {
        JitType::builtin(TypeCode::Fp64)
    }

    fn ewise(op: &JitOp, ty: &JitType, flipxy: bool) -> Specialization {
        EwiseProblem {
            method: EwiseMethod::Add,
            op,
            flipxy,
            c: Operand::new(ty, Format::Full),
            a: Operand::new(ty, Format::Sparse),
            b: Operand::new(ty, Format::Bitmap),
            mask: None,
        }
        .encode()
    }

    #[test]
    fn test_builtin_ewise_source() {
        let ty = fp64();
        let op = JitOp::binary(Opcode::Minus, &ty);
        let src = render_source(&ewise(&op, &ty, false), "").unwrap();
        let name = ewise(&op, &ty, false).identity().name().to_string();
        assert!(src.contains(&format!("// {}.c", name)));
        assert!(src.contains("#include \"sj_jit_kernel.h\""));
        assert!(src.contains("#define SJ_A_TYPE double"));
        assert!(src.contains("#define SJ_C_FORMAT 3"));
        assert!(src.contains("#define SJ_BINOP(z,x,y) (z) = (x) - (y)"));
        assert!(src.contains("#include \"template/sj_jit_kernel_ewise.c\""));
        assert!(src.contains(&format!("#define sj_jit_kernel {}", name)));
        assert!(src.contains("    NULL,"));
    }

    #[test]
    fn test_flipxy_swaps_operands() {
        let ty = fp64();
        let op = JitOp::binary(Opcode::Minus, &ty);
        let src = render_source(&ewise(&op, &ty, true), "").unwrap();
        assert!(src.contains("#define SJ_BINOP(z,x,y) (z) = (y) - (x)"));
    }

    #[test]
    fn test_user_definitions_are_embedded() {
        let ty = fp64();
        let defn = "void myadd (double *z, const double *x, const double *y) { (*z) = (*x) + (*y) ; }";
        let op = JitOp::user_binary("myadd", ty.clone(), ty.clone(), ty.clone(), Some(defn));
        let src = render_source(&ewise(&op, &ty, false), "// preface\n").unwrap();
        assert!(src.contains("// preface\n"));
        assert!(src.contains("#ifndef SJ_DEFINED_myadd"));
        assert!(src.contains(defn));
        assert!(src.contains("#define SJ_BINOP(z,x,y) myadd (&(z), &(x), &(y))"));
        assert!(src.contains(&format!("    \"{}\",", escape_c_string(defn))));
    }

    #[test]
    fn test_mxm_monoid_macros() {
        let ty = JitType::builtin(TypeCode::Int32);
        let sr = JitSemiring::new(
            JitMonoid::builtin(JitOp::binary(Opcode::Min, &ty)),
            JitOp::binary(Opcode::Plus, &ty),
        );
        let spec = MxmProblem {
            method: MxmMethod::Saxpy,
            semiring: &sr,
            flipxy: false,
            c: Operand::new(&ty, Format::Full),
            a: Operand::new(&ty, Format::Sparse),
            b: Operand::new(&ty, Format::Sparse),
            mask: None,
        }
        .encode();
        let src = render_source(&spec, "").unwrap();
        assert!(src.contains("#define SJ_IDENTITY_INIT(z) (z) = INT32_MAX"));
        assert!(src.contains("#define SJ_IS_TERMINAL(z) ((z) == INT32_MIN)"));
        assert!(src.contains("#define SJ_MULT(z,x,y) (z) = (x) + (y)"));
    }

    #[test]
    fn test_query_embeds_hash_and_monoid() {
        let ty = fp64();
        let add = JitOp::user_binary("myadd", ty.clone(), ty.clone(), ty.clone(), Some("z"));
        let monoid = JitMonoid::user("mymonoid", add, vec![1, 2], Some(vec![3]));
        let spec = crate::encoding::ReduceProblem {
            monoid: &monoid,
            a: Operand::new(&ty, Format::Full),
        }
        .encode();
        let src = render_source(&spec, "").unwrap();
        assert!(src.contains(&format!("(*hash) = 0x{:016x}ULL", spec.identity().hash())));
        assert!(src.contains("static const uint8_t sj_query_identity [2] = { 0x01, 0x02 } ;"));
        assert!(src.contains("if (id_size != 2 || term_size != 1)"));
        assert!(src.contains("#define SJ_HAS_TERMINAL 1"));
    }

    /// Writer that refuses output beyond a byte budget
    struct Bounded(usize);

    impl Write for Bounded {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0 = self.0.checked_sub(s.len()).ok_or(fmt::Error)?;
            Ok(())
        }
    }

    #[test]
    fn test_writer_errors_propagate() {
        let ty = fp64();
        let op = JitOp::binary(Opcode::Plus, &ty);
        let spec = ewise(&op, &ty, false);
        assert_eq!(write_source(&mut Bounded(64), &spec, ""), Err(fmt::Error));
        let full = render_source(&spec, "").unwrap();
        assert!(write_source(&mut Bounded(full.len()), &spec, "").is_ok());
        assert_eq!(
            write_source(&mut Bounded(full.len() - 1), &spec, ""),
            Err(fmt::Error)
        );
    }

    #[rstest]
    #[case("z = x + y", "z = x + y")]
    #[case("a \"b\"", "a \\\"b\\\"")]
    #[case("x\\n", "x\\\\n")]
    #[case("line\nnext", "line\\nnext")]
    #[case("??=", "\\?\\?=")]
    #[case("\u{e9}", "\\303\\251")]
    fn test_escape(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(escape_c_string(input), expected);
    }

    #[test]
    fn test_type_macro() {
        assert_eq!(type_macro("atype"), "SJ_A_TYPE");
        assert_eq!(type_macro("type"), "SJ_TYPE");
    }
}
