// tests/native_compile.rs

mod common;

use common::{builtin_reduce, init_logger};
use semiring_jit::backend::native::ShellCompiler;
use semiring_jit::object::{JitOp, JitType, TypeCode};
use semiring_jit::{ControlLevel, JitConfig, JitContext, Specialization};
use std::ffi::c_void;

const COMPILER: &str = "cc";

fn config(dir: &std::path::Path, level: ControlLevel) -> JitConfig {
    JitConfig::default()
        .with_cache_dir(dir)
        .with_compiler(COMPILER)
        .with_error_log(dir.join("compile.log"))
        .with_control(level)
}

#[test]
fn test_native_reduce_kernel() {
    init_logger();
    if !ShellCompiler::check_availability(COMPILER) {
        eprintln!("Skipping native compile test: C compiler not found.");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let spec = builtin_reduce();
    type ReduceFn = unsafe extern "C" fn(*mut c_void, *const f64, i64);

    let ctx = JitContext::new(config(dir.path(), ControlLevel::On));
    let handle = ctx.load_kernel(&spec).unwrap().expect("kernel compiled");
    let values = [1.0f64, 2.0, 3.5];
    let mut sum = 0.0f64;
    unsafe {
        let f: ReduceFn = handle.entry().cast();
        f(&mut sum as *mut f64 as *mut c_void, values.as_ptr(), values.len() as i64);
    }
    assert_eq!(sum, 6.5);
    assert_eq!(ctx.stats().compilations, 1);

    // a later run picks the library up from disk
    let later = JitContext::new(config(dir.path(), ControlLevel::Load));
    let reused = later.load_kernel(&spec).unwrap().expect("library reused");
    assert_eq!(later.stats().loads, 1);
    assert_eq!(later.stats().compilations, 0);
    assert!(!reused.entry().as_ptr().is_null());
}

#[test]
fn test_native_user_op_redefinition() {
    init_logger();
    if !ShellCompiler::check_availability(COMPILER) {
        eprintln!("Skipping native compile test: C compiler not found.");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let fp64 = JitType::builtin(TypeCode::Fp64);
    let op = |body: &str| {
        JitOp::user_binary(
            "my_op",
            fp64.clone(),
            fp64.clone(),
            fp64.clone(),
            Some(&format!(
                "void my_op (double *z, const double *x, const double *y) {{ {} ; }}",
                body
            )),
        )
    };
    type BinaryFn = unsafe extern "C" fn(*mut c_void, *const c_void, *const c_void);
    let call = |handle: &semiring_jit::KernelHandle, x: f64, y: f64| {
        let mut z = 0.0f64;
        unsafe {
            let f: BinaryFn = handle.entry().cast();
            f(
                &mut z as *mut f64 as *mut c_void,
                &x as *const f64 as *const c_void,
                &y as *const f64 as *const c_void,
            );
        }
        z
    };

    let ctx = JitContext::new(config(dir.path(), ControlLevel::On));
    let plus = ctx
        .load_kernel(&Specialization::user_op(&op("(*z) = (*x) + (*y)")))
        .unwrap()
        .expect("kernel compiled");
    assert_eq!(call(&plus, 2.0, 3.0), 5.0);

    // the old kernel stays open while its replacement is built
    let minus = ctx
        .load_kernel(&Specialization::user_op(&op("(*z) = (*x) - (*y)")))
        .unwrap()
        .expect("kernel rebuilt");
    assert_eq!(call(&minus, 2.0, 3.0), -1.0);
    assert_eq!(call(&plus, 2.0, 3.0), 5.0);
    assert!(!plus.same_kernel(&minus));
    assert_eq!(ctx.stats().compilations, 2);
    assert_eq!(ctx.control(), ControlLevel::On);

    // and back again, with both earlier handles alive
    let plus_again = ctx
        .load_kernel(&Specialization::user_op(&op("(*z) = (*x) + (*y)")))
        .unwrap()
        .expect("kernel rebuilt");
    assert_eq!(call(&plus_again, 2.0, 3.0), 5.0);
    assert_eq!(call(&minus, 2.0, 3.0), -1.0);
    assert_eq!(ctx.control(), ControlLevel::On);

    // the private copies are gone; the canonical library stays for reuse
    let library = minus.library_path().unwrap().to_path_buf();
    let file_name = library.file_name().unwrap().to_string_lossy().into_owned();
    let copies: Vec<_> = std::fs::read_dir(library.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(&file_name))
        .collect();
    assert_eq!(copies, vec![file_name]);
}

#[test]
fn test_missing_compiler_limits_to_load() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let ctx = JitContext::new(config(dir.path(), ControlLevel::On).with_compiler("sj-no-such-cc"));
    assert!(ctx.control() <= ControlLevel::Load);
    assert!(ctx.load_kernel(&builtin_reduce()).unwrap().is_none());
    assert_eq!(ctx.stats().compilations, 0);
}
