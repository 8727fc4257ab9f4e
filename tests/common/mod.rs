//! In-memory toolchain shared by the integration tests.
//!
//! The compiler records each job's manifest and touches the library file;
//! the loader answers queries from the recorded manifest, so validation
//! behaves as it would with a real kernel.

#![allow(dead_code)]

use semiring_jit::Toolchain;
use semiring_jit::backend::{
    CompileJob, KernelCompiler, KernelFn, KernelLibrary, KernelManifest, LibraryLoader,
};
use semiring_jit::encoding::{Format, Operand, ReduceProblem};
use semiring_jit::object::{JitMonoid, JitOp, JitType, Opcode, TypeCode};
use semiring_jit::validator::{MonoidValues, QueryReport};
use semiring_jit::{JitError, Result, Specialization};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

unsafe extern "C" fn fake_kernel() {}

struct FakeLibrary {
    path: PathBuf,
    manifest: KernelManifest,
    has_entry: bool,
}

impl KernelLibrary for FakeLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn entry(&self) -> Option<KernelFn> {
        self.has_entry.then(|| KernelFn::new(fake_kernel))
    }

    fn query(&self, monoid: Option<&MonoidValues>) -> Option<QueryReport> {
        Some(QueryReport {
            hash: self.manifest.hash,
            version: self.manifest.version,
            definitions: self.manifest.definitions.clone(),
            monoid_matches: monoid == self.manifest.monoid.as_ref(),
        })
    }
}

/// Fake compiler and loader with invocation counters
#[derive(Default)]
pub struct FakeToolchain {
    built: Mutex<HashMap<PathBuf, KernelManifest>>,
    compiles: AtomicUsize,
    opens: AtomicUsize,
    /// Compile jobs fail without producing a library
    pub fail_compile: AtomicBool,
    /// Libraries open but export no kernel entry point
    pub drop_entry: AtomicBool,
    /// Time each compile takes
    pub delay: Option<Duration>,
}

impl FakeToolchain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn toolchain(self: &Arc<Self>) -> Toolchain {
        Toolchain::new(self.clone(), self.clone())
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Manifest of the last build of `library`
    pub fn manifest(&self, library: &Path) -> Option<KernelManifest> {
        self.built.lock().unwrap().get(library).cloned()
    }
}

impl KernelCompiler for FakeToolchain {
    fn compile(&self, job: &CompileJob) -> Result<()> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        assert!(job.source.exists(), "source written before compiling");
        if self.fail_compile.load(Ordering::SeqCst) {
            return Err(JitError::CompileFailed {
                kernel: job.kernel.clone(),
                message: "exit status 1".into(),
            });
        }
        fs::write(&job.library, b"fake")?;
        self.built
            .lock()
            .unwrap()
            .insert(job.library.clone(), job.manifest.clone());
        Ok(())
    }
}

impl LibraryLoader for FakeToolchain {
    fn open(&self, path: &Path) -> Result<Box<dyn KernelLibrary>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let manifest = self.manifest(path).ok_or_else(|| JitError::LoadFailed {
            path: path.to_path_buf(),
            reason: "not a library".into(),
        })?;
        Ok(Box::new(FakeLibrary {
            path: path.to_path_buf(),
            manifest,
            has_entry: !self.drop_entry.load(Ordering::SeqCst),
        }))
    }
}

/// `sum(A)` over FP64, a builtin specialization
pub fn builtin_reduce() -> Specialization {
    let fp64 = JitType::builtin(TypeCode::Fp64);
    let plus = JitMonoid::builtin(JitOp::binary(Opcode::Plus, &fp64));
    ReduceProblem {
        monoid: &plus,
        a: Operand::new(&fp64, Format::Sparse),
    }
    .encode()
}

/// A user binary operator `my_op` over FP64 with the given definition
pub fn user_op(defn: &str) -> JitOp {
    let fp64 = JitType::builtin(TypeCode::Fp64);
    JitOp::user_binary("my_op", fp64.clone(), fp64.clone(), fp64, Some(defn))
}
