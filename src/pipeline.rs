//! Build pipeline for one kernel request
//!
//! `name -> try existing library -> emit source -> compile/link -> load ->
//! resolve entry -> validate`. Inserting the result into the cache is the
//! caller's last step ([`install`]), done under the table's write lock.
//!
//! Failures come back as [`JitError`]s; [`JitError::degrades_to`] says how
//! far the control level drops because of them.

use crate::backend::{CompileJob, KERNEL_SYMBOL, KernelLibrary, KernelManifest, Toolchain};
use crate::cache::{KernelCache, LoadedKernel, PreJitState};
use crate::codegen::render_source;
use crate::control::{ControlLevel, ControlPolicy};
use crate::encoding::Specialization;
use crate::error::{JitError, Result};
use crate::identity::KernelIdentity;
use crate::paths::GlobalPaths;
use crate::validator::{DefinitionValidator, Version};
use log::{debug, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

/// A kernel the pipeline produced, not yet in the cache
#[derive(Debug)]
pub struct Built {
    pub kernel: Arc<LoadedKernel>,
    /// Whether the compiler ran for it (as opposed to a load from disk)
    pub compiled: bool,
}

/// One build request. Runs with the state lock held.
pub struct Pipeline<'a> {
    pub paths: &'a GlobalPaths,
    pub control: &'a ControlPolicy,
    pub toolchain: &'a Toolchain,
}

impl Pipeline<'_> {
    /// Produce a kernel for `spec`, from disk or by compiling it.
    ///
    /// `Ok(None)` means "not available at the current level"; the control
    /// level may have been lowered on the way.
    pub fn run(&self, spec: &Specialization) -> Result<Option<Built>> {
        let level = self.control.get();
        if !level.can_load() {
            return Ok(None);
        }
        let identity = spec.identity();
        let name = identity.name().to_string();
        let library = self.paths.library_path(&name)?;

        if library.exists() {
            if let Some(kernel) = self.open_existing(&library, spec, &name) {
                info!("jit: loaded {} from {}", name, library.display());
                return Ok(Some(Built {
                    kernel,
                    compiled: false,
                }));
            }
            if !level.can_compile() {
                // rebuilding is not allowed; keep the artifact as it is
                self.control
                    .lower(ControlLevel::Run, &format!("stale library {}", name));
                return Ok(None);
            }
            remove_library(&library)?;
        } else if !level.can_compile() {
            debug!("jit: {} not on disk and compiling is off at {}", name, level);
            return Ok(None);
        }

        self.compile(spec, &name, &library)?;
        let kernel = self.open_fresh(&library, spec, &name)?;
        Ok(Some(Built {
            kernel,
            compiled: true,
        }))
    }

    /// Open a library left by an earlier build and check it. `None` if it
    /// cannot be used for `spec`.
    fn open_existing(
        &self,
        library: &Path,
        spec: &Specialization,
        name: &str,
    ) -> Option<Arc<LoadedKernel>> {
        let lib = match self.toolchain.loader.open(library) {
            Ok(lib) => lib,
            Err(e) => {
                info!("jit: cannot reuse {}: {}", name, e);
                return None;
            }
        };
        match accept(lib, spec, name) {
            Ok(kernel) => Some(kernel),
            Err(e) => {
                info!("jit: stale {}: {}", name, e);
                None
            }
        }
    }

    fn compile(&self, spec: &Specialization, name: &str, library: &Path) -> Result<()> {
        let identity = spec.identity();
        let source = self.paths.source_path(name)?;
        let text = render_source(spec, self.paths.source_preface()).map_err(|e| {
            JitError::CompileFailed {
                kernel: name.to_string(),
                message: format!("cannot render source: {}", e),
            }
        })?;
        fs::write(&source, text)?;

        let job = CompileJob {
            kernel: name.to_string(),
            source,
            library: library.to_path_buf(),
            command: self.paths.compile_command(name)?,
            error_log: self.paths.error_log().map(Path::to_path_buf),
            manifest: manifest(identity, spec),
        };
        info!("jit: compiling {}", name);
        if let Err(e) = self.toolchain.compiler.compile(&job) {
            // the link step may still have produced a library
            warn!("jit: {}", e);
        }
        if !library.exists() {
            return Err(JitError::CompileFailed {
                kernel: name.to_string(),
                message: "no library produced".to_string(),
            });
        }
        Ok(())
    }

    fn open_fresh(
        &self,
        library: &Path,
        spec: &Specialization,
        name: &str,
    ) -> Result<Arc<LoadedKernel>> {
        let lib = self.toolchain.loader.open(library)?;
        accept(lib, spec, name)
    }
}

/// Resolve the entry point and validate what the library reports
fn accept(
    lib: Box<dyn KernelLibrary>,
    spec: &Specialization,
    name: &str,
) -> Result<Arc<LoadedKernel>> {
    let entry = lib.entry().ok_or_else(|| JitError::SymbolMissing {
        kernel: name.to_string(),
        symbol: KERNEL_SYMBOL,
    })?;
    let definitions = spec.definitions();
    let report = lib.query(spec.monoid());
    if let Err(reason) =
        DefinitionValidator::new(spec.identity().hash(), &definitions).check(report.as_ref())
    {
        debug!("jit: {} rejected: {}", name, reason);
        return Err(JitError::StaleDefinition {
            kernel: name.to_string(),
        });
    }
    Ok(Arc::new(LoadedKernel::from_library(entry, lib)))
}

fn manifest(identity: &KernelIdentity, spec: &Specialization) -> KernelManifest {
    KernelManifest {
        hash: identity.hash(),
        version: Version::current(),
        definitions: spec.definitions(),
        monoid: spec.monoid().cloned(),
    }
}

fn remove_library(library: &Path) -> Result<()> {
    match fs::remove_file(library) {
        Ok(()) => {
            debug!("jit: removed {}", library.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Insert a built kernel. On allocation failure the kernel is dropped
/// (closing its library) and the control level drops to `PAUSE`.
pub fn install(
    cache: &mut KernelCache,
    control: &ControlPolicy,
    identity: &KernelIdentity,
    kernel: Arc<LoadedKernel>,
) -> Result<()> {
    cache
        .insert(identity.clone(), kernel, PreJitState::None)
        .inspect_err(|e| {
            control.lower(ControlLevel::Pause, &e.to_string());
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KernelCompiler, KernelFn, LibraryLoader, QueryFn};
    use crate::encoding::{Format, ReduceProblem};
    use crate::object::{JitMonoid, JitOp, JitType, Opcode, TypeCode};
    use crate::validator::{MonoidValues, QueryReport};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    unsafe extern "C" fn noop() {}

    /// Library answering queries from a stored manifest
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
            self.has_entry.then(|| KernelFn::new(noop))
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

    #[derive(Default)]
    struct Fake {
        built: Mutex<Vec<(PathBuf, KernelManifest)>>,
        compiles: AtomicUsize,
        produce: bool,
        has_entry: bool,
    }

    impl KernelCompiler for Fake {
        fn compile(&self, job: &CompileJob) -> Result<()> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            if !self.produce {
                return Err(JitError::CompileFailed {
                    kernel: job.kernel.clone(),
                    message: "exit 1".into(),
                });
            }
            fs::write(&job.library, b"")?;
            self.built
                .lock()
                .unwrap()
                .push((job.library.clone(), job.manifest.clone()));
            Ok(())
        }
    }

    impl LibraryLoader for Fake {
        fn open(&self, path: &Path) -> Result<Box<dyn KernelLibrary>> {
            let built = self.built.lock().unwrap();
            let manifest = built
                .iter()
                .rev()
                .find(|(p, _)| p == path)
                .map(|(_, m)| m.clone())
                .ok_or_else(|| JitError::LoadFailed {
                    path: path.to_path_buf(),
                    reason: "not built".into(),
                })?;
            Ok(Box::new(FakeLibrary {
                path: path.to_path_buf(),
                manifest,
                has_entry: self.has_entry,
            }))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        paths: GlobalPaths,
        fake: Arc<Fake>,
        toolchain: Toolchain,
    }

    fn fixture(produce: bool, has_entry: bool) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let mut paths = GlobalPaths::new(
            Some(dir.path().to_path_buf()),
            "cc".into(),
            String::new(),
            String::new(),
            String::new(),
        );
        paths.establish().unwrap();
        let fake = Arc::new(Fake {
            produce,
            has_entry,
            ..Default::default()
        });
        let toolchain = Toolchain::new(fake.clone(), fake.clone());
        Fixture {
            _dir: dir,
            paths,
            fake,
            toolchain,
        }
    }

    fn spec() -> Specialization {
        let fp64 = JitType::builtin(TypeCode::Fp64);
        let plus = JitMonoid::builtin(JitOp::binary(Opcode::Plus, &fp64));
        ReduceProblem {
            monoid: &plus,
            a: crate::encoding::Operand::new(&fp64, Format::Sparse),
        }
        .encode()
    }

    #[test]
    fn test_compiles_then_reuses_library() {
        let f = fixture(true, true);
        let control = ControlPolicy::new(ControlLevel::On);
        let p = Pipeline {
            paths: &f.paths,
            control: &control,
            toolchain: &f.toolchain,
        };
        let spec = spec();
        let built = p.run(&spec).unwrap().unwrap();
        assert!(built.compiled);
        let name = spec.identity().name().to_string();
        assert!(f.paths.source_path(&name).unwrap().exists());

        // a second process would find the library on disk
        let again = p.run(&spec).unwrap().unwrap();
        assert!(!again.compiled);
        assert_eq!(f.fake.compiles.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_level_never_compiles() {
        let f = fixture(true, true);
        let control = ControlPolicy::new(ControlLevel::Load);
        let p = Pipeline {
            paths: &f.paths,
            control: &control,
            toolchain: &f.toolchain,
        };
        assert!(p.run(&spec()).unwrap().is_none());
        assert_eq!(f.fake.compiles.load(Ordering::SeqCst), 0);
        assert_eq!(control.get(), ControlLevel::Load);
    }

    #[test]
    fn test_failed_compile_without_library() {
        let f = fixture(false, true);
        let control = ControlPolicy::new(ControlLevel::On);
        let p = Pipeline {
            paths: &f.paths,
            control: &control,
            toolchain: &f.toolchain,
        };
        let err = p.run(&spec()).unwrap_err();
        assert!(matches!(err, JitError::CompileFailed { .. }));
        assert_eq!(err.degrades_to(), Some(ControlLevel::Run));
    }

    #[test]
    fn test_missing_entry_point() {
        let f = fixture(true, false);
        let control = ControlPolicy::new(ControlLevel::On);
        let p = Pipeline {
            paths: &f.paths,
            control: &control,
            toolchain: &f.toolchain,
        };
        let err = p.run(&spec()).unwrap_err();
        assert!(matches!(
            err,
            JitError::SymbolMissing {
                symbol: KERNEL_SYMBOL,
                ..
            }
        ));
    }

    #[test]
    fn test_install_keeps_table_consistent() {
        let control = ControlPolicy::new(ControlLevel::On);
        let mut cache = KernelCache::new();
        let spec = spec();
        unsafe extern "C" fn query(
            _: *mut u64,
            _: *mut std::ffi::c_int,
            _: *mut *const std::ffi::c_char,
            _: *const std::ffi::c_void,
            _: usize,
            _: *const std::ffi::c_void,
            _: usize,
        ) -> bool {
            false
        }
        let kernel = Arc::new(LoadedKernel::prejit(
            KernelFn::new(noop),
            unsafe { QueryFn::new(query) },
            0,
        ));
        install(&mut cache, &control, spec.identity(), kernel).unwrap();
        assert!(cache.contains(spec.identity()));
        assert_eq!(control.get(), ControlLevel::On);
    }
}
