//! The JIT context: cache, paths, control level and the public API
//!
//! # Locking
//!
//! All mutation happens with the state mutex held: control changes, path
//! changes, builds, inserts, removals and sweeps. The table sits in its own
//! `RwLock`, always taken *after* the mutex, so that a hit can be served
//! with only a read lock when the level is at least `RUN` and the family
//! does not require validation. Everything else (misses, unchecked PreJIT
//! entries, user operator and type kernels) takes the mutex, which makes
//! the mutex the only thing needed for at most one build per identity.

use crate::backend::Toolchain;
use crate::cache::{KernelCache, KernelHandle};
use crate::config::JitConfig;
use crate::control::{ControlLevel, ControlPolicy};
use crate::encoding::Specialization;
use crate::error::{JitError, Result};
use crate::paths::GlobalPaths;
use crate::pipeline::{self, Pipeline};
use crate::prejit::{self, PreJitKernel};
use crate::validator::DefinitionValidator;
use log::{debug, info, trace, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

/// Counters of a [`JitContext`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitStats {
    pub hits: u64,
    pub misses: u64,
    pub compilations: u64,
    /// Libraries reused from the cache directory
    pub loads: u64,
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    compilations: AtomicU64,
    loads: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct JitState {
    paths: GlobalPaths,
}

/// Process-wide JIT state.
///
/// Usually one per process, through [`JitContext::global`]; tests and
/// embedders that need a private cache directory build their own.
pub struct JitContext {
    state: Mutex<JitState>,
    cache: RwLock<KernelCache>,
    control: ControlPolicy,
    toolchain: Toolchain,
    counters: Counters,
}

impl JitContext {
    /// Context using the native compiler and loader, without PreJIT kernels
    pub fn new(config: JitConfig) -> Self {
        Self::with_toolchain(config, Toolchain::native(), &[])
    }

    /// Context with an explicit toolchain and PreJIT table
    pub fn with_toolchain(config: JitConfig, toolchain: Toolchain, prejit: &[PreJitKernel]) -> Self {
        let mut paths = GlobalPaths::new(
            config.cache_dir,
            config.compiler,
            config.compile_flags,
            config.link_flags,
            config.libraries,
        );
        paths.set_source_preface(config.source_preface);
        paths.set_error_log(config.error_log);

        let control = ControlPolicy::new(config.control);
        if let Err(e) = prepare(&mut paths, &control) {
            warn!("jit: {}", e);
        }
        check_compiler(&toolchain, &paths, &control);

        let mut cache = KernelCache::new();
        if let Err(e) = prejit::reconcile(prejit, &mut cache) {
            control.lower(ControlLevel::Pause, &e.to_string());
        }
        info!(
            "jit: context ready at {} ({} resident kernels)",
            control.get(),
            cache.len()
        );

        Self {
            state: Mutex::new(JitState { paths }),
            cache: RwLock::new(cache),
            control,
            toolchain,
            counters: Counters::default(),
        }
    }

    /// Shared context built from the environment on first use
    pub fn global() -> &'static JitContext {
        static GLOBAL: OnceLock<JitContext> = OnceLock::new();
        GLOBAL.get_or_init(|| JitContext::new(JitConfig::from_env()))
    }

    fn lock_state(&self) -> MutexGuard<'_, JitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, KernelCache> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, KernelCache> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find or build the kernel for `spec`.
    ///
    /// `Ok(None)` means "use the generic kernel". Only allocation failures
    /// and precondition violations are returned as errors.
    pub fn load_kernel(&self, spec: &Specialization) -> Result<Option<KernelHandle>> {
        let identity = spec.identity();
        if !identity.is_jitable() {
            Counters::bump(&self.counters.misses);
            return Ok(None);
        }

        let level = self.control.get();
        if level.allows_fast_path() && !identity.family().always_validate() {
            let cache = self.read_cache();
            match cache.lookup(identity) {
                Some(entry) if !entry.prejit().is_unchecked() => {
                    Counters::bump(&self.counters.hits);
                    trace!("jit: hit {}", identity.name());
                    return Ok(Some(entry.handle()));
                }
                None if !level.can_load() => {
                    Counters::bump(&self.counters.misses);
                    return Ok(None);
                }
                _ => {}
            }
        }

        let state = self.lock_state();
        match self.load_locked(&state, spec) {
            Ok(found) => Ok(found),
            Err(e) => {
                if let Some(to) = e.degrades_to() {
                    self.control.lower(to, &e.to_string());
                }
                if e.is_hard() {
                    return Err(e);
                }
                debug!("jit: {} not available: {}", identity.name(), e);
                Ok(None)
            }
        }
    }

    fn load_locked(&self, state: &JitState, spec: &Specialization) -> Result<Option<KernelHandle>> {
        let identity = spec.identity();
        let level = self.control.get();
        if level == ControlLevel::Off {
            self.write_cache().sweep(false);
            Counters::bump(&self.counters.misses);
            return Ok(None);
        }

        let verdict = self.read_cache().lookup(identity).map(|entry| {
            if !entry.needs_validation() {
                return Ok((entry.handle(), false));
            }
            let definitions = spec.definitions();
            let report = entry.kernel().query(spec.monoid());
            DefinitionValidator::new(identity.hash(), &definitions)
                .check(report.as_ref())
                .map(|()| (entry.handle(), entry.prejit().is_unchecked()))
        });
        match verdict {
            Some(Ok((handle, unchecked))) => {
                if unchecked {
                    self.write_cache().mark_checked(identity);
                }
                Counters::bump(&self.counters.hits);
                trace!("jit: hit {}", identity.name());
                return Ok(Some(handle));
            }
            Some(Err(reason)) => {
                info!("jit: stale {}: {}", identity.name(), reason);
                self.write_cache().remove(identity);
            }
            None => {}
        }
        Counters::bump(&self.counters.misses);

        if !level.can_load() {
            debug!("jit: miss {} at {}", identity.name(), level);
            return Ok(None);
        }
        let pipeline = Pipeline {
            paths: &state.paths,
            control: &self.control,
            toolchain: &self.toolchain,
        };
        let Some(built) = pipeline.run(spec)? else {
            return Ok(None);
        };
        if built.compiled {
            Counters::bump(&self.counters.compilations);
        } else {
            Counters::bump(&self.counters.loads);
        }
        let handle = KernelHandle::new(Arc::clone(&built.kernel));
        pipeline::install(&mut self.write_cache(), &self.control, identity, built.kernel)?;
        Ok(Some(handle))
    }

    /// Set the control level, clamped to what this build allows. Switching
    /// to `OFF` evicts everything except PreJIT and user object kernels.
    /// Returns the level applied.
    pub fn set_control(&self, level: ControlLevel) -> ControlLevel {
        let _state = self.lock_state();
        let applied = self.control.set(level);
        if applied == ControlLevel::Off {
            let evicted = self.write_cache().sweep(false);
            debug!("jit: OFF evicted {} kernels", evicted);
        }
        applied
    }

    pub fn control(&self) -> ControlLevel {
        self.control.get()
    }

    /// Move the cache to `path`, creating it and extracting the bundled
    /// sources there. On failure the control level drops as for a failed
    /// build and the error is returned.
    pub fn set_cache_path(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(JitError::InvalidArgument("empty cache path".to_string()));
        }
        let mut state = self.lock_state();
        state.paths.set_cache_dir(Some(path));
        prepare(&mut state.paths, &self.control)
    }

    /// Current cache directory; `None` if there is no usable one
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.lock_state().paths.cache_dir().map(PathBuf::from)
    }

    /// Use `compiler` for later builds. If it cannot be run, compiling
    /// is switched off (`LOAD`).
    pub fn set_compiler(&self, compiler: impl Into<String>) {
        let mut state = self.lock_state();
        state.paths.set_compiler(compiler);
        check_compiler(&self.toolchain, &state.paths, &self.control);
    }

    pub fn compiler(&self) -> String {
        self.lock_state().paths.compiler().to_string()
    }

    pub fn set_compile_flags(&self, flags: impl Into<String>) {
        self.lock_state().paths.set_compile_flags(flags);
    }

    pub fn compile_flags(&self) -> String {
        self.lock_state().paths.compile_flags().to_string()
    }

    pub fn set_link_flags(&self, flags: impl Into<String>) {
        self.lock_state().paths.set_link_flags(flags);
    }

    pub fn link_flags(&self) -> String {
        self.lock_state().paths.link_flags().to_string()
    }

    pub fn set_libraries(&self, libraries: impl Into<String>) {
        self.lock_state().paths.set_libraries(libraries);
    }

    pub fn libraries(&self) -> String {
        self.lock_state().paths.libraries().to_string()
    }

    pub fn set_source_preface(&self, preface: impl Into<String>) {
        self.lock_state().paths.set_source_preface(preface);
    }

    pub fn source_preface(&self) -> String {
        self.lock_state().paths.source_preface().to_string()
    }

    pub fn set_error_log(&self, path: Option<PathBuf>) {
        self.lock_state().paths.set_error_log(path);
    }

    pub fn error_log(&self) -> Option<PathBuf> {
        self.lock_state().paths.error_log().map(PathBuf::from)
    }

    /// Evict kernels: all of them if `free_all`, otherwise all but PreJIT
    /// and user object kernels. Returns the number evicted.
    pub fn flush(&self, free_all: bool) -> usize {
        let _state = self.lock_state();
        self.write_cache().sweep(free_all)
    }

    pub fn stats(&self) -> JitStats {
        let cache = self.read_cache();
        JitStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            compilations: self.counters.compilations.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            evictions: cache.evictions(),
            entries: cache.len(),
        }
    }
}

impl std::fmt::Debug for JitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitContext")
            .field("control", &self.control.get())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Drop for JitContext {
    fn drop(&mut self) {
        let cache = self.cache.get_mut().unwrap_or_else(PoisonError::into_inner);
        let evicted = cache.sweep(true);
        debug!("jit: context dropped, {} kernels released", evicted);
    }
}

/// Drop to `LOAD` if compiling is allowed but the compiler cannot be run
fn check_compiler(toolchain: &Toolchain, paths: &GlobalPaths, control: &ControlPolicy) {
    if control.get().can_compile() && !toolchain.compiler.is_available(paths.compiler()) {
        control.lower(
            ControlLevel::Load,
            &format!("compiler '{}' unavailable", paths.compiler()),
        );
    }
}

/// Establish the directories and extract the bundled sources, lowering
/// the control level on failure
fn prepare(paths: &mut GlobalPaths, control: &ControlPolicy) -> Result<()> {
    let result = paths
        .establish()
        .and_then(|()| paths.extract_bundled_sources().map(|_| ()));
    if let Err(e) = &result {
        if let Some(to) = e.degrades_to() {
            control.lower(to, &e.to_string());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CompileJob, KernelCompiler, KernelLibrary, LibraryLoader};
    use std::path::Path;

    struct Unusable;

    impl KernelCompiler for Unusable {
        fn compile(&self, job: &CompileJob) -> Result<()> {
            Err(JitError::CompileFailed {
                kernel: job.kernel.clone(),
                message: "no compiler".into(),
            })
        }

        fn is_available(&self, _compiler: &str) -> bool {
            false
        }
    }

    impl LibraryLoader for Unusable {
        fn open(&self, path: &Path) -> Result<Box<dyn KernelLibrary>> {
            Err(JitError::LoadFailed {
                path: path.to_path_buf(),
                reason: "no loader".into(),
            })
        }
    }

    fn toolchain() -> Toolchain {
        Toolchain::new(Arc::new(Unusable), Arc::new(Unusable))
    }

    /// Compiler that only answers to one name
    struct OnlyCompiler(&'static str);

    impl KernelCompiler for OnlyCompiler {
        fn compile(&self, _job: &CompileJob) -> Result<()> {
            Ok(())
        }

        fn is_available(&self, compiler: &str) -> bool {
            compiler == self.0
        }
    }

    #[test]
    fn test_no_cache_dir_limits_to_run() {
        let _ = env_logger::builder().is_test(true).try_init();
        let ctx = JitContext::with_toolchain(JitConfig::default().without_cache_dir(), toolchain(), &[]);
        assert_eq!(ctx.control(), ControlLevel::Run);
        assert_eq!(ctx.cache_path(), None);
    }

    #[test]
    fn test_unavailable_compiler_limits_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = JitContext::with_toolchain(
            JitConfig::default().with_cache_dir(dir.path()),
            toolchain(),
            &[],
        );
        assert_eq!(ctx.control(), ControlLevel::Load);
        assert!(dir.path().join("src").join(crate::paths::VERSION_MARKER).exists());
    }

    #[test]
    fn test_changing_compiler_rechecks_it() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = Toolchain::new(Arc::new(OnlyCompiler("cc")), Arc::new(Unusable));
        let config = JitConfig::default()
            .with_cache_dir(dir.path())
            .with_compiler("cc")
            .with_control(ControlLevel::On);
        let ctx = JitContext::with_toolchain(config.clone(), toolchain.clone(), &[]);
        assert_eq!(ctx.control(), ControlLevel::max_allowed());

        ctx.set_compiler("sj-no-such-cc");
        if ControlLevel::max_allowed().can_compile() {
            assert_eq!(ctx.control(), ControlLevel::Load);
        }
        // a working compiler does not raise the level again
        ctx.set_compiler("cc");
        assert!(ctx.control() <= ControlLevel::Load);

        let missing = JitContext::with_toolchain(config.with_compiler("gcc-none"), toolchain, &[]);
        assert!(missing.control() <= ControlLevel::Load);
    }

    #[test]
    fn test_set_cache_path() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = JitContext::with_toolchain(JitConfig::default().without_cache_dir(), toolchain(), &[]);
        assert!(matches!(
            ctx.set_cache_path(""),
            Err(JitError::InvalidArgument(_))
        ));
        ctx.set_cache_path(dir.path().join("cache")).unwrap();
        assert_eq!(ctx.cache_path(), Some(dir.path().join("cache")));
        // the earlier failure is not undone by a good path
        assert_eq!(ctx.control(), ControlLevel::Run);

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            ctx.set_cache_path(file.join("cache")),
            Err(JitError::PathUnavailable { .. })
        ));
        assert_eq!(ctx.cache_path(), None);
    }

    #[test]
    fn test_setters_round_trip() {
        let ctx = JitContext::with_toolchain(JitConfig::default().without_cache_dir(), toolchain(), &[]);
        ctx.set_compiler("clang");
        ctx.set_compile_flags("-O2");
        ctx.set_link_flags("-shared -fPIC");
        ctx.set_libraries("");
        ctx.set_source_preface("#define FOO 1");
        ctx.set_error_log(Some(PathBuf::from("/tmp/err.log")));
        assert_eq!(ctx.compiler(), "clang");
        assert_eq!(ctx.compile_flags(), "-O2");
        assert_eq!(ctx.link_flags(), "-shared -fPIC");
        assert_eq!(ctx.libraries(), "");
        assert_eq!(ctx.source_preface(), "#define FOO 1");
        assert_eq!(ctx.error_log(), Some(PathBuf::from("/tmp/err.log")));
    }

    #[test]
    fn test_set_control_clamps_and_raises_explicitly() {
        let ctx = JitContext::with_toolchain(JitConfig::default().without_cache_dir(), toolchain(), &[]);
        assert_eq!(ctx.set_control(ControlLevel::Off), ControlLevel::Off);
        assert_eq!(ctx.set_control(ControlLevel::On), ControlLevel::max_allowed());
        assert_eq!(ctx.control(), ControlLevel::max_allowed());
        assert_eq!(ctx.stats(), JitStats::default());
    }
}
