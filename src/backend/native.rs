//! OS-backed toolchain: `sh -c` for the build command, `libloading` for
//! opening the result.
//!
//! The platform loader hands back an already open library when asked for
//! a path it has seen before, even if the file was rebuilt since. Every
//! open therefore goes through a private copy with a name no earlier open
//! used; the copy is unlinked as soon as the platform allows it.

use super::{
    CompileJob, KERNEL_SYMBOL, KernelCompiler, KernelFn, KernelLibrary, LibraryLoader,
    QUERY_SYMBOL, QueryFn, RawQueryFn,
};
use crate::error::{JitError, Result};
use crate::validator::{MonoidValues, QueryReport};
use libloading::Library;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{self, Command};
use std::sync::atomic::{AtomicU64, Ordering};

/// Distinguishes the private copies made by this process
static OPEN_GENERATION: AtomicU64 = AtomicU64::new(0);

/// A kernel library opened with `dlopen`
pub struct NativeLibrary {
    path: PathBuf,
    entry: Option<KernelFn>,
    query: Option<QueryFn>,
    library: Option<Library>,
    /// Private copy still on disk, removed once the library is closed
    copy: Option<PathBuf>,
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        drop(self.library.take());
        if let Some(copy) = self.copy.take() {
            remove_copy(&copy);
        }
    }
}

impl KernelLibrary for NativeLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn entry(&self) -> Option<KernelFn> {
        self.entry
    }

    fn query(&self, monoid: Option<&MonoidValues>) -> Option<QueryReport> {
        self.query.map(|q| q.query(monoid))
    }
}

/// Opens libraries with the platform loader
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl NativeLoader {
    /// Path of the next private copy of `path`:
    /// `<file>.<pid>.<generation>` in the same directory
    fn private_copy_path(path: &Path) -> PathBuf {
        let generation = OPEN_GENERATION.fetch_add(1, Ordering::Relaxed);
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}.{}", process::id(), generation));
        path.with_file_name(name)
    }
}

fn remove_copy(copy: &Path) {
    if let Err(e) = fs::remove_file(copy) {
        debug!("jit: keeping {}: {}", copy.display(), e);
    }
}

impl LibraryLoader for NativeLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn KernelLibrary>> {
        let load_failed = |reason: String| JitError::LoadFailed {
            path: path.to_path_buf(),
            reason,
        };
        let copy = Self::private_copy_path(path);
        fs::copy(path, &copy).map_err(|e| load_failed(e.to_string()))?;

        // SAFETY: kernel libraries have no initialisers beyond the C runtime's
        let library = match unsafe { Library::new(&copy) } {
            Ok(library) => library,
            Err(e) => {
                remove_copy(&copy);
                return Err(load_failed(e.to_string()));
            }
        };
        // a mapped library outlives its directory entry on unix
        let copy = if cfg!(unix) {
            remove_copy(&copy);
            None
        } else {
            Some(copy)
        };

        // SAFETY: both symbols are generated with exactly these signatures
        let entry = unsafe { library.get::<unsafe extern "C" fn()>(KERNEL_SYMBOL.as_bytes()) }
            .ok()
            .map(|sym| KernelFn::new(*sym));
        let query = unsafe { library.get::<RawQueryFn>(QUERY_SYMBOL.as_bytes()) }
            .ok()
            .map(|sym| unsafe { QueryFn::new(*sym) });

        debug!(
            "jit: opened {} (entry: {}, query: {})",
            path.display(),
            entry.is_some(),
            query.is_some()
        );
        Ok(Box::new(NativeLibrary {
            path: path.to_path_buf(),
            entry,
            query,
            library: Some(library),
            copy,
        }))
    }
}

/// Runs the build command through `sh -c`
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellCompiler;

impl ShellCompiler {
    /// Whether `compiler --version` runs successfully
    pub fn check_availability(compiler: &str) -> bool {
        Command::new(compiler)
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

impl KernelCompiler for ShellCompiler {
    fn compile(&self, job: &CompileJob) -> Result<()> {
        debug!("jit: running compile command: {}", job.command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(&job.command)
            .output()
            .map_err(|e| JitError::CompileFailed {
                kernel: job.kernel.clone(),
                message: format!("cannot run sh: {}", e),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if job.error_log.is_none() && !stderr.trim().is_empty() {
            warn!("jit: compiler output for {}:\n{}", job.kernel, stderr);
        }
        Err(JitError::CompileFailed {
            kernel: job.kernel.clone(),
            message: format!("compiler exited with {}", output.status),
        })
    }

    fn is_available(&self, compiler: &str) -> bool {
        Self::check_availability(compiler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::KernelManifest;
    use crate::validator::{Definitions, Version};

    fn job(dir: &Path, command: &str) -> CompileJob {
        CompileJob {
            kernel: "sj_jit__user_type__e".into(),
            source: dir.join("k.c"),
            library: dir.join("libk.so"),
            command: command.into(),
            error_log: None,
            manifest: KernelManifest {
                hash: 1,
                version: Version::current(),
                definitions: Definitions::default(),
                monoid: None,
            },
        }
    }

    #[test]
    fn test_open_missing_library_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = NativeLoader.open(&dir.path().join("libnothing.so")).err().unwrap();
        assert!(matches!(err, JitError::LoadFailed { .. }));
    }

    #[test]
    fn test_failed_open_leaves_no_copies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libbroken.so");
        fs::write(&path, b"not a shared object").unwrap();
        let err = NativeLoader.open(&path).err().unwrap();
        assert!(matches!(&err, JitError::LoadFailed { path: p, .. } if *p == path));
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("libbroken.so")]);
    }

    #[test]
    fn test_private_copy_paths_are_unique() {
        let path = Path::new("/cache/lib/libk.so");
        let first = NativeLoader::private_copy_path(path);
        let second = NativeLoader::private_copy_path(path);
        assert_ne!(first, second);
        assert_eq!(first.parent(), path.parent());
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("libk.so.{}.", process::id())));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_reports_compile_failed() {
        let compiler = ShellCompiler;
        let dir = tempfile::tempdir().unwrap();
        let err = compiler.compile(&job(dir.path(), "exit 3")).unwrap_err();
        assert!(matches!(err, JitError::CompileFailed { .. }));
        assert!(compiler.compile(&job(dir.path(), "true")).is_ok());
    }

    #[test]
    fn test_missing_compiler_is_unavailable() {
        assert!(!ShellCompiler::check_availability("sj-no-such-compiler"));
        assert!(!ShellCompiler.is_available("sj-no-such-compiler"));
    }
}
