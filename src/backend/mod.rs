//! Dynamic library and external compiler seams
//!
//! The pipeline talks to the outside world through three traits:
//! [`KernelCompiler`] runs the build command, [`LibraryLoader`] opens the
//! artifact and [`KernelLibrary`] resolves its entry points. The OS-backed
//! implementations live in [`native`]; tests substitute in-memory fakes.

pub mod native;

use crate::error::Result;
use crate::validator::{DEFINITION_SLOTS, Definitions, MonoidValues, QueryReport, Version};
use std::ffi::{CStr, c_char, c_int, c_void};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Exported name of the kernel entry point in runtime-built libraries
pub const KERNEL_SYMBOL: &str = "sj_jit_kernel";

/// Exported name of the query entry point in runtime-built libraries
pub const QUERY_SYMBOL: &str = "sj_jit_query";

/// Opaque kernel entry point.
///
/// The real signature depends on the family; the caller that requested the
/// kernel knows it and casts with [`KernelFn::cast`].
#[derive(Clone, Copy)]
pub struct KernelFn(unsafe extern "C" fn());

impl KernelFn {
    pub const fn new(f: unsafe extern "C" fn()) -> Self {
        Self(f)
    }

    pub fn as_ptr(self) -> *const c_void {
        self.0 as *const c_void
    }

    /// Reinterpret as the family's concrete function pointer type.
    ///
    /// # Safety
    /// `F` must be a function pointer type matching the kernel's real
    /// signature.
    pub unsafe fn cast<F: Copy>(self) -> F {
        debug_assert_eq!(size_of::<F>(), size_of::<unsafe extern "C" fn()>());
        unsafe { std::mem::transmute_copy(&self.0) }
    }
}

impl fmt::Debug for KernelFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KernelFn({:p})", self.as_ptr())
    }
}

/// C signature of a kernel's query entry point.
///
/// Writes the identity hash, the version triple and pointers to the five
/// definition strings (null for absent), and returns whether the monoid
/// identity/terminal bytes passed in equal the ones compiled in.
pub type RawQueryFn = unsafe extern "C" fn(
    hash: *mut u64,
    version: *mut c_int,
    defn: *mut *const c_char,
    id: *const c_void,
    id_size: usize,
    term: *const c_void,
    term_size: usize,
) -> bool;

/// A query entry point known to have the [`RawQueryFn`] signature
#[derive(Clone, Copy)]
pub struct QueryFn(RawQueryFn);

impl QueryFn {
    /// # Safety
    /// `f` must follow the query contract: write only through the pointers
    /// it is given and leave the definition strings valid for as long as
    /// the library stays loaded.
    pub const unsafe fn new(f: RawQueryFn) -> Self {
        Self(f)
    }

    /// Ask the kernel what it was built from
    pub fn query(&self, monoid: Option<&MonoidValues>) -> QueryReport {
        let mut hash = 0u64;
        let mut version: [c_int; 3] = [0; 3];
        let mut defn: [*const c_char; DEFINITION_SLOTS] = [std::ptr::null(); DEFINITION_SLOTS];
        let (id, id_size) = match monoid {
            Some(m) => (m.identity.as_ptr() as *const c_void, m.identity.len()),
            None => (std::ptr::null(), 0),
        };
        let (term, term_size) = match monoid.and_then(|m| m.terminal.as_ref()) {
            Some(t) => (t.as_ptr() as *const c_void, t.len()),
            None => (std::ptr::null(), 0),
        };
        // SAFETY: the out pointers are valid for the sizes in the contract
        let monoid_matches = unsafe {
            (self.0)(
                &mut hash,
                version.as_mut_ptr(),
                defn.as_mut_ptr(),
                id,
                id_size,
                term,
                term_size,
            )
        };
        let definitions = Definitions(std::array::from_fn(|i| {
            let p = defn[i];
            // SAFETY: non-null pointers are NUL-terminated static strings
            (!p.is_null()).then(|| unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
        }));
        QueryReport {
            hash,
            version: Version::new(version[0], version[1], version[2]),
            definitions,
            monoid_matches,
        }
    }
}

impl fmt::Debug for QueryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryFn({:p})", self.0 as *const c_void)
    }
}

/// An opened kernel library
pub trait KernelLibrary: Send + Sync {
    /// File the library was opened from
    fn path(&self) -> &Path;

    /// The kernel entry point, if the library exports one
    fn entry(&self) -> Option<KernelFn>;

    /// Run the query entry point; `None` if the library exports none
    fn query(&self, monoid: Option<&MonoidValues>) -> Option<QueryReport>;
}

/// Opens kernel libraries from disk
pub trait LibraryLoader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn KernelLibrary>>;
}

/// What a kernel library is being built to report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelManifest {
    pub hash: u64,
    pub version: Version,
    pub definitions: Definitions,
    pub monoid: Option<MonoidValues>,
}

/// One build request handed to a [`KernelCompiler`]
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub kernel: String,
    pub source: PathBuf,
    pub library: PathBuf,
    /// Full shell command: compile, then link
    pub command: String,
    /// Where compiler output is appended, if configured
    pub error_log: Option<PathBuf>,
    pub manifest: KernelManifest,
}

/// Turns a generated source file into a loadable library
pub trait KernelCompiler: Send + Sync {
    fn compile(&self, job: &CompileJob) -> Result<()>;

    /// Whether the configured `compiler` can be run
    fn is_available(&self, _compiler: &str) -> bool {
        true
    }
}

/// The compiler and loader a context builds kernels with
#[derive(Clone)]
pub struct Toolchain {
    pub compiler: Arc<dyn KernelCompiler>,
    pub loader: Arc<dyn LibraryLoader>,
}

impl Toolchain {
    pub fn new(compiler: Arc<dyn KernelCompiler>, loader: Arc<dyn LibraryLoader>) -> Self {
        Self { compiler, loader }
    }

    /// `sh -c` compiler and `libloading` loader
    pub fn native() -> Self {
        Self::new(
            Arc::new(native::ShellCompiler::default()),
            Arc::new(native::NativeLoader),
        )
    }
}

impl fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolchain").finish_non_exhaustive()
    }
}
