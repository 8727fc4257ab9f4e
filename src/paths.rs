//! Cache directory, source directory and the compile command
//!
//! [`GlobalPaths`] holds every string the pipeline derives file names and
//! commands from. Setters re-derive the cached command prefixes, and a new
//! cache directory re-derives the source directory.
//!
//! The kernel header and templates are bundled into the library
//! (gzip-compressed by `build.rs`) and extracted into `<cache>/src` once per
//! library version; a small JSON marker records which version was extracted.

use crate::codegen::RUNTIME_MACRO;
use crate::error::{JitError, Result};
use crate::validator::Version;
use flate2::read::GzDecoder;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::env::consts::DLL_SUFFIX;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Longest file path the pipeline will generate, in bytes
pub const MAX_PATH_LEN: usize = 4096;

/// Sub-directory of the cache holding the extracted sources
pub const SOURCE_SUBDIR: &str = "src";

/// Marker written after a successful extraction
pub const VERSION_MARKER: &str = "sj_version.json";

/// One compressed file bundled into the library
#[derive(Debug)]
pub struct BundledSource {
    /// Path relative to the source directory, `/`-separated
    pub name: &'static str,
    pub data: &'static [u8],
    /// Decompressed size
    pub size: usize,
}

/// Files generated from `templates/` at build time
pub static BUNDLED_SOURCES: &[BundledSource] =
    include!(concat!(env!("OUT_DIR"), "/bundled_sources.rs"));

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct SourceMarker {
    version: String,
    sources: usize,
}

/// Quote `s` for `sh`
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn check_len(path: PathBuf) -> Result<PathBuf> {
    let len = path.as_os_str().len();
    if len > MAX_PATH_LEN {
        return Err(JitError::PathTooLong {
            path,
            len,
            max: MAX_PATH_LEN,
        });
    }
    Ok(path)
}

/// Paths and toolchain strings shared by every build
#[derive(Debug, Clone)]
pub struct GlobalPaths {
    cache_dir: Option<PathBuf>,
    source_dir: Option<PathBuf>,
    compiler: String,
    compile_flags: String,
    link_flags: String,
    libraries: String,
    source_preface: String,
    error_log: Option<PathBuf>,
    // derived
    compile_prefix: String,
    link_prefix: String,
}

impl GlobalPaths {
    pub fn new(
        cache_dir: Option<PathBuf>,
        compiler: String,
        compile_flags: String,
        link_flags: String,
        libraries: String,
    ) -> Self {
        let mut paths = Self {
            source_dir: None,
            cache_dir: None,
            compiler,
            compile_flags,
            link_flags,
            libraries,
            source_preface: String::new(),
            error_log: None,
            compile_prefix: String::new(),
            link_prefix: String::new(),
        };
        paths.set_cache_dir(cache_dir);
        paths
    }

    fn rederive(&mut self) {
        let mut compile = format!(
            "{} -D{}=1 {}",
            self.compiler, RUNTIME_MACRO, self.compile_flags
        );
        if let Some(src) = &self.source_dir {
            compile.push_str(&format!(" -I{}", shell_quote(&src.to_string_lossy())));
        }
        self.compile_prefix = compile;
        self.link_prefix = format!("{} {}", self.compiler, self.link_flags);
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    pub fn compiler(&self) -> &str {
        &self.compiler
    }

    pub fn compile_flags(&self) -> &str {
        &self.compile_flags
    }

    pub fn link_flags(&self) -> &str {
        &self.link_flags
    }

    pub fn libraries(&self) -> &str {
        &self.libraries
    }

    pub fn source_preface(&self) -> &str {
        &self.source_preface
    }

    pub fn error_log(&self) -> Option<&Path> {
        self.error_log.as_deref()
    }

    /// Replace the cache directory; the source directory follows it.
    /// `None` (or an empty path) leaves the JIT without a usable directory.
    pub fn set_cache_dir(&mut self, dir: Option<PathBuf>) {
        let dir = dir.filter(|d| !d.as_os_str().is_empty());
        self.source_dir = dir.as_ref().map(|d| d.join(SOURCE_SUBDIR));
        self.cache_dir = dir;
        self.rederive();
    }

    pub fn set_compiler(&mut self, compiler: impl Into<String>) {
        self.compiler = compiler.into();
        self.rederive();
    }

    pub fn set_compile_flags(&mut self, flags: impl Into<String>) {
        self.compile_flags = flags.into();
        self.rederive();
    }

    pub fn set_link_flags(&mut self, flags: impl Into<String>) {
        self.link_flags = flags.into();
        self.rederive();
    }

    pub fn set_libraries(&mut self, libraries: impl Into<String>) {
        self.libraries = libraries.into();
        self.rederive();
    }

    pub fn set_source_preface(&mut self, preface: impl Into<String>) {
        self.source_preface = preface.into();
    }

    pub fn set_error_log(&mut self, log: Option<PathBuf>) {
        self.error_log = log.filter(|p| !p.as_os_str().is_empty());
    }

    fn require_cache_dir(&self) -> Result<&Path> {
        self.cache_dir.as_deref().ok_or_else(|| JitError::PathUnavailable {
            path: PathBuf::new(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no cache directory"),
        })
    }

    /// Create the cache and source directories. On failure both are
    /// cleared, so later requests see no usable directory.
    pub fn establish(&mut self) -> Result<()> {
        let dirs = match (&self.cache_dir, &self.source_dir) {
            (Some(cache), Some(src)) => [cache.clone(), src.clone()],
            _ => {
                return Err(JitError::PathUnavailable {
                    path: PathBuf::new(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no cache directory",
                    ),
                });
            }
        };
        for dir in &dirs {
            if let Err(source) = fs::create_dir_all(dir) {
                self.set_cache_dir(None);
                return Err(JitError::PathUnavailable {
                    path: dir.clone(),
                    source,
                });
            }
        }
        debug!("jit: cache directory {}", dirs[0].display());
        Ok(())
    }

    /// Decompress the bundled sources into the source directory unless the
    /// marker says this version already did. Returns the number of files
    /// written.
    pub fn extract_bundled_sources(&self) -> Result<usize> {
        self.extract_sources(BUNDLED_SOURCES)
    }

    pub(crate) fn extract_sources(&self, sources: &[BundledSource]) -> Result<usize> {
        self.require_cache_dir()?;
        let Some(src_dir) = self.source_dir.as_deref() else {
            return Ok(0);
        };
        let marker_path = src_dir.join(VERSION_MARKER);
        let expected = SourceMarker {
            version: Version::current().to_string(),
            sources: sources.len(),
        };
        if let Ok(text) = fs::read_to_string(&marker_path) {
            if serde_json::from_str::<SourceMarker>(&text).ok().as_ref() == Some(&expected) {
                debug!("jit: bundled sources already extracted");
                return Ok(0);
            }
        }

        for source in sources {
            let mut contents = Vec::with_capacity(source.size);
            GzDecoder::new(source.data)
                .read_to_end(&mut contents)
                .map_err(|_| JitError::ArchiveCorrupt {
                    name: source.name.to_string(),
                    expected: source.size,
                    actual: contents.len(),
                })?;
            if contents.len() != source.size {
                return Err(JitError::ArchiveCorrupt {
                    name: source.name.to_string(),
                    expected: source.size,
                    actual: contents.len(),
                });
            }
            let path = check_len(src_dir.join(source.name))?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &contents)?;
        }

        let marker = serde_json::to_string_pretty(&expected)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&marker_path, marker)?;
        info!(
            "jit: extracted {} bundled sources into {}",
            sources.len(),
            src_dir.display()
        );
        Ok(sources.len())
    }

    /// `<cache>/lib<name><dll suffix>`
    pub fn library_path(&self, name: &str) -> Result<PathBuf> {
        let dir = self.require_cache_dir()?;
        check_len(dir.join(format!("lib{}{}", name, DLL_SUFFIX)))
    }

    /// `<cache>/<name>.c`
    pub fn source_path(&self, name: &str) -> Result<PathBuf> {
        let dir = self.require_cache_dir()?;
        check_len(dir.join(format!("{}.c", name)))
    }

    /// Shell command compiling and linking kernel `name`
    pub fn compile_command(&self, name: &str) -> Result<String> {
        let dir = self.require_cache_dir()?;
        let source = self.source_path(name)?;
        let object = check_len(dir.join(format!("{}.o", name)))?;
        let library = self.library_path(name)?;
        let q = |p: &Path| shell_quote(&p.to_string_lossy());

        let mut command = format!(
            "{} -I{} -c {} -o {} && {} {} -o {} {}",
            self.compile_prefix,
            q(dir),
            q(&source),
            q(&object),
            self.link_prefix,
            q(&object),
            q(&library),
            self.libraries
        );
        if let Some(log) = &self.error_log {
            command = format!("( {} ) >> {} 2>&1", command, q(log));
        }
        Ok(command)
    }
}
