//! JIT configuration
//!
//! Environment variables (read once, by [`JitConfig::from_env`]):
//! - `SEMIRING_JIT_CACHE_PATH`: cache directory override
//! - `SEMIRING_JIT_NO_CACHE`: start without a cache directory (JIT limited
//!   to resident kernels)
//! - `CC`: compiler, `cc` if unset

use crate::control::ControlLevel;
use crate::validator::Version;
use std::path::PathBuf;

pub const CACHE_PATH_ENV: &str = "SEMIRING_JIT_CACHE_PATH";
pub const NO_CACHE_ENV: &str = "SEMIRING_JIT_NO_CACHE";
pub const COMPILER_ENV: &str = "CC";

pub const DEFAULT_COMPILER: &str = "cc";
pub const DEFAULT_COMPILE_FLAGS: &str = "-O3 -fPIC";
pub const DEFAULT_LINK_FLAGS: &str = "-shared";
pub const DEFAULT_LIBRARIES: &str = "-lm";

/// Per-user cache directory, one sub-directory per library version so
/// kernels built by different versions never meet.
pub fn default_cache_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "semiring-jit")
        .map(|dirs| dirs.cache_dir().join(format!("v{}", Version::current())))
}

/// Settings a [`crate::JitContext`] starts from
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// `None`: no usable cache directory
    pub cache_dir: Option<PathBuf>,
    pub compiler: String,
    pub compile_flags: String,
    pub link_flags: String,
    pub libraries: String,
    /// Text placed at the top of every generated source
    pub source_preface: String,
    /// File receiving compiler output; `None` logs it instead
    pub error_log: Option<PathBuf>,
    pub control: ControlLevel,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            compiler: DEFAULT_COMPILER.to_string(),
            compile_flags: DEFAULT_COMPILE_FLAGS.to_string(),
            link_flags: DEFAULT_LINK_FLAGS.to_string(),
            libraries: DEFAULT_LIBRARIES.to_string(),
            source_preface: String::new(),
            error_log: None,
            control: ControlLevel::max_allowed(),
        }
    }
}

impl JitConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(cc) = lookup(COMPILER_ENV).filter(|s| !s.trim().is_empty()) {
            config.compiler = cc;
        }
        if let Some(dir) = lookup(CACHE_PATH_ENV).filter(|s| !s.is_empty()) {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        if lookup(NO_CACHE_ENV).is_some() {
            config.cache_dir = None;
        }
        config
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn without_cache_dir(mut self) -> Self {
        self.cache_dir = None;
        self
    }

    pub fn with_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.compiler = compiler.into();
        self
    }

    pub fn with_compile_flags(mut self, flags: impl Into<String>) -> Self {
        self.compile_flags = flags.into();
        self
    }

    pub fn with_link_flags(mut self, flags: impl Into<String>) -> Self {
        self.link_flags = flags.into();
        self
    }

    pub fn with_libraries(mut self, libraries: impl Into<String>) -> Self {
        self.libraries = libraries.into();
        self
    }

    pub fn with_source_preface(mut self, preface: impl Into<String>) -> Self {
        self.source_preface = preface.into();
        self
    }

    pub fn with_error_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_log = Some(path.into());
        self
    }

    pub fn with_control(mut self, level: ControlLevel) -> Self {
        self.control = level;
        self
    }
}
