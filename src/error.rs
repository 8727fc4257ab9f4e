//! Error types for the JIT

use crate::control::ControlLevel;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the JIT's error
pub type Result<T> = std::result::Result<T, JitError>;

/// Everything that can go wrong while identifying, building, loading or
/// serving a specialized kernel.
///
/// Most variants never reach the numeric caller: [`crate::JitContext::load_kernel`]
/// turns them into "not available" after lowering the control level. Only
/// [`JitError::OutOfMemory`] and [`JitError::InvalidArgument`] propagate.
#[derive(Debug, Error)]
pub enum JitError {
    /// Allocation failed inside the cache's own bookkeeping
    #[error("Out of memory: failed to grow the kernel table to {slots} slots")]
    OutOfMemory {
        /// Number of slots that could not be allocated
        slots: usize,
    },

    /// The cache or source directory cannot be created or accessed
    #[error("Cache path unavailable: {path}: {source}")]
    PathUnavailable {
        /// Directory that failed
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A derived file name exceeds the fixed path limit
    #[error("Path too long ({len} > {max} bytes): {path}")]
    PathTooLong {
        /// Offending path
        path: PathBuf,
        /// Its length in bytes
        len: usize,
        /// The limit
        max: usize,
    },

    /// A bundled source blob did not decompress to its recorded size
    #[error("Bundled source '{name}' is corrupt: expected {expected} bytes, got {actual}")]
    ArchiveCorrupt {
        /// Blob name
        name: String,
        /// Recorded size
        expected: usize,
        /// Decompressed size
        actual: usize,
    },

    /// Writing the generated source or the extracted sources failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The compiler or linker subprocess reported failure
    #[error("Compilation of '{kernel}' failed: {message}")]
    CompileFailed {
        /// Kernel name
        kernel: String,
        /// Exit status or spawn error, plus captured output
        message: String,
    },

    /// The dynamic library could not be opened
    #[error("Failed to load library {path}: {reason}")]
    LoadFailed {
        /// Library path
        path: PathBuf,
        /// Loader message
        reason: String,
    },

    /// A loaded library does not export the kernel entry point
    #[error("Symbol '{symbol}' missing from kernel '{kernel}'")]
    SymbolMissing {
        /// Kernel name
        kernel: String,
        /// Missing symbol
        symbol: &'static str,
    },

    /// A cached or on-disk kernel was built from different definitions
    #[error("Kernel '{kernel}' is stale")]
    StaleDefinition {
        /// Kernel name
        kernel: String,
    },

    /// Control level above what this build allows
    #[error("Control level {requested} not allowed, clamped to {allowed}")]
    InvalidControl {
        /// What the caller asked for
        requested: ControlLevel,
        /// What was applied
        allowed: ControlLevel,
    },

    /// A precondition on the arguments was violated
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl JitError {
    /// Whether this error must be surfaced to the caller instead of being
    /// reported as "not available".
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            JitError::OutOfMemory { .. } | JitError::InvalidArgument(_)
        )
    }

    /// Control level the JIT drops to after this failure, if any.
    ///
    /// A broken directory or compiler leaves only resident kernels usable;
    /// a library that compiled but will not open still allows loading
    /// others from disk.
    pub fn degrades_to(&self) -> Option<ControlLevel> {
        match self {
            JitError::OutOfMemory { .. } => Some(ControlLevel::Pause),
            JitError::PathUnavailable { .. }
            | JitError::PathTooLong { .. }
            | JitError::Io(_)
            | JitError::CompileFailed { .. }
            | JitError::SymbolMissing { .. }
            | JitError::StaleDefinition { .. } => Some(ControlLevel::Run),
            JitError::ArchiveCorrupt { .. } | JitError::LoadFailed { .. } => {
                Some(ControlLevel::Load)
            }
            JitError::InvalidControl { .. } | JitError::InvalidArgument(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_errors() {
        assert!(JitError::OutOfMemory { slots: 4096 }.is_hard());
        assert!(JitError::InvalidArgument("null".into()).is_hard());
        assert!(
            !JitError::StaleDefinition {
                kernel: "k".into()
            }
            .is_hard()
        );
        assert!(
            !JitError::SymbolMissing {
                kernel: "k".into(),
                symbol: "sj_jit_kernel"
            }
            .is_hard()
        );
    }

    #[test]
    fn test_degradation_targets() {
        assert_eq!(
            JitError::OutOfMemory { slots: 4096 }.degrades_to(),
            Some(ControlLevel::Pause)
        );
        assert_eq!(
            JitError::LoadFailed {
                path: PathBuf::from("/x"),
                reason: "bad ELF".into()
            }
            .degrades_to(),
            Some(ControlLevel::Load)
        );
        assert_eq!(
            JitError::SymbolMissing {
                kernel: "k".into(),
                symbol: "sj_jit_kernel"
            }
            .degrades_to(),
            Some(ControlLevel::Run)
        );
        assert_eq!(JitError::InvalidArgument("x".into()).degrades_to(), None);
    }

    #[test]
    fn test_display() {
        let err = JitError::ArchiveCorrupt {
            name: "sj_jit_kernel.h".into(),
            expected: 10,
            actual: 7,
        };
        assert_eq!(
            err.to_string(),
            "Bundled source 'sj_jit_kernel.h' is corrupt: expected 10 bytes, got 7"
        );
    }
}
