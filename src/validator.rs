//! Definition validation
//!
//! A structural hash cannot see inside user-supplied C definitions, so a
//! kernel keyed by user objects may have been built from definitions that
//! no longer match the live objects (redefined between runs, or within a
//! run after a flush). Every kernel exports a query entry point reporting
//! the hash, library version and definitions it was generated with; the
//! validator compares that report against the current state.

use log::debug;
use std::fmt;

/// Number of definition slots a kernel records
pub const DEFINITION_SLOTS: usize = 5;

/// The up-to-five definition strings of a kernel.
///
/// Slot assignment is per family (see [`crate::encoding::DefinitionSlots`]);
/// builtin objects leave their slot empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Definitions(pub [Option<String>; DEFINITION_SLOTS]);

impl Definitions {
    pub fn get(&self, slot: usize) -> Option<&str> {
        self.0.get(slot).and_then(|d| d.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

/// Identity and terminal bytes of a user monoid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoidValues {
    pub identity: Vec<u8>,
    pub terminal: Option<Vec<u8>>,
}

/// Library version triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
}

impl Version {
    pub const fn new(major: i32, minor: i32, patch: i32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Version of the running library
    pub fn current() -> Self {
        fn part(s: &str) -> i32 {
            s.parse().unwrap_or(0)
        }
        Self::new(
            part(env!("CARGO_PKG_VERSION_MAJOR")),
            part(env!("CARGO_PKG_VERSION_MINOR")),
            part(env!("CARGO_PKG_VERSION_PATCH")),
        )
    }

    pub fn as_array(&self) -> [i32; 3] {
        [self.major, self.minor, self.patch]
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// What a kernel's query entry point reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReport {
    pub hash: u64,
    pub version: Version,
    pub definitions: Definitions,
    /// Whether the monoid identity/terminal passed to the query match the
    /// values compiled into the kernel
    pub monoid_matches: bool,
}

/// Why a kernel was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The kernel has no usable query entry point
    Unqueryable,
    HashMismatch { expected: u64, found: u64 },
    VersionMismatch { found: Version },
    DefinitionChanged { slot: usize },
    MonoidChanged,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::Unqueryable => write!(f, "no query entry point"),
            StaleReason::HashMismatch { expected, found } => {
                write!(f, "hash {:016x} != {:016x}", found, expected)
            }
            StaleReason::VersionMismatch { found } => {
                write!(f, "built by version {}, running {}", found, Version::current())
            }
            StaleReason::DefinitionChanged { slot } => write!(f, "definition {} changed", slot),
            StaleReason::MonoidChanged => write!(f, "monoid identity/terminal changed"),
        }
    }
}

/// Checks a kernel's query report against the live definitions
#[derive(Debug, Clone, Copy)]
pub struct DefinitionValidator<'a> {
    hash: u64,
    definitions: &'a Definitions,
}

impl<'a> DefinitionValidator<'a> {
    pub fn new(hash: u64, definitions: &'a Definitions) -> Self {
        Self { hash, definitions }
    }

    /// Accept iff hash and version match exactly, every definition slot
    /// is absent on both sides or byte-equal on both sides, and the monoid
    /// values matched.
    pub fn check(&self, report: Option<&QueryReport>) -> Result<(), StaleReason> {
        let report = report.ok_or(StaleReason::Unqueryable)?;
        if report.hash != self.hash {
            return Err(StaleReason::HashMismatch {
                expected: self.hash,
                found: report.hash,
            });
        }
        if report.version != Version::current() {
            return Err(StaleReason::VersionMismatch {
                found: report.version,
            });
        }
        for (slot, (expected, found)) in self
            .definitions
            .0
            .iter()
            .zip(report.definitions.0.iter())
            .enumerate()
        {
            if expected != found {
                debug!("jit: definition slot {} differs", slot);
                return Err(StaleReason::DefinitionChanged { slot });
            }
        }
        if !report.monoid_matches {
            return Err(StaleReason::MonoidChanged);
        }
        Ok(())
    }
}
