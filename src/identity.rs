//! Kernel identity: structural hash, encoding and suffix
//!
//! The identity is the cache key. Its hash is an xxh3 hash of the encoding
//! bytes, mixed with the hash of any user-defined objects involved. The
//! hash function never yields the two reserved values:
//!
//! - `0` means "builtin, no hashing needed" for object hashes
//! - `u64::MAX` means "cannot be compiled": lookups always miss
//!
//! A genuine hash that lands on either is remapped to [`HASH_MAGIC`].

use crate::encoding::{Encoding, KernelFamily, KernelKind};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// Object hash of a builtin object
pub const NOT_HASHED: u64 = 0;

/// Object hash of something that cannot be JIT compiled
pub const NOT_JITABLE: u64 = u64::MAX;

/// Replacement for hashes that collide with a reserved value
pub const HASH_MAGIC: u64 = 0x0053_454d_4a49_5421;

/// Namespace prefix of every kernel name
pub const NAMESPACE: &str = "sj_jit";

const SEPARATOR: &str = "__";

fn remap(hash: u64) -> u64 {
    if hash == NOT_HASHED || hash == NOT_JITABLE {
        HASH_MAGIC
    } else {
        hash
    }
}

/// Hash an arbitrary byte string (typically an object name).
///
/// Returns [`NOT_JITABLE`] for objects that cannot be compiled, regardless
/// of `bytes`.
pub fn hash_bytes(bytes: &[u8], jitable: bool) -> u64 {
    if !jitable {
        return NOT_JITABLE;
    }
    remap(xxh3_64(bytes))
}

/// Hash the raw bytes of an encoding
pub fn hash_encoding(encoding: &Encoding) -> u64 {
    remap(xxh3_64(&encoding.to_bytes()))
}

/// Cache key of a specialization
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelIdentity {
    hash: u64,
    encoding: Encoding,
    suffix: Option<Box<str>>,
}

impl KernelIdentity {
    /// Derive an identity from a structural code and the user objects
    /// involved. `object_hash` is `0` for fully builtin problems and
    /// `u64::MAX` if any involved object cannot be compiled.
    pub fn new(kind: KernelKind, code: u64, suffix: Option<String>, object_hash: u64) -> Self {
        let suffix = suffix.filter(|s| !s.is_empty()).map(String::into_boxed_str);
        let suffix_len = suffix.as_ref().map_or(0, |s| s.len() as u32);
        let encoding = Encoding::new(kind, code, suffix_len);
        let hash = if object_hash == NOT_JITABLE {
            NOT_JITABLE
        } else {
            remap(hash_encoding(&encoding) ^ object_hash)
        };
        Self {
            hash,
            encoding,
            suffix,
        }
    }

    /// Reassemble an identity whose hash is already known (PreJIT kernels
    /// report the hash they were generated with).
    pub fn from_parts(hash: u64, kind: KernelKind, code: u64, suffix: Option<&str>) -> Self {
        let suffix: Option<Box<str>> = suffix.filter(|s| !s.is_empty()).map(Box::from);
        let suffix_len = suffix.as_ref().map_or(0, |s| s.len() as u32);
        Self {
            hash,
            encoding: Encoding::new(kind, code, suffix_len),
            suffix,
        }
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn kind(&self) -> KernelKind {
        self.encoding.kind
    }

    pub fn family(&self) -> KernelFamily {
        self.encoding.family()
    }

    pub fn code(&self) -> u64 {
        self.encoding.code
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// False for identities that must always run through generic kernels
    pub fn is_jitable(&self) -> bool {
        self.hash != NOT_JITABLE
    }

    /// Cache match: same hash, same encoding, same suffix bytes
    pub fn matches(&self, other: &KernelIdentity) -> bool {
        self.hash == other.hash
            && self.encoding == other.encoding
            && (self.encoding.suffix_len == 0 || self.suffix == other.suffix)
    }

    /// Deterministic kernel name; also the symbol and file stem
    pub fn name(&self) -> KernelName {
        KernelName {
            kind: self.kind(),
            code: self.code(),
            suffix: self.suffix().map(str::to_string),
        }
    }
}

/// `sj_jit__<kind>__<code hex>[__<suffix>]`
///
/// The only link between files in the cache directory and in-memory
/// identities, so it must be reproducible bit for bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelName {
    pub kind: KernelKind,
    pub code: u64,
    pub suffix: Option<String>,
}

impl KernelName {
    /// Parse a kernel name. Returns `None` for anything malformed,
    /// including foreign namespaces and unknown kinds.
    pub fn parse(name: &str) -> Option<KernelName> {
        let mut parts = name.splitn(4, SEPARATOR);
        if parts.next()? != NAMESPACE {
            return None;
        }
        let kind = KernelKind::from_name(parts.next()?)?;
        let digits = parts.next()?;
        if digits.is_empty() || digits.len() > 16 {
            return None;
        }
        let code = u64::from_str_radix(digits, 16).ok()?;
        let suffix = match parts.next() {
            Some("") => return None,
            Some(s) => Some(s.to_string()),
            None => None,
        };
        Some(KernelName { kind, code, suffix })
    }
}

impl fmt::Display for KernelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.kind.family().code_digits();
        write!(
            f,
            "{NAMESPACE}{SEPARATOR}{}{SEPARATOR}{:0width$x}",
            self.kind.name(),
            self.code,
            width = width
        )?;
        if let Some(suffix) = &self.suffix {
            write!(f, "{SEPARATOR}{}", suffix)?;
        }
        Ok(())
    }
}
