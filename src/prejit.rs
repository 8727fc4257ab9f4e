//! Kernels compiled ahead of time and linked into the process
//!
//! A PreJIT table lists `(name, kernel, query)` triples. At context
//! creation every usable entry goes into the cache marked unchecked; its
//! definitions are validated on first use like any other kernel.

use crate::backend::{KernelFn, QueryFn};
use crate::cache::{KernelCache, LoadedKernel, PreJitState};
use crate::error::Result;
use crate::identity::{KernelIdentity, KernelName, NOT_HASHED, NOT_JITABLE};
use crate::validator::Version;
use log::{debug, info};
use std::sync::Arc;

/// One statically linked kernel
#[derive(Debug, Clone, Copy)]
pub struct PreJitKernel {
    /// Kernel name, as produced by [`KernelName`]'s `Display`
    pub name: &'static str,
    pub kernel: KernelFn,
    pub query: QueryFn,
}

impl PreJitKernel {
    pub const fn new(name: &'static str, kernel: KernelFn, query: QueryFn) -> Self {
        Self {
            name,
            kernel,
            query,
        }
    }
}

/// Register `table` into `cache`. Malformed names, sentinel hashes, other
/// library versions and duplicate identities are skipped; the first entry
/// of a duplicate set wins. Returns the number of kernels registered.
pub fn reconcile(table: &[PreJitKernel], cache: &mut KernelCache) -> Result<usize> {
    let current = Version::current();
    let mut registered = 0;
    for (index, prejit) in table.iter().enumerate() {
        let Some(name) = KernelName::parse(prejit.name) else {
            debug!("jit: prejit {:?} has a malformed name, skipped", prejit.name);
            continue;
        };
        let report = prejit.query.query(None);
        if report.hash == NOT_HASHED || report.hash == NOT_JITABLE {
            debug!("jit: prejit {} reports a reserved hash, skipped", prejit.name);
            continue;
        }
        if report.version != current {
            debug!(
                "jit: prejit {} built by {}, running {}, skipped",
                prejit.name, report.version, current
            );
            continue;
        }
        let identity =
            KernelIdentity::from_parts(report.hash, name.kind, name.code, name.suffix.as_deref());
        if cache.contains(&identity) {
            debug!("jit: prejit {} duplicates an earlier entry", prejit.name);
            continue;
        }
        let kernel = Arc::new(LoadedKernel::prejit(prejit.kernel, prejit.query, index));
        cache.insert(identity, kernel, PreJitState::Unchecked(index))?;
        registered += 1;
    }
    if !table.is_empty() {
        info!("jit: registered {} of {} prejit kernels", registered, table.len());
    }
    Ok(registered)
}
