//! Kernel cache
//!
//! Open-addressing hash table keyed by [`KernelIdentity`], linear probing
//! from `hash & (capacity - 1)`. The capacity is a power of two, starts at
//! [`INITIAL_CAPACITY`] and grows 4x whenever `4 * populated` would exceed
//! it. A table that empties during a sweep is freed and recreated lazily.

use crate::backend::{KernelFn, KernelLibrary, QueryFn};
use crate::encoding::KernelFamily;
use crate::error::{JitError, Result};
use crate::identity::KernelIdentity;
use crate::validator::{MonoidValues, QueryReport};
use log::debug;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

/// Slot count of a freshly created table
pub const INITIAL_CAPACITY: usize = 1024;

const GROWTH: usize = 4;

/// Where a resident kernel came from
pub enum KernelOrigin {
    /// Opened from the cache directory (compiled now or in an earlier run)
    Library(Box<dyn KernelLibrary>),
    /// Linked into the process image
    PreJit { index: usize, query: QueryFn },
}

/// A resident kernel: entry point plus whatever keeps it alive
pub struct LoadedKernel {
    entry: KernelFn,
    origin: KernelOrigin,
}

impl LoadedKernel {
    pub fn from_library(entry: KernelFn, library: Box<dyn KernelLibrary>) -> Self {
        Self {
            entry,
            origin: KernelOrigin::Library(library),
        }
    }

    pub fn prejit(entry: KernelFn, query: QueryFn, index: usize) -> Self {
        Self {
            entry,
            origin: KernelOrigin::PreJit { index, query },
        }
    }

    pub fn origin(&self) -> &KernelOrigin {
        &self.origin
    }

    /// Run the kernel's query entry point
    pub fn query(&self, monoid: Option<&MonoidValues>) -> Option<QueryReport> {
        match &self.origin {
            KernelOrigin::Library(lib) => lib.query(monoid),
            KernelOrigin::PreJit { query, .. } => Some(query.query(monoid)),
        }
    }
}

impl fmt::Debug for LoadedKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match &self.origin {
            KernelOrigin::Library(lib) => format!("library {}", lib.path().display()),
            KernelOrigin::PreJit { index, .. } => format!("prejit #{}", index),
        };
        f.debug_struct("LoadedKernel")
            .field("entry", &self.entry)
            .field("origin", &origin)
            .finish()
    }
}

/// Validation state of an entry imported from the PreJIT table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreJitState {
    /// Not a PreJIT kernel
    None,
    /// PreJIT kernel not yet validated in this process
    Unchecked(usize),
    /// PreJIT kernel validated and accepted
    Checked(usize),
}

impl PreJitState {
    pub fn is_prejit(self) -> bool {
        !matches!(self, PreJitState::None)
    }

    pub fn is_unchecked(self) -> bool {
        matches!(self, PreJitState::Unchecked(_))
    }
}

/// Shared handle to a resident kernel.
///
/// The library stays open while any handle exists, even if the cache has
/// since evicted the entry.
#[derive(Clone)]
pub struct KernelHandle {
    kernel: Arc<LoadedKernel>,
}

impl KernelHandle {
    pub(crate) fn new(kernel: Arc<LoadedKernel>) -> Self {
        Self { kernel }
    }

    /// Entry point, valid for as long as this handle is borrowed
    pub fn entry(&self) -> KernelRef<'_> {
        KernelRef {
            f: self.kernel.entry,
            _handle: PhantomData,
        }
    }

    pub fn is_prejit(&self) -> bool {
        matches!(self.kernel.origin, KernelOrigin::PreJit { .. })
    }

    /// File the kernel was loaded from, `None` for PreJIT kernels
    pub fn library_path(&self) -> Option<&Path> {
        match &self.kernel.origin {
            KernelOrigin::Library(lib) => Some(lib.path()),
            KernelOrigin::PreJit { .. } => None,
        }
    }

    /// Whether both handles refer to the same loaded kernel
    pub fn same_kernel(&self, other: &KernelHandle) -> bool {
        Arc::ptr_eq(&self.kernel, &other.kernel)
    }
}

impl fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kernel.fmt(f)
    }
}

/// A kernel entry point borrowed from a [`KernelHandle`]
#[derive(Debug, Clone, Copy)]
pub struct KernelRef<'a> {
    f: KernelFn,
    _handle: PhantomData<&'a KernelHandle>,
}

impl KernelRef<'_> {
    pub fn as_ptr(&self) -> *const std::ffi::c_void {
        self.f.as_ptr()
    }

    /// # Safety
    /// `F` must be the family's kernel signature and the result must not be
    /// called after the handle is dropped.
    pub unsafe fn cast<F: Copy>(&self) -> F {
        unsafe { self.f.cast() }
    }
}

/// One occupied slot
pub struct CacheEntry {
    identity: KernelIdentity,
    kernel: Arc<LoadedKernel>,
    prejit: PreJitState,
}

impl CacheEntry {
    pub fn identity(&self) -> &KernelIdentity {
        &self.identity
    }

    pub fn prejit(&self) -> PreJitState {
        self.prejit
    }

    pub fn kernel(&self) -> &Arc<LoadedKernel> {
        &self.kernel
    }

    pub fn handle(&self) -> KernelHandle {
        KernelHandle::new(self.kernel.clone())
    }

    /// Must this entry be checked before it is returned?
    pub fn needs_validation(&self) -> bool {
        self.prejit.is_unchecked() || self.identity.family().always_validate()
    }

    /// Survives a sweep that is not freeing everything
    fn is_persistent(&self) -> bool {
        self.prejit.is_prejit()
            || matches!(
                self.identity.family(),
                KernelFamily::UserOp | KernelFamily::UserType
            )
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("name", &self.identity.name().to_string())
            .field("hash", &format_args!("{:016x}", self.identity.hash()))
            .field("prejit", &self.prejit)
            .finish()
    }
}

/// The kernel table
#[derive(Debug, Default)]
pub struct KernelCache {
    slots: Vec<Option<CacheEntry>>,
    populated: usize,
    evictions: u64,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.populated
    }

    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Current slot count; zero when the table is not allocated
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    fn home(&self, hash: u64) -> usize {
        (hash as usize) & (self.slots.len() - 1)
    }

    fn find(&self, identity: &KernelIdentity) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.slots.len() - 1;
        let mut k = self.home(identity.hash());
        loop {
            match &self.slots[k] {
                None => return None,
                Some(entry) if entry.identity.matches(identity) => return Some(k),
                Some(_) => k = (k + 1) & mask,
            }
        }
    }

    /// Probe for `identity`. An empty slot ends the search.
    pub fn lookup(&self, identity: &KernelIdentity) -> Option<&CacheEntry> {
        self.find(identity).and_then(|k| self.slots[k].as_ref())
    }

    pub fn contains(&self, identity: &KernelIdentity) -> bool {
        self.find(identity).is_some()
    }

    /// Install a kernel. The caller has already checked that `identity` is
    /// not present.
    ///
    /// Fails with [`JitError::OutOfMemory`] only if the table had to grow and
    /// the allocation failed; the table is then left unchanged.
    pub fn insert(
        &mut self,
        identity: KernelIdentity,
        kernel: Arc<LoadedKernel>,
        prejit: PreJitState,
    ) -> Result<()> {
        debug_assert!(!self.contains(&identity));
        if GROWTH * (self.populated + 1) > self.slots.len() {
            self.grow()?;
        }
        let mask = self.slots.len() - 1;
        let mut k = self.home(identity.hash());
        while self.slots[k].is_some() {
            k = (k + 1) & mask;
        }
        debug!(
            "jit: cache insert {} at slot {} ({:?})",
            identity.name(),
            k,
            prejit
        );
        self.slots[k] = Some(CacheEntry {
            identity,
            kernel,
            prejit,
        });
        self.populated += 1;
        Ok(())
    }

    fn grow(&mut self) -> Result<()> {
        let new_capacity = if self.slots.is_empty() {
            INITIAL_CAPACITY
        } else {
            self.slots
                .len()
                .checked_mul(GROWTH)
                .ok_or(JitError::OutOfMemory { slots: usize::MAX })?
        };
        let mut slots: Vec<Option<CacheEntry>> = Vec::new();
        slots
            .try_reserve_exact(new_capacity)
            .map_err(|_| JitError::OutOfMemory {
                slots: new_capacity,
            })?;
        slots.resize_with(new_capacity, || None);

        let mask = new_capacity - 1;
        for entry in std::mem::take(&mut self.slots).into_iter().flatten() {
            let mut k = (entry.identity.hash() as usize) & mask;
            while slots[k].is_some() {
                k = (k + 1) & mask;
            }
            slots[k] = Some(entry);
        }
        debug!("jit: cache grown to {} slots", new_capacity);
        self.slots = slots;
        Ok(())
    }

    /// Mark an unchecked PreJIT entry as validated
    pub fn mark_checked(&mut self, identity: &KernelIdentity) {
        if let Some(k) = self.find(identity) {
            if let Some(entry) = self.slots[k].as_mut() {
                if let PreJitState::Unchecked(index) = entry.prejit {
                    entry.prejit = PreJitState::Checked(index);
                }
            }
        }
    }

    /// Remove one entry, closing its library once no handle holds it.
    ///
    /// Following entries of the probe run are shifted back so lookups never
    /// stop early at the hole.
    pub fn remove(&mut self, identity: &KernelIdentity) -> Option<CacheEntry> {
        let mut hole = self.find(identity)?;
        let removed = self.slots[hole].take();
        self.populated -= 1;
        self.evictions += 1;

        let mask = self.slots.len() - 1;
        let mut k = hole;
        loop {
            k = (k + 1) & mask;
            let Some(entry) = &self.slots[k] else {
                break;
            };
            let home = self.home(entry.identity.hash());
            // distance from home to hole is shorter than to k: move it down
            if (hole.wrapping_sub(home) & mask) < (k.wrapping_sub(home) & mask) {
                self.slots[hole] = self.slots[k].take();
                hole = k;
            }
        }
        if self.populated == 0 {
            self.slots = Vec::new();
        }
        removed
    }

    /// Evict entries: everything if `free_all`, otherwise everything except
    /// PreJIT kernels and user operator/type kernels. Frees the table if it
    /// ends up empty. Returns the number of entries evicted.
    pub fn sweep(&mut self, free_all: bool) -> usize {
        if self.slots.is_empty() {
            return 0;
        }
        let mut survivors = Vec::new();
        let mut evicted = 0;
        for slot in self.slots.iter_mut() {
            let Some(entry) = slot.take() else {
                continue;
            };
            if !free_all && entry.is_persistent() {
                survivors.push(entry);
            } else {
                debug!("jit: sweep evicts {}", entry.identity.name());
                evicted += 1;
            }
        }
        self.populated = 0;
        self.evictions += evicted as u64;

        if survivors.is_empty() {
            self.slots = Vec::new();
        } else {
            let mask = self.slots.len() - 1;
            for entry in survivors {
                let mut k = (entry.identity.hash() as usize) & mask;
                while self.slots[k].is_some() {
                    k = (k + 1) & mask;
                }
                self.slots[k] = Some(entry);
                self.populated += 1;
            }
        }
        evicted as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.slots.iter().flatten()
    }
}
