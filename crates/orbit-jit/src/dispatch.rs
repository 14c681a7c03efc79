//! The translation dispatcher.
//!
//! `resolve` is the one entry point the execution engine calls with a guest
//! address. It either hands back a ready compiled block, tells the caller to
//! interpret this block once (somebody else is compiling it, or it is known
//! untranslatable), or reports an unrecoverable fault. The full pipeline on a
//! miss is decode, HIR build, optimize, backend lowering, publish.
//!
//! Staleness is two-tiered: the cheap page-version check runs on every hit,
//! and only a version mismatch pays for re-hashing the guest bytes. A hash
//! match after a version bump (some unrelated write to the same page) just
//! refreshes the snapshot; a mismatch retires the block and recompiles.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace, warn};

use orbit_hir::builder::{build_function, BuildConfig, BuildError, DecodedInst};
use orbit_hir::opt::optimize;
use orbit_hir::HirError;

use crate::backend::{Backend, BackendError, CompiledBlock};
use crate::cache::{BlockState, CacheEntry, CompiledCode, TranslationCache};
use crate::memory::{content_hash, GuestMemory, MemoryError};
use crate::versions::CodeVersionTracker;

/// One decoded guest region, produced by a [`RegionDecoder`].
#[derive(Debug)]
pub struct DecodedRegion {
    /// Instructions in guest program order, starting at the requested
    /// address.
    pub insts: Vec<DecodedInst>,
}

impl DecodedRegion {
    /// Guest bytes covered by the region.
    #[must_use]
    pub fn byte_len(&self) -> u32 {
        match (self.insts.first(), self.insts.last()) {
            (Some(first), Some(last)) => (last.addr + u64::from(last.len) - first.addr) as u32,
            _ => 0,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid encoding {raw:#x} at {addr:#x}")]
    InvalidEncoding { addr: u64, raw: u64 },
    #[error("no decodable instructions at {addr:#x}")]
    EmptyRegion { addr: u64 },
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Decodes one contiguous guest region starting at `addr`. The guest ISA
/// lives entirely behind this trait; the dispatcher only sees the decoded
/// stream.
pub trait RegionDecoder: Sync {
    fn decode(&self, mem: &dyn GuestMemory, addr: u64) -> Result<DecodedRegion, DecodeError>;
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Hir(#[from] HirError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// The guest rewrote the region while it was being compiled. The claim is
    /// released and the next lookup starts over.
    #[error("guest code at {addr:#x} changed during compilation")]
    CodeChanged { addr: u64 },
}

#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    pub build: BuildConfig,
    /// Translation cache entry cap (LRU beyond this).
    pub max_cache_entries: usize,
    /// Page granularity for write tracking.
    pub page_shift: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            build: BuildConfig::default(),
            max_cache_entries: 4096,
            page_shift: 12,
        }
    }
}

/// Outcome of one [`Dispatcher::resolve`] call.
#[derive(Debug)]
pub enum Resolution {
    /// Execute this block.
    Compiled(Arc<CompiledBlock>),
    /// Interpret one block at this address and ask again afterwards.
    InterpretFallback,
    /// The address is not executable at all (e.g. outside guest memory).
    Fatal(CompileError),
}

pub struct Dispatcher<D, B> {
    decoder: D,
    backend: B,
    cache: TranslationCache,
    versions: CodeVersionTracker,
    config: DispatcherConfig,
}

impl<D: RegionDecoder, B: Backend> Dispatcher<D, B> {
    #[must_use]
    pub fn new(decoder: D, backend: B, guest_mem_len: u64, config: DispatcherConfig) -> Self {
        Dispatcher {
            decoder,
            backend,
            cache: TranslationCache::new(config.max_cache_entries),
            versions: CodeVersionTracker::new(guest_mem_len, config.page_shift),
            config,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn versions(&self) -> &CodeVersionTracker {
        &self.versions
    }

    /// Report a guest write so overlapping compiled code is detected as
    /// stale on its next lookup.
    pub fn notify_write(&self, addr: u64, len: u64) {
        self.versions.bump_write(addr, len);
    }

    /// Explicitly drop translations overlapping `[addr, addr + len)`: bump
    /// the page versions and retire matching cache entries. Also lifts
    /// failure suppression for the range.
    pub fn invalidate_range(&self, addr: u64, len: u64) {
        self.versions.bump_write(addr, len);
        self.cache.invalidate_range(addr, len);
    }

    /// Resolve the guest address to something the execution engine can run.
    pub fn resolve<M: GuestMemory>(&self, mem: &M, addr: u64) -> Resolution {
        let entry = self.cache.entry(addr);
        loop {
            match entry.state() {
                BlockState::Ready => {
                    let Some(code) = entry.compiled() else {
                        // Published state without payload cannot happen
                        // (payload is written before the Ready store); treat
                        // as a spurious read and re-check.
                        continue;
                    };
                    match self.validate_hit(mem, addr, &entry, &code) {
                        Ok(true) => return Resolution::Compiled(code.block),
                        Ok(false) => {
                            debug!(addr, "stale block retired");
                            entry.retire();
                        }
                        Err(err) => return Resolution::Fatal(err),
                    }
                }
                BlockState::Compiling => {
                    trace!(addr, "compilation in flight, interpreting");
                    return Resolution::InterpretFallback;
                }
                BlockState::Failed => {
                    trace!(addr, "translation previously failed, interpreting");
                    return Resolution::InterpretFallback;
                }
                BlockState::Uncompiled | BlockState::Stale => {
                    if !entry.try_claim() {
                        // Lost the race; the winner's state is visible on the
                        // next iteration.
                        continue;
                    }
                    return self.compile_claimed(mem, addr, &entry);
                }
            }
        }
    }

    /// Check a `Ready` hit for staleness: `Ok(true)` run it, `Ok(false)`
    /// retire it.
    fn validate_hit<M: GuestMemory>(
        &self,
        mem: &M,
        addr: u64,
        entry: &CacheEntry,
        code: &CompiledCode,
    ) -> Result<bool, CompileError> {
        if let Some(snapshot) = &code.versions {
            if self.versions.is_current(snapshot) {
                return Ok(true);
            }
        }
        // Version counters moved (or the region is too large to snapshot):
        // the hash decides.
        let bytes = self.read_region(mem, addr, code.byte_len)?;
        if content_hash(&bytes) != code.content_hash {
            return Ok(false);
        }
        if code.versions.is_some() {
            // False alarm from an unrelated write to a shared page; refresh
            // the snapshot so the cheap check passes again.
            let snapshot = self.versions.snapshot(addr, u64::from(code.byte_len));
            entry.refresh_snapshot(snapshot);
        }
        Ok(true)
    }

    /// Run the full pipeline for an entry this thread has claimed, and leave
    /// the entry in the state matching the outcome.
    fn compile_claimed<M: GuestMemory>(
        &self,
        mem: &M,
        addr: u64,
        entry: &CacheEntry,
    ) -> Resolution {
        match self.compile(mem, addr, entry) {
            Ok(block) => Resolution::Compiled(block),
            Err(err @ (CompileError::Memory(_) | CompileError::Decode(DecodeError::Memory(_)))) => {
                entry.abandon();
                Resolution::Fatal(err)
            }
            Err(CompileError::CodeChanged { addr }) => {
                debug!(addr, "code changed mid-compilation, retrying later");
                entry.abandon();
                Resolution::InterpretFallback
            }
            Err(err) => {
                warn!(addr, error = %err, "translation failed");
                entry.fail();
                Resolution::InterpretFallback
            }
        }
    }

    fn compile<M: GuestMemory>(
        &self,
        mem: &M,
        addr: u64,
        entry: &CacheEntry,
    ) -> Result<Arc<CompiledBlock>, CompileError> {
        let region = self.decoder.decode(mem, addr)?;
        let byte_len = region.byte_len();
        let bytes = self.read_region(mem, addr, byte_len)?;
        let hash = content_hash(&bytes);

        let mut func = build_function(&region.insts, &self.config.build, hash)?;
        optimize(&mut func)?;
        let instr_count = func.live_instr_count() as u32;
        debug!(addr, bytes = byte_len, instrs = instr_count, "compiling block");
        let mut block = self.backend.compile(&func)?;
        block.guest_start = addr;
        block.guest_len = byte_len;
        block.instr_count = instr_count;

        // Snapshot, then confirm the bytes still hash the same. A write
        // before the snapshot is caught by the re-hash; a write after it
        // bumps a counter past the snapshot and is caught on the next hit.
        let snapshot = self.versions.snapshot(addr, u64::from(byte_len));
        let bytes = self.read_region(mem, addr, byte_len)?;
        if content_hash(&bytes) != hash {
            return Err(CompileError::CodeChanged { addr });
        }

        let block = Arc::new(block);
        entry.publish(CompiledCode {
            block: Arc::clone(&block),
            content_hash: hash,
            byte_len,
            versions: snapshot,
        });
        Ok(block)
    }

    fn read_region<M: GuestMemory>(
        &self,
        mem: &M,
        addr: u64,
        len: u32,
    ) -> Result<Vec<u8>, CompileError> {
        let mut bytes = vec![0u8; len as usize];
        mem.read_code(addr, &mut bytes)?;
        Ok(bytes)
    }
}
