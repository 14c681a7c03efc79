//! The translation cache: guest entry address to compiled-block state.
//!
//! Each guest address maps to one [`CacheEntry`] holding an atomic state
//! machine. A compilation is claimed with a single compare-and-swap, so under
//! concurrent resolution exactly one thread compiles a given address; losers
//! fall back to interpretation instead of blocking. Publishing writes the
//! compiled payload first and flips the state to `Ready` last (release
//! ordering), so any thread observing `Ready` also observes the payload.
//!
//! State machine per entry:
//!
//! ```text
//! Uncompiled --claim--> Compiling --publish--> Ready --retire--> Stale
//!      ^                    |                                      |
//!      |                    +--fail--> Failed                      |
//!      +------invalidate------------------+ <-------claim----------+
//! ```
//!
//! `Failed` is terminal until explicit invalidation: a region that failed to
//! translate once will fail again byte-for-byte, so retrying on every lookup
//! only burns translation time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::CompiledBlock;
use crate::versions::VersionSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockState {
    Uncompiled = 0,
    Compiling = 1,
    Ready = 2,
    Failed = 3,
    Stale = 4,
}

impl BlockState {
    fn from_raw(raw: u8) -> BlockState {
        match raw {
            0 => BlockState::Uncompiled,
            1 => BlockState::Compiling,
            2 => BlockState::Ready,
            3 => BlockState::Failed,
            _ => BlockState::Stale,
        }
    }
}

/// The published payload of a `Ready` entry.
#[derive(Clone, Debug)]
pub struct CompiledCode {
    pub block: Arc<CompiledBlock>,
    /// FNV-1a 64 of the guest bytes the block was compiled from.
    pub content_hash: u64,
    pub byte_len: u32,
    /// Page versions at publish time; `None` when the region was too large to
    /// snapshot, in which case every hit re-checks the content hash.
    pub versions: Option<VersionSnapshot>,
}

#[derive(Debug)]
pub struct CacheEntry {
    pub guest_start: u64,
    state: AtomicU8,
    compiled: Mutex<Option<CompiledCode>>,
    last_used: AtomicU64,
}

impl CacheEntry {
    fn new(guest_start: u64) -> CacheEntry {
        CacheEntry {
            guest_start,
            state: AtomicU8::new(BlockState::Uncompiled as u8),
            compiled: Mutex::new(None),
            last_used: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn state(&self) -> BlockState {
        BlockState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Claim the compilation: CAS `Uncompiled`/`Stale` to `Compiling`.
    /// Exactly one caller per transition wins.
    #[must_use]
    pub fn try_claim(&self) -> bool {
        for from in [BlockState::Uncompiled, BlockState::Stale] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    BlockState::Compiling as u8,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// Publish a compiled block: payload first, `Ready` last.
    pub fn publish(&self, code: CompiledCode) {
        *self.compiled.lock().unwrap_or_else(|e| e.into_inner()) = Some(code);
        self.state
            .store(BlockState::Ready as u8, Ordering::Release);
    }

    /// Record a translation failure. Subsequent lookups fall back to the
    /// interpreter without re-attempting until invalidation.
    pub fn fail(&self) {
        self.state.store(BlockState::Failed as u8, Ordering::Release);
    }

    /// Give up a claim without recording a failure; the next lookup may try
    /// again. Used when the guest bytes changed mid-compilation.
    pub fn abandon(&self) {
        self.state.store(BlockState::Stale as u8, Ordering::Release);
    }

    /// Retire a `Ready` entry whose guest bytes changed.
    pub fn retire(&self) {
        let _ = self.state.compare_exchange(
            BlockState::Ready as u8,
            BlockState::Stale as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    #[must_use]
    pub fn compiled(&self) -> Option<CompiledCode> {
        self.compiled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the version snapshot of the published payload after a hash
    /// re-check proved the bytes unchanged.
    pub fn refresh_snapshot(&self, versions: Option<VersionSnapshot>) {
        if let Some(code) = self
            .compiled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
        {
            code.versions = versions;
        }
    }

    /// Extent of the published block, if any.
    fn compiled_len(&self) -> Option<u32> {
        self.compiled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| c.byte_len)
    }
}

/// Guest address to entry map with count-capped LRU eviction.
pub struct TranslationCache {
    entries: Mutex<HashMap<u64, Arc<CacheEntry>>>,
    max_entries: usize,
    tick: AtomicU64,
}

impl TranslationCache {
    #[must_use]
    pub fn new(max_entries: usize) -> TranslationCache {
        TranslationCache {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            tick: AtomicU64::new(0),
        }
    }

    /// Fetch or create the entry for `addr`, refreshing its recency.
    ///
    /// A new entry may evict the least recently used one. An evicted entry
    /// stays alive for any thread still holding its `Arc`; a later request
    /// for the same address starts over with a fresh entry.
    #[must_use]
    pub fn entry(&self, addr: u64) -> Arc<CacheEntry> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(&addr) {
            entry.last_used.store(tick, Ordering::Relaxed);
            return Arc::clone(entry);
        }

        if entries.len() >= self.max_entries {
            // Entries mid-compilation are not eviction candidates; the
            // claiming thread is about to publish into them.
            let victim = entries
                .iter()
                .filter(|(_, e)| e.state() != BlockState::Compiling)
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(&addr, _)| addr);
            if let Some(victim) = victim {
                entries.remove(&victim);
            }
        }

        let entry = Arc::new(CacheEntry::new(addr));
        entry.last_used.store(tick, Ordering::Relaxed);
        entries.insert(addr, Arc::clone(&entry));
        entry
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&addr)
    }

    /// Mark every entry overlapping `[addr, addr + len)` for retranslation.
    ///
    /// `Ready` blocks go `Stale`; `Failed` entries are reset to `Uncompiled`
    /// (invalidation is the one event that lifts failure suppression).
    /// Entries that never compiled have no recorded extent and match on their
    /// start address alone.
    pub fn invalidate_range(&self, addr: u64, len: u64) {
        let end = addr.saturating_add(len);
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for entry in entries.values() {
            let entry_end = match entry.compiled_len() {
                Some(byte_len) => entry.guest_start + u64::from(byte_len),
                None => entry.guest_start + 1,
            };
            if entry.guest_start >= end || entry_end <= addr {
                continue;
            }
            match entry.state() {
                BlockState::Ready => entry.retire(),
                BlockState::Failed => entry
                    .state
                    .store(BlockState::Uncompiled as u8, Ordering::Release),
                _ => {}
            }
        }
    }
}
