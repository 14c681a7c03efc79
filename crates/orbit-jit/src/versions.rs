//! Page-granular write versioning for stale-code detection.
//!
//! Every guest page carries a monotonically increasing version counter; the
//! memory subsystem bumps the counters covering a write, and each compiled
//! block carries a snapshot of the counters covering its guest bytes. A hit
//! whose snapshot no longer matches is suspect and gets its content hash
//! re-checked before the block is retired.

use std::sync::atomic::{AtomicU32, Ordering};

/// Upper bound on pages per snapshot. Regions spanning more pages are
/// compiled without a snapshot and re-validated by content hash on every
/// lookup instead of growing the snapshot without bound.
pub const MAX_SNAPSHOT_PAGES: usize = 64;

/// Version counters for the pages covering a contiguous region at compile
/// time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionSnapshot {
    first_page: usize,
    versions: Vec<u32>,
}

pub struct CodeVersionTracker {
    page_shift: u32,
    versions: Vec<AtomicU32>,
}

impl CodeVersionTracker {
    /// Track `mem_len` guest bytes at `1 << page_shift` byte granularity.
    #[must_use]
    pub fn new(mem_len: u64, page_shift: u32) -> CodeVersionTracker {
        let pages = (mem_len >> page_shift) + u64::from(mem_len & ((1 << page_shift) - 1) != 0);
        let mut versions = Vec::with_capacity(pages as usize);
        versions.resize_with(pages as usize, AtomicU32::default);
        CodeVersionTracker {
            page_shift,
            versions,
        }
    }

    #[must_use]
    pub fn page_size(&self) -> u64 {
        1 << self.page_shift
    }

    fn page_range(&self, addr: u64, len: u64) -> std::ops::Range<usize> {
        if len == 0 {
            return 0..0;
        }
        let first = (addr >> self.page_shift) as usize;
        let last = (addr.saturating_add(len - 1) >> self.page_shift) as usize;
        // Clamp instead of panicking; writes beyond tracked memory cannot
        // invalidate tracked code.
        first.min(self.versions.len())..(last + 1).min(self.versions.len())
    }

    /// Record a guest write covering `[addr, addr + len)`. Out-of-range
    /// addresses are ignored.
    pub fn bump_write(&self, addr: u64, len: u64) {
        for page in self.page_range(addr, len) {
            self.versions[page].fetch_add(1, Ordering::Release);
        }
    }

    /// Capture the counters covering `[addr, addr + len)`, or `None` when the
    /// region spans more than [`MAX_SNAPSHOT_PAGES`] pages.
    #[must_use]
    pub fn snapshot(&self, addr: u64, len: u64) -> Option<VersionSnapshot> {
        let range = self.page_range(addr, len);
        if range.len() > MAX_SNAPSHOT_PAGES {
            return None;
        }
        Some(VersionSnapshot {
            first_page: range.start,
            versions: range
                .map(|page| self.versions[page].load(Ordering::Acquire))
                .collect(),
        })
    }

    /// True when no tracked page covered by `snapshot` has been written since
    /// it was taken.
    #[must_use]
    pub fn is_current(&self, snapshot: &VersionSnapshot) -> bool {
        snapshot.versions.iter().enumerate().all(|(i, &v)| {
            self.versions
                .get(snapshot.first_page + i)
                .is_none_or(|cur| cur.load(Ordering::Acquire) == v)
        })
    }
}
