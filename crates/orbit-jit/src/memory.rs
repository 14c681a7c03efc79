//! Guest code memory access.
//!
//! The translation pipeline only ever reads guest memory (fetching the bytes
//! to decode and hash); writes stay with the memory subsystem, which reports
//! them through [`CodeVersionTracker::bump_write`](crate::CodeVersionTracker::bump_write)
//! or [`Dispatcher::invalidate_range`](crate::Dispatcher::invalidate_range).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("code read at {addr:#x}+{len} is out of bounds")]
    OutOfBounds { addr: u64, len: usize },
}

/// Read-only view of guest code memory.
///
/// Implementations must be callable from any translation thread; reads racing
/// guest writes are tolerated because the dispatcher re-hashes the region
/// after taking its version snapshot.
pub trait GuestMemory: Sync {
    /// Total addressable guest bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` with the guest bytes at `addr`.
    fn read_code(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryError>;
}

/// FNV-1a 64 over a guest code region. Stored on every compiled block and
/// re-checked when the region's version counters move, so a counter bump from
/// an unrelated write to the same page does not force a recompile.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_known_vectors() {
        assert_eq!(content_hash(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(content_hash(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(content_hash(b"foobar"), 0x85dd_1e2d_6b52_2ea3);
    }

    #[test]
    fn single_byte_changes_move_the_hash() {
        let a = content_hash(&[0x90, 0x90, 0xc3]);
        let b = content_hash(&[0x90, 0x91, 0xc3]);
        assert_ne!(a, b);
    }
}
