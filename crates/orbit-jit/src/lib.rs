//! Orbit's translation runtime: the cache, dispatcher, and backend contract
//! around [`orbit_hir`].
//!
//! Guest code enters through [`Dispatcher::resolve`]: a guest address is
//! resolved to a compiled block (translating it on first touch), a one-shot
//! interpreter fallback, or a fatal fault. The cache guarantees that under
//! concurrent resolution each address is compiled by exactly one thread, that
//! blocks invalidated by guest writes are retired before they can run again,
//! and that an address whose translation failed is not retried until it is
//! explicitly invalidated.

pub mod backend;
pub mod cache;
pub mod dispatch;
pub mod memory;
pub mod versions;

pub use backend::{Backend, BackendError, CompiledBlock};
pub use cache::{BlockState, CacheEntry, CompiledCode, TranslationCache};
pub use dispatch::{
    CompileError, DecodeError, DecodedRegion, Dispatcher, DispatcherConfig, RegionDecoder,
    Resolution,
};
pub use memory::{content_hash, GuestMemory, MemoryError};
pub use versions::{CodeVersionTracker, VersionSnapshot, MAX_SNAPSHOT_PAGES};
