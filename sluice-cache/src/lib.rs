//! In-memory loading cache for sluice.
//!
//! [`LoadingCache`] stores in-flight and completed loads keyed by request
//! fingerprint. Concurrent lookups for the same key share one load, entries
//! expire a fixed time after they were written, and the least recently used
//! entries are evicted beyond a size limit. A background task sweeps expired
//! entries until the cache is dropped or its maintenance is shut down.

mod cache;
mod loading;
mod maintenance;

pub use cache::{
    CacheSettings, CacheStats, DEFAULT_CLEANUP_INTERVAL, DEFAULT_EXPIRE_AFTER_WRITE,
    DEFAULT_MAXIMUM_SIZE,
};
pub use loading::{CachedLoad, LoadingCache, LoadingCacheBuilder};
