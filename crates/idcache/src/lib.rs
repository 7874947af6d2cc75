//! # idcache
//!
//! In-process identity cache with TTLs, secondary indices, pluggable
//! eviction and an observer pipeline.
//!
//! ## Architecture
//! - **Store**: AHash map of entries behind one RwLock; hits only take the read lock
//! - **Indexer**: owner, type and tag multimaps, re-validated against the store on read
//! - **Eviction**: LRU, LFU, TTL, SIZE or HYBRID scoring, run inline on overflow
//! - **Janitor**: background thread sweeping expired entries
//! - **Observers**: one bounded queue and worker thread per observer
//! - **Facade**: read/write-through over an `idstore` ledger
//!
//! ## Example
//! ```
//! use idcache::{CacheConfig, CacheKey, EntryType, IdentityCache};
//!
//! let cache = IdentityCache::new(CacheConfig::default());
//! let key = CacheKey::new(EntryType::Identity, "addr1");
//! cache.set_default(key.clone(), "alice".to_string()).unwrap();
//! assert_eq!(*cache.get(&key).unwrap().data, "alice");
//! ```

#![warn(missing_docs)]

mod cache;
mod config;
mod entry;
mod error;
mod event;
mod eviction;
mod facade;
mod index;
mod janitor;
mod key;
pub mod observer;
mod stats;

pub use cache::IdentityCache;
pub use config::CacheConfig;
pub use entry::{CacheEntry, SetOptions};
pub use error::{Error, Result};
pub use event::{CacheEvent, CacheEventKind};
pub use eviction::{rank, score, EntryMeta, EvictionPolicy};
pub use facade::{
    Cacheable, CachedLedger, CachedRecord, ComputedFields, EnrichedIdentity, KycLevel,
    DEFAULT_PRELOAD_LIMIT,
};
pub use index::Indexer;
pub use janitor::WarmupSource;
pub use key::{CacheKey, EntryType};
pub use observer::{CacheObserver, ObserverBus, ObserverId};
pub use stats::{CacheMetrics, CacheStats, TypeCounts};
