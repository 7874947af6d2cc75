//! Cache configuration

use std::collections::BTreeMap;
use std::time::Duration;

use crate::eviction::EvictionPolicy;
use crate::key::EntryType;

const MB: u64 = 1024 * 1024;
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Immutable cache policy. Build it, then hand it to `IdentityCache::new`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum total payload size in bytes
    pub max_size: u64,
    /// Maximum number of entries
    pub max_entries: u64,
    /// TTL for types without an override
    pub default_ttl: Duration,
    /// Per-type TTL overrides
    pub type_ttls: BTreeMap<EntryType, Duration>,
    /// How often the janitor sweeps expired entries
    pub cleanup_interval: Duration,
    /// Emit events and record operation timings
    pub enable_metrics: bool,
    /// Maintain the tag index (tag reads and invalidation)
    pub enable_tags: bool,
    /// Hand expired entries found on read to the janitor instead of deleting inline
    pub async_eviction: bool,
    /// Run the warmup source when the cache starts
    pub warmup_on_start: bool,
    /// Let the ledger facade preload active identities on refresh
    pub preload_identities: bool,
    /// Victim selection policy
    pub eviction_policy: EvictionPolicy,
    /// Per-observer event queue depth
    pub observer_queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100 * MB,
            max_entries: 10_000,
            default_ttl: 30 * MINUTE,
            type_ttls: type_ttls(HOUR, 30 * MINUTE, 2 * HOUR, 15 * MINUTE, 10 * MINUTE),
            cleanup_interval: 5 * MINUTE,
            enable_metrics: true,
            enable_tags: true,
            async_eviction: true,
            warmup_on_start: true,
            preload_identities: true,
            eviction_policy: EvictionPolicy::Hybrid,
            observer_queue_capacity: 1024,
        }
    }
}

fn type_ttls(
    identity: Duration,
    credential: Duration,
    did_document: Duration,
    consent: Duration,
    zk_proof: Duration,
) -> BTreeMap<EntryType, Duration> {
    BTreeMap::from([
        (EntryType::Identity, identity),
        (EntryType::EnrichedIdentity, identity),
        (EntryType::Credential, credential),
        (EntryType::DidDocument, did_document),
        (EntryType::Consent, consent),
        (EntryType::ZkProof, zk_proof),
        (EntryType::ShareRequest, 15 * MINUTE),
    ])
}

impl CacheConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Larger, longer-lived cache for busy nodes
    pub fn high_performance() -> Self {
        Self {
            max_size: 500 * MB,
            max_entries: 50_000,
            default_ttl: HOUR,
            type_ttls: type_ttls(4 * HOUR, 2 * HOUR, 8 * HOUR, HOUR, 30 * MINUTE),
            cleanup_interval: 2 * MINUTE,
            ..Self::default()
        }
    }

    /// Small cache with no background extras
    pub fn low_memory() -> Self {
        Self {
            max_size: 10 * MB,
            max_entries: 1_000,
            default_ttl: 10 * MINUTE,
            type_ttls: type_ttls(15 * MINUTE, 10 * MINUTE, 20 * MINUTE, 5 * MINUTE, 5 * MINUTE),
            cleanup_interval: MINUTE,
            enable_metrics: false,
            enable_tags: false,
            async_eviction: false,
            warmup_on_start: false,
            preload_identities: false,
            ..Self::default()
        }
    }

    /// TTL applied to `entry_type` when the caller does not pass one
    pub fn ttl_for(&self, entry_type: &EntryType) -> Duration {
        self.type_ttls
            .get(entry_type)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Set the byte budget
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    /// Set the entry budget
    pub fn with_max_entries(mut self, entries: u64) -> Self {
        self.max_entries = entries;
        self
    }

    /// Set the default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Override the TTL of one entry type
    pub fn with_type_ttl(mut self, entry_type: EntryType, ttl: Duration) -> Self {
        self.type_ttls.insert(entry_type, ttl);
        self
    }

    /// Set the janitor interval
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Enable or disable events and timings
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    /// Enable or disable the tag index
    pub fn with_tags(mut self, enabled: bool) -> Self {
        self.enable_tags = enabled;
        self
    }

    /// Enable or disable deferred deletion of expired entries
    pub fn with_async_eviction(mut self, enabled: bool) -> Self {
        self.async_eviction = enabled;
        self
    }

    /// Enable or disable warmup on start
    pub fn with_warmup_on_start(mut self, enabled: bool) -> Self {
        self.warmup_on_start = enabled;
        self
    }

    /// Enable or disable identity preload
    pub fn with_preload_identities(mut self, enabled: bool) -> Self {
        self.preload_identities = enabled;
        self
    }

    /// Set the eviction policy
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Set the per-observer queue depth
    pub fn with_observer_queue_capacity(mut self, capacity: usize) -> Self {
        self.observer_queue_capacity = capacity.max(1);
        self
    }
}
