//! IdentityCache: indexed, TTL-aware cache with pluggable eviction

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::RandomState;
use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, SetOptions, StoredEntry};
use crate::error::{Error, Result};
use crate::event::{CacheEvent, CacheEventKind};
use crate::eviction;
use crate::index::Indexer;
use crate::janitor::{Janitor, WarmupSource};
use crate::key::{CacheKey, EntryType};
use crate::observer::{CacheObserver, ObserverBus, ObserverId};
use crate::stats::{CacheMetrics, CacheStats, MetricsRecorder, Op, StatsCounters};

/// Counts bytes written without keeping them
struct ByteCount(u64);

impl io::Write for ByteCount {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Length of the JSON encoding of `value`
fn encoded_size<V: Serialize>(value: &V) -> serde_json::Result<u64> {
    let mut count = ByteCount(0);
    serde_json::to_writer(&mut count, value)?;
    Ok(count.0)
}

/// Live entries plus the aggregates derived from them
struct Store<V> {
    entries: HashMap<CacheKey, StoredEntry<V>, RandomState>,
    total_size: u64,
    tagged: u64,
}

impl<V> Store<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::with_hasher(RandomState::new()),
            total_size: 0,
            tagged: 0,
        }
    }

    fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    /// `key` must not be present
    fn insert(&mut self, key: CacheKey, entry: StoredEntry<V>) {
        self.total_size += entry.size;
        if entry.caller_tagged {
            self.tagged += 1;
        }
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: &CacheKey) -> Option<StoredEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.total_size -= entry.size;
        if entry.caller_tagged {
            self.tagged -= 1;
        }
        Some(entry)
    }

    fn live(&self, key: &CacheKey, now: Instant) -> Option<&StoredEntry<V>> {
        self.entries.get(key).filter(|e| !e.is_expired(now))
    }
}

/// State shared between the cache handle and its janitor thread.
///
/// Lock order is store, then indexer. The indexer is only touched while the
/// store lock is held.
pub(crate) struct Shared<V> {
    config: CacheConfig,
    store: RwLock<Store<V>>,
    indexer: Indexer,
    counters: StatsCounters,
    metrics: MetricsRecorder,
    bus: ObserverBus,
    expired_tx: Mutex<Option<Sender<CacheKey>>>,
}

impl<V> Shared<V> {
    fn emit(&self, event: CacheEvent) {
        if self.config.enable_metrics {
            self.bus.publish(event);
        }
    }

    fn record_op(&self, op: Op, started: Instant) -> Duration {
        let elapsed = started.elapsed();
        if self.config.enable_metrics {
            self.metrics.record_op(op, elapsed);
        }
        elapsed
    }

    fn index_locked(&self, key: &CacheKey, entry: &StoredEntry<V>) {
        self.indexer.index_by_type(key);
        if let Some(owner) = &entry.owner {
            self.indexer.index_by_owner(owner, key);
        }
        if self.config.enable_tags {
            for tag in &entry.tags {
                self.indexer.index_by_tag(tag, key);
            }
        }
    }

    fn remove_locked(&self, store: &mut Store<V>, key: &CacheKey) -> Option<StoredEntry<V>> {
        let entry = store.remove(key)?;
        self.indexer.remove_from_index(key);
        Some(entry)
    }

    fn needs_eviction(&self, store: &Store<V>, incoming: u64) -> bool {
        store.total_size + incoming > self.config.max_size || store.len() >= self.config.max_entries
    }

    /// Remove victims until `incoming` bytes fit and there is room for one
    /// more entry, or nothing is left to evict.
    fn evict_locked(&self, store: &mut Store<V>, incoming: u64, now: Instant, events: &mut Vec<CacheEvent>) {
        let policy = self.config.eviction_policy;
        let needed = (store.total_size + incoming).saturating_sub(self.config.max_size);
        let candidates = store
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.meta()))
            .collect();

        let mut freed = 0u64;
        let mut evicted = 0u64;
        for key in eviction::rank(candidates, policy, now) {
            if freed >= needed && store.len() < self.config.max_entries {
                break;
            }
            if let Some(entry) = self.remove_locked(store, &key) {
                freed += entry.size;
                evicted += 1;
                self.counters.record_eviction();
                events.push(
                    CacheEvent::new(CacheEventKind::Evict)
                        .with_key(key)
                        .with_size(entry.size)
                        .with_meta("policy", policy.as_str()),
                );
            }
        }

        if evicted > 0 {
            self.metrics.record_evictions(evicted);
            debug!(evicted, freed, %policy, "evicted cache entries");
        }
    }

    /// Delete `key` if it is still expired. Returns whether it was removed.
    pub(crate) fn remove_expired(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        let removed = {
            let mut store = self.store.write();
            match store.entries.get(key) {
                Some(entry) if entry.is_expired(now) => self.remove_locked(&mut store, key),
                _ => None,
            }
        };
        match removed {
            Some(entry) => {
                self.metrics.record_expirations(1);
                self.emit(
                    CacheEvent::new(CacheEventKind::Expire)
                        .with_key(key.clone())
                        .with_size(entry.size),
                );
                true
            }
            None => false,
        }
    }

    /// Delete every expired entry. Returns how many were removed.
    pub(crate) fn sweep_expired(&self) -> usize {
        let started = Instant::now();
        let removed: Vec<(CacheKey, u64)> = {
            let mut store = self.store.write();
            let expired: Vec<CacheKey> = store
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(started))
                .map(|(key, _)| key.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|key| {
                    let entry = self.remove_locked(&mut store, &key)?;
                    Some((key, entry.size))
                })
                .collect()
        };

        let count = removed.len();
        if count > 0 {
            self.metrics.record_expirations(count as u64);
        }
        for (key, size) in removed {
            self.emit(CacheEvent::new(CacheEventKind::Expire).with_key(key).with_size(size));
        }
        self.emit(
            CacheEvent::new(CacheEventKind::Cleanup)
                .with_duration(started.elapsed())
                .with_meta("count", count as u64),
        );
        count
    }

    /// Hand an expired key to the janitor, or delete it now
    fn schedule_expiry(&self, key: &CacheKey) {
        if self.config.async_eviction {
            if let Some(tx) = self.expired_tx.lock().as_ref() {
                if tx.try_send(key.clone()).is_ok() {
                    return;
                }
            }
        }
        self.remove_expired(key);
    }
}

/// Thread-safe identity cache.
///
/// Owns its entries, indices, statistics and observer bus. Wrap it in an
/// `Arc` to share it between threads.
pub struct IdentityCache<V> {
    shared: Arc<Shared<V>>,
    janitor: Mutex<Option<Janitor>>,
    warmup: RwLock<Option<Arc<dyn WarmupSource<V>>>>,
}

impl<V> IdentityCache<V>
where
    V: Serialize + Send + Sync + 'static,
{
    /// Create a stopped cache
    ///
    /// # Arguments
    /// * `config` - Capacity, TTL and eviction policy
    pub fn new(config: CacheConfig) -> Self {
        let bus = ObserverBus::new(config.observer_queue_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                store: RwLock::new(Store::new()),
                indexer: Indexer::new(),
                counters: StatsCounters::new(),
                metrics: MetricsRecorder::new(),
                bus,
                expired_tx: Mutex::new(None),
            }),
            janitor: Mutex::new(None),
            warmup: RwLock::new(None),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Look up a live entry
    ///
    /// # Arguments
    /// * `key` - Entry key
    ///
    /// # Returns
    /// * `Option<CacheEntry<V>>` - `None` if absent or expired
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let started = Instant::now();
        let mut expired = false;
        let found = {
            let store = self.shared.store.read();
            match store.entries.get(key) {
                Some(entry) if !entry.is_expired(started) => {
                    entry.touch(started);
                    Some(entry.view(key))
                }
                Some(_) => {
                    expired = true;
                    None
                }
                None => None,
            }
        };

        let hit = found.is_some();
        if hit {
            self.shared.counters.record_hit();
        } else {
            self.shared.counters.record_miss();
        }
        if expired {
            self.shared.schedule_expiry(key);
        }

        if self.shared.config.enable_metrics {
            self.shared.metrics.record_lookup(&key.entry_type, hit);
            let elapsed = self.shared.record_op(Op::Get, started);
            let kind = if hit { CacheEventKind::Hit } else { CacheEventKind::Miss };
            let size = found.as_ref().map_or(0, |e| e.size);
            self.shared.emit(
                CacheEvent::new(kind)
                    .with_key(key.clone())
                    .with_size(size)
                    .with_duration(elapsed),
            );
        }
        found
    }

    /// Look up a live entry and return only its payload
    pub fn get_value(&self, key: &CacheKey) -> Option<Arc<V>> {
        self.get(key).map(|entry| entry.data)
    }

    /// Insert or replace an entry
    ///
    /// # Arguments
    /// * `key` - Entry key
    /// * `data` - Payload
    /// * `ttl` - Lifetime, `None` never expires
    pub fn set(&self, key: CacheKey, data: V, ttl: Option<Duration>) -> Result<()> {
        self.set_with(
            key,
            data,
            SetOptions {
                ttl,
                ..SetOptions::default()
            },
        )
    }

    /// Insert or replace an entry under its type's configured TTL
    pub fn set_default(&self, key: CacheKey, data: V) -> Result<()> {
        let ttl = self.shared.config.ttl_for(&key.entry_type);
        self.set(key, data, Some(ttl))
    }

    /// Insert or replace an entry with extra tags and an owner
    ///
    /// Identity, DID document and enriched identity keys are indexed under
    /// their own logical key when no owner is given. Evicts before inserting
    /// when the cache is full; eviction never fails the write.
    ///
    /// # Returns
    /// * `Result<()>` - `Error::Encoding` if `data` cannot be JSON encoded
    pub fn set_with(&self, key: CacheKey, data: V, options: SetOptions) -> Result<()> {
        let started = Instant::now();
        let size = match encoded_size(&data) {
            Ok(size) => size,
            Err(source) => {
                self.shared.metrics.record_set_error();
                self.shared.emit(
                    CacheEvent::new(CacheEventKind::Error)
                        .with_key(key.clone())
                        .with_meta("operation", "set")
                        .with_meta("error", source.to_string()),
                );
                return Err(Error::Encoding { key, source });
            }
        };

        let SetOptions { ttl, tags: extra, owner } = options;
        let caller_tagged = !extra.is_empty();
        let mut tags = key.entry_type.default_tags();
        for tag in extra {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        let owner = owner.or_else(|| key.entry_type.is_owner_keyed().then(|| key.key.clone()));

        let now = Instant::now();
        let entry = StoredEntry::new(Arc::new(data), size, now, ttl, tags, owner, caller_tagged);

        let mut events = Vec::new();
        let (replaced, entries, total_size) = {
            let mut store = self.shared.store.write();
            let replaced = self.shared.remove_locked(&mut store, &key).is_some();
            if self.shared.needs_eviction(&store, size) {
                self.shared.evict_locked(&mut store, size, now, &mut events);
            }
            self.shared.index_locked(&key, &entry);
            store.insert(key.clone(), entry);
            (replaced, store.len(), store.total_size)
        };

        self.shared.metrics.record_usage(entries, total_size);
        let elapsed = self.shared.record_op(Op::Set, started);
        for event in events {
            self.shared.emit(event);
        }
        self.shared.emit(
            CacheEvent::new(CacheEventKind::Set)
                .with_key(key)
                .with_size(size)
                .with_duration(elapsed)
                .with_meta("total_size", total_size)
                .with_meta("replaced", replaced),
        );
        Ok(())
    }

    /// Remove an entry
    ///
    /// # Returns
    /// * `Result<()>` - `Error::NotFound` if `key` is not cached
    pub fn delete(&self, key: &CacheKey) -> Result<()> {
        let started = Instant::now();
        let removed = {
            let mut store = self.shared.store.write();
            self.shared.remove_locked(&mut store, key)
        };

        match removed {
            Some(entry) => {
                let elapsed = self.shared.record_op(Op::Delete, started);
                self.shared.emit(
                    CacheEvent::new(CacheEventKind::Delete)
                        .with_key(key.clone())
                        .with_size(entry.size)
                        .with_duration(elapsed),
                );
                Ok(())
            }
            None => {
                self.shared.metrics.record_delete_error();
                Err(Error::NotFound(key.clone()))
            }
        }
    }

    /// Whether a live entry exists. Touches no statistics.
    pub fn exists(&self, key: &CacheKey) -> bool {
        self.shared.store.read().live(key, Instant::now()).is_some()
    }

    /// Look up several keys; absent and expired ones are left out
    pub fn get_multiple(&self, keys: &[CacheKey]) -> BTreeMap<CacheKey, CacheEntry<V>> {
        keys.iter()
            .filter_map(|key| self.get(key).map(|entry| (key.clone(), entry)))
            .collect()
    }

    /// Insert several entries, stopping at the first failure
    pub fn set_multiple<I>(&self, items: I, ttl: Option<Duration>) -> Result<()>
    where
        I: IntoIterator<Item = (CacheKey, V)>,
    {
        for (key, data) in items {
            self.set(key, data, ttl)?;
        }
        Ok(())
    }

    /// Delete several keys, skipping absent ones. Returns how many were deleted.
    pub fn delete_multiple(&self, keys: &[CacheKey]) -> usize {
        keys.iter()
            .filter(|key| match self.delete(key) {
                Ok(()) => true,
                Err(err) => {
                    debug!(key = %key, error = %err, "delete skipped");
                    false
                }
            })
            .count()
    }

    /// Drop every entry and index. Returns how many entries were dropped;
    /// clearing an empty cache does nothing.
    pub fn clear(&self) -> usize {
        let (count, bytes) = {
            let mut store = self.shared.store.write();
            let count = store.entries.len();
            if count == 0 {
                return 0;
            }
            let bytes = store.total_size;
            *store = Store::new();
            self.shared.indexer.clear_index();
            (count, bytes)
        };

        info!(entries = count, bytes, "cache cleared");
        self.shared.emit(
            CacheEvent::new(CacheEventKind::Clear)
                .with_size(bytes)
                .with_meta("count", count as u64),
        );
        count
    }

    fn read_indexed<F>(&self, lookup: F) -> Vec<CacheEntry<V>>
    where
        F: FnOnce(&Indexer) -> Vec<CacheKey>,
    {
        let now = Instant::now();
        let store = self.shared.store.read();
        lookup(&self.shared.indexer)
            .iter()
            .filter_map(|key| store.live(key, now).map(|entry| entry.view(key)))
            .collect()
    }

    /// Live entries carrying `tag`. Empty when tags are disabled.
    pub fn get_by_tag(&self, tag: &str) -> Vec<CacheEntry<V>> {
        if !self.shared.config.enable_tags {
            return Vec::new();
        }
        self.read_indexed(|indexer| indexer.tag_keys(tag))
    }

    /// Remove every entry carrying `tag`. Returns how many were removed.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        if !self.shared.config.enable_tags {
            return 0;
        }
        let removed: Vec<(CacheKey, u64)> = {
            let mut store = self.shared.store.write();
            let keys = self.shared.indexer.tag_keys(tag);
            let removed = keys
                .into_iter()
                .filter_map(|key| {
                    let entry = self.shared.remove_locked(&mut store, &key)?;
                    Some((key, entry.size))
                })
                .collect();
            self.shared.indexer.remove_tag(tag);
            removed
        };

        if !removed.is_empty() {
            self.shared.metrics.record_tag_invalidation();
            debug!(tag, removed = removed.len(), "tag invalidated");
        }
        let count = removed.len();
        for (key, size) in removed {
            self.shared.emit(
                CacheEvent::new(CacheEventKind::Invalidate)
                    .with_key(key)
                    .with_size(size)
                    .with_meta("tag", tag),
            );
        }
        count
    }

    /// Live entries indexed under `owner`
    pub fn get_by_owner(&self, owner: &str) -> Vec<CacheEntry<V>> {
        self.read_indexed(|indexer| indexer.owner_keys(owner))
    }

    /// Live entries of `entry_type`
    pub fn get_by_type(&self, entry_type: &EntryType) -> Vec<CacheEntry<V>> {
        self.read_indexed(|indexer| indexer.type_keys(entry_type.as_str()))
    }

    /// Live entries whose canonical key matches `pattern`, sorted by key.
    ///
    /// Scans every entry; meant for diagnostics.
    pub fn get_by_pattern(&self, pattern: &str) -> Result<Vec<CacheEntry<V>>> {
        let regex = Regex::new(pattern)?;
        let now = Instant::now();
        let store = self.shared.store.read();
        let mut found: Vec<CacheEntry<V>> = store
            .entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && regex.is_match(&key.to_string()))
            .map(|(key, entry)| entry.view(key))
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }

    /// Drop `key` so the next read-through reloads it
    pub fn refresh(&self, key: &CacheKey) -> Result<()> {
        let removed = {
            let mut store = self.shared.store.write();
            self.shared.remove_locked(&mut store, key)
        };
        let entry = removed.ok_or_else(|| Error::NotFound(key.clone()))?;
        self.shared.emit(
            CacheEvent::new(CacheEventKind::Invalidate)
                .with_key(key.clone())
                .with_size(entry.size)
                .with_meta("reason", "refresh"),
        );
        Ok(())
    }

    /// Remove expired entries now instead of waiting for the janitor
    pub fn cleanup_expired(&self) -> usize {
        self.shared.sweep_expired()
    }

    /// Total payload bytes
    pub fn size(&self) -> u64 {
        self.shared.store.read().total_size
    }

    /// Number of entries, expired ones not yet removed included
    pub fn entry_count(&self) -> u64 {
        self.shared.store.read().len()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CacheStats {
        let store = self.shared.store.read();
        self.shared.counters.snapshot(store.len(), store.total_size)
    }

    /// Zero request, hit, miss and eviction counters and detailed metrics
    pub fn reset_stats(&self) {
        self.shared.counters.reset();
        self.shared.metrics.reset();
    }

    /// Detailed metrics snapshot
    pub fn get_metrics(&self) -> CacheMetrics {
        let store = self.shared.store.read();
        self.shared
            .metrics
            .snapshot(store.len(), store.total_size, store.tagged)
    }

    /// Attach an observer. Events are only published when metrics are enabled.
    pub fn add_observer(&self, observer: Arc<dyn CacheObserver>) -> Result<ObserverId> {
        self.shared.bus.subscribe(observer)
    }

    /// Detach an observer
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.shared.bus.unsubscribe(id)
    }

    /// Block until observers have handled every queued event
    pub fn wait_for_observers(&self, timeout: Duration) -> bool {
        self.shared.bus.wait_idle(timeout)
    }

    /// Events dropped because an observer fell behind
    pub fn dropped_events(&self) -> u64 {
        self.shared.bus.dropped_events()
    }

    /// Install the source `start` warms the cache from
    pub fn set_warmup_source(&self, source: Arc<dyn WarmupSource<V>>) {
        *self.warmup.write() = Some(source);
    }

    /// Load the warmup source now. Returns how many entries were inserted.
    pub fn warmup(&self) -> Result<usize> {
        let source = match self.warmup.read().clone() {
            Some(source) => source,
            None => return Ok(0),
        };

        let started = Instant::now();
        let entries = source.load()?;
        let count = entries.len();
        for (key, data) in entries {
            self.set_default(key, data)?;
        }

        info!(entries = count, "cache warmed up");
        self.shared.emit(
            CacheEvent::new(CacheEventKind::Warmup)
                .with_duration(started.elapsed())
                .with_meta("count", count as u64),
        );
        Ok(count)
    }

    /// Start the janitor and, if configured, warm up
    ///
    /// # Returns
    /// * `Result<()>` - `Error::AlreadyRunning` if started twice
    pub fn start(&self) -> Result<()> {
        {
            let mut janitor = self.janitor.lock();
            if janitor.is_some() {
                return Err(Error::AlreadyRunning);
            }
            let (handle, expired_tx) =
                Janitor::spawn(Arc::clone(&self.shared), self.shared.config.cleanup_interval)?;
            *self.shared.expired_tx.lock() = Some(expired_tx);
            *janitor = Some(handle);
        }
        self.shared.emit(CacheEvent::new(CacheEventKind::Start));

        if self.shared.config.warmup_on_start {
            if let Err(err) = self.warmup() {
                warn!(error = %err, "cache warmup failed");
                self.shared.emit(
                    CacheEvent::new(CacheEventKind::Error)
                        .with_meta("operation", "warmup")
                        .with_meta("error", err.to_string()),
                );
            }
        }
        Ok(())
    }

    /// Stop the janitor
    ///
    /// # Returns
    /// * `Result<()>` - `Error::NotRunning` if not started
    pub fn stop(&self) -> Result<()> {
        let janitor = self.janitor.lock().take().ok_or(Error::NotRunning)?;
        self.shared.expired_tx.lock().take();
        janitor.shutdown();
        self.shared.emit(CacheEvent::new(CacheEventKind::Stop));
        Ok(())
    }

    /// Whether the janitor is running
    pub fn is_running(&self) -> bool {
        self.janitor.lock().is_some()
    }
}

impl<V> Drop for IdentityCache<V> {
    fn drop(&mut self) {
        if let Some(janitor) = self.janitor.get_mut().take() {
            self.shared.expired_tx.lock().take();
            janitor.shutdown();
        }
    }
}
