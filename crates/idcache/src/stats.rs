//! Cache statistics and metrics

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::key::EntryType;

/// Latency samples the store keeps per operation
const OP_SAMPLE_LIMIT: usize = 1000;

/// Bounded FIFO that drops its oldest element when full
#[derive(Debug, Clone)]
pub(crate) struct RollingWindow<T> {
    items: VecDeque<T>,
    limit: usize,
}

impl<T> RollingWindow<T> {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    pub(crate) fn push(&mut self, item: T) {
        if self.items.len() == self.limit {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub(crate) fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

impl RollingWindow<f64> {
    pub(crate) fn mean(&self) -> f64 {
        if self.items.is_empty() {
            0.0
        } else {
            self.items.iter().sum::<f64>() / self.items.len() as f64
        }
    }
}

pub(crate) fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of entries held
    pub total_entries: u64,
    /// Sum of entry sizes in bytes
    pub total_size: u64,
    /// Lookups served (hits + misses)
    pub total_requests: u64,
    /// Lookups that returned a live entry
    pub cache_hits: u64,
    /// Lookups that found nothing or an expired entry
    pub cache_misses: u64,
    /// Entries removed to make room
    pub eviction_count: u64,
    /// `cache_hits / total_requests`
    pub hit_ratio: f64,
    /// When counters were last reset
    pub last_reset_time: DateTime<Utc>,
}

impl CacheStats {
    /// Hits per eviction, or plain hits if nothing was evicted
    pub fn efficiency(&self) -> f64 {
        if self.eviction_count == 0 {
            self.cache_hits as f64
        } else {
            self.cache_hits as f64 / self.eviction_count as f64
        }
    }
}

/// Lock-free request counters
#[derive(Debug)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    last_reset: Mutex<DateTime<Utc>>,
}

impl StatsCounters {
    pub(crate) fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            last_reset: Mutex::new(Utc::now()),
        }
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        *self.last_reset.lock() = Utc::now();
    }

    pub(crate) fn snapshot(&self, total_entries: u64, total_size: u64) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            total_entries,
            total_size,
            total_requests: total,
            cache_hits: hits,
            cache_misses: misses,
            eviction_count: self.evictions.load(Ordering::Relaxed),
            hit_ratio: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            last_reset_time: *self.last_reset.lock(),
        }
    }
}

/// Hit/miss split for one entry type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeCounts {
    /// Hits
    pub hits: u64,
    /// Misses
    pub misses: u64,
}

/// Detailed store-side metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetrics {
    /// Hit/miss counts per entry type
    pub by_type: BTreeMap<String, TypeCounts>,
    /// Mean `get` latency over recent calls, ms
    pub average_get_ms: f64,
    /// Mean `set` latency over recent calls, ms
    pub average_set_ms: f64,
    /// Mean `delete` latency over recent calls, ms
    pub average_delete_ms: f64,
    /// Current payload bytes
    pub memory_usage: u64,
    /// High-water mark of `memory_usage`
    pub max_memory_usage: u64,
    /// Current entries
    pub entry_count: u64,
    /// High-water mark of `entry_count`
    pub max_entry_count: u64,
    /// Entries evicted for capacity
    pub evictions: u64,
    /// Entries removed because they expired
    pub expirations: u64,
    /// `invalidate_by_tag` calls that removed something
    pub tag_invalidations: u64,
    /// Entries currently carrying at least one caller-supplied tag
    pub tagged_entries: u64,
    /// Failed `set` calls
    pub set_errors: u64,
    /// `delete` calls on absent keys
    pub delete_errors: u64,
    /// Snapshot time
    pub last_updated: DateTime<Utc>,
}

/// Operation kinds the store times
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Get,
    Set,
    Delete,
}

#[derive(Debug)]
struct Recorder {
    by_type: BTreeMap<String, TypeCounts>,
    get_ms: RollingWindow<f64>,
    set_ms: RollingWindow<f64>,
    delete_ms: RollingWindow<f64>,
    max_memory_usage: u64,
    max_entry_count: u64,
    evictions: u64,
    expirations: u64,
    tag_invalidations: u64,
    set_errors: u64,
    delete_errors: u64,
}

impl Recorder {
    fn new() -> Self {
        Self {
            by_type: BTreeMap::new(),
            get_ms: RollingWindow::new(OP_SAMPLE_LIMIT),
            set_ms: RollingWindow::new(OP_SAMPLE_LIMIT),
            delete_ms: RollingWindow::new(OP_SAMPLE_LIMIT),
            max_memory_usage: 0,
            max_entry_count: 0,
            evictions: 0,
            expirations: 0,
            tag_invalidations: 0,
            set_errors: 0,
            delete_errors: 0,
        }
    }
}

/// Store-side metrics sink, guarded by its own lock
#[derive(Debug)]
pub(crate) struct MetricsRecorder {
    inner: Mutex<Recorder>,
}

impl MetricsRecorder {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Recorder::new()),
        }
    }

    pub(crate) fn record_lookup(&self, entry_type: &EntryType, hit: bool) {
        let mut inner = self.inner.lock();
        let counts = inner
            .by_type
            .entry(entry_type.as_str().to_string())
            .or_default();
        if hit {
            counts.hits += 1;
        } else {
            counts.misses += 1;
        }
    }

    pub(crate) fn record_op(&self, op: Op, duration: Duration) {
        let ms = millis(duration);
        let mut inner = self.inner.lock();
        match op {
            Op::Get => inner.get_ms.push(ms),
            Op::Set => inner.set_ms.push(ms),
            Op::Delete => inner.delete_ms.push(ms),
        }
    }

    pub(crate) fn record_usage(&self, entries: u64, bytes: u64) {
        let mut inner = self.inner.lock();
        inner.max_entry_count = inner.max_entry_count.max(entries);
        inner.max_memory_usage = inner.max_memory_usage.max(bytes);
    }

    pub(crate) fn record_evictions(&self, n: u64) {
        self.inner.lock().evictions += n;
    }

    pub(crate) fn record_expirations(&self, n: u64) {
        self.inner.lock().expirations += n;
    }

    pub(crate) fn record_tag_invalidation(&self) {
        self.inner.lock().tag_invalidations += 1;
    }

    pub(crate) fn record_set_error(&self) {
        self.inner.lock().set_errors += 1;
    }

    pub(crate) fn record_delete_error(&self) {
        self.inner.lock().delete_errors += 1;
    }

    pub(crate) fn reset(&self) {
        *self.inner.lock() = Recorder::new();
    }

    pub(crate) fn snapshot(&self, entry_count: u64, memory_usage: u64, tagged_entries: u64) -> CacheMetrics {
        let inner = self.inner.lock();
        CacheMetrics {
            by_type: inner.by_type.clone(),
            average_get_ms: inner.get_ms.mean(),
            average_set_ms: inner.set_ms.mean(),
            average_delete_ms: inner.delete_ms.mean(),
            memory_usage,
            max_memory_usage: inner.max_memory_usage.max(memory_usage),
            entry_count,
            max_entry_count: inner.max_entry_count.max(entry_count),
            evictions: inner.evictions,
            expirations: inner.expirations,
            tag_invalidations: inner.tag_invalidations,
            tagged_entries,
            set_errors: inner.set_errors,
            delete_errors: inner.delete_errors,
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = StatsCounters::new();

        stats.record_hit();
        stats.record_hit();
        stats.record_miss();

        let snap = stats.snapshot(3, 120);
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.hit_ratio, 2.0 / 3.0);
        assert_eq!(snap.total_entries, 3);
        assert_eq!(snap.total_size, 120);
    }

    #[test]
    fn test_stats_reset() {
        let stats = StatsCounters::new();

        stats.record_hit();
        stats.record_miss();
        stats.record_eviction();
        stats.reset();

        let snap = stats.snapshot(0, 0);
        assert_eq!(snap.cache_hits, 0);
        assert_eq!(snap.eviction_count, 0);
        assert_eq!(snap.hit_ratio, 0.0);
    }

    #[test]
    fn test_efficiency() {
        let stats = StatsCounters::new();
        for _ in 0..6 {
            stats.record_hit();
        }
        assert_eq!(stats.snapshot(0, 0).efficiency(), 6.0);

        stats.record_eviction();
        stats.record_eviction();
        assert_eq!(stats.snapshot(0, 0).efficiency(), 3.0);
    }

    #[test]
    fn test_rolling_window_drops_oldest() {
        let mut window = RollingWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            window.push(v);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
        assert_eq!(window.mean(), 3.0);
    }

    #[test]
    fn test_metrics_recorder() {
        let recorder = MetricsRecorder::new();
        recorder.record_lookup(&EntryType::Identity, true);
        recorder.record_lookup(&EntryType::Identity, false);
        recorder.record_lookup(&EntryType::Credential, false);
        recorder.record_op(Op::Get, Duration::from_millis(2));
        recorder.record_op(Op::Get, Duration::from_millis(4));
        recorder.record_usage(10, 500);

        let metrics = recorder.snapshot(4, 200, 1);
        assert_eq!(metrics.by_type["identity"], TypeCounts { hits: 1, misses: 1 });
        assert_eq!(metrics.by_type["credential"].misses, 1);
        assert!((metrics.average_get_ms - 3.0).abs() < 1e-9);
        assert_eq!(metrics.average_set_ms, 0.0);
        assert_eq!(metrics.max_entry_count, 10);
        assert_eq!(metrics.max_memory_usage, 500);
        assert_eq!(metrics.memory_usage, 200);
    }
}
