//! Metrics observer with threshold alerts

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use ahash::RandomState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::CacheObserver;
use crate::event::{CacheEvent, CacheEventKind};
use crate::stats::{millis, RollingWindow, TypeCounts};

const LATENCY_SAMPLES: usize = 100;
const EVENT_HISTORY: usize = 1000;
const ALERT_HISTORY: usize = 50;
const MISS_RATE_WINDOW: Duration = Duration::from_secs(1);

/// Limits that raise a `CacheAlert` when crossed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertThresholds {
    /// Hit ratio floor
    pub min_hit_ratio: f64,
    /// Requests seen before the hit ratio floor applies
    pub min_requests: u64,
    /// Per-operation latency ceiling
    pub max_operation_time: Duration,
    /// Ceiling on cache bytes reported by set events
    pub max_memory_usage: u64,
    /// Misses per second ceiling
    pub max_miss_rate: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            min_hit_ratio: 0.7,
            min_requests: 100,
            max_operation_time: Duration::from_millis(10),
            max_memory_usage: 100 * 1024 * 1024,
            max_miss_rate: 100.0,
        }
    }
}

/// What an alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Hit ratio under the floor
    LowHitRatio,
    /// One operation took longer than the ceiling
    SlowOperation,
    /// Cache bytes over the ceiling
    HighMemoryUsage,
    /// Too many misses in the last second
    HighMissRate,
}

/// A threshold crossing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheAlert {
    /// What crossed
    pub kind: AlertKind,
    /// Human readable description
    pub message: String,
    /// Observed value
    pub value: f64,
    /// Threshold it crossed
    pub threshold: f64,
    /// When
    pub timestamp: DateTime<Utc>,
}

/// Serializable view of a `MetricsObserver`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    /// Hits seen
    pub total_hits: u64,
    /// Misses seen
    pub total_misses: u64,
    /// Hits over lookups
    pub hit_ratio: f64,
    /// Per entry type
    pub by_type: BTreeMap<String, TypeCounts>,
    /// Mean latency per event kind, ms
    pub average_latency_ms: BTreeMap<String, f64>,
    /// Events in the history
    pub events_recorded: usize,
    /// Alerts currently held
    pub alerts: usize,
    /// When counters were last reset
    pub since: DateTime<Utc>,
}

struct State {
    by_type: BTreeMap<String, TypeCounts>,
    total: TypeCounts,
    latencies: HashMap<CacheEventKind, RollingWindow<f64>, RandomState>,
    history: RollingWindow<CacheEvent>,
    alerts: RollingWindow<CacheAlert>,
    miss_window_start: Instant,
    miss_window_count: u64,
    last_reset: DateTime<Utc>,
}

impl State {
    fn new() -> Self {
        Self {
            by_type: BTreeMap::new(),
            total: TypeCounts::default(),
            latencies: HashMap::with_hasher(RandomState::new()),
            history: RollingWindow::new(EVENT_HISTORY),
            alerts: RollingWindow::new(ALERT_HISTORY),
            miss_window_start: Instant::now(),
            miss_window_count: 0,
            last_reset: Utc::now(),
        }
    }

    fn hit_ratio(&self) -> f64 {
        ratio(self.total)
    }

    fn alert(&mut self, kind: AlertKind, message: String, value: f64, threshold: f64) {
        self.alerts.push(CacheAlert {
            kind,
            message,
            value,
            threshold,
            timestamp: Utc::now(),
        });
    }
}

fn ratio(counts: TypeCounts) -> f64 {
    let total = counts.hits + counts.misses;
    if total == 0 {
        0.0
    } else {
        counts.hits as f64 / total as f64
    }
}

/// Aggregates events into counters, latency samples and alerts
pub struct MetricsObserver {
    thresholds: AlertThresholds,
    state: Mutex<State>,
}

impl Default for MetricsObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsObserver {
    /// Create an observer with default thresholds
    pub fn new() -> Self {
        Self::with_thresholds(AlertThresholds::default())
    }

    /// Create an observer with custom thresholds
    pub fn with_thresholds(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds,
            state: Mutex::new(State::new()),
        }
    }

    /// Thresholds in use
    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Overall hit ratio
    pub fn hit_ratio(&self) -> f64 {
        self.state.lock().hit_ratio()
    }

    /// Hit ratio for one entry type
    pub fn type_hit_ratio(&self, entry_type: &str) -> f64 {
        self.state
            .lock()
            .by_type
            .get(entry_type)
            .copied()
            .map_or(0.0, ratio)
    }

    /// Hits plus misses seen
    pub fn total_requests(&self) -> u64 {
        let state = self.state.lock();
        state.total.hits + state.total.misses
    }

    /// Mean latency of the last samples for `kind`, ms
    pub fn average_latency_ms(&self, kind: CacheEventKind) -> f64 {
        self.state
            .lock()
            .latencies
            .get(&kind)
            .map_or(0.0, RollingWindow::mean)
    }

    /// Up to `limit` most recent events, oldest first. `0` means all.
    pub fn recent_events(&self, limit: usize) -> Vec<CacheEvent> {
        let state = self.state.lock();
        let len = state.history.len();
        let limit = if limit == 0 || limit > len { len } else { limit };
        state.history.iter().skip(len - limit).cloned().collect()
    }

    /// Alerts held, oldest first
    pub fn alerts(&self) -> Vec<CacheAlert> {
        self.state.lock().alerts.iter().cloned().collect()
    }

    /// Alerts held of one kind
    pub fn alert_count(&self, kind: AlertKind) -> usize {
        self.state
            .lock()
            .alerts
            .iter()
            .filter(|a| a.kind == kind)
            .count()
    }

    /// Snapshot for reports
    pub fn summary(&self) -> MetricsSummary {
        let state = self.state.lock();
        MetricsSummary {
            total_hits: state.total.hits,
            total_misses: state.total.misses,
            hit_ratio: state.hit_ratio(),
            by_type: state.by_type.clone(),
            average_latency_ms: state
                .latencies
                .iter()
                .map(|(kind, samples)| (kind.as_str().to_string(), samples.mean()))
                .collect(),
            events_recorded: state.history.len(),
            alerts: state.alerts.len(),
            since: state.last_reset,
        }
    }

    /// Drop every counter, sample, event and alert
    pub fn reset(&self) {
        *self.state.lock() = State::new();
    }

    fn record_lookup(&self, state: &mut State, event: &CacheEvent, hit: bool) {
        let entry_type = event
            .key
            .as_ref()
            .map_or("unknown", |k| k.entry_type.as_str())
            .to_string();
        let counts = state.by_type.entry(entry_type).or_default();
        if hit {
            counts.hits += 1;
            state.total.hits += 1;
        } else {
            counts.misses += 1;
            state.total.misses += 1;
            self.check_miss_rate(state);
        }

        let requests = state.total.hits + state.total.misses;
        let hit_ratio = state.hit_ratio();
        if requests > self.thresholds.min_requests && hit_ratio < self.thresholds.min_hit_ratio {
            state.alert(
                AlertKind::LowHitRatio,
                format!(
                    "Low cache hit ratio: {:.2}% (threshold: {:.2}%)",
                    hit_ratio * 100.0,
                    self.thresholds.min_hit_ratio * 100.0
                ),
                hit_ratio,
                self.thresholds.min_hit_ratio,
            );
        }
    }

    fn check_miss_rate(&self, state: &mut State) {
        let now = Instant::now();
        if now.duration_since(state.miss_window_start) >= MISS_RATE_WINDOW {
            state.miss_window_start = now;
            state.miss_window_count = 0;
        }
        state.miss_window_count += 1;

        // once per window
        let limit = self.thresholds.max_miss_rate.max(0.0) as u64;
        if state.miss_window_count == limit + 1 {
            state.alert(
                AlertKind::HighMissRate,
                format!(
                    "High miss rate: more than {} misses in one second",
                    limit
                ),
                state.miss_window_count as f64,
                self.thresholds.max_miss_rate,
            );
        }
    }

    fn check_latency(&self, state: &mut State, kind: CacheEventKind, duration: Duration) {
        let ms = millis(duration);
        state
            .latencies
            .entry(kind)
            .or_insert_with(|| RollingWindow::new(LATENCY_SAMPLES))
            .push(ms);

        if duration > self.thresholds.max_operation_time {
            let limit = millis(self.thresholds.max_operation_time);
            state.alert(
                AlertKind::SlowOperation,
                format!("Slow {} operation: {:.2}ms (threshold: {:.2}ms)", kind, ms, limit),
                ms,
                limit,
            );
        }
    }

    fn check_memory(&self, state: &mut State, event: &CacheEvent) {
        if let Some(total) = event.meta_u64("total_size") {
            if total > self.thresholds.max_memory_usage {
                state.alert(
                    AlertKind::HighMemoryUsage,
                    format!(
                        "High memory usage: {} bytes (threshold: {} bytes)",
                        total, self.thresholds.max_memory_usage
                    ),
                    total as f64,
                    self.thresholds.max_memory_usage as f64,
                );
            }
        }
    }
}

impl CacheObserver for MetricsObserver {
    fn on_event(&self, event: &CacheEvent) {
        let mut state = self.state.lock();
        match event.kind {
            CacheEventKind::Hit => self.record_lookup(&mut state, event, true),
            CacheEventKind::Miss => self.record_lookup(&mut state, event, false),
            CacheEventKind::Set => self.check_memory(&mut state, event),
            _ => {}
        }
        if event.duration > Duration::ZERO {
            self.check_latency(&mut state, event.kind, event.duration);
        }
        state.history.push(event.clone());
    }

    fn name(&self) -> &str {
        "metrics"
    }
}
