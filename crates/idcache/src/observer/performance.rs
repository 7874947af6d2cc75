//! Periodic performance analysis over collected metrics

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::metrics::{AlertKind, MetricsObserver};
use crate::error::{Error, Result};
use crate::event::CacheEventKind;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How urgent a recommendation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Worth a look
    Info,
    /// Likely hurting the node
    Warning,
}

/// Advice produced by an analysis pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    /// Urgency
    pub severity: Severity,
    /// What the advice is about
    pub category: &'static str,
    /// The advice
    pub message: String,
    /// When the analysis ran
    pub created_at: DateTime<Utc>,
}

/// Run every rule against `metrics`
fn analyze(metrics: &MetricsObserver) -> Vec<Recommendation> {
    let now = Utc::now();
    let mut out = Vec::new();
    let mut push = |severity, category, message: String| {
        out.push(Recommendation {
            severity,
            category,
            message,
            created_at: now,
        })
    };

    let hit_ratio = metrics.hit_ratio();
    if metrics.total_requests() > 0 && hit_ratio < 0.5 {
        push(
            Severity::Warning,
            "hit_ratio",
            format!(
                "hit ratio is {:.1}%, consider increasing cache size or TTL",
                hit_ratio * 100.0
            ),
        );
    }

    let get_ms = metrics.average_latency_ms(CacheEventKind::Hit);
    if get_ms > 5.0 {
        push(
            Severity::Info,
            "get_latency",
            format!("cache reads average {:.2}ms, consider optimizing cache structure", get_ms),
        );
    }

    let set_ms = metrics.average_latency_ms(CacheEventKind::Set);
    if set_ms > 10.0 {
        push(
            Severity::Info,
            "set_latency",
            format!(
                "cache writes average {:.2}ms, consider smaller payloads or cheaper serialization",
                set_ms
            ),
        );
    }

    let memory_alerts = metrics.alert_count(AlertKind::HighMemoryUsage);
    if memory_alerts > 5 {
        push(
            Severity::Warning,
            "memory",
            format!(
                "{} high memory alerts, consider a smaller cache or more aggressive eviction",
                memory_alerts
            ),
        );
    }

    out
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Turns `MetricsObserver` data into recommendations, on demand or on a timer
pub struct PerformanceMonitor {
    metrics: Arc<MetricsObserver>,
    interval: Duration,
    recommendations: Arc<Mutex<Vec<Recommendation>>>,
    worker: Mutex<Option<Worker>>,
}

impl PerformanceMonitor {
    /// Analyze every five minutes once started
    pub fn new(metrics: Arc<MetricsObserver>) -> Self {
        Self::with_interval(metrics, DEFAULT_INTERVAL)
    }

    /// Analyze every `interval` once started
    pub fn with_interval(metrics: Arc<MetricsObserver>, interval: Duration) -> Self {
        Self {
            metrics,
            interval,
            recommendations: Arc::new(Mutex::new(Vec::new())),
            worker: Mutex::new(None),
        }
    }

    /// Run one analysis now and keep its result
    pub fn analyze(&self) -> Vec<Recommendation> {
        let found = analyze(&self.metrics);
        *self.recommendations.lock() = found.clone();
        found
    }

    /// Result of the latest analysis
    pub fn recommendations(&self) -> Vec<Recommendation> {
        self.recommendations.lock().clone()
    }

    /// Start periodic analysis
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let metrics = Arc::clone(&self.metrics);
        let recommendations = Arc::clone(&self.recommendations);
        let ticker = tick(self.interval);

        let handle = thread::Builder::new()
            .name("idcache-performance".to_string())
            .spawn(move || loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        let found = analyze(&metrics);
                        if !found.is_empty() {
                            debug!(count = found.len(), "performance recommendations updated");
                        }
                        *recommendations.lock() = found;
                    }
                }
            })
            .map_err(|source| Error::Spawn {
                name: "performance",
                source,
            })?;

        info!(interval_secs = self.interval.as_secs_f64(), "performance monitor started");
        *worker = Some(Worker {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    /// Stop periodic analysis
    pub fn stop(&self) -> Result<()> {
        let worker = self.worker.lock().take().ok_or(Error::NotRunning)?;
        shutdown(worker);
        info!("performance monitor stopped");
        Ok(())
    }

    /// Whether periodic analysis is running
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

fn shutdown(worker: Worker) {
    let _ = worker.stop.send(());
    if worker.handle.join().is_err() {
        warn!("performance monitor worker panicked");
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            shutdown(worker);
        }
    }
}
