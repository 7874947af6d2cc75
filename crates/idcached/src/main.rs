//! idcached - identity cache driver
//!
//! Builds an `IdentityCache` from a preset, an optional TOML settings file and
//! command line overrides, attaches the standard observers, runs a synthetic
//! workload against an in-memory ledger and prints a JSON report.

mod settings;
mod workload;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use idcache::observer::{
    AuditObserver, CacheAlert, LoggingObserver, MetricsObserver, MetricsSummary, PerformanceMonitor,
    Recommendation,
};
use idcache::{
    CacheConfig, CacheKey, CacheMetrics, CacheStats, CachedLedger, CachedRecord, EntryType,
    EvictionPolicy, IdentityCache,
};
use idstore::{IdentityLedger, MemoryLedger};
use serde::Serialize;
use tracing::{info, warn};

use crate::settings::Settings;
use crate::workload::{Workload, WorkloadReport};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    Default,
    HighPerformance,
    LowMemory,
}

impl Preset {
    fn config(self) -> CacheConfig {
        match self {
            Preset::Default => CacheConfig::default(),
            Preset::HighPerformance => CacheConfig::high_performance(),
            Preset::LowMemory => CacheConfig::low_memory(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base configuration
    #[arg(long, value_enum, default_value_t = Preset::Default)]
    preset: Preset,

    /// Maximum number of entries
    #[arg(long)]
    max_entries: Option<u64>,

    /// Maximum total payload size in bytes
    #[arg(long)]
    max_size: Option<u64>,

    /// Eviction policy (lru, lfu, ttl, size, hybrid)
    #[arg(long)]
    policy: Option<EvictionPolicy>,

    /// Identities to seed the ledger with
    #[arg(long, default_value_t = 200)]
    identities: usize,

    /// Passes over every identity
    #[arg(long, default_value_t = 5)]
    rounds: usize,

    /// Write a credential after every n-th read (0 disables writes)
    #[arg(long, default_value_t = 10)]
    write_every: usize,

    /// Invalidate every n-th identity after each round (0 disables)
    #[arg(long, default_value_t = 25)]
    invalidate_every: usize,

    /// Log hits and misses
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn cache_config(&self) -> Result<CacheConfig> {
        let mut config = self.preset.config();
        if let Some(path) = &self.config {
            config = Settings::from_path(path)?.apply(config);
        }
        if let Some(entries) = self.max_entries {
            config = config.with_max_entries(entries);
        }
        if let Some(bytes) = self.max_size {
            config = config.with_max_size(bytes);
        }
        if let Some(policy) = self.policy {
            config = config.with_eviction_policy(policy);
        }
        Ok(config)
    }
}

#[derive(Serialize)]
struct Report {
    eviction_policy: String,
    workload: WorkloadReport,
    stats: CacheStats,
    efficiency: f64,
    metrics: CacheMetrics,
    observed: MetricsSummary,
    alerts: Vec<CacheAlert>,
    recommendations: Vec<Recommendation>,
    audit_entries: usize,
    dropped_events: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.cache_config()?;

    info!("Starting idcached v{}", env!("CARGO_PKG_VERSION"));
    info!(
        max_entries = config.max_entries,
        max_size = config.max_size,
        policy = %config.eviction_policy,
        "cache configured"
    );

    let ledger = Arc::new(MemoryLedger::new());
    workload::seed(&ledger, args.identities).context("failed to seed ledger")?;

    let cache = Arc::new(IdentityCache::new(config));
    let metrics = Arc::new(MetricsObserver::new());
    let logging = Arc::new(LoggingObserver::new());
    logging.set_verbose(args.verbose);
    let audit = Arc::new(AuditObserver::default());
    cache.add_observer(metrics.clone())?;
    cache.add_observer(logging)?;
    cache.add_observer(audit.clone())?;

    let warm_ledger = Arc::clone(&ledger);
    cache.set_warmup_source(Arc::new(move || -> idcache::Result<Vec<(CacheKey, CachedRecord)>> {
        let identities = warm_ledger.active_identities(idcache::DEFAULT_PRELOAD_LIMIT)?;
        Ok(identities
            .into_iter()
            .map(|identity| {
                let key = CacheKey::new(EntryType::Identity, identity.address.clone());
                (key, CachedRecord::Identity(identity))
            })
            .collect())
    }));

    let monitor = PerformanceMonitor::new(Arc::clone(&metrics));
    monitor.start()?;
    cache.start()?;

    let facade = CachedLedger::new(Arc::clone(&ledger), Arc::clone(&cache));
    let workload = Workload {
        identities: args.identities,
        rounds: args.rounds,
        write_every: args.write_every,
        invalidate_every: args.invalidate_every,
    };
    let outcome = workload.run(&facade).context("workload failed")?;
    info!(
        reads = outcome.reads,
        writes = outcome.writes,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "workload finished"
    );

    cache.stop()?;
    if !cache.wait_for_observers(Duration::from_secs(5)) {
        warn!("observers did not drain in time");
    }
    monitor.stop()?;
    let recommendations = monitor.analyze();

    let stats = cache.stats();
    let report = Report {
        eviction_policy: cache.config().eviction_policy.to_string(),
        workload: outcome,
        efficiency: stats.efficiency(),
        stats,
        metrics: cache.get_metrics(),
        observed: metrics.summary(),
        alerts: metrics.alerts(),
        recommendations,
        audit_entries: audit.len(),
        dropped_events: cache.dropped_events(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
