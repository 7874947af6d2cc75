use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use idcache::observer::{
    AlertKind, AlertThresholds, AuditObserver, LoggingObserver, MetricsObserver, PerformanceMonitor,
};
use idcache::{CacheConfig, CacheEvent, CacheEventKind, CacheKey, CacheObserver, EntryType, IdentityCache};

const WAIT: Duration = Duration::from_secs(5);

fn key(name: &str) -> CacheKey {
    CacheKey::new(EntryType::Identity, name)
}

fn cache() -> IdentityCache<String> {
    IdentityCache::new(CacheConfig::default().with_async_eviction(false))
}

#[derive(Default)]
struct Counting {
    seen: AtomicU64,
}

impl CacheObserver for Counting {
    fn on_event(&self, _event: &CacheEvent) {
        self.seen.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_metrics_observer_tracks_hits() {
    let cache = cache();
    let metrics = Arc::new(MetricsObserver::new());
    cache.add_observer(metrics.clone()).unwrap();

    cache.set(key("a"), "alice".to_string(), None).unwrap();
    cache.get(&key("a"));
    cache.get(&key("a"));
    cache.get(&key("a"));
    cache.get(&key("missing"));
    assert!(cache.wait_for_observers(WAIT));

    assert_eq!(metrics.total_requests(), 4);
    assert!((metrics.hit_ratio() - 0.75).abs() < 1e-9);
    assert!((metrics.type_hit_ratio("identity") - 0.75).abs() < 1e-9);

    let summary = metrics.summary();
    assert_eq!(summary.total_hits, 3);
    assert_eq!(summary.total_misses, 1);
    assert_eq!(summary.events_recorded, 5);
}

#[test]
fn test_low_hit_ratio_alert() {
    let cache = cache();
    let metrics = Arc::new(MetricsObserver::with_thresholds(AlertThresholds {
        min_requests: 5,
        ..AlertThresholds::default()
    }));
    cache.add_observer(metrics.clone()).unwrap();

    for i in 0..10 {
        cache.get(&key(&format!("missing{}", i)));
    }
    assert!(cache.wait_for_observers(WAIT));
    assert!(metrics.alert_count(AlertKind::LowHitRatio) > 0);
}

#[test]
fn test_audit_records_mutations_only() {
    let cache = cache();
    let audit = Arc::new(AuditObserver::default());
    cache.add_observer(audit.clone()).unwrap();

    cache.set(key("a"), "a".to_string(), None).unwrap();
    cache.get(&key("a"));
    cache.delete(&key("a")).unwrap();
    cache.set(key("b"), "b".to_string(), None).unwrap();
    cache.clear();
    assert!(cache.wait_for_observers(WAIT));

    let kinds: Vec<CacheEventKind> = audit.entries().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            CacheEventKind::Set,
            CacheEventKind::Delete,
            CacheEventKind::Set,
            CacheEventKind::Clear,
        ]
    );
}

#[test]
fn test_metrics_disabled_emits_nothing() {
    let cache: IdentityCache<String> = IdentityCache::new(CacheConfig::default().with_metrics(false));
    let counting = Arc::new(Counting::default());
    cache.add_observer(counting.clone()).unwrap();

    cache.set(key("a"), "a".to_string(), None).unwrap();
    cache.get(&key("a"));
    assert!(cache.wait_for_observers(WAIT));

    assert_eq!(counting.seen.load(Ordering::Relaxed), 0);
    assert_eq!(cache.stats().cache_hits, 1);
}

#[test]
fn test_remove_observer_stops_delivery() {
    let cache = cache();
    let counting = Arc::new(Counting::default());
    let id = cache.add_observer(counting.clone()).unwrap();

    cache.set(key("a"), "a".to_string(), None).unwrap();
    assert!(cache.wait_for_observers(WAIT));
    assert_eq!(counting.seen.load(Ordering::Relaxed), 1);

    assert!(cache.remove_observer(id));
    assert!(!cache.remove_observer(id));
    cache.set(key("b"), "b".to_string(), None).unwrap();
    assert!(cache.wait_for_observers(WAIT));
    assert_eq!(counting.seen.load(Ordering::Relaxed), 1);
}

#[test]
fn test_eviction_and_expiry_events() {
    let cache: IdentityCache<String> = IdentityCache::new(
        CacheConfig::default()
            .with_async_eviction(false)
            .with_max_entries(2),
    );
    let metrics = Arc::new(MetricsObserver::new());
    cache.add_observer(metrics.clone()).unwrap();

    cache.set(key("a"), "a".to_string(), None).unwrap();
    cache.set(key("b"), "b".to_string(), Some(Duration::from_millis(5))).unwrap();
    cache.set(key("c"), "c".to_string(), None).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    cache.cleanup_expired();
    assert!(cache.wait_for_observers(WAIT));

    let kinds: Vec<CacheEventKind> = metrics.recent_events(0).iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&CacheEventKind::Evict));
    assert!(kinds.contains(&CacheEventKind::Cleanup));
}

#[test]
fn test_lifecycle_events() {
    let cache = cache();
    let audit = Arc::new(AuditObserver::default());
    let metrics = Arc::new(MetricsObserver::new());
    cache.add_observer(audit.clone()).unwrap();
    cache.add_observer(metrics.clone()).unwrap();

    cache.start().unwrap();
    cache.stop().unwrap();
    assert!(cache.wait_for_observers(WAIT));

    let kinds: Vec<CacheEventKind> = metrics.recent_events(0).iter().map(|e| e.kind).collect();
    assert_eq!(kinds.first(), Some(&CacheEventKind::Start));
    assert_eq!(kinds.last(), Some(&CacheEventKind::Stop));
    assert!(audit.is_empty());
}

#[test]
fn test_logging_observer_counts() {
    let cache = cache();
    let logging = Arc::new(LoggingObserver::new());
    cache.add_observer(logging.clone()).unwrap();

    cache.set(key("a"), "a".to_string(), None).unwrap();
    cache.get(&key("a"));
    assert!(cache.wait_for_observers(WAIT));
    assert_eq!(logging.logged(), 1);

    logging.set_verbose(true);
    cache.get(&key("a"));
    assert!(cache.wait_for_observers(WAIT));
    assert_eq!(logging.logged(), 2);
}

#[test]
fn test_performance_monitor_on_live_cache() {
    let cache = cache();
    let metrics = Arc::new(MetricsObserver::new());
    cache.add_observer(metrics.clone()).unwrap();

    cache.set(key("a"), "a".to_string(), None).unwrap();
    for i in 0..9 {
        cache.get(&key(&format!("missing{}", i)));
    }
    cache.get(&key("a"));
    assert!(cache.wait_for_observers(WAIT));

    let monitor = PerformanceMonitor::new(metrics);
    let recommendations = monitor.analyze();
    assert!(recommendations.iter().any(|r| r.category == "hit_ratio"));
    assert_eq!(monitor.recommendations().len(), recommendations.len());
}
