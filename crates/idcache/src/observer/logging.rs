//! Structured logging of cache events

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, error, info};

use super::CacheObserver;
use crate::event::{CacheEvent, CacheEventKind};
use crate::stats::millis;

/// Writes cache events to `tracing`. Hits and misses are only logged when
/// verbose.
pub struct LoggingObserver {
    enabled: AtomicBool,
    verbose: AtomicBool,
    logged: AtomicU64,
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingObserver {
    /// Enabled, not verbose
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            verbose: AtomicBool::new(false),
            logged: AtomicU64::new(0),
        }
    }

    /// Resume logging
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Stop logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Whether logging is on
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log hits and misses too
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Events written so far
    pub fn logged(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }
}

impl CacheObserver for LoggingObserver {
    fn on_event(&self, event: &CacheEvent) {
        if !self.is_enabled() {
            return;
        }

        let key = event.key.as_ref().map(ToString::to_string).unwrap_or_default();
        let duration_ms = millis(event.duration);

        match event.kind {
            CacheEventKind::Hit | CacheEventKind::Miss => {
                if !self.verbose.load(Ordering::Relaxed) {
                    return;
                }
                debug!(event = %event.kind, key = %key, duration_ms, "cache lookup");
            }
            CacheEventKind::Set => {
                info!(key = %key, size_bytes = event.size, duration_ms, "cache entry set");
            }
            CacheEventKind::Evict => {
                info!(key = %key, size_bytes = event.size, "cache entry evicted");
            }
            CacheEventKind::Delete | CacheEventKind::Expire | CacheEventKind::Invalidate => {
                debug!(event = %event.kind, key = %key, size_bytes = event.size, "cache entry removed");
            }
            CacheEventKind::Clear => {
                info!(entries = event.meta_u64("count").unwrap_or(0), "cache cleared");
            }
            CacheEventKind::Error => {
                error!(
                    key = %key,
                    error = event.meta_str("error").unwrap_or("unknown"),
                    "cache error"
                );
            }
            CacheEventKind::Warmup
            | CacheEventKind::Cleanup
            | CacheEventKind::Start
            | CacheEventKind::Stop => {
                debug!(
                    event = %event.kind,
                    entries = event.meta_u64("count").unwrap_or(0),
                    "cache lifecycle"
                );
            }
        }
        self.logged.fetch_add(1, Ordering::Relaxed);
    }

    fn name(&self) -> &str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookups_only_when_verbose() {
        let observer = LoggingObserver::new();
        observer.on_event(&CacheEvent::new(CacheEventKind::Hit));
        observer.on_event(&CacheEvent::new(CacheEventKind::Set));
        assert_eq!(observer.logged(), 1);

        observer.set_verbose(true);
        observer.on_event(&CacheEvent::new(CacheEventKind::Miss));
        assert_eq!(observer.logged(), 2);
    }

    #[test]
    fn test_disable() {
        let observer = LoggingObserver::new();
        observer.disable();
        observer.on_event(&CacheEvent::new(CacheEventKind::Clear));
        assert_eq!(observer.logged(), 0);
        assert!(!observer.is_enabled());

        observer.enable();
        observer.on_event(&CacheEvent::new(CacheEventKind::Clear));
        assert_eq!(observer.logged(), 1);
    }
}
