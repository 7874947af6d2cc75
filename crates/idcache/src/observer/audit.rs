//! Audit trail of cache mutations

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use super::CacheObserver;
use crate::event::{CacheEvent, CacheEventKind};
use crate::stats::RollingWindow;

/// Entries kept when no capacity is given
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// One audited mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Kind of mutation
    pub kind: CacheEventKind,
    /// Entry type of the key, if any
    pub key_type: Option<String>,
    /// Canonical key, if any
    pub key: Option<String>,
    /// Bytes involved
    pub size: u64,
    /// Operation duration
    pub duration: Duration,
    /// Who did it
    pub actor: Option<String>,
    /// Event metadata
    pub metadata: BTreeMap<String, Value>,
}

impl AuditEntry {
    fn from_event(event: &CacheEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            kind: event.kind,
            key_type: event.key.as_ref().map(|k| k.entry_type.to_string()),
            key: event.key.as_ref().map(ToString::to_string),
            size: event.size,
            duration: event.duration,
            actor: event.actor().map(str::to_string),
            metadata: event.metadata.clone(),
        }
    }
}

/// Bounded append-only log of set, delete, evict, clear and invalidate events
pub struct AuditObserver {
    log: Mutex<RollingWindow<AuditEntry>>,
}

impl Default for AuditObserver {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditObserver {
    /// Keep at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Mutex::new(RollingWindow::new(capacity.max(1))),
        }
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.log.lock().iter().cloned().collect()
    }

    /// Entries caused by `actor`
    pub fn entries_for_actor(&self, actor: &str) -> Vec<AuditEntry> {
        self.log
            .lock()
            .iter()
            .filter(|e| e.actor.as_deref() == Some(actor))
            .cloned()
            .collect()
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    /// Whether nothing has been audited
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheObserver for AuditObserver {
    fn on_event(&self, event: &CacheEvent) {
        if event.kind.is_mutation() {
            self.log.lock().push(AuditEntry::from_event(event));
        }
    }

    fn name(&self) -> &str {
        "audit"
    }
}
