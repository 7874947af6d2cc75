//! Cache lifecycle events

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::CacheKey;

/// Kind of transition an event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEventKind {
    /// Lookup returned a live entry
    Hit,
    /// Lookup found nothing or an expired entry
    Miss,
    /// Entry inserted or replaced
    Set,
    /// Entry removed by the caller
    Delete,
    /// Entry removed to make room
    Evict,
    /// Expired entry removed
    Expire,
    /// Whole cache wiped
    Clear,
    /// Entry removed through its tag, or refreshed
    Invalidate,
    /// Warmup source loaded
    Warmup,
    /// Janitor sweep finished
    Cleanup,
    /// Background work started
    Start,
    /// Background work stopped
    Stop,
    /// An operation failed
    Error,
}

impl CacheEventKind {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            CacheEventKind::Hit => "hit",
            CacheEventKind::Miss => "miss",
            CacheEventKind::Set => "set",
            CacheEventKind::Delete => "delete",
            CacheEventKind::Evict => "evict",
            CacheEventKind::Expire => "expire",
            CacheEventKind::Clear => "clear",
            CacheEventKind::Invalidate => "invalidate",
            CacheEventKind::Warmup => "warmup",
            CacheEventKind::Cleanup => "cleanup",
            CacheEventKind::Start => "start",
            CacheEventKind::Stop => "stop",
            CacheEventKind::Error => "error",
        }
    }

    /// Whether the event changed what the cache holds on someone's behalf
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            CacheEventKind::Set
                | CacheEventKind::Delete
                | CacheEventKind::Evict
                | CacheEventKind::Clear
                | CacheEventKind::Invalidate
        )
    }
}

impl fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one cache transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEvent {
    /// What happened
    pub kind: CacheEventKind,
    /// Affected key, if any
    pub key: Option<CacheKey>,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// How long the operation took
    pub duration: Duration,
    /// Bytes involved
    pub size: u64,
    /// Extra context
    pub metadata: BTreeMap<String, Value>,
}

impl CacheEvent {
    /// Create an event stamped now
    pub fn new(kind: CacheEventKind) -> Self {
        Self {
            kind,
            key: None,
            timestamp: Utc::now(),
            duration: Duration::ZERO,
            size: 0,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach the affected key
    pub fn with_key(mut self, key: CacheKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Attach the operation duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Attach the byte count
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Attach one metadata field
    pub fn with_meta(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Metadata field as u64
    pub fn meta_u64(&self, name: &str) -> Option<u64> {
        self.metadata.get(name).and_then(Value::as_u64)
    }

    /// Metadata field as str
    pub fn meta_str(&self, name: &str) -> Option<&str> {
        self.metadata.get(name).and_then(Value::as_str)
    }

    /// Who caused the event, from the `actor` metadata field
    pub fn actor(&self) -> Option<&str> {
        self.meta_str("actor")
    }
}
