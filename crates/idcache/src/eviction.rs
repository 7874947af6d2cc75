//! Eviction scoring
//!
//! `score` is a pure function of entry metadata, policy and the current instant,
//! so victim order is reproducible. Each policy evicts in its conventional
//! direction:
//! - LRU: longest idle first (score = seconds since last access, highest first)
//! - LFU: least accessed first (score = `1/(access_count+1)`, highest first)
//! - TTL: soonest to expire first (score = seconds until expiry, lowest first;
//!   entries that never expire go last)
//! - SIZE: largest first
//! - HYBRID: `0.4*LRU + 0.3*LFU + 0.3*SIZE`, highest first

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

const HYBRID_LRU_WEIGHT: f64 = 0.4;
const HYBRID_LFU_WEIGHT: f64 = 0.3;
const HYBRID_SIZE_WEIGHT: f64 = 0.3;

/// Victim selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used
    Lru,
    /// Least frequently used
    Lfu,
    /// Closest to expiry
    Ttl,
    /// Largest payload
    Size,
    /// Weighted recency, frequency and size
    #[default]
    Hybrid,
}

impl EvictionPolicy {
    /// Whether a higher score means the entry is evicted sooner
    pub fn evicts_highest_first(self) -> bool {
        !matches!(self, EvictionPolicy::Ttl)
    }

    /// Canonical name
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::Lfu => "LFU",
            EvictionPolicy::Ttl => "TTL",
            EvictionPolicy::Size => "SIZE",
            EvictionPolicy::Hybrid => "HYBRID",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "ttl" => Ok(EvictionPolicy::Ttl),
            "size" => Ok(EvictionPolicy::Size),
            "hybrid" => Ok(EvictionPolicy::Hybrid),
            other => Err(format!("unknown eviction policy '{}'", other)),
        }
    }
}

/// The entry metadata eviction looks at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryMeta {
    /// Insert time
    pub created_at: Instant,
    /// Last successful read (or insert)
    pub last_access: Instant,
    /// Number of successful reads
    pub access_count: u64,
    /// Expiry, `None` for never
    pub expires_at: Option<Instant>,
    /// Payload size in bytes
    pub size: u64,
}

fn idle_secs(meta: &EntryMeta, now: Instant) -> f64 {
    now.saturating_duration_since(meta.last_access).as_secs_f64()
}

fn rarity(meta: &EntryMeta) -> f64 {
    1.0 / (meta.access_count as f64 + 1.0)
}

fn secs_until_expiry(meta: &EntryMeta, now: Instant) -> f64 {
    match meta.expires_at {
        None => f64::INFINITY,
        Some(at) if at >= now => (at - now).as_secs_f64(),
        Some(at) => -(now - at).as_secs_f64(),
    }
}

/// Eviction score of one entry under `policy` at `now`
pub fn score(meta: &EntryMeta, policy: EvictionPolicy, now: Instant) -> f64 {
    match policy {
        EvictionPolicy::Lru => idle_secs(meta, now),
        EvictionPolicy::Lfu => rarity(meta),
        EvictionPolicy::Ttl => secs_until_expiry(meta, now),
        EvictionPolicy::Size => meta.size as f64,
        EvictionPolicy::Hybrid => {
            HYBRID_LRU_WEIGHT * idle_secs(meta, now)
                + HYBRID_LFU_WEIGHT * rarity(meta)
                + HYBRID_SIZE_WEIGHT * meta.size as f64
        }
    }
}

/// Order candidates so the first element is the first victim.
///
/// Ties fall back to insert order (oldest first), then to the key itself.
pub fn rank<K: Ord>(candidates: Vec<(K, EntryMeta)>, policy: EvictionPolicy, now: Instant) -> Vec<K> {
    let mut scored: Vec<(K, f64, Instant)> = candidates
        .into_iter()
        .map(|(key, meta)| {
            let s = score(&meta, policy, now);
            (key, s, meta.created_at)
        })
        .collect();

    scored.sort_by(|a, b| {
        let by_score = if policy.evicts_highest_first() {
            b.1.total_cmp(&a.1)
        } else {
            a.1.total_cmp(&b.1)
        };
        by_score
            .then_with(|| a.2.cmp(&b.2))
            .then_with(|| a.0.cmp(&b.0))
    });

    scored.into_iter().map(|(key, _, _)| key).collect()
}
