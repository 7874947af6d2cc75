//! Cache entries

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::eviction::EntryMeta;
use crate::key::CacheKey;

/// Read-only view of a cached entry, handed out by lookups
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Key the entry is stored under
    pub key: CacheKey,
    /// Shared payload
    pub data: Arc<V>,
    /// Encoded payload size in bytes
    pub size: u64,
    /// Insert time
    pub created_at: Instant,
    /// Last successful read (or insert)
    pub last_access: Instant,
    /// Successful reads so far
    pub access_count: u64,
    /// Expiry, `None` for never
    pub expires_at: Option<Instant>,
    /// Type tags followed by caller tags
    pub tags: Vec<String>,
    /// Owner id, if indexed by owner
    pub owner: Option<String>,
}

impl<V> CacheEntry<V> {
    /// Whether the entry carries `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Remaining lifetime at `now`, `None` if it never expires
    pub fn ttl_remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

/// Options for `IdentityCache::set_with`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Lifetime; `None` never expires
    pub ttl: Option<Duration>,
    /// Extra tags on top of the entry type's own
    pub tags: Vec<String>,
    /// Owner id to index the entry under
    pub owner: Option<String>,
}

impl SetOptions {
    /// Options with no TTL, tags or owner
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire after `ttl`
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Add a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Index under `owner`
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Entry as held by the store. Access bookkeeping is atomic so hits only
/// need the store's read lock.
#[derive(Debug)]
pub(crate) struct StoredEntry<V> {
    pub(crate) data: Arc<V>,
    pub(crate) size: u64,
    pub(crate) created_at: Instant,
    /// Nanoseconds after `created_at`
    last_access: AtomicU64,
    access_count: AtomicU64,
    pub(crate) expires_at: Option<Instant>,
    pub(crate) tags: Vec<String>,
    pub(crate) owner: Option<String>,
    /// Carries at least one caller-supplied tag
    pub(crate) caller_tagged: bool,
}

impl<V> StoredEntry<V> {
    pub(crate) fn new(
        data: Arc<V>,
        size: u64,
        now: Instant,
        ttl: Option<Duration>,
        tags: Vec<String>,
        owner: Option<String>,
        caller_tagged: bool,
    ) -> Self {
        Self {
            data,
            size,
            created_at: now,
            last_access: AtomicU64::new(0),
            access_count: AtomicU64::new(0),
            // a TTL past the end of `Instant` never expires
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            tags,
            owner,
            caller_tagged,
        }
    }

    /// Expired at `now`; an entry is expired from its `expires_at` onwards
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }

    pub(crate) fn touch(&self, now: Instant) {
        let nanos = now.saturating_duration_since(self.created_at).as_nanos();
        let nanos = u64::try_from(nanos).unwrap_or(u64::MAX);
        self.last_access.fetch_max(nanos, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn last_access(&self) -> Instant {
        self.created_at + Duration::from_nanos(self.last_access.load(Ordering::Relaxed))
    }

    pub(crate) fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub(crate) fn meta(&self) -> EntryMeta {
        EntryMeta {
            created_at: self.created_at,
            last_access: self.last_access(),
            access_count: self.access_count(),
            expires_at: self.expires_at,
            size: self.size,
        }
    }

    pub(crate) fn view(&self, key: &CacheKey) -> CacheEntry<V> {
        CacheEntry {
            key: key.clone(),
            data: Arc::clone(&self.data),
            size: self.size,
            created_at: self.created_at,
            last_access: self.last_access(),
            access_count: self.access_count(),
            expires_at: self.expires_at,
            tags: self.tags.clone(),
            owner: self.owner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::EntryType;

    fn stored(ttl: Option<Duration>) -> (StoredEntry<String>, Instant) {
        let now = Instant::now();
        let entry = StoredEntry::new(
            Arc::new("payload".to_string()),
            9,
            now,
            ttl,
            vec!["identity".to_string()],
            None,
            false,
        );
        (entry, now)
    }

    #[test]
    fn test_expiry_boundary() {
        let (entry, now) = stored(Some(Duration::from_millis(100)));
        assert!(!entry.is_expired(now + Duration::from_millis(99)));
        assert!(entry.is_expired(now + Duration::from_millis(100)));

        let (forever, now) = stored(None);
        assert!(!forever.is_expired(now + Duration::from_secs(86_400)));
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let (entry, now) = stored(Some(Duration::MAX));
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired(now + Duration::from_secs(86_400)));
    }

    #[test]
    fn test_touch_updates_access() {
        let (entry, now) = stored(None);
        assert_eq!(entry.last_access(), now);

        entry.touch(now + Duration::from_millis(5));
        entry.touch(now + Duration::from_millis(3));
        assert_eq!(entry.access_count(), 2);
        // last access never moves backwards
        assert_eq!(entry.last_access(), now + Duration::from_millis(5));
    }

    #[test]
    fn test_view() {
        let (entry, now) = stored(Some(Duration::from_secs(10)));
        let key = CacheKey::new(EntryType::Identity, "addr1");
        let view = entry.view(&key);

        assert_eq!(view.key, key);
        assert_eq!(*view.data, "payload");
        assert!(view.has_tag("identity"));
        assert_eq!(view.ttl_remaining(now), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_set_options_builder() {
        let opts = SetOptions::new()
            .ttl(Duration::from_secs(1))
            .tag("holder:addr1")
            .owner("addr1");
        assert_eq!(opts.ttl, Some(Duration::from_secs(1)));
        assert_eq!(opts.tags, vec!["holder:addr1"]);
        assert_eq!(opts.owner.as_deref(), Some("addr1"));
    }
}
