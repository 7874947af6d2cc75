//! Error types for idcache

use thiserror::Error;

use crate::key::CacheKey;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations.
///
/// Reads never fail: absence is reported as `None`/`false`.
#[derive(Debug, Error)]
pub enum Error {
    /// Delete/refresh on a key that is not cached
    #[error("key not found: {0}")]
    NotFound(CacheKey),

    /// `start()` on a running cache
    #[error("cache is already running")]
    AlreadyRunning,

    /// `stop()` on a stopped cache
    #[error("cache is not running")]
    NotRunning,

    /// Payload could not be encoded to compute its size
    #[error("failed to encode payload for {key}: {source}")]
    Encoding {
        /// Key being written
        key: CacheKey,
        /// Underlying encoder error
        #[source]
        source: serde_json::Error,
    },

    /// `get_by_pattern` was given an invalid regex
    #[error("invalid key pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Background worker could not be spawned
    #[error("failed to spawn {name} worker: {source}")]
    Spawn {
        /// Worker name
        name: &'static str,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Error from the origin ledger, passed through untouched
    #[error(transparent)]
    Origin(#[from] idstore::Error),
}

impl Error {
    /// Whether this is a `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::EntryType;

    #[test]
    fn test_not_found_display() {
        let err = Error::NotFound(CacheKey::new(EntryType::Identity, "addr1"));
        assert_eq!(err.to_string(), "key not found: identity:addr1:1");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_origin_is_transparent() {
        let err = Error::from(idstore::Error::Closed);
        assert_eq!(err.to_string(), "ledger is closed");
        assert!(!err.is_not_found());
    }
}
