//! Cache keys and entry types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of record an entry holds.
///
/// Known ledger types get their own variant; anything else is `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryType {
    /// Identity keyed by address
    Identity,
    /// Verifiable credential
    Credential,
    /// Resolved DID document
    DidDocument,
    /// Consent record
    Consent,
    /// Zero-knowledge proof
    ZkProof,
    /// Biometric template reference
    Biometric,
    /// Identity share request
    ShareRequest,
    /// Identity share response
    ShareResponse,
    /// Access policy
    AccessPolicy,
    /// Recovery method
    RecoveryMethod,
    /// Joined identity view derived from several records
    EnrichedIdentity,
    /// Ad hoc type
    Other(String),
}

impl EntryType {
    /// Canonical name used in keys, tags and metrics
    pub fn as_str(&self) -> &str {
        match self {
            EntryType::Identity => "identity",
            EntryType::Credential => "credential",
            EntryType::DidDocument => "did_document",
            EntryType::Consent => "consent",
            EntryType::ZkProof => "zk_proof",
            EntryType::Biometric => "biometric",
            EntryType::ShareRequest => "share_request",
            EntryType::ShareResponse => "share_response",
            EntryType::AccessPolicy => "access_policy",
            EntryType::RecoveryMethod => "recovery_method",
            EntryType::EnrichedIdentity => "enriched_identity",
            EntryType::Other(name) => name,
        }
    }

    /// Tags every entry of this type carries, besides caller-supplied ones
    pub fn default_tags(&self) -> Vec<String> {
        let mut tags = vec![self.as_str().to_string()];
        let extra: &[&str] = match self {
            EntryType::Identity => &["user_data"],
            EntryType::Credential => &["verification"],
            EntryType::DidDocument => &["resolution"],
            EntryType::Consent => &["privacy"],
            EntryType::ZkProof => &["privacy", "proof"],
            _ => &[],
        };
        tags.extend(extra.iter().map(|t| t.to_string()));
        tags
    }

    /// Whether the logical key of this type is itself an owner id
    pub fn is_owner_keyed(&self) -> bool {
        matches!(
            self,
            EntryType::Identity | EntryType::DidDocument | EntryType::EnrichedIdentity
        )
    }
}

impl From<&str> for EntryType {
    fn from(name: &str) -> Self {
        match name {
            "identity" => EntryType::Identity,
            "credential" => EntryType::Credential,
            "did_document" => EntryType::DidDocument,
            "consent" => EntryType::Consent,
            "zk_proof" => EntryType::ZkProof,
            "biometric" => EntryType::Biometric,
            "share_request" => EntryType::ShareRequest,
            "share_response" => EntryType::ShareResponse,
            "access_policy" => EntryType::AccessPolicy,
            "recovery_method" => EntryType::RecoveryMethod,
            "enriched_identity" => EntryType::EnrichedIdentity,
            other => EntryType::Other(other.to_string()),
        }
    }
}

impl From<String> for EntryType {
    fn from(name: String) -> Self {
        EntryType::from(name.as_str())
    }
}

impl From<EntryType> for String {
    fn from(entry_type: EntryType) -> Self {
        entry_type.as_str().to_string()
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identity of a cached value.
///
/// Bumping `version` makes older entries unreachable without touching them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    /// Record kind
    pub entry_type: EntryType,
    /// Logical key (address, DID, credential id, ...)
    pub key: String,
    /// Schema version
    pub version: u32,
}

impl CacheKey {
    /// Create a version-1 key
    pub fn new(entry_type: impl Into<EntryType>, key: impl Into<String>) -> Self {
        Self::versioned(entry_type, key, 1)
    }

    /// Create a key with an explicit version
    pub fn versioned(entry_type: impl Into<EntryType>, key: impl Into<String>, version: u32) -> Self {
        Self {
            entry_type: entry_type.into(),
            key: key.into(),
            version,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.entry_type, self.key, self.version)
    }
}
