//! Ledger record types
//!
//! These are the authoritative records the cache layer mirrors. Only the fields
//! the cache and its enriched views care about are modelled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    /// Identity is usable
    Active,
    /// Temporarily disabled
    Suspended,
    /// Permanently revoked
    Revoked,
}

/// An on-ledger identity, keyed by account address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Account address (primary key)
    pub address: String,
    /// DID controlled by this identity
    pub did: String,
    /// Current status
    pub status: IdentityStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last time the identity did anything on the ledger
    pub last_activity_at: DateTime<Utc>,
}

impl Identity {
    /// Create an active identity
    pub fn new(address: impl Into<String>, did: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            address: address.into(),
            did: did.into(),
            status: IdentityStatus::Active,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Whether the identity is active
    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }
}

/// Lifecycle state of a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    /// Valid
    Active,
    /// Revoked by the issuer
    Revoked,
    /// Suspended by the issuer
    Suspended,
}

/// A verifiable credential held by an identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Credential id (primary key)
    pub id: String,
    /// Holder address
    pub holder: String,
    /// Issuer DID
    pub issuer: String,
    /// Credential types, e.g. `BasicKYCCredential`
    pub types: Vec<String>,
    /// Current status
    pub status: CredentialStatus,
    /// Issuance time
    pub issued_at: DateTime<Utc>,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Create an active, non-expiring credential
    pub fn new(
        id: impl Into<String>,
        holder: impl Into<String>,
        issuer: impl Into<String>,
        types: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            holder: holder.into(),
            issuer: issuer.into(),
            types: types.iter().map(|t| t.to_string()).collect(),
            status: CredentialStatus::Active,
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Active and not past its expiry at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == CredentialStatus::Active && self.expires_at.map_or(true, |exp| exp > now)
    }

    /// Whether the credential carries the given type
    pub fn has_type(&self, credential_type: &str) -> bool {
        self.types.iter().any(|t| t == credential_type)
    }
}

/// Verification method inside a DID document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMethod {
    /// Method id, e.g. `did:desh:abc#key-1`
    pub id: String,
    /// Method type, e.g. `Ed25519VerificationKey2020`
    pub method_type: String,
    /// Controller DID
    pub controller: String,
    /// Multibase-encoded public key
    pub public_key_multibase: String,
}

/// Service endpoint inside a DID document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Service id
    pub id: String,
    /// Service type
    pub service_type: String,
    /// Endpoint URL
    pub endpoint: String,
}

/// A resolved DID document, keyed by DID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDocument {
    /// The DID (primary key)
    pub id: String,
    /// Controller DIDs
    pub controller: Vec<String>,
    /// Verification methods
    pub verification_methods: Vec<VerificationMethod>,
    /// Service endpoints
    pub services: Vec<Service>,
}

impl DidDocument {
    /// Create a document controlled by itself with no keys or services
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            controller: vec![id.clone()],
            id,
            verification_methods: Vec::new(),
            services: Vec::new(),
        }
    }
}

/// A data-sharing consent granted by a holder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Consent id (primary key)
    pub id: String,
    /// Address that granted the consent
    pub holder: String,
    /// Party the consent was granted to
    pub requester: String,
    /// Declared purpose
    pub purpose: String,
    /// Grant time
    pub granted_at: DateTime<Utc>,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Set once the holder withdraws the consent
    pub revoked: bool,
}

impl ConsentRecord {
    /// Create a granted, non-expiring consent
    pub fn new(
        id: impl Into<String>,
        holder: impl Into<String>,
        requester: impl Into<String>,
        purpose: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            holder: holder.into(),
            requester: requester.into(),
            purpose: purpose.into(),
            granted_at: Utc::now(),
            expires_at: None,
            revoked: false,
        }
    }

    /// Not revoked and not past its expiry at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// A stored zero-knowledge proof. The proof bytes are opaque to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkProof {
    /// Proof id (primary key)
    pub id: String,
    /// Prover address
    pub prover: String,
    /// Circuit or statement identifier
    pub circuit: String,
    /// Encoded proof payload
    pub proof: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a share request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareRequestStatus {
    /// Awaiting the holder's answer
    Pending,
    /// Approved by the holder
    Approved,
    /// Denied by the holder
    Denied,
    /// Lapsed before an answer
    Expired,
    /// Withdrawn after approval
    Revoked,
}

/// One piece of data a share request asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    /// Credential type the data comes from
    pub credential_type: String,
    /// Attributes wanted from it
    pub attributes: Vec<String>,
    /// Whether the request fails without it
    pub required: bool,
}

/// A request by one module to read a holder's identity data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRequest {
    /// Request id (primary key)
    pub id: String,
    /// Module asking for the data
    pub requester_module: String,
    /// Module holding the data
    pub provider_module: String,
    /// DID of the holder the data belongs to
    pub holder_did: String,
    /// Requested data
    pub requested_data: Vec<DataRequest>,
    /// Declared purpose
    pub purpose: String,
    /// Time the request was made
    pub requested_at: DateTime<Utc>,
    /// How long the request stays open, in seconds
    pub ttl_secs: u64,
    /// Current status
    pub status: ShareRequestStatus,
}

impl ShareRequest {
    /// Create a pending request
    pub fn new(
        id: impl Into<String>,
        requester_module: impl Into<String>,
        provider_module: impl Into<String>,
        holder_did: impl Into<String>,
        purpose: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            requester_module: requester_module.into(),
            provider_module: provider_module.into(),
            holder_did: holder_did.into(),
            requested_data: Vec::new(),
            purpose: purpose.into(),
            requested_at: Utc::now(),
            ttl_secs: 3600,
            status: ShareRequestStatus::Pending,
        }
    }

    /// Past `requested_at + ttl_secs` at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        // chrono::Duration tops out at i64::MAX milliseconds
        let secs = self.ttl_secs.min((i64::MAX / 1000) as u64) as i64;
        self.requested_at
            .checked_add_signed(chrono::Duration::seconds(secs))
            .map_or(false, |deadline| now > deadline)
    }
}
