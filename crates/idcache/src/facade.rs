//! Read/write-through cache over an identity ledger
//!
//! Reads try the cache and fall back to the ledger, populating the cache on
//! the way out. Writes go to the ledger first and then refresh the cache and
//! invalidate whatever was derived from the written record. Ledger errors are
//! returned untouched; failing to populate the cache is only logged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use idstore::{
    ConsentRecord, Credential, DidDocument, Identity, IdentityLedger, Origin, ShareRequest, ZkProof,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::IdentityCache;
use crate::entry::SetOptions;
use crate::error::Result;
use crate::key::{CacheKey, EntryType};
use crate::stats::{CacheMetrics, CacheStats};

/// Identities loaded by `refresh_cache` when preload is enabled
pub const DEFAULT_PRELOAD_LIMIT: usize = 100;

fn holder_tag(holder: &str) -> String {
    format!("holder:{}", holder)
}

fn consent_holder_tag(holder: &str) -> String {
    format!("consent_holder:{}", holder)
}

fn did_tag(did: &str) -> String {
    format!("did:{}", did)
}

/// Key of the complete credential list of one holder
fn holder_list_key(holder: &str) -> CacheKey {
    CacheKey::new(EntryType::Other("holder_credentials".to_string()), holder)
}

/// Verification depth derived from an identity's credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KycLevel {
    /// No KYC credential
    None,
    /// Basic or Aadhaar KYC
    Basic,
    /// Advanced or biometric KYC
    Advanced,
}

impl KycLevel {
    /// Highest level any credential grants
    pub fn from_credentials(credentials: &[Credential]) -> Self {
        let has = |names: &[&str]| {
            credentials
                .iter()
                .any(|c| names.iter().any(|name| c.has_type(name)))
        };
        if has(&["AdvancedKYCCredential", "BiometricCredential"]) {
            KycLevel::Advanced
        } else if has(&["BasicKYCCredential", "AadhaarCredential"]) {
            KycLevel::Basic
        } else {
            KycLevel::None
        }
    }
}

/// Values computed when an enriched identity is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedFields {
    /// Active credentials held
    pub credential_count: usize,
    /// Active consents granted
    pub consent_count: usize,
    /// KYC level
    pub kyc_level: KycLevel,
    /// Build time
    pub last_updated: DateTime<Utc>,
}

/// Identity joined with everything lookups usually need next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedIdentity {
    /// The identity
    pub identity: Identity,
    /// Its DID document, if resolved
    pub did_document: Option<DidDocument>,
    /// Its active credentials
    pub credentials: Vec<Credential>,
    /// Consents it granted that are still active
    pub active_consents: Vec<ConsentRecord>,
    /// Derived values
    pub computed: ComputedFields,
}

/// Payloads the ledger cache stores
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum CachedRecord {
    /// Identity
    Identity(Identity),
    /// Credential
    Credential(Credential),
    /// DID document
    DidDocument(DidDocument),
    /// Consent
    Consent(ConsentRecord),
    /// ZK proof
    ZkProof(ZkProof),
    /// Share request
    ShareRequest(ShareRequest),
    /// Every credential of one holder, as last loaded from the ledger
    HolderCredentials(Vec<Credential>),
    /// Enriched identity view
    EnrichedIdentity(Box<EnrichedIdentity>),
}

/// A ledger record the facade knows how to cache
pub trait Cacheable: Clone + Sized {
    /// Entry type records of this kind are cached under
    fn entry_type() -> EntryType;

    /// Primary key
    fn cache_id(&self) -> &str;

    /// Owner to index the entry under
    fn owner(&self) -> Option<&str> {
        None
    }

    /// Tags dependents are invalidated through
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Wrap into the cache payload
    fn into_record(self) -> CachedRecord;

    /// Unwrap from the cache payload
    fn from_record(record: &CachedRecord) -> Option<Self>;
}

impl Cacheable for Identity {
    fn entry_type() -> EntryType {
        EntryType::Identity
    }

    fn cache_id(&self) -> &str {
        &self.address
    }

    fn into_record(self) -> CachedRecord {
        CachedRecord::Identity(self)
    }

    fn from_record(record: &CachedRecord) -> Option<Self> {
        match record {
            CachedRecord::Identity(identity) => Some(identity.clone()),
            _ => None,
        }
    }
}

impl Cacheable for Credential {
    fn entry_type() -> EntryType {
        EntryType::Credential
    }

    fn cache_id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> Option<&str> {
        Some(&self.holder)
    }

    fn into_record(self) -> CachedRecord {
        CachedRecord::Credential(self)
    }

    fn from_record(record: &CachedRecord) -> Option<Self> {
        match record {
            CachedRecord::Credential(credential) => Some(credential.clone()),
            _ => None,
        }
    }
}

impl Cacheable for DidDocument {
    fn entry_type() -> EntryType {
        EntryType::DidDocument
    }

    fn cache_id(&self) -> &str {
        &self.id
    }

    fn tags(&self) -> Vec<String> {
        vec![did_tag(&self.id)]
    }

    fn into_record(self) -> CachedRecord {
        CachedRecord::DidDocument(self)
    }

    fn from_record(record: &CachedRecord) -> Option<Self> {
        match record {
            CachedRecord::DidDocument(doc) => Some(doc.clone()),
            _ => None,
        }
    }
}

impl Cacheable for ConsentRecord {
    fn entry_type() -> EntryType {
        EntryType::Consent
    }

    fn cache_id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> Option<&str> {
        Some(&self.holder)
    }

    fn tags(&self) -> Vec<String> {
        vec![consent_holder_tag(&self.holder)]
    }

    fn into_record(self) -> CachedRecord {
        CachedRecord::Consent(self)
    }

    fn from_record(record: &CachedRecord) -> Option<Self> {
        match record {
            CachedRecord::Consent(consent) => Some(consent.clone()),
            _ => None,
        }
    }
}

impl Cacheable for ZkProof {
    fn entry_type() -> EntryType {
        EntryType::ZkProof
    }

    fn cache_id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> Option<&str> {
        Some(&self.prover)
    }

    fn into_record(self) -> CachedRecord {
        CachedRecord::ZkProof(self)
    }

    fn from_record(record: &CachedRecord) -> Option<Self> {
        match record {
            CachedRecord::ZkProof(proof) => Some(proof.clone()),
            _ => None,
        }
    }
}

impl Cacheable for ShareRequest {
    fn entry_type() -> EntryType {
        EntryType::ShareRequest
    }

    fn cache_id(&self) -> &str {
        &self.id
    }

    fn tags(&self) -> Vec<String> {
        vec![did_tag(&self.holder_did)]
    }

    fn into_record(self) -> CachedRecord {
        CachedRecord::ShareRequest(self)
    }

    fn from_record(record: &CachedRecord) -> Option<Self> {
        match record {
            CachedRecord::ShareRequest(request) => Some(request.clone()),
            _ => None,
        }
    }
}

impl Cacheable for EnrichedIdentity {
    fn entry_type() -> EntryType {
        EntryType::EnrichedIdentity
    }

    fn cache_id(&self) -> &str {
        &self.identity.address
    }

    fn tags(&self) -> Vec<String> {
        let address = &self.identity.address;
        vec![
            did_tag(&self.identity.did),
            holder_tag(address),
            consent_holder_tag(address),
        ]
    }

    fn into_record(self) -> CachedRecord {
        CachedRecord::EnrichedIdentity(Box::new(self))
    }

    fn from_record(record: &CachedRecord) -> Option<Self> {
        match record {
            CachedRecord::EnrichedIdentity(enriched) => Some((**enriched).clone()),
            _ => None,
        }
    }
}

fn key_for<T: Cacheable>(id: &str) -> CacheKey {
    CacheKey::new(T::entry_type(), id)
}

/// Identity ledger fronted by an `IdentityCache`
pub struct CachedLedger<L> {
    ledger: Arc<L>,
    cache: Arc<IdentityCache<CachedRecord>>,
}

impl<L: IdentityLedger> CachedLedger<L> {
    /// Compose `ledger` with `cache`
    pub fn new(ledger: Arc<L>, cache: Arc<IdentityCache<CachedRecord>>) -> Self {
        Self { ledger, cache }
    }

    /// The cache
    pub fn cache(&self) -> &Arc<IdentityCache<CachedRecord>> {
        &self.cache
    }

    /// The ledger
    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Detailed cache metrics
    pub fn metrics(&self) -> CacheMetrics {
        self.cache.get_metrics()
    }

    fn populate<T: Cacheable>(&self, value: &T, extra_tags: &[String]) {
        let entry_type = T::entry_type();
        let mut tags = value.tags();
        tags.extend(extra_tags.iter().cloned());
        let options = SetOptions {
            ttl: Some(self.cache.config().ttl_for(&entry_type)),
            tags,
            owner: value.owner().map(str::to_string),
        };
        let key = key_for::<T>(value.cache_id());
        if let Err(err) = self.cache.set_with(key, value.clone().into_record(), options) {
            warn!(entry_type = %entry_type, id = value.cache_id(), error = %err, "failed to populate cache");
        }
    }

    fn forget<T: Cacheable>(&self, id: &str) -> bool {
        self.cache.delete(&key_for::<T>(id)).is_ok()
    }

    fn cached<T: Cacheable>(&self, id: &str) -> Option<T> {
        self.cache
            .get_value(&key_for::<T>(id))
            .and_then(|record| T::from_record(&record))
    }

    fn get_cached<T>(&self, id: &str) -> Result<Option<T>>
    where
        T: Cacheable,
        L: Origin<T>,
    {
        if let Some(value) = self.cached::<T>(id) {
            return Ok(Some(value));
        }
        let loaded = Origin::<T>::get(self.ledger.as_ref(), id)?;
        if let Some(value) = &loaded {
            self.populate(value, &[]);
        }
        Ok(loaded)
    }

    fn set_cached<T>(&self, value: T, invalidate: &[String]) -> Result<()>
    where
        T: Cacheable,
        L: Origin<T>,
    {
        Origin::<T>::set(self.ledger.as_ref(), value.clone())?;
        for tag in invalidate {
            self.cache.invalidate_by_tag(tag);
        }
        self.populate(&value, &[]);
        Ok(())
    }

    fn delete_cached<T>(&self, id: &str, invalidate: &[String]) -> Result<()>
    where
        T: Cacheable,
        L: Origin<T>,
    {
        Origin::<T>::delete(self.ledger.as_ref(), id)?;
        self.forget::<T>(id);
        for tag in invalidate {
            self.cache.invalidate_by_tag(tag);
        }
        Ok(())
    }

    /// Identity by address, read through
    pub fn get_identity_cached(&self, address: &str) -> Result<Option<Identity>> {
        self.get_cached(address)
    }

    /// Write an identity, then cache it and its enriched view
    pub fn set_identity_cached(&self, identity: Identity) -> Result<()> {
        self.set_cached(identity.clone(), &[])?;
        match self.build_enriched(identity) {
            Ok(enriched) => self.populate(&enriched, &[]),
            Err(err) => warn!(error = %err, "failed to build enriched identity"),
        }
        Ok(())
    }

    /// Delete an identity and everything cached from it
    pub fn delete_identity_cached(&self, address: &str) -> Result<()> {
        let did = Origin::<Identity>::get(self.ledger.as_ref(), address)?.map(|identity| identity.did);
        Origin::<Identity>::delete(self.ledger.as_ref(), address)?;
        self.forget::<Identity>(address);
        self.forget::<EnrichedIdentity>(address);
        self.invalidate_related(address, did.as_deref());
        Ok(())
    }

    /// Credential by id, read through
    pub fn get_credential_cached(&self, id: &str) -> Result<Option<Credential>> {
        self.get_cached(id)
    }

    /// Write a credential and drop the holder's cached credential list and
    /// enriched identity
    pub fn set_credential_cached(&self, credential: Credential) -> Result<()> {
        let holder = credential.holder.clone();
        self.set_cached(credential, &[holder_tag(&holder)])?;
        self.forget_holder(&holder);
        Ok(())
    }

    /// Delete a credential
    pub fn delete_credential_cached(&self, id: &str) -> Result<()> {
        let holder = Origin::<Credential>::get(self.ledger.as_ref(), id)?.map(|c| c.holder);
        let invalidate: Vec<String> = holder.iter().map(|h| holder_tag(h)).collect();
        self.delete_cached::<Credential>(id, &invalidate)?;
        if let Some(holder) = &holder {
            self.forget_holder(holder);
        }
        Ok(())
    }

    /// Drop the derived views of `holder`'s credentials. Direct deletes so
    /// they go even with tags disabled.
    fn forget_holder(&self, holder: &str) {
        let _ = self.cache.delete(&holder_list_key(holder));
        self.forget::<EnrichedIdentity>(holder);
    }

    /// Every credential of `holder`, sorted by id.
    ///
    /// The list is cached as one entry, so it is either complete or missing;
    /// evicting one of the holder's credentials never truncates it. On a miss
    /// the list is loaded from the ledger and the credentials are cached one
    /// by one under the holder tag as well.
    pub fn credentials_by_holder_cached(&self, holder: &str) -> Result<Vec<Credential>> {
        let list_key = holder_list_key(holder);
        if let Some(record) = self.cache.get_value(&list_key) {
            if let CachedRecord::HolderCredentials(credentials) = record.as_ref() {
                return Ok(credentials.clone());
            }
        }

        let tag = holder_tag(holder);
        let loaded = self.ledger.credentials_by_holder(holder)?;
        for credential in &loaded {
            self.populate(credential, std::slice::from_ref(&tag));
        }
        let options = SetOptions {
            ttl: Some(self.cache.config().ttl_for(&EntryType::Credential)),
            tags: vec![tag],
            owner: Some(holder.to_string()),
        };
        if let Err(err) =
            self.cache
                .set_with(list_key, CachedRecord::HolderCredentials(loaded.clone()), options)
        {
            warn!(holder, error = %err, "failed to cache credential list");
        }
        debug!(holder, count = loaded.len(), "credentials loaded from ledger");
        Ok(loaded)
    }

    /// DID document, read through
    pub fn get_did_document_cached(&self, did: &str) -> Result<Option<DidDocument>> {
        self.get_cached(did)
    }

    /// Write a DID document and drop views embedding it
    pub fn set_did_document_cached(&self, doc: DidDocument) -> Result<()> {
        let tag = did_tag(&doc.id);
        self.set_cached(doc, &[tag])
    }

    /// Delete a DID document
    pub fn delete_did_document_cached(&self, did: &str) -> Result<()> {
        self.delete_cached::<DidDocument>(did, &[did_tag(did)])
    }

    /// Consent by id, read through
    pub fn get_consent_cached(&self, id: &str) -> Result<Option<ConsentRecord>> {
        self.get_cached(id)
    }

    /// Write a consent and drop the holder's cached consents and enriched
    /// identity
    pub fn set_consent_cached(&self, consent: ConsentRecord) -> Result<()> {
        let holder = consent.holder.clone();
        self.set_cached(consent, &[consent_holder_tag(&holder)])?;
        self.forget::<EnrichedIdentity>(&holder);
        Ok(())
    }

    /// Delete a consent
    pub fn delete_consent_cached(&self, id: &str) -> Result<()> {
        let holder = Origin::<ConsentRecord>::get(self.ledger.as_ref(), id)?.map(|c| c.holder);
        let invalidate: Vec<String> = holder.iter().map(|h| consent_holder_tag(h)).collect();
        self.delete_cached::<ConsentRecord>(id, &invalidate)
    }

    /// ZK proof by id, read through
    pub fn get_zk_proof_cached(&self, id: &str) -> Result<Option<ZkProof>> {
        self.get_cached(id)
    }

    /// Write a ZK proof
    pub fn set_zk_proof_cached(&self, proof: ZkProof) -> Result<()> {
        self.set_cached(proof, &[])
    }

    /// Delete a ZK proof
    pub fn delete_zk_proof_cached(&self, id: &str) -> Result<()> {
        self.delete_cached::<ZkProof>(id, &[])
    }

    /// Share request by id, read through. Cached under the share request TTL.
    pub fn get_share_request_cached(&self, id: &str) -> Result<Option<ShareRequest>> {
        self.get_cached(id)
    }

    /// Write a share request
    pub fn set_share_request_cached(&self, request: ShareRequest) -> Result<()> {
        self.set_cached(request, &[])
    }

    /// Delete a share request
    pub fn delete_share_request_cached(&self, id: &str) -> Result<()> {
        self.delete_cached::<ShareRequest>(id, &[])
    }

    /// Enriched view of `address`, built from the ledger on a miss
    pub fn enriched_identity_cached(&self, address: &str) -> Result<Option<EnrichedIdentity>> {
        if let Some(enriched) = self.cached::<EnrichedIdentity>(address) {
            return Ok(Some(enriched));
        }
        let identity = match self.get_identity_cached(address)? {
            Some(identity) => identity,
            None => return Ok(None),
        };
        let enriched = self.build_enriched(identity)?;
        self.populate(&enriched, &[]);
        Ok(Some(enriched))
    }

    fn build_enriched(&self, identity: Identity) -> Result<EnrichedIdentity> {
        let now = Utc::now();
        let did_document = Origin::<DidDocument>::get(self.ledger.as_ref(), &identity.did)?;
        let credentials: Vec<Credential> = self
            .ledger
            .credentials_by_holder(&identity.address)?
            .into_iter()
            .filter(|c| c.is_active_at(now))
            .collect();
        let active_consents: Vec<ConsentRecord> = self
            .ledger
            .consents_by_holder(&identity.address)?
            .into_iter()
            .filter(|c| c.is_active_at(now))
            .collect();

        let computed = ComputedFields {
            credential_count: credentials.len(),
            consent_count: active_consents.len(),
            kyc_level: KycLevel::from_credentials(&credentials),
            last_updated: now,
        };
        Ok(EnrichedIdentity {
            identity,
            did_document,
            credentials,
            active_consents,
            computed,
        })
    }

    fn invalidate_related(&self, address: &str, did: Option<&str>) -> usize {
        let mut removed = 0;
        if let Some(did) = did {
            removed += self.cache.invalidate_by_tag(&did_tag(did));
        }
        removed += self.cache.invalidate_by_tag(&holder_tag(address));
        removed += self.cache.invalidate_by_tag(&consent_holder_tag(address));
        removed
    }

    /// Drop every cached entry about `address`. Returns how many were removed.
    pub fn invalidate_user_cache(&self, address: &str) -> Result<usize> {
        let did = match self.cached::<Identity>(address) {
            Some(identity) => Some(identity.did),
            None => Origin::<Identity>::get(self.ledger.as_ref(), address)?.map(|i| i.did),
        };

        let mut removed = self.invalidate_related(address, did.as_deref());
        let owned: Vec<CacheKey> = self
            .cache
            .get_by_owner(address)
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        removed += self.cache.delete_multiple(&owned);
        debug!(address, removed, "user cache invalidated");
        Ok(removed)
    }

    /// Load up to `limit` active identities into the cache
    pub fn preload_active_identities(&self, limit: usize) -> Result<usize> {
        let identities = self.ledger.active_identities(limit)?;
        for identity in &identities {
            self.populate(identity, &[]);
        }
        debug!(count = identities.len(), "identities preloaded");
        Ok(identities.len())
    }

    /// Clear the cache and, if configured, preload active identities.
    /// Returns how many identities were preloaded.
    pub fn refresh_cache(&self) -> Result<usize> {
        self.cache.clear();
        if self.cache.config().preload_identities {
            self.preload_active_identities(DEFAULT_PRELOAD_LIMIT)
        } else {
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(types: &[&str]) -> Credential {
        Credential::new("c", "addr1", "issuer", types)
    }

    #[test]
    fn test_kyc_level() {
        assert_eq!(KycLevel::from_credentials(&[]), KycLevel::None);
        assert_eq!(
            KycLevel::from_credentials(&[credential(&["AadhaarCredential"])]),
            KycLevel::Basic
        );
        assert_eq!(
            KycLevel::from_credentials(&[
                credential(&["BasicKYCCredential"]),
                credential(&["BiometricCredential"]),
            ]),
            KycLevel::Advanced
        );
        assert_eq!(
            KycLevel::from_credentials(&[credential(&["EmailCredential"])]),
            KycLevel::None
        );
    }

    #[test]
    fn test_record_round_trip() {
        let identity = Identity::new("addr1", "did:desh:1");
        let record = identity.clone().into_record();
        assert_eq!(Identity::from_record(&record), Some(identity));
        assert_eq!(Credential::from_record(&record), None);
    }

    #[test]
    fn test_enriched_tags() {
        let enriched = EnrichedIdentity {
            identity: Identity::new("addr1", "did:desh:1"),
            did_document: None,
            credentials: Vec::new(),
            active_consents: Vec::new(),
            computed: ComputedFields {
                credential_count: 0,
                consent_count: 0,
                kyc_level: KycLevel::None,
                last_updated: Utc::now(),
            },
        };
        assert_eq!(
            enriched.tags(),
            vec!["did:did:desh:1", "holder:addr1", "consent_holder:addr1"]
        );
    }
}
