use std::sync::Arc;

use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use idcache::{
    CacheConfig, CacheKey, CachedLedger, CachedRecord, EntryType, Error, EvictionPolicy,
    IdentityCache, KycLevel,
};
use idstore::{
    ConsentRecord, Credential, CredentialStatus, DidDocument, Identity, IdentityStatus,
    MemoryLedger, Origin, ShareRequest, ZkProof,
};

fn setup() -> (Arc<MemoryLedger>, CachedLedger<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::new());
    let cache = Arc::new(IdentityCache::new(
        CacheConfig::default().with_async_eviction(false),
    ));
    let facade = CachedLedger::new(Arc::clone(&ledger), cache);
    (ledger, facade)
}

fn seed(ledger: &MemoryLedger) {
    ledger.set(Identity::new("addr1", "did:desh:1")).unwrap();
    ledger.set(DidDocument::new("did:desh:1")).unwrap();
    ledger
        .set(Credential::new("c1", "addr1", "did:desh:issuer", &["BasicKYCCredential"]))
        .unwrap();
    ledger
        .set(Credential::new("c2", "addr1", "did:desh:issuer", &["EmailCredential"]))
        .unwrap();
    ledger
        .set(ConsentRecord::new("k1", "addr1", "did:desh:bank", "loan"))
        .unwrap();
    let mut revoked = ConsentRecord::new("k2", "addr1", "did:desh:shop", "marketing");
    revoked.revoked = true;
    ledger.set(revoked).unwrap();
}

fn cached(facade: &CachedLedger<MemoryLedger>, entry_type: EntryType, id: &str) -> bool {
    facade.cache().exists(&CacheKey::new(entry_type, id))
}

#[test]
fn test_read_through_populates_cache() {
    let (ledger, facade) = setup();
    seed(&ledger);

    let identity = facade.get_identity_cached("addr1").unwrap().unwrap();
    assert_eq!(identity.did, "did:desh:1");
    assert!(cached(&facade, EntryType::Identity, "addr1"));
    assert_eq!(facade.stats().cache_misses, 1);

    ledger.close();
    let again = facade.get_identity_cached("addr1").unwrap().unwrap();
    assert_eq!(again, identity);
    assert_eq!(facade.stats().cache_hits, 1);
}

#[test]
fn test_absent_record_is_not_cached() {
    let (_ledger, facade) = setup();
    assert!(facade.get_identity_cached("nobody").unwrap().is_none());
    assert_eq!(facade.cache().entry_count(), 0);
}

#[test]
fn test_origin_errors_propagate() {
    let (ledger, facade) = setup();
    ledger.close();

    let err = facade.get_credential_cached("c1").unwrap_err();
    assert!(matches!(err, Error::Origin(idstore::Error::Closed)));
    assert!(facade.enriched_identity_cached("addr1").is_err());
    assert!(facade.credentials_by_holder_cached("addr1").is_err());
}

#[test]
fn test_failed_write_leaves_cache_untouched() {
    let (ledger, facade) = setup();
    ledger.close();

    let err = facade
        .set_identity_cached(Identity::new("addr1", "did:desh:1"))
        .unwrap_err();
    assert!(matches!(err, Error::Origin(idstore::Error::Closed)));
    assert_eq!(facade.cache().entry_count(), 0);
}

#[test]
fn test_write_through() {
    let (ledger, facade) = setup();
    facade
        .set_did_document_cached(DidDocument::new("did:desh:9"))
        .unwrap();

    assert!(Origin::<DidDocument>::get(ledger.as_ref(), "did:desh:9")
        .unwrap()
        .is_some());
    assert!(cached(&facade, EntryType::DidDocument, "did:desh:9"));

    facade.delete_did_document_cached("did:desh:9").unwrap();
    assert!(!cached(&facade, EntryType::DidDocument, "did:desh:9"));
    assert!(facade.get_did_document_cached("did:desh:9").unwrap().is_none());
}

#[test]
fn test_zk_proof_round_trip() {
    let (_ledger, facade) = setup();
    let proof = ZkProof {
        id: "p1".to_string(),
        prover: "addr1".to_string(),
        circuit: "age_over_18".to_string(),
        proof: "0xabc".to_string(),
        created_at: Utc::now(),
    };
    facade.set_zk_proof_cached(proof.clone()).unwrap();

    assert_eq!(facade.get_zk_proof_cached("p1").unwrap(), Some(proof));
    assert_eq!(facade.cache().get_by_owner("addr1").len(), 1);

    facade.delete_zk_proof_cached("p1").unwrap();
    assert!(facade.get_zk_proof_cached("p1").unwrap().is_none());
}

#[test]
fn test_enriched_identity() {
    let (ledger, facade) = setup();
    seed(&ledger);
    let mut revoked = Credential::new("c0", "addr1", "did:desh:issuer", &["AdvancedKYCCredential"]);
    revoked.status = CredentialStatus::Revoked;
    ledger.set(revoked).unwrap();
    let mut expired = Credential::new("c9", "addr1", "did:desh:issuer", &["BiometricCredential"]);
    expired.expires_at = Some(Utc::now() - ChronoDuration::seconds(1));
    ledger.set(expired).unwrap();

    let enriched = facade.enriched_identity_cached("addr1").unwrap().unwrap();
    let ids: Vec<&str> = enriched.credentials.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    assert_eq!(enriched.computed.credential_count, 2);
    assert_eq!(enriched.computed.consent_count, 1);
    assert_eq!(enriched.computed.kyc_level, KycLevel::Basic);
    assert!(enriched.did_document.is_some());
    assert_eq!(enriched.active_consents[0].id, "k1");
    assert!(cached(&facade, EntryType::EnrichedIdentity, "addr1"));

    // a new credential drops the derived view
    facade
        .set_credential_cached(Credential::new(
            "c3",
            "addr1",
            "did:desh:issuer",
            &["BiometricCredential"],
        ))
        .unwrap();
    assert!(!cached(&facade, EntryType::EnrichedIdentity, "addr1"));

    let rebuilt = facade.enriched_identity_cached("addr1").unwrap().unwrap();
    assert_eq!(rebuilt.computed.credential_count, 3);
    assert_eq!(rebuilt.computed.kyc_level, KycLevel::Advanced);
}

#[test]
fn test_enriched_identity_missing() {
    let (_ledger, facade) = setup();
    assert!(facade.enriched_identity_cached("nobody").unwrap().is_none());
}

#[test]
fn test_consent_write_drops_enriched_view() {
    let (ledger, facade) = setup();
    seed(&ledger);
    facade.enriched_identity_cached("addr1").unwrap();

    let mut expiring = ConsentRecord::new("k3", "addr1", "did:desh:bank", "kyc");
    expiring.expires_at = Some(Utc::now() + ChronoDuration::hours(1));
    facade.set_consent_cached(expiring).unwrap();
    assert!(!cached(&facade, EntryType::EnrichedIdentity, "addr1"));

    let rebuilt = facade.enriched_identity_cached("addr1").unwrap().unwrap();
    assert_eq!(rebuilt.computed.consent_count, 2);
}

#[test]
fn test_credentials_by_holder_served_from_cache() {
    let (ledger, facade) = setup();
    seed(&ledger);

    let loaded = facade.credentials_by_holder_cached("addr1").unwrap();
    let ids: Vec<&str> = loaded.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);

    ledger.close();
    let from_cache = facade.credentials_by_holder_cached("addr1").unwrap();
    assert_eq!(from_cache, loaded);
}

#[test]
fn test_holder_list_survives_credential_eviction() {
    let ledger = Arc::new(MemoryLedger::new());
    for id in ["c1", "c2", "c3"] {
        ledger
            .set(Credential::new(id, "addr1", "did:desh:issuer", &["EmailCredential"]))
            .unwrap();
    }
    ledger.set(Identity::new("addr2", "did:desh:2")).unwrap();
    let cache = Arc::new(IdentityCache::new(
        CacheConfig::default()
            .with_async_eviction(false)
            .with_max_entries(3)
            .with_eviction_policy(EvictionPolicy::Lru),
    ));
    let facade = CachedLedger::new(Arc::clone(&ledger), cache);

    assert_eq!(facade.credentials_by_holder_cached("addr1").unwrap().len(), 3);
    facade.get_identity_cached("addr2").unwrap();
    assert!(facade.stats().eviction_count > 0);
    assert_eq!(facade.credentials_by_holder_cached("addr1").unwrap().len(), 3);

    // dropping a single credential from the cache leaves the list whole
    facade
        .cache()
        .delete(&CacheKey::new(EntryType::Credential, "c3"))
        .ok();
    let ids: Vec<String> = facade
        .credentials_by_holder_cached("addr1")
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
}

#[test]
fn test_holder_list_with_tags_disabled() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&ledger);
    let cache = Arc::new(IdentityCache::new(
        CacheConfig::default().with_async_eviction(false).with_tags(false),
    ));
    let facade = CachedLedger::new(Arc::clone(&ledger), cache);

    assert_eq!(facade.credentials_by_holder_cached("addr1").unwrap().len(), 2);
    facade
        .set_credential_cached(Credential::new("c3", "addr1", "issuer", &["EmailCredential"]))
        .unwrap();
    assert_eq!(facade.credentials_by_holder_cached("addr1").unwrap().len(), 3);
}

#[test]
fn test_share_request_cached() {
    let (ledger, facade) = setup();
    let request = ShareRequest::new("r1", "trade", "identity", "did:desh:1", "kyc");
    ledger.set(request.clone()).unwrap();

    assert_eq!(facade.get_share_request_cached("r1").unwrap(), Some(request.clone()));
    let entry = facade
        .cache()
        .get(&CacheKey::new(EntryType::ShareRequest, "r1"))
        .unwrap();
    let remaining = entry.ttl_remaining(Instant::now()).unwrap();
    assert!(remaining <= Duration::from_secs(15 * 60));
    assert!(remaining > Duration::from_secs(14 * 60));

    ledger.close();
    assert_eq!(facade.get_share_request_cached("r1").unwrap(), Some(request));
    ledger.reopen();

    facade.delete_share_request_cached("r1").unwrap();
    assert!(facade.get_share_request_cached("r1").unwrap().is_none());
    assert!(Origin::<ShareRequest>::get(ledger.as_ref(), "r1").unwrap().is_none());
}

#[test]
fn test_share_request_write_through() {
    let (ledger, facade) = setup();
    let mut request = ShareRequest::new("r2", "trade", "identity", "did:desh:1", "kyc");
    facade.set_share_request_cached(request.clone()).unwrap();
    assert!(cached(&facade, EntryType::ShareRequest, "r2"));

    request.status = idstore::ShareRequestStatus::Approved;
    facade.set_share_request_cached(request.clone()).unwrap();
    ledger.close();
    assert_eq!(facade.get_share_request_cached("r2").unwrap(), Some(request));
}

#[test]
fn test_credential_write_invalidates_holder_list() {
    let (ledger, facade) = setup();
    seed(&ledger);
    facade.credentials_by_holder_cached("addr1").unwrap();

    facade
        .set_credential_cached(Credential::new("c3", "addr1", "issuer", &["EmailCredential"]))
        .unwrap();
    assert_eq!(facade.credentials_by_holder_cached("addr1").unwrap().len(), 3);

    facade.delete_credential_cached("c1").unwrap();
    let remaining = facade.credentials_by_holder_cached("addr1").unwrap();
    let ids: Vec<&str> = remaining.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c2", "c3"]);
}

#[test]
fn test_invalidate_user_cache() {
    let (ledger, facade) = setup();
    seed(&ledger);
    ledger.set(Identity::new("addr2", "did:desh:2")).unwrap();

    facade.enriched_identity_cached("addr1").unwrap();
    facade.credentials_by_holder_cached("addr1").unwrap();
    facade.get_consent_cached("k1").unwrap();
    facade.get_did_document_cached("did:desh:1").unwrap();
    facade.get_identity_cached("addr2").unwrap();

    let removed = facade.invalidate_user_cache("addr1").unwrap();
    assert!(removed >= 6);
    assert!(facade.cache().get_by_owner("addr1").is_empty());
    assert!(!cached(&facade, EntryType::DidDocument, "did:desh:1"));
    assert!(cached(&facade, EntryType::Identity, "addr2"));
}

#[test]
fn test_delete_identity() {
    let (ledger, facade) = setup();
    seed(&ledger);
    facade.enriched_identity_cached("addr1").unwrap();

    facade.delete_identity_cached("addr1").unwrap();
    assert!(!cached(&facade, EntryType::Identity, "addr1"));
    assert!(!cached(&facade, EntryType::EnrichedIdentity, "addr1"));
    assert!(Origin::<Identity>::get(ledger.as_ref(), "addr1").unwrap().is_none());

    let err = facade.delete_identity_cached("addr1").unwrap_err();
    assert!(matches!(err, Error::Origin(idstore::Error::NotFound { .. })));
}

#[test]
fn test_refresh_cache_preloads_active() {
    let (ledger, facade) = setup();
    for i in 0..3 {
        ledger
            .set(Identity::new(format!("addr{}", i), format!("did:desh:{}", i)))
            .unwrap();
    }
    let mut suspended = Identity::new("addr9", "did:desh:9");
    suspended.status = IdentityStatus::Suspended;
    ledger.set(suspended).unwrap();
    facade.get_did_document_cached("did:desh:0").unwrap();
    facade
        .cache()
        .set(
            CacheKey::new(EntryType::Other("scratch".to_string()), "x"),
            CachedRecord::Identity(Identity::new("tmp", "did:desh:tmp")),
            None,
        )
        .unwrap();

    assert_eq!(facade.refresh_cache().unwrap(), 3);
    assert_eq!(facade.cache().entry_count(), 3);
    assert!(!cached(&facade, EntryType::Identity, "addr9"));
}

#[test]
fn test_refresh_cache_without_preload() {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set(Identity::new("addr1", "did:desh:1")).unwrap();
    let cache = Arc::new(IdentityCache::new(
        CacheConfig::default().with_preload_identities(false),
    ));
    let facade = CachedLedger::new(ledger, cache);

    assert_eq!(facade.refresh_cache().unwrap(), 0);
    assert_eq!(facade.cache().entry_count(), 0);
    assert_eq!(facade.preload_active_identities(10).unwrap(), 1);
}
