//! Synthetic ledger workload
//!
//! Seeds a `MemoryLedger` with identities and their records, then drives
//! reads, writes and invalidations through the cached ledger.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use idcache::CachedLedger;
use idstore::{
    ConsentRecord, Credential, DidDocument, Identity, MemoryLedger, Origin, ShareRequest, ZkProof,
};
use serde::Serialize;
use tracing::{debug, info};

const CREDENTIAL_TYPES: [&str; 4] = [
    "BasicKYCCredential",
    "EmailCredential",
    "AadhaarCredential",
    "AdvancedKYCCredential",
];

/// Shape of one run
#[derive(Debug, Clone, Copy)]
pub struct Workload {
    pub identities: usize,
    pub rounds: usize,
    /// Every n-th read in a round is followed by a credential write
    pub write_every: usize,
    /// Every n-th identity is invalidated at the end of a round
    pub invalidate_every: usize,
}

/// Counters for the report
#[derive(Debug, Default, Clone, Serialize)]
pub struct WorkloadReport {
    pub reads: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub entries_invalidated: u64,
    pub elapsed: Duration,
}

fn address(i: usize) -> String {
    format!("addr{:04}", i)
}

fn did(i: usize) -> String {
    format!("did:desh:{:04}", i)
}

/// Fill `ledger` with `count` identities, each with a DID document, a few
/// credentials, a consent, a proof and a share request
pub fn seed(ledger: &MemoryLedger, count: usize) -> Result<()> {
    for i in 0..count {
        let addr = address(i);
        ledger.set(Identity::new(addr.clone(), did(i)))?;
        ledger.set(DidDocument::new(did(i)))?;

        for n in 0..=(i % 3) {
            let credential_type = CREDENTIAL_TYPES[(i + n) % CREDENTIAL_TYPES.len()];
            ledger.set(Credential::new(
                format!("cred-{}-{}", i, n),
                addr.clone(),
                "did:desh:issuer",
                &[credential_type],
            ))?;
        }

        ledger.set(ConsentRecord::new(
            format!("consent-{}", i),
            addr.clone(),
            "did:desh:verifier",
            "kyc",
        ))?;
        ledger.set(ZkProof {
            id: format!("proof-{}", i),
            prover: addr,
            circuit: "age_over_18".to_string(),
            proof: format!("0x{:08x}", i),
            created_at: Utc::now(),
        })?;
        ledger.set(ShareRequest::new(
            format!("share-{}", i),
            "trade",
            "identity",
            did(i),
            "kyc",
        ))?;
    }
    info!(identities = count, records = ledger.len(), "ledger seeded");
    Ok(())
}

impl Workload {
    pub fn run(&self, facade: &CachedLedger<MemoryLedger>) -> Result<WorkloadReport> {
        let started = Instant::now();
        let mut report = WorkloadReport::default();

        for round in 0..self.rounds {
            for i in 0..self.identities {
                let addr = address(i);
                facade.enriched_identity_cached(&addr)?;
                facade.get_identity_cached(&addr)?;
                facade.get_did_document_cached(&did(i))?;
                facade.credentials_by_holder_cached(&addr)?;
                facade.get_zk_proof_cached(&format!("proof-{}", i))?;
                facade.get_share_request_cached(&format!("share-{}", i))?;
                facade.get_identity_cached(&address(self.identities + i))?;
                report.reads += 7;

                if self.write_every > 0 && (round * self.identities + i) % self.write_every == 0 {
                    facade.set_credential_cached(Credential::new(
                        format!("cred-{}-r{}", i, round),
                        addr.clone(),
                        "did:desh:issuer",
                        &["EmailCredential"],
                    ))?;
                    report.writes += 1;
                }
            }

            if self.invalidate_every > 0 {
                for i in (0..self.identities).step_by(self.invalidate_every) {
                    let removed = facade.invalidate_user_cache(&address(i))?;
                    report.invalidations += 1;
                    report.entries_invalidated += removed as u64;
                }
            }
            debug!(round, entries = facade.cache().entry_count(), "round finished");
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }
}
