//! In-memory identity ledger
//!
//! `MemoryLedger` stands in for the chain's key-value store. Each record kind
//! lives in its own table; every table is guarded by its own lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::RandomState;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::records::{ConsentRecord, Credential, DidDocument, Identity, ShareRequest, ZkProof};

/// Authoritative store for one record type.
///
/// `get` reports absence as `Ok(None)`; errors mean the store itself failed.
pub trait Origin<T>: Send + Sync {
    /// Look a record up by its primary key
    fn get(&self, id: &str) -> Result<Option<T>>;

    /// Insert or fully replace a record
    fn set(&self, value: T) -> Result<()>;

    /// Remove a record, `Error::NotFound` if absent
    fn delete(&self, id: &str) -> Result<()>;
}

/// Everything the identity cache facade needs from the ledger.
pub trait IdentityLedger:
    Origin<Identity>
    + Origin<Credential>
    + Origin<DidDocument>
    + Origin<ConsentRecord>
    + Origin<ZkProof>
    + Origin<ShareRequest>
{
    /// All credentials held by `holder`
    fn credentials_by_holder(&self, holder: &str) -> Result<Vec<Credential>>;

    /// All consents granted by `holder`
    fn consents_by_holder(&self, holder: &str) -> Result<Vec<ConsentRecord>>;

    /// Up to `limit` active identities, most recently active first
    fn active_identities(&self, limit: usize) -> Result<Vec<Identity>>;
}

struct Table<T> {
    rows: RwLock<HashMap<String, T, RandomState>>,
}

impl<T> Table<T> {
    fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::with_hasher(RandomState::new())),
        }
    }
}

/// MemoryLedger is the in-process origin store
pub struct MemoryLedger {
    identities: Table<Identity>,
    credentials: Table<Credential>,
    did_documents: Table<DidDocument>,
    consents: Table<ConsentRecord>,
    zk_proofs: Table<ZkProof>,
    share_requests: Table<ShareRequest>,

    /// Once set every operation fails with `Error::Closed`
    closed: AtomicBool,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            identities: Table::new(),
            credentials: Table::new(),
            did_documents: Table::new(),
            consents: Table::new(),
            zk_proofs: Table::new(),
            share_requests: Table::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Close the ledger. Further reads and writes fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Reopen a closed ledger
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }

    /// Whether the ledger is closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Total number of records across all tables
    pub fn len(&self) -> usize {
        self.identities.rows.read().len()
            + self.credentials.rows.read().len()
            + self.did_documents.rows.read().len()
            + self.consents.rows.read().len()
            + self.zk_proofs.rows.read().len()
            + self.share_requests.rows.read().len()
    }

    /// Check if the ledger holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

/// Implements `Origin<$record>` over one of the ledger tables
macro_rules! impl_origin {
    ($record:ty, $table:ident, $id:ident, $kind:literal) => {
        impl Origin<$record> for MemoryLedger {
            fn get(&self, id: &str) -> Result<Option<$record>> {
                self.check_open()?;
                Ok(self.$table.rows.read().get(id).cloned())
            }

            fn set(&self, value: $record) -> Result<()> {
                self.check_open()?;
                if value.$id.is_empty() {
                    return Err(Error::Invalid {
                        kind: $kind,
                        reason: "empty id".to_string(),
                    });
                }
                self.$table.rows.write().insert(value.$id.clone(), value);
                Ok(())
            }

            fn delete(&self, id: &str) -> Result<()> {
                self.check_open()?;
                match self.$table.rows.write().remove(id) {
                    Some(_) => Ok(()),
                    None => Err(Error::NotFound {
                        kind: $kind,
                        id: id.to_string(),
                    }),
                }
            }
        }
    };
}

impl_origin!(Identity, identities, address, "identity");
impl_origin!(Credential, credentials, id, "credential");
impl_origin!(DidDocument, did_documents, id, "did_document");
impl_origin!(ConsentRecord, consents, id, "consent");
impl_origin!(ZkProof, zk_proofs, id, "zk_proof");
impl_origin!(ShareRequest, share_requests, id, "share_request");

impl IdentityLedger for MemoryLedger {
    fn credentials_by_holder(&self, holder: &str) -> Result<Vec<Credential>> {
        self.check_open()?;
        let mut creds: Vec<Credential> = self
            .credentials
            .rows
            .read()
            .values()
            .filter(|c| c.holder == holder)
            .cloned()
            .collect();
        creds.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(creds)
    }

    fn consents_by_holder(&self, holder: &str) -> Result<Vec<ConsentRecord>> {
        self.check_open()?;
        let mut consents: Vec<ConsentRecord> = self
            .consents
            .rows
            .read()
            .values()
            .filter(|c| c.holder == holder)
            .cloned()
            .collect();
        consents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(consents)
    }

    fn active_identities(&self, limit: usize) -> Result<Vec<Identity>> {
        self.check_open()?;
        let mut active: Vec<Identity> = self
            .identities
            .rows
            .read()
            .values()
            .filter(|i| i.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| a.address.cmp(&b.address))
        });
        active.truncate(limit);
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::IdentityStatus;

    #[test]
    fn test_put_and_get() {
        let ledger = MemoryLedger::new();
        let identity = Identity::new("addr1", "did:desh:addr1");

        ledger.set(identity.clone()).unwrap();

        let loaded: Option<Identity> = ledger.get("addr1").unwrap();
        assert_eq!(loaded, Some(identity));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_get_missing_is_none() {
        let ledger = MemoryLedger::new();
        let loaded: Option<Credential> = ledger.get("nope").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_delete_not_found() {
        let ledger = MemoryLedger::new();
        let result = Origin::<DidDocument>::delete(&ledger, "did:desh:x");
        assert!(matches!(result, Err(Error::NotFound { kind: "did_document", .. })));
    }

    #[test]
    fn test_share_request_table() {
        let ledger = MemoryLedger::new();
        let request = ShareRequest::new("r1", "trade", "identity", "did:desh:1", "kyc");
        ledger.set(request.clone()).unwrap();

        let loaded: Option<ShareRequest> = ledger.get("r1").unwrap();
        assert_eq!(loaded, Some(request));
        assert!(Origin::<ShareRequest>::delete(&ledger, "r1").is_ok());
        assert!(matches!(
            Origin::<ShareRequest>::delete(&ledger, "r1"),
            Err(Error::NotFound { kind: "share_request", .. })
        ));
    }

    #[test]
    fn test_empty_id_rejected() {
        let ledger = MemoryLedger::new();
        let result = ledger.set(DidDocument::new(""));
        assert!(matches!(result, Err(Error::Invalid { .. })));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_closed_ledger_fails() {
        let ledger = MemoryLedger::new();
        ledger.close();

        let result: Result<Option<Identity>> = ledger.get("addr1");
        assert!(matches!(result, Err(Error::Closed)));
        assert!(matches!(
            ledger.set(Identity::new("addr1", "did:desh:addr1")),
            Err(Error::Closed)
        ));

        ledger.reopen();
        assert!(ledger.set(Identity::new("addr1", "did:desh:addr1")).is_ok());
    }

    #[test]
    fn test_holder_queries() {
        let ledger = MemoryLedger::new();
        ledger.set(Credential::new("c2", "addr1", "iss", &["A"])).unwrap();
        ledger.set(Credential::new("c1", "addr1", "iss", &["B"])).unwrap();
        ledger.set(Credential::new("c3", "addr2", "iss", &["A"])).unwrap();
        ledger.set(ConsentRecord::new("k1", "addr1", "bank", "kyc")).unwrap();

        let creds = ledger.credentials_by_holder("addr1").unwrap();
        let ids: Vec<_> = creds.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);

        assert_eq!(ledger.consents_by_holder("addr1").unwrap().len(), 1);
        assert!(ledger.consents_by_holder("addr2").unwrap().is_empty());
    }

    #[test]
    fn test_active_identities() {
        let ledger = MemoryLedger::new();
        let mut suspended = Identity::new("addr0", "did:desh:addr0");
        suspended.status = IdentityStatus::Suspended;
        ledger.set(suspended).unwrap();

        for i in 1..=3 {
            let mut identity = Identity::new(format!("addr{}", i), format!("did:desh:addr{}", i));
            identity.last_activity_at = identity.last_activity_at + chrono::Duration::seconds(i);
            ledger.set(identity).unwrap();
        }

        let active = ledger.active_identities(2).unwrap();
        let addrs: Vec<_> = active.iter().map(|i| i.address.as_str()).collect();
        assert_eq!(addrs, vec!["addr3", "addr2"]);
    }
}
