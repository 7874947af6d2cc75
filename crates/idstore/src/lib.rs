//! # idstore
//!
//! Authoritative identity ledger that the identity cache reads through and
//! writes through.
//!
//! ## Contract
//! - One `Origin<T>` per record type: `get(id) -> Option<T>`, `set(T)`, `delete(id)`
//! - Holder queries for credentials and consents
//! - Active identity listing for cache preload
//! - Share requests between modules
//!
//! `MemoryLedger` is the in-process implementation used by tests and the
//! `idcached` driver.

#![warn(missing_docs)]

mod error;
mod ledger;
mod records;

pub use error::{Error, Result};
pub use ledger::{IdentityLedger, MemoryLedger, Origin};
pub use records::{
    ConsentRecord, Credential, CredentialStatus, DataRequest, DidDocument, Identity,
    IdentityStatus, Service, ShareRequest, ShareRequestStatus, VerificationMethod, ZkProof,
};
