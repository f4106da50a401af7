//! CA key record persistence
//!
//! The key store holds the single canonical CA record. Backends must make
//! [`KeyStore::insert_canonical`] a compare-and-swap: when two writers race on
//! an empty store exactly one insert becomes canonical and the other learns
//! which record won.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::error::CaResult;

/// Persisted CA certificate and private key, both PEM encoded
#[derive(Clone)]
pub struct CaKeyRecord {
    pub id: i64,
    pub certificate_pem: String,
    pub private_key_pem: SecretString,
}

impl CaKeyRecord {
    /// Build a record that has not been assigned an id yet
    pub fn new(certificate_pem: String, private_key_pem: SecretString) -> Self {
        Self {
            id: 0,
            certificate_pem,
            private_key_pem,
        }
    }

    pub fn private_key_pem(&self) -> &str {
        self.private_key_pem.expose_secret()
    }
}

impl fmt::Debug for CaKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaKeyRecord")
            .field("id", &self.id)
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Result of a compare-and-swap insert of the canonical record
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// Our record is now canonical
    Inserted(CaKeyRecord),
    /// Another writer got there first; this is the canonical record
    AlreadyPresent(CaKeyRecord),
}

impl InsertOutcome {
    pub fn record(&self) -> &CaKeyRecord {
        match self {
            InsertOutcome::Inserted(record) | InsertOutcome::AlreadyPresent(record) => record,
        }
    }
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Returns the canonical record, the earliest inserted one if several exist.
    async fn canonical_record(&self) -> CaResult<Option<CaKeyRecord>>;

    /// Insert `record` as canonical unless a canonical record already exists.
    async fn insert_canonical(&self, record: CaKeyRecord) -> CaResult<InsertOutcome>;
}
