//! In-memory key and principal store
//!
//! Backs tests and single-process embedding. State lives behind
//! [`parking_lot::RwLock`]s and the handle is cheap to clone; clones share state.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{CaError, CaResult};
use crate::key_store::{CaKeyRecord, InsertOutcome, KeyStore};
use crate::principals::{NewPrincipal, Principal, PrincipalStore, Role};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    ca_keys: Arc<RwLock<Vec<CaKeyRecord>>>,
    principals: Arc<RwLock<BTreeMap<i64, Principal>>>,
    next_principal_id: Arc<RwLock<i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of CA key records ever inserted
    pub fn ca_record_count(&self) -> usize {
        self.ca_keys.read().len()
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn canonical_record(&self) -> CaResult<Option<CaKeyRecord>> {
        Ok(self.ca_keys.read().first().cloned())
    }

    async fn insert_canonical(&self, mut record: CaKeyRecord) -> CaResult<InsertOutcome> {
        let mut keys = self.ca_keys.write();
        if let Some(existing) = keys.first() {
            return Ok(InsertOutcome::AlreadyPresent(existing.clone()));
        }
        record.id = 1;
        keys.push(record.clone());
        Ok(InsertOutcome::Inserted(record))
    }
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn insert_principal(&self, principal: NewPrincipal) -> CaResult<Principal> {
        let id = {
            let mut next = self.next_principal_id.write();
            *next += 1;
            *next
        };
        let now = Utc::now();
        let stored = Principal {
            id,
            phone: principal.phone,
            role: principal.role,
            public_key: principal.public_key,
            cert: principal.cert,
            created_at: now,
            updated_at: now,
        };
        self.principals.write().insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_principal(&self, id: i64) -> CaResult<Option<Principal>> {
        Ok(self.principals.read().get(&id).cloned())
    }

    async fn find_by_role(&self, role: Role) -> CaResult<Vec<Principal>> {
        Ok(self
            .principals
            .read()
            .values()
            .filter(|p| p.role == role)
            .cloned()
            .collect())
    }

    async fn update_trust_material(
        &self,
        id: i64,
        public_key_pem: &str,
        certificate_pem: &str,
    ) -> CaResult<()> {
        let mut principals = self.principals.write();
        let principal = principals
            .get_mut(&id)
            .ok_or_else(|| CaError::Storage(format!("principal {} not found", id)))?;
        principal.public_key = Some(public_key_pem.to_string());
        principal.cert = Some(certificate_pem.to_string());
        principal.updated_at = Utc::now();
        Ok(())
    }
}
