//! Principal records and the store used to distribute trust material.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CaResult;

/// Integer-backed principal role as stored in the `users` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub i64);

impl Role {
    pub const USER: Role = Role(1);
    /// Principals of this role carry the CA's own certificate
    pub const MERGER: Role = Role(2);
}

/// New principals are ordinary users unless a role is given explicitly
impl Default for Role {
    fn default() -> Self {
        Role::USER
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: i64,
    pub phone: Option<String>,
    pub role: Role,
    pub public_key: Option<String>,
    pub cert: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a principal that has not been persisted yet
#[derive(Debug, Clone, Default)]
pub struct NewPrincipal {
    pub phone: Option<String>,
    pub role: Role,
    pub public_key: Option<String>,
    pub cert: Option<String>,
}

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn insert_principal(&self, principal: NewPrincipal) -> CaResult<Principal>;

    async fn get_principal(&self, id: i64) -> CaResult<Option<Principal>>;

    async fn find_by_role(&self, role: Role) -> CaResult<Vec<Principal>>;

    /// Overwrite the principal's public key and certificate, bumping `updated_at`.
    async fn update_trust_material(
        &self,
        id: i64,
        public_key_pem: &str,
        certificate_pem: &str,
    ) -> CaResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_principal_is_not_a_trust_target() {
        let principal = NewPrincipal::default();
        assert_eq!(principal.role, Role::USER);
        assert_ne!(principal.role, Role::MERGER);
    }
}
