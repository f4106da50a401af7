//! Trust propagation
//!
//! After a fresh CA is generated, every principal holding the trusted role
//! gets the CA's public key and certificate written into its own record.
//! Writes are independent and run concurrently; one failing principal never
//! stops the others. Every outcome lands in a [`PropagationReport`].

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::error::{CaError, CaResult};
use crate::principals::{PrincipalStore, Role};

#[derive(Debug, Default)]
pub struct PropagationReport {
    pub updated: Vec<i64>,
    pub failed: Vec<(i64, CaError)>,
}

impl PropagationReport {
    pub fn total(&self) -> usize {
        self.updated.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Collapse into an error if any principal was left behind
    pub fn into_result(self) -> CaResult<Vec<i64>> {
        if self.failed.is_empty() {
            Ok(self.updated)
        } else {
            Err(CaError::PropagationPartialFailure {
                failed: self.failed.len(),
                total: self.total(),
            })
        }
    }
}

/// Write the CA trust material to every principal of `role`
pub async fn propagate(
    store: &dyn PrincipalStore,
    role: Role,
    public_key_pem: &str,
    certificate_pem: &str,
) -> PropagationReport {
    let targets = match store.find_by_role(role).await {
        Ok(targets) => targets,
        Err(e) => {
            error!(role = role.0, error = %e, "Failed to list trust propagation targets");
            return PropagationReport::default();
        }
    };

    let writes = targets.iter().map(|principal| async move {
        let result = store
            .update_trust_material(principal.id, public_key_pem, certificate_pem)
            .await;
        (principal.id, result)
    });

    let mut report = PropagationReport::default();
    for (id, result) in join_all(writes).await {
        match result {
            Ok(()) => report.updated.push(id),
            Err(e) => {
                warn!(principal_id = id, error = %e, "Failed to propagate CA trust material");
                report.failed.push((id, e));
            }
        }
    }

    info!(
        role = role.0,
        updated = report.updated.len(),
        failed = report.failed.len(),
        "Trust propagation finished"
    );
    report
}
