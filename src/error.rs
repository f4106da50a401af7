//! Error taxonomy for CA bootstrap, issuance and trust propagation.

use thiserror::Error;

/// Result alias used across the library.
pub type CaResult<T> = std::result::Result<T, CaError>;

/// Errors surfaced by the certificate authority.
///
/// Bootstrap and issuance errors are returned to the caller unchanged; nothing
/// in this crate retries on its own.
#[derive(Debug, Error)]
pub enum CaError {
    /// The external key generator is missing, failed to run, or timed out.
    #[error("key generator unavailable: {0}")]
    ToolUnavailable(String),

    /// Generated or stored PEM material could not be parsed.
    #[error("CA key material is corrupt: {0}")]
    KeyMaterialCorrupt(String),

    /// No canonical CA key record has been persisted yet.
    #[error("no CA key record exists")]
    KeyRecordMissing,

    /// Building or signing a certificate failed.
    #[error("certificate signing failed: {0}")]
    SigningFailed(String),

    /// Trust material could not be written to some principals.
    #[error("trust propagation failed for {failed} of {total} principals")]
    PropagationPartialFailure { failed: usize, total: usize },

    /// The persistence layer reported an error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CaError {
    pub(crate) fn corrupt(context: &str, err: impl std::fmt::Display) -> Self {
        CaError::KeyMaterialCorrupt(format!("{}: {}", context, err))
    }

    pub(crate) fn signing(context: &str, err: impl std::fmt::Display) -> Self {
        CaError::SigningFailed(format!("{}: {}", context, err))
    }
}

impl From<rusqlite::Error> for CaError {
    fn from(err: rusqlite::Error) -> Self {
        CaError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_message() {
        let err = CaError::PropagationPartialFailure {
            failed: 2,
            total: 5,
        };
        assert_eq!(
            err.to_string(),
            "trust propagation failed for 2 of 5 principals"
        );
    }

    #[test]
    fn test_signing_helper_keeps_context() {
        let err = CaError::signing("Failed to set issuer", "bad name");
        assert!(matches!(err, CaError::SigningFailed(ref m) if m == "Failed to set issuer: bad name"));
    }
}
