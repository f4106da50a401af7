//! Certificate signing request input
//!
//! The issuer only needs a subject name and a public key. Callers that already
//! hold a parsed request build [`CertificateRequest`] directly; the PEM and
//! `X509Req` constructors are conveniences for everyone else.

use openssl::pkey::{PKey, Public};
use openssl::x509::{X509Name, X509ReqRef, X509Req};

use crate::error::{CaError, CaResult};
use crate::issuer_attributes::{format_distinguished_name, parse_distinguished_name};

pub struct CertificateRequest {
    pub subject: X509Name,
    pub public_key: PKey<Public>,
}

impl CertificateRequest {
    pub fn new(subject: X509Name, public_key: PKey<Public>) -> Self {
        Self {
            subject,
            public_key,
        }
    }

    /// Build from a slash-form subject such as `/CN=alice`
    pub fn from_subject_str(subject: &str, public_key: PKey<Public>) -> CaResult<Self> {
        Ok(Self::new(parse_distinguished_name(subject)?, public_key))
    }

    /// Take subject and key from a parsed request after checking its self-signature
    pub fn from_x509_req(req: &X509ReqRef) -> CaResult<Self> {
        let public_key = req
            .public_key()
            .map_err(|e| CaError::signing("Failed to read CSR public key", e))?;
        let signed = req
            .verify(&public_key)
            .map_err(|e| CaError::signing("Failed to verify CSR signature", e))?;
        if !signed {
            return Err(CaError::SigningFailed(
                "CSR signature does not match its public key".to_string(),
            ));
        }
        let subject = req
            .subject_name()
            .to_owned()
            .map_err(|e| CaError::signing("Failed to copy CSR subject", e))?;
        Ok(Self::new(subject, public_key))
    }

    pub fn from_pem(pem: &[u8]) -> CaResult<Self> {
        let req = X509Req::from_pem(pem).map_err(|e| CaError::signing("Failed to parse CSR", e))?;
        Self::from_x509_req(&req)
    }

    pub fn subject_string(&self) -> CaResult<String> {
        format_distinguished_name(&self.subject)
    }
}

impl std::fmt::Debug for CertificateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRequest")
            .field("subject", &self.subject_string().unwrap_or_default())
            .field("key_bits", &self.public_key.bits())
            .finish()
    }
}
