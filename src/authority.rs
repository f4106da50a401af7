//! Certificate authority handle
//!
//! [`CertificateAuthority`] owns the process-wide CA key cache. The first
//! caller to find the cache empty runs bootstrap:
//!
//! 1. Load the canonical CA record from the key store, or
//! 2. generate fresh material, persist it with a compare-and-swap insert and,
//!    if that insert won, push the new trust material to every principal of
//!    the trusted role.
//!
//! Concurrent callers wait on the same initialization, so the key generator
//! runs at most once per process. Across processes the key store's
//! compare-and-swap decides which generated CA becomes canonical; losers adopt
//! the winner and skip propagation. A failed bootstrap leaves the cache empty
//! and no certificate can be issued until a later call succeeds.
//!
//! Once cached the key pair is immutable and issuance needs no locking.

use std::fmt;
use std::sync::Arc;

use openssl::pkey::{PKey, Private, Public};
use openssl::x509::X509;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::configs::IssuancePolicy;
use crate::csr::CertificateRequest;
use crate::error::{CaError, CaResult};
use crate::generate_leaf_cert::{IssuedCertificate, LeafCertificateBuilder};
use crate::issuer_attributes::{format_distinguished_name, resolve_issuer_attributes};
use crate::key_generator::KeyGenerator;
use crate::key_store::{CaKeyRecord, InsertOutcome, KeyStore};
use crate::principals::{PrincipalStore, Role};
use crate::trust_propagation::{self, PropagationReport};

/// Parsed CA key material held in memory for the life of the process
pub struct CaKeyPair {
    pub private_key: PKey<Private>,
    pub public_key: PKey<Public>,
    pub certificate: X509,
    issuer_dn: String,
}

impl CaKeyPair {
    /// Parse stored or generated PEM; the public key is taken from the certificate
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> CaResult<Self> {
        let certificate = X509::from_pem(certificate_pem.as_bytes())
            .map_err(|e| CaError::corrupt("Failed to parse CA certificate", e))?;
        let private_key = PKey::private_key_from_pem(private_key_pem.as_bytes())
            .map_err(|e| CaError::corrupt("Failed to parse CA private key", e))?;
        let public_key = certificate
            .public_key()
            .map_err(|e| CaError::corrupt("Failed to read CA certificate public key", e))?;
        if !public_key.public_eq(&private_key) {
            return Err(CaError::KeyMaterialCorrupt(
                "CA private key does not match the CA certificate".to_string(),
            ));
        }
        let issuer_dn = format_distinguished_name(certificate.issuer_name())?;
        Ok(Self {
            private_key,
            public_key,
            certificate,
            issuer_dn,
        })
    }

    pub fn issuer_dn(&self) -> &str {
        &self.issuer_dn
    }

    pub fn public_key_pem(&self) -> CaResult<String> {
        let pem = self
            .public_key
            .public_key_to_pem()
            .map_err(|e| CaError::corrupt("Failed to encode CA public key", e))?;
        String::from_utf8(pem).map_err(|e| CaError::corrupt("CA public key PEM is not UTF-8", e))
    }

    pub fn certificate_pem(&self) -> CaResult<String> {
        let pem = self
            .certificate
            .to_pem()
            .map_err(|e| CaError::corrupt("Failed to encode CA certificate", e))?;
        String::from_utf8(pem).map_err(|e| CaError::corrupt("CA certificate PEM is not UTF-8", e))
    }
}

impl fmt::Debug for CaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaKeyPair")
            .field("issuer_dn", &self.issuer_dn)
            .field("private_key", &"<securely stored>")
            .finish()
    }
}

/// Where the cached key pair came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Already cached by an earlier call
    Cached,
    /// Read from the canonical key record
    Loaded,
    /// Generated here and persisted as the canonical record
    Generated,
    /// Generated here but another writer persisted first; theirs was adopted
    Adopted,
}

#[derive(Debug)]
pub struct BootstrapReport {
    pub key_pair: Arc<CaKeyPair>,
    pub origin: KeyOrigin,
    /// Present only when this call generated the canonical CA
    pub propagation: Option<PropagationReport>,
}

pub struct CertificateAuthority {
    key_store: Arc<dyn KeyStore>,
    principals: Arc<dyn PrincipalStore>,
    generator: Arc<dyn KeyGenerator>,
    policy: IssuancePolicy,
    trusted_role: Role,
    key_pair: OnceCell<Arc<CaKeyPair>>,
}

impl CertificateAuthority {
    pub fn new(
        key_store: Arc<dyn KeyStore>,
        principals: Arc<dyn PrincipalStore>,
        generator: Arc<dyn KeyGenerator>,
    ) -> Self {
        Self {
            key_store,
            principals,
            generator,
            policy: IssuancePolicy::default(),
            trusted_role: Role::MERGER,
            key_pair: OnceCell::new(),
        }
    }

    pub fn with_policy(mut self, policy: IssuancePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_trusted_role(mut self, role: Role) -> Self {
        self.trusted_role = role;
        self
    }

    pub fn policy(&self) -> IssuancePolicy {
        self.policy
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.key_pair.initialized()
    }

    /// Cached CA key pair, bootstrapping on first use
    pub async fn get_or_create_key_pair(&self) -> CaResult<Arc<CaKeyPair>> {
        if let Some(key_pair) = self.key_pair.get() {
            return Ok(Arc::clone(key_pair));
        }
        Ok(self.bootstrap().await?.key_pair)
    }

    /// Like [`get_or_create_key_pair`](Self::get_or_create_key_pair) but also
    /// reports how the key pair was obtained and, after a fresh generation,
    /// the outcome of trust propagation.
    pub async fn bootstrap(&self) -> CaResult<BootstrapReport> {
        // Filled only by the caller whose closure actually runs the initialization
        let mut fresh: Option<(KeyOrigin, Option<PropagationReport>)> = None;
        let fresh_slot = &mut fresh;
        let key_pair = self
            .key_pair
            .get_or_try_init(move || async move {
                let (key_pair, origin, propagation) = self.load_or_generate().await?;
                *fresh_slot = Some((origin, propagation));
                Ok::<_, CaError>(Arc::new(key_pair))
            })
            .await?;

        let (origin, propagation) = fresh.unwrap_or((KeyOrigin::Cached, None));
        Ok(BootstrapReport {
            key_pair: Arc::clone(key_pair),
            origin,
            propagation,
        })
    }

    #[instrument(skip(self))]
    async fn load_or_generate(
        &self,
    ) -> CaResult<(CaKeyPair, KeyOrigin, Option<PropagationReport>)> {
        if let Some(record) = self.key_store.canonical_record().await? {
            let key_pair = CaKeyPair::from_pem(&record.certificate_pem, record.private_key_pem())?;
            info!(record_id = record.id, issuer = %key_pair.issuer_dn(), "Loaded CA key pair");
            return Ok((key_pair, KeyOrigin::Loaded, None));
        }

        info!("No CA key record found, generating a new CA");
        let material = self.generator.generate().await?;
        // Corrupt generator output must never become canonical
        let generated =
            CaKeyPair::from_pem(&material.certificate_pem, material.private_key_pem())?;

        let record = CaKeyRecord::new(material.certificate_pem, material.private_key_pem);
        match self.key_store.insert_canonical(record).await? {
            InsertOutcome::Inserted(record) => {
                info!(record_id = record.id, issuer = %generated.issuer_dn(), "Persisted new CA key record");
                let public_key_pem = generated.public_key_pem()?;
                let report = trust_propagation::propagate(
                    self.principals.as_ref(),
                    self.trusted_role,
                    &public_key_pem,
                    &record.certificate_pem,
                )
                .await;
                if !report.is_complete() {
                    warn!(
                        failed = report.failed.len(),
                        total = report.total(),
                        "CA generated but some principals did not receive it"
                    );
                }
                Ok((generated, KeyOrigin::Generated, Some(report)))
            }
            InsertOutcome::AlreadyPresent(record) => {
                warn!(
                    record_id = record.id,
                    "CA key record created concurrently elsewhere, discarding generated material"
                );
                let adopted =
                    CaKeyPair::from_pem(&record.certificate_pem, record.private_key_pem())?;
                Ok((adopted, KeyOrigin::Adopted, None))
            }
        }
    }

    /// Issuer DN string of the canonical CA certificate, read from the key store
    pub async fn issuer_attributes(&self) -> CaResult<String> {
        resolve_issuer_attributes(self.key_store.as_ref()).await
    }

    /// Sign a leaf certificate for `csr` with the CA key
    #[instrument(skip_all)]
    pub async fn issue_certificate(
        &self,
        csr: &CertificateRequest,
    ) -> CaResult<IssuedCertificate> {
        let key_pair = self.get_or_create_key_pair().await?;
        let issued = LeafCertificateBuilder::new(
            &key_pair.private_key,
            key_pair.certificate.issuer_name(),
        )
        .policy(self.policy)
        .build(csr)?;
        debug!(
            serial = issued.serial_number,
            subject = %csr.subject_string().unwrap_or_default(),
            "Issued certificate"
        );
        Ok(issued)
    }
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("policy", &self.policy)
            .field("trusted_role", &self.trusted_role)
            .field("bootstrapped", &self.is_bootstrapped())
            .finish()
    }
}
