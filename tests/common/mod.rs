//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::x509::X509Req;
use secrecy::SecretString;

use vaulters_ca::csr::CertificateRequest;
use vaulters_ca::error::{CaError, CaResult};
use vaulters_ca::generate_root_ca::RsaRootCABuilder;
use vaulters_ca::issuer_attributes::parse_distinguished_name;
use vaulters_ca::key_generator::{GeneratedKeyMaterial, KeyGenerator};
use vaulters_ca::memory::MemoryStore;
use vaulters_ca::principals::{NewPrincipal, Principal, PrincipalStore, Role};

pub const ISSUER_DN: &str = "/CN=theVaulters/C=KR/L=Incheon/O=theVaulters";

/// Build a fresh CA certificate and key as PEM
pub fn ca_material(common_name: &str) -> GeneratedKeyMaterial {
    let (key, cert) = RsaRootCABuilder::new()
        .subject_common_name(common_name.to_string())
        .country("KR".to_string())
        .locality("Incheon".to_string())
        .organization("theVaulters".to_string())
        .validity_days(3650)
        .key_bits(2048)
        .build()
        .expect("build test CA");
    GeneratedKeyMaterial {
        certificate_pem: String::from_utf8(cert.to_pem().unwrap()).unwrap(),
        private_key_pem: SecretString::from(
            String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap(),
        ),
    }
}

/// The default theVaulters CA, generated once per test binary
pub fn vaulters_ca() -> GeneratedKeyMaterial {
    static MATERIAL: OnceLock<GeneratedKeyMaterial> = OnceLock::new();
    MATERIAL.get_or_init(|| ca_material("theVaulters")).clone()
}

/// Deterministic generator double that counts how often it runs
pub struct CountingGenerator {
    material: GeneratedKeyMaterial,
    delay: Duration,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
}

impl CountingGenerator {
    pub fn new(material: GeneratedKeyMaterial) -> Self {
        Self {
            material,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
        }
    }

    /// Sleep before answering to widen race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Report `ToolUnavailable` for the first `n` calls
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyGenerator for CountingGenerator {
    async fn generate(&self) -> CaResult<GeneratedKeyMaterial> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(CaError::ToolUnavailable("can not find botan cli".to_string()));
        }
        Ok(self.material.clone())
    }
}

/// Generator whose output is not PEM at all
pub struct GarbageGenerator;

#[async_trait]
impl KeyGenerator for GarbageGenerator {
    async fn generate(&self) -> CaResult<GeneratedKeyMaterial> {
        Ok(GeneratedKeyMaterial {
            certificate_pem: "-----BEGIN CERTIFICATE-----\nnope\n-----END CERTIFICATE-----\n"
                .to_string(),
            private_key_pem: SecretString::from("garbage".to_string()),
        })
    }
}

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

pub fn public_half(key: &PKey<Private>) -> PKey<Public> {
    PKey::public_key_from_pem(&key.public_key_to_pem().unwrap()).unwrap()
}

/// CSR for `subject` backed by a fresh 2048-bit RSA key
pub fn csr(subject: &str) -> (CertificateRequest, PKey<Public>) {
    let key = rsa_key();
    let public = public_half(&key);
    let request = CertificateRequest::from_subject_str(subject, public_half(&key)).unwrap();
    (request, public)
}

/// Signed PEM CSR, as a client would submit it
pub fn csr_pem(subject: &str) -> Vec<u8> {
    let key = rsa_key();
    let mut builder = X509Req::builder().unwrap();
    builder
        .set_subject_name(&parse_distinguished_name(subject).unwrap())
        .unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    builder.build().to_pem().unwrap()
}

/// Principal store that refuses trust-material writes for selected ids
pub struct RejectingPrincipals {
    pub inner: MemoryStore,
    pub rejected: Vec<i64>,
}

#[async_trait]
impl PrincipalStore for RejectingPrincipals {
    async fn insert_principal(&self, principal: NewPrincipal) -> CaResult<Principal> {
        self.inner.insert_principal(principal).await
    }

    async fn get_principal(&self, id: i64) -> CaResult<Option<Principal>> {
        self.inner.get_principal(id).await
    }

    async fn find_by_role(&self, role: Role) -> CaResult<Vec<Principal>> {
        self.inner.find_by_role(role).await
    }

    async fn update_trust_material(
        &self,
        id: i64,
        public_key_pem: &str,
        certificate_pem: &str,
    ) -> CaResult<()> {
        if self.rejected.contains(&id) {
            return Err(CaError::Storage(format!("write rejected for principal {}", id)));
        }
        self.inner
            .update_trust_material(id, public_key_pem, certificate_pem)
            .await
    }
}
