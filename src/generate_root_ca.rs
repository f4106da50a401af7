//! Root CA Certificate Generation Module
//!
//! Generates the self-signed CA certificate and RSA key in-process with
//! openssl. This is the alternative to the external generation script: wrap a
//! [`RsaRootCABuilder`] configuration in an [`InProcessKeyGenerator`] and hand
//! it to the [`CertificateAuthority`](crate::authority::CertificateAuthority).
//!
//! # Certificate Properties
//! - **Self-signed**: Issuer and subject are the same
//! - **Key Usage**: keyCertSign, cRLSign, digitalSignature
//! - **Basic Constraints**: CA=true, pathlen=0 (signs leaf certificates only)
//! - **Default Key Size**: RSA 4096-bit
//! - **Subject order**: CN, C, L, O (empty fields are skipped)
//!
//! # Example
//! ```rust,no_run
//! # use anyhow::Result;
//! # fn example() -> Result<()> {
//! use vaulters_ca::generate_root_ca::RsaRootCABuilder;
//!
//! let (root_key, root_cert) = RsaRootCABuilder::new()
//!     .subject_common_name("theVaulters".to_string())
//!     .country("KR".to_string())
//!     .locality("Incheon".to_string())
//!     .organization("theVaulters".to_string())
//!     .validity_days(3650)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{X509Name, X509};
use secrecy::SecretString;
use tracing::info;

use crate::configs::RootCADefaults;
use crate::error::{CaError, CaResult};
use crate::key_generator::{GeneratedKeyMaterial, KeyGenerator};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const RSA_KEY_SIZE_DEFAULT: u32 = 4096;
const ROOT_CA_PATH_LENGTH: u32 = 0;

/// Builder for an RSA key pair and self-signed CA certificate
#[derive(Debug, Clone)]
pub struct RsaRootCABuilder {
    subject_common_name: String,
    country: String,
    locality: String,
    organization: String,
    validity_days: u32,
    key_bits: u32,
}

impl Default for RsaRootCABuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RsaRootCABuilder {
    pub fn new() -> Self {
        Self {
            subject_common_name: String::new(),
            country: String::new(),
            locality: String::new(),
            organization: String::new(),
            validity_days: 365,
            key_bits: RSA_KEY_SIZE_DEFAULT,
        }
    }

    pub fn from_defaults(defaults: &RootCADefaults) -> Self {
        Self::new()
            .subject_common_name(defaults.common_name.clone())
            .country(defaults.country.clone())
            .locality(defaults.locality.clone())
            .organization(defaults.organization.clone())
            .validity_days(defaults.validity_days)
            .key_bits(defaults.key_bits)
    }

    /// Set the common name (CN) for the certificate
    pub fn subject_common_name(mut self, cn: String) -> Self {
        self.subject_common_name = cn;
        self
    }

    /// Set the country (C) for the certificate (2-letter ISO code)
    pub fn country(mut self, country: String) -> Self {
        self.country = country;
        self
    }

    /// Set the locality (L) for the certificate
    pub fn locality(mut self, locality: String) -> Self {
        self.locality = locality;
        self
    }

    /// Set the organization (O) for the certificate
    pub fn organization(mut self, org: String) -> Self {
        self.organization = org;
        self
    }

    /// Set validity period in days
    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// RSA modulus size; tests use 2048 to keep generation fast
    pub fn key_bits(mut self, bits: u32) -> Self {
        self.key_bits = bits;
        self
    }

    /// Build the RSA key pair and self-signed CA certificate
    ///
    /// # Errors
    /// Returns error if:
    /// - The common name is empty
    /// - RSA key generation fails
    /// - X.509 extension creation or signing fails
    pub fn build(self) -> Result<(PKey<Private>, X509)> {
        if self.subject_common_name.is_empty() {
            return Err(anyhow!("Root CA common name must not be empty"));
        }

        let rsa = openssl::rsa::Rsa::generate(self.key_bits)
            .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;

        let private_key =
            PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))?;

        let mut builder =
            X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;

        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| anyhow!("Failed to set version: {}", e))?;

        // Random 128-bit serial; the CA's own serial is not constrained like leaf serials
        let mut serial = BigNum::new()?;
        serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
        let asn1_serial = serial.to_asn1_integer()?;
        builder.set_serial_number(&asn1_serial)?;

        let mut name_builder =
            X509Name::builder().map_err(|e| anyhow!("Failed to create name builder: {}", e))?;
        let entries = [
            (Nid::COMMONNAME, &self.subject_common_name),
            (Nid::COUNTRYNAME, &self.country),
            (Nid::LOCALITYNAME, &self.locality),
            (Nid::ORGANIZATIONNAME, &self.organization),
        ];
        for (nid, value) in entries {
            if value.is_empty() {
                continue;
            }
            name_builder
                .append_entry_by_nid(nid, value)
                .map_err(|e| anyhow!("Failed to set {}: {}", nid.short_name().unwrap_or("?"), e))?;
        }
        let name = name_builder.build();

        builder
            .set_subject_name(&name)
            .map_err(|e| anyhow!("Failed to set subject: {}", e))?;

        builder
            .set_issuer_name(&name)
            .map_err(|e| anyhow!("Failed to set issuer: {}", e))?;

        let not_before = openssl::asn1::Asn1Time::days_from_now(0)
            .map_err(|e| anyhow!("Failed to create not_before: {}", e))?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| anyhow!("Failed to set not_before: {}", e))?;

        let not_after = openssl::asn1::Asn1Time::days_from_now(self.validity_days)
            .map_err(|e| anyhow!("Failed to create not_after: {}", e))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| anyhow!("Failed to set not_after: {}", e))?;

        builder
            .set_pubkey(&private_key)
            .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

        let mut bc = BasicConstraints::new();
        bc.critical().ca().pathlen(ROOT_CA_PATH_LENGTH);
        let extension = bc
            .build()
            .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?;
        builder
            .append_extension(extension)
            .map_err(|e| anyhow!("Failed to add BasicConstraints: {}", e))?;

        let mut ku = KeyUsage::new();
        ku.critical();
        ku.key_cert_sign();
        ku.crl_sign();
        ku.digital_signature();
        let ku_extension = ku
            .build()
            .map_err(|e| anyhow!("Failed to build KeyUsage: {}", e))?;
        builder
            .append_extension(ku_extension)
            .map_err(|e| anyhow!("Failed to add KeyUsage: {}", e))?;

        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .map_err(|e| anyhow!("Failed to build SubjectKeyIdentifier: {}", e))?;
        builder
            .append_extension(ski)
            .map_err(|e| anyhow!("Failed to add SubjectKeyIdentifier: {}", e))?;

        builder
            .sign(&private_key, MessageDigest::sha256())
            .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;
        Ok((private_key, builder.build()))
    }
}

/// [`KeyGenerator`] that builds the CA with openssl instead of an external tool
#[derive(Debug, Clone)]
pub struct InProcessKeyGenerator {
    builder: RsaRootCABuilder,
}

impl InProcessKeyGenerator {
    pub fn new(builder: RsaRootCABuilder) -> Self {
        Self { builder }
    }

    pub fn from_defaults(defaults: &RootCADefaults) -> Self {
        Self::new(RsaRootCABuilder::from_defaults(defaults))
    }
}

#[async_trait]
impl KeyGenerator for InProcessKeyGenerator {
    async fn generate(&self) -> CaResult<GeneratedKeyMaterial> {
        let builder = self.builder.clone();
        // RSA key generation is CPU bound
        let material = tokio::task::spawn_blocking(move || -> Result<GeneratedKeyMaterial> {
            let (private_key, certificate) = builder.build()?;
            let certificate_pem = String::from_utf8(certificate.to_pem()?)?;
            let private_key_pem = String::from_utf8(private_key.private_key_to_pem_pkcs8()?)?;
            Ok(GeneratedKeyMaterial {
                certificate_pem,
                private_key_pem: SecretString::from(private_key_pem),
            })
        })
        .await
        .map_err(|e| CaError::ToolUnavailable(format!("CA generation task failed: {}", e)))?
        .map_err(|e| CaError::ToolUnavailable(format!("In-process CA generation failed: {:#}", e)))?;

        info!("CA key material generated in-process");
        Ok(material)
    }
}
