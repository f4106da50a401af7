//! Leaf Certificate Generation Module
//!
//! Builds end-entity certificates for principals from their signing requests.
//! Unlike the root CA builder no key is generated here: the subject public key
//! comes from the CSR and the certificate is signed with the CA's private key.
//!
//! # Certificate Properties
//! - **Version**: X.509v3
//! - **Serial Number**: uniform random integer in `[0, MAX_SAFE_INTEGER]`
//! - **Signature**: RSA with the policy digest (SHA-256 by default)
//! - **Basic Constraints**: CA=false, critical
//! - **Key Usage**: digitalSignature, nonRepudiation, keyEncipherment, dataEncipherment
//! - **Validity**: `notAfter = notBefore + policy.validity_days`

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::pkey::{PKeyRef, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509NameRef, X509};
use rand::Rng;

use crate::configs::IssuancePolicy;
use crate::csr::CertificateRequest;
use crate::error::{CaError, CaResult};
use crate::issuer_attributes::format_distinguished_name;

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2

/// Largest integer a double can hold exactly; downstream consumers store serials as such
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Draw a serial number. Collisions are not checked.
pub fn random_serial() -> u64 {
    rand::rng().random_range(0..=MAX_SAFE_INTEGER)
}

/// A signed leaf certificate and the serial it was assigned
#[derive(Clone)]
pub struct IssuedCertificate {
    pub certificate: X509,
    pub serial_number: u64,
}

impl IssuedCertificate {
    pub fn to_pem(&self) -> CaResult<String> {
        let pem = self
            .certificate
            .to_pem()
            .map_err(|e| CaError::signing("Failed to encode certificate", e))?;
        String::from_utf8(pem).map_err(|e| CaError::signing("Certificate PEM is not UTF-8", e))
    }

    pub fn issuer_string(&self) -> CaResult<String> {
        format_distinguished_name(self.certificate.issuer_name())
    }

    pub fn subject_string(&self) -> CaResult<String> {
        format_distinguished_name(self.certificate.subject_name())
    }
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("serial_number", &self.serial_number)
            .field("subject", &self.subject_string().unwrap_or_default())
            .field("issuer", &self.issuer_string().unwrap_or_default())
            .finish()
    }
}

/// Builder for a leaf certificate signed by the CA
///
/// # Examples
/// ```rust,no_run
/// # use vaulters_ca::generate_leaf_cert::LeafCertificateBuilder;
/// # use vaulters_ca::configs::IssuancePolicy;
/// # use vaulters_ca::csr::CertificateRequest;
/// # use vaulters_ca::issuer_attributes::parse_distinguished_name;
/// # use openssl::pkey::{PKey, Private};
/// # fn example(ca_key: PKey<Private>, csr: CertificateRequest) -> vaulters_ca::error::CaResult<()> {
/// let issuer = parse_distinguished_name("/CN=theVaulters")?;
/// let issued = LeafCertificateBuilder::new(&ca_key, &issuer)
///     .policy(IssuancePolicy { validity_days: 365, ..Default::default() })
///     .build(&csr)?;
/// println!("issued serial {}", issued.serial_number);
/// # Ok(())
/// # }
/// ```
pub struct LeafCertificateBuilder<'a> {
    signing_key: &'a PKeyRef<Private>,
    issuer: &'a X509NameRef,
    policy: IssuancePolicy,
    serial_number: Option<u64>,
    not_before: Option<i64>,
}

impl<'a> LeafCertificateBuilder<'a> {
    pub fn new(signing_key: &'a PKeyRef<Private>, issuer: &'a X509NameRef) -> Self {
        Self {
            signing_key,
            issuer,
            policy: IssuancePolicy::default(),
            serial_number: None,
            not_before: None,
        }
    }

    pub fn policy(mut self, policy: IssuancePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use a fixed serial instead of drawing a random one
    pub fn serial_number(mut self, serial: u64) -> Self {
        self.serial_number = Some(serial);
        self
    }

    /// Start of validity as Unix seconds; defaults to now
    pub fn not_before(mut self, unix_secs: i64) -> Self {
        self.not_before = Some(unix_secs);
        self
    }

    pub fn build(self, csr: &CertificateRequest) -> CaResult<IssuedCertificate> {
        let serial_number = self.serial_number.unwrap_or_else(random_serial);
        if serial_number > MAX_SAFE_INTEGER {
            return Err(CaError::SigningFailed(format!(
                "Serial number {} exceeds {}",
                serial_number, MAX_SAFE_INTEGER
            )));
        }

        let mut builder =
            X509::builder().map_err(|e| CaError::signing("Failed to create X509 builder", e))?;

        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| CaError::signing("Failed to set version", e))?;

        let serial = BigNum::from_slice(&serial_number.to_be_bytes())
            .and_then(|bn| bn.to_asn1_integer())
            .map_err(|e| CaError::signing("Failed to encode serial number", e))?;
        builder
            .set_serial_number(&serial)
            .map_err(|e| CaError::signing("Failed to set serial number", e))?;

        builder
            .set_issuer_name(self.issuer)
            .map_err(|e| CaError::signing("Failed to set issuer", e))?;
        builder
            .set_subject_name(&csr.subject)
            .map_err(|e| CaError::signing("Failed to set subject", e))?;

        let not_before_secs = self
            .not_before
            .unwrap_or_else(|| chrono::Utc::now().timestamp());
        let not_after_secs = not_before_secs
            .checked_add(self.policy.validity_secs())
            .ok_or_else(|| CaError::SigningFailed("Validity window overflows".to_string()))?;
        let not_before = unix_time(not_before_secs)?;
        let not_after = unix_time(not_after_secs)?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| CaError::signing("Failed to set not_before", e))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| CaError::signing("Failed to set not_after", e))?;

        builder
            .set_pubkey(&csr.public_key)
            .map_err(|e| CaError::signing("Failed to set public key", e))?;

        let mut bc = BasicConstraints::new();
        bc.critical();
        let bc_extension = bc
            .build()
            .map_err(|e| CaError::signing("Failed to build BasicConstraints", e))?;
        builder
            .append_extension(bc_extension)
            .map_err(|e| CaError::signing("Failed to add BasicConstraints", e))?;

        let mut ku = KeyUsage::new();
        ku.critical();
        ku.digital_signature();
        ku.non_repudiation();
        ku.key_encipherment();
        ku.data_encipherment();
        let ku_extension = ku
            .build()
            .map_err(|e| CaError::signing("Failed to build KeyUsage", e))?;
        builder
            .append_extension(ku_extension)
            .map_err(|e| CaError::signing("Failed to add KeyUsage", e))?;

        builder
            .sign(self.signing_key, self.policy.digest.message_digest())
            .map_err(|e| CaError::signing("Failed to sign certificate", e))?;

        Ok(IssuedCertificate {
            certificate: builder.build(),
            serial_number,
        })
    }
}

fn unix_time(secs: i64) -> CaResult<Asn1Time> {
    let time = secs
        .try_into()
        .map_err(|_| CaError::SigningFailed(format!("Timestamp {} out of range", secs)))?;
    Asn1Time::from_unix(time).map_err(|e| CaError::signing("Failed to encode timestamp", e))
}
