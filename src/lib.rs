//! theVaulters CA - Certificate Authority Bootstrap and Issuance Library
//!
//! Maintains the single CA that signs certificates for every principal on the
//! platform. The trust root is fixed on first run: the CA keypair is generated
//! once, persisted as the canonical key record, and handed to every principal
//! of the trusted role. Afterwards the CA only loads and signs.
//!
//! # Overview
//!
//! ```text
//! KeyStore ──► CertificateAuthority::bootstrap ──► cached CaKeyPair
//!                 │ (empty store)                       │
//!                 ├─► KeyGenerator::generate            ├─► issue_certificate(csr)
//!                 ├─► KeyStore::insert_canonical (CAS)  └─► issuer_attributes()
//!                 └─► trust_propagation::propagate
//! ```
//!
//! # Module Overview
//!
//! - [`authority`]: the [`CertificateAuthority`](authority::CertificateAuthority)
//!   handle owning the one-time bootstrap and the cached key pair
//! - [`key_generator`]: pluggable CA generation; the external-script generator
//! - [`generate_root_ca`]: in-process RSA root CA builder and generator
//! - [`generate_leaf_cert`]: leaf certificate builder and serial numbers
//! - [`issuer_attributes`]: `/shortName=value` distinguished-name strings
//! - [`trust_propagation`]: pushes CA trust material to principals
//! - [`key_store`], [`principals`]: persistence traits
//! - [`sqlite_store`], [`memory`]: persistence backends
//! - [`configs`]: `config.toml` loading and issuance policy
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vaulters_ca::authority::CertificateAuthority;
//! use vaulters_ca::configs::IssuancePolicy;
//! use vaulters_ca::csr::CertificateRequest;
//! use vaulters_ca::generate_root_ca::{InProcessKeyGenerator, RsaRootCABuilder};
//! use vaulters_ca::sqlite_store::SqliteStore;
//!
//! # async fn example(csr_pem: &[u8]) -> anyhow::Result<()> {
//! let store = Arc::new(SqliteStore::open("data/ca.db")?);
//! let generator = InProcessKeyGenerator::new(
//!     RsaRootCABuilder::new()
//!         .subject_common_name("theVaulters".to_string())
//!         .country("KR".to_string())
//!         .locality("Incheon".to_string())
//!         .organization("theVaulters".to_string())
//!         .validity_days(7300),
//! );
//! let ca = CertificateAuthority::new(store.clone(), store, Arc::new(generator))
//!     .with_policy(IssuancePolicy { validity_days: 365, ..Default::default() });
//!
//! let issued = ca.issue_certificate(&CertificateRequest::from_pem(csr_pem)?).await?;
//! println!("serial {}:\n{}", issued.serial_number, issued.to_pem()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Library calls return [`CaResult`](error::CaResult). Bootstrap and issuance
//! errors are never retried internally; a failed bootstrap leaves the cache
//! empty so no certificate is ever signed with unknown key material. Trust
//! propagation failures are collected per principal in a
//! [`PropagationReport`](trust_propagation::PropagationReport) instead of
//! failing the bootstrap.

pub mod authority;
pub mod configs;
pub mod csr;
pub mod error;
pub mod generate_leaf_cert;
pub mod generate_root_ca;
pub mod issuer_attributes;
pub mod key_generator;
pub mod key_store;
pub mod memory;
pub mod principals;
pub mod sqlite_store;
pub mod trust_propagation;
