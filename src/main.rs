//! theVaulters CA - command line front end
//!
//! Drives the library against the SQLite database named in `config.toml`.
//!
//! ```bash
//! # Create (or load) the CA and push it to trusted principals
//! vaulters-ca bootstrap
//!
//! # Print the issuer DN of the stored CA
//! vaulters-ca issuer
//!
//! # Sign a CSR
//! vaulters-ca issue --csr alice.csr --out alice.pem
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use vaulters_ca::authority::{CertificateAuthority, KeyOrigin};
use vaulters_ca::configs::{AppConfig, GeneratorKind};
use vaulters_ca::csr::CertificateRequest;
use vaulters_ca::generate_root_ca::InProcessKeyGenerator;
use vaulters_ca::key_generator::{KeyGenerator, ScriptKeyGenerator};
use vaulters_ca::sqlite_store::SqliteStore;

#[derive(Parser)]
#[command(name = "vaulters-ca")]
#[command(about = "Bootstrap the platform CA and issue leaf certificates")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the CA, generating and distributing it on first run
    Bootstrap,

    /// Print the issuer distinguished name of the stored CA
    Issuer,

    /// Sign a PEM encoded certificate signing request
    Issue {
        /// CSR file (PEM)
        #[arg(long)]
        csr: PathBuf,

        /// Where to write the certificate; stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = if Path::new(&cli.config).exists() {
        AppConfig::from_file(&cli.config)?
    } else {
        warn!(path = %cli.config, "Config file not found, using defaults");
        AppConfig::default()
    };

    let ca = build_authority(&config)?;

    match cli.command {
        Commands::Bootstrap => run_bootstrap(&ca).await,
        Commands::Issuer => {
            println!("{}", run_issuer(&ca).await?);
            Ok(())
        }
        Commands::Issue { csr, out } => run_issue(&ca, &csr, out.as_deref()).await,
    }
}

fn build_authority(config: &AppConfig) -> Result<CertificateAuthority> {
    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context(format!(
                "Failed to create database directory {}",
                parent.display()
            ))?;
        }
    }
    let store = Arc::new(
        SqliteStore::open(&config.database.path).context("Failed to open CA database")?,
    );

    let generator: Arc<dyn KeyGenerator> = match config.generator.kind {
        GeneratorKind::Script => Arc::new(ScriptKeyGenerator::from_config(&config.generator)),
        GeneratorKind::InProcess => Arc::new(InProcessKeyGenerator::from_defaults(
            &config.root_ca_defaults,
        )),
    };

    Ok(CertificateAuthority::new(store.clone(), store, generator)
        .with_policy(config.issuance)
        .with_trusted_role(config.trust.trusted_role))
}

async fn run_bootstrap(ca: &CertificateAuthority) -> Result<()> {
    let report = ca.bootstrap().await.context("Failed to bootstrap CA")?;
    match report.origin {
        KeyOrigin::Generated => println!("✓ New CA generated and stored"),
        KeyOrigin::Adopted => println!("✓ CA created by another instance adopted"),
        KeyOrigin::Loaded | KeyOrigin::Cached => println!("✓ Existing CA loaded"),
    }
    println!("  Issuer: {}", report.key_pair.issuer_dn());

    if let Some(propagation) = report.propagation {
        println!(
            "✓ Trust material sent to {} principal(s)",
            propagation.updated.len()
        );
        for (id, err) in &propagation.failed {
            println!("✗ Principal {}: {}", id, err);
        }
    }
    Ok(())
}

async fn run_issuer(ca: &CertificateAuthority) -> Result<String> {
    ca.issuer_attributes()
        .await
        .context("Failed to resolve issuer attributes")
}

async fn run_issue(ca: &CertificateAuthority, csr_path: &Path, out: Option<&Path>) -> Result<()> {
    let pem = std::fs::read(csr_path)
        .context(format!("Failed to read CSR from {}", csr_path.display()))?;
    let csr = CertificateRequest::from_pem(&pem).context("Failed to load CSR")?;

    let issued = ca
        .issue_certificate(&csr)
        .await
        .context("Failed to issue certificate")?;
    let cert_pem = issued.to_pem()?;

    match out {
        Some(path) => {
            std::fs::write(path, &cert_pem)
                .context(format!("Failed to write certificate to {}", path.display()))?;
            println!(
                "✓ Certificate with serial {} written to {}",
                issued.serial_number,
                path.display()
            );
            println!("  Valid for {} days", ca.policy().validity_days);
        }
        None => print!("{}", cert_pem),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Req, X509};
    use vaulters_ca::error::CaError;
    use vaulters_ca::issuer_attributes::{format_distinguished_name, parse_distinguished_name};

    const ISSUER_DN: &str = "/CN=theVaulters/C=KR/L=Incheon/O=theVaulters";

    fn test_config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.database.path = dir.join("data").join("ca.db");
        config.generator.kind = GeneratorKind::InProcess;
        config.root_ca_defaults.key_bits = 2048;
        config.issuance.validity_days = 30;
        config
    }

    fn write_csr(path: &Path, subject: &str) {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut builder = X509Req::builder().unwrap();
        builder
            .set_subject_name(&parse_distinguished_name(subject).unwrap())
            .unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        std::fs::write(path, builder.build().to_pem().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_issuer_and_issue_commands() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let ca = build_authority(&config).unwrap();
        assert!(config.database.path.exists());
        assert_eq!(ca.policy().validity_days, 30);

        run_bootstrap(&ca).await.unwrap();
        assert_eq!(run_issuer(&ca).await.unwrap(), ISSUER_DN);

        let csr_path = dir.path().join("alice.csr");
        let out = dir.path().join("alice.pem");
        write_csr(&csr_path, "/CN=alice");
        run_issue(&ca, &csr_path, Some(&out)).await.unwrap();

        let cert = X509::from_pem(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(format_distinguished_name(cert.subject_name()).unwrap(), "/CN=alice");
        assert_eq!(format_distinguished_name(cert.issuer_name()).unwrap(), ISSUER_DN);
        let window = cert.not_before().diff(cert.not_after()).unwrap();
        assert_eq!(window.days, 30);

        // A second invocation reuses the stored CA
        let reopened = build_authority(&config).unwrap();
        let key_pair = reopened.get_or_create_key_pair().await.unwrap();
        assert!(cert.verify(&key_pair.public_key).unwrap());
    }

    #[tokio::test]
    async fn test_issuer_command_before_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let ca = build_authority(&test_config(dir.path())).unwrap();
        let err = run_issuer(&ca).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CaError>(),
            Some(CaError::KeyRecordMissing)
        ));
    }

    #[tokio::test]
    async fn test_issue_command_with_missing_csr_file() {
        let dir = tempfile::tempdir().unwrap();
        let ca = build_authority(&test_config(dir.path())).unwrap();
        let missing = dir.path().join("missing.csr");
        assert!(run_issue(&ca, &missing, None).await.is_err());
        assert!(!ca.is_bootstrapped());
    }
}
