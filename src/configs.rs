use anyhow::{Context, Result};
use openssl::hash::MessageDigest;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::error::{CaError, CaResult};
use crate::principals::Role;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub root_ca_defaults: RootCADefaults,
    #[serde(default)]
    pub issuance: IssuancePolicy,
    #[serde(default)]
    pub trust: TrustConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/ca.db")
}

/// Which key generator bootstrap uses when no CA record exists
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    #[default]
    Script,
    InProcess,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub kind: GeneratorKind,
    #[serde(default = "default_script")]
    pub script: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Checked on `PATH` before the script runs; an empty string disables the check
    #[serde(default = "default_required_binary")]
    pub required_binary: Option<String>,
    #[serde(default = "default_certificate_path")]
    pub certificate_path: PathBuf,
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,
    /// Parent of the per-run scratch directory; the system temp dir when unset
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::default(),
            script: default_script(),
            args: Vec::new(),
            required_binary: default_required_binary(),
            certificate_path: default_certificate_path(),
            private_key_path: default_private_key_path(),
            work_dir: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_script() -> PathBuf {
    PathBuf::from("scripts/generate_keys.sh")
}

fn default_required_binary() -> Option<String> {
    Some("botan".to_string())
}

fn default_certificate_path() -> PathBuf {
    PathBuf::from("GA_certificate.pem")
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from("GA_sk.pem")
}

fn default_timeout_secs() -> u64 {
    60
}

/// Subject used when the CA is generated in-process
#[derive(Debug, Deserialize, Clone)]
pub struct RootCADefaults {
    #[serde(default = "default_root_ca_cn")]
    pub common_name: String,
    #[serde(default = "default_root_ca_country")]
    pub country: String,
    #[serde(default = "default_root_ca_locality")]
    pub locality: String,
    #[serde(default = "default_root_ca_org")]
    pub organization: String,
    #[serde(default = "default_root_ca_validity")]
    pub validity_days: u32,
    #[serde(default = "default_root_ca_key_bits")]
    pub key_bits: u32,
}

impl Default for RootCADefaults {
    fn default() -> Self {
        Self {
            common_name: default_root_ca_cn(),
            country: default_root_ca_country(),
            locality: default_root_ca_locality(),
            organization: default_root_ca_org(),
            validity_days: default_root_ca_validity(),
            key_bits: default_root_ca_key_bits(),
        }
    }
}

fn default_root_ca_cn() -> String {
    "theVaulters".to_string()
}

fn default_root_ca_country() -> String {
    "KR".to_string()
}

fn default_root_ca_locality() -> String {
    "Incheon".to_string()
}

fn default_root_ca_org() -> String {
    "theVaulters".to_string()
}

fn default_root_ca_validity() -> u32 {
    3650 * 2 // 20 years
}

fn default_root_ca_key_bits() -> u32 {
    4096
}

/// Digest used to sign issued certificates
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SigningDigest {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl SigningDigest {
    pub fn message_digest(self) -> MessageDigest {
        match self {
            SigningDigest::Sha256 => MessageDigest::sha256(),
            SigningDigest::Sha384 => MessageDigest::sha384(),
            SigningDigest::Sha512 => MessageDigest::sha512(),
        }
    }
}

/// Validity and signing policy for leaf certificates
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct IssuancePolicy {
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
    #[serde(default)]
    pub digest: SigningDigest,
}

impl Default for IssuancePolicy {
    fn default() -> Self {
        Self {
            validity_days: default_validity_days(),
            digest: SigningDigest::default(),
        }
    }
}

impl IssuancePolicy {
    pub fn validity_secs(&self) -> i64 {
        i64::from(self.validity_days) * 24 * 60 * 60
    }
}

fn default_validity_days() -> u32 {
    3650 // 10 years
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TrustConfig {
    /// Principals of this role receive the CA certificate after generation
    #[serde(default = "default_trusted_role")]
    pub trusted_role: Role,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            trusted_role: default_trusted_role(),
        }
    }
}

fn default_trusted_role() -> Role {
    Role::MERGER
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;
        config.validate().context("Invalid config file")?;

        Ok(config)
    }

    /// Load configuration with default path (config.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    pub fn validate(&self) -> CaResult<()> {
        if self.issuance.validity_days == 0 {
            return Err(CaError::Config(
                "issuance.validity_days must be greater than zero".to_string(),
            ));
        }
        if self.generator.timeout_secs == 0 {
            return Err(CaError::Config(
                "generator.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.root_ca_defaults.key_bits < 2048 {
            return Err(CaError::Config(
                "root_ca_defaults.key_bits must be at least 2048".to_string(),
            ));
        }
        Ok(())
    }
}
