//! Configuration management infrastructure.
//!
//! Signing defaults and chain-building policy, persisted as TOML in the
//! platform configuration directory and exportable as TOML, JSON or YAML.

use crate::adapters::revocation::RevocationMode;
use crate::domain::findings::Severity;
use crate::domain::policy::SignaturePlacement;
use crate::infra::error::{SigningError, SigningResult};
use crate::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration with all signing preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfiguration {
    /// Default signature hash algorithm
    pub signature_hash_algorithm: String,

    /// Default timestamp hash algorithm
    pub timestamp_hash_algorithm: String,

    /// Placement used when none is given
    pub default_placement: SignaturePlacement,

    /// Trust anchors (file or directory)
    pub trusted_roots: Option<PathBuf>,

    /// Whether to trust the platform root store
    pub use_system_roots: bool,

    /// Extra intermediates offered to chain building
    pub extra_certificates: Vec<PathBuf>,

    /// Directory of cached CRLs for offline revocation checks
    pub crl_cache: Option<PathBuf>,

    /// Chain-building policy
    pub chain_policy: ChainPolicy,
}

/// Rules applied while building a signing certificate chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainPolicy {
    /// Signature digests no certificate in the chain may use
    pub disallowed_signature_digests: Vec<String>,

    /// Also apply the digest rule to the self-signature of trust anchors
    pub check_anchor_digest: bool,

    /// Severity for expired or not-yet-valid intermediates and roots
    pub expired_intermediate_severity: Severity,

    pub revocation_mode: RevocationMode,

    /// Fail when revocation status cannot be determined
    pub strict_revocation: bool,

    /// Accept a self-signed root that is not a trust anchor
    pub allow_untrusted_root: bool,

    /// Maximum number of certificates in a chain
    pub max_chain_depth: usize,

    pub revocation_timeout_seconds: u64,

    /// Warn when the signing certificate expires within this many days
    pub expiry_warning_days: u32,
}

impl Default for SigningConfiguration {
    fn default() -> Self {
        Self {
            signature_hash_algorithm: "sha256".to_string(),
            timestamp_hash_algorithm: "sha256".to_string(),
            default_placement: SignaturePlacement::PrimarySignature,
            trusted_roots: None,
            use_system_roots: true,
            extra_certificates: Vec::new(),
            crl_cache: None,
            chain_policy: ChainPolicy::default(),
        }
    }
}

impl Default for ChainPolicy {
    fn default() -> Self {
        Self {
            disallowed_signature_digests: ["md2", "md4", "md5", "sha1"]
                .into_iter()
                .map(String::from)
                .collect(),
            check_anchor_digest: false,
            expired_intermediate_severity: Severity::Warning,
            revocation_mode: RevocationMode::Online,
            strict_revocation: false,
            allow_untrusted_root: false,
            max_chain_depth: 16,
            revocation_timeout_seconds: 15,
            expiry_warning_days: 30,
        }
    }
}

impl ChainPolicy {
    #[must_use]
    pub fn revocation_timeout(&self) -> Duration {
        Duration::from_secs(self.revocation_timeout_seconds)
    }

    /// Check value ranges.
    pub fn validate(&self) -> SigningResult<()> {
        if self.max_chain_depth == 0 {
            return Err(SigningError::ConfigurationError(
                "max_chain_depth must be greater than 0".to_string(),
            ));
        }
        if self.revocation_timeout_seconds == 0 {
            return Err(SigningError::ConfigurationError(
                "revocation_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self
            .disallowed_signature_digests
            .iter()
            .any(|d| d.trim().is_empty())
        {
            return Err(SigningError::ConfigurationError(
                "disallowed_signature_digests must not contain empty names".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration manager for handling config files
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new configuration manager with default path
    pub fn new() -> SigningResult<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Create a configuration manager with custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> SigningResult<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            Ok(config_dir.join("package-signer").join("config.toml"))
        } else {
            Ok(PathBuf::from("package-signer.toml"))
        }
    }

    /// Load configuration from file, creating default if it doesn't exist
    pub fn load_or_create_default(&self) -> SigningResult<SigningConfiguration> {
        if self.config_path.exists() {
            self.load()
        } else {
            log::info!(
                "Configuration file not found, creating default: {}",
                self.config_path.display()
            );
            let default_config = SigningConfiguration::default();
            self.save(&default_config)?;
            Ok(default_config)
        }
    }

    /// Load configuration from file, or the defaults when there is none
    pub fn load_or_default(&self) -> SigningResult<SigningConfiguration> {
        if self.config_path.exists() {
            self.load()
        } else {
            Ok(SigningConfiguration::default())
        }
    }

    /// Load configuration from file
    pub fn load(&self) -> SigningResult<SigningConfiguration> {
        log::debug!("Loading configuration from: {}", self.config_path.display());

        let content = fs::read_to_string(&self.config_path).map_err(|e| {
            SigningError::ConfigurationError(format!(
                "Failed to read config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        let config: SigningConfiguration = toml::from_str(&content).map_err(|e| {
            SigningError::ConfigurationError(format!("Failed to parse config file: {e}"))
        })?;

        validate_config(&config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &SigningConfiguration) -> SigningResult<()> {
        log::info!("Saving configuration to: {}", self.config_path.display());

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SigningError::ConfigurationError(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| {
            SigningError::ConfigurationError(format!("Failed to serialize config: {e}"))
        })?;

        fs::write(&self.config_path, content).map_err(|e| {
            SigningError::ConfigurationError(format!(
                "Failed to write config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Update a specific configuration value
    pub fn update_value(&self, key: &str, value: &str) -> SigningResult<()> {
        let mut config = self.load_or_default()?;
        let policy = &mut config.chain_policy;

        match key {
            "signature_hash_algorithm" => {
                parse_hash_name(value)?;
                config.signature_hash_algorithm = value.to_string();
            }
            "timestamp_hash_algorithm" => {
                parse_hash_name(value)?;
                config.timestamp_hash_algorithm = value.to_string();
            }
            "default_placement" => {
                config.default_placement = value.parse().map_err(|_| {
                    SigningError::ConfigurationError(format!("Invalid placement: {value}"))
                })?;
            }
            "trusted_roots" => config.trusted_roots = optional_path(value),
            "crl_cache" => config.crl_cache = optional_path(value),
            "use_system_roots" => config.use_system_roots = parse_bool(value)?,
            "chain_policy.disallowed_signature_digests" => {
                policy.disallowed_signature_digests = value
                    .split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_ascii_lowercase)
                    .collect();
            }
            "chain_policy.check_anchor_digest" => {
                policy.check_anchor_digest = parse_bool(value)?;
            }
            "chain_policy.expired_intermediate_severity" => {
                policy.expired_intermediate_severity = value.parse()?;
            }
            "chain_policy.revocation_mode" => policy.revocation_mode = value.parse()?,
            "chain_policy.strict_revocation" => policy.strict_revocation = parse_bool(value)?,
            "chain_policy.allow_untrusted_root" => {
                policy.allow_untrusted_root = parse_bool(value)?;
            }
            "chain_policy.max_chain_depth" => policy.max_chain_depth = parse_number(value)?,
            "chain_policy.revocation_timeout_seconds" => {
                policy.revocation_timeout_seconds = parse_number(value)?;
            }
            "chain_policy.expiry_warning_days" => {
                policy.expiry_warning_days = parse_number(value)?;
            }
            _ => {
                return Err(SigningError::ConfigurationError(format!(
                    "Unknown configuration key: {key}"
                )));
            }
        }

        validate_config(&config)?;
        self.save(&config)
    }

    /// Get the configuration file path
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Export configuration as a portable format
    pub fn export_config(&self, format: ExportFormat) -> SigningResult<String> {
        let config = self.load_or_default()?;

        match format {
            ExportFormat::Toml => toml::to_string_pretty(&config)
                .map_err(|e| SigningError::ConfigurationError(format!("TOML export failed: {e}"))),
            ExportFormat::Json => serde_json::to_string_pretty(&config)
                .map_err(|e| SigningError::ConfigurationError(format!("JSON export failed: {e}"))),
            ExportFormat::Yaml => serde_yaml::to_string(&config)
                .map_err(|e| SigningError::ConfigurationError(format!("YAML export failed: {e}"))),
        }
    }

    /// Import configuration from a string
    pub fn import_config(&self, content: &str, format: ExportFormat) -> SigningResult<()> {
        let config: SigningConfiguration = match format {
            ExportFormat::Toml => toml::from_str(content).map_err(|e| {
                SigningError::ConfigurationError(format!("TOML import failed: {e}"))
            })?,
            ExportFormat::Json => serde_json::from_str(content).map_err(|e| {
                SigningError::ConfigurationError(format!("JSON import failed: {e}"))
            })?,
            ExportFormat::Yaml => serde_yaml::from_str(content).map_err(|e| {
                SigningError::ConfigurationError(format!("YAML import failed: {e}"))
            })?,
        };

        validate_config(&config)?;
        self.save(&config)
    }
}

/// Configuration export/import formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Toml,
    Json,
    Yaml,
}

impl std::str::FromStr for ExportFormat {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "toml" => Ok(ExportFormat::Toml),
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            other => Err(SigningError::ConfigurationError(format!(
                "Unknown export format: {other}"
            ))),
        }
    }
}

/// Validate configuration values
pub fn validate_config(config: &SigningConfiguration) -> SigningResult<()> {
    parse_hash_name(&config.signature_hash_algorithm)?;
    parse_hash_name(&config.timestamp_hash_algorithm)?;
    config.chain_policy.validate()
}

fn parse_hash_name(value: &str) -> SigningResult<HashAlgorithm> {
    match value.parse::<HashAlgorithm>() {
        Ok(algorithm) if algorithm != HashAlgorithm::Unknown => Ok(algorithm),
        _ => Err(SigningError::ConfigurationError(format!(
            "Invalid hash algorithm: {value}"
        ))),
    }
}

fn parse_bool(value: &str) -> SigningResult<bool> {
    value
        .parse()
        .map_err(|_| SigningError::ConfigurationError(format!("Invalid boolean value: {value}")))
}

fn parse_number<T: std::str::FromStr>(value: &str) -> SigningResult<T> {
    value
        .parse()
        .map_err(|_| SigningError::ConfigurationError(format!("Invalid number: {value}")))
}

fn optional_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}
