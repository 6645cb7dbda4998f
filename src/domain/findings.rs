//! Chain-building findings and the write-only sink they are reported to.
//!
//! Non-fatal observations made while building a chain (an expired
//! intermediate, an unreachable revocation responder) are recorded as
//! findings; fatal ones become errors.

use crate::domain::crypto::CertificateIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use crate::infra::error::SigningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(SigningError::ConfigurationError(format!(
                "Invalid severity: {other}"
            ))),
        }
    }
}

/// A single observation made while building a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainFinding {
    pub severity: Severity,
    pub message: String,
    pub certificate: Option<CertificateIdentity>,
}

impl ChainFinding {
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            certificate: None,
        }
    }

    #[must_use]
    pub fn for_certificate(mut self, certificate: CertificateIdentity) -> Self {
        self.certificate = Some(certificate);
        self
    }
}

impl fmt::Display for ChainFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.certificate {
            Some(cert) => write!(f, "[{}] {}: {}", self.severity, cert, self.message),
            None => write!(f, "[{}] {}", self.severity, self.message),
        }
    }
}

/// Write-only destination for chain findings.
pub trait FindingSink: Send + Sync {
    fn record(&self, finding: ChainFinding);
}

/// Forwards findings to the `log` facade at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFindingSink;

impl FindingSink for LogFindingSink {
    fn record(&self, finding: ChainFinding) {
        match finding.severity {
            Severity::Info => log::info!("{finding}"),
            Severity::Warning => log::warn!("{finding}"),
            Severity::Error => log::error!("{finding}"),
        }
    }
}

/// Keeps every finding in memory, for reporting after the build.
#[derive(Debug, Default)]
pub struct CollectingFindingSink {
    findings: Mutex<Vec<ChainFinding>>,
}

impl CollectingFindingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn findings(&self) -> Vec<ChainFinding> {
        self.findings
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.findings()
            .iter()
            .filter(|f| f.severity >= severity)
            .count()
    }
}

impl FindingSink for CollectingFindingSink {
    fn record(&self, finding: ChainFinding) {
        log::debug!("chain finding: {finding}");
        if let Ok(mut findings) = self.findings.lock() {
            findings.push(finding);
        }
    }
}
