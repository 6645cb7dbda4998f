//! Error types for package signing operations.
//! Error handling types and result definitions for request, chain and signer hand-off.

use std::fmt;
use thiserror::Error;

/// Result type for signing operations
pub type SigningResult<T> = Result<T, SigningError>;

/// The chain validation rule a certificate failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRule {
    /// No candidate issuer with a matching subject was found.
    IssuerNotFound,
    /// A candidate issuer exists but its key does not verify the child's signature.
    IssuerSignature,
    /// The issuer is not marked as a certificate authority.
    NotCertificateAuthority,
    /// The certificate is signed with a digest the policy disallows.
    WeakSignatureDigest,
    /// The certificate's validity window ended before the verification time.
    Expired,
    /// The certificate's validity window starts after the verification time.
    NotYetValid,
    /// The chain ends in a self-signed root that is not a trust anchor.
    UntrustedRoot,
    /// The certificate is revoked.
    Revoked,
    /// The chain exceeds the configured maximum depth.
    PathTooLong,
    /// The chain has not been built yet.
    NotBuilt,
}

impl fmt::Display for ChainRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ChainRule::IssuerNotFound => "issuer not found",
            ChainRule::IssuerSignature => "issuer signature does not verify",
            ChainRule::NotCertificateAuthority => "issuer is not a certificate authority",
            ChainRule::WeakSignatureDigest => "disallowed signature digest",
            ChainRule::Expired => "certificate expired",
            ChainRule::NotYetValid => "certificate not yet valid",
            ChainRule::UntrustedRoot => "untrusted root",
            ChainRule::Revoked => "certificate revoked",
            ChainRule::PathTooLong => "chain too long",
            ChainRule::NotBuilt => "chain not built",
        };
        f.write_str(text)
    }
}

/// Comprehensive error types for signing operations
#[derive(Error, Debug, miette::Diagnostic)]
pub enum SigningError {
    #[error("Invalid argument `{parameter}`: {reason}")]
    #[diagnostic(code(package_signer::invalid_argument))]
    InvalidArgument {
        parameter: &'static str,
        reason: String,
    },

    #[error("Invalid certificate: {0}")]
    #[diagnostic(code(package_signer::invalid_certificate))]
    InvalidCertificate(String),

    #[error("Chain build failed at {certificate}: {rule} ({detail})")]
    #[diagnostic(
        code(package_signer::chain_build),
        help("supply the missing or replacement certificate and build again")
    )]
    ChainBuild {
        certificate: String,
        rule: ChainRule,
        detail: String,
    },

    #[error("Revocation status unavailable for {certificate}: {reason}")]
    #[diagnostic(code(package_signer::revocation_unavailable))]
    RevocationUnavailable { certificate: String, reason: String },

    #[error("Timestamp unavailable: {0}")]
    #[diagnostic(code(package_signer::timestamp_unavailable))]
    TimestampUnavailable(String),

    #[error("Signing request used after disposal: {0}")]
    #[diagnostic(code(package_signer::disposed))]
    DisposedResource(&'static str),

    #[error("Cryptographic error: {0}")]
    CryptographicError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("ASN.1 encoding/decoding error: {0}")]
    Asn1Error(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl SigningError {
    pub(crate) fn invalid_argument(parameter: &'static str, reason: impl Into<String>) -> Self {
        SigningError::InvalidArgument {
            parameter,
            reason: reason.into(),
        }
    }

    pub(crate) fn chain(certificate: impl Into<String>, rule: ChainRule, detail: impl Into<String>) -> Self {
        SigningError::ChainBuild {
            certificate: certificate.into(),
            rule,
            detail: detail.into(),
        }
    }

    /// The chain rule that failed, for chain-build errors.
    #[must_use]
    pub fn chain_rule(&self) -> Option<ChainRule> {
        match self {
            SigningError::ChainBuild { rule, .. } => Some(*rule),
            _ => None,
        }
    }
}

impl From<openssl::error::ErrorStack> for SigningError {
    fn from(error: openssl::error::ErrorStack) -> Self {
        SigningError::CryptographicError(error.to_string())
    }
}

impl From<der::Error> for SigningError {
    fn from(error: der::Error) -> Self {
        SigningError::Asn1Error(error.to_string())
    }
}

impl From<reqwest::Error> for SigningError {
    fn from(error: reqwest::Error) -> Self {
        SigningError::NetworkError(error.to_string())
    }
}

impl From<std::io::Error> for SigningError {
    fn from(error: std::io::Error) -> Self {
        SigningError::IoError(error.to_string())
    }
}
