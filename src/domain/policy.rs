//! Algorithm and placement policy.
//!
//! The closed sets of acceptable hash algorithms and signature placements,
//! with the pure predicates request construction and downstream signers use
//! to check them.

use crate::domain::crypto::HashAlgorithm;
use crate::infra::error::SigningError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who produces the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureType {
    /// Primary signature applied by the package author.
    Author,
    /// Signature applied by a repository or package service.
    Repository,
}

/// Where the signature sits in the package's signature structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignaturePlacement {
    PrimarySignature,
    /// Layered on top of an existing primary signature.
    Countersignature,
}

impl SignaturePlacement {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SignaturePlacement::PrimarySignature => "primary-signature",
            SignaturePlacement::Countersignature => "countersignature",
        }
    }
}

impl SignatureType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureType::Author => "author",
            SignatureType::Repository => "repository",
        }
    }
}

/// True when `algorithm` may be used for a signature or timestamp.
#[must_use]
pub fn is_valid_hash_algorithm(algorithm: HashAlgorithm) -> bool {
    HashAlgorithm::SUPPORTED.contains(&algorithm)
}

/// True when `placement` is one of the defined placements.
#[must_use]
pub fn is_valid_placement(placement: SignaturePlacement) -> bool {
    matches!(
        placement,
        SignaturePlacement::PrimarySignature | SignaturePlacement::Countersignature
    )
}

/// True when `placement` is allowed for a request of `signature_type`.
///
/// Author signatures are always primary; repository signatures may be either,
/// depending on whether the package already carries a primary signature.
#[must_use]
pub fn is_valid_placement_for(signature_type: SignatureType, placement: SignaturePlacement) -> bool {
    match signature_type {
        SignatureType::Author => placement == SignaturePlacement::PrimarySignature,
        SignatureType::Repository => is_valid_placement(placement),
    }
}

impl FromStr for SignaturePlacement {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "primary" | "primarysignature" => Ok(SignaturePlacement::PrimarySignature),
            "counter" | "countersignature" => Ok(SignaturePlacement::Countersignature),
            other => Err(SigningError::invalid_argument(
                "signature_placement",
                format!("unsupported placement '{other}' (expected primary or countersignature)"),
            )),
        }
    }
}

impl FromStr for SignatureType {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "author" => Ok(SignatureType::Author),
            "repository" => Ok(SignatureType::Repository),
            other => Err(SigningError::invalid_argument(
                "signature_type",
                format!("unsupported signature type '{other}'"),
            )),
        }
    }
}

impl fmt::Display for SignaturePlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
