//! Hash algorithm domain type.
//!
//! Provides the `HashAlgorithm` enumeration used for both package signatures
//! and timestamp requests: SHA-256, SHA-384 and SHA-512, plus the `Unknown`
//! sentinel that construction-time validation always rejects. Includes
//! digest sizes, OIDs and OpenSSL integration for the downstream signer.

use crate::infra::error::{SigningError, SigningResult};
use openssl::hash::MessageDigest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hash algorithms a signing request may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Sentinel for "not specified"; never valid for a request.
    Unknown,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// The closed set of usable algorithms, strongest last.
    pub const SUPPORTED: [HashAlgorithm; 3] = [
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Unknown => "unknown",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Digest length in bytes (0 for `Unknown`).
    #[must_use]
    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Unknown => 0,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Dotted OID of the digest algorithm.
    #[must_use]
    pub fn oid(&self) -> Option<&'static str> {
        match self {
            HashAlgorithm::Unknown => None,
            HashAlgorithm::Sha256 => Some("2.16.840.1.101.3.4.2.1"),
            HashAlgorithm::Sha384 => Some("2.16.840.1.101.3.4.2.2"),
            HashAlgorithm::Sha512 => Some("2.16.840.1.101.3.4.2.3"),
        }
    }

    /// OpenSSL digest handle for this algorithm.
    #[must_use]
    pub fn message_digest(&self) -> Option<MessageDigest> {
        match self {
            HashAlgorithm::Unknown => None,
            HashAlgorithm::Sha256 => Some(MessageDigest::sha256()),
            HashAlgorithm::Sha384 => Some(MessageDigest::sha384()),
            HashAlgorithm::Sha512 => Some(MessageDigest::sha512()),
        }
    }

    /// Digest `data` with this algorithm.
    pub fn digest(&self, data: &[u8]) -> SigningResult<Vec<u8>> {
        let md = self.message_digest().ok_or_else(|| {
            SigningError::invalid_argument("hash_algorithm", "cannot digest with `unknown`")
        })?;
        Ok(openssl::hash::hash(md, data)?.to_vec())
    }
}

impl FromStr for HashAlgorithm {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "unknown" => Ok(HashAlgorithm::Unknown),
            other => Err(SigningError::invalid_argument(
                "hash_algorithm",
                format!("unsupported hash algorithm '{other}' (expected sha256, sha384 or sha512)"),
            )),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
