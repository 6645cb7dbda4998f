//! Timestamp authority collaborator.
//!
//! The network exchange with a timestamp authority lives outside this crate;
//! signing code talks to it through the `Timestamper` trait and only decides
//! which digest and hash algorithm go into the request.

use crate::domain::crypto::HashAlgorithm;
use crate::infra::error::SigningResult;
use std::fmt;

/// Message imprint sent to a timestamp authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampRequest {
    pub digest: Vec<u8>,
    pub hash_algorithm: HashAlgorithm,
}

/// Opaque timestamp token returned by the authority.
#[derive(Clone, PartialEq, Eq)]
pub struct TimestampToken {
    der: Box<[u8]>,
}

impl TimestampToken {
    #[must_use]
    pub fn from_der(der: Vec<u8>) -> Self {
        Self {
            der: der.into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.der.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.der.is_empty()
    }
}

impl fmt::Debug for TimestampToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimestampToken(len={})", self.der.len())
    }
}

/// Obtains timestamp tokens from an authority.
///
/// Implementations report unreachable or failing authorities as
/// `SigningError::TimestampUnavailable`; callers decide whether to retry.
pub trait Timestamper: Send + Sync {
    fn timestamp(&self, request: &TimestampRequest) -> SigningResult<TimestampToken>;
}
