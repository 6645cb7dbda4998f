//! Foundational cryptographic domain types.
//!
//! Provides strongly-typed wrappers for the cryptographic artifacts a
//! signing request carries:
//! - Hash algorithms with digest sizes, OIDs and OpenSSL digests
//! - The signing certificate with its optional private-key handle
//! - The ordered certificate chain handed to the signer

mod cert;
mod hash;

pub use cert::{
    display_name, CertificateChain, CertificateIdentity, PrivateKeyHandle, SigningCertificate,
};
pub use hash::HashAlgorithm;
