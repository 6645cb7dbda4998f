//! Package Signer Library
//!
//! Core of a package signing pipeline: validated signing requests, hash
//! algorithm and placement policy, a memoized certificate chain builder and
//! deterministic release of the signing certificate and key.
//!
//! ```no_run
//! use package_signer::{
//!     ChainBuilder, CertificateStore, HashAlgorithm, LogFindingSink, SigningCertificate,
//!     SigningRequest,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> package_signer::SigningResult<()> {
//! let pem = std::fs::read("signing.pem")?;
//! let request = SigningRequest::author(
//!     SigningCertificate::from_pem(&pem)?,
//!     HashAlgorithm::Sha256,
//!     HashAlgorithm::Sha256,
//! )?;
//!
//! let builder = ChainBuilder::new(Arc::new(CertificateStore::with_system_roots()?));
//! let chain = builder.build_chain_once(&request, &LogFindingSink)?;
//! println!("{} certificates", chain.len());
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod domain;
pub mod infra;
pub mod services;

pub use infra::{config, error, telemetry};

pub use adapters::revocation::{CrlRevocationChecker, RevocationChecker, RevocationMode};
pub use adapters::timestamp::{TimestampRequest, TimestampToken, Timestamper};
pub use adapters::trust_store::{CertificateStore, TrustStore};
pub use domain::crypto::{
    CertificateChain, CertificateIdentity, HashAlgorithm, PrivateKeyHandle, SigningCertificate,
};
pub use domain::findings::{ChainFinding, CollectingFindingSink, FindingSink, LogFindingSink, Severity};
pub use domain::policy::{
    is_valid_hash_algorithm, is_valid_placement, SignaturePlacement, SignatureType,
};
pub use domain::request::{RequestBuilder, ServiceIndexUrl, SigningInputs, SigningRequest};
pub use error::{ChainRule, SigningError, SigningResult};
pub use services::chain_builder::ChainBuilder;
