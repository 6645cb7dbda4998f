//! Service layer module root.
//! Certificate checks and chain building.

pub mod cert_validator;
pub mod chain_builder;

pub use cert_validator::{CertificateAnalysis, CertificateValidator, ValidityStatus};
pub use chain_builder::ChainBuilder;
