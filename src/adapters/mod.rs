//! Adapter layer modules for external system integration.
//!
//! Provides the collaborator seams chain building and signing talk to:
//! - Trust stores (in-memory anchors, platform root store)
//! - Revocation status from cached or downloaded CRLs
//! - Timestamp authorities

pub mod revocation;
pub mod timestamp;
pub mod trust_store;
