//! Domain types: requests, certificates, hash and placement policy, and the
//! findings produced while building chains.

pub mod crypto;
pub mod findings;
pub mod policy;
pub mod request;
