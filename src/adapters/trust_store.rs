//! Trust store collaborator.
//!
//! Chain building asks a `TrustStore` for candidate issuers and whether a
//! certificate is a designated trust anchor. `CertificateStore` is the
//! in-memory implementation, fed from PEM/DER files, directories or the
//! platform root store.

use crate::infra::error::{SigningError, SigningResult};
use crate::services::cert_validator::CertificateValidator;
use openssl::x509::{X509Ref, X509};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Read-only oracle consulted while building a chain.
pub trait TrustStore: Send + Sync {
    /// Certificates whose subject matches `certificate`'s issuer name.
    fn find_issuers(&self, certificate: &X509Ref) -> SigningResult<Vec<X509>>;

    /// True when `certificate` is a designated trust anchor.
    fn is_trust_anchor(&self, certificate: &X509Ref) -> bool;
}

/// In-memory trust anchors and intermediates.
#[derive(Default)]
pub struct CertificateStore {
    anchors: Vec<X509>,
    intermediates: Vec<X509>,
    anchor_fingerprints: HashSet<Vec<u8>>,
    known_fingerprints: HashSet<Vec<u8>>,
}

impl CertificateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the platform's trusted roots.
    pub fn with_system_roots() -> SigningResult<Self> {
        let mut store = Self::new();
        store.add_system_roots()?;
        Ok(store)
    }

    pub fn add_anchor(&mut self, certificate: X509) {
        let fingerprint = CertificateValidator::fingerprint(&certificate);
        if self.known_fingerprints.insert(fingerprint.clone()) {
            self.anchor_fingerprints.insert(fingerprint);
            self.anchors.push(certificate);
        } else if self.anchor_fingerprints.insert(fingerprint.clone()) {
            // Promote a known intermediate to anchor.
            self.intermediates
                .retain(|c| CertificateValidator::fingerprint(c) != fingerprint);
            self.anchors.push(certificate);
        }
    }

    pub fn add_intermediate(&mut self, certificate: X509) {
        let fingerprint = CertificateValidator::fingerprint(&certificate);
        if self.known_fingerprints.insert(fingerprint) {
            self.intermediates.push(certificate);
        }
    }

    /// Import the platform root store; unparsable entries are skipped.
    pub fn add_system_roots(&mut self) -> SigningResult<usize> {
        let result = rustls_native_certs::load_native_certs();
        for error in &result.errors {
            log::warn!("Skipping part of the system trust store: {error}");
        }
        if result.certs.is_empty() && !result.errors.is_empty() {
            return Err(SigningError::IoError(
                "failed to load system trust store".to_string(),
            ));
        }

        let mut added = 0;
        for der in result.certs {
            match X509::from_der(der.as_ref()) {
                Ok(certificate) => {
                    self.add_anchor(certificate);
                    added += 1;
                }
                Err(e) => log::debug!("Ignoring unparsable system root: {e}"),
            }
        }
        log::info!("Loaded {added} system trust anchors");
        Ok(added)
    }

    /// Load anchors from a PEM/DER file or a directory of them.
    pub fn load_anchors<P: AsRef<Path>>(&mut self, path: P) -> SigningResult<usize> {
        let certificates = load_certificates(path.as_ref())?;
        let count = certificates.len();
        for certificate in certificates {
            self.add_anchor(certificate);
        }
        Ok(count)
    }

    /// Load intermediates from a PEM/DER file or a directory of them.
    pub fn load_intermediates<P: AsRef<Path>>(&mut self, path: P) -> SigningResult<usize> {
        let certificates = load_certificates(path.as_ref())?;
        let count = certificates.len();
        for certificate in certificates {
            self.add_intermediate(certificate);
        }
        Ok(count)
    }

    #[must_use]
    pub fn anchors(&self) -> &[X509] {
        &self.anchors
    }

    #[must_use]
    pub fn intermediates(&self) -> &[X509] {
        &self.intermediates
    }
}

impl TrustStore for CertificateStore {
    fn find_issuers(&self, certificate: &X509Ref) -> SigningResult<Vec<X509>> {
        let issuer_name = certificate.issuer_name();
        Ok(self
            .intermediates
            .iter()
            .chain(self.anchors.iter())
            .filter(|candidate| {
                CertificateValidator::names_match(candidate.subject_name(), issuer_name)
            })
            .cloned()
            .collect())
    }

    fn is_trust_anchor(&self, certificate: &X509Ref) -> bool {
        self.anchor_fingerprints
            .contains(&CertificateValidator::fingerprint(certificate))
    }
}

/// Read every certificate from a PEM bundle, a DER file or a directory.
pub fn load_certificates(path: &Path) -> SigningResult<Vec<X509>> {
    if path.is_dir() {
        let mut entries: Vec<_> = fs::read_dir(path)
            .map_err(|e| SigningError::IoError(format!("Failed to read {}: {e}", path.display())))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| {
                        ["pem", "crt", "cer", "der"]
                            .iter()
                            .any(|known| ext.eq_ignore_ascii_case(known))
                    })
            })
            .collect();
        entries.sort();

        let mut certificates = Vec::new();
        for entry in entries {
            certificates.extend(load_certificate_file(&entry)?);
        }
        return Ok(certificates);
    }
    load_certificate_file(path)
}

fn load_certificate_file(path: &Path) -> SigningResult<Vec<X509>> {
    let data = fs::read(path)
        .map_err(|e| SigningError::IoError(format!("Failed to read {}: {e}", path.display())))?;
    parse_certificates(&data).map_err(|e| {
        SigningError::InvalidCertificate(format!("{}: {e}", path.display()))
    })
}

/// Parse a PEM bundle, falling back to a single DER certificate.
pub fn parse_certificates(data: &[u8]) -> SigningResult<Vec<X509>> {
    if data.windows(11).any(|w| w == b"-----BEGIN ") {
        let certificates = X509::stack_from_pem(data)?;
        if certificates.is_empty() {
            return Err(SigningError::InvalidCertificate(
                "PEM data contains no certificates".to_string(),
            ));
        }
        return Ok(certificates);
    }
    Ok(vec![X509::from_der(data)?])
}
