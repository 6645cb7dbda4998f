//! Revocation status collaborator.
//!
//! The chain builder asks a `RevocationChecker` about every certificate /
//! issuer pair, online first and then from cache. `CrlRevocationChecker`
//! answers from CRLs: cached ones loaded from disk or fetched earlier, and
//! fresh ones downloaded from the certificate's CRL distribution points.

use crate::infra::error::{SigningError, SigningResult};
use crate::services::cert_validator::CertificateValidator;
use openssl::asn1::Asn1Time;
use openssl::x509::{CrlStatus, X509Crl, X509CrlRef, X509Ref};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// How chain building checks revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevocationMode {
    /// Do not check revocation.
    NoCheck,
    /// Online first, falling back to cached responses.
    Online,
    /// Cached responses only.
    Offline,
}

impl RevocationMode {
    /// Sources to consult, in order.
    #[must_use]
    pub fn sources(&self) -> &'static [RevocationSource] {
        match self {
            RevocationMode::NoCheck => &[],
            RevocationMode::Online => &[RevocationSource::Online, RevocationSource::Cache],
            RevocationMode::Offline => &[RevocationSource::Cache],
        }
    }
}

impl std::str::FromStr for RevocationMode {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "nocheck" | "none" => Ok(RevocationMode::NoCheck),
            "online" => Ok(RevocationMode::Online),
            "offline" => Ok(RevocationMode::Offline),
            other => Err(SigningError::ConfigurationError(format!(
                "Invalid revocation mode: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevocationSource {
    Online,
    Cache,
}

impl fmt::Display for RevocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevocationSource::Online => f.write_str("online"),
            RevocationSource::Cache => f.write_str("cache"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationStatus {
    Good,
    Revoked { reason: String },
    /// The source could not answer (unreachable, no data, stale data).
    Unavailable { reason: String },
}

pub trait RevocationChecker: Send + Sync {
    fn check(
        &self,
        certificate: &X509Ref,
        issuer: &X509Ref,
        source: RevocationSource,
    ) -> RevocationStatus;
}

/// CRL based revocation checking.
pub struct CrlRevocationChecker {
    cache: Mutex<Vec<X509Crl>>,
    http: Option<reqwest::blocking::Client>,
}

impl CrlRevocationChecker {
    /// Checker that can download CRLs, with `timeout` per request.
    pub fn new(timeout: Duration) -> SigningResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("package-signer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            cache: Mutex::new(Vec::new()),
            http: Some(http),
        })
    }

    /// Checker that only answers from cached CRLs.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            cache: Mutex::new(Vec::new()),
            http: None,
        }
    }

    pub fn add_crl(&self, crl: X509Crl) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.push(crl);
        }
    }

    /// Load every `.crl`/`.pem`/`.der` CRL in `path` (file or directory).
    pub fn load_crls<P: AsRef<Path>>(&self, path: P) -> SigningResult<usize> {
        let path = path.as_ref();
        let files = if path.is_dir() {
            let mut files: Vec<_> = fs::read_dir(path)?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|p| {
                    p.extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| {
                            ["crl", "pem", "der"]
                                .iter()
                                .any(|known| ext.eq_ignore_ascii_case(known))
                        })
                })
                .collect();
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        let mut loaded = 0;
        for file in files {
            let data = fs::read(&file)?;
            match parse_crl(&data) {
                Ok(crl) => {
                    self.add_crl(crl);
                    loaded += 1;
                }
                Err(e) => log::warn!("Skipping CRL {}: {e}", file.display()),
            }
        }
        log::info!("Loaded {loaded} cached CRLs from {}", path.display());
        Ok(loaded)
    }

    #[must_use]
    pub fn cached_crl_count(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn check_cached(&self, certificate: &X509Ref, issuer: &X509Ref) -> RevocationStatus {
        let Ok(cache) = self.cache.lock() else {
            return RevocationStatus::Unavailable {
                reason: "CRL cache unavailable".to_string(),
            };
        };
        let mut reason = "no cached CRL for issuer".to_string();
        for crl in cache.iter() {
            if !CertificateValidator::names_match(crl.issuer_name(), issuer.subject_name()) {
                continue;
            }
            match evaluate(crl, certificate, issuer) {
                RevocationStatus::Unavailable { reason: why } => reason = why,
                status => return status,
            }
        }
        RevocationStatus::Unavailable { reason }
    }

    fn check_online(&self, certificate: &X509Ref, issuer: &X509Ref) -> RevocationStatus {
        let Some(http) = &self.http else {
            return RevocationStatus::Unavailable {
                reason: "online revocation checking disabled".to_string(),
            };
        };
        let urls = distribution_points(certificate);
        if urls.is_empty() {
            return RevocationStatus::Unavailable {
                reason: "certificate has no HTTP CRL distribution point".to_string(),
            };
        }

        let mut reason = String::new();
        for url in urls {
            log::debug!("Fetching CRL from {url}");
            let crl = http
                .get(&url)
                .send()
                .and_then(reqwest::blocking::Response::error_for_status)
                .and_then(|response| response.bytes())
                .map_err(SigningError::from)
                .and_then(|bytes| parse_crl(&bytes));
            match crl {
                Ok(crl) => {
                    let status = evaluate(&crl, certificate, issuer);
                    if !matches!(status, RevocationStatus::Unavailable { .. }) {
                        self.add_crl(crl);
                        return status;
                    }
                    if let RevocationStatus::Unavailable { reason: why } = status {
                        reason = format!("{url}: {why}");
                    }
                }
                Err(e) => {
                    log::debug!("CRL download from {url} failed: {e}");
                    reason = format!("{url}: {e}");
                }
            }
        }
        RevocationStatus::Unavailable { reason }
    }
}

impl RevocationChecker for CrlRevocationChecker {
    fn check(
        &self,
        certificate: &X509Ref,
        issuer: &X509Ref,
        source: RevocationSource,
    ) -> RevocationStatus {
        match source {
            RevocationSource::Online => self.check_online(certificate, issuer),
            RevocationSource::Cache => self.check_cached(certificate, issuer),
        }
    }
}

fn parse_crl(data: &[u8]) -> SigningResult<X509Crl> {
    if data.starts_with(b"-----BEGIN") {
        Ok(X509Crl::from_pem(data)?)
    } else {
        Ok(X509Crl::from_der(data)?)
    }
}

/// Status of `certificate` according to one CRL signed by `issuer`.
fn evaluate(crl: &X509CrlRef, certificate: &X509Ref, issuer: &X509Ref) -> RevocationStatus {
    let signed_by_issuer = issuer
        .public_key()
        .and_then(|key| crl.verify(&key))
        .unwrap_or(false);
    if !signed_by_issuer {
        return RevocationStatus::Unavailable {
            reason: "CRL signature does not verify against issuer".to_string(),
        };
    }

    if let (Some(next_update), Ok(now)) = (crl.next_update(), Asn1Time::days_from_now(0)) {
        if matches!(next_update.compare(&now), Ok(Ordering::Less)) {
            return RevocationStatus::Unavailable {
                reason: format!("CRL is stale (next update {next_update})"),
            };
        }
    }

    match crl.get_by_cert(&certificate.to_owned()) {
        CrlStatus::NotRevoked | CrlStatus::RemoveFromCrl(_) => RevocationStatus::Good,
        CrlStatus::Revoked(entry) => RevocationStatus::Revoked {
            reason: format!("revoked at {}", entry.revocation_date()),
        },
    }
}

fn distribution_points(certificate: &X509Ref) -> Vec<String> {
    let Some(points) = certificate.crl_distribution_points() else {
        return Vec::new();
    };
    points
        .iter()
        .filter_map(|point| point.distpoint())
        .filter_map(|name| name.fullname())
        .flat_map(|names| names.iter())
        .filter_map(|name| name.uri())
        .filter(|uri| uri.starts_with("http://") || uri.starts_with("https://"))
        .map(str::to_string)
        .collect()
}
