//! Signing request value object.
//!
//! A `SigningRequest` captures the certificate, algorithms and placement for
//! one package signature. It validates its inputs at construction, owns the
//! certificate and private-key handle until disposal, and caches the
//! certificate chain once it has been built.

use crate::adapters::timestamp::{TimestampRequest, TimestampToken, Timestamper};
use crate::domain::crypto::{CertificateChain, HashAlgorithm, PrivateKeyHandle, SigningCertificate};
use crate::domain::policy::{
    is_valid_hash_algorithm, is_valid_placement, is_valid_placement_for, SignaturePlacement,
    SignatureType,
};
use crate::infra::error::{ChainRule, SigningError, SigningResult};
use openssl::x509::X509;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Repository service index URL carried by repository signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIndexUrl(String);

impl ServiceIndexUrl {
    /// Create a new `ServiceIndexUrl` after validation
    pub fn new(url: impl AsRef<str>) -> SigningResult<Self> {
        let url = url.as_ref().trim();
        Self::validate_url(url)?;
        Ok(ServiceIndexUrl(url.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate_url(url: &str) -> SigningResult<()> {
        let Some(rest) = url.strip_prefix("https://") else {
            return Err(SigningError::invalid_argument(
                "v3_service_index_url",
                format!("service index must be an absolute https:// URL, got: {url}"),
            ));
        };

        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(SigningError::invalid_argument(
                "v3_service_index_url",
                format!("service index URL has no host: {url}"),
            ));
        }

        Ok(())
    }
}

impl FromStr for ServiceIndexUrl {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ServiceIndexUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Variant-specific part of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Author,
    Repository {
        service_index: ServiceIndexUrl,
        package_owners: Vec<String>,
    },
}

impl RequestKind {
    #[must_use]
    pub fn signature_type(&self) -> SignatureType {
        match self {
            RequestKind::Author => SignatureType::Author,
            RequestKind::Repository { .. } => SignatureType::Repository,
        }
    }
}

/// A request to produce one package signature.
pub struct SigningRequest {
    kind: RequestKind,
    signature_hash_algorithm: HashAlgorithm,
    timestamp_hash_algorithm: HashAlgorithm,
    signature_placement: SignaturePlacement,
    /// `None` once disposed.
    certificate: Option<SigningCertificate>,
    additional_certificates: Vec<X509>,
    chain: OnceLock<Arc<CertificateChain>>,
    build_lock: Mutex<()>,
}

impl SigningRequest {
    #[must_use]
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Author signature request; always a primary signature.
    pub fn author(
        certificate: SigningCertificate,
        signature_hash_algorithm: HashAlgorithm,
        timestamp_hash_algorithm: HashAlgorithm,
    ) -> SigningResult<Self> {
        RequestBuilder::default()
            .certificate(certificate)
            .signature_hash_algorithm(signature_hash_algorithm)
            .timestamp_hash_algorithm(timestamp_hash_algorithm)
            .build()
    }

    /// Repository signature request.
    pub fn repository(
        certificate: SigningCertificate,
        signature_hash_algorithm: HashAlgorithm,
        timestamp_hash_algorithm: HashAlgorithm,
        signature_placement: SignaturePlacement,
        service_index: ServiceIndexUrl,
        package_owners: Vec<String>,
    ) -> SigningResult<Self> {
        RequestBuilder::default()
            .certificate(certificate)
            .signature_hash_algorithm(signature_hash_algorithm)
            .timestamp_hash_algorithm(timestamp_hash_algorithm)
            .signature_placement(signature_placement)
            .repository(service_index, package_owners)
            .build()
    }

    #[must_use]
    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    #[must_use]
    pub fn signature_type(&self) -> SignatureType {
        self.kind.signature_type()
    }

    #[must_use]
    pub fn signature_hash_algorithm(&self) -> HashAlgorithm {
        self.signature_hash_algorithm
    }

    #[must_use]
    pub fn timestamp_hash_algorithm(&self) -> HashAlgorithm {
        self.timestamp_hash_algorithm
    }

    #[must_use]
    pub fn signature_placement(&self) -> SignaturePlacement {
        self.signature_placement
    }

    #[must_use]
    pub fn service_index_url(&self) -> Option<&ServiceIndexUrl> {
        match &self.kind {
            RequestKind::Repository { service_index, .. } => Some(service_index),
            RequestKind::Author => None,
        }
    }

    #[must_use]
    pub fn package_owners(&self) -> &[String] {
        match &self.kind {
            RequestKind::Repository { package_owners, .. } => package_owners,
            RequestKind::Author => &[],
        }
    }

    /// The signing certificate.
    ///
    /// # Errors
    ///
    /// Returns `DisposedResource` after `dispose`.
    pub fn certificate(&self) -> SigningResult<&SigningCertificate> {
        self.certificate
            .as_ref()
            .ok_or(SigningError::DisposedResource("certificate"))
    }

    /// The private key attached to the signing certificate, if any.
    pub fn private_key(&self) -> SigningResult<Option<&dyn PrivateKeyHandle>> {
        Ok(self.certificate()?.private_key())
    }

    /// Supplemental certificates offered to chain building.
    #[must_use]
    pub fn additional_certificates(&self) -> &[X509] {
        &self.additional_certificates
    }

    /// Mutable access to the supplemental certificates.
    ///
    /// Changes made after the chain has been built have no effect on it.
    pub fn additional_certificates_mut(&mut self) -> &mut Vec<X509> {
        &mut self.additional_certificates
    }

    pub fn add_additional_certificate(&mut self, certificate: X509) {
        self.additional_certificates.push(certificate);
    }

    pub fn extend_additional_certificates(&mut self, certificates: impl IntoIterator<Item = X509>) {
        self.additional_certificates.extend(certificates);
    }

    /// The cached chain, if it has been built. The returned `Arc` outlives
    /// [`SigningRequest::dispose`].
    #[must_use]
    pub fn chain(&self) -> Option<Arc<CertificateChain>> {
        self.chain.get().cloned()
    }

    #[must_use]
    pub fn is_chain_built(&self) -> bool {
        self.chain.get().is_some()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.certificate.is_none()
    }

    /// Return the cached chain or run `build` exactly once to produce it.
    ///
    /// Concurrent callers serialize on the build lock; a failed build leaves
    /// the chain unset so a later call can retry.
    pub(crate) fn chain_or_build<F>(&self, build: F) -> SigningResult<Arc<CertificateChain>>
    where
        F: FnOnce(&SigningCertificate, &[X509]) -> SigningResult<CertificateChain>,
    {
        let certificate = self.certificate()?;
        if let Some(chain) = self.chain.get() {
            return Ok(Arc::clone(chain));
        }

        let _guard = self
            .build_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(chain) = self.chain.get() {
            return Ok(Arc::clone(chain));
        }

        let chain = Arc::new(build(certificate, &self.additional_certificates)?);
        // Only the lock holder sets the cell, so this cannot already be full.
        let _ = self.chain.set(Arc::clone(&chain));
        Ok(chain)
    }

    /// Everything the downstream signer needs, once the chain is built.
    ///
    /// # Errors
    ///
    /// Returns `DisposedResource` after disposal and a `NotBuilt` chain error
    /// before a successful chain build.
    pub fn signing_inputs(&self) -> SigningResult<SigningInputs<'_>> {
        let certificate = self.certificate()?;
        let chain = self.chain().ok_or_else(|| {
            SigningError::chain(
                certificate.identity().subject,
                ChainRule::NotBuilt,
                "build the signing certificate chain before signing",
            )
        })?;
        Ok(SigningInputs {
            certificate,
            chain,
            signature_type: self.signature_type(),
            signature_placement: self.signature_placement,
            signature_hash_algorithm: self.signature_hash_algorithm,
            timestamp_hash_algorithm: self.timestamp_hash_algorithm,
        })
    }

    /// Release the certificate and private-key handle.
    ///
    /// Idempotent; later calls do nothing. Also runs on drop.
    ///
    /// The private key goes away here. A chain handed out earlier by
    /// [`SigningRequest::chain`] or the chain builder is a shared, key-less
    /// copy of the public certificates and stays usable after disposal.
    pub fn dispose(&mut self) {
        if let Some(certificate) = self.certificate.take() {
            log::debug!(
                "Releasing signing certificate {} (private key: {})",
                certificate.identity(),
                certificate.has_private_key()
            );
            drop(certificate);
            self.chain.take();
            self.additional_certificates.clear();
        }
    }
}

impl Drop for SigningRequest {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningRequest")
            .field("kind", &self.kind)
            .field("signature_hash_algorithm", &self.signature_hash_algorithm)
            .field("timestamp_hash_algorithm", &self.timestamp_hash_algorithm)
            .field("signature_placement", &self.signature_placement)
            .field("certificate", &self.certificate)
            .field("additional_certificates", &self.additional_certificates.len())
            .field("chain_built", &self.is_chain_built())
            .finish()
    }
}

/// Builder for `SigningRequest`.
///
/// Accepts typed values or textual names; everything is validated in
/// `build`, so configuration and CLI input get the same checks as typed
/// callers.
#[derive(Default)]
pub struct RequestBuilder {
    certificate: Option<SigningCertificate>,
    signature_hash_algorithm: Option<Result<HashAlgorithm, String>>,
    timestamp_hash_algorithm: Option<Result<HashAlgorithm, String>>,
    signature_placement: Option<Result<SignaturePlacement, String>>,
    repository: Option<(Result<ServiceIndexUrl, SigningError>, Vec<String>)>,
}

impl RequestBuilder {
    #[must_use]
    pub fn certificate(mut self, certificate: SigningCertificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    #[must_use]
    pub fn signature_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.signature_hash_algorithm = Some(Ok(algorithm));
        self
    }

    #[must_use]
    pub fn timestamp_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.timestamp_hash_algorithm = Some(Ok(algorithm));
        self
    }

    #[must_use]
    pub fn signature_placement(mut self, placement: SignaturePlacement) -> Self {
        self.signature_placement = Some(Ok(placement));
        self
    }

    #[must_use]
    pub fn signature_hash_algorithm_name(mut self, name: &str) -> Self {
        self.signature_hash_algorithm = Some(name.parse().map_err(|_| name.to_string()));
        self
    }

    #[must_use]
    pub fn timestamp_hash_algorithm_name(mut self, name: &str) -> Self {
        self.timestamp_hash_algorithm = Some(name.parse().map_err(|_| name.to_string()));
        self
    }

    #[must_use]
    pub fn signature_placement_name(mut self, name: &str) -> Self {
        self.signature_placement = Some(name.parse().map_err(|_| name.to_string()));
        self
    }

    /// Make this a repository request.
    #[must_use]
    pub fn repository(mut self, service_index: ServiceIndexUrl, package_owners: Vec<String>) -> Self {
        self.repository = Some((Ok(service_index), package_owners));
        self
    }

    #[must_use]
    pub fn repository_url(mut self, service_index: &str, package_owners: Vec<String>) -> Self {
        self.repository = Some((ServiceIndexUrl::new(service_index), package_owners));
        self
    }

    /// Validate and build the request.
    ///
    /// # Errors
    ///
    /// `InvalidCertificate` when no certificate was supplied (checked first),
    /// otherwise `InvalidArgument` naming the first offending parameter.
    pub fn build(self) -> SigningResult<SigningRequest> {
        let Some(certificate) = self.certificate else {
            return Err(SigningError::InvalidCertificate(
                "a signing certificate is required".to_string(),
            ));
        };

        let signature_hash_algorithm =
            validate_hash("signature_hash_algorithm", self.signature_hash_algorithm)?;
        let timestamp_hash_algorithm =
            validate_hash("timestamp_hash_algorithm", self.timestamp_hash_algorithm)?;

        let signature_placement = match self.signature_placement {
            None => SignaturePlacement::PrimarySignature,
            Some(Ok(placement)) if is_valid_placement(placement) => placement,
            Some(Ok(placement)) => {
                return Err(SigningError::invalid_argument(
                    "signature_placement",
                    format!("unsupported placement {placement}"),
                ))
            }
            Some(Err(name)) => {
                return Err(SigningError::invalid_argument(
                    "signature_placement",
                    format!("unsupported placement '{name}'"),
                ))
            }
        };

        let kind = match self.repository {
            None => RequestKind::Author,
            Some((service_index, owners)) => RequestKind::Repository {
                service_index: service_index?,
                package_owners: validate_owners(owners)?,
            },
        };

        if !is_valid_placement_for(kind.signature_type(), signature_placement) {
            return Err(SigningError::invalid_argument(
                "signature_placement",
                format!(
                    "{} signatures must be {}",
                    kind.signature_type(),
                    SignaturePlacement::PrimarySignature
                ),
            ));
        }

        log::debug!(
            "Created {} signing request ({}, signature={}, timestamp={})",
            kind.signature_type(),
            signature_placement,
            signature_hash_algorithm,
            timestamp_hash_algorithm
        );

        Ok(SigningRequest {
            kind,
            signature_hash_algorithm,
            timestamp_hash_algorithm,
            signature_placement,
            certificate: Some(certificate),
            additional_certificates: Vec::new(),
            chain: OnceLock::new(),
            build_lock: Mutex::new(()),
        })
    }
}

fn validate_hash(
    parameter: &'static str,
    value: Option<Result<HashAlgorithm, String>>,
) -> SigningResult<HashAlgorithm> {
    match value {
        Some(Ok(algorithm)) if is_valid_hash_algorithm(algorithm) => Ok(algorithm),
        Some(Ok(algorithm)) => Err(SigningError::invalid_argument(
            parameter,
            format!("`{algorithm}` is not an acceptable hash algorithm"),
        )),
        Some(Err(name)) => Err(SigningError::invalid_argument(
            parameter,
            format!("unsupported hash algorithm '{name}' (expected sha256, sha384 or sha512)"),
        )),
        None => Err(SigningError::invalid_argument(parameter, "must be specified")),
    }
}

fn validate_owners(owners: Vec<String>) -> SigningResult<Vec<String>> {
    owners
        .into_iter()
        .map(|owner| {
            let owner = owner.trim();
            if owner.is_empty() {
                Err(SigningError::invalid_argument(
                    "package_owners",
                    "package owner names must not be empty",
                ))
            } else {
                Ok(owner.to_string())
            }
        })
        .collect()
}

/// Borrowed view of a request handed to the signer.
pub struct SigningInputs<'a> {
    pub certificate: &'a SigningCertificate,
    pub chain: Arc<CertificateChain>,
    pub signature_type: SignatureType,
    pub signature_placement: SignaturePlacement,
    pub signature_hash_algorithm: HashAlgorithm,
    pub timestamp_hash_algorithm: HashAlgorithm,
}

impl SigningInputs<'_> {
    #[must_use]
    pub fn private_key(&self) -> Option<&dyn PrivateKeyHandle> {
        self.certificate.private_key()
    }

    /// Build the timestamp request for a signature value.
    pub fn timestamp_request(&self, signature_value: &[u8]) -> SigningResult<TimestampRequest> {
        Ok(TimestampRequest {
            digest: self.timestamp_hash_algorithm.digest(signature_value)?,
            hash_algorithm: self.timestamp_hash_algorithm,
        })
    }

    /// Ask `timestamper` for a token over `signature_value`.
    ///
    /// # Errors
    ///
    /// Every collaborator failure is reported as `TimestampUnavailable`.
    pub fn request_timestamp(
        &self,
        timestamper: &dyn Timestamper,
        signature_value: &[u8],
    ) -> SigningResult<TimestampToken> {
        let request = self.timestamp_request(signature_value)?;
        log::info!(
            "Requesting timestamp ({}, {} byte digest)",
            request.hash_algorithm,
            request.digest.len()
        );
        match timestamper.timestamp(&request) {
            Ok(token) if token.is_empty() => Err(SigningError::TimestampUnavailable(
                "timestamp authority returned an empty token".to_string(),
            )),
            Ok(token) => Ok(token),
            Err(e @ SigningError::TimestampUnavailable(_)) => Err(e),
            Err(e) => Err(SigningError::TimestampUnavailable(e.to_string())),
        }
    }
}

impl fmt::Debug for SigningInputs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningInputs")
            .field("certificate", &self.certificate)
            .field("chain", &self.chain)
            .field("signature_type", &self.signature_type)
            .field("signature_placement", &self.signature_placement)
            .field("signature_hash_algorithm", &self.signature_hash_algorithm)
            .field("timestamp_hash_algorithm", &self.timestamp_hash_algorithm)
            .finish()
    }
}
