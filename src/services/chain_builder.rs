//! Certificate chain building service.
//!
//! Walks from the signing certificate to a trust anchor (or an accepted
//! self-signed root), checking every link against the chain policy. The
//! result is memoized on the request: the first successful build is stored
//! and every later call returns that same chain without touching the trust
//! store or revocation sources again.

use crate::adapters::revocation::{
    CrlRevocationChecker, RevocationChecker, RevocationMode, RevocationStatus,
};
use crate::adapters::trust_store::{load_certificates, CertificateStore, TrustStore};
use crate::domain::crypto::{CertificateChain, CertificateIdentity};
use crate::domain::findings::{ChainFinding, FindingSink, Severity};
use crate::domain::request::SigningRequest;
use crate::infra::config::{ChainPolicy, SigningConfiguration};
use crate::infra::error::{ChainRule, SigningError, SigningResult};
use crate::infra::telemetry::{TelemetryActivity, TelemetryEvent, TelemetrySink};
use crate::services::cert_validator::{CertificateValidator, ValidityStatus};
use openssl::asn1::Asn1Time;
use openssl::x509::{X509Ref, X509};
use std::collections::HashSet;
use std::sync::Arc;

pub const CHAIN_BUILD_EVENT: &str = "chain_build";
pub const TRUST_STORE_LOOKUP: &str = "trust_store_lookup";
pub const REVOCATION_CHECK: &str = "revocation_check";

/// Builds and validates signing certificate chains.
pub struct ChainBuilder {
    policy: ChainPolicy,
    trust_store: Arc<dyn TrustStore>,
    revocation: Option<Arc<dyn RevocationChecker>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    verification_time: Option<i64>,
}

impl ChainBuilder {
    /// Builder with the default policy.
    pub fn new(trust_store: Arc<dyn TrustStore>) -> Self {
        Self {
            policy: ChainPolicy::default(),
            trust_store,
            revocation: None,
            telemetry: None,
            verification_time: None,
        }
    }

    /// Wire a builder from configuration: trust anchors, extra
    /// intermediates and a CRL checker matching the revocation mode.
    pub fn from_configuration(config: &SigningConfiguration) -> SigningResult<Self> {
        let policy = &config.chain_policy;
        policy.validate()?;

        let mut store = CertificateStore::new();
        if config.use_system_roots {
            store.add_system_roots()?;
        }
        if let Some(roots) = &config.trusted_roots {
            let count = store.load_anchors(roots)?;
            log::info!("Loaded {count} trust anchors from {}", roots.display());
        }
        for path in &config.extra_certificates {
            for certificate in load_certificates(path)? {
                store.add_intermediate(certificate);
            }
        }

        let checker = match policy.revocation_mode {
            RevocationMode::NoCheck => None,
            RevocationMode::Online => Some(CrlRevocationChecker::new(policy.revocation_timeout())?),
            RevocationMode::Offline => Some(CrlRevocationChecker::offline()),
        };
        if let (Some(checker), Some(cache)) = (&checker, &config.crl_cache) {
            checker.load_crls(cache)?;
        }

        let mut builder = Self::new(Arc::new(store)).with_policy(policy.clone());
        if let Some(checker) = checker {
            builder = builder.with_revocation_checker(Arc::new(checker));
        }
        Ok(builder)
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ChainPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_revocation_checker(mut self, checker: Arc<dyn RevocationChecker>) -> Self {
        self.revocation = Some(checker);
        self
    }

    #[must_use]
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Validate against a fixed time (unix seconds) instead of now.
    #[must_use]
    pub fn at_time(mut self, unix_seconds: i64) -> Self {
        self.verification_time = Some(unix_seconds);
        self
    }

    #[must_use]
    pub fn policy(&self) -> &ChainPolicy {
        &self.policy
    }

    /// Return the request's chain, building and storing it on first use.
    ///
    /// Once a chain is stored it is returned unchanged; no validation runs
    /// and no collaborator is consulted. A failed build stores nothing, so
    /// the caller can fix the inputs (for example add a missing
    /// intermediate) and call again.
    ///
    /// # Errors
    ///
    /// `ChainBuild` naming the failing certificate and rule,
    /// `RevocationUnavailable` under strict revocation, or
    /// `DisposedResource` when the request has been disposed.
    pub fn build_chain_once(
        &self,
        request: &SigningRequest,
        logger: &dyn FindingSink,
    ) -> SigningResult<Arc<CertificateChain>> {
        request.chain_or_build(|certificate, additional| {
            self.build_chain(certificate.x509(), additional, logger)
        })
    }

    /// Build and validate a chain for `leaf` without memoization.
    pub fn build_chain(
        &self,
        leaf: &X509Ref,
        additional: &[X509],
        logger: &dyn FindingSink,
    ) -> SigningResult<CertificateChain> {
        let mut activity = TelemetryActivity::start(
            self.telemetry.clone(),
            Some(TelemetryEvent::new(CHAIN_BUILD_EVENT)),
        );
        let result = self.walk(leaf, additional, logger, &mut activity);

        if let Some(event) = activity.event_mut() {
            match &result {
                Ok(chain) => {
                    event.set("outcome", "built");
                    event.set("chain_length", chain.len());
                }
                Err(e) => {
                    event.set("outcome", "failed");
                    if let Some(rule) = e.chain_rule() {
                        event.set("rule", rule.to_string());
                    }
                }
            }
        }
        result
    }

    fn walk(
        &self,
        leaf: &X509Ref,
        additional: &[X509],
        logger: &dyn FindingSink,
        activity: &mut TelemetryActivity,
    ) -> SigningResult<CertificateChain> {
        let at = match self.verification_time {
            Some(unix_seconds) => CertificateValidator::asn1_time(unix_seconds)?,
            None => Asn1Time::days_from_now(0)?,
        };
        let leaf_identity = CertificateIdentity::of(leaf);
        log::info!("Building certificate chain for {leaf_identity}");

        let analysis = CertificateValidator::analyze_signing_certificate(
            leaf,
            &at,
            self.policy.expiry_warning_days,
        )?;
        match analysis.validity {
            ValidityStatus::Expired => {
                return Err(SigningError::chain(
                    leaf_identity.subject,
                    ChainRule::Expired,
                    format!("signing certificate expired at {}", leaf.not_after()),
                ))
            }
            ValidityStatus::NotYetValid => {
                return Err(SigningError::chain(
                    leaf_identity.subject,
                    ChainRule::NotYetValid,
                    format!("signing certificate is valid from {}", leaf.not_before()),
                ))
            }
            ValidityStatus::Valid => {}
        }
        for warning in analysis.warnings {
            logger.record(
                ChainFinding::new(Severity::Warning, warning).for_certificate(leaf_identity.clone()),
            );
        }

        let candidates = distinct_certificates(leaf, additional);
        let mut seen = HashSet::from([CertificateValidator::fingerprint(leaf)]);
        let mut chain = vec![leaf.to_owned()];

        loop {
            let current = chain[chain.len() - 1].clone();
            let identity = CertificateIdentity::of(&current);
            let is_anchor = self.trust_store.is_trust_anchor(&current);

            // A self-signed anchor is trusted by designation, not by its signature.
            let digest_exempt = is_anchor
                && !self.policy.check_anchor_digest
                && CertificateValidator::is_self_signed(&current);
            if !digest_exempt {
                if let Some(digest) = CertificateValidator::uses_disallowed_digest(
                    &current,
                    &self.policy.disallowed_signature_digests,
                ) {
                    return Err(SigningError::chain(
                        identity.subject,
                        ChainRule::WeakSignatureDigest,
                        format!("certificate is signed with disallowed digest {digest}"),
                    ));
                }
            }

            if chain.len() > 1 {
                self.check_issuer_validity(&current, &identity, &at, logger)?;
            }

            if is_anchor {
                log::debug!("Reached trust anchor {identity}");
                break;
            }

            if CertificateValidator::is_self_signed(&current) {
                if !self.policy.allow_untrusted_root {
                    return Err(SigningError::chain(
                        identity.subject,
                        ChainRule::UntrustedRoot,
                        "self-signed root is not a trust anchor",
                    ));
                }
                logger.record(
                    ChainFinding::new(
                        Severity::Warning,
                        "chain ends in a self-signed root that is not a trust anchor",
                    )
                    .for_certificate(identity),
                );
                break;
            }

            if chain.len() >= self.policy.max_chain_depth {
                return Err(SigningError::chain(
                    identity.subject,
                    ChainRule::PathTooLong,
                    format!(
                        "no trust anchor within {} certificates",
                        self.policy.max_chain_depth
                    ),
                ));
            }

            let issuer = self.find_issuer(&current, &identity, &candidates, &seen, activity)?;
            log::debug!("{identity} issued by {}", CertificateValidator::describe(&issuer));

            activity.start_interval(REVOCATION_CHECK);
            let revocation = self.check_revocation(&current, &issuer, &identity, logger);
            activity.end_interval(REVOCATION_CHECK);
            revocation?;

            seen.insert(CertificateValidator::fingerprint(&issuer));
            chain.push(issuer);
        }

        log::info!(
            "Built certificate chain of {} certificates for {leaf_identity}",
            chain.len()
        );
        Ok(CertificateChain::new(chain))
    }

    fn check_issuer_validity(
        &self,
        certificate: &X509Ref,
        identity: &CertificateIdentity,
        at: &Asn1Time,
        logger: &dyn FindingSink,
    ) -> SigningResult<()> {
        let (rule, message) = match CertificateValidator::check_validity(certificate, at)? {
            ValidityStatus::Valid => return Ok(()),
            ValidityStatus::Expired => (
                ChainRule::Expired,
                format!("issuer certificate expired at {}", certificate.not_after()),
            ),
            ValidityStatus::NotYetValid => (
                ChainRule::NotYetValid,
                format!("issuer certificate is valid from {}", certificate.not_before()),
            ),
        };

        let severity = self.policy.expired_intermediate_severity;
        if severity == Severity::Error {
            return Err(SigningError::chain(identity.subject.clone(), rule, message));
        }
        logger.record(ChainFinding::new(severity, message).for_certificate(identity.clone()));
        Ok(())
    }

    /// First acceptable issuer of `certificate`: supplied certificates are
    /// tried before the trust store, which is only queried when needed.
    fn find_issuer(
        &self,
        certificate: &X509Ref,
        identity: &CertificateIdentity,
        supplied: &[X509],
        seen: &HashSet<Vec<u8>>,
        activity: &mut TelemetryActivity,
    ) -> SigningResult<X509> {
        let mut rejection: Option<SigningError> = None;

        let supplied_match = self.pick_issuer(certificate, supplied.iter().cloned(), seen, &mut rejection)?;
        if let Some(issuer) = supplied_match {
            return Ok(issuer);
        }

        activity.start_interval(TRUST_STORE_LOOKUP);
        let stored = self.trust_store.find_issuers(certificate);
        activity.end_interval(TRUST_STORE_LOOKUP);
        if let Some(issuer) = self.pick_issuer(certificate, stored?.into_iter(), seen, &mut rejection)? {
            return Ok(issuer);
        }

        Err(rejection.unwrap_or_else(|| {
            SigningError::chain(
                identity.subject.clone(),
                ChainRule::IssuerNotFound,
                format!(
                    "no certificate found for issuer {}",
                    crate::domain::crypto::display_name(certificate.issuer_name())
                ),
            )
        }))
    }

    fn pick_issuer(
        &self,
        certificate: &X509Ref,
        candidates: impl Iterator<Item = X509>,
        seen: &HashSet<Vec<u8>>,
        rejection: &mut Option<SigningError>,
    ) -> SigningResult<Option<X509>> {
        for candidate in candidates {
            if !CertificateValidator::names_match(candidate.subject_name(), certificate.issuer_name())
                || seen.contains(&CertificateValidator::fingerprint(&candidate))
            {
                continue;
            }
            if !CertificateValidator::verifies(&candidate, certificate) {
                rejection.get_or_insert_with(|| {
                    SigningError::chain(
                        CertificateIdentity::of(certificate).subject,
                        ChainRule::IssuerSignature,
                        format!(
                            "signature does not verify with the key of {}",
                            CertificateValidator::describe(&candidate)
                        ),
                    )
                });
                continue;
            }
            if !CertificateValidator::may_issue(&candidate)? {
                rejection.get_or_insert_with(|| {
                    SigningError::chain(
                        CertificateIdentity::of(&candidate).subject,
                        ChainRule::NotCertificateAuthority,
                        "issuer is not a certificate authority",
                    )
                });
                continue;
            }
            return Ok(Some(candidate));
        }
        Ok(None)
    }

    fn check_revocation(
        &self,
        certificate: &X509Ref,
        issuer: &X509Ref,
        identity: &CertificateIdentity,
        logger: &dyn FindingSink,
    ) -> SigningResult<()> {
        let mode = self.policy.revocation_mode;
        if mode == RevocationMode::NoCheck {
            return Ok(());
        }

        let mut reasons = Vec::new();
        match &self.revocation {
            None => reasons.push("no revocation checker configured".to_string()),
            Some(checker) => {
                for &source in mode.sources() {
                    match checker.check(certificate, issuer, source) {
                        RevocationStatus::Good => {
                            log::debug!("{identity} not revoked ({source})");
                            return Ok(());
                        }
                        RevocationStatus::Revoked { reason } => {
                            return Err(SigningError::chain(
                                identity.subject.clone(),
                                ChainRule::Revoked,
                                reason,
                            ));
                        }
                        RevocationStatus::Unavailable { reason } => {
                            log::debug!("{source} revocation status for {identity} unavailable: {reason}");
                            reasons.push(format!("{source}: {reason}"));
                        }
                    }
                }
            }
        }

        let reason = reasons.join("; ");
        if self.policy.strict_revocation {
            return Err(SigningError::RevocationUnavailable {
                certificate: identity.subject.clone(),
                reason,
            });
        }
        logger.record(
            ChainFinding::new(
                Severity::Warning,
                format!("revocation status could not be determined ({reason})"),
            )
            .for_certificate(identity.clone()),
        );
        Ok(())
    }
}

/// `additional` without duplicates or copies of the leaf, order preserved.
fn distinct_certificates(leaf: &X509Ref, additional: &[X509]) -> Vec<X509> {
    let mut seen = HashSet::from([CertificateValidator::fingerprint(leaf)]);
    additional
        .iter()
        .filter(|c| seen.insert(CertificateValidator::fingerprint(c)))
        .cloned()
        .collect()
}
