//! Certificate validation service.
//!
//! Per-certificate checks the chain builder composes: signature digest,
//! validity window, issuer relationship, CA capability and signing-certificate
//! suitability.

use crate::domain::crypto::{display_name, CertificateIdentity};
use crate::infra::error::{SigningError, SigningResult};
use der::asn1::ObjectIdentifier;
use der::Decode;
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::x509::{X509NameRef, X509Ref};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use x509_cert::ext::pkix::{BasicConstraints, ExtendedKeyUsage};
use x509_cert::Certificate;

const OID_BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");
const OID_EXTENDED_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37");
const OID_ANY_EXTENDED_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37.0");
const OID_CODE_SIGNING: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.3");

/// Where a certificate's validity window sits relative to a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidityStatus {
    Valid,
    Expired,
    NotYetValid,
}

#[derive(Debug, Clone)]
pub struct CertificateAnalysis {
    pub identity: CertificateIdentity,
    pub validity: ValidityStatus,
    pub days_until_expiry: i64,
    /// `None` when the certificate carries no extended key usage extension.
    pub has_code_signing_eku: Option<bool>,
    pub signature_digest: Option<String>,
    pub warnings: Vec<String>,
}

impl CertificateAnalysis {
    #[must_use]
    pub fn is_code_signing_suitable(&self) -> bool {
        self.validity == ValidityStatus::Valid && self.has_code_signing_eku != Some(false)
    }
}

pub struct CertificateValidator;

impl CertificateValidator {
    /// Analyse a signing certificate at `at`, collecting human readable warnings.
    pub fn analyze_signing_certificate(
        certificate: &X509Ref,
        at: &Asn1TimeRef,
        expiry_warning_days: u32,
    ) -> SigningResult<CertificateAnalysis> {
        let identity = CertificateIdentity::of(certificate);
        log::debug!("Analysing signing certificate {}", identity.subject);
        log::debug!("Certificate issuer: {}", identity.issuer);

        let mut analysis = CertificateAnalysis {
            validity: Self::check_validity(certificate, at)?,
            days_until_expiry: Self::days_until_expiry(certificate, at)?,
            has_code_signing_eku: Self::has_code_signing_eku(certificate)?,
            signature_digest: Self::signature_digest(certificate),
            warnings: Vec::new(),
            identity,
        };

        match analysis.validity {
            ValidityStatus::Expired => analysis
                .warnings
                .push("Certificate has expired".to_string()),
            ValidityStatus::NotYetValid => analysis
                .warnings
                .push("Certificate is not yet valid".to_string()),
            ValidityStatus::Valid if analysis.days_until_expiry < i64::from(expiry_warning_days) => {
                analysis.warnings.push(format!(
                    "Certificate expires in {} days",
                    analysis.days_until_expiry
                ));
            }
            ValidityStatus::Valid => {}
        }

        if analysis.has_code_signing_eku == Some(false) {
            analysis
                .warnings
                .push("Certificate lacks Code Signing Extended Key Usage".to_string());
        }

        if Self::is_self_signed(certificate) {
            analysis
                .warnings
                .push("Certificate is self-signed - may not be trusted by all systems".to_string());
        }

        Ok(analysis)
    }

    /// Lowercase short name of the digest used in the certificate's own
    /// signature (`sha256`, `sha1`, ...), or `None` for digest-less schemes.
    #[must_use]
    pub fn signature_digest(certificate: &X509Ref) -> Option<String> {
        let nid = certificate.signature_algorithm().object().nid();
        let algorithms = nid.signature_algorithms()?;
        algorithms
            .digest
            .short_name()
            .ok()
            .map(str::to_ascii_lowercase)
            .filter(|name| name != "undef")
    }

    /// True when the certificate's signature digest is in `disallowed`.
    #[must_use]
    pub fn uses_disallowed_digest(certificate: &X509Ref, disallowed: &[String]) -> Option<String> {
        let digest = Self::signature_digest(certificate)?;
        let normalized = digest.replace('-', "");
        disallowed
            .iter()
            .any(|d| d.trim().to_ascii_lowercase().replace('-', "") == normalized)
            .then_some(digest)
    }

    pub fn check_validity(certificate: &X509Ref, at: &Asn1TimeRef) -> SigningResult<ValidityStatus> {
        if certificate.not_before().compare(at)? == Ordering::Greater {
            return Ok(ValidityStatus::NotYetValid);
        }
        if certificate.not_after().compare(at)? == Ordering::Less {
            return Ok(ValidityStatus::Expired);
        }
        Ok(ValidityStatus::Valid)
    }

    /// Whole days from `at` until `notAfter`; negative once expired.
    pub fn days_until_expiry(certificate: &X509Ref, at: &Asn1TimeRef) -> SigningResult<i64> {
        let diff = at.diff(certificate.not_after())?;
        Ok(i64::from(diff.days))
    }

    /// Asn1 time for a unix timestamp.
    pub fn asn1_time(unix_seconds: i64) -> SigningResult<Asn1Time> {
        Ok(Asn1Time::from_unix(unix_seconds as _)?)
    }

    #[must_use]
    pub fn names_match(a: &X509NameRef, b: &X509NameRef) -> bool {
        matches!((a.to_der(), b.to_der()), (Ok(x), Ok(y)) if x == y)
    }

    /// True when `issuer`'s public key verifies `child`'s signature.
    #[must_use]
    pub fn verifies(issuer: &X509Ref, child: &X509Ref) -> bool {
        issuer
            .public_key()
            .and_then(|key| child.verify(&key))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn is_self_issued(certificate: &X509Ref) -> bool {
        Self::names_match(certificate.subject_name(), certificate.issuer_name())
    }

    #[must_use]
    pub fn is_self_signed(certificate: &X509Ref) -> bool {
        Self::is_self_issued(certificate) && Self::verifies(certificate, certificate)
    }

    /// `cA` flag from basic constraints; `None` when the extension is absent.
    pub fn is_certificate_authority(certificate: &X509Ref) -> SigningResult<Option<bool>> {
        let parsed = Self::parse(certificate)?;
        let Some(extension) = Self::find_extension(&parsed, &OID_BASIC_CONSTRAINTS) else {
            return Ok(None);
        };
        let constraints = BasicConstraints::from_der(extension)?;
        Ok(Some(constraints.ca))
    }

    /// Issuers must be CAs; version 1 certificates predate the extension.
    pub fn may_issue(certificate: &X509Ref) -> SigningResult<bool> {
        if certificate.version() == 0 {
            return Ok(true);
        }
        Ok(Self::is_certificate_authority(certificate)? == Some(true))
    }

    /// Code signing EKU presence; `None` when the extension is absent.
    pub fn has_code_signing_eku(certificate: &X509Ref) -> SigningResult<Option<bool>> {
        let parsed = Self::parse(certificate)?;
        let Some(extension) = Self::find_extension(&parsed, &OID_EXTENDED_KEY_USAGE) else {
            return Ok(None);
        };
        let usage = ExtendedKeyUsage::from_der(extension)?;
        Ok(Some(usage.0.iter().any(|oid| {
            *oid == OID_CODE_SIGNING || *oid == OID_ANY_EXTENDED_KEY_USAGE
        })))
    }

    /// SHA-256 fingerprint of the DER encoding.
    #[must_use]
    pub fn fingerprint(certificate: &X509Ref) -> Vec<u8> {
        let der = certificate.to_der().unwrap_or_default();
        Sha256::digest(&der).to_vec()
    }

    #[must_use]
    pub fn describe(certificate: &X509Ref) -> String {
        display_name(certificate.subject_name())
    }

    fn parse(certificate: &X509Ref) -> SigningResult<Certificate> {
        let der = certificate.to_der()?;
        Certificate::from_der(&der).map_err(|e| {
            SigningError::InvalidCertificate(format!(
                "{}: {e}",
                display_name(certificate.subject_name())
            ))
        })
    }

    fn find_extension<'a>(certificate: &'a Certificate, oid: &ObjectIdentifier) -> Option<&'a [u8]> {
        certificate
            .tbs_certificate
            .extensions
            .as_ref()?
            .iter()
            .find(|ext| ext.extn_id == *oid)
            .map(|ext| ext.extn_value.as_bytes())
    }
}
