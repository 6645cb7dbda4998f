//! Shared fixtures for integration tests.
//!
//! Mints small EC P-256 certificate hierarchies with openssl and provides
//! collaborator stubs that count how often they are consulted.

#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage};
use openssl::x509::{X509Builder, X509NameBuilder, X509Ref, X509};
use package_signer::adapters::revocation::{RevocationChecker, RevocationSource, RevocationStatus};
use package_signer::adapters::timestamp::{TimestampRequest, TimestampToken, Timestamper};
use package_signer::{
    CertificateStore, HashAlgorithm, PrivateKeyHandle, SigningCertificate, SigningResult,
    TrustStore,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DAY: i64 = 24 * 60 * 60;

static SERIAL: AtomicU32 = AtomicU32::new(1000);

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as i64
}

pub fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("P-256 group");
    PKey::from_ec_key(EcKey::generate(&group).expect("EC key")).expect("PKey")
}

/// Shape of a certificate to mint.
#[derive(Clone)]
pub struct CertOptions {
    pub ca: bool,
    pub code_signing: bool,
    pub digest: MessageDigest,
    /// Offsets from now, in seconds.
    pub not_before: i64,
    pub not_after: i64,
}

impl CertOptions {
    pub fn ca() -> Self {
        Self {
            ca: true,
            code_signing: false,
            digest: MessageDigest::sha256(),
            not_before: -DAY,
            not_after: 365 * DAY,
        }
    }

    pub fn leaf() -> Self {
        Self {
            ca: false,
            code_signing: true,
            ..Self::ca()
        }
    }

    pub fn digest(mut self, digest: MessageDigest) -> Self {
        self.digest = digest;
        self
    }

    pub fn validity(mut self, not_before: i64, not_after: i64) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }
}

/// A certificate together with the key it certifies.
#[derive(Clone)]
pub struct Issued {
    pub cert: X509,
    pub key: PKey<Private>,
}

/// Mint a certificate for `cn`, signed by `issuer` or self-signed.
pub fn issue(cn: &str, issuer: Option<&Issued>, options: &CertOptions) -> Issued {
    let key = ec_key();
    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_text("CN", cn).expect("CN");
    name.append_entry_by_text("O", "Package Signer Tests").expect("O");
    let name = name.build();

    let mut builder = X509Builder::new().expect("X509 builder");
    builder.set_version(2).expect("version");
    let serial = BigNum::from_u32(SERIAL.fetch_add(1, Ordering::Relaxed))
        .and_then(|bn| bn.to_asn1_integer())
        .expect("serial");
    builder.set_serial_number(&serial).expect("serial");
    builder.set_subject_name(&name).expect("subject");
    match issuer {
        Some(issuer) => builder
            .set_issuer_name(issuer.cert.subject_name())
            .expect("issuer"),
        None => builder.set_issuer_name(&name).expect("issuer"),
    }
    let start = Asn1Time::from_unix(now() + options.not_before).expect("not before");
    let end = Asn1Time::from_unix(now() + options.not_after).expect("not after");
    builder.set_not_before(&start).expect("not before");
    builder.set_not_after(&end).expect("not after");
    builder.set_pubkey(&key).expect("pubkey");

    if options.ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().expect("bc"))
            .expect("bc");
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .expect("ku"),
            )
            .expect("ku");
    } else {
        builder
            .append_extension(BasicConstraints::new().build().expect("bc"))
            .expect("bc");
    }
    if options.code_signing {
        builder
            .append_extension(ExtendedKeyUsage::new().code_signing().build().expect("eku"))
            .expect("eku");
    }

    let signing_key = issuer.map_or(&key, |issuer| &issuer.key);
    builder.sign(signing_key, options.digest).expect("sign");
    Issued {
        cert: builder.build(),
        key,
    }
}

/// Root, intermediate and leaf.
pub struct Pki {
    pub root: Issued,
    pub intermediate: Issued,
    pub leaf: Issued,
}

impl Pki {
    pub fn new() -> Self {
        Self::with(CertOptions::ca(), CertOptions::leaf())
    }

    /// Intermediate signed by the root with SHA-1.
    pub fn with_weak_intermediate() -> Self {
        Self::with(CertOptions::ca().digest(MessageDigest::sha1()), CertOptions::leaf())
    }

    pub fn with_expired_leaf() -> Self {
        Self::with(
            CertOptions::ca(),
            CertOptions::leaf().validity(-30 * DAY, -DAY),
        )
    }

    pub fn with_expired_intermediate() -> Self {
        Self::with(
            CertOptions::ca().validity(-30 * DAY, -DAY),
            CertOptions::leaf(),
        )
    }

    /// Root self-signed with SHA-1.
    pub fn with_weak_root() -> Self {
        Self::with_root(
            CertOptions::ca()
                .digest(MessageDigest::sha1())
                .validity(-DAY, 3650 * DAY),
            CertOptions::ca(),
            CertOptions::leaf(),
        )
    }

    pub fn with(intermediate: CertOptions, leaf: CertOptions) -> Self {
        Self::with_root(
            CertOptions::ca().validity(-DAY, 3650 * DAY),
            intermediate,
            leaf,
        )
    }

    pub fn with_root(root: CertOptions, intermediate: CertOptions, leaf: CertOptions) -> Self {
        let root = issue("Test Root CA", None, &root);
        let intermediate = issue("Test Intermediate CA", Some(&root), &intermediate);
        let leaf = issue("Test Package Author", Some(&intermediate), &leaf);
        Self {
            root,
            intermediate,
            leaf,
        }
    }

    /// Store trusting only this hierarchy's root.
    pub fn trust_store(&self) -> CertificateStore {
        let mut store = CertificateStore::new();
        store.add_anchor(self.root.cert.clone());
        store
    }

    pub fn signing_certificate(&self) -> SigningCertificate {
        SigningCertificate::new(self.leaf.cert.clone())
    }
}

/// Trust store wrapper counting every query.
pub struct CountingTrustStore {
    inner: CertificateStore,
    issuer_lookups: AtomicUsize,
    anchor_checks: AtomicUsize,
}

impl CountingTrustStore {
    pub fn new(inner: CertificateStore) -> Self {
        Self {
            inner,
            issuer_lookups: AtomicUsize::new(0),
            anchor_checks: AtomicUsize::new(0),
        }
    }

    pub fn issuer_lookups(&self) -> usize {
        self.issuer_lookups.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.issuer_lookups() + self.anchor_checks.load(Ordering::SeqCst)
    }
}

impl TrustStore for CountingTrustStore {
    fn find_issuers(&self, certificate: &X509Ref) -> SigningResult<Vec<X509>> {
        self.issuer_lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_issuers(certificate)
    }

    fn is_trust_anchor(&self, certificate: &X509Ref) -> bool {
        self.anchor_checks.fetch_add(1, Ordering::SeqCst);
        self.inner.is_trust_anchor(certificate)
    }
}

/// Revocation checker answering fixed statuses per source.
pub struct ScriptedRevocationChecker {
    online: RevocationStatus,
    cache: RevocationStatus,
    calls: Mutex<Vec<RevocationSource>>,
}

impl ScriptedRevocationChecker {
    pub fn new(online: RevocationStatus, cache: RevocationStatus) -> Self {
        Self {
            online,
            cache,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn good() -> Self {
        Self::new(RevocationStatus::Good, RevocationStatus::Good)
    }

    pub fn unreachable() -> Self {
        let unavailable = RevocationStatus::Unavailable {
            reason: "responder unreachable".to_string(),
        };
        Self::new(unavailable.clone(), unavailable)
    }

    pub fn calls(&self) -> Vec<RevocationSource> {
        self.calls.lock().expect("calls").clone()
    }
}

impl RevocationChecker for ScriptedRevocationChecker {
    fn check(
        &self,
        _certificate: &X509Ref,
        _issuer: &X509Ref,
        source: RevocationSource,
    ) -> RevocationStatus {
        self.calls.lock().expect("calls").push(source);
        match source {
            RevocationSource::Online => self.online.clone(),
            RevocationSource::Cache => self.cache.clone(),
        }
    }
}

/// Key handle that counts how many times it has been released.
pub struct TrackedKey {
    key: PKey<Private>,
    released: Arc<AtomicUsize>,
}

impl TrackedKey {
    pub fn new(key: PKey<Private>) -> (Self, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        (
            Self {
                key,
                released: Arc::clone(&released),
            },
            released,
        )
    }
}

impl PrivateKeyHandle for TrackedKey {
    fn algorithm(&self) -> &str {
        PrivateKeyHandle::algorithm(&self.key)
    }

    fn sign(&self, data: &[u8], hash: HashAlgorithm) -> SigningResult<Vec<u8>> {
        PrivateKeyHandle::sign(&self.key, data, hash)
    }
}

impl Drop for TrackedKey {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Timestamper returning a fixed token and remembering the last request.
#[derive(Default)]
pub struct RecordingTimestamper {
    pub last: Mutex<Option<TimestampRequest>>,
    pub token: Vec<u8>,
}

impl Timestamper for RecordingTimestamper {
    fn timestamp(&self, request: &TimestampRequest) -> SigningResult<TimestampToken> {
        *self.last.lock().expect("last") = Some(request.clone());
        Ok(TimestampToken::from_der(self.token.clone()))
    }
}
