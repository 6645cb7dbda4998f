use crate::domain::crypto::HashAlgorithm;
use crate::infra::error::{SigningError, SigningResult};
use openssl::pkey::{Id, PKey, Private};
use openssl::sign::Signer;
use openssl::x509::{X509NameRef, X509Ref, X509};
use sha2::{Digest, Sha256};
use std::fmt;

/// Private key capability attached to a signing certificate.
///
/// Implementations own the underlying key material; dropping the handle
/// releases it.
pub trait PrivateKeyHandle: Send + Sync {
    /// Short key algorithm name (`rsa`, `ec`, ...).
    fn algorithm(&self) -> &str;

    /// Sign `data` using `hash` as the message digest.
    ///
    /// # Errors
    ///
    /// Returns error if `hash` is `Unknown` or the key refuses the operation.
    fn sign(&self, data: &[u8], hash: HashAlgorithm) -> SigningResult<Vec<u8>>;
}

impl PrivateKeyHandle for PKey<Private> {
    fn algorithm(&self) -> &str {
        match self.id() {
            Id::RSA => "rsa",
            Id::EC => "ec",
            Id::ED25519 => "ed25519",
            Id::DSA => "dsa",
            _ => "other",
        }
    }

    fn sign(&self, data: &[u8], hash: HashAlgorithm) -> SigningResult<Vec<u8>> {
        let md = hash.message_digest().ok_or_else(|| {
            SigningError::invalid_argument("signature_hash_algorithm", "cannot sign with `unknown`")
        })?;
        let mut signer = Signer::new(md, self)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

/// Printable identity of a certificate, used in findings and errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertificateIdentity {
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    /// SHA-256 over the DER encoding, lowercase hex.
    pub fingerprint: String,
}

impl CertificateIdentity {
    #[must_use]
    pub fn of(certificate: &X509Ref) -> Self {
        let der = certificate.to_der().unwrap_or_default();
        let serial_number = certificate
            .serial_number()
            .to_bn()
            .ok()
            .and_then(|bn| bn.to_hex_str().ok().map(|s| s.to_ascii_lowercase()))
            .unwrap_or_default();
        Self {
            subject: display_name(certificate.subject_name()),
            issuer: display_name(certificate.issuer_name()),
            serial_number,
            fingerprint: hex::encode(Sha256::digest(&der)),
        }
    }
}

impl fmt::Display for CertificateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = &self.fingerprint[..self.fingerprint.len().min(16)];
        write!(f, "{} [{short}]", self.subject)
    }
}

/// Render a distinguished name as `CN=..., O=...`.
#[must_use]
pub fn display_name(name: &X509NameRef) -> String {
    let components: Vec<String> = name
        .entries()
        .map(|entry| {
            let key = entry.object().nid().short_name().unwrap_or("OID");
            let value = entry
                .data()
                .as_utf8()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| format!("0x{}", hex::encode(entry.data().as_slice())));
            format!("{key}={value}")
        })
        .collect();
    if components.is_empty() {
        "<empty name>".to_string()
    } else {
        components.join(", ")
    }
}

/// The certificate a request signs with, plus its optional private key.
pub struct SigningCertificate {
    certificate: X509,
    private_key: Option<Box<dyn PrivateKeyHandle>>,
}

impl SigningCertificate {
    #[must_use]
    pub fn new(certificate: X509) -> Self {
        Self {
            certificate,
            private_key: None,
        }
    }

    /// Parse a DER encoded certificate.
    pub fn from_der(der: &[u8]) -> SigningResult<Self> {
        if der.is_empty() {
            return Err(SigningError::InvalidCertificate(
                "certificate data is empty".to_string(),
            ));
        }
        let certificate = X509::from_der(der)
            .map_err(|e| SigningError::InvalidCertificate(format!("DER parse failed: {e}")))?;
        Ok(Self::new(certificate))
    }

    /// Parse the first certificate of a PEM document.
    pub fn from_pem(pem: &[u8]) -> SigningResult<Self> {
        let certificate = X509::from_pem(pem)
            .map_err(|e| SigningError::InvalidCertificate(format!("PEM parse failed: {e}")))?;
        Ok(Self::new(certificate))
    }

    #[must_use]
    pub fn with_private_key(mut self, key: impl PrivateKeyHandle + 'static) -> Self {
        self.private_key = Some(Box::new(key));
        self
    }

    pub fn set_private_key(&mut self, key: Box<dyn PrivateKeyHandle>) {
        self.private_key = Some(key);
    }

    #[must_use]
    pub fn x509(&self) -> &X509Ref {
        &self.certificate
    }

    #[must_use]
    pub fn private_key(&self) -> Option<&dyn PrivateKeyHandle> {
        self.private_key.as_deref()
    }

    #[must_use]
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    #[must_use]
    pub fn identity(&self) -> CertificateIdentity {
        CertificateIdentity::of(&self.certificate)
    }
}

impl fmt::Debug for SigningCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SigningCertificate(subject={}, private_key={})",
            display_name(self.certificate.subject_name()),
            self.private_key
                .as_deref()
                .map_or("none", |key| key.algorithm())
        )
    }
}

/// Ordered certificate chain: signing certificate first, trust anchor last.
#[derive(Clone)]
pub struct CertificateChain {
    certificates: Vec<X509>,
}

impl CertificateChain {
    pub(crate) fn new(certificates: Vec<X509>) -> Self {
        debug_assert!(!certificates.is_empty());
        Self { certificates }
    }

    #[must_use]
    pub fn leaf(&self) -> &X509Ref {
        &self.certificates[0]
    }

    /// The trust anchor the chain terminates at.
    #[must_use]
    pub fn root(&self) -> &X509Ref {
        &self.certificates[self.certificates.len() - 1]
    }

    /// Certificates strictly between leaf and root.
    #[must_use]
    pub fn intermediates(&self) -> &[X509] {
        match self.certificates.len() {
            0..=2 => &[],
            n => &self.certificates[1..n - 1],
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[X509] {
        &self.certificates
    }

    pub fn iter(&self) -> impl Iterator<Item = &X509Ref> {
        self.certificates.iter().map(|c| &**c)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    #[must_use]
    pub fn identities(&self) -> Vec<CertificateIdentity> {
        self.iter().map(CertificateIdentity::of).collect()
    }

    /// DER encodings in chain order, for embedding by the signer.
    pub fn to_der_list(&self) -> SigningResult<Vec<Vec<u8>>> {
        self.certificates
            .iter()
            .map(|c| c.to_der().map_err(SigningError::from))
            .collect()
    }
}

impl fmt::Debug for CertificateChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|c| display_name(c.subject_name())))
            .finish()
    }
}
