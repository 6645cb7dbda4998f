//! Chain building: order, memoization, policy rules and collaborators.

mod common;

use common::{issue, CertOptions, CountingTrustStore, Pki, ScriptedRevocationChecker, DAY};
use openssl::x509::X509;
use package_signer::adapters::revocation::{RevocationMode, RevocationSource, RevocationStatus};
use package_signer::config::ChainPolicy;
use package_signer::telemetry::MemoryTelemetrySink;
use package_signer::{
    CertificateStore, ChainBuilder, ChainRule, CollectingFindingSink, HashAlgorithm,
    LogFindingSink, Severity, SigningError, SigningRequest, TrustStore,
};
use std::sync::Arc;
use std::thread;

fn request_for(pki: &Pki, additional: &[&X509]) -> SigningRequest {
    let mut request = SigningRequest::author(
        pki.signing_certificate(),
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha256,
    )
    .expect("valid request");
    request.extend_additional_certificates(additional.iter().map(|c| (*c).clone()));
    request
}

fn no_revocation() -> ChainPolicy {
    ChainPolicy {
        revocation_mode: RevocationMode::NoCheck,
        ..ChainPolicy::default()
    }
}

fn failure(err: &SigningError) -> (&str, ChainRule) {
    match err {
        SigningError::ChainBuild {
            certificate, rule, ..
        } => (certificate.as_str(), *rule),
        other => panic!("expected a chain-build error, got {other:?}"),
    }
}

fn der(cert: &X509) -> Vec<u8> {
    cert.to_der().unwrap()
}

#[test]
fn builds_leaf_intermediate_root_in_order() {
    let pki = Pki::new();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let builder = ChainBuilder::new(Arc::new(pki.trust_store())).with_policy(no_revocation());

    let chain = builder
        .build_chain_once(&request, &LogFindingSink)
        .expect("chain builds");

    let ders: Vec<Vec<u8>> = chain.as_slice().iter().map(der).collect();
    assert_eq!(
        ders,
        vec![
            der(&pki.leaf.cert),
            der(&pki.intermediate.cert),
            der(&pki.root.cert)
        ]
    );
    assert_eq!(der(&chain.leaf().to_owned()), der(&pki.leaf.cert));
    assert_eq!(der(&chain.root().to_owned()), der(&pki.root.cert));
    assert_eq!(chain.intermediates().len(), 1);
    assert!(request.is_chain_built());
}

#[test]
fn intermediates_can_come_from_the_trust_store() {
    let pki = Pki::new();
    let mut store = pki.trust_store();
    store.add_intermediate(pki.intermediate.cert.clone());
    let request = request_for(&pki, &[]);

    let chain = ChainBuilder::new(Arc::new(store))
        .with_policy(no_revocation())
        .build_chain_once(&request, &LogFindingSink)
        .expect("chain builds");
    assert_eq!(chain.len(), 3);
}

#[test]
fn second_build_returns_cached_chain_without_queries() {
    let pki = Pki::new();
    let store = Arc::new(CountingTrustStore::new(pki.trust_store()));
    let revocation = Arc::new(ScriptedRevocationChecker::good());
    let builder = ChainBuilder::new(Arc::clone(&store) as Arc<dyn TrustStore>)
        .with_revocation_checker(revocation.clone());
    let request = request_for(&pki, &[&pki.intermediate.cert]);

    let first = builder.build_chain_once(&request, &LogFindingSink).unwrap();
    let store_queries = store.queries();
    let revocation_calls = revocation.calls().len();
    assert!(store_queries > 0);
    assert_eq!(revocation_calls, 2);

    let second = builder.build_chain_once(&request, &LogFindingSink).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &request.chain().unwrap()));
    assert_eq!(store.queries(), store_queries);
    assert_eq!(revocation.calls().len(), revocation_calls);
}

#[test]
fn cached_chain_ignores_later_changes() {
    let pki = Pki::new();
    let mut request = request_for(&pki, &[&pki.intermediate.cert]);
    let builder = ChainBuilder::new(Arc::new(pki.trust_store())).with_policy(no_revocation());
    let first = builder.build_chain_once(&request, &LogFindingSink).unwrap();

    request.additional_certificates_mut().clear();
    let strict = ChainBuilder::new(Arc::new(CertificateStore::new())).with_policy(no_revocation());
    let second = strict.build_chain_once(&request, &LogFindingSink).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn concurrent_builds_share_one_chain() {
    let pki = Pki::new();
    let revocation = Arc::new(ScriptedRevocationChecker::good());
    let builder = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_revocation_checker(revocation.clone());
    let request = request_for(&pki, &[&pki.intermediate.cert]);

    let (builder, request) = (&builder, &request);
    let chains: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(move |_| {
                scope.spawn(move || builder.build_chain_once(request, &LogFindingSink).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for chain in &chains[1..] {
        assert!(Arc::ptr_eq(&chains[0], chain));
    }
    assert_eq!(revocation.calls().len(), 2, "exactly one build ran");
}

#[test]
fn duplicate_additional_certificates_are_ignored() {
    let pki = Pki::new();
    let request = request_for(
        &pki,
        &[
            &pki.leaf.cert,
            &pki.intermediate.cert,
            &pki.intermediate.cert,
            &pki.root.cert,
        ],
    );
    let chain = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(no_revocation())
        .build_chain_once(&request, &LogFindingSink)
        .unwrap();
    assert_eq!(chain.len(), 3);
}

#[test]
fn weak_intermediate_digest_names_the_intermediate() {
    let pki = Pki::with_weak_intermediate();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let err = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(no_revocation())
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();

    let (certificate, rule) = failure(&err);
    assert_eq!(rule, ChainRule::WeakSignatureDigest);
    assert!(certificate.contains("Test Intermediate CA"), "{certificate}");
    assert!(!request.is_chain_built());
}

#[test]
fn expired_leaf_names_the_leaf() {
    let pki = Pki::with_expired_leaf();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let err = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(no_revocation())
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();

    let (certificate, rule) = failure(&err);
    assert_eq!(rule, ChainRule::Expired);
    assert!(certificate.contains("Test Package Author"), "{certificate}");
    assert!(request.chain().is_none());
}

#[test]
fn verification_time_before_validity_is_rejected() {
    let pki = Pki::new();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let err = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(no_revocation())
        .at_time(common::now() - 10 * DAY)
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();
    assert_eq!(failure(&err).1, ChainRule::NotYetValid);
}

#[test]
fn expired_leaf_valid_at_signing_time_builds() {
    let pki = Pki::with_root(
        CertOptions::ca().validity(-90 * DAY, 3650 * DAY),
        CertOptions::ca().validity(-60 * DAY, 365 * DAY),
        CertOptions::leaf().validity(-30 * DAY, -DAY),
    );
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let findings = CollectingFindingSink::new();

    let chain = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(no_revocation())
        .at_time(common::now() - 10 * DAY)
        .build_chain_once(&request, &findings)
        .expect("leaf was valid when signed");
    assert_eq!(chain.len(), 3);
    assert_eq!(findings.count_at_least(Severity::Error), 0);

    let err = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(no_revocation())
        .build_chain(&pki.leaf.cert, &[pki.intermediate.cert.clone()], &LogFindingSink)
        .unwrap_err();
    assert_eq!(failure(&err).1, ChainRule::Expired);
}

#[test]
fn weak_self_signed_anchor_is_exempt_by_default() {
    let pki = Pki::with_weak_root();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let chain = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(no_revocation())
        .build_chain_once(&request, &LogFindingSink)
        .expect("anchor self-signature is not checked");
    assert_eq!(chain.len(), 3);
}

#[test]
fn weak_anchor_digest_fails_when_configured() {
    let pki = Pki::with_weak_root();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let policy = ChainPolicy {
        check_anchor_digest: true,
        ..no_revocation()
    };
    let err = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(policy)
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();

    let (certificate, rule) = failure(&err);
    assert_eq!(rule, ChainRule::WeakSignatureDigest);
    assert!(certificate.contains("Test Root CA"), "{certificate}");
}

#[test]
fn weak_untrusted_root_is_not_exempt() {
    let pki = Pki::with_weak_root();
    let request = request_for(&pki, &[&pki.intermediate.cert, &pki.root.cert]);
    let policy = ChainPolicy {
        allow_untrusted_root: true,
        ..no_revocation()
    };
    let err = ChainBuilder::new(Arc::new(CertificateStore::new()))
        .with_policy(policy)
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();
    assert_eq!(failure(&err).1, ChainRule::WeakSignatureDigest);
}

#[test]
fn expired_intermediate_is_a_warning_by_default() {
    let pki = Pki::with_expired_intermediate();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let findings = CollectingFindingSink::new();

    ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(no_revocation())
        .build_chain_once(&request, &findings)
        .expect("expired intermediate is not fatal");

    let expired: Vec<_> = findings
        .findings()
        .into_iter()
        .filter(|f| f.message.contains("expired"))
        .collect();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].severity, Severity::Warning);
    assert!(expired[0]
        .certificate
        .as_ref()
        .unwrap()
        .subject
        .contains("Test Intermediate CA"));
}

#[test]
fn expired_intermediate_is_fatal_when_configured() {
    let pki = Pki::with_expired_intermediate();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let policy = ChainPolicy {
        expired_intermediate_severity: Severity::Error,
        ..no_revocation()
    };
    let err = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(policy)
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();

    let (certificate, rule) = failure(&err);
    assert_eq!(rule, ChainRule::Expired);
    assert!(certificate.contains("Test Intermediate CA"));
}

#[test]
fn missing_intermediate_can_be_added_and_retried() {
    let pki = Pki::new();
    let mut request = request_for(&pki, &[]);
    let builder = ChainBuilder::new(Arc::new(pki.trust_store())).with_policy(no_revocation());

    let err = builder
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();
    let (certificate, rule) = failure(&err);
    assert_eq!(rule, ChainRule::IssuerNotFound);
    assert!(certificate.contains("Test Package Author"));
    assert!(!request.is_chain_built());

    request.add_additional_certificate(pki.intermediate.cert.clone());
    let chain = builder
        .build_chain_once(&request, &LogFindingSink)
        .expect("retry succeeds");
    assert_eq!(chain.len(), 3);
}

#[test]
fn issuer_with_wrong_key_is_rejected() {
    let pki = Pki::new();
    let impostor = Pki::new();
    // Same subject name, different key.
    let request = request_for(&pki, &[&impostor.intermediate.cert]);
    let err = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(no_revocation())
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();
    assert_eq!(failure(&err).1, ChainRule::IssuerSignature);
}

#[test]
fn non_ca_issuer_is_rejected() {
    let pki = Pki::new();
    let sub = issue("Issued By Leaf", Some(&pki.leaf), &CertOptions::leaf());
    let mut request = SigningRequest::author(
        package_signer::SigningCertificate::new(sub.cert.clone()),
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha256,
    )
    .unwrap();
    request.extend_additional_certificates([pki.leaf.cert.clone(), pki.intermediate.cert.clone()]);

    let err = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(no_revocation())
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();
    let (certificate, rule) = failure(&err);
    assert_eq!(rule, ChainRule::NotCertificateAuthority);
    assert!(certificate.contains("Test Package Author"));
}

#[test]
fn self_signed_root_must_be_a_trust_anchor() {
    let pki = Pki::new();
    let request = request_for(&pki, &[&pki.intermediate.cert, &pki.root.cert]);
    let err = ChainBuilder::new(Arc::new(CertificateStore::new()))
        .with_policy(no_revocation())
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();
    let (certificate, rule) = failure(&err);
    assert_eq!(rule, ChainRule::UntrustedRoot);
    assert!(certificate.contains("Test Root CA"));
}

#[test]
fn untrusted_root_can_be_allowed_with_a_warning() {
    let pki = Pki::new();
    let request = request_for(&pki, &[&pki.intermediate.cert, &pki.root.cert]);
    let findings = CollectingFindingSink::new();
    let policy = ChainPolicy {
        allow_untrusted_root: true,
        ..no_revocation()
    };

    let chain = ChainBuilder::new(Arc::new(CertificateStore::new()))
        .with_policy(policy)
        .build_chain_once(&request, &findings)
        .unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(findings.count_at_least(Severity::Warning), 1);
}

#[test]
fn chain_longer_than_policy_is_rejected() {
    let pki = Pki::new();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let policy = ChainPolicy {
        max_chain_depth: 2,
        ..no_revocation()
    };
    let err = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(policy)
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();
    assert_eq!(failure(&err).1, ChainRule::PathTooLong);
}

#[test]
fn revoked_certificate_is_fatal() {
    let pki = Pki::new();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let revocation = Arc::new(ScriptedRevocationChecker::new(
        RevocationStatus::Revoked {
            reason: "key compromise".to_string(),
        },
        RevocationStatus::Good,
    ));
    let err = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_revocation_checker(revocation)
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();

    let (certificate, rule) = failure(&err);
    assert_eq!(rule, ChainRule::Revoked);
    assert!(certificate.contains("Test Package Author"));
}

#[test]
fn online_failure_falls_back_to_cache() {
    let pki = Pki::new();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let revocation = Arc::new(ScriptedRevocationChecker::new(
        RevocationStatus::Unavailable {
            reason: "timeout".to_string(),
        },
        RevocationStatus::Good,
    ));
    let findings = CollectingFindingSink::new();
    ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_revocation_checker(revocation.clone())
        .build_chain_once(&request, &findings)
        .unwrap();

    assert_eq!(
        revocation.calls(),
        vec![
            RevocationSource::Online,
            RevocationSource::Cache,
            RevocationSource::Online,
            RevocationSource::Cache
        ]
    );
    assert_eq!(findings.count_at_least(Severity::Warning), 0);
}

#[test]
fn offline_mode_only_consults_the_cache() {
    let pki = Pki::new();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let revocation = Arc::new(ScriptedRevocationChecker::good());
    let policy = ChainPolicy {
        revocation_mode: RevocationMode::Offline,
        ..ChainPolicy::default()
    };
    ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(policy)
        .with_revocation_checker(revocation.clone())
        .build_chain_once(&request, &LogFindingSink)
        .unwrap();
    assert!(revocation
        .calls()
        .iter()
        .all(|source| *source == RevocationSource::Cache));
}

#[test]
fn unreachable_revocation_is_a_warning() {
    let pki = Pki::new();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let findings = CollectingFindingSink::new();
    ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_revocation_checker(Arc::new(ScriptedRevocationChecker::unreachable()))
        .build_chain_once(&request, &findings)
        .expect("non-strict revocation degrades to warnings");

    let warnings: Vec<_> = findings
        .findings()
        .into_iter()
        .filter(|f| f.message.contains("revocation"))
        .collect();
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().all(|f| f.severity == Severity::Warning));
}

#[test]
fn unreachable_revocation_fails_when_strict() {
    let pki = Pki::new();
    let request = request_for(&pki, &[&pki.intermediate.cert]);
    let policy = ChainPolicy {
        strict_revocation: true,
        ..ChainPolicy::default()
    };
    let err = ChainBuilder::new(Arc::new(pki.trust_store()))
        .with_policy(policy)
        .with_revocation_checker(Arc::new(ScriptedRevocationChecker::unreachable()))
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();

    match err {
        SigningError::RevocationUnavailable { certificate, .. } => {
            assert!(certificate.contains("Test Package Author"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!request.is_chain_built());
}

#[test]
fn chain_build_emits_telemetry() {
    let pki = Pki::new();
    let request = request_for(&pki, &[]);
    let mut store = pki.trust_store();
    store.add_intermediate(pki.intermediate.cert.clone());
    let sink = Arc::new(MemoryTelemetrySink::new());

    ChainBuilder::new(Arc::new(store))
        .with_revocation_checker(Arc::new(ScriptedRevocationChecker::good()))
        .with_telemetry(sink.clone())
        .build_chain_once(&request, &LogFindingSink)
        .unwrap();

    let events = sink.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.name, "chain_build");
    assert_eq!(event.get("chain_length"), Some(&serde_json::Value::from(3)));
    for key in ["start_time", "end_time", "duration", "trust_store_lookup", "revocation_check"] {
        assert!(event.get(key).is_some(), "missing {key}");
    }
}

#[test]
fn disposed_request_cannot_be_built() {
    let pki = Pki::new();
    let mut request = request_for(&pki, &[&pki.intermediate.cert]);
    request.dispose();
    let err = ChainBuilder::new(Arc::new(pki.trust_store()))
        .build_chain_once(&request, &LogFindingSink)
        .unwrap_err();
    assert!(matches!(err, SigningError::DisposedResource(_)));
}
