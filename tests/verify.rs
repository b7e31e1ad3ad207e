pub mod common;

use dkimflow::{
    crypto::SigningKey,
    session::{sign_message, verify_message, Status},
    signature::{Canonicalization, CanonicalizationAlgorithm, DkimSignatureError, DomainName,
        Selector, SignatureAlgorithm},
    signer::{BodyLength, SignRequest, Timestamp},
    verifier::{Config, PolicyError, SignatureFlags, VerifierError},
};
use std::{
    io::{self, ErrorKind},
    time::{Duration, UNIX_EPOCH},
};

fn rsa_request() -> SignRequest<SigningKey> {
    SignRequest::new(
        DomainName::new(common::TEST_DOMAIN).unwrap(),
        Selector::new(common::TEST_SELECTOR).unwrap(),
        SignatureAlgorithm::RsaSha256,
        common::rsa_signing_key(),
    )
}

fn ed25519_request() -> SignRequest<SigningKey> {
    SignRequest::new(
        DomainName::new(common::ED25519_DOMAIN).unwrap(),
        Selector::new(common::ED25519_SELECTOR).unwrap(),
        SignatureAlgorithm::Ed25519Sha256,
        common::ed25519_signing_key(),
    )
}

fn replace(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let i = haystack
        .windows(from.len())
        .position(|w| w == from)
        .unwrap();

    let mut out = Vec::with_capacity(haystack.len() - from.len() + to.len());
    out.extend_from_slice(&haystack[..i]);
    out.extend_from_slice(to);
    out.extend_from_slice(&haystack[(i + from.len())..]);
    out
}

#[test]
fn tampered_body_fails() {
    common::init_tracing();

    let mut signed = sign_message(rsa_request(), &common::message()).unwrap();
    signed.extend_from_slice(b"tampered content\r\n");

    let (status, results) = verify_message(common::test_key_lookup, &Config::default(), &signed);

    assert_eq!(status, Status::BadSignature);
    assert_eq!(results.len(), 1);
    assert!(results[0].flags.contains(SignatureFlags::BODY_HASH_MISMATCH));
    assert!(results[0].flags.contains(SignatureFlags::PROCESSED));
    assert_eq!(results[0].error, Some(VerifierError::BodyHashMismatch));
}

#[test]
fn tampered_signed_header_fails() {
    let signed = sign_message(rsa_request(), &common::message()).unwrap();
    let signed = replace(&signed, b"Subject: Fw:", b"Subject: Re:");

    let (status, results) = verify_message(common::test_key_lookup, &Config::default(), &signed);

    assert_eq!(status, Status::BadSignature);
    assert!(results[0].flags.contains(SignatureFlags::SIGNATURE_MISMATCH));
}

#[test]
fn header_canonicalization_distinguishes_whitespace() {
    // with simple canonicalization, extra whitespace in a signed header
    // breaks the signature; with relaxed it does not

    let signed = sign_message(rsa_request(), &common::message()).unwrap();
    let mutated = replace(&signed, b"Subject: Fw", b"Subject:  Fw");

    let (status, _) = verify_message(common::test_key_lookup, &Config::default(), &mutated);
    assert_eq!(status, Status::BadSignature);

    let mut request = rsa_request();
    request.canonicalization = Canonicalization {
        header: CanonicalizationAlgorithm::Relaxed,
        body: CanonicalizationAlgorithm::Relaxed,
    };

    let signed = sign_message(request, &common::message()).unwrap();
    let mutated = replace(&signed, b"Subject: Fw", b"Subject:  Fw");

    let (status, _) = verify_message(common::test_key_lookup, &Config::default(), &mutated);
    assert_eq!(status, Status::Ok);
}

#[test]
fn no_key_record_published() {
    let signed = sign_message(rsa_request(), &common::message()).unwrap();

    let lookup = |_: &str, _: &str| -> io::Result<Vec<u8>> { Err(ErrorKind::NotFound.into()) };

    let (status, results) = verify_message(lookup, &Config::default(), &signed);

    assert_eq!(status, Status::KeyUnavailable);
    assert!(results[0].flags.contains(SignatureFlags::KEY_UNAVAILABLE));
    assert_eq!(results[0].error, Some(VerifierError::NoKeyFound));
}

#[test]
fn key_lookup_failure() {
    let signed = sign_message(rsa_request(), &common::message()).unwrap();

    let lookup =
        |_: &str, _: &str| -> io::Result<Vec<u8>> { Err(ErrorKind::TimedOut.into()) };

    let (status, results) = verify_message(lookup, &Config::default(), &signed);

    assert_eq!(status, Status::KeyUnavailable);
    assert_eq!(results[0].error, Some(VerifierError::KeyLookup));
}

#[test]
fn multiple_signatures_verified_independently() {
    common::init_tracing();

    let signed = sign_message(rsa_request(), &common::message()).unwrap();
    let signed = sign_message(ed25519_request(), &signed).unwrap();

    let (status, results) = verify_message(common::test_key_lookup, &Config::default(), &signed);

    assert_eq!(status, Status::Ok);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.flags.contains(SignatureFlags::PASSED)));

    // one key unavailable does not impair the other signature
    let lookup = |selector: &str, domain: &str| -> io::Result<Vec<u8>> {
        if selector == common::TEST_SELECTOR && domain == common::TEST_DOMAIN {
            Ok(common::record_key_data(common::TEST_KEY_RECORD))
        } else {
            Err(ErrorKind::NotFound.into())
        }
    };

    let (status, results) = verify_message(lookup, &Config::default(), &signed);

    assert_eq!(status, Status::Ok);
    assert_eq!(results.len(), 2);
    assert!(results
        .iter()
        .any(|r| r.flags.contains(SignatureFlags::PASSED)));
    assert!(results
        .iter()
        .any(|r| r.flags.contains(SignatureFlags::KEY_UNAVAILABLE)));
}

#[test]
fn at_most_max_signatures_evaluated() {
    let signed = sign_message(rsa_request(), &common::message()).unwrap();
    let signed = sign_message(ed25519_request(), &signed).unwrap();

    let config = Config {
        max_signatures: 1,
        ..Default::default()
    };

    let (status, results) = verify_message(common::test_key_lookup, &config, &signed);

    assert_eq!(status, Status::Ok);
    assert_eq!(results.len(), 1);
}

#[test]
fn expired_signature_rejected() {
    let mut request = rsa_request();
    request.timestamp = Some(Timestamp::Exact(1_000_000));
    request.valid_duration = Some(Duration::from_secs(3600));

    let signed = sign_message(request, &common::message()).unwrap();

    let config = Config {
        fixed_system_time: Some(UNIX_EPOCH + Duration::from_secs(2_000_000)),
        ..Default::default()
    };

    let (status, results) = verify_message(common::test_key_lookup, &config, &signed);

    assert!(!status.is_ok());
    assert!(results[0].flags.contains(SignatureFlags::IGNORE));
    assert_eq!(
        results[0].error,
        Some(VerifierError::Policy(PolicyError::SignatureExpired))
    );

    // within the validity period the same signature passes
    let config = Config {
        fixed_system_time: Some(UNIX_EPOCH + Duration::from_secs(1_000_500)),
        ..Default::default()
    };

    let (status, _) = verify_message(common::test_key_lookup, &config, &signed);
    assert_eq!(status, Status::Ok);
}

#[test]
fn timestamp_in_future_rejected() {
    let mut request = rsa_request();
    request.timestamp = Some(Timestamp::Exact(3_000_000));
    request.valid_duration = None;

    let signed = sign_message(request, &common::message()).unwrap();

    let config = Config {
        fixed_system_time: Some(UNIX_EPOCH + Duration::from_secs(2_000_000)),
        ..Default::default()
    };

    let (status, results) = verify_message(common::test_key_lookup, &config, &signed);

    assert!(!status.is_ok());
    assert_eq!(
        results[0].error,
        Some(VerifierError::Policy(PolicyError::TimestampInFuture))
    );
}

#[test]
fn unsupported_algorithm_ignored() {
    let message = concat!(
        "DKIM-Signature: v=1; a=rsa-sha512; d=example.com; s=sel; h=From;\r\n",
        "\tbh=MTIz; b=MTIz\r\n",
        "From: Chocomoko <a@b.com>\r\n",
        "\r\n",
        "Hello!\r\n",
    );

    let (status, results) =
        verify_message(common::test_key_lookup, &Config::default(), message.as_bytes());

    assert_eq!(status, Status::UnsupportedAlgorithm);
    assert_eq!(results.len(), 1);
    assert!(results[0].flags.contains(SignatureFlags::IGNORE));
    assert!(!results[0].flags.contains(SignatureFlags::PROCESSED));
    assert_eq!(
        results[0].error,
        Some(VerifierError::SignatureFormat(
            DkimSignatureError::UnsupportedAlgorithm
        ))
    );
}

#[test]
fn unparseable_signature_header() {
    let message = concat!(
        "DKIM-Signature: not a tag list\r\n",
        "From: Chocomoko <a@b.com>\r\n",
        "\r\n",
        "Hello!\r\n",
    );

    let (status, results) =
        verify_message(common::test_key_lookup, &Config::default(), message.as_bytes());

    assert_eq!(status, Status::SyntaxError);
    assert!(results[0].flags.contains(SignatureFlags::SYNTAX_ERROR));
    assert_eq!(results[0].signature, None);
}

#[test]
fn partially_signed_body() {
    let mut request = rsa_request();
    request.body_length = BodyLength::MessageLength;

    let mut signed = sign_message(request, &common::message()).unwrap();
    signed.extend_from_slice(b"-- appended content, not covered --\r\n");

    // tolerated by default
    let (status, _) = verify_message(common::test_key_lookup, &Config::default(), &signed);
    assert_eq!(status, Status::Ok);

    // rejected when partially signed bodies are forbidden
    let config = Config {
        forbid_partially_signed_body: true,
        ..Default::default()
    };

    let (status, results) = verify_message(common::test_key_lookup, &config, &signed);

    assert!(!status.is_ok());
    assert_eq!(
        results[0].error,
        Some(VerifierError::Policy(PolicyError::ForbidPartiallySignedBody))
    );
}

#[test]
fn required_signed_headers_enforced() {
    let signed = sign_message(rsa_request(), &common::message()).unwrap();

    let config = Config {
        required_signed_headers: vec![dkimflow::FieldName::new("Message-ID").unwrap()],
        ..Default::default()
    };

    let (status, results) = verify_message(common::test_key_lookup, &config, &signed);

    assert!(!status.is_ok());
    assert_eq!(
        results[0].error,
        Some(VerifierError::Policy(PolicyError::RequiredHeadersNotSigned))
    );
}
