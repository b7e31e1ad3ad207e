pub mod common;

use dkimflow::{
    session::{sign_message, verify_message, Status},
    signature::{Canonicalization, CanonicalizationAlgorithm, DomainName, Selector,
        SignatureAlgorithm},
    signer::{SignRequest, SignSession},
    verifier::{Config, SignatureFlags, VerifySession},
};

fn relaxed_relaxed() -> Canonicalization {
    use CanonicalizationAlgorithm::*;
    Canonicalization { header: Relaxed, body: Relaxed }
}

fn make_rsa_sha1_request() -> SignRequest<dkimflow::SigningKey> {
    let mut request = SignRequest::new(
        DomainName::new(common::TEST_DOMAIN).unwrap(),
        Selector::new(common::TEST_SELECTOR).unwrap(),
        SignatureAlgorithm::RsaSha1,
        common::rsa_signing_key(),
    );
    request.canonicalization = relaxed_relaxed();
    request
}

#[test]
fn sign_and_verify() {
    common::init_tracing();

    // sign the message step by step

    let mut signer = SignSession::new(make_rsa_sha1_request()).unwrap();

    for (name, value) in common::message_headers() {
        assert_eq!(signer.feed_header(format!("{name}: {value}\r\n")), Status::Ok);
    }
    assert_eq!(signer.end_of_headers(), Status::Ok);
    assert_eq!(signer.body_chunk(common::MESSAGE_BODY.as_bytes()), Status::Ok);
    assert_eq!(signer.end_of_message(), Status::Ok);

    let value = signer.signature_header_value().unwrap();
    assert!(value.trim_start().starts_with("v=1"));

    // verify the same message with the produced signature header attached

    let mut verifier = VerifySession::new(common::test_key_lookup, Config::default());

    assert_eq!(
        verifier.feed_header(format!("DKIM-Signature:{value}\r\n")),
        Status::Ok
    );
    for (name, value) in common::message_headers() {
        assert_eq!(verifier.feed_header(format!("{name}: {value}\r\n")), Status::Ok);
    }
    assert_eq!(verifier.end_of_headers(), Status::Ok);
    assert_eq!(verifier.body_chunk(common::MESSAGE_BODY.as_bytes()), Status::Ok);
    assert_eq!(verifier.end_of_message(), Status::Ok);

    let results = verifier.results();
    assert_eq!(results.len(), 1);

    let result = &results[0];
    assert!(result.flags.contains(SignatureFlags::PROCESSED));
    assert!(result.flags.contains(SignatureFlags::PASSED));
    assert!(!result.flags.contains(SignatureFlags::IGNORE));
    assert_eq!(result.error, None);

    let sig = result.signature.as_ref().unwrap();
    assert_eq!(sig.domain, DomainName::new(common::TEST_DOMAIN).unwrap());
    assert_eq!(sig.algorithm, SignatureAlgorithm::RsaSha1);
}

#[test]
fn sign_and_verify_whole_message() {
    common::init_tracing();

    let message = common::message();

    // the unsigned message reports no signature
    let (status, results) = verify_message(common::test_key_lookup, &Config::default(), &message);
    assert_eq!(status, Status::NoSignature);
    assert!(results.is_empty());

    let signed = sign_message(make_rsa_sha1_request(), &message).unwrap();

    let signed_str = String::from_utf8_lossy(&signed);
    assert!(signed_str.starts_with("DKIM-Signature: v=1"));

    let (status, results) = verify_message(common::test_key_lookup, &Config::default(), &signed);
    assert_eq!(status, Status::Ok);
    assert_eq!(results.len(), 1);
    assert!(results[0].flags.contains(SignatureFlags::PASSED));
}

#[test]
fn message_without_separator_is_syntax_error() {
    let message = b"From: me <a@b.com>\r\nTo: you <b@c.com>\r\n";

    assert_eq!(
        sign_message(make_rsa_sha1_request(), message).err(),
        Some(Status::SyntaxError)
    );

    let (status, results) = verify_message(common::test_key_lookup, &Config::default(), message);
    assert_eq!(status, Status::SyntaxError);
    assert!(results.is_empty());
}

#[test]
fn transitions_out_of_order_are_violations() {
    let mut verifier = VerifySession::new(common::test_key_lookup, Config::default());

    // body before headers have ended
    assert_eq!(verifier.body_chunk(b"Hello!\r\n"), Status::StateViolation);

    // a violation is fatal; the session accepts nothing further
    assert_eq!(verifier.feed_header(b"From: me <a@b.com>\r\n"), Status::StateViolation);
    assert_eq!(verifier.end_of_headers(), Status::StateViolation);
    assert_eq!(verifier.end_of_message(), Status::StateViolation);

    let mut signer = SignSession::new(make_rsa_sha1_request()).unwrap();
    assert_eq!(signer.end_of_message(), Status::StateViolation);
}

#[test]
fn status_is_ok() {
    assert!(Status::Ok.is_ok());
    assert!(!Status::BadSignature.is_ok());
    assert!(!Status::NoSignature.is_ok());
}
