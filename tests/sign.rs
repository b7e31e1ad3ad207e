pub mod common;

use dkimflow::{
    header::FieldName,
    session::Status,
    signature::{DkimSignature, DomainName, Selector, SignatureAlgorithm},
    signer::{BodyLength, HeaderSelection, SignRequest, SignSession, SignerError, Timestamp},
};
use std::time::Duration;

fn make_request() -> SignRequest<dkimflow::SigningKey> {
    SignRequest::new(
        DomainName::new(common::TEST_DOMAIN).unwrap(),
        Selector::new(common::TEST_SELECTOR).unwrap(),
        SignatureAlgorithm::RsaSha256,
        common::rsa_signing_key(),
    )
}

fn run_signer(mut session: SignSession<dkimflow::SigningKey>) -> SignSession<dkimflow::SigningKey> {
    for (name, value) in common::message_headers() {
        assert_eq!(session.feed_header(format!("{name}: {value}\r\n")), Status::Ok);
    }
    assert_eq!(session.end_of_headers(), Status::Ok);
    assert_eq!(session.body_chunk(common::MESSAGE_BODY.as_bytes()), Status::Ok);
    assert_eq!(session.end_of_message(), Status::Ok);
    session
}

#[test]
fn produced_signature_parses_back() {
    common::init_tracing();

    let mut request = make_request();
    request.timestamp = Some(Timestamp::Exact(1686737001));
    request.valid_duration = Some(Duration::from_secs(60 * 60 * 24));

    let session = run_signer(SignSession::new(request).unwrap());

    let value = session.signature_header_value().unwrap();
    let sig: DkimSignature = value.parse().unwrap();

    assert_eq!(sig.algorithm, SignatureAlgorithm::RsaSha256);
    assert_eq!(sig.domain, DomainName::new(common::TEST_DOMAIN).unwrap());
    assert_eq!(sig.selector, Selector::new(common::TEST_SELECTOR).unwrap());
    assert_eq!(sig.timestamp, Some(1686737001));
    assert_eq!(sig.expiration, Some(1686737001 + 60 * 60 * 24));
    assert_eq!(sig.body_length, None);
    assert!(sig.signed_headers.contains(&FieldName::new("From").unwrap()));
    assert!(!sig.signature_data.is_empty());

    assert_eq!(Some(&sig), session.signature());
}

#[test]
fn signed_headers_follow_selection() {
    let mut request = make_request();
    request.header_selection = HeaderSelection::Manual(
        ["From", "To", "Subject"]
            .into_iter()
            .map(|n| FieldName::new(n).unwrap())
            .collect(),
    );

    let session = run_signer(SignSession::new(request).unwrap());

    let sig = session.signature().unwrap();
    let names: Vec<_> = sig.signed_headers.iter().map(|n| n.as_ref()).collect();
    assert_eq!(names, ["From", "To", "Subject"]);
}

#[test]
fn body_length_of_message() {
    let mut request = make_request();
    request.body_length = BodyLength::MessageLength;

    let session = run_signer(SignSession::new(request).unwrap());

    let sig = session.signature().unwrap();
    assert_eq!(sig.body_length, Some(common::MESSAGE_BODY.len() as u64));
}

#[test]
fn body_shorter_than_exact_length() {
    let mut request = make_request();
    request.body_length = BodyLength::Exact(10_000);

    let mut session = SignSession::new(request).unwrap();
    for (name, value) in common::message_headers() {
        assert_eq!(session.feed_header(format!("{name}: {value}\r\n")), Status::Ok);
    }
    assert_eq!(session.end_of_headers(), Status::Ok);
    assert_eq!(session.body_chunk(common::MESSAGE_BODY.as_bytes()), Status::Ok);

    assert_eq!(session.end_of_message(), Status::SyntaxError);
    assert_eq!(session.error(), Some(&SignerError::InsufficientBodyLength));
    assert_eq!(session.signature_header_value(), None);
}

#[test]
fn missing_from_header_is_fatal() {
    let mut session = SignSession::new(make_request()).unwrap();

    assert_eq!(session.feed_header(b"To: Erik Aigner <b@c.com>\r\n"), Status::Ok);
    assert_eq!(session.end_of_headers(), Status::SyntaxError);
    assert_eq!(session.error(), Some(&SignerError::FromHeaderNotSigned));

    // the session is failed for good
    assert_eq!(session.body_chunk(b""), Status::StateViolation);
}

#[test]
fn malformed_header_line_is_fatal() {
    let mut session = SignSession::new(make_request()).unwrap();

    assert_eq!(session.feed_header(b"not a header line\r\n"), Status::SyntaxError);
    assert_eq!(session.error(), Some(&SignerError::InvalidHeaderField));
    assert_eq!(session.end_of_headers(), Status::StateViolation);
}
