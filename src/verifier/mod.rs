// dkimflow – implementation of the DKIM specification
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! Verifying sessions and supporting types.

mod evaluate;

use crate::{
    crypto::VerificationError,
    header::{parse_header_field, FieldName, HeaderField, HeaderFields},
    message_hash::{body_hasher_key, BodyHasher, BodyHasherBuilder},
    session::{SessionState, Status},
    signature::{DkimSignature, DkimSignatureError, DKIM_SIGNATURE_NAME},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io,
    ops::{BitOr, BitOrAssign},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::trace;

/// A source of DKIM public keys.
///
/// Given a selector and a domain, an implementation produces the raw key data
/// of the published key record, that is, the decoded content of the record’s
/// p= tag. How the record is obtained, usually by querying DNS for a TXT
/// record at the name returned by
/// [`key_record_query_name`][crate::record::key_record_query_name], is left
/// to the implementation.
///
/// An I/O error of kind [`io::ErrorKind::NotFound`] signals that no key record
/// exists; any other error is treated as a failed lookup.
///
/// The trait is implemented for plain closures:
///
/// ```
/// # use dkimflow::verifier::KeyLookup;
/// # use std::io;
/// let lookup = |selector: &str, domain: &str| -> io::Result<Vec<u8>> {
///     if selector == "sel" && domain == "example.com" {
///         Ok(b"...".to_vec())
///     } else {
///         Err(io::ErrorKind::NotFound.into())
///     }
/// };
/// # fn assert_lookup(_: impl KeyLookup) {}
/// # assert_lookup(lookup);
/// ```
pub trait KeyLookup {
    /// Looks up the key record published for the given selector and domain,
    /// returning the raw key data.
    fn lookup_key(&self, selector: &str, domain: &str) -> io::Result<Vec<u8>>;
}

impl<F> KeyLookup for F
where
    F: Fn(&str, &str) -> io::Result<Vec<u8>>,
{
    fn lookup_key(&self, selector: &str, domain: &str) -> io::Result<Vec<u8>> {
        self(selector, domain)
    }
}

/// Configuration for a verifying session.
#[derive(Clone, Debug)]
pub struct Config {
    /// Validate at most this number of signatures; any extra signature
    /// headers are not taken into account. The default is 12.
    pub max_signatures: usize,

    /// If the given required headers are not signed in a DKIM signature, the
    /// signature does not validate. Note that the header *From* is always
    /// required by the RFC independent of this setting. The default is the
    /// empty collection.
    pub required_signed_headers: Vec<FieldName>,

    /// If a signature covers only part of the message body (l= tag), fail
    /// validation of that signature. The default is false.
    pub forbid_partially_signed_body: bool,

    /// Whether to fail validation of signatures whose expiration (x= tag)
    /// lies in the past. The default is true.
    pub fail_if_expired: bool,

    /// Whether to fail validation of signatures whose timestamp (t= tag)
    /// lies in the future. The default is true.
    pub fail_if_in_future: bool,

    /// Tolerance applied to time values when checking expiration and
    /// timestamps, to allow for clock drift. The default is 5 minutes.
    pub time_tolerance: Duration,

    /// The minimum acceptable key size in bits, for keys of variable size.
    /// The default is 1024, per RFC 8301.
    pub min_key_bits: usize,

    /// An instant to use as the current time, for reproducible verification.
    /// The default is `None`: use the actual system time.
    pub fixed_system_time: Option<SystemTime>,
}

impl Config {
    fn current_timestamp(&self) -> u64 {
        self.fixed_system_time
            .unwrap_or_else(SystemTime::now)
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_signatures: 12,
            required_signed_headers: vec![],
            forbid_partially_signed_body: false,
            fail_if_expired: true,
            fail_if_in_future: true,
            time_tolerance: Duration::from_secs(300),
            min_key_bits: 1024,
            fixed_system_time: None,
        }
    }
}

/// An error that occurs when verifying a DKIM signature.
#[derive(Debug, Eq, PartialEq)]
pub enum VerifierError {
    /// The *DKIM-Signature* header could not be parsed.
    SignatureFormat(DkimSignatureError),
    /// The body hash in the bh= tag does not agree with the message body.
    BodyHashMismatch,
    /// The message body is shorter than the body length in the l= tag.
    InsufficientBodyLength,
    /// The body length in the l= tag cannot be represented on this platform.
    Overflow,
    /// No key record is published for the signature’s selector and domain.
    NoKeyFound,
    /// The key record lookup failed.
    KeyLookup,
    /// Cryptographic verification failed.
    VerificationFailure(VerificationError),
    /// The signature was rejected by local policy.
    Policy(PolicyError),
}

impl Display for VerifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignatureFormat(error) => write!(f, "invalid DKIM signature: {error}"),
            Self::BodyHashMismatch => write!(f, "body hash mismatch"),
            Self::InsufficientBodyLength => write!(f, "body shorter than body length tag"),
            Self::Overflow => write!(f, "integer too large"),
            Self::NoKeyFound => write!(f, "no key record found"),
            Self::KeyLookup => write!(f, "key record lookup failed"),
            Self::VerificationFailure(error) => write!(f, "verification failed: {error}"),
            Self::Policy(error) => write!(f, "policy failure: {error}"),
        }
    }
}

impl Error for VerifierError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SignatureFormat(error) => Some(error),
            Self::VerificationFailure(error) => Some(error),
            Self::Policy(error) => Some(error),
            _ => None,
        }
    }
}

/// An error variant for signatures rejected by local policy rather than by
/// the DKIM protocol itself.
#[derive(Debug, Eq, PartialEq)]
pub enum PolicyError {
    /// Headers configured as required are not signed.
    RequiredHeadersNotSigned,
    /// The signature covers only part of the message body.
    ForbidPartiallySignedBody,
    /// The signature has expired.
    SignatureExpired,
    /// The signature timestamp lies in the future.
    TimestampInFuture,
    /// The signing key is smaller than the configured minimum.
    KeyTooSmall,
}

impl Display for PolicyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequiredHeadersNotSigned => write!(f, "required headers not signed"),
            Self::ForbidPartiallySignedBody => write!(f, "partially signed body not acceptable"),
            Self::SignatureExpired => write!(f, "signature expired"),
            Self::TimestampInFuture => write!(f, "timestamp in the future"),
            Self::KeyTooSmall => write!(f, "public key too small"),
        }
    }
}

impl Error for PolicyError {}

/// Per-signature result flags.
///
/// Flags record the stations a signature passed through during a verifying
/// session. A signature that `PASSED` is always also `PROCESSED` and carries
/// no error flag.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct SignatureFlags(u32);

impl SignatureFlags {
    /// The signature was fully evaluated.
    pub const PROCESSED: Self = Self(1);
    /// The signature was skipped: unsupported algorithm or version, or
    /// rejected by policy before evaluation.
    pub const IGNORE: Self = Self(1 << 1);
    /// The signature validated successfully.
    pub const PASSED: Self = Self(1 << 2);
    /// The body hash did not agree with the message body.
    pub const BODY_HASH_MISMATCH: Self = Self(1 << 3);
    /// Cryptographic verification of the signature data failed.
    pub const SIGNATURE_MISMATCH: Self = Self(1 << 4);
    /// The signature header could not be parsed.
    pub const SYNTAX_ERROR: Self = Self(1 << 5);
    /// No usable public key was available.
    pub const KEY_UNAVAILABLE: Self = Self(1 << 6);

    /// Returns the empty set of flags.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns whether all flags in `other` are contained in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Inserts the flags in `other` into `self`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Returns whether no flag is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SignatureFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SignatureFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SignatureFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::PROCESSED, "PROCESSED"),
            (Self::IGNORE, "IGNORE"),
            (Self::PASSED, "PASSED"),
            (Self::BODY_HASH_MISMATCH, "BODY_HASH_MISMATCH"),
            (Self::SIGNATURE_MISMATCH, "SIGNATURE_MISMATCH"),
            (Self::SYNTAX_ERROR, "SYNTAX_ERROR"),
            (Self::KEY_UNAVAILABLE, "KEY_UNAVAILABLE"),
        ];

        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("(empty)")?;
        }
        Ok(())
    }
}

/// The result of evaluating one *DKIM-Signature* header.
#[derive(Debug)]
pub struct VerificationResult {
    /// The position of this signature among the *DKIM-Signature* headers of
    /// the message, starting from zero.
    pub index: usize,
    /// The parsed signature, if the header could be parsed.
    pub signature: Option<DkimSignature>,
    /// The flags recorded for this signature.
    pub flags: SignatureFlags,
    /// The error that failed this signature, if any.
    pub error: Option<VerifierError>,
}

struct SigTask {
    index: usize,
    signature: Option<DkimSignature>,
    header_value: Option<Box<str>>,
    flags: SignatureFlags,
    error: Option<VerifierError>,
}

impl SigTask {
    fn rejected(index: usize, flags: SignatureFlags, error: VerifierError) -> Self {
        Self {
            index,
            signature: None,
            header_value: None,
            flags,
            error: Some(error),
        }
    }

    fn is_pending(&self) -> bool {
        self.error.is_none() && self.signature.is_some()
    }
}

/// A verifying session.
///
/// A session is fed the message header field by field, then the body in
/// chunks. *DKIM-Signature* headers are discovered and checked at
/// end-of-headers; evaluation completes at end-of-message, after which the
/// per-signature results are available from
/// [`results`][VerifySession::results].
///
/// Unlike in a signing session, a failing signature does not fail the
/// session: the final status summarises the per-signature outcomes, and the
/// session always reaches completion unless the transition order is violated.
pub struct VerifySession<T> {
    lookup: T,
    config: Config,
    state: SessionState,
    collected: Vec<HeaderField>,
    headers: Option<HeaderFields>,
    tasks: Vec<SigTask>,
    body_hasher: Option<BodyHasher>,
    results: Vec<VerificationResult>,
}

impl<T> VerifySession<T>
where
    T: KeyLookup,
{
    /// Creates a new verifying session using the given key lookup and
    /// configuration.
    pub fn new(lookup: T, config: Config) -> Self {
        Self {
            lookup,
            config,
            state: SessionState::Init,
            collected: vec![],
            headers: None,
            tasks: vec![],
            body_hasher: None,
            results: vec![],
        }
    }

    /// Feeds a complete header field, including any folded continuation lines
    /// and the final line terminator, to the session.
    ///
    /// A malformed header line yields [`Status::SyntaxError`]; the line is
    /// dropped and the session remains usable.
    pub fn feed_header(&mut self, field: impl AsRef<[u8]>) -> Status {
        match self.state {
            SessionState::Init | SessionState::ReceivingHeaders => {}
            _ => return self.violation(),
        }
        self.state = SessionState::ReceivingHeaders;

        match parse_header_field(field.as_ref()) {
            Ok(field) => {
                self.collected.push(field);
                Status::Ok
            }
            Err(_) => {
                trace!("dropping malformed header line");
                Status::SyntaxError
            }
        }
    }

    /// Marks the end of the message header and discovers the
    /// *DKIM-Signature* headers to evaluate.
    pub fn end_of_headers(&mut self) -> Status {
        if self.state != SessionState::ReceivingHeaders {
            return self.violation();
        }

        let headers = match HeaderFields::new(std::mem::take(&mut self.collected)) {
            Ok(headers) => Some(headers),
            Err(_) => None,  // no headers, hence no signatures
        };

        let mut builder = BodyHasherBuilder::new(self.config.forbid_partially_signed_body);

        if let Some(headers) = &headers {
            let signature_headers = headers
                .as_ref()
                .iter()
                .filter(|(name, _)| *name == DKIM_SIGNATURE_NAME)
                .take(self.config.max_signatures);

            for (index, (_, value)) in signature_headers.enumerate() {
                let task = self.discover_signature(index, value.as_ref(), &mut builder);
                self.tasks.push(task);
            }
        }

        self.headers = headers;
        self.body_hasher = Some(builder.build());
        self.state = SessionState::ReceivingBody;

        Status::Ok
    }

    fn discover_signature(
        &self,
        index: usize,
        value: &[u8],
        builder: &mut BodyHasherBuilder,
    ) -> SigTask {
        let value = match std::str::from_utf8(value) {
            Ok(value) => value,
            Err(_) => {
                return SigTask::rejected(
                    index,
                    SignatureFlags::SYNTAX_ERROR,
                    VerifierError::SignatureFormat(DkimSignatureError::ValueSyntax),
                );
            }
        };

        let sig = match value.parse::<DkimSignature>() {
            Ok(sig) => sig,
            Err(error) => {
                trace!(index, "unusable signature header: {error}");
                let flags = match error {
                    DkimSignatureError::UnsupportedVersion
                    | DkimSignatureError::UnsupportedAlgorithm
                    | DkimSignatureError::UnsupportedCanonicalization => SignatureFlags::IGNORE,
                    _ => SignatureFlags::SYNTAX_ERROR,
                };
                return SigTask::rejected(index, flags, VerifierError::SignatureFormat(error));
            }
        };

        let mut task = SigTask {
            index,
            signature: None,
            header_value: None,
            flags: SignatureFlags::empty(),
            error: None,
        };

        if let Some(error) = self.check_signature_policy(&sig) {
            task.flags.insert(SignatureFlags::IGNORE);
            task.error = Some(error);
            task.signature = Some(sig);
            return task;
        }

        if let Some(len) = sig.body_length {
            if usize::try_from(len).is_err() {
                task.flags.insert(SignatureFlags::SYNTAX_ERROR);
                task.error = Some(VerifierError::Overflow);
                task.signature = Some(sig);
                return task;
            }
        }

        let (len, hash_alg, canon) = body_hasher_key(&sig);
        builder.register_canonicalization(len, hash_alg, canon);

        task.signature = Some(sig);
        task.header_value = Some(value.into());
        task
    }

    fn check_signature_policy(&self, sig: &DkimSignature) -> Option<VerifierError> {
        let required = &self.config.required_signed_headers;
        if !required.iter().all(|name| sig.signed_headers.contains(name)) {
            return Some(VerifierError::Policy(PolicyError::RequiredHeadersNotSigned));
        }

        let now = self.config.current_timestamp();
        let tolerance = self.config.time_tolerance.as_secs();

        if self.config.fail_if_expired {
            if let Some(expiration) = sig.expiration {
                if expiration.saturating_add(tolerance) < now {
                    return Some(VerifierError::Policy(PolicyError::SignatureExpired));
                }
            }
        }

        if self.config.fail_if_in_future {
            if let Some(timestamp) = sig.timestamp {
                if timestamp > now.saturating_add(tolerance) {
                    return Some(VerifierError::Policy(PolicyError::TimestampInFuture));
                }
            }
        }

        None
    }

    /// Feeds a chunk of the message body to the session.
    pub fn body_chunk(&mut self, chunk: &[u8]) -> Status {
        if self.state != SessionState::ReceivingBody {
            return self.violation();
        }

        if let Some(hasher) = &mut self.body_hasher {
            let _ = hasher.hash_chunk(chunk);
        }

        Status::Ok
    }

    /// Marks the end of the message, evaluates all discovered signatures,
    /// and returns the session’s final status.
    ///
    /// The final status summarises the per-signature outcomes: [`Status::Ok`]
    /// if any signature passed, [`Status::NoSignature`] if the message
    /// carried no signature, and the most significant failure otherwise.
    pub fn end_of_message(&mut self) -> Status {
        if self.state != SessionState::ReceivingBody {
            return self.violation();
        }

        let hasher_results = match self.body_hasher.take() {
            Some(hasher) => hasher.finish(),
            None => return self.violation(),
        };

        let tasks = std::mem::take(&mut self.tasks);

        for mut task in tasks {
            if task.is_pending() {
                let outcome = match (&task.signature, &task.header_value, &self.headers) {
                    (Some(sig), Some(value), Some(headers)) => evaluate::evaluate_signature(
                        &self.lookup,
                        &self.config,
                        headers,
                        sig,
                        value,
                        &hasher_results,
                    ),
                    _ => Err(VerifierError::KeyLookup),
                };

                task.flags.insert(SignatureFlags::PROCESSED);
                match outcome {
                    Ok(()) => task.flags.insert(SignatureFlags::PASSED),
                    Err(error) => {
                        task.flags.insert(flags_for_error(&error));
                        task.error = Some(error);
                    }
                }
            }

            debug_assert!(
                !task.flags.contains(SignatureFlags::PASSED) || task.error.is_none()
            );

            self.results.push(VerificationResult {
                index: task.index,
                signature: task.signature,
                flags: task.flags,
                error: task.error,
            });
        }

        self.state = SessionState::MessageDone;

        self.session_status()
    }

    /// Returns the per-signature results; empty before the end of the
    /// message has been reached.
    pub fn results(&self) -> &[VerificationResult] {
        &self.results
    }

    /// Consumes the session, returning the per-signature results.
    pub fn into_results(self) -> Vec<VerificationResult> {
        self.results
    }

    fn session_status(&self) -> Status {
        if self.results.is_empty() {
            return Status::NoSignature;
        }

        let any = |flags: SignatureFlags| self.results.iter().any(|r| r.flags.contains(flags));

        if any(SignatureFlags::PASSED) {
            Status::Ok
        } else if any(SignatureFlags::BODY_HASH_MISMATCH)
            || any(SignatureFlags::SIGNATURE_MISMATCH)
        {
            Status::BadSignature
        } else if any(SignatureFlags::KEY_UNAVAILABLE) {
            Status::KeyUnavailable
        } else if any(SignatureFlags::IGNORE) {
            Status::UnsupportedAlgorithm
        } else {
            Status::SyntaxError
        }
    }

    fn violation(&mut self) -> Status {
        self.state = SessionState::Failed;
        Status::StateViolation
    }
}

fn flags_for_error(error: &VerifierError) -> SignatureFlags {
    match error {
        VerifierError::BodyHashMismatch | VerifierError::InsufficientBodyLength => {
            SignatureFlags::BODY_HASH_MISMATCH
        }
        VerifierError::NoKeyFound | VerifierError::KeyLookup => SignatureFlags::KEY_UNAVAILABLE,
        VerifierError::VerificationFailure(error) => match error {
            VerificationError::InvalidSignature | VerificationError::VerificationFailure => {
                SignatureFlags::SIGNATURE_MISMATCH
            }
            VerificationError::InvalidKey | VerificationError::InsufficientKeySize => {
                SignatureFlags::KEY_UNAVAILABLE
            }
        },
        VerifierError::Policy(error) => match error {
            PolicyError::ForbidPartiallySignedBody => SignatureFlags::BODY_HASH_MISMATCH,
            PolicyError::KeyTooSmall => SignatureFlags::KEY_UNAVAILABLE,
            _ => SignatureFlags::IGNORE,
        },
        VerifierError::SignatureFormat(_) | VerifierError::Overflow => {
            SignatureFlags::SYNTAX_ERROR
        }
    }
}
