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

//! Signing sessions.
//!
//! A [`SignSession`] is fed a message piece by piece and, once the whole
//! message has been seen, produces a *DKIM-Signature* header value ready for
//! prepending to the message.

use crate::{
    crypto::{SignerKey, SigningError},
    header::{parse_header_field, FieldName, HeaderField, HeaderFields},
    message_hash::{self, BodyHasher, BodyHasherBuilder, BodyHasherKey},
    session::{SessionState, Status},
    signature::{
        self, Canonicalization, DkimSignature, DomainName, Selector, SignatureAlgorithm,
        DKIM_SIGNATURE_NAME, LINE_WIDTH,
    },
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::trace;

/// The default duration for which signatures remain valid.
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(60 * 60 * 24 * 5);

/// Selects headers from `headers` matching the given predicate, in the order
/// in which they are to be recorded in the h= tag.
///
/// Selection proceeds from the last header field towards the first, matching
/// the order in which repeated fields are consumed during canonicalization.
pub fn select_headers<'a, 'b: 'a>(
    headers: &'a HeaderFields,
    mut pred: impl FnMut(&FieldName) -> bool + 'b,
) -> impl DoubleEndedIterator<Item = &'a FieldName> + 'a {
    headers
        .as_ref()
        .iter()
        .rev()
        .filter_map(move |(name, _)| if pred(name) { Some(name) } else { None })
}

/// Selection of headers to include in the h= tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HeaderSelection {
    /// Given the message header, select the fields in the default set.
    Auto,
    /// Use exactly the headers given here as contents of the h= tag.
    Manual(Vec<FieldName>),
}

/// Returns the collection of headers that are signed by default.
///
/// RFC 6376 does not actually recommend a specific set of headers to be
/// signed. Instead, the collection returned here contains the so-called
/// ‘examples’ from section 5.4.1.
pub fn default_signed_headers() -> Vec<FieldName> {
    let names = [
        "From",
        "Reply-To",
        "Subject",
        "Date",
        "To",
        "Cc",
        "Resent-Date",
        "Resent-From",
        "Resent-To",
        "Resent-Cc",
        "In-Reply-To",
        "References",
        "List-Id",
        "List-Help",
        "List-Unsubscribe",
        "List-Subscribe",
        "List-Post",
        "List-Owner",
        "List-Archive",
    ];

    names
        .into_iter()
        .map(|n| FieldName::new(n).unwrap())
        .collect()
}

/// The extent of the message body to include in the body hash, recorded in
/// the l= tag.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BodyLength {
    /// Sign the complete message body, and do not limit the extent of the
    /// body covered by the signature: no l= tag.
    #[default]
    All,
    /// Sign the complete message body, and limit the extent of the body
    /// covered by the signature to the final length of the canonicalized
    /// body: l= tag with the length of the input.
    MessageLength,
    /// Sign exactly the given number of bytes of canonicalized body content:
    /// l= tag with the given value.
    Exact(u64),
}

/// The signature timestamp to record in the t= tag.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Timestamp {
    /// The current time.
    #[default]
    Now,
    /// The given UNIX timestamp.
    Exact(u64),
}

/// A request for production of a DKIM signature.
///
/// The basic request produced by [`SignRequest::new`] selects the default set
/// of signed headers, includes a signature timestamp, and limits the validity
/// of the signature to five days.
#[derive(Debug)]
pub struct SignRequest<T> {
    /// The signing key to use.
    pub signing_key: T,

    /// The signing domain, recorded in the d= tag.
    pub domain: DomainName,
    /// The selector, recorded in the s= tag.
    pub selector: Selector,
    /// The signature algorithm, recorded in the a= tag.
    pub algorithm: SignatureAlgorithm,
    /// The canonicalization, recorded in the c= tag.
    pub canonicalization: Canonicalization,
    /// Which headers to sign.
    pub header_selection: HeaderSelection,
    /// The extent of the body to sign.
    pub body_length: BodyLength,
    /// The signature timestamp, or `None` for no t= tag.
    pub timestamp: Option<Timestamp>,
    /// How long the signature is to remain valid, or `None` for no x= tag.
    pub valid_duration: Option<Duration>,
}

impl<T> SignRequest<T>
where
    T: SignerKey,
{
    /// Creates a new signing request with default settings.
    pub fn new(
        domain: DomainName,
        selector: Selector,
        algorithm: SignatureAlgorithm,
        signing_key: T,
    ) -> Self {
        Self {
            signing_key,
            domain,
            selector,
            algorithm,
            canonicalization: Default::default(),
            header_selection: HeaderSelection::Auto,
            body_length: BodyLength::All,
            timestamp: Some(Timestamp::Now),
            valid_duration: Some(DEFAULT_VALIDITY),
        }
    }
}

/// An error that occurs when producing a DKIM signature.
#[derive(Debug, Eq, PartialEq)]
pub enum SignerError {
    /// The signing key cannot produce signatures with the requested
    /// signature algorithm.
    IncompatibleKeyType,
    /// A header line fed to the session is not a well-formed header field.
    InvalidHeaderField,
    /// The *From* header is not part of the signed headers.
    FromHeaderNotSigned,
    /// The headers selected for signing are empty.
    EmptySignedHeaders,
    /// The message body is shorter than the requested body length.
    InsufficientBodyLength,
    /// The requested body length cannot be represented on this platform.
    Overflow,
    /// The signing operation itself failed.
    SigningFailure,
}

impl SignerError {
    pub(crate) fn status(&self) -> Status {
        match self {
            Self::IncompatibleKeyType => Status::UnsupportedAlgorithm,
            Self::InvalidHeaderField
            | Self::FromHeaderNotSigned
            | Self::EmptySignedHeaders
            | Self::InsufficientBodyLength
            | Self::Overflow => Status::SyntaxError,
            Self::SigningFailure => Status::SigningFailure,
        }
    }
}

impl Display for SignerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompatibleKeyType => {
                write!(f, "signing key incompatible with signature algorithm")
            }
            Self::InvalidHeaderField => write!(f, "invalid header field"),
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::EmptySignedHeaders => write!(f, "no headers selected for signing"),
            Self::InsufficientBodyLength => write!(f, "body shorter than requested length"),
            Self::Overflow => write!(f, "integer too large"),
            Self::SigningFailure => write!(f, "signing failed"),
        }
    }
}

impl Error for SignerError {}

impl From<SigningError> for SignerError {
    fn from(error: SigningError) -> Self {
        match error {
            SigningError::SigningFailure => Self::SigningFailure,
        }
    }
}

/// A signing session.
///
/// A session is fed the message header field by field, then the body in
/// chunks. Each input call returns a [`Status`]; once the final
/// [`end_of_message`][SignSession::end_of_message] call returns [`Status::Ok`],
/// the produced signature header is available from
/// [`signature_header_value`][SignSession::signature_header_value].
///
/// # Examples
///
/// ```no_run
/// # use dkimflow::crypto::SigningKey;
/// # use dkimflow::signature::{DomainName, Selector, SignatureAlgorithm};
/// # use dkimflow::signer::{SignRequest, SignSession};
/// # fn f() -> Result<(), Box<dyn std::error::Error>> {
/// let signing_key = SigningKey::from_pem("…")?;
///
/// let request = SignRequest::new(
///     DomainName::new("example.com")?,
///     Selector::new("sel")?,
///     SignatureAlgorithm::RsaSha256,
///     signing_key,
/// );
///
/// let mut session = SignSession::new(request)?;
///
/// assert!(session.feed_header(b"From: me <me@example.com>\r\n").is_ok());
/// assert!(session.end_of_headers().is_ok());
/// assert!(session.body_chunk(b"Hello!\r\n").is_ok());
/// assert!(session.end_of_message().is_ok());
///
/// let value = session.signature_header_value().unwrap();
/// println!("DKIM-Signature:{value}");
/// # Ok(())
/// # }
/// ```
pub struct SignSession<T> {
    request: SignRequest<T>,
    state: SessionState,
    collected: Vec<HeaderField>,
    headers: Option<HeaderFields>,
    signed_headers: Vec<FieldName>,
    hasher_key: Option<BodyHasherKey>,
    body_hasher: Option<BodyHasher>,
    signature: Option<DkimSignature>,
    header_value: Option<String>,
    error: Option<SignerError>,
}

impl<T> SignSession<T>
where
    T: SignerKey,
{
    /// Creates a new signing session for the given request.
    ///
    /// # Errors
    ///
    /// If the request’s signing key cannot produce signatures with the
    /// requested signature algorithm, an error is returned.
    pub fn new(request: SignRequest<T>) -> Result<Self, SignerError> {
        if request.signing_key.key_type() != request.algorithm.key_type() {
            return Err(SignerError::IncompatibleKeyType);
        }

        Ok(Self {
            request,
            state: SessionState::Init,
            collected: vec![],
            headers: None,
            signed_headers: vec![],
            hasher_key: None,
            body_hasher: None,
            signature: None,
            header_value: None,
            error: None,
        })
    }

    /// Feeds a complete header field, including any folded continuation lines
    /// and the final line terminator, to the session.
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
            Err(_) => self.fail(SignerError::InvalidHeaderField),
        }
    }

    /// Marks the end of the message header.
    ///
    /// The headers to sign are fixed at this point.
    pub fn end_of_headers(&mut self) -> Status {
        if self.state != SessionState::ReceivingHeaders {
            return self.violation();
        }

        let headers = match HeaderFields::new(std::mem::take(&mut self.collected)) {
            Ok(headers) => headers,
            Err(_) => return self.fail(SignerError::FromHeaderNotSigned),
        };

        let signed_headers: Vec<_> = match &self.request.header_selection {
            HeaderSelection::Auto => {
                let default_names = default_signed_headers();
                select_headers(&headers, move |name| default_names.contains(name))
                    .cloned()
                    .collect()
            }
            HeaderSelection::Manual(names) => names.clone(),
        };

        if signed_headers.is_empty() {
            return self.fail(SignerError::EmptySignedHeaders);
        }
        if !signed_headers.iter().any(|name| *name == "From") {
            return self.fail(SignerError::FromHeaderNotSigned);
        }

        let hashed_len = match self.request.body_length {
            BodyLength::All | BodyLength::MessageLength => None,
            BodyLength::Exact(n) => match usize::try_from(n) {
                Ok(n) => Some(n),
                Err(_) => return self.fail(SignerError::Overflow),
            },
        };

        let hash_alg = self.request.algorithm.hash_algorithm();
        let canon = self.request.canonicalization.body;

        let mut builder = BodyHasherBuilder::new(false);
        builder.register_canonicalization(hashed_len, hash_alg, canon);

        self.headers = Some(headers);
        self.signed_headers = signed_headers;
        self.hasher_key = Some((hashed_len, hash_alg, canon));
        self.body_hasher = Some(builder.build());
        self.state = SessionState::ReceivingBody;

        Status::Ok
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

    /// Marks the end of the message and produces the signature.
    pub fn end_of_message(&mut self) -> Status {
        if self.state != SessionState::ReceivingBody {
            return self.violation();
        }

        match self.perform_signing() {
            Ok(()) => {
                self.state = SessionState::MessageDone;
                Status::Ok
            }
            Err(error) => self.fail(error),
        }
    }

    fn perform_signing(&mut self) -> Result<(), SignerError> {
        let (hasher, key, headers) =
            match (self.body_hasher.take(), self.hasher_key, &self.headers) {
                (Some(hasher), Some(key), Some(headers)) => (hasher, key, headers),
                _ => return Err(SignerError::SigningFailure),
            };

        let results = hasher.finish();
        let (body_hash, final_len) = match results.get(&key) {
            Some(Ok((hash, len))) => (hash.clone(), *len),
            _ => return Err(SignerError::InsufficientBodyLength),
        };

        let body_length = match self.request.body_length {
            BodyLength::All => None,
            BodyLength::MessageLength => Some(final_len as u64),
            BodyLength::Exact(n) => Some(n),
        };

        let timestamp = self.request.timestamp.map(|t| match t {
            Timestamp::Now => now_unix(),
            Timestamp::Exact(t) => t,
        });

        let expiration = self.request.valid_duration.map(|duration| {
            timestamp
                .unwrap_or_else(now_unix)
                .saturating_add(duration.as_secs())
        });

        let mut sig = DkimSignature {
            algorithm: self.request.algorithm,
            signature_data: Box::default(),
            body_hash,
            canonicalization: self.request.canonicalization,
            domain: self.request.domain.clone(),
            signed_headers: self.signed_headers.clone().into(),
            body_length,
            selector: self.request.selector.clone(),
            timestamp,
            expiration,
        };

        let (mut header_value, insertion_index) = sig.format_without_signature(LINE_WIDTH);

        let data_hash = message_hash::compute_data_hash(
            self.request.algorithm.hash_algorithm(),
            self.request.canonicalization.header,
            headers,
            &self.signed_headers,
            DKIM_SIGNATURE_NAME,
            &header_value,
        );

        let signature_data = self.request.signing_key.sign_digest(
            self.request.algorithm.hash_algorithm(),
            &data_hash,
        )?;

        trace!(domain = sig.domain.as_ref(), "signing successful");

        signature::insert_signature_data(
            &mut header_value,
            insertion_index,
            &signature_data,
            LINE_WIDTH,
        );

        sig.signature_data = signature_data.into();

        self.signature = Some(sig);
        self.header_value = Some(header_value);

        Ok(())
    }

    /// Returns the produced signature header value, available once the
    /// session is complete.
    ///
    /// The value is ready for use after a `DKIM-Signature:` header name; it
    /// starts with a space and contains folded lines.
    pub fn signature_header_value(&self) -> Option<&str> {
        self.header_value.as_deref()
    }

    /// Returns the produced signature, available once the session is
    /// complete.
    pub fn signature(&self) -> Option<&DkimSignature> {
        self.signature.as_ref()
    }

    /// Returns the error that failed this session, if any.
    pub fn error(&self) -> Option<&SignerError> {
        self.error.as_ref()
    }

    fn fail(&mut self, error: SignerError) -> Status {
        trace!("signing session failed: {error}");
        let status = error.status();
        self.error = Some(error);
        self.state = SessionState::Failed;
        status
    }

    fn violation(&mut self) -> Status {
        self.state = SessionState::Failed;
        Status::StateViolation
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
