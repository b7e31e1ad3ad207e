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

//! Session status codes and whole-message convenience functions.
//!
//! Both [`SignSession`] and [`VerifySession`] step through the same sequence
//! of inputs: header fields, end of headers, body chunks, end of message.
//! Every input call returns a [`Status`]. The functions [`sign_message`] and
//! [`verify_message`] drive a session over a complete message held in
//! memory.

use crate::{
    crypto::SignerKey,
    signer::{SignRequest, SignSession},
    verifier::{Config, KeyLookup, VerificationResult, VerifySession},
};
use bstr::ByteSlice;
use std::fmt::{self, Display, Formatter};

/// A status code returned by session transitions.
///
/// All codes other than [`Ok`][Status::Ok] describe a failure of some kind,
/// though not every failure is fatal to its session: a verifying session
/// carries on past per-signature failures and reports them in its results.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub enum Status {
    /// The operation completed.
    Ok,
    /// The message carries no DKIM signature.
    NoSignature,
    /// No signature validated, and at least one failed outright.
    BadSignature,
    /// Malformed input: an invalid header field, or an unusable signature
    /// header.
    SyntaxError,
    /// An algorithm or version that this implementation does not support.
    UnsupportedAlgorithm,
    /// No usable public key was available.
    KeyUnavailable,
    /// The signing operation failed.
    SigningFailure,
    /// A session transition was invoked out of order.
    StateViolation,
}

impl Status {
    /// Returns whether this status is [`Ok`][Status::Ok].
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::NoSignature => write!(f, "no signature"),
            Self::BadSignature => write!(f, "bad signature"),
            Self::SyntaxError => write!(f, "syntax error"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported algorithm"),
            Self::KeyUnavailable => write!(f, "key unavailable"),
            Self::SigningFailure => write!(f, "signing failure"),
            Self::StateViolation => write!(f, "state violation"),
        }
    }
}

/// The progress of a session through the message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SessionState {
    Init,
    ReceivingHeaders,
    ReceivingBody,
    MessageDone,
    Failed,
}

/// Signs a complete message, returning the signed message.
///
/// The produced *DKIM-Signature* header is prepended to the message. On
/// failure, the session’s final status is returned instead.
///
/// The message must contain the blank line separating header and body, else
/// the result is [`Status::SyntaxError`].
pub fn sign_message<T>(request: SignRequest<T>, message: &[u8]) -> Result<Vec<u8>, Status>
where
    T: SignerKey,
{
    let (header, body) = split_message(message).ok_or(Status::SyntaxError)?;

    let mut session = SignSession::new(request).map_err(|error| error.status())?;

    for field in split_header_fields(header) {
        let status = session.feed_header(field);
        if !status.is_ok() {
            return Err(status);
        }
    }

    let status = session.end_of_headers();
    if !status.is_ok() {
        return Err(status);
    }

    let status = session.body_chunk(body);
    if !status.is_ok() {
        return Err(status);
    }

    let status = session.end_of_message();
    if !status.is_ok() {
        return Err(status);
    }

    let value = session
        .signature_header_value()
        .ok_or(Status::SigningFailure)?;

    let mut signed = Vec::with_capacity(
        crate::signature::DKIM_SIGNATURE_NAME.len() + 1 + value.len() + 2 + message.len(),
    );
    signed.extend_from_slice(crate::signature::DKIM_SIGNATURE_NAME.as_bytes());
    signed.push(b':');
    signed.extend_from_slice(value.as_bytes());
    signed.extend_from_slice(b"\r\n");
    signed.extend_from_slice(message);

    Ok(signed)
}

/// Verifies a complete message, returning the session’s final status and the
/// per-signature results.
///
/// A message without the blank line separating header and body yields
/// [`Status::SyntaxError`] and no results.
pub fn verify_message<T>(
    lookup: T,
    config: &Config,
    message: &[u8],
) -> (Status, Vec<VerificationResult>)
where
    T: KeyLookup,
{
    let Some((header, body)) = split_message(message) else {
        return (Status::SyntaxError, vec![]);
    };

    let mut session = VerifySession::new(lookup, config.clone());

    for field in split_header_fields(header) {
        // malformed lines are dropped, the remaining headers are evaluated
        let _ = session.feed_header(field);
    }

    let status = session.end_of_headers();
    if !status.is_ok() {
        return (status, session.into_results());
    }

    let _ = session.body_chunk(body);

    let status = session.end_of_message();

    (status, session.into_results())
}

// Splits a message at the first blank line, both CRLF and bare LF line
// endings accepted. The header block keeps its final line terminator.
fn split_message(message: &[u8]) -> Option<(&[u8], &[u8])> {
    let crlf = message.find(b"\r\n\r\n");
    let lf = message.find(b"\n\n");

    match (crlf, lf) {
        (Some(i), Some(j)) if i < j => Some((&message[..(i + 2)], &message[(i + 4)..])),
        (_, Some(j)) => Some((&message[..(j + 1)], &message[(j + 2)..])),
        (Some(i), None) => Some((&message[..(i + 2)], &message[(i + 4)..])),
        (None, None) => None,
    }
}

// Splits a header block into logical header fields: a line starting with
// whitespace continues the preceding field.
fn split_header_fields(block: &[u8]) -> Vec<&[u8]> {
    let mut fields = vec![];
    let mut field_start: Option<usize> = None;

    let mut i = 0;
    while i < block.len() {
        let line_end = block[i..]
            .find_byte(b'\n')
            .map(|j| i + j + 1)
            .unwrap_or(block.len());

        let continuation = matches!(block.get(i), Some(b' ' | b'\t'));
        if !continuation {
            if let Some(start) = field_start {
                fields.push(&block[start..i]);
            }
            field_start = Some(i);
        }

        i = line_end;
    }

    if let Some(start) = field_start {
        fields.push(&block[start..]);
    }

    fields
}
