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

//! A library implementing the *DomainKeys Identified Mail* (DKIM)
//! specification described in [RFC 6376].
//!
//! Signing and verifying are driven through sessions. A session is fed the
//! message header field by field, then the body in chunks, and finally asked
//! to complete; a signing session ([`SignSession`][signer::SignSession]) then
//! yields a *DKIM-Signature* header for the message, and a verifying session
//! ([`VerifySession`][verifier::VerifySession]) yields a result for each
//! signature found in the message. Every session input returns a coarse
//! [`Status`][session::Status] code, with details available from the session
//! afterwards. For messages held in memory the convenience functions
//! [`sign_message`][session::sign_message] and
//! [`verify_message`][session::verify_message] drive a whole session in one
//! call.
//!
//! Verifying sessions obtain public keys through the
//! [`KeyLookup`][verifier::KeyLookup] trait; how key records are retrieved,
//! usually from DNS, is up to the caller.
//!
//! The session API is closed and does not provide extension points. Instead,
//! the low-level building blocks are provided in various additional modules.
//! They contain basic helpers for cryptography, canonicalisation, encoding,
//! etc. Users familiar with DKIM could use these building blocks to build
//! their own signing and verification facilities.
//!
//! The supported signature algorithms are *rsa-sha256*, *ed25519-sha256*
//! ([RFC 8463]), and the historic *rsa-sha1*, which remains available for
//! verification of old mail.
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376
//! [RFC 8463]: https://www.rfc-editor.org/rfc/rfc8463

pub mod canonicalize;
pub mod crypto;
pub mod header;
pub mod message_hash;
mod parse;
pub mod record;
pub mod session;
pub mod signature;
pub mod signer;
mod tag_list;
mod util;
pub mod verifier;

pub use crate::{
    crypto::{SignerKey, SigningKey},
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    record::DkimKeyRecord,
    session::{sign_message, verify_message, Status},
    signature::{
        Canonicalization, CanonicalizationAlgorithm, DkimSignature, DomainName, Selector,
        SignatureAlgorithm,
    },
    signer::{SignRequest, SignSession, SignerError},
    util::{decode_base64, encode_base64, Base64Error, CanonicalStr},
    verifier::{
        Config, KeyLookup, SignatureFlags, VerificationResult, VerifierError, VerifySession,
    },
};
