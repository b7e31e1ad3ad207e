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

use crate::{
    crypto::{self, HashAlgorithm, VerifyingKey},
    header::HeaderFields,
    message_hash::{self, body_hasher_key, BodyHasherError, BodyHasherResults},
    signature::DkimSignature,
    tag_list,
    verifier::{Config, KeyLookup, PolicyError, VerifierError},
};
use std::{borrow::Cow, io::ErrorKind};
use tracing::trace;

/// Evaluates a single discovered signature against the message.
///
/// `header_value` is the original, unmodified value of the signature’s own
/// *DKIM-Signature* header.
pub(super) fn evaluate_signature<T>(
    lookup: &T,
    config: &Config,
    headers: &HeaderFields,
    sig: &DkimSignature,
    header_value: &str,
    hasher_results: &BodyHasherResults,
) -> Result<(), VerifierError>
where
    T: KeyLookup,
{
    let key = body_hasher_key(sig);
    match hasher_results.get(&key) {
        Some(Ok((body_hash, _))) => {
            if body_hash[..] != sig.body_hash[..] {
                trace!("body hash mismatch");
                return Err(VerifierError::BodyHashMismatch);
            }
        }
        Some(Err(BodyHasherError::InsufficientInput)) | None => {
            return Err(VerifierError::InsufficientBodyLength);
        }
        Some(Err(BodyHasherError::InputTruncated)) => {
            return Err(VerifierError::Policy(PolicyError::ForbidPartiallySignedBody));
        }
    }

    let key_data = lookup
        .lookup_key(sig.selector.to_ascii(), sig.domain.to_ascii())
        .map_err(|error| {
            trace!("key lookup failed: {error}");
            if error.kind() == ErrorKind::NotFound {
                VerifierError::NoKeyFound
            } else {
                VerifierError::KeyLookup
            }
        })?;

    let public_key = VerifyingKey::from_key_data(sig.algorithm.key_type(), &key_data)
        .map_err(VerifierError::VerificationFailure)?;

    if let Some(bits) = public_key.key_size() {
        if bits < config.min_key_bits {
            return Err(VerifierError::Policy(PolicyError::KeyTooSmall));
        }
    }

    let hash_alg = sig.algorithm.hash_algorithm();

    let original_header_value = erase_signature_data(header_value);

    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        sig.canonicalization.header,
        headers,
        &sig.signed_headers,
        crate::signature::DKIM_SIGNATURE_NAME,
        &original_header_value,
    );

    verify_signature(&public_key, hash_alg, &data_hash, &sig.signature_data)
}

// Produces a copy of the DKIM-Signature header value with the b= tag value
// erased, as used as the final input of the data hash.
fn erase_signature_data(value: &str) -> Cow<'_, str> {
    fn b_tag_prefix_len(s: &str) -> Option<usize> {
        let (rest, _) = tag_list::strip_tag_name_and_equals(s).filter(|(_, name)| *name == "b")?;
        Some(s.len() - rest.len())
    }

    // strip the b= tag value, only cloning the string if needed

    let mut val = Cow::from(value);

    let mut last_i = 0;
    let mut ms = val.match_indices(';');

    loop {
        match ms.next() {
            Some((i, _)) => {
                if let Some(n) = b_tag_prefix_len(&val[last_i..i]) {
                    val.to_mut().drain((last_i + n)..i);
                    break;
                }
                last_i = i + 1;
            }
            None => {
                if last_i != val.len() {
                    if let Some(n) = b_tag_prefix_len(&val[last_i..]) {
                        val = value[..(last_i + n)].into();
                    }
                }
                break;
            }
        }
    }

    val
}

fn verify_signature(
    public_key: &VerifyingKey,
    hash_alg: HashAlgorithm,
    data_hash: &[u8],
    signature_data: &[u8],
) -> Result<(), VerifierError> {
    match public_key {
        VerifyingKey::Rsa(pk) => {
            match crypto::verify_rsa(hash_alg, pk, data_hash, signature_data) {
                Ok(()) => {
                    trace!("RSA public key verification successful");
                    Ok(())
                }
                Err(e) => {
                    trace!("RSA public key verification failed: {e}");
                    Err(VerifierError::VerificationFailure(e))
                }
            }
        }
        VerifyingKey::Ed25519(pk) => {
            match crypto::verify_ed25519(pk, data_hash, signature_data) {
                Ok(()) => {
                    trace!("Ed25519 public key verification successful");
                    Ok(())
                }
                Err(e) => {
                    trace!("Ed25519 public key verification failed: {e}");
                    Err(VerifierError::VerificationFailure(e))
                }
            }
        }
    }
}
