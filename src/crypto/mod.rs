//! Cryptographic primitives for signing and verifying.
//!
//! # Public key formats found in DNS
//!
//! For both RSA and Ed25519, this crate accepts public key data in more than
//! one encoding. The reasons are historical and worth recording.
//!
//! ## RSA
//!
//! RFC 6376 contradicts itself about the encoding of the p= tag. Section
//! 3.6.1 calls for an RSAPublicKey structure (RFC 3447), while the worked
//! example in appendix C installs a SubjectPublicKeyInfo structure (RFC 5280)
//! in DNS. Implementers followed the appendix, and SubjectPublicKeyInfo is
//! what OpenDKIM and most other signers publish today. Errata describing the
//! problem have been filed against the RFC several times over.
//!
//! When reading an RSA key record, the key data is therefore first parsed as
//! SubjectPublicKeyInfo, and only if that fails as RSAPublicKey.
//!
//! ## Ed25519
//!
//! RFC 8463 requires the bare 32 bytes of the Ed25519 public key in the p=
//! tag. OpenSSL, however, has no built-in way of printing just those bytes;
//! `openssl pkey -pubout` emits a SubjectPublicKeyInfo document, and keys in
//! that format do show up in the wild.
//!
//! When reading an Ed25519 key record, the key data is therefore first taken
//! to be the raw public key bytes, and only if that fails parsed as
//! SubjectPublicKeyInfo.

mod ed25519;
mod hash;
mod rsa;

pub use self::{
    ed25519::{read_ed25519_verifying_key, sign_ed25519, verify_ed25519},
    hash::{digest, CountingHasher, HashStatus, InsufficientInput},
    rsa::{read_rsa_public_key, sign_rsa, verify_rsa},
};

use crate::util::CanonicalStr;
use ::rsa::{pkcs1::DecodeRsaPrivateKey, RsaPrivateKey, RsaPublicKey};
use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use pkcs8::{der::pem::PemLabel, Document, PrivateKeyInfo};
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    io::{self, ErrorKind},
};

/// A private key used for producing signatures.
///
/// This trait allows signing with key material that is not available as a
/// [`SigningKey`] value in memory, for example keys held in a hardware module
/// or behind a remote signing service.
pub trait SignerKey {
    /// Returns the key type of this key.
    fn key_type(&self) -> KeyType;

    /// Signs the given message digest, returning the signature bytes.
    ///
    /// For RSA keys, the digest is signed using the RSASSA-PKCS1-v1_5 scheme
    /// with the given hash algorithm. For Ed25519 keys, the digest itself is
    /// the message input of the PureEdDSA signing operation (RFC 8463,
    /// section 3).
    fn sign_digest(
        &self,
        hash_alg: HashAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<u8>, SigningError>;
}

impl<T: SignerKey + ?Sized> SignerKey for &T {
    fn key_type(&self) -> KeyType {
        (**self).key_type()
    }

    fn sign_digest(
        &self,
        hash_alg: HashAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<u8>, SigningError> {
        (**self).sign_digest(hash_alg, digest)
    }
}

impl<T: SignerKey + ?Sized> SignerKey for Box<T> {
    fn key_type(&self) -> KeyType {
        (**self).key_type()
    }

    fn sign_digest(
        &self,
        hash_alg: HashAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<u8>, SigningError> {
        (**self).sign_digest(hash_alg, digest)
    }
}

/// A private key held in memory.
pub enum SigningKey {
    Rsa(RsaPrivateKey),
    Ed25519(Ed25519SigningKey),
}

impl SigningKey {
    /// Reads a signing key from a PEM document.
    ///
    /// Both PKCS#8 documents (label `PRIVATE KEY`) and the PKCS#1 documents
    /// produced by `openssl genrsa` (label `RSA PRIVATE KEY`) are accepted.
    pub fn from_pem(s: &str) -> io::Result<Self> {
        let (label, private_key_der) = Document::from_pem(s)
            .map_err(|_| io::Error::new(ErrorKind::InvalidData, "not a PEM document"))?;

        if PrivateKeyInfo::validate_pem_label(label).is_ok() {
            // lightweight (could be Copy), therefore clonable:
            let pk = PrivateKeyInfo::try_from(private_key_der.as_bytes())
                .map_err(|_| io::Error::new(ErrorKind::InvalidData, "invalid private key"))?;

            if let Ok(rpk) = RsaPrivateKey::try_from(pk.clone()) {
                Ok(Self::Rsa(rpk))
            } else if let Ok(esk) = Ed25519SigningKey::try_from(pk) {
                Ok(Self::Ed25519(esk))
            } else {
                Err(io::Error::new(
                    ErrorKind::InvalidData,
                    "unrecognized private key type",
                ))
            }
        } else if label == "RSA PRIVATE KEY" {
            let rpk = RsaPrivateKey::from_pkcs1_der(private_key_der.as_bytes())
                .map_err(|_| io::Error::new(ErrorKind::InvalidData, "invalid RSA private key"))?;

            Ok(Self::Rsa(rpk))
        } else {
            Err(io::Error::new(
                ErrorKind::InvalidData,
                "unsupported PEM label",
            ))
        }
    }
}

impl SignerKey for SigningKey {
    fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa(_) => KeyType::Rsa,
            Self::Ed25519(_) => KeyType::Ed25519,
        }
    }

    fn sign_digest(
        &self,
        hash_alg: HashAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<u8>, SigningError> {
        match self {
            Self::Rsa(private_key) => sign_rsa(hash_alg, private_key, digest),
            Self::Ed25519(signing_key) => sign_ed25519(signing_key, digest),
        }
    }
}

// Key material stays out of debug output.
impl Debug for SigningKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa(_) => write!(f, "SigningKey::Rsa(..)"),
            Self::Ed25519(_) => write!(f, "SigningKey::Ed25519(..)"),
        }
    }
}

/// A public key used for verifying signatures.
#[derive(Debug)]
pub enum VerifyingKey {
    Rsa(RsaPublicKey),
    Ed25519(Ed25519VerifyingKey),
}

impl VerifyingKey {
    /// Reads a verifying key from the key data of a key record (the p= tag).
    pub fn from_key_data(key_type: KeyType, key_data: &[u8]) -> Result<Self, VerificationError> {
        match key_type {
            KeyType::Rsa => {
                let public_key = read_rsa_public_key(key_data)?;
                Ok(VerifyingKey::Rsa(public_key))
            }
            KeyType::Ed25519 => {
                let verifying_key = read_ed25519_verifying_key(key_data)?;
                Ok(VerifyingKey::Ed25519(verifying_key))
            }
        }
    }

    /// Returns the key size in bits for key types of variable size.
    pub fn key_size(&self) -> Option<usize> {
        match self {
            Self::Rsa(public_key) => Some(self::rsa::get_public_key_size(public_key)),
            Self::Ed25519(_) => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyType {
    Rsa,
    Ed25519,
}

impl CanonicalStr for KeyType {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ed25519 => "ed25519",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl CanonicalStr for HashAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl HashAlgorithm {
    pub fn all() -> Vec<Self> {
        vec![Self::Sha1, Self::Sha256]
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerificationError {
    InvalidKey,
    InsufficientKeySize,
    InvalidSignature,
    VerificationFailure,
}

impl Display for VerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key data"),
            Self::InsufficientKeySize => write!(f, "key too small"),
            Self::InvalidSignature => write!(f, "invalid signature data"),
            Self::VerificationFailure => write!(f, "signature verification failed"),
        }
    }
}

impl Error for VerificationError {}

#[derive(Debug, Eq, PartialEq)]
pub enum SigningError {
    SigningFailure,
}

impl Display for SigningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SigningFailure => write!(f, "signing failed"),
        }
    }
}

impl Error for SigningError {}
