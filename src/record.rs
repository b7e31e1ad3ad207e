//! DKIM public key records.

use crate::{
    crypto::{HashAlgorithm, KeyType},
    signature::{DomainName, Selector},
    tag_list::{parse_base64_tag_value, parse_colon_separated_tag_value, TagList, TagSpec},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};
use tracing::trace;

/// Returns the name at which the key record for the given selector and domain
/// is published, in A-label form.
///
/// # Examples
///
/// ```
/// # use dkimflow::record::key_record_query_name;
/// # use dkimflow::signature::{DomainName, Selector};
/// let domain = DomainName::new("gluet.ch").unwrap();
/// let selector = Selector::new("sel").unwrap();
///
/// assert_eq!(key_record_query_name(&selector, &domain), "sel._domainkey.gluet.ch");
/// ```
pub fn key_record_query_name(selector: &Selector, domain: &DomainName) -> String {
    format!("{}._domainkey.{}", selector.to_ascii(), domain.to_ascii())
}

/// A service type used in a DKIM public key record.
#[derive(Debug, PartialEq, Eq)]
pub enum ServiceType {
    /// Any service type (`*`).
    Any,
    /// The service type *email*.
    Email,
    /// An unrecognised service type.
    Other(Box<str>),
}

/// A flag used in a DKIM public key record.
#[derive(Debug, PartialEq, Eq)]
pub enum Flags {
    /// The *y* flag: this domain is testing DKIM.
    Testing,
    /// The *s* flag: the signing domain must match the record’s domain
    /// exactly.
    NoSubdomains,
    /// An unrecognised flag.
    Other(Box<str>),
}

/// An error that occurs when parsing a DKIM public key record.
#[derive(Debug, PartialEq, Eq)]
pub enum DkimKeyRecordError {
    /// The record is not a well-formed tag-list.
    TagListSyntax,
    /// The p= tag does not contain well-formed Base64 data.
    InvalidBase64,
    /// The v= tag names an unsupported version.
    UnsupportedVersion,
    /// The v= tag is not the initial tag.
    MisplacedVersionTag,
    /// The k= tag names an unsupported key type.
    UnsupportedKeyType,
    /// The h= tag names no supported hash algorithm.
    NoSupportedHashAlgorithms,
    /// The p= tag is empty: the key has been revoked.
    RevokedKey,
    /// The p= tag is missing.
    MissingKeyTag,
    /// The s= tag names no service types.
    ServiceTypesEmpty,
}

impl Display for DkimKeyRecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::TagListSyntax => write!(f, "invalid tag-list"),
            Self::InvalidBase64 => write!(f, "invalid Base64 string"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::MisplacedVersionTag => write!(f, "v= tag not initial"),
            Self::UnsupportedKeyType => write!(f, "unsupported key type"),
            Self::NoSupportedHashAlgorithms => write!(f, "no supported hash algorithms"),
            Self::RevokedKey => write!(f, "key revoked"),
            Self::MissingKeyTag => write!(f, "p= tag missing"),
            Self::ServiceTypesEmpty => write!(f, "service types empty"),
        }
    }
}

impl Error for DkimKeyRecordError {}

/// A DKIM public key record.
#[derive(Debug, PartialEq, Eq)]
pub struct DkimKeyRecord {
    /// The acceptable hash algorithms. Never empty; defaults to all supported
    /// algorithms when the h= tag is absent.
    pub hash_algorithms: Box<[HashAlgorithm]>,
    /// The key type.
    pub key_type: KeyType,
    /// The public key data, decoded from the p= tag.
    pub key_data: Box<[u8]>,
    /// The service types the key may be used with. Never empty; defaults to
    /// any service type when the s= tag is absent.
    pub service_types: Box<[ServiceType]>,
    /// The flags set on this record.
    pub flags: Box<[Flags]>,
}

impl DkimKeyRecord {
    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimKeyRecordError> {
        let mut hash_algorithms = HashAlgorithm::all();
        let mut key_type = KeyType::Rsa;
        let mut key_data = None;
        let mut service_types = vec![ServiceType::Any];
        let mut flags = vec![];

        for (i, &TagSpec { name, value }) in tag_list.as_ref().iter().enumerate() {
            match name {
                "v" => {
                    if i != 0 {
                        return Err(DkimKeyRecordError::MisplacedVersionTag);
                    }
                    if value != "DKIM1" {
                        return Err(DkimKeyRecordError::UnsupportedVersion);
                    }
                }
                "h" => {
                    hash_algorithms.clear();

                    for s in parse_colon_separated_tag_value(value) {
                        if s.eq_ignore_ascii_case("sha256") {
                            hash_algorithms.push(HashAlgorithm::Sha256);
                        } else if s.eq_ignore_ascii_case("sha1") {
                            hash_algorithms.push(HashAlgorithm::Sha1);
                        }
                    }

                    if hash_algorithms.is_empty() {
                        return Err(DkimKeyRecordError::NoSupportedHashAlgorithms);
                    }
                }
                "k" => {
                    if value.eq_ignore_ascii_case("ed25519") {
                        key_type = KeyType::Ed25519;
                    } else if !value.eq_ignore_ascii_case("rsa") {
                        return Err(DkimKeyRecordError::UnsupportedKeyType);
                    }
                }
                "p" => {
                    if value.is_empty() {
                        return Err(DkimKeyRecordError::RevokedKey);
                    }

                    let s = parse_base64_tag_value(value)
                        .map_err(|_| DkimKeyRecordError::InvalidBase64)?;

                    key_data = Some(s.into());
                }
                "s" => {
                    let mut st = vec![];

                    for s in parse_colon_separated_tag_value(value) {
                        if s == "*" {
                            st.push(ServiceType::Any);
                        } else if s.eq_ignore_ascii_case("email") {
                            st.push(ServiceType::Email);
                        } else {
                            st.push(ServiceType::Other(s.into()));
                        }
                    }

                    if st.is_empty() {
                        return Err(DkimKeyRecordError::ServiceTypesEmpty);
                    }

                    service_types = st;
                }
                "t" => {
                    let mut fs = vec![];

                    for s in parse_colon_separated_tag_value(value) {
                        if s.eq_ignore_ascii_case("y") {
                            fs.push(Flags::Testing);
                        } else if s.eq_ignore_ascii_case("s") {
                            fs.push(Flags::NoSubdomains);
                        } else {
                            fs.push(Flags::Other(s.into()));
                        }
                    }

                    flags = fs;
                }
                // §3.6.1: ‘Other tags MAY be present and MUST be ignored by any
                // implementation that does not understand them.’
                _ => {}
            }
        }

        let key_data = key_data.ok_or(DkimKeyRecordError::MissingKeyTag)?;

        Ok(Self {
            hash_algorithms: hash_algorithms.into(),
            key_type,
            key_data,
            service_types: service_types.into(),
            flags: flags.into(),
        })
    }

    /// Returns whether this record publishes a key usable for verifying an
    /// email signature made with the given key type and hash algorithm.
    pub fn supports(&self, key_type: KeyType, hash_algorithm: HashAlgorithm) -> bool {
        self.key_type == key_type
            && self.hash_algorithms.contains(&hash_algorithm)
            && self
                .service_types
                .iter()
                .any(|s| matches!(s, ServiceType::Any | ServiceType::Email))
    }

    /// Returns whether this record carries the testing flag (t=y).
    pub fn is_testing(&self) -> bool {
        self.flags.contains(&Flags::Testing)
    }
}

impl FromStr for DkimKeyRecord {
    type Err = DkimKeyRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list = match TagList::from_str(s) {
            Ok(r) => r,
            Err(e) => {
                trace!("ill-formed key record: {e:?}");
                return Err(DkimKeyRecordError::TagListSyntax);
            }
        };

        Self::from_tag_list(&tag_list)
    }
}
