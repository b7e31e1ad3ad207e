use crate::tag_list;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseDomainError;

impl Display for ParseDomainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse domain name")
    }
}

impl Error for ParseDomainError {}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseSelectorError;

impl Display for ParseSelectorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse selector")
    }
}

impl Error for ParseSelectorError {}

/// A domain name, as used in the d= tag.
///
/// The name is validated at construction, and stored both in its original
/// spelling and in ASCII (A-label) form. Equivalence comparison is done on
/// the ASCII form in case-insensitive manner, so two spellings of the same
/// internationalised domain name compare equal.
#[derive(Clone, Eq)]
pub struct DomainName {
    original: Box<str>,
    ascii: Box<str>,
}

impl DomainName {
    /// Creates a new domain name from the given string.
    pub fn new(s: &str) -> Result<Self, ParseDomainError> {
        if s.ends_with('.') || !is_valid_dns_name(s) {
            return Err(ParseDomainError);
        }

        let ascii = idna::domain_to_ascii(s).map_err(|_| ParseDomainError)?;

        Ok(Self {
            original: s.into(),
            ascii: ascii.into(),
        })
    }

    /// Returns the domain in ASCII (A-label) form.
    pub fn to_ascii(&self) -> &str {
        &self.ascii
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.original.fmt(f)
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.original)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.original
    }
}

impl PartialEq for DomainName {
    fn eq(&self, other: &Self) -> bool {
        self.ascii.eq_ignore_ascii_case(&other.ascii)
    }
}

impl Hash for DomainName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ascii.to_ascii_lowercase().hash(state);
    }
}

fn is_valid_dns_name(mut s: &str) -> bool {
    fn is_tld(s: &str) -> bool {
        is_label(s) && !s.chars().all(|c: char| c.is_ascii_digit())
    }

    if let Some(sx) = s.strip_suffix('.') {
        s = sx;
    }

    if !has_valid_domain_len(s) {
        return false;
    }

    let mut labels = s.split('.').rev().peekable();

    if matches!(labels.next(), Some(l) if !is_tld(l)) {
        return false;
    }
    if labels.peek().is_none() {
        return false;
    }

    labels.all(is_label)
}

// tval chars exclude ; which cannot occur inside a tag value anyway
fn is_label(s: &str) -> bool {
    has_valid_label_len(s)
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s.chars().all(tag_list::is_tval_char)
}

const MAX_DOMAIN_LENGTH: usize = 253;

fn has_valid_domain_len(s: &str) -> bool {
    matches!(s.len(), 1..=MAX_DOMAIN_LENGTH)
}

fn has_valid_label_len(s: &str) -> bool {
    matches!(s.len(), 1..=63)
}

/// A selector, as used in the s= tag.
///
/// Like [`DomainName`], the selector is stored both in its original spelling
/// and in ASCII form, with equivalence comparison done on the ASCII form.
#[derive(Clone, Eq)]
pub struct Selector {
    original: Box<str>,
    ascii: Box<str>,
}

impl Selector {
    /// Creates a new selector from the given string.
    pub fn new(s: &str) -> Result<Self, ParseSelectorError> {
        // selector labels are parsed leniently, allowing things like
        // "dkim_123"; the length of the whole selector is not limited
        if !s.split('.').all(is_label) {
            return Err(ParseSelectorError);
        }

        let ascii = idna::domain_to_ascii(s).map_err(|_| ParseSelectorError)?;

        Ok(Self {
            original: s.into(),
            ascii: ascii.into(),
        })
    }

    /// Returns the selector in ASCII (A-label) form.
    pub fn to_ascii(&self) -> &str {
        &self.ascii
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.original.fmt(f)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.original)
    }
}

impl AsRef<str> for Selector {
    fn as_ref(&self) -> &str {
        &self.original
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.ascii.eq_ignore_ascii_case(&other.ascii)
    }
}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ascii.to_ascii_lowercase().hash(state);
    }
}
