//! Representation of email header data.

use bstr::ByteSlice;
use std::{
    fmt::{self, Debug, Formatter},
    hash::{Hash, Hasher},
    str::{self, FromStr},
};

pub type HeaderField = (FieldName, FieldBody);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderFieldError;

/// A collection of header fields that can be used for DKIM processing.
///
/// The fields keep their arrival order, repeated names included.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeaderFields(Box<[HeaderField]>);

impl HeaderFields {
    pub fn new(value: impl Into<Box<[HeaderField]>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError);
        }
        Ok(Self(value))
    }

    pub fn from_vec(value: Vec<(String, Vec<u8>)>) -> Result<Self, HeaderFieldError> {
        let value: Vec<_> = value
            .into_iter()
            .map(|(name, value)| {
                let name = FieldName::new(name)?;
                let body = FieldBody::new(value)?;
                Ok((name, body))
            })
            .collect::<Result<_, _>>()?;
        Self::new(value)
    }
}

impl AsRef<[HeaderField]> for HeaderFields {
    fn as_ref(&self) -> &[HeaderField] {
        &self.0
    }
}

impl From<HeaderFields> for Vec<HeaderField> {
    fn from(fields: HeaderFields) -> Self {
        fields.0.into_vec()
    }
}

/// Conversion from a header block with LF or CRLF line endings. Continuation
/// lines must begin with whitespace; a single final newline is allowed.
impl FromStr for HeaderFields {
    type Err = HeaderFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s
            .strip_suffix('\n')
            .map(|t| t.strip_suffix('\r').unwrap_or(t))
            .unwrap_or(s);

        let mut fields: Vec<(String, Vec<u8>)> = vec![];

        for line in s.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.starts_with([' ', '\t']) {
                let (_, value) = fields.last_mut().ok_or(HeaderFieldError)?;
                value.extend_from_slice(b"\r\n");
                value.extend_from_slice(line.as_bytes());
            } else {
                let (name, value) = line.split_once(':').ok_or(HeaderFieldError)?;
                fields.push((name.into(), value.as_bytes().into()));
            }
        }

        Self::from_vec(fields)
    }
}

/// Parses a single raw header field given as `name: value` text.
///
/// An optional final line ending is discarded, and both LF and CRLF line
/// endings are accepted in folded values; canonical CRLF endings are
/// substituted in the parsed field body.
pub fn parse_header_field(line: &[u8]) -> Result<HeaderField, HeaderFieldError> {
    let line = line
        .strip_suffix(b"\r\n")
        .or_else(|| line.strip_suffix(b"\n"))
        .unwrap_or(line);

    let i = line.find_byte(b':').ok_or(HeaderFieldError)?;

    let name = str::from_utf8(&line[..i]).map_err(|_| HeaderFieldError)?;
    let name = FieldName::new(name)?;

    let value = line[(i + 1)..].replace("\r\n", "\n").replace("\n", "\r\n");
    let body = FieldBody::new(value)?;

    Ok((name, body))
}

/// A header field name.
#[derive(Clone, Eq)]
pub struct FieldName(Box<str>);

impl FieldName {
    pub fn new(value: impl Into<Box<str>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError);
        }
        if !value.chars().all(|c| c.is_ascii_graphic() && c != ':') {
            return Err(HeaderFieldError);
        }
        Ok(Self(value))
    }
}

impl AsRef<str> for FieldName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Debug for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialEq for FieldName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl PartialEq<&str> for FieldName {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Hash for FieldName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

/// A header field body. Any bytes are allowed except line breaks that do not
/// form a proper fold (CRLF followed by whitespace, no blank continuation
/// lines, no trailing break).
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct FieldBody(Box<[u8]>);

impl FieldBody {
    pub fn new(value: impl Into<Box<[u8]>>) -> Result<Self, HeaderFieldError> {
        fn has_stray_break(line: &[u8]) -> bool {
            line.contains(&b'\r') || line.contains(&b'\n')
        }

        let value = value.into();

        let mut lines = value.split_str("\r\n");

        match lines.next() {
            Some(first) if !has_stray_break(first) => {}
            _ => return Err(HeaderFieldError),
        }

        for line in lines {
            if !(line.starts_with(b" ") || line.starts_with(b"\t")) {
                return Err(HeaderFieldError);
            }
            if line.trim_with(|c| matches!(c, ' ' | '\t')).is_empty() {
                return Err(HeaderFieldError);
            }
            if has_stray_break(line) {
                return Err(HeaderFieldError);
            }
        }

        Ok(Self(value))
    }
}

impl AsRef<[u8]> for FieldBody {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for FieldBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldBody").field(&self.0.as_bstr()).finish()
    }
}
