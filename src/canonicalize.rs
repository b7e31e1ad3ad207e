//! Canonicalization utilities.

use crate::{
    header::{FieldBody, FieldName, HeaderFields},
    signature::CanonicalizationAlgorithm,
};
use bstr::ByteSlice;
use std::collections::HashSet;

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: [u8; 2] = [CR, LF];

fn is_wsp(b: u8) -> bool {
    matches!(b, b' ' | b'\t')
}

/// A streaming canonicalizer using the body canonicalization algorithm.
///
/// Only CRLF is recognised as line terminator, stray CR and LF are ordinary
/// content bytes. Lines that canonicalize to nothing are held back until a
/// later line shows they are interior; at the end of the message a held-back
/// run is dropped, this is what makes them the trailing empty lines.
pub struct BodyCanonicalizer {
    kind: CanonicalizationAlgorithm,
    line: Vec<u8>,
    pending_empty_lines: usize,
    in_content: bool,
}

impl BodyCanonicalizer {
    pub fn new(kind: CanonicalizationAlgorithm) -> Self {
        Self {
            kind,
            line: vec![],
            pending_empty_lines: 0,
            in_content: false,
        }
    }

    pub fn canonicalize_chunk(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut result = vec![];

        for &b in bytes {
            if b == LF && self.line.last() == Some(&CR) {
                self.line.pop();
                self.end_line(&mut result);
            } else {
                self.line.push(b);
            }
        }

        result
    }

    /// Completes canonicalization, with the final line terminated even if its
    /// CRLF was never seen.
    pub fn finish(mut self) -> Vec<u8> {
        let mut result = vec![];

        if !self.line.is_empty() {
            self.end_line(&mut result);
        }

        // whatever is pending now is the run of trailing empty lines

        if !self.in_content && self.kind == CanonicalizationAlgorithm::Simple {
            result.extend(CRLF);
        }

        result
    }

    fn end_line(&mut self, result: &mut Vec<u8>) {
        let canonical = match self.kind {
            CanonicalizationAlgorithm::Simple => std::mem::take(&mut self.line),
            CanonicalizationAlgorithm::Relaxed => {
                let canonical = canonicalize_line_relaxed(&self.line);
                self.line.clear();
                canonical
            }
        };

        if canonical.is_empty() {
            self.pending_empty_lines += 1;
        } else {
            for _ in 0..self.pending_empty_lines {
                result.extend(CRLF);
            }
            self.pending_empty_lines = 0;

            result.extend(canonical);
            result.extend(CRLF);
            self.in_content = true;
        }
    }
}

fn canonicalize_line_relaxed(line: &[u8]) -> Vec<u8> {
    let line = line.trim_end_with(|c| matches!(c, ' ' | '\t'));

    let mut result = Vec::with_capacity(line.len());
    let mut compressing = false;

    for &b in line {
        if is_wsp(b) {
            compressing = true;
        } else {
            if compressing {
                result.push(SP);
                compressing = false;
            }
            result.push(b);
        }
    }

    result
}

/// Produces the header canonicalization result for the given selection of
/// header fields.
///
/// Each selected name consumes the most recent yet unconsumed field of that
/// name, so a repeated name in the selection walks the occurrences from the
/// bottom of the header block up.
pub fn canonicalize_headers(
    algorithm: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
) -> Vec<u8> {
    let mut result = vec![];
    let mut consumed_indexes = HashSet::with_capacity(selected_headers.len());

    for selected_header in selected_headers {
        let field = headers
            .as_ref()
            .iter()
            .rev()
            .enumerate()
            .filter(|(i, _)| !consumed_indexes.contains(i))
            .find(|(_, (name, _))| name == selected_header);

        if let Some((i, (name, value))) = field {
            canonicalize_header(&mut result, algorithm, name, value);
            result.extend(CRLF);
            consumed_indexes.insert(i);
        }
    }

    result
}

/// Canonicalizes a single header field into the result vector, without a
/// trailing CRLF.
pub fn canonicalize_header(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
) {
    let name = name.as_ref();
    let value = value.as_ref();

    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend(name.bytes());
            result.push(b':');
            result.extend(value);
        }
        CanonicalizationAlgorithm::Relaxed => {
            result.extend(name.to_ascii_lowercase().bytes());
            result.push(b':');
            canonicalize_header_value_relaxed(result, value);
        }
    }
}

fn canonicalize_header_value_relaxed(result: &mut Vec<u8>, value: &[u8]) {
    fn is_space(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    debug_assert!(FieldBody::new(value).is_ok());

    let value = value.trim_with(is_space);

    let mut compressing = false;
    for &b in value {
        if is_space(b.into()) {
            compressing = true;
        } else {
            if compressing {
                result.push(SP);
                compressing = false;
            }
            result.push(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BStr;

    #[test]
    fn canonicalize_headers_relaxed_ok() {
        let headers = HeaderFields::from_vec(vec![
            ("from".to_owned(), b" Good \t ".to_vec()),
            ("to".to_owned(), b" see   me".to_vec()),
            ("Date".to_owned(), b" Fri 24\r\n\tfoo".to_vec()),
            ("To".to_owned(), b" another one".to_vec()),
        ])
        .unwrap();

        let selected_headers = vec![
            FieldName::new("to").unwrap(),
            FieldName::new("from").unwrap(),
            FieldName::new("to").unwrap(),
        ];

        assert_eq!(
            BStr::new(&canonicalize_headers(
                CanonicalizationAlgorithm::Relaxed,
                &headers,
                &selected_headers,
            )),
            BStr::new(&b"to:another one\r\nfrom:Good\r\nto:see me\r\n"[..]),
        );
    }

    #[test]
    fn canonicalize_headers_simple_ok() {
        let headers = HeaderFields::from_vec(vec![
            ("From".to_owned(), b" Good \t ".to_vec()),
            ("Date".to_owned(), b" Fri 24\r\n\tfoo".to_vec()),
        ])
        .unwrap();

        let selected_headers = vec![
            FieldName::new("Date").unwrap(),
            FieldName::new("From").unwrap(),
        ];

        assert_eq!(
            BStr::new(&canonicalize_headers(
                CanonicalizationAlgorithm::Simple,
                &headers,
                &selected_headers,
            )),
            BStr::new(&b"Date: Fri 24\r\n\tfoo\r\nFrom: Good \t \r\n"[..]),
        );
    }

    #[test]
    fn body_canon_simple_ok() {
        let bc = BodyCanonicalizer::new(CanonicalizationAlgorithm::Simple);

        let body = canonicalize_chunks(
            bc,
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(body, b"well  hello \r\n\r\n what agi \r\n");
    }

    #[test]
    fn body_canon_relaxed_basic() {
        let bc = BodyCanonicalizer::new(CanonicalizationAlgorithm::Relaxed);

        let body = canonicalize_chunks(
            bc,
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(body, b"well hello\r\n\r\n what agi\r\n");
    }

    #[test]
    fn body_canon_relaxed_small_chunks() {
        let bc = BodyCanonicalizer::new(CanonicalizationAlgorithm::Relaxed);

        let body = canonicalize_chunks(
            bc,
            &[
                b"well ",
                b" hello ",
                b"\r",
                b"\n\r",
                b"\n what agi \r\n\r\n",
                b"\r\n",
            ],
        );

        assert_eq!(body, b"well hello\r\n\r\n what agi\r\n");
    }

    #[test]
    fn body_canon_relaxed_initial_empty_lines() {
        let bc = BodyCanonicalizer::new(CanonicalizationAlgorithm::Relaxed);

        let body = canonicalize_chunks(bc, &[b"\r\n\r\n", b"\ra \r", b"\nb  ", b"c"]);

        assert_eq!(body, b"\r\n\r\n\ra\r\nb c\r\n");
    }

    #[test]
    fn body_canon_simple_empty_body() {
        let bc = BodyCanonicalizer::new(CanonicalizationAlgorithm::Simple);
        assert_eq!(canonicalize_chunks(bc, &[]), b"\r\n");

        let bc = BodyCanonicalizer::new(CanonicalizationAlgorithm::Simple);
        assert_eq!(canonicalize_chunks(bc, &[b"\r\n\r\n"]), b"\r\n");
    }

    #[test]
    fn body_canon_relaxed_empty_body() {
        let bc = BodyCanonicalizer::new(CanonicalizationAlgorithm::Relaxed);
        assert_eq!(canonicalize_chunks(bc, &[]), b"");

        let bc = BodyCanonicalizer::new(CanonicalizationAlgorithm::Relaxed);
        assert_eq!(canonicalize_chunks(bc, &[b"\r\n"]), b"");
    }

    #[test]
    fn body_canon_unterminated_final_line() {
        let bc = BodyCanonicalizer::new(CanonicalizationAlgorithm::Simple);
        assert_eq!(canonicalize_chunks(bc, &[b"ab"]), b"ab\r\n");

        let bc = BodyCanonicalizer::new(CanonicalizationAlgorithm::Simple);
        assert_eq!(canonicalize_chunks(bc, &[b"ab\r\n "]), b"ab\r\n \r\n");

        let bc = BodyCanonicalizer::new(CanonicalizationAlgorithm::Relaxed);
        assert_eq!(canonicalize_chunks(bc, &[b"ab\r\n "]), b"ab\r\n");

        let bc = BodyCanonicalizer::new(CanonicalizationAlgorithm::Relaxed);
        assert_eq!(canonicalize_chunks(bc, &[b"ab  cd \t"]), b"ab cd\r\n");
    }

    fn canonicalize_chunks(mut bc: BodyCanonicalizer, chunks: &[&[u8]]) -> Vec<u8> {
        let mut result = vec![];
        for c in chunks {
            result.extend(bc.canonicalize_chunk(c));
        }
        result.extend(bc.finish());
        result
    }
}
