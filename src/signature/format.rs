use crate::{
    header::FieldName,
    signature::{DkimSignature, DKIM_SIGNATURE_NAME},
    util::{encode_base64, CanonicalStr},
};
use std::{fmt::Write, iter};

// careful: formatting works on characters not bytes!

pub(super) fn format_without_signature(sig: &DkimSignature, width: usize) -> (String, usize) {
    let start_i = DKIM_SIGNATURE_NAME.len() + 1;  // plus ":"

    let mut result = String::new();
    let mut i = start_i;

    format_tag_into_string(&mut result, width, &mut i, "v", "1");

    format_tag_into_string(&mut result, width, &mut i, "a", sig.algorithm.canonical_str());

    format_tag_into_string(&mut result, width, &mut i, "c", sig.canonicalization.canonical_str());

    format_tag_into_string(&mut result, width, &mut i, "d", sig.domain.as_ref());

    format_tag_into_string(&mut result, width, &mut i, "s", sig.selector.as_ref());

    if let Some(body_length) = &sig.body_length {
        format_tag_into_string(&mut result, width, &mut i, "l", &body_length.to_string());
    }

    if let Some(timestamp) = &sig.timestamp {
        format_tag_into_string(&mut result, width, &mut i, "t", &timestamp.to_string());
    }
    if let Some(expiration) = &sig.expiration {
        format_tag_into_string(&mut result, width, &mut i, "x", &expiration.to_string());
    }

    format_signed_headers_into_string(&mut result, width, &mut i, &sig.signed_headers);

    let bh = encode_base64(&sig.body_hash);
    format_body_hash_into_string(&mut result, width, &mut i, &bh);

    if i + 4 <= width {  // at least one additional char behind =
        result.push_str(" b=");
    } else {
        result.push_str("\r\n\tb=");
    }

    let insertion_i = result.len();

    (result, insertion_i)
}

fn format_tag_into_string(
    result: &mut String,
    width: usize,
    i: &mut usize,
    tag: &'static str,
    value: &str,
) {
    debug_assert!(tag.is_ascii());

    // WSP + tag + '=' + val + ';'
    let taglen = tag.len() + value.chars().count() + 3;

    if *i + taglen <= width {
        result.push(' ');
        *i += taglen;
    } else {
        result.push_str("\r\n\t");
        *i = taglen;
    }

    let _ = write!(result, "{tag}={value};");
}

fn format_signed_headers_into_string(
    result: &mut String,
    width: usize,
    i: &mut usize,
    value: &[FieldName],
) {
    debug_assert!(!value.is_empty());

    let mut names = value.iter();

    let first_name = match names.next() {
        Some(name) => name.as_ref(),
        None => return,
    };

    // WSP + 'h=' + name + ';'/':'
    let taglen = first_name.chars().count() + 4;
    if *i + taglen <= width {
        result.push(' ');
        *i += taglen;
    } else {
        result.push_str("\r\n\t");
        *i = taglen;
    }
    let _ = write!(result, "h={first_name}");  // don't write ;/: yet

    for name in names {
        let name = name.as_ref();

        result.push(':');

        let len = name.chars().count() + 1;  // name + ';'/':'
        if *i + len <= width {
            *i += len;
        } else {
            result.push_str("\r\n\t");
            *i = len + 1;
        }
        result.push_str(name);  // don't write ;/: yet
    }

    result.push(';');
}

fn format_body_hash_into_string(result: &mut String, width: usize, i: &mut usize, value: &str) {
    // WSP + 'bh=' + 1char (at least one additional char behind =)
    let taglen = 5;

    if *i + taglen <= width {
        result.push(' ');
        *i += taglen - 1;
    } else {
        result.push_str("\r\n\t");
        *i = taglen - 1;
    }
    result.push_str("bh=");

    format_chunks_into_string(result, width, i, value);

    // if the final chunk makes the line exactly width chars long, the
    // terminating ; is appended nevertheless
    result.push(';');
    *i += 1;
}

// note always:
// i: *char-based* line offset
// width: *char-based* line width
pub(super) fn format_chunks_into_string(
    output: &mut String,
    width: usize,
    i: &mut usize,
    mut s: &str,
) {
    let first_chunk_len = width.saturating_sub(*i);
    let first_chunk_len = first_chunk_len.min(s.chars().count());

    if first_chunk_len > 0 {
        let c = match s.char_indices().nth(first_chunk_len) {
            Some((c, _)) => c,
            None => s.len(),
        };
        let first_chunk;
        (first_chunk, s) = s.split_at(c);
        output.push_str(first_chunk);
        *i += first_chunk.chars().count();
    }

    let chunk_width = width.saturating_sub(1).max(1);  // no empty chunks
    let chunk_iter = iter::from_fn(|| {
        if s.is_empty() {
            None
        } else {
            let chunk;
            match s.char_indices().nth(chunk_width) {
                Some((c, _)) => {
                    (chunk, s) = s.split_at(c);
                    Some(chunk)
                }
                None => {
                    (chunk, s) = s.split_at(s.len());
                    Some(chunk)
                }
            }
        }
    });

    for chunk in chunk_iter {
        output.push_str("\r\n\t");
        output.push_str(chunk);
        *i = chunk.chars().count() + 1;
    }
}
