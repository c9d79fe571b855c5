//! Utility macros and functions for the HTTP crate.
//!
//! This module provides helper macros and functions that are used internally
//! by the HTTP crate implementation, plus the percent-decoding routine shared by
//! the request parser and the web layer.

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
/// It's useful for validation checks where you want to return early with an error
/// if some condition is not satisfied.
///
/// # Arguments
///
/// * `$predicate` - A boolean expression that should evaluate to true
/// * `$error` - The error value to return if the predicate is false
///
/// # Example
///
/// ```ignore
/// ensure!(!url.is_empty(), ParseError::EmptyUrl);
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

use std::borrow::Cow;

use percent_encoding::percent_decode_str;

/// Decodes a `application/x-www-form-urlencoded` style string.
///
/// `+` becomes a space and `%XY` becomes the byte `0xXY`. A `%` with fewer than two
/// characters after it is kept literally. Hex digits are read like `strtol` would: an
/// invalid pair decodes to whatever leading hex digits it has (possibly none, giving `0`).
///
/// The decoded bytes are interpreted as UTF-8, invalid sequences are replaced.
pub fn url_decode(text: &str) -> String {
    let text = normalize_escapes(text).replace('+', " ");
    percent_decode_str(&text).decode_utf8_lossy().into_owned()
}

/// Rewrites every `%` escape whose pair is not hex into the well formed escape of the
/// byte `strtol` reads from it. Text without such escapes is borrowed as is.
pub(crate) fn normalize_escapes(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    let malformed = |i: usize| {
        bytes[i] == b'%' && i + 2 < bytes.len() && !(bytes[i + 1].is_ascii_hexdigit() && bytes[i + 2].is_ascii_hexdigit())
    };
    if !(0..bytes.len()).any(malformed) {
        return Cow::Borrowed(text);
    }

    let mut normalized = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if malformed(i) {
            let byte = decode_hex_pair(bytes[i + 1], bytes[i + 2]);
            normalized.extend_from_slice(format!("%{byte:02X}").as_bytes());
            i += 3;
        } else {
            normalized.push(bytes[i]);
            i += 1;
        }
    }
    Cow::Owned(String::from_utf8_lossy(&normalized).into_owned())
}

fn decode_hex_pair(high: u8, low: u8) -> u8 {
    match (hex_value(high), hex_value(low)) {
        (Some(h), Some(l)) => (h << 4) | l,
        (Some(h), None) => h,
        (None, _) => 0,
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    char::from(byte).to_digit(16).and_then(|d| u8::try_from(d).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plus_is_space() {
        assert_eq!(url_decode("hello+world"), "hello world");
    }

    #[test]
    fn percent_pairs_are_case_insensitive() {
        assert_eq!(url_decode("a%2Fb%2fc"), "a/b/c");
        assert_eq!(url_decode("%41%62"), "Ab");
    }

    #[test]
    fn truncated_percent_at_end_is_literal() {
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("100%4"), "100%4");
        assert_eq!(url_decode("%"), "%");
    }

    #[test]
    fn invalid_hex_reads_leading_digits() {
        assert_eq!(url_decode("%4G"), "\u{4}");
        assert_eq!(url_decode("a%zzb"), "a\u{0}b");
    }

    #[test]
    fn multibyte_sequences_decode_as_utf8() {
        assert_eq!(url_decode("caf%C3%A9"), "café");
    }

    #[test]
    fn escaped_plus_stays_plus() {
        assert_eq!(url_decode("1%2B1+%3D+2"), "1+1 = 2");
    }

    #[test]
    fn well_formed_text_is_not_rewritten() {
        assert!(matches!(normalize_escapes("a%20b+c"), Cow::Borrowed("a%20b+c")));
        assert_eq!(normalize_escapes("x%4Gy&%zz=1"), "x%04y&%00=1");
    }
}
