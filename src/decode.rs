//! Header fragment decoding
//!
//! Alert bodies quote the original message headers in Q-encoded form,
//! frequently broken up by quoted-printable folding. [`decode`] undoes
//! the folding and turns the fragment back into native text.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;
use thiserror::Error;

/// A fragment that cannot be turned into text.
///
/// Always local to one field: callers substitute the placeholder and
/// carry on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown charset '{0}'")]
    UnknownCharset(String),

    #[error("bytes are not valid {0}")]
    InvalidText(String),

    #[error("invalid base64 payload: {0}")]
    Base64(String),

    #[error("unsupported encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("malformed encoded word")]
    Malformed,
}

fn soft_break_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"=\r?\n").expect("valid soft break regex"))
}

fn equals_run_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"={2,}").expect("valid equals run regex"))
}

fn encoded_word_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"=\?([^?\s]+)\?([QqBb])\?([^?\s]*)\?=").expect("valid encoded word regex")
    })
}

/// Decode a header fragment taken from an alert body.
///
/// Soft line breaks are removed first. A fragment that already holds
/// complete encoded words has them decoded in place; anything else has
/// runs of `=` collapsed and is decoded as the text of a single UTF-8
/// Q-encoded word.
///
/// # Errors
///
/// Returns [`DecodeError`] if the decoded bytes are not valid text in
/// the declared charset, or an embedded encoded word is unusable.
pub fn decode(fragment: &str) -> Result<String, DecodeError> {
    let unfolded = strip_soft_breaks(fragment);

    if encoded_word_regex().is_match(&unfolded) {
        return decode_words(&unfolded);
    }

    let collapsed = equals_run_regex().replace_all(&unfolded, "=");
    decode_envelope(&envelope(&collapsed))
}

/// Remove quoted-printable soft line breaks (`=` at end of line).
#[must_use]
pub fn strip_soft_breaks(text: &str) -> Cow<'_, str> {
    soft_break_regex().replace_all(text, "")
}

/// Wrap text as a UTF-8, Q-encoded encoded word.
#[must_use]
pub fn envelope(text: &str) -> String {
    format!("=?UTF-8?Q?{text}?=")
}

/// Decode one `=?charset?encoding?text?=` envelope.
///
/// The text may contain `?`, since envelopes built by [`envelope`] wrap
/// arbitrary body text.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if `word` is not an envelope, and
/// the decoding errors of [`decode`] otherwise.
pub fn decode_envelope(word: &str) -> Result<String, DecodeError> {
    let inner = word
        .strip_prefix("=?")
        .and_then(|w| w.strip_suffix("?="))
        .ok_or(DecodeError::Malformed)?;

    let mut parts = inner.splitn(3, '?');
    let (Some(charset), Some(encoding), Some(text)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(DecodeError::Malformed);
    };

    decode_word(charset, encoding, text)
}

fn decode_words(input: &str) -> Result<String, DecodeError> {
    let mut result = String::with_capacity(input.len());
    let mut last_end = 0;
    let mut last_was_word = false;

    for caps in encoded_word_regex().captures_iter(input) {
        let whole = caps.get(0).ok_or(DecodeError::Malformed)?;
        let between = &input[last_end..whole.start()];
        // RFC 2047 6.2: whitespace between adjacent encoded words is dropped
        if !(last_was_word && between.trim().is_empty()) {
            result.push_str(between);
        }

        result.push_str(&decode_word(&caps[1], &caps[2], &caps[3])?);
        last_end = whole.end();
        last_was_word = true;
    }

    result.push_str(&input[last_end..]);
    Ok(result)
}

fn decode_word(charset: &str, encoding: &str, text: &str) -> Result<String, DecodeError> {
    let bytes = match encoding {
        "Q" | "q" => decode_q(text),
        "B" | "b" => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| DecodeError::Base64(e.to_string()))?
        }
        other => return Err(DecodeError::UnsupportedEncoding(other.to_string())),
    };
    decode_charset(charset, bytes)
}

/// Q encoding: `_` is a space, `=XX` a hex byte, anything else literal.
fn decode_q(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' => match hex_pair(bytes.get(i + 1).copied(), bytes.get(i + 2).copied()) {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => {
                    out.push(b'=');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

fn hex_pair(hi: Option<u8>, lo: Option<u8>) -> Option<u8> {
    let hi = char::from(hi?).to_digit(16)?;
    let lo = char::from(lo?).to_digit(16)?;
    u8::try_from(hi * 16 + lo).ok()
}

fn decode_charset(charset: &str, bytes: Vec<u8>) -> Result<String, DecodeError> {
    // RFC 2231 language suffix, e.g. "UTF-8*es"
    let label = charset.split('*').next().unwrap_or(charset);

    if label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8") {
        return String::from_utf8(bytes).map_err(|_| DecodeError::InvalidText(label.to_string()));
    }

    let encoding = encoding_rs::Encoding::for_label(label.as_bytes())
        .ok_or_else(|| DecodeError::UnknownCharset(label.to_string()))?;
    encoding
        .decode_without_bom_handling_and_without_replacement(&bytes)
        .map(Cow::into_owned)
        .ok_or_else(|| DecodeError::InvalidText(label.to_string()))
}
