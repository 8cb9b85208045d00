//! Single-layer decoders used by the normalizer.
//!
//! Each decoder returns `Some(decoded)` only when it recognised and changed
//! something. Malformed input yields `None` so the caller keeps the last good
//! value.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use percent_encoding::percent_decode_str;
use serde::Serialize;

/// An encoding layer the normalizer can peel off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// `%27` percent-encoding
    Url,
    /// `&#39;` / `&apos;` entities
    HtmlEntity,
    /// `\x27`, `\u0027` escapes and `0x`-prefixed hex strings
    Hex,
    /// Standard or URL-safe Base64
    Base64,
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Url => write!(f, "url"),
            Encoding::HtmlEntity => write!(f, "html_entity"),
            Encoding::Hex => write!(f, "hex"),
            Encoding::Base64 => write!(f, "base64"),
        }
    }
}

/// Decoders in the order they are tried on each layer.
pub(crate) const DECODERS: &[(Encoding, fn(&str) -> Option<String>)] = &[
    (Encoding::Url, decode_url),
    (Encoding::HtmlEntity, decode_html_entities),
    (Encoding::Hex, decode_hex),
    (Encoding::Base64, decode_base64),
];

/// Minimum length before a string is considered Base64
const MIN_BASE64_LEN: usize = 8;

pub(crate) fn decode_url(s: &str) -> Option<String> {
    if !s.contains('%') {
        return None;
    }
    let decoded = percent_decode_str(s).decode_utf8().ok()?;
    if decoded == s {
        None
    } else {
        Some(decoded.into_owned())
    }
}

const NAMED_ENTITIES: &[(&str, char)] = &[
    ("lt", '<'),
    ("gt", '>'),
    ("amp", '&'),
    ("quot", '"'),
    ("apos", '\''),
    ("sol", '/'),
    ("bsol", '\\'),
    ("lpar", '('),
    ("rpar", ')'),
    ("semi", ';'),
    ("comma", ','),
    ("equals", '='),
    ("plus", '+'),
    ("num", '#'),
    ("excl", '!'),
    ("colon", ':'),
    ("dollar", '$'),
    ("period", '.'),
    ("lbrace", '{'),
    ("rbrace", '}'),
    ("lcub", '{'),
    ("rcub", '}'),
    ("nbsp", ' '),
    ("Tab", '\t'),
    ("NewLine", '\n'),
];

pub(crate) fn decode_html_entities(s: &str) -> Option<String> {
    if !s.contains('&') {
        return None;
    }

    let mut out = String::with_capacity(s.len());
    let mut changed = false;
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        // Entities are short; anything longer is not one
        let decoded = tail
            .find(';')
            .filter(|&end| end > 0 && end <= 10)
            .and_then(|end| entity_char(&tail[..end]).map(|c| (c, end)));

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
                changed = true;
            },
            None => {
                out.push('&');
                rest = tail;
            },
        }
    }
    out.push_str(rest);

    changed.then_some(out)
}

fn entity_char(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(digits) => u32::from_str_radix(digits, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    NAMED_ENTITIES
        .iter()
        .find(|(entity, _)| entity.eq_ignore_ascii_case(name))
        .map(|(_, c)| *c)
}

pub(crate) fn decode_hex(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if let Some(body) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        if body.len() >= 2 && body.len() % 2 == 0 {
            let bytes = hex::decode(body).ok()?;
            let text = String::from_utf8(bytes).ok()?;
            return is_printable(&text).then_some(text);
        }
        return None;
    }

    if !s.contains('\\') {
        return None;
    }

    let mut out = String::with_capacity(s.len());
    let mut pending: Vec<u8> = Vec::new();
    let mut changed = false;
    let mut chars = s.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            let escape = match s[i + 1..].chars().next() {
                Some('x' | 'X') => s
                    .get(i + 2..i + 4)
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .map(|b| (Escaped::Byte(b), 4)),
                Some('u' | 'U') => s
                    .get(i + 2..i + 6)
                    .and_then(|h| u32::from_str_radix(h, 16).ok())
                    .and_then(char::from_u32)
                    .map(|c| (Escaped::Char(c), 6)),
                _ => None,
            };
            if let Some((escaped, len)) = escape {
                match escaped {
                    Escaped::Byte(b) => pending.push(b),
                    Escaped::Char(ch) => {
                        flush_bytes(&mut pending, &mut out)?;
                        out.push(ch);
                    },
                }
                changed = true;
                // Skip the rest of the escape sequence
                for _ in 1..len {
                    chars.next();
                }
                continue;
            }
        }
        flush_bytes(&mut pending, &mut out)?;
        out.push(c);
    }
    flush_bytes(&mut pending, &mut out)?;

    changed.then_some(out)
}

enum Escaped {
    Byte(u8),
    Char(char),
}

/// `\xNN` runs may spell a multi-byte UTF-8 sequence
fn flush_bytes(pending: &mut Vec<u8>, out: &mut String) -> Option<()> {
    if pending.is_empty() {
        return Some(());
    }
    let text = std::str::from_utf8(pending).ok()?;
    out.push_str(text);
    pending.clear();
    Some(())
}

pub(crate) fn decode_base64(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.len() < MIN_BASE64_LEN || trimmed.len() % 4 != 0 {
        return None;
    }
    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'-' | b'_' | b'='))
    {
        return None;
    }

    let bytes = STANDARD
        .decode(trimmed)
        .or_else(|_| URL_SAFE.decode(trimmed))
        .ok()?;
    let text = String::from_utf8(bytes).ok()?;
    (!text.is_empty() && is_printable(&text)).then_some(text)
}

fn is_printable(s: &str) -> bool {
    s.chars().all(|c| !c.is_control() || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_decode() {
        assert_eq!(
            decode_url("%27%3B%20DROP%20TABLE%3B%20--").as_deref(),
            Some("'; DROP TABLE; --")
        );
        assert_eq!(decode_url("plain text"), None);
        // Invalid UTF-8 after decoding keeps the previous value
        assert_eq!(decode_url("%FF%FE"), None);
    }

    #[test]
    fn test_html_entities() {
        assert_eq!(
            decode_html_entities("&#39; OR &#x31;&equals;1").as_deref(),
            Some("' OR 1=1")
        );
        assert_eq!(decode_html_entities("&dollar;where").as_deref(), Some("$where"));
        assert_eq!(decode_html_entities("Tom & Jerry"), None);
        assert_eq!(decode_html_entities("&bogus;"), None);
    }

    #[test]
    fn test_hex_escapes() {
        assert_eq!(decode_hex(r"\x24where").as_deref(), Some("$where"));
        assert_eq!(decode_hex(r"\u0024ne").as_deref(), Some("$ne"));
        assert_eq!(decode_hex("0x27204f52").as_deref(), Some("' OR"));
        assert_eq!(decode_hex("0X272D2D").as_deref(), Some("'--"));
        assert_eq!(decode_hex("0x27zz"), None);
        assert_eq!(decode_hex(r"C:\path"), None);
        // ObjectIds are not 0x-prefixed and stay untouched
        assert_eq!(decode_hex("507f1f77bcf86cd799439011"), None);
    }

    #[test]
    fn test_base64() {
        let encoded = STANDARD.encode("' OR 1=1 --");
        assert_eq!(decode_base64(&encoded).as_deref(), Some("' OR 1=1 --"));
        // Short or binary-decoding strings are left alone
        assert_eq!(decode_base64("oval"), None);
        assert_eq!(decode_base64("ABCDEFGH"), None);
    }
}
