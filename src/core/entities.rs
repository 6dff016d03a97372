//! Built-in entities and character references
//!
//! The five predefined entities and numeric character references are
//! decoded under every policy. User-declared entities go through
//! `core::expansion` instead.
//!
//! Output escaping uses Cow for zero-copy when nothing needs escaping.

use memchr::memchr3;
use std::borrow::Cow;

/// Replacement for one of the predefined entities
#[inline]
pub fn predefined(name: &[u8]) -> Option<&'static str> {
    match name {
        b"lt" => Some("<"),
        b"gt" => Some(">"),
        b"amp" => Some("&"),
        b"quot" => Some("\""),
        b"apos" => Some("'"),
        _ => None,
    }
}

/// Decode the body of a character reference (the part between `&#` and `;`)
pub fn decode_char_ref(body: &[u8]) -> Option<char> {
    let codepoint = match body.split_first()? {
        (b'x', hex) => {
            if hex.is_empty() || !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            u32::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?
        }
        _ => {
            if !body.iter().all(u8::is_ascii_digit) {
                return None;
            }
            std::str::from_utf8(body).ok()?.parse::<u32>().ok()?
        }
    };
    if !is_valid_xml_char(codepoint) {
        return None;
    }
    char::from_u32(codepoint)
}

/// Check if a code point is a valid XML 1.0 Char
/// Char ::= #x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]
#[inline]
pub fn is_valid_xml_char(codepoint: u32) -> bool {
    matches!(codepoint,
        0x9 | 0xA | 0xD |
        0x20..=0xD7FF |
        0xE000..=0xFFFD |
        0x10000..=0x10FFFF
    )
}

/// Find the first character not allowed in XML 1.0 content
pub fn find_invalid_char(content: &str) -> Option<(usize, char)> {
    content
        .char_indices()
        .find(|&(_, c)| !is_valid_xml_char(c as u32))
}

/// Drop a leading BOM and text declaration (`<?xml ...?>`) from external content
pub fn strip_text_declaration(content: &str) -> &str {
    let content = content.strip_prefix('\u{FEFF}').unwrap_or(content);
    if content.starts_with("<?xml") && content[5..].starts_with(|c: char| c.is_ascii_whitespace()) {
        if let Some(end) = content.find("?>") {
            return &content[end + 2..];
        }
    }
    content
}

/// Escape text content for output
pub fn encode_text(input: &str) -> Cow<'_, str> {
    if memchr3(b'<', b'>', b'&', input.as_bytes()).is_none() {
        return Cow::Borrowed(input);
    }
    let mut result = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            _ => result.push(c),
        }
    }
    Cow::Owned(result)
}

/// Escape an attribute value for output in double quotes
pub fn encode_attribute(input: &str) -> Cow<'_, str> {
    if !input.bytes().any(|b| matches!(b, b'<' | b'&' | b'"' | b'\t' | b'\n' | b'\r')) {
        return Cow::Borrowed(input);
    }
    let mut result = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '&' => result.push_str("&amp;"),
            '"' => result.push_str("&quot;"),
            '\t' => result.push_str("&#9;"),
            '\n' => result.push_str("&#10;"),
            '\r' => result.push_str("&#13;"),
            _ => result.push(c),
        }
    }
    Cow::Owned(result)
}
