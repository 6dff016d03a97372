//! XML Attribute Parsing
//!
//! Splits the attribute part of a start tag into raw name/value pairs.
//! Values come back undecoded; references in them are expanded by the
//! parser, which knows the declared entities and the policy.

use super::scanner::Scanner;

/// A raw attribute as it appears in the tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute<'a> {
    pub name: &'a [u8],
    /// Value between the quotes, references not yet expanded
    pub value: &'a [u8],
    /// Offset of the value within the tag input
    pub offset: usize,
}

/// Attribute syntax error with its offset in the tag input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeError {
    pub message: &'static str,
    pub offset: usize,
}

/// Parse attributes from raw tag content (after the element name, before
/// `>` or `/>`)
pub fn split_attributes(input: &[u8]) -> Result<Vec<RawAttribute<'_>>, AttributeError> {
    let mut attrs: Vec<RawAttribute<'_>> = Vec::new();
    let mut sc = Scanner::new(input);
    let fail = |message, offset| Err(AttributeError { message, offset });

    loop {
        let had_ws = sc.skip_whitespace();
        if sc.is_eof() {
            return Ok(attrs);
        }
        if !had_ws {
            return fail("whitespace required between attributes", sc.position());
        }

        let name_at = sc.position();
        let name = match sc.read_name() {
            Some(name) => name,
            None => return fail("invalid attribute name", name_at),
        };

        sc.skip_whitespace();
        if !sc.eat(b"=") {
            return fail("attribute value required", sc.position());
        }
        sc.skip_whitespace();

        let value_at = sc.position() + 1;
        let value = match sc.read_quoted() {
            Some(value) => value,
            None => return fail("attribute value must be quoted and terminated", sc.position()),
        };
        if let Some(lt) = memchr::memchr(b'<', value) {
            return fail("attribute value cannot contain '<'", value_at + lt);
        }
        if attrs.iter().any(|a| a.name == name) {
            return fail("duplicate attribute", name_at);
        }

        attrs.push(RawAttribute {
            name,
            value,
            offset: value_at,
        });
    }
}
