//! Document Parser
//!
//! Markup text to `Document` under a `ParserPolicy`. The prolog (XML
//! declaration, comments, PIs, DOCTYPE) is read first; declarations go
//! into a per-parse `DtdDeclarations` table. The body is then built with
//! an explicit element stack, so element nesting costs heap, not call stack.
//!
//! Entity replacement text is parsed as content in place of the reference,
//! one call level per entity, bounded by `MAX_ENTITY_DEPTH`. Errors inside
//! replacement text are reported at the reference.

use std::borrow::Cow;

use memchr::{memchr, memmem};

use super::attributes::split_attributes;
use super::dtd::{
    load_external_subset, parse_external_id, parse_internal_subset, DtdDeclarations, EntityValue,
};
use super::entities::{decode_char_ref, find_invalid_char, predefined};
use super::expansion::{Expansion, Origin};
use super::scanner::Scanner;
use crate::dom::{Document, Element, Node};
use crate::error::{DisallowReason, ParseError};
use crate::policy::ParserPolicy;
use crate::resolver::EntityResolver;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Parse a complete document.
///
/// Every external reference goes through `resolver`, and only when
/// `policy` allows it. No partial tree is returned on error.
pub fn parse(
    input: &[u8],
    policy: &ParserPolicy,
    resolver: &dyn EntityResolver,
) -> Result<Document, ParseError> {
    let (text, base) = match input.strip_prefix(BOM) {
        Some(rest) => (rest, BOM.len()),
        None => (input, 0),
    };
    let as_str = std::str::from_utf8(text)
        .map_err(|e| ParseError::malformed("document is not valid UTF-8", base + e.valid_up_to()))?;
    if let Some((i, c)) = find_invalid_char(as_str) {
        return Err(ParseError::malformed(
            format!("character U+{:04X} not allowed in XML", c as u32),
            base + i,
        ));
    }

    tracing::debug!(
        bytes = input.len(),
        external = policy.external_entities,
        parameter = policy.parameter_entities,
        "parsing document"
    );

    let origin = Origin::Offset(base);
    let mut expansion = Expansion::new(policy, resolver);
    let mut decls = DtdDeclarations::new();
    let mut sc = Scanner::new(text);

    parse_prolog(&mut sc, origin, &mut decls, &mut expansion)?;

    let mut body = Body {
        decls: &decls,
        expansion: &mut expansion,
        stack: Vec::with_capacity(32),
        floor: 0,
        root: None,
    };
    body.content(&mut sc, origin)?;
    let root = body.finish(origin.locate(sc.position()))?;

    let document = Document::new(root);
    tracing::debug!(
        elements = document.element_count(),
        expanded_bytes = expansion.produced(),
        "document parsed"
    );
    Ok(document)
}

/// Everything before the root start tag
fn parse_prolog(
    sc: &mut Scanner<'_>,
    origin: Origin,
    decls: &mut DtdDeclarations,
    expansion: &mut Expansion<'_>,
) -> Result<(), ParseError> {
    if sc.starts_with(b"<?xml") && matches!(sc.remaining().get(5), Some(b' ' | b'\t' | b'\n' | b'\r')) {
        sc.read_until_seq(b"?>")
            .ok_or_else(|| ParseError::malformed("unterminated XML declaration", origin.locate(0)))?;
    }

    let mut seen_doctype = false;
    loop {
        sc.skip_whitespace();
        let at = origin.locate(sc.position());
        if sc.is_eof() {
            return Err(ParseError::malformed("no root element", at));
        }
        if sc.starts_with(b"<!--") {
            read_comment(sc, origin)?;
        } else if sc.starts_with(b"<?") {
            read_pi(sc, origin)?;
        } else if sc.starts_with(b"<!DOCTYPE") {
            if seen_doctype {
                return Err(ParseError::malformed("only one DOCTYPE is allowed", at));
            }
            seen_doctype = true;
            parse_doctype(sc, origin, decls, expansion)?;
        } else if sc.peek() == Some(b'<') {
            return Ok(());
        } else {
            return Err(ParseError::malformed("content before root element", at));
        }
    }
}

/// `<!DOCTYPE name [ExternalID] ['[' internal subset ']']>`
fn parse_doctype(
    sc: &mut Scanner<'_>,
    origin: Origin,
    decls: &mut DtdDeclarations,
    expansion: &mut Expansion<'_>,
) -> Result<(), ParseError> {
    let at = origin.locate(sc.position());
    let err = |msg: &str, pos: usize| ParseError::malformed(msg, origin.locate(pos));
    sc.advance(b"<!DOCTYPE".len());

    if !sc.skip_whitespace() {
        return Err(err("whitespace required after <!DOCTYPE", sc.position()));
    }
    let name = sc
        .read_name()
        .ok_or_else(|| err("DOCTYPE requires a root element name", sc.position()))?;
    let name = String::from_utf8_lossy(name).into_owned();

    let had_ws = sc.skip_whitespace();
    let external = if had_ws && (sc.starts_with(b"SYSTEM") || sc.starts_with(b"PUBLIC")) {
        let reference = parse_external_id(sc).map_err(|msg| err(msg, sc.position()))?;
        sc.skip_whitespace();
        Some(reference)
    } else {
        None
    };

    let subset = if sc.eat(b"[") {
        let start = sc.position();
        let len = find_subset_end(sc.remaining())
            .ok_or_else(|| err("unterminated DOCTYPE internal subset", start))?;
        sc.set_position(start + len + 1);
        sc.skip_whitespace();
        Some((start, sc.slice(start, start + len)))
    } else {
        None
    };

    if !sc.eat(b">") {
        return Err(err("expected '>' to close DOCTYPE", sc.position()));
    }

    if !expansion.policy().allow_doctype {
        expansion.refuse("!DOCTYPE", DisallowReason::Doctype)?;
        decls.mark_skipped();
        return Ok(());
    }

    tracing::debug!(doctype = %name, external_subset = external.is_some(), "doctype");
    if let Some((start, subset)) = subset {
        parse_internal_subset(subset, origin.locate(start), decls, expansion)?;
    }
    // Internal subset first: its declarations take precedence
    if let Some(reference) = external {
        load_external_subset(&reference, at, decls, expansion)?;
    }
    Ok(())
}

/// Offset of the `]` closing the internal subset. Brackets inside quoted
/// literals, comments and PIs do not count.
fn find_subset_end(bytes: &[u8]) -> Option<usize> {
    let mut pos = 0;
    let mut depth = 0usize;
    let mut in_decl = false;
    let mut quote: Option<u8> = None;

    while pos < bytes.len() {
        let b = bytes[pos];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            pos += 1;
            continue;
        }
        let rest = &bytes[pos..];
        if rest.starts_with(b"<!--") {
            pos += 4 + memmem::find(&rest[4..], b"-->")? + 3;
            continue;
        }
        if rest.starts_with(b"<?") {
            pos += 2 + memmem::find(&rest[2..], b"?>")? + 2;
            continue;
        }
        match b {
            b'<' if rest.starts_with(b"<!") => in_decl = true,
            b'>' => in_decl = false,
            b'"' | b'\'' if in_decl => quote = Some(b),
            b'[' => depth += 1,
            b']' if depth == 0 => return Some(pos),
            b']' => depth -= 1,
            _ => {}
        }
        pos += 1;
    }
    None
}

/// `<!-- ... -->`, returning the comment text
fn read_comment(sc: &mut Scanner<'_>, origin: Origin) -> Result<String, ParseError> {
    let at = origin.locate(sc.position());
    sc.advance(4);
    let body = sc
        .read_until_seq(b"-->")
        .ok_or_else(|| ParseError::malformed("unterminated comment", at))?;
    if memmem::find(body, b"--").is_some() || body.last() == Some(&b'-') {
        return Err(ParseError::malformed("'--' not allowed inside comment", at));
    }
    Ok(String::from_utf8_lossy(body).into_owned())
}

/// `<?target data?>`, returning (target, data)
fn read_pi(sc: &mut Scanner<'_>, origin: Origin) -> Result<(String, String), ParseError> {
    let at = origin.locate(sc.position());
    sc.advance(2);
    let target = sc
        .read_name()
        .ok_or_else(|| ParseError::malformed("processing instruction requires a target", at))?;
    if target.eq_ignore_ascii_case(b"xml") {
        return Err(ParseError::malformed(
            "XML declaration allowed only at the start of the document",
            at,
        ));
    }
    let target = String::from_utf8_lossy(target).into_owned();
    if sc.eat(b"?>") {
        return Ok((target, String::new()));
    }
    if !sc.skip_whitespace() {
        return Err(ParseError::malformed("whitespace required after processing instruction target", at));
    }
    let data = sc
        .read_until_seq(b"?>")
        .ok_or_else(|| ParseError::malformed("unterminated processing instruction", at))?;
    Ok((target, String::from_utf8_lossy(data).into_owned()))
}

/// Tree builder for the document body
struct Body<'d, 'e, 'p> {
    decls: &'d DtdDeclarations,
    expansion: &'e mut Expansion<'p>,
    /// Open elements, innermost last
    stack: Vec<Element>,
    /// Elements below this depth belong to an enclosing entity
    floor: usize,
    root: Option<Element>,
}

impl Body<'_, '_, '_> {
    fn content(&mut self, sc: &mut Scanner<'_>, origin: Origin) -> Result<(), ParseError> {
        loop {
            if self.stack.is_empty() {
                sc.skip_whitespace();
                if sc.is_eof() {
                    return Ok(());
                }
                let at = origin.locate(sc.position());
                if sc.starts_with(b"<!--") {
                    read_comment(sc, origin)?;
                    continue;
                }
                if sc.starts_with(b"<?") {
                    read_pi(sc, origin)?;
                    continue;
                }
                if self.root.is_some() {
                    return Err(ParseError::malformed("content after root element", at));
                }
                if sc.starts_with(b"</") || sc.peek() != Some(b'<') {
                    return Err(ParseError::malformed("expected root element", at));
                }
                self.start_tag(sc, origin)?;
                continue;
            }

            if sc.is_eof() {
                return Ok(());
            }

            let start = sc.position();
            let boundary = sc.find_text_boundary().unwrap_or(start + sc.remaining().len());
            if boundary > start {
                let chunk = sc.slice(start, boundary);
                if let Some(i) = memmem::find(chunk, b"]]>") {
                    return Err(ParseError::malformed("']]>' not allowed in text", origin.locate(start + i)));
                }
                let chunk = String::from_utf8_lossy(chunk);
                self.push_text(&normalize_newlines(&chunk));
                sc.set_position(boundary);
                continue;
            }

            if sc.peek() == Some(b'&') {
                self.reference(sc, origin)?;
            } else if sc.starts_with(b"<!--") {
                let comment = read_comment(sc, origin)?;
                self.push_node(Node::Comment(comment));
            } else if sc.starts_with(b"<![CDATA[") {
                let at = origin.locate(start);
                sc.advance(9);
                let data = sc
                    .read_until_seq(b"]]>")
                    .ok_or_else(|| ParseError::malformed("unterminated CDATA section", at))?;
                self.push_text(&normalize_newlines(&String::from_utf8_lossy(data)));
            } else if sc.starts_with(b"<?") {
                let (target, data) = read_pi(sc, origin)?;
                self.push_node(Node::ProcessingInstruction { target, data });
            } else if sc.starts_with(b"</") {
                self.end_tag(sc, origin)?;
            } else if sc.starts_with(b"<!") {
                return Err(ParseError::malformed("markup declaration not allowed in content", origin.locate(start)));
            } else {
                self.start_tag(sc, origin)?;
            }
        }
    }

    /// Root element once the whole input is consumed
    fn finish(self, eof: usize) -> Result<Element, ParseError> {
        if let Some(open) = self.stack.last() {
            return Err(ParseError::malformed(format!("unclosed element '{}'", open.name), eof));
        }
        self.root
            .ok_or_else(|| ParseError::malformed("no root element", eof))
    }

    fn start_tag(&mut self, sc: &mut Scanner<'_>, origin: Origin) -> Result<(), ParseError> {
        let at = origin.locate(sc.position());
        sc.advance(1);
        let name = sc
            .read_name()
            .ok_or_else(|| ParseError::malformed("invalid element name", at))?;
        let end = sc
            .find_tag_end_quoted()
            .ok_or_else(|| ParseError::malformed("unterminated start tag", at))?;

        let attr_base = sc.position();
        let mut raw = sc.slice(attr_base, end);
        let self_closing = raw.last() == Some(&b'/');
        if self_closing {
            raw = &raw[..raw.len() - 1];
        }
        sc.set_position(end + 1);

        let mut element = Element::new(String::from_utf8_lossy(name));
        let attrs = split_attributes(raw)
            .map_err(|e| ParseError::malformed(e.message, origin.locate(attr_base + e.offset)))?;
        for attr in attrs {
            let value_at = origin.locate(attr_base + attr.offset);
            let mut value = String::with_capacity(attr.value.len());
            self.attribute_value(attr.value, value_at, &mut value)?;
            element
                .attributes
                .push((String::from_utf8_lossy(attr.name).into_owned(), value));
        }

        self.stack.push(element);
        if self_closing {
            self.close_top();
        }
        Ok(())
    }

    fn end_tag(&mut self, sc: &mut Scanner<'_>, origin: Origin) -> Result<(), ParseError> {
        let at = origin.locate(sc.position());
        sc.advance(2);
        let name = sc
            .read_name()
            .ok_or_else(|| ParseError::malformed("invalid end tag", at))?;
        sc.skip_whitespace();
        if !sc.eat(b">") {
            return Err(ParseError::malformed("expected '>' to close end tag", at));
        }

        if self.stack.len() <= self.floor {
            return Err(ParseError::malformed(
                format!("unexpected end tag '{}'", String::from_utf8_lossy(name)),
                at,
            ));
        }
        let open = self.stack.last().map(|e| e.name.as_bytes());
        if open != Some(name) {
            return Err(ParseError::malformed(
                format!(
                    "end tag '{}' does not match '{}'",
                    String::from_utf8_lossy(name),
                    String::from_utf8_lossy(open.unwrap_or_default())
                ),
                at,
            ));
        }
        self.close_top();
        Ok(())
    }

    fn close_top(&mut self) {
        if let Some(element) = self.stack.pop() {
            match self.stack.last_mut() {
                Some(parent) => parent.push(Node::Element(element)),
                None => self.root = Some(element),
            }
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(top) = self.stack.last_mut() {
            top.push_text(text);
        }
    }

    fn push_node(&mut self, node: Node) {
        if let Some(top) = self.stack.last_mut() {
            top.push(node);
        }
    }

    /// `&...;` in content
    fn reference(&mut self, sc: &mut Scanner<'_>, origin: Origin) -> Result<(), ParseError> {
        let at = origin.locate(sc.position());
        if sc.eat(b"&#") {
            let c = char_reference(sc, at)?;
            let mut buf = [0u8; 4];
            self.push_text(c.encode_utf8(&mut buf));
            return Ok(());
        }
        sc.advance(1);
        let name = reference_name(sc, at)?;
        if let Some(text) = predefined(name) {
            self.push_text(text);
            return Ok(());
        }
        let name = String::from_utf8_lossy(name);

        let decls = self.decls;
        let Some(decl) = decls.general(&name) else {
            return self.undeclared(&name, at);
        };

        let key = format!("&{}", name);
        match &decl.value {
            EntityValue::Internal(text) => {
                self.expansion.charge(&name, text.len())?;
                self.expansion.enter(&key, at)?;
                self.entity_content(&name, text.as_bytes(), at)?;
                self.expansion.leave();
            }
            EntityValue::External { ndata: Some(_), .. } => {
                return Err(ParseError::malformed(
                    format!("reference to unparsed entity '{}'", name),
                    at,
                ));
            }
            EntityValue::External { reference, ndata: None } => {
                let policy = self.expansion.policy();
                if !policy.allows_external(reference.kind) {
                    let reason = if policy.external_entities {
                        DisallowReason::OutOfScope
                    } else {
                        DisallowReason::ExternalEntity
                    };
                    return self.expansion.refuse(&name, reason);
                }
                self.expansion.enter(&key, at)?;
                let text = self.expansion.fetch(&name, reference, at)?;
                self.entity_content(&name, text.as_bytes(), at)?;
                self.expansion.leave();
            }
        }
        Ok(())
    }

    /// Parse replacement text as content; it must leave the stack as it found it
    fn entity_content(&mut self, name: &str, text: &[u8], at: usize) -> Result<(), ParseError> {
        let floor = std::mem::replace(&mut self.floor, self.stack.len());
        let mut sc = Scanner::new(text);
        self.content(&mut sc, Origin::At(at))?;
        if self.stack.len() != self.floor {
            return Err(ParseError::malformed(
                format!("entity '{}' leaves an element unclosed", name),
                at,
            ));
        }
        self.floor = floor;
        Ok(())
    }

    fn undeclared(&self, name: &str, at: usize) -> Result<(), ParseError> {
        if self.decls.is_skipped() {
            return self.expansion.refuse(name, DisallowReason::SkippedDeclaration);
        }
        Err(ParseError::malformed(format!("undeclared entity '{}'", name), at))
    }

    /// Expand an attribute value into `out`: references resolved, whitespace
    /// characters normalized to spaces
    fn attribute_value(&mut self, raw: &[u8], at: usize, out: &mut String) -> Result<(), ParseError> {
        let mut sc = Scanner::new(raw);
        while !sc.is_eof() {
            let start = sc.position();
            let end = sc.find_byte(b'&').unwrap_or(raw.len());
            for c in String::from_utf8_lossy(sc.slice(start, end)).chars() {
                out.push(match c {
                    '\t' | '\n' | '\r' => ' ',
                    c => c,
                });
            }
            sc.set_position(end);
            if sc.is_eof() {
                break;
            }

            if sc.eat(b"&#") {
                out.push(char_reference(&mut sc, at)?);
                continue;
            }
            sc.advance(1);
            let name = reference_name(&mut sc, at)?;
            if let Some(text) = predefined(name) {
                out.push_str(text);
                continue;
            }
            let name = String::from_utf8_lossy(name);

            let decls = self.decls;
            let Some(decl) = decls.general(&name) else {
                self.undeclared(&name, at)?;
                continue;
            };
            match &decl.value {
                EntityValue::Internal(text) => {
                    if memchr(b'<', text.as_bytes()).is_some() {
                        return Err(ParseError::malformed(
                            format!("entity '{}' puts '<' in an attribute value", name),
                            at,
                        ));
                    }
                    self.expansion.charge(&name, text.len())?;
                    let key = format!("&{}", name);
                    self.expansion.enter(&key, at)?;
                    self.attribute_value(text.as_bytes(), at, out)?;
                    self.expansion.leave();
                }
                EntityValue::External { .. } => {
                    return Err(ParseError::malformed(
                        format!("external entity '{}' referenced in attribute value", name),
                        at,
                    ));
                }
            }
        }
        Ok(())
    }
}

/// After `&#`: body up to `;`, decoded
fn char_reference(sc: &mut Scanner<'_>, at: usize) -> Result<char, ParseError> {
    let end = sc
        .find_byte(b';')
        .ok_or_else(|| ParseError::malformed("unterminated character reference", at))?;
    let c = decode_char_ref(sc.slice(sc.position(), end))
        .ok_or_else(|| ParseError::malformed("invalid character reference", at))?;
    sc.set_position(end + 1);
    Ok(c)
}

/// After `&`: `name;`
fn reference_name<'a>(sc: &mut Scanner<'a>, at: usize) -> Result<&'a [u8], ParseError> {
    let name = sc
        .read_name()
        .ok_or_else(|| ParseError::malformed("'&' must start a reference", at))?;
    if !sc.eat(b";") {
        return Err(ParseError::malformed("reference must end with ';'", at));
    }
    Ok(name)
}

/// CRLF and lone CR become LF
fn normalize_newlines(text: &str) -> Cow<'_, str> {
    if memchr(b'\r', text.as_bytes()).is_none() {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expansion::MAX_ENTITY_DEPTH;
    use crate::policy::{ReferenceScope, Strictness};
    use crate::resolver::{DenyResolver, MapResolver};

    const SECRET: &str = "XXE{lxml_pr0tect_y0ur_p4rs3r}";

    const XXE_DOC: &str = r#"<?xml version="1.0"?>
<!DOCTYPE root [<!ENTITY xxe SYSTEM "file">]>
<root>&xxe;</root>"#;

    const PE_BYPASS_DOC: &str = r#"<!DOCTYPE config [
  <!ENTITY % secret SYSTEM "file:///app/secrets/admin_token.txt">
  <!ENTITY % wrap "<!ENTITY leak '%secret;'>">
  %wrap;
]>
<config><setting name="token">&leak;</setting></config>"#;

    fn secret_resolver() -> MapResolver {
        MapResolver::new()
            .with("file", SECRET)
            .with("file:///app/secrets/admin_token.txt", SECRET)
    }

    fn parse_str(xml: &str, policy: &ParserPolicy) -> Result<Document, ParseError> {
        parse(xml.as_bytes(), policy, &secret_resolver())
    }

    fn assert_malformed(xml: &str) {
        match parse_str(xml, &ParserPolicy::permissive()) {
            Err(ParseError::Malformed { .. }) => {}
            other => panic!("expected malformed for {:?}, got {:?}", xml, other),
        }
    }

    #[test]
    fn test_simple_document() {
        let doc = parse_str(
            "<?xml version=\"1.0\"?><!-- lead --><data id=\"1\"><user>Alice</user><user/></data>",
            &ParserPolicy::hardened(),
        )
        .unwrap();
        let root = doc.root();
        assert_eq!(root.name, "data");
        assert_eq!(root.attribute("id"), Some("1"));
        let users: Vec<_> = root.child_elements().collect();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].text(), Some("Alice"));
        assert_eq!(users[1].text(), None);
    }

    #[test]
    fn test_policy_is_noop_without_declarations() {
        let xml = r#"<config a="x &amp; y"><setting name="k">v &#65; <![CDATA[<raw>]]></setting><?pi d?><!--c--></config>"#;
        let permissive = parse_str(xml, &ParserPolicy::permissive()).unwrap();
        let partial = parse_str(xml, &ParserPolicy::partial()).unwrap();
        let hardened = parse_str(xml, &ParserPolicy::hardened()).unwrap();
        assert_eq!(permissive, partial);
        assert_eq!(permissive, hardened);
        let setting = hardened.root().child_elements().next().unwrap();
        assert_eq!(setting.text(), Some("v A <raw>"));
    }

    #[test]
    fn test_permissive_substitutes_resolver_bytes() {
        let doc = parse_str(XXE_DOC, &ParserPolicy::permissive()).unwrap();
        assert_eq!(doc.root().text(), Some(SECRET));
    }

    #[test]
    fn test_hardened_rejects_external_entity() {
        let err = parse_str(XXE_DOC, &ParserPolicy::hardened()).unwrap_err();
        match err {
            ParseError::DisallowedEntity { name, reason } => {
                assert_eq!(name, "xxe");
                assert_eq!(reason, DisallowReason::ExternalEntity);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_substitute_expands_to_empty() {
        let doc = parse_str(XXE_DOC, &ParserPolicy::partial()).unwrap();
        assert_eq!(doc.root().text(), None);
        assert!(!doc.to_xml().contains(SECRET));
    }

    #[test]
    fn test_parameter_entity_bypass() {
        let doc = parse_str(PE_BYPASS_DOC, &ParserPolicy::partial()).unwrap();
        let setting = doc.root().child_elements().next().unwrap();
        assert_eq!(setting.text(), Some(SECRET));

        let err = parse_str(PE_BYPASS_DOC, &ParserPolicy::hardened()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::DisallowedEntity { reason: DisallowReason::ParameterEntity, .. }
        ));

        let mut substitute = ParserPolicy::hardened();
        substitute.strictness = Strictness::Substitute;
        let doc = parse_str(PE_BYPASS_DOC, &substitute).unwrap();
        assert!(!doc.to_xml().contains(SECRET));
    }

    #[test]
    fn test_internal_entity_markup() {
        let xml = r#"<!DOCTYPE a [<!ENTITY e "<b>bold</b> tail"><!ENTITY n "&e;!">]><a>x &n; y</a>"#;
        let doc = parse_str(xml, &ParserPolicy::hardened()).unwrap();
        assert_eq!(doc.to_xml(), "<a>x <b>bold</b> tail! y</a>");
    }

    #[test]
    fn test_attribute_values() {
        let xml = "<!DOCTYPE a [<!ENTITY e \"v&#x9;w\">]><a x=\"1\n2 &e; &amp; &#10;\"/>";
        let doc = parse_str(xml, &ParserPolicy::hardened()).unwrap();
        assert_eq!(doc.root().attribute("x"), Some("1 2 v w & \n"));
    }

    #[test]
    fn test_billion_laughs_capped() {
        let xml = r#"<!DOCTYPE lolz [
  <!ENTITY lol "lol">
  <!ENTITY lol1 "&lol;&lol;&lol;&lol;&lol;&lol;&lol;&lol;&lol;&lol;">
  <!ENTITY lol2 "&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;">
  <!ENTITY lol3 "&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;">
  <!ENTITY lol4 "&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;">
]>
<lolz>&lol4;</lolz>"#;
        let doc = parse_str(xml, &ParserPolicy::permissive()).unwrap();
        assert_eq!(doc.root().text().map(str::len), Some(3 * 10_000));

        let mut capped = ParserPolicy::hardened();
        capped.max_expansion_bytes = Some(4096);
        let err = parse_str(xml, &capped).unwrap_err();
        assert!(matches!(
            err,
            ParseError::DisallowedEntity { reason: DisallowReason::ExpansionLimit, .. }
        ));
    }

    /// `e0` -> `e1` -> ... -> `e{depth-1}`, each a distinct internal entity
    fn entity_chain(depth: usize, body: &str) -> String {
        let mut xml = String::from("<!DOCTYPE r [");
        for i in 0..depth {
            if i + 1 == depth {
                xml.push_str(&format!("<!ENTITY e{} \"end\">", i));
            } else {
                xml.push_str(&format!("<!ENTITY e{} \"&e{};\">", i, i + 1));
            }
        }
        xml.push_str("]>");
        xml.push_str(body);
        xml
    }

    #[test]
    fn test_entity_depth_limit() {
        let hardened = ParserPolicy::hardened();
        let doc = parse_str(&entity_chain(MAX_ENTITY_DEPTH, "<r>&e0;</r>"), &hardened).unwrap();
        assert_eq!(doc.root().text(), Some("end"));

        for body in ["<r>&e0;</r>", r#"<r a="&e0;"/>"#] {
            for depth in [MAX_ENTITY_DEPTH + 1, 100_000] {
                let err = parse_str(&entity_chain(depth, body), &hardened).unwrap_err();
                assert!(matches!(
                    err,
                    ParseError::DisallowedEntity { reason: DisallowReason::DepthLimit, .. }
                ));
            }
        }

        // Not a policy choice: substitution does not apply
        let err = parse_str(&entity_chain(100_000, "<r>&e0;</r>"), &ParserPolicy::permissive()).unwrap_err();
        assert_eq!(err.kind(), "disallowed_entity");
    }

    #[test]
    fn test_deep_nesting_parses_and_drops() {
        let depth = 200_000;
        let xml = format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth));
        let doc = parse_str(&xml, &ParserPolicy::hardened()).unwrap();
        assert_eq!(doc.element_count(), depth);
        drop(doc);

        // Error path: the partial tree is dropped too
        let unclosed = format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth - 1));
        assert_eq!(parse_str(&unclosed, &ParserPolicy::hardened()).unwrap_err().kind(), "malformed");
    }

    #[test]
    fn test_resolved_text_must_be_xml_chars() {
        let resolver = MapResolver::new().with("file", "ab\u{1}cd");
        let err = parse(XXE_DOC.as_bytes(), &ParserPolicy::permissive(), &resolver).unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[test]
    fn test_scope_refusal() {
        let mut policy = ParserPolicy::permissive();
        policy.scope = ReferenceScope::NetworkOnly;
        policy.strictness = Strictness::Reject;
        let err = parse_str(XXE_DOC, &policy).unwrap_err();
        assert!(matches!(
            err,
            ParseError::DisallowedEntity { reason: DisallowReason::OutOfScope, .. }
        ));
    }

    #[test]
    fn test_resolution_failure() {
        let err = parse(XXE_DOC.as_bytes(), &ParserPolicy::permissive(), &DenyResolver).unwrap_err();
        assert_eq!(err.kind(), "resolution_failed");
    }

    #[test]
    fn test_external_entity_parsed_as_content() {
        let resolver = MapResolver::new().with("part.xml", "<?xml version=\"1.0\" encoding=\"UTF-8\"?><item>v</item>");
        let xml = r#"<!DOCTYPE a [<!ENTITY part SYSTEM "part.xml">]><a>&part;</a>"#;
        let doc = parse(xml.as_bytes(), &ParserPolicy::permissive(), &resolver).unwrap();
        assert_eq!(doc.to_xml(), "<a><item>v</item></a>");
    }

    #[test]
    fn test_external_subset() {
        let resolver = MapResolver::new().with("config.dtd", r#"<!ENTITY remote "from dtd">"#);
        let xml = r#"<!DOCTYPE a SYSTEM "config.dtd"><a>&remote;</a>"#;
        let doc = parse(xml.as_bytes(), &ParserPolicy::permissive(), &resolver).unwrap();
        assert_eq!(doc.root().text(), Some("from dtd"));

        let err = parse(xml.as_bytes(), &ParserPolicy::hardened(), &resolver).unwrap_err();
        assert!(matches!(
            err,
            ParseError::DisallowedEntity { reason: DisallowReason::SkippedDeclaration, .. }
        ));
    }

    #[test]
    fn test_doctype_not_allowed() {
        let mut policy = ParserPolicy::permissive();
        policy.allow_doctype = false;
        policy.strictness = Strictness::Reject;
        let err = parse_str(XXE_DOC, &policy).unwrap_err();
        assert!(matches!(err, ParseError::DisallowedEntity { reason: DisallowReason::Doctype, .. }));

        policy.strictness = Strictness::Substitute;
        let doc = parse_str(XXE_DOC, &policy).unwrap();
        assert_eq!(doc.root().text(), None);
    }

    #[test]
    fn test_malformed_never_yields_tree() {
        for xml in [
            "",
            "just text",
            "<a>",
            "<a><b></a>",
            "<a></a><b/>",
            "<a/>trailing",
            "<a>]]></a>",
            "<a x=\"1\" x=\"2\"/>",
            "<a>&undeclared;</a>",
            "<a>& b</a>",
            "<a>&#0;</a>",
            "<a><!-- a -- b --></a>",
            "<a><?xml version=\"1.0\"?></a>",
            " <?xml version=\"1.0\"?><a/>",
            "<!DOCTYPE a><!DOCTYPE a><a/>",
            "<!DOCTYPE a [<!ENTITY a \"&b;\"><!ENTITY b \"&a;\">]><a>&a;</a>",
            "<!DOCTYPE a [<!ENTITY e \"<b>\">]><a>&e;</a>",
            "<!DOCTYPE a [<!ENTITY e \"</a>\">]><a>&e;</a>",
            "<!DOCTYPE a [<!ENTITY e \"<\">]><a x=\"&e;\"/>",
            "<!DOCTYPE a [<!ENTITY x SYSTEM \"file\">]><a v=\"&x;\"/>",
            "<!DOCTYPE a [<!ENTITY pic SYSTEM \"p.gif\" NDATA gif>]><a>&pic;</a>",
            "<!DOCTYPE a [<!ENTITY e \"x\">",
        ] {
            assert_malformed(xml);
        }
        assert!(matches!(
            parse(b"<a>\xFF</a>", &ParserPolicy::permissive(), &DenyResolver),
            Err(ParseError::Malformed { position: 3, .. })
        ));
    }

    #[test]
    fn test_error_position() {
        match parse_str("<a></b>", &ParserPolicy::hardened()) {
            Err(ParseError::Malformed { position, .. }) => assert_eq!(position, 3),
            other => panic!("unexpected {:?}", other),
        }
        // Errors inside replacement text point at the reference
        match parse_str("<!DOCTYPE a [<!ENTITY e \"<b>\">]><a>&e;</a>", &ParserPolicy::hardened()) {
            Err(ParseError::Malformed { position, .. }) => assert_eq!(position, 35),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bom_and_newlines() {
        let doc = parse(b"\xEF\xBB\xBF<a>1\r\n2\r3</a>", &ParserPolicy::hardened(), &DenyResolver).unwrap();
        assert_eq!(doc.root().text(), Some("1\n2\n3"));
    }

    #[test]
    fn test_body_comments_and_pis_kept() {
        let doc = parse_str("<!--prolog--><a><!--c--><?app run?></a><!--tail-->", &ParserPolicy::hardened()).unwrap();
        assert_eq!(doc.to_xml(), "<a><!--c--><?app run?></a>");
    }

    #[test]
    fn test_subset_end_skips_literals() {
        let subset = br#"<!ENTITY a "]"> <!-- ] --> <?p ]?> ]>"#;
        assert_eq!(find_subset_end(subset), Some(subset.len() - 2));
    }
}
