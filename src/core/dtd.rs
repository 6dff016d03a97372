//! DTD Entity Declarations
//!
//! Scans the DOCTYPE internal subset (and, when the policy allows it, the
//! external subset and external parameter entities) for `<!ENTITY>`
//! declarations. `ELEMENT`, `ATTLIST` and `NOTATION` declarations are
//! recognised and skipped; this parser does not validate.
//!
//! Parameter-entity references are expanded here, both between
//! declarations and inside entity literal values. That second path is how
//! file content can end up in an *internal* general entity even when
//! general external entities are switched off.

use super::entities::decode_char_ref;
use super::expansion::{Expansion, Origin};
use super::scanner::Scanner;
use crate::error::{DisallowReason, ParseError};
use crate::resolver::ExternalRef;
use memchr::memchr2;
use std::collections::HashMap;

/// Name used in errors and logs for the external DTD subset
pub const EXTERNAL_SUBSET: &str = "[dtd]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityValue {
    /// Replacement text, with character and parameter-entity references
    /// already expanded and general references left in place
    Internal(String),
    External {
        reference: ExternalRef,
        /// Notation name for unparsed entities
        ndata: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDecl {
    pub value: EntityValue,
}

/// Entity declarations collected from one document
#[derive(Debug, Default)]
pub struct DtdDeclarations {
    general: HashMap<String, EntityDecl>,
    parameter: HashMap<String, EntityDecl>,
    /// Some declarations were not read because the policy refused them
    skipped: bool,
}

impl DtdDeclarations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity declaration. First declaration wins (XML 1.0 section 4.2).
    pub fn add_entity(&mut self, name: String, decl: EntityDecl, is_pe: bool) {
        let map = if is_pe { &mut self.parameter } else { &mut self.general };
        map.entry(name).or_insert(decl);
    }

    pub fn general(&self, name: &str) -> Option<&EntityDecl> {
        self.general.get(name)
    }

    pub fn parameter(&self, name: &str) -> Option<&EntityDecl> {
        self.parameter.get(name)
    }

    pub fn mark_skipped(&mut self) {
        self.skipped = true;
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }
}

/// Parse the internal subset found at document offset `base`
pub fn parse_internal_subset(
    subset: &[u8],
    base: usize,
    decls: &mut DtdDeclarations,
    expansion: &mut Expansion<'_>,
) -> Result<(), ParseError> {
    SubsetParser { decls, expansion }.parse(subset, Origin::Offset(base))
}

/// Fetch and parse the external subset named in the DOCTYPE, if the policy allows
pub fn load_external_subset(
    reference: &ExternalRef,
    at: usize,
    decls: &mut DtdDeclarations,
    expansion: &mut Expansion<'_>,
) -> Result<(), ParseError> {
    if !expansion.policy().allows_external_parameter(reference.kind) {
        // Not an error under any strictness: a non-validating parser may skip it
        tracing::debug!(system_id = %reference.system_id, "external subset not loaded");
        decls.mark_skipped();
        return Ok(());
    }
    let text = expansion.fetch(EXTERNAL_SUBSET, reference, at)?;
    SubsetParser { decls, expansion }.parse(text.as_bytes(), Origin::At(at))
}

struct SubsetParser<'d, 'e, 'p> {
    decls: &'d mut DtdDeclarations,
    expansion: &'e mut Expansion<'p>,
}

impl SubsetParser<'_, '_, '_> {
    fn parse(&mut self, text: &[u8], origin: Origin) -> Result<(), ParseError> {
        let mut sc = Scanner::new(text);
        // Open INCLUDE sections, innermost last
        let mut includes: Vec<usize> = Vec::new();
        loop {
            sc.skip_whitespace();
            if sc.is_eof() {
                return match includes.last() {
                    Some(&at) => Err(ParseError::malformed("unterminated conditional section", at)),
                    None => Ok(()),
                };
            }
            let at = origin.locate(sc.position());

            if sc.eat(b"<!ENTITY") {
                self.parse_entity_decl(&mut sc, origin)?;
            } else if sc.eat(b"<!--") {
                sc.read_until_seq(b"-->")
                    .ok_or_else(|| ParseError::malformed("unterminated comment in DTD", at))?;
            } else if sc.eat(b"<![") {
                if conditional_section(&mut sc, at)? {
                    includes.push(at);
                }
            } else if !includes.is_empty() && sc.eat(b"]]>") {
                includes.pop();
            } else if sc.eat(b"<?") {
                sc.read_until_seq(b"?>")
                    .ok_or_else(|| ParseError::malformed("unterminated processing instruction in DTD", at))?;
            } else if sc.starts_with(b"<!ELEMENT")
                || sc.starts_with(b"<!ATTLIST")
                || sc.starts_with(b"<!NOTATION")
            {
                skip_declaration(&mut sc)
                    .ok_or_else(|| ParseError::malformed("unterminated markup declaration", at))?;
            } else if sc.eat(b"%") {
                let name = read_reference_name(&mut sc, at)?;
                self.parameter_reference(&name, at)?;
            } else {
                return Err(ParseError::malformed("unexpected content in DTD", at));
            }
        }
    }

    /// `<!ENTITY` already consumed
    fn parse_entity_decl(&mut self, sc: &mut Scanner<'_>, origin: Origin) -> Result<(), ParseError> {
        let err = |msg: &str, pos: usize| ParseError::malformed(msg, origin.locate(pos));

        if !sc.skip_whitespace() {
            return Err(err("whitespace required after <!ENTITY", sc.position()));
        }
        let is_pe = sc.eat(b"%");
        if is_pe && !sc.skip_whitespace() {
            return Err(err("whitespace required after '%' in parameter entity declaration", sc.position()));
        }
        let name = sc
            .read_name()
            .map(text)
            .ok_or_else(|| err("entity declaration requires a name", sc.position()))?;
        if !sc.skip_whitespace() {
            return Err(err("whitespace required after entity name", sc.position()));
        }

        let value = match sc.peek() {
            Some(b'"') | Some(b'\'') => {
                let at = origin.locate(sc.position());
                let raw = sc
                    .read_quoted()
                    .ok_or_else(|| err("unterminated entity value", sc.position()))?;
                EntityValue::Internal(self.build_literal(raw, at)?)
            }
            _ => {
                let reference = parse_external_id(sc).map_err(|msg| err(msg, sc.position()))?;
                let had_ws = sc.skip_whitespace();
                let ndata = if sc.eat(b"NDATA") {
                    if is_pe {
                        return Err(err("parameter entities cannot be unparsed", sc.position()));
                    }
                    if !had_ws || !sc.skip_whitespace() {
                        return Err(err("whitespace required around NDATA", sc.position()));
                    }
                    Some(sc.read_name().map(text).ok_or_else(|| err("NDATA requires a notation name", sc.position()))?)
                } else {
                    None
                };
                EntityValue::External { reference, ndata }
            }
        };

        sc.skip_whitespace();
        if !sc.eat(b">") {
            return Err(err("expected '>' to close entity declaration", sc.position()));
        }

        tracing::debug!(
            entity = %name,
            parameter = is_pe,
            external = matches!(value, EntityValue::External { .. }),
            "entity declared"
        );
        self.decls.add_entity(name, EntityDecl { value }, is_pe);
        Ok(())
    }

    /// Build replacement text for an entity literal: character references and
    /// parameter-entity references are expanded, general references kept as-is
    fn build_literal(&mut self, raw: &[u8], at: usize) -> Result<String, ParseError> {
        let mut out = String::with_capacity(raw.len());
        let mut sc = Scanner::new(raw);

        while !sc.is_eof() {
            let rest = sc.remaining();
            match memchr2(b'%', b'&', rest) {
                None => {
                    out.push_str(&String::from_utf8_lossy(rest));
                    break;
                }
                Some(i) => {
                    out.push_str(&String::from_utf8_lossy(&rest[..i]));
                    sc.advance(i);
                }
            }

            if sc.eat(b"&#") {
                let end = sc
                    .find_byte(b';')
                    .ok_or_else(|| ParseError::malformed("unterminated character reference", at))?;
                let body = sc.slice(sc.position(), end);
                let c = decode_char_ref(body)
                    .ok_or_else(|| ParseError::malformed("invalid character reference", at))?;
                out.push(c);
                sc.set_position(end + 1);
            } else if sc.eat(b"&") {
                let name = read_reference_name(&mut sc, at)?;
                out.push('&');
                out.push_str(&name);
                out.push(';');
            } else {
                sc.advance(1);
                let name = read_reference_name(&mut sc, at)?;
                if let Some(replacement) = self.expand_parameter(&name, at)? {
                    out.push_str(&replacement);
                }
            }
        }

        Ok(out)
    }

    /// `%name;` between declarations: expansion is parsed as more DTD text
    fn parameter_reference(&mut self, name: &str, at: usize) -> Result<(), ParseError> {
        let Some(replacement) = self.expand_parameter(name, at)? else {
            return Ok(());
        };
        let key = format!("%{}", name);
        self.expansion.enter(&key, at)?;
        self.parse(replacement.as_bytes(), Origin::At(at))?;
        self.expansion.leave();
        Ok(())
    }

    /// Replacement text of a parameter entity, or None if the policy skipped it
    fn expand_parameter(&mut self, name: &str, at: usize) -> Result<Option<String>, ParseError> {
        let label = format!("%{}", name);
        if !self.expansion.policy().parameter_entities {
            self.expansion.refuse(&label, DisallowReason::ParameterEntity)?;
            self.decls.mark_skipped();
            return Ok(None);
        }

        let decl = match self.decls.parameter(name) {
            Some(decl) => decl.clone(),
            None if self.decls.is_skipped() => {
                self.expansion.refuse(&label, DisallowReason::SkippedDeclaration)?;
                return Ok(None);
            }
            None => {
                return Err(ParseError::malformed(
                    format!("undeclared parameter entity '{}'", label),
                    at,
                ))
            }
        };

        match decl.value {
            EntityValue::Internal(value) => {
                self.expansion.charge(&label, value.len())?;
                Ok(Some(value))
            }
            EntityValue::External { reference, .. } => {
                if !self.expansion.policy().allows_external_parameter(reference.kind) {
                    self.expansion.refuse(&label, DisallowReason::OutOfScope)?;
                    self.decls.mark_skipped();
                    return Ok(None);
                }
                self.expansion.fetch(&label, &reference, at).map(Some)
            }
        }
    }
}

/// `<![` already consumed. Returns true for `INCLUDE[`, whose body is read as
/// ordinary DTD text up to the matching `]]>`. An `IGNORE[` section is
/// skipped here, nested sections included.
fn conditional_section(sc: &mut Scanner<'_>, at: usize) -> Result<bool, ParseError> {
    sc.skip_whitespace();
    let include = if sc.eat(b"INCLUDE") {
        true
    } else if sc.eat(b"IGNORE") {
        false
    } else {
        return Err(ParseError::malformed("conditional section must be INCLUDE or IGNORE", at));
    };
    sc.skip_whitespace();
    if !sc.eat(b"[") {
        return Err(ParseError::malformed("expected '[' in conditional section", at));
    }
    if include {
        return Ok(true);
    }

    let end = find_conditional_end(sc.remaining())
        .ok_or_else(|| ParseError::malformed("unterminated conditional section", at))?;
    sc.advance(end + 3);
    Ok(false)
}

/// `SYSTEM "sys"` or `PUBLIC "pub" "sys"`
pub fn parse_external_id(sc: &mut Scanner<'_>) -> Result<ExternalRef, &'static str> {
    if sc.eat(b"SYSTEM") {
        if !sc.skip_whitespace() {
            return Err("whitespace required after SYSTEM");
        }
        let system = sc.read_quoted().ok_or("SYSTEM requires a quoted system literal")?;
        Ok(ExternalRef::new(text(system), None))
    } else if sc.eat(b"PUBLIC") {
        if !sc.skip_whitespace() {
            return Err("whitespace required after PUBLIC");
        }
        let public = sc.read_quoted().ok_or("PUBLIC requires a quoted public identifier")?;
        if !sc.skip_whitespace() {
            return Err("whitespace required between public and system literals");
        }
        let system = sc.read_quoted().ok_or("PUBLIC requires a quoted system literal")?;
        Ok(ExternalRef::new(text(system), Some(text(public))))
    } else {
        Err("expected entity value or external identifier")
    }
}

/// Read `name;` after a `&` or `%`
fn read_reference_name(sc: &mut Scanner<'_>, at: usize) -> Result<String, ParseError> {
    let name = sc
        .read_name()
        .ok_or_else(|| ParseError::malformed("reference requires a name", at))?;
    if !sc.eat(b";") {
        return Err(ParseError::malformed("reference must end with ';'", at));
    }
    Ok(text(name))
}

/// Skip a markup declaration up to its closing '>', honouring quoted literals
fn skip_declaration(sc: &mut Scanner<'_>) -> Option<()> {
    let mut quote: Option<u8> = None;
    while let Some(b) = sc.peek() {
        sc.advance(1);
        match (quote, b) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"') | (None, b'\'') => quote = Some(b),
            (None, b'>') => return Some(()),
            _ => {}
        }
    }
    None
}

/// Offset of the `]]>` closing a conditional section, allowing nesting
fn find_conditional_end(body: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut pos = 0;
    while pos + 2 < body.len() {
        if body[pos..].starts_with(b"<![") {
            depth += 1;
            pos += 3;
        } else if body[pos..].starts_with(b"]]>") {
            if depth == 0 {
                return Some(pos);
            }
            depth -= 1;
            pos += 3;
        } else {
            pos += 1;
        }
    }
    None
}

#[inline]
fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expansion::MAX_ENTITY_DEPTH;
    use crate::policy::ParserPolicy;
    use crate::resolver::{DenyResolver, MapResolver};

    fn collect(subset: &str, policy: &ParserPolicy, resolver: &MapResolver) -> Result<DtdDeclarations, ParseError> {
        let mut decls = DtdDeclarations::new();
        let mut expansion = Expansion::new(policy, resolver);
        parse_internal_subset(subset.as_bytes(), 0, &mut decls, &mut expansion)?;
        Ok(decls)
    }

    fn internal(decls: &DtdDeclarations, name: &str) -> Option<String> {
        match &decls.general(name)?.value {
            EntityValue::Internal(v) => Some(v.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_internal_and_external_decls() {
        let decls = collect(
            r#"<!ENTITY greeting "hello &name;"> <!ENTITY xxe SYSTEM "file:///tmp/flag.txt">"#,
            &ParserPolicy::hardened(),
            &MapResolver::new(),
        )
        .unwrap();
        assert_eq!(internal(&decls, "greeting").as_deref(), Some("hello &name;"));
        match &decls.general("xxe").unwrap().value {
            EntityValue::External { reference, ndata } => {
                assert_eq!(reference.system_id, "file:///tmp/flag.txt");
                assert!(ndata.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_first_declaration_wins() {
        let decls = collect(
            r#"<!ENTITY a "first"><!ENTITY a "second">"#,
            &ParserPolicy::hardened(),
            &MapResolver::new(),
        )
        .unwrap();
        assert_eq!(internal(&decls, "a").as_deref(), Some("first"));
    }

    #[test]
    fn test_skips_other_declarations() {
        let decls = collect(
            r#"<!ELEMENT config (setting)*>
               <!ATTLIST setting name CDATA #REQUIRED note CDATA "a>b">
               <!NOTATION gif SYSTEM "image/gif">
               <!-- comment with <!ENTITY fake "x"> inside -->
               <?pi data?>
               <!ENTITY real "y">"#,
            &ParserPolicy::hardened(),
            &MapResolver::new(),
        )
        .unwrap();
        assert!(decls.general("fake").is_none());
        assert_eq!(internal(&decls, "real").as_deref(), Some("y"));
    }

    #[test]
    fn test_public_and_ndata() {
        let decls = collect(
            r#"<!ENTITY pic PUBLIC "-//X//pic" "pic.gif" NDATA gif>"#,
            &ParserPolicy::hardened(),
            &MapResolver::new(),
        )
        .unwrap();
        match &decls.general("pic").unwrap().value {
            EntityValue::External { reference, ndata } => {
                assert_eq!(reference.public_id.as_deref(), Some("-//X//pic"));
                assert_eq!(ndata.as_deref(), Some("gif"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_char_refs_decoded_in_literal() {
        let decls = collect(
            r#"<!ENTITY pct "&#x25;&#65;">"#,
            &ParserPolicy::hardened(),
            &MapResolver::new(),
        )
        .unwrap();
        assert_eq!(internal(&decls, "pct").as_deref(), Some("%A"));
    }

    #[test]
    fn test_parameter_entity_declares_general_entity() {
        let decls = collect(
            r#"<!ENTITY % decl "<!ENTITY inner 'from pe'>"> %decl;"#,
            &ParserPolicy::partial(),
            &MapResolver::new(),
        )
        .unwrap();
        assert_eq!(internal(&decls, "inner").as_deref(), Some("from pe"));
    }

    #[test]
    fn test_external_parameter_entity_leaks_into_literal() {
        let resolver = MapResolver::new().with("file:///app/secrets/admin_token.txt", "XXE{3l3m3ntTr33_n0t_s0_s4f3}");
        let subset = r#"<!ENTITY % secret SYSTEM "file:///app/secrets/admin_token.txt">
                        <!ENTITY % wrap "<!ENTITY leak '%secret;'>">
                        %wrap;"#;

        let decls = collect(subset, &ParserPolicy::partial(), &resolver).unwrap();
        assert_eq!(internal(&decls, "leak").as_deref(), Some("XXE{3l3m3ntTr33_n0t_s0_s4f3}"));

        let err = collect(subset, &ParserPolicy::hardened(), &resolver).unwrap_err();
        assert!(matches!(
            err,
            ParseError::DisallowedEntity { reason: DisallowReason::ParameterEntity, .. }
        ));
    }

    #[test]
    fn test_disabled_parameter_entities_substitute() {
        let mut policy = ParserPolicy::hardened();
        policy.strictness = crate::policy::Strictness::Substitute;
        let decls = collect(
            r#"<!ENTITY % decl "<!ENTITY inner 'x'>"> %decl;"#,
            &policy,
            &MapResolver::new(),
        )
        .unwrap();
        assert!(decls.general("inner").is_none());
        assert!(decls.is_skipped());
    }

    #[test]
    fn test_recursive_parameter_entity() {
        let err = collect(
            r#"<!ENTITY % loop "&#37;loop;"> %loop;"#,
            &ParserPolicy::permissive(),
            &MapResolver::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[test]
    fn test_parameter_entity_depth_limit() {
        let chain = |depth: usize| {
            let mut subset = String::new();
            for i in (0..depth).rev() {
                if i + 1 == depth {
                    subset.push_str(&format!("<!ENTITY % p{} \"<!ENTITY end 'x'>\">", i));
                } else {
                    subset.push_str(&format!("<!ENTITY % p{} \"&#37;p{};\">", i, i + 1));
                }
            }
            subset.push_str("%p0;");
            subset
        };
        let policy = ParserPolicy::permissive();
        let decls = collect(&chain(MAX_ENTITY_DEPTH), &policy, &MapResolver::new()).unwrap();
        assert_eq!(internal(&decls, "end").as_deref(), Some("x"));

        for depth in [MAX_ENTITY_DEPTH + 1, 100_000] {
            let err = collect(&chain(depth), &policy, &MapResolver::new()).unwrap_err();
            assert!(matches!(
                err,
                ParseError::DisallowedEntity { reason: DisallowReason::DepthLimit, .. }
            ));
        }
    }

    #[test]
    fn test_deep_conditional_sections() {
        let depth = 100_000;
        let subset = format!(
            "{}<!ENTITY deep \"1\">{}<![IGNORE[ {} ]]>",
            "<![INCLUDE[".repeat(depth),
            "]]>".repeat(depth),
            "<![IGNORE[".repeat(depth) + &"]]>".repeat(depth)
        );
        let decls = collect(&subset, &ParserPolicy::hardened(), &MapResolver::new()).unwrap();
        assert_eq!(internal(&decls, "deep").as_deref(), Some("1"));

        let unclosed = r#"<![INCLUDE[ <![INCLUDE[ <!ENTITY a "1"> ]]>"#;
        assert_eq!(
            collect(unclosed, &ParserPolicy::hardened(), &MapResolver::new()).unwrap_err().kind(),
            "malformed"
        );
        let stray = collect("]]>", &ParserPolicy::hardened(), &MapResolver::new()).unwrap_err();
        assert_eq!(stray.kind(), "malformed");
    }

    #[test]
    fn test_undeclared_parameter_entity() {
        let err = collect("%missing;", &ParserPolicy::permissive(), &MapResolver::new()).unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[test]
    fn test_conditional_sections() {
        let decls = collect(
            r#"<![INCLUDE[ <!ENTITY kept "1"> ]]> <![IGNORE[ <!ENTITY dropped "2"> <![INCLUDE[ ]]> ]]>"#,
            &ParserPolicy::hardened(),
            &MapResolver::new(),
        )
        .unwrap();
        assert!(decls.general("kept").is_some());
        assert!(decls.general("dropped").is_none());
    }

    #[test]
    fn test_malformed_declarations() {
        let policy = ParserPolicy::hardened();
        let resolver = MapResolver::new();
        assert!(collect(r#"<!ENTITY"x">"#, &policy, &resolver).is_err());
        assert!(collect(r#"<!ENTITY a "unterminated>"#, &policy, &resolver).is_err());
        assert!(collect(r#"<!ENTITY a SYSTEM>"#, &policy, &resolver).is_err());
        assert!(collect(r#"<!ENTITY % p SYSTEM "x" NDATA gif>"#, &policy, &resolver).is_err());
        assert!(collect("stray text", &policy, &resolver).is_err());
    }

    #[test]
    fn test_external_subset_respects_policy() {
        let resolver = MapResolver::new().with("http://dtd.example/config.dtd", r#"<!ENTITY remote "from dtd">"#);
        let reference = ExternalRef::new("http://dtd.example/config.dtd", None);

        let policy = ParserPolicy::permissive();
        let mut decls = DtdDeclarations::new();
        let mut expansion = Expansion::new(&policy, &resolver);
        load_external_subset(&reference, 0, &mut decls, &mut expansion).unwrap();
        assert_eq!(internal(&decls, "remote").as_deref(), Some("from dtd"));

        let policy = ParserPolicy::hardened();
        let mut decls = DtdDeclarations::new();
        let mut expansion = Expansion::new(&policy, &DenyResolver);
        load_external_subset(&reference, 0, &mut decls, &mut expansion).unwrap();
        assert!(decls.general("remote").is_none());
        assert!(decls.is_skipped());
    }
}
