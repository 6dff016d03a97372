//! Entity Expansion Control
//!
//! Shared state for one parse: the policy, the injected resolver, the
//! running byte count of expanded replacement text and the stack of
//! entities currently being expanded. Both the DTD scanner and the body
//! parser go through here, so every policy decision is made in one place.
//!
//! Replacement text is parsed by re-entering the content parser, so the
//! entity stack is also the call stack. `enter` bounds it.

use crate::error::{DisallowReason, ParseError};
use crate::policy::{ParserPolicy, Strictness};
use crate::resolver::{EntityResolver, ExternalRef};
use super::entities::{find_invalid_char, strip_text_declaration};

/// Deepest entity nesting accepted, under every policy (libxml2 uses 40 too)
pub const MAX_ENTITY_DEPTH: usize = 40;

/// Where errors inside a piece of text are reported
#[derive(Debug, Clone, Copy)]
pub enum Origin {
    /// Text is a slice of the document starting at this offset
    Offset(usize),
    /// Text came from an entity referenced at this document offset
    At(usize),
}

impl Origin {
    #[inline]
    pub fn locate(self, pos: usize) -> usize {
        match self {
            Origin::Offset(base) => base + pos,
            Origin::At(at) => at,
        }
    }
}

pub struct Expansion<'p> {
    policy: &'p ParserPolicy,
    resolver: &'p dyn EntityResolver,
    produced: usize,
    active: Vec<String>,
}

impl<'p> Expansion<'p> {
    pub fn new(policy: &'p ParserPolicy, resolver: &'p dyn EntityResolver) -> Self {
        Expansion {
            policy,
            resolver,
            produced: 0,
            active: Vec::new(),
        }
    }

    #[inline]
    pub fn policy(&self) -> &ParserPolicy {
        self.policy
    }

    /// Bytes of replacement text produced so far
    pub fn produced(&self) -> usize {
        self.produced
    }

    /// Apply the configured strictness to a refused reference.
    /// `Ok` means the caller substitutes the empty string.
    pub fn refuse(&self, name: &str, reason: DisallowReason) -> Result<(), ParseError> {
        tracing::warn!(entity = name, %reason, "entity reference refused");
        match self.policy.strictness {
            Strictness::Reject => Err(ParseError::disallowed(name, reason)),
            Strictness::Substitute => Ok(()),
        }
    }

    /// Count replacement bytes against the policy cap
    pub fn charge(&mut self, name: &str, len: usize) -> Result<(), ParseError> {
        self.produced = self.produced.saturating_add(len);
        match self.policy.max_expansion_bytes {
            Some(max) if self.produced > max => {
                tracing::warn!(
                    entity = name,
                    produced = self.produced,
                    max,
                    "expansion limit exceeded"
                );
                Err(ParseError::disallowed(name, DisallowReason::ExpansionLimit))
            }
            _ => Ok(()),
        }
    }

    /// Mark an entity as being expanded; re-entry means a reference cycle.
    /// Nesting past `MAX_ENTITY_DEPTH` fails whatever the strictness.
    pub fn enter(&mut self, key: &str, position: usize) -> Result<(), ParseError> {
        if self.active.iter().any(|k| k == key) {
            return Err(ParseError::malformed(
                format!("entity '{}' references itself", key),
                position,
            ));
        }
        if self.active.len() >= MAX_ENTITY_DEPTH {
            tracing::warn!(entity = key, depth = self.active.len(), "entity nesting limit exceeded");
            return Err(ParseError::disallowed(key, DisallowReason::DepthLimit));
        }
        self.active.push(key.to_string());
        Ok(())
    }

    pub fn leave(&mut self) {
        self.active.pop();
    }

    /// Fetch an external entity through the resolver as UTF-8 text
    pub fn fetch(
        &mut self,
        name: &str,
        reference: &ExternalRef,
        position: usize,
    ) -> Result<String, ParseError> {
        tracing::info!(
            entity = name,
            system_id = %reference.system_id,
            public_id = ?reference.public_id,
            resolver = self.resolver.name(),
            "resolving external reference"
        );
        let bytes = self
            .resolver
            .resolve(reference)
            .map_err(|source| {
                tracing::warn!(
                    entity = name,
                    system_id = %reference.system_id,
                    error = %source,
                    "resolution failed"
                );
                ParseError::ResolutionFailed {
                    name: name.to_string(),
                    system_id: reference.system_id.clone(),
                    source,
                }
            })?;
        let text = String::from_utf8(bytes).map_err(|_| {
            ParseError::malformed(format!("external entity '{}' is not valid UTF-8", name), position)
        })?;
        let body = strip_text_declaration(&text);
        if let Some((_, c)) = find_invalid_char(body) {
            return Err(ParseError::malformed(
                format!("external entity '{}' contains character U+{:04X}", name, c as u32),
                position,
            ));
        }
        self.charge(name, body.len())?;
        Ok(body.to_string())
    }
}
