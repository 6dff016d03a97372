//! Parser Policy
//!
//! Entity resolution is decided by this value alone, never by which parser
//! is linked. Two deployments that differ only in their policy show the
//! vulnerable and the hardened behaviour of the same code.

use crate::resolver::RefKind;

/// What happens to a reference the policy refuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Fail the parse with `DisallowedEntity`
    Reject,
    /// Expand the reference to the empty string and carry on
    Substitute,
}

/// Which kinds of external reference may be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceScope {
    Any,
    LocalOnly,
    NetworkOnly,
}

impl ReferenceScope {
    pub fn permits(&self, kind: RefKind) -> bool {
        match self {
            ReferenceScope::Any => true,
            ReferenceScope::LocalOnly => kind == RefKind::Local,
            ReferenceScope::NetworkOnly => kind == RefKind::Network,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceScope::Any => "any",
            ReferenceScope::LocalOnly => "local_only",
            ReferenceScope::NetworkOnly => "network_only",
        }
    }
}

/// Immutable entity-resolution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserPolicy {
    /// Resolve general external entities (`<!ENTITY x SYSTEM "...">`)
    pub external_entities: bool,
    /// Expand parameter entities and load the external DTD subset
    pub parameter_entities: bool,
    pub strictness: Strictness,
    pub scope: ReferenceScope,
    /// Accept `<!DOCTYPE` at all
    pub allow_doctype: bool,
    /// Cap on bytes produced by entity expansion (None = unbounded)
    pub max_expansion_bytes: Option<usize>,
}

impl ParserPolicy {
    /// Everything resolved, nothing capped
    pub const fn permissive() -> Self {
        ParserPolicy {
            external_entities: true,
            parameter_entities: true,
            strictness: Strictness::Substitute,
            scope: ReferenceScope::Any,
            allow_doctype: true,
            max_expansion_bytes: None,
        }
    }

    /// General external entities off, parameter entities still expanded
    pub const fn partial() -> Self {
        ParserPolicy {
            external_entities: false,
            parameter_entities: true,
            strictness: Strictness::Substitute,
            scope: ReferenceScope::Any,
            allow_doctype: true,
            max_expansion_bytes: None,
        }
    }

    /// No external resolution of any kind, refused references fail the parse
    pub const fn hardened() -> Self {
        ParserPolicy {
            external_entities: false,
            parameter_entities: false,
            strictness: Strictness::Reject,
            scope: ReferenceScope::Any,
            allow_doctype: true,
            max_expansion_bytes: Some(10 * 1024 * 1024),
        }
    }

    /// Look up a named profile
    pub fn profile(name: &str) -> Option<Self> {
        match name {
            "permissive" => Some(Self::permissive()),
            "partial" => Some(Self::partial()),
            "hardened" => Some(Self::hardened()),
            _ => None,
        }
    }

    /// Whether a general external entity of this kind may be fetched
    #[inline]
    pub fn allows_external(&self, kind: RefKind) -> bool {
        self.external_entities && self.scope.permits(kind)
    }

    /// Whether an external parameter entity (or external subset) may be fetched
    #[inline]
    pub fn allows_external_parameter(&self, kind: RefKind) -> bool {
        self.parameter_entities && self.scope.permits(kind)
    }

    /// Short description for the info endpoint
    pub fn hint(&self) -> &'static str {
        match (self.external_entities, self.parameter_entities) {
            (true, _) => "external entities resolved",
            (false, true) => "external entities off, parameter entities expanded",
            (false, false) => "no external resolution",
        }
    }
}

impl Default for ParserPolicy {
    fn default() -> Self {
        Self::hardened()
    }
}
