//! Error types
//!
//! Parse failures are split three ways so that a policy rejection can never
//! be mistaken for a syntax error, in logs or in tests.

use std::time::Duration;

/// Why a reference was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisallowReason {
    /// General external entities are disabled
    ExternalEntity,
    /// Parameter-entity expansion is disabled
    ParameterEntity,
    /// Reference kind (local/network) is outside the allowed scope
    OutOfScope,
    /// DOCTYPE declarations are not accepted at all
    Doctype,
    /// Expansion produced more bytes than the policy allows
    ExpansionLimit,
    /// Entities nested deeper than `MAX_ENTITY_DEPTH`
    DepthLimit,
    /// Entity was never declared because its declaration was skipped
    SkippedDeclaration,
}

impl DisallowReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisallowReason::ExternalEntity => "external entities disabled",
            DisallowReason::ParameterEntity => "parameter entities disabled",
            DisallowReason::OutOfScope => "reference outside allowed scope",
            DisallowReason::Doctype => "doctype not allowed",
            DisallowReason::ExpansionLimit => "expansion limit exceeded",
            DisallowReason::DepthLimit => "entity nesting too deep",
            DisallowReason::SkippedDeclaration => "declaration skipped by policy",
        }
    }
}

impl std::fmt::Display for DisallowReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of the injected resolver
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network fetch failed: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("no content registered for '{0}'")]
    NotFound(String),

    #[error("resolver refused '{0}'")]
    Denied(String),

    #[error("unsupported reference '{0}'")]
    Unsupported(String),
}

/// Document parse failure
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Input is not well-formed
    #[error("malformed document at byte {position}: {message}")]
    Malformed { message: String, position: usize },

    /// Policy rejected a declaration or reference
    #[error("entity '{name}' rejected: {reason}")]
    DisallowedEntity { name: String, reason: DisallowReason },

    /// The resolver could not produce the referenced resource
    #[error("could not resolve entity '{name}' ({system_id})")]
    ResolutionFailed {
        name: String,
        system_id: String,
        #[source]
        source: ResolveError,
    },
}

impl ParseError {
    pub fn malformed(message: impl Into<String>, position: usize) -> Self {
        ParseError::Malformed {
            message: message.into(),
            position,
        }
    }

    pub fn disallowed(name: impl Into<String>, reason: DisallowReason) -> Self {
        ParseError::DisallowedEntity {
            name: name.into(),
            reason,
        }
    }

    /// Stable error kind, used for host atoms and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::Malformed { .. } => "malformed",
            ParseError::DisallowedEntity { .. } => "disallowed_entity",
            ParseError::ResolutionFailed { .. } => "resolution_failed",
        }
    }
}

/// Invalid settings selector
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("empty selector")]
    Empty,

    #[error("unsupported selector '{0}': expected tag, ./tag, //tag or .//tag")]
    Unsupported(String),

    #[error("invalid tag name '{0}'")]
    InvalidName(String),
}

/// Invalid deployment configuration in load info
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown value for '{key}'")]
    InvalidValue { key: &'static str },

    #[error("could not build resolver: {0}")]
    Resolver(String),
}
