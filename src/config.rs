//! Deployment Configuration
//!
//! A deployment is one policy plus one resolver, fixed when the library is
//! loaded. The host passes them in the load info map:
//!
//! ```elixir
//! %{profile: :partial, strictness: :reject, resolver: :system, timeout_ms: 2000}
//! ```
//!
//! Every key is optional and explicit keys override the profile. Missing
//! or non-map load info gives the hardened profile with the deny resolver.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rustler::{Atom, Encoder, Term};

use crate::error::ConfigError;
use crate::policy::{ParserPolicy, ReferenceScope, Strictness};
use crate::resolver::{
    AllowListResolver, DenyResolver, EntityResolver, MapResolver, SystemResolver, DEFAULT_TIMEOUT,
};
use crate::term;

/// Environment variable holding the `tracing` filter directive
pub const LOG_ENV: &str = "POLICYXML_LOG";

pub struct Deployment {
    pub policy: ParserPolicy,
    pub resolver: Arc<dyn EntityResolver>,
}

static DEPLOYMENT: OnceLock<Deployment> = OnceLock::new();

/// The deployment installed at load, if any
pub fn deployment() -> Option<&'static Deployment> {
    DEPLOYMENT.get()
}

/// Install the process-wide deployment. Only the first call wins.
pub fn install(deployment: Deployment) -> bool {
    DEPLOYMENT.set(deployment).is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverKind {
    /// Local files and http(s) fetches
    System,
    Deny,
    /// Fixed content per system id
    Map(HashMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOptions {
    pub policy: ParserPolicy,
    pub resolver: ResolverKind,
    pub timeout: Duration,
    /// When non-empty, only system ids starting with one of these resolve
    pub allow_prefixes: Vec<String>,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        DeploymentOptions {
            policy: ParserPolicy::hardened(),
            resolver: ResolverKind::Deny,
            timeout: DEFAULT_TIMEOUT,
            allow_prefixes: Vec::new(),
        }
    }
}

impl DeploymentOptions {
    /// Read options from the load info term
    pub fn from_load_info(info: Term<'_>) -> Result<Self, ConfigError> {
        let mut options = DeploymentOptions::default();
        if !info.is_map() {
            return Ok(options);
        }

        if let Some(name) = atom_value(info, term::profile(), "profile")? {
            options.policy = ParserPolicy::profile(&name).ok_or(ConfigError::InvalidValue { key: "profile" })?;
        }

        let p = &mut options.policy;
        if let Some(v) = value::<bool>(info, term::external_entities(), "external_entities")? {
            p.external_entities = v;
        }
        if let Some(v) = value::<bool>(info, term::parameter_entities(), "parameter_entities")? {
            p.parameter_entities = v;
        }
        if let Some(name) = atom_value(info, term::strictness(), "strictness")? {
            p.strictness = parse_strictness(&name).ok_or(ConfigError::InvalidValue { key: "strictness" })?;
        }
        if let Some(name) = atom_value(info, term::scope(), "scope")? {
            p.scope = parse_scope(&name).ok_or(ConfigError::InvalidValue { key: "scope" })?;
        }
        if let Some(v) = value::<bool>(info, term::allow_doctype(), "allow_doctype")? {
            p.allow_doctype = v;
        }
        if let Some(v) = lookup(info, term::max_expansion_bytes()) {
            p.max_expansion_bytes = if v.decode::<Atom>().map(|a| a == term::nil()).unwrap_or(false) {
                None
            } else {
                Some(v.decode::<usize>().map_err(|_| ConfigError::InvalidValue { key: "max_expansion_bytes" })?)
            };
        }

        if let Some(v) = lookup(info, term::resolver()) {
            options.resolver = if v.is_map() {
                ResolverKind::Map(
                    v.decode::<HashMap<String, String>>()
                        .map_err(|_| ConfigError::InvalidValue { key: "resolver" })?,
                )
            } else {
                let name = atom_name(v).ok_or(ConfigError::InvalidValue { key: "resolver" })?;
                parse_resolver_kind(&name).ok_or(ConfigError::InvalidValue { key: "resolver" })?
            };
        }
        if let Some(ms) = value::<u64>(info, term::timeout_ms(), "timeout_ms")? {
            options.timeout = Duration::from_millis(ms);
        }
        if let Some(prefixes) = value::<Vec<String>>(info, term::allow_prefixes(), "allow_prefixes")? {
            options.allow_prefixes = prefixes;
        }

        Ok(options)
    }

    /// Build the resolver and freeze the deployment
    pub fn build(self) -> Result<Deployment, ConfigError> {
        let base: Arc<dyn EntityResolver> = match self.resolver {
            ResolverKind::Deny => Arc::new(DenyResolver),
            ResolverKind::System => Arc::new(
                SystemResolver::new(self.timeout).map_err(|e| ConfigError::Resolver(e.to_string()))?,
            ),
            ResolverKind::Map(entries) => {
                let mut map = MapResolver::new();
                for (system_id, content) in entries {
                    map.insert(system_id, content);
                }
                Arc::new(map)
            }
        };

        let resolver: Arc<dyn EntityResolver> = if self.allow_prefixes.is_empty() {
            base
        } else {
            Arc::new(AllowListResolver::new(base, self.allow_prefixes))
        };

        Ok(Deployment {
            policy: self.policy,
            resolver,
        })
    }
}

pub fn parse_strictness(name: &str) -> Option<Strictness> {
    match name {
        "reject" => Some(Strictness::Reject),
        "substitute" => Some(Strictness::Substitute),
        _ => None,
    }
}

pub fn parse_scope(name: &str) -> Option<ReferenceScope> {
    match name {
        "any" => Some(ReferenceScope::Any),
        "local_only" => Some(ReferenceScope::LocalOnly),
        "network_only" => Some(ReferenceScope::NetworkOnly),
        _ => None,
    }
}

pub fn parse_resolver_kind(name: &str) -> Option<ResolverKind> {
    match name {
        "system" => Some(ResolverKind::System),
        "deny" => Some(ResolverKind::Deny),
        _ => None,
    }
}

fn lookup<'a>(info: Term<'a>, key: Atom) -> Option<Term<'a>> {
    info.map_get(key.encode(info.get_env())).ok()
}

fn value<'a, T: rustler::Decoder<'a>>(
    info: Term<'a>,
    key: Atom,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(info, key) {
        Some(v) => v.decode::<T>().map(Some).map_err(|_| ConfigError::InvalidValue { key: name }),
        None => Ok(None),
    }
}

fn atom_value(info: Term<'_>, key: Atom, name: &'static str) -> Result<Option<String>, ConfigError> {
    match lookup(info, key) {
        Some(v) => atom_name(v).map(Some).ok_or(ConfigError::InvalidValue { key: name }),
        None => Ok(None),
    }
}

fn atom_name(term: Term<'_>) -> Option<String> {
    term.atom_to_string().ok()
}

/// Install the fmt subscriber once. The filter comes from `POLICYXML_LOG`
/// and defaults to warnings only.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ExternalRef;

    #[test]
    fn test_default_is_hardened_deny() {
        let options = DeploymentOptions::default();
        assert_eq!(options.policy, ParserPolicy::hardened());
        assert_eq!(options.resolver, ResolverKind::Deny);
        let deployment = options.build().unwrap();
        assert_eq!(deployment.resolver.name(), "deny");
    }

    #[test]
    fn test_value_names() {
        assert_eq!(parse_strictness("reject"), Some(Strictness::Reject));
        assert_eq!(parse_strictness("lenient"), None);
        assert_eq!(parse_scope("local_only"), Some(ReferenceScope::LocalOnly));
        assert_eq!(parse_resolver_kind("system"), Some(ResolverKind::System));
        assert_eq!(parse_resolver_kind("map"), None);
    }

    #[test]
    fn test_map_resolver_with_allow_list() {
        let mut entries = HashMap::new();
        entries.insert("file".to_string(), "XXE{lxml_pr0tect_y0ur_p4rs3r}".to_string());
        entries.insert("http://internal/".to_string(), "admin".to_string());
        let options = DeploymentOptions {
            policy: ParserPolicy::permissive(),
            resolver: ResolverKind::Map(entries),
            allow_prefixes: vec!["file".to_string()],
            ..DeploymentOptions::default()
        };
        let deployment = options.build().unwrap();
        assert_eq!(
            deployment.resolver.resolve(&ExternalRef::new("file", None)).unwrap(),
            b"XXE{lxml_pr0tect_y0ur_p4rs3r}"
        );
        assert!(deployment.resolver.resolve(&ExternalRef::new("http://internal/", None)).is_err());
    }

    #[test]
    fn test_init_tracing_is_repeatable() {
        init_tracing();
        init_tracing();
    }
}
