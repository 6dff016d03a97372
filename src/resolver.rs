//! Resource Resolution
//!
//! The parser never touches the filesystem or network itself. Every external
//! reference it is allowed to follow goes through an [`EntityResolver`],
//! chosen per deployment.

use crate::error::ResolveError;
use std::collections::HashMap;
use std::io::Read;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default timeout for blocking resolution
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Kind of resource an external identifier points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// Bare path or `file:` URI
    Local,
    /// Any other URI scheme
    Network,
}

/// An external identifier taken from an entity or DOCTYPE declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRef {
    pub system_id: String,
    pub public_id: Option<String>,
    pub kind: RefKind,
}

impl ExternalRef {
    pub fn new(system_id: impl Into<String>, public_id: Option<String>) -> Self {
        let system_id = system_id.into();
        let kind = classify(&system_id);
        ExternalRef {
            system_id,
            public_id,
            kind,
        }
    }

    /// Filesystem path for local references
    pub fn local_path(&self) -> Option<&str> {
        if self.kind != RefKind::Local {
            return None;
        }
        let id = self.system_id.as_str();
        match strip_scheme(id, "file:") {
            Some(rest) => {
                // file:///p, file://localhost/p, file:/p
                if let Some(after) = rest.strip_prefix("//") {
                    match after.find('/') {
                        Some(slash) => Some(&after[slash..]),
                        None => Some(after),
                    }
                } else {
                    Some(rest)
                }
            }
            None => Some(id),
        }
    }
}

/// Split off a URI scheme, ASCII case-insensitively
fn strip_scheme<'a>(id: &'a str, scheme: &str) -> Option<&'a str> {
    if id.len() >= scheme.len() && id[..scheme.len()].eq_ignore_ascii_case(scheme) {
        Some(&id[scheme.len()..])
    } else {
        None
    }
}

fn classify(system_id: &str) -> RefKind {
    let scheme_end = match system_id.find(':') {
        Some(pos) => pos,
        None => return RefKind::Local,
    };
    let scheme = &system_id[..scheme_end];
    // One-letter "schemes" are drive letters
    let is_scheme = scheme.len() > 1
        && scheme.bytes().next().is_some_and(|b| b.is_ascii_alphabetic())
        && scheme.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'));
    if !is_scheme || scheme.eq_ignore_ascii_case("file") {
        RefKind::Local
    } else {
        RefKind::Network
    }
}

/// Capability that turns an external reference into bytes
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, reference: &ExternalRef) -> Result<Vec<u8>, ResolveError>;

    /// Short name reported by the info endpoint
    fn name(&self) -> &'static str;
}

impl<R: EntityResolver + ?Sized> EntityResolver for Arc<R> {
    fn resolve(&self, reference: &ExternalRef) -> Result<Vec<u8>, ResolveError> {
        (**self).resolve(reference)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Refuses everything
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyResolver;

impl EntityResolver for DenyResolver {
    fn resolve(&self, reference: &ExternalRef) -> Result<Vec<u8>, ResolveError> {
        Err(ResolveError::Denied(reference.system_id.clone()))
    }

    fn name(&self) -> &'static str {
        "deny"
    }
}

/// In-memory resolver keyed by system id
#[derive(Debug, Default, Clone)]
pub struct MapResolver {
    entries: HashMap<String, Vec<u8>>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, system_id: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(system_id, content);
        self
    }

    pub fn insert(&mut self, system_id: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.entries.insert(system_id.into(), content.into());
    }
}

impl EntityResolver for MapResolver {
    fn resolve(&self, reference: &ExternalRef) -> Result<Vec<u8>, ResolveError> {
        self.entries
            .get(&reference.system_id)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(reference.system_id.clone()))
    }

    fn name(&self) -> &'static str {
        "map"
    }
}

/// Forwards only references under one of the allowed prefixes
pub struct AllowListResolver<R> {
    inner: R,
    prefixes: Vec<String>,
}

impl<R: EntityResolver> AllowListResolver<R> {
    pub fn new(inner: R, prefixes: Vec<String>) -> Self {
        AllowListResolver { inner, prefixes }
    }
}

impl<R: EntityResolver> EntityResolver for AllowListResolver<R> {
    fn resolve(&self, reference: &ExternalRef) -> Result<Vec<u8>, ResolveError> {
        let allowed = self
            .prefixes
            .iter()
            .any(|p| reference.system_id.starts_with(p.as_str()));
        if !allowed {
            return Err(ResolveError::Denied(reference.system_id.clone()));
        }
        self.inner.resolve(reference)
    }

    fn name(&self) -> &'static str {
        "allow_list"
    }
}

/// Reads local files and fetches network resources, each bounded by a timeout
pub struct SystemResolver {
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Result<Self, ResolveError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::Network(e.to_string()))?;
        Ok(SystemResolver { timeout, client })
    }

    fn read_local(&self, path: &str) -> Result<Vec<u8>, ResolveError> {
        // Regular files only: opening a fifo or reading a device can block forever
        if !std::fs::metadata(path)?.is_file() {
            return Err(ResolveError::Unsupported(path.to_string()));
        }

        let (tx, rx) = mpsc::channel();
        let path = path.to_string();
        // std::fs has no read timeout; a stuck read (dead mount) is abandoned
        thread::spawn(move || {
            let result = std::fs::File::open(&path).and_then(|mut file| {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).map(|_| buf)
            });
            let _ = tx.send(result);
        });
        match rx.recv_timeout(self.timeout) {
            Ok(result) => result.map_err(ResolveError::from),
            Err(_) => Err(ResolveError::Timeout(self.timeout)),
        }
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        if strip_scheme(url, "http:").is_none() && strip_scheme(url, "https:").is_none() {
            return Err(ResolveError::Unsupported(url.to_string()));
        }
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                if e.is_timeout() {
                    ResolveError::Timeout(self.timeout)
                } else {
                    ResolveError::Network(e.to_string())
                }
            })?;
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| ResolveError::Network(e.to_string()))
    }
}

impl EntityResolver for SystemResolver {
    fn resolve(&self, reference: &ExternalRef) -> Result<Vec<u8>, ResolveError> {
        match reference.kind {
            RefKind::Local => {
                let path = reference
                    .local_path()
                    .ok_or_else(|| ResolveError::Unsupported(reference.system_id.clone()))?;
                self.read_local(path)
            }
            RefKind::Network => self.fetch(&reference.system_id),
        }
    }

    fn name(&self) -> &'static str {
        "system"
    }
}
