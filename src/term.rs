//! Elixir Term Conversion Utilities
//!
//! Converts trees, settings, summaries and errors to Elixir terms.

use rustler::{Atom, Encoder, Env, NewBinary, NifResult, Term};

use crate::dom::{Element, Node};
use crate::error::{ParseError, PatternError};
use crate::policy::{ParserPolicy, Strictness};
use crate::settings::SettingsMap;
use crate::summary::Summary;

// Pre-defined atoms for efficiency - created once at compile time
rustler::atoms! {
    ok,
    error,
    nil,
    element,
    comment,
    pi,
    // error kinds
    malformed,
    disallowed_entity,
    resolution_failed,
    invalid_selector,
    internal,
    // policy and load info keys
    profile,
    external_entities,
    parameter_entities,
    strictness,
    scope,
    allow_doctype,
    max_expansion_bytes,
    resolver,
    timeout_ms,
    allow_prefixes,
    // policy values
    reject,
    substitute,
    // info
    parser,
    version,
    policy,
    hint,
}

/// Convert a string to a binary term (more efficient than .encode())
pub fn str_to_binary<'a>(env: Env<'a>, s: &str) -> Term<'a> {
    bytes_to_binary(env, s.as_bytes())
}

pub fn bytes_to_binary<'a>(env: Env<'a>, bytes: &[u8]) -> Term<'a> {
    let mut binary = NewBinary::new(env, bytes.len());
    binary.as_mut_slice().copy_from_slice(bytes);
    binary.into()
}

/// Convert an element to `{:element, name, [{name, value}], children}`.
/// Text children are binaries, comments `{:comment, text}`, processing
/// instructions `{:pi, target, data}`.
///
/// Built bottom-up with an explicit stack: deep documents must not
/// overflow the scheduler thread.
pub fn element_to_term<'a>(env: Env<'a>, root: &Element) -> Term<'a> {
    let mut frames: Vec<(&Element, usize, Vec<Term<'a>>)> =
        vec![(root, 0, Vec::with_capacity(root.children.len()))];

    while let Some(frame) = frames.last_mut() {
        let current = frame.0;
        if let Some(child) = current.children.get(frame.1) {
            frame.1 += 1;
            match child {
                Node::Element(e) => frames.push((e, 0, Vec::with_capacity(e.children.len()))),
                Node::Text(t) => frame.2.push(str_to_binary(env, t)),
                Node::Comment(c) => frame.2.push((comment(), str_to_binary(env, c)).encode(env)),
                Node::ProcessingInstruction { target, data } => frame.2.push(
                    (pi(), str_to_binary(env, target), str_to_binary(env, data)).encode(env),
                ),
            }
            continue;
        }

        let (finished, _, children) = match frames.pop() {
            Some(frame) => frame,
            None => break,
        };
        let term = element_tuple(env, finished, children);
        match frames.last_mut() {
            Some(parent) => parent.2.push(term),
            None => return term,
        }
    }

    nil().encode(env)
}

fn element_tuple<'a>(env: Env<'a>, e: &Element, children: Vec<Term<'a>>) -> Term<'a> {
    let mut attrs = Term::list_new_empty(env);
    for (name, value) in e.attributes.iter().rev() {
        let pair = (str_to_binary(env, name), str_to_binary(env, value));
        attrs = attrs.list_prepend(pair.encode(env));
    }
    (element(), str_to_binary(env, &e.name), attrs, children).encode(env)
}

/// `%{name => value}`
pub fn settings_to_term<'a>(env: Env<'a>, settings: &SettingsMap) -> NifResult<Term<'a>> {
    let pairs: Vec<(Term<'a>, Term<'a>)> = settings
        .iter()
        .map(|(k, v)| (str_to_binary(env, k), str_to_binary(env, v)))
        .collect();
    Term::map_from_pairs(env, &pairs)
}

/// `{[element_name], content}`
pub fn summary_to_term<'a>(env: Env<'a>, summary: &Summary) -> Term<'a> {
    let mut elements = Term::list_new_empty(env);
    for name in summary.elements.iter().rev() {
        elements = elements.list_prepend(str_to_binary(env, name));
    }
    (elements, str_to_binary(env, &summary.content)).encode(env)
}

fn kind_atom(err: &ParseError) -> Atom {
    match err {
        ParseError::Malformed { .. } => malformed(),
        ParseError::DisallowedEntity { .. } => disallowed_entity(),
        ParseError::ResolutionFailed { .. } => resolution_failed(),
    }
}

/// `{:error, {kind, message}}`. The message never carries resolver output.
pub fn parse_error_to_term<'a>(env: Env<'a>, err: &ParseError) -> Term<'a> {
    let reason = (kind_atom(err), str_to_binary(env, &err.to_string()));
    (error(), reason).encode(env)
}

pub fn pattern_error_to_term<'a>(env: Env<'a>, err: &PatternError) -> Term<'a> {
    let reason = (invalid_selector(), str_to_binary(env, &err.to_string()));
    (error(), reason).encode(env)
}

/// Generic failure for faults that are not the caller's doing
pub fn internal_error_to_term<'a>(env: Env<'a>) -> Term<'a> {
    (error(), (internal(), str_to_binary(env, "internal error"))).encode(env)
}

pub fn policy_to_term<'a>(env: Env<'a>, p: &ParserPolicy, resolver_name: &str) -> NifResult<Term<'a>> {
    let strictness_atom = match p.strictness {
        Strictness::Reject => reject(),
        Strictness::Substitute => substitute(),
    };
    let max_bytes = match p.max_expansion_bytes {
        Some(max) => max.encode(env),
        None => nil().encode(env),
    };
    let pairs = [
        (external_entities().encode(env), p.external_entities.encode(env)),
        (parameter_entities().encode(env), p.parameter_entities.encode(env)),
        (strictness().encode(env), strictness_atom.encode(env)),
        (scope().encode(env), Atom::from_str(env, p.scope.as_str())?.encode(env)),
        (allow_doctype().encode(env), p.allow_doctype.encode(env)),
        (max_expansion_bytes().encode(env), max_bytes),
        (resolver().encode(env), str_to_binary(env, resolver_name)),
        (hint().encode(env), str_to_binary(env, p.hint())),
    ];
    Term::map_from_pairs(env, &pairs)
}
