//! PolicyXML - XML ingestion with an explicit entity-resolution policy
//!
//! Entry points:
//! A: Parse to a document handle (parse, parse_batch)
//! B: Parse and re-serialize (parse_to_xml)
//! C: Parse and extract settings (parse_settings, extract_settings)
//! D: Parse and summarize (parse_summary, summarize)
//!
//! Whether external or parameter entities are resolved is decided by the
//! deployment policy given at load time, never by the entry point used.

use rustler::{Binary, Encoder, Env, NifResult, ResourceArc, Term};

mod config;
mod core;
mod dom;
mod error;
mod policy;
mod resolver;
mod resource;
mod settings;
mod strategy;
mod summary;
mod term;

use config::{Deployment, DeploymentOptions};
use resource::{DocumentRef, DocumentResource};
use settings::PathPattern;
use term::{
    element_to_term, internal_error_to_term, parse_error_to_term, pattern_error_to_term,
    policy_to_term, settings_to_term, str_to_binary, summary_to_term,
};

// ============================================================================
// Allocator Configuration
// ============================================================================

#[cfg(feature = "memory_tracking")]
mod tracking {
    use std::alloc::{GlobalAlloc, Layout};
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
    pub static PEAK_ALLOCATED: AtomicUsize = AtomicUsize::new(0);

    pub struct TrackingAllocator;

    #[cfg(feature = "mimalloc")]
    static UNDERLYING: mimalloc::MiMalloc = mimalloc::MiMalloc;

    #[cfg(not(feature = "mimalloc"))]
    static UNDERLYING: std::alloc::System = std::alloc::System;

    unsafe impl GlobalAlloc for TrackingAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            let ptr = UNDERLYING.alloc(layout);
            if !ptr.is_null() {
                let current = ALLOCATED.fetch_add(layout.size(), Ordering::Relaxed) + layout.size();
                let mut peak = PEAK_ALLOCATED.load(Ordering::Relaxed);
                while current > peak {
                    match PEAK_ALLOCATED.compare_exchange_weak(
                        peak,
                        current,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(p) => peak = p,
                    }
                }
            }
            ptr
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            ALLOCATED.fetch_sub(layout.size(), Ordering::Relaxed);
            UNDERLYING.dealloc(ptr, layout)
        }
    }
}

#[cfg(feature = "memory_tracking")]
#[global_allocator]
static GLOBAL: tracking::TrackingAllocator = tracking::TrackingAllocator;

#[cfg(all(feature = "mimalloc", not(feature = "memory_tracking")))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// ============================================================================
// Memory Tracking NIFs
// ============================================================================

#[cfg(feature = "memory_tracking")]
use std::sync::atomic::Ordering;

/// Bytes currently allocated by the library. Entity expansion shows up
/// here: with no expansion cap, nothing else bounds it.
#[cfg(feature = "memory_tracking")]
#[rustler::nif]
fn get_rust_memory() -> usize {
    tracking::ALLOCATED.load(Ordering::SeqCst)
}

#[cfg(feature = "memory_tracking")]
#[rustler::nif]
fn get_rust_memory_peak() -> usize {
    tracking::PEAK_ALLOCATED.load(Ordering::SeqCst)
}

#[cfg(feature = "memory_tracking")]
#[rustler::nif]
fn reset_rust_memory_stats() -> (usize, usize) {
    let current = tracking::ALLOCATED.load(Ordering::SeqCst);
    let peak = tracking::PEAK_ALLOCATED.swap(current, Ordering::SeqCst);
    (current, peak)
}

#[cfg(not(feature = "memory_tracking"))]
#[rustler::nif]
fn get_rust_memory() -> usize {
    0
}

#[cfg(not(feature = "memory_tracking"))]
#[rustler::nif]
fn get_rust_memory_peak() -> usize {
    0
}

#[cfg(not(feature = "memory_tracking"))]
#[rustler::nif]
fn reset_rust_memory_stats() -> (usize, usize) {
    (0, 0)
}

// ============================================================================
// Deployment Access
// ============================================================================

/// Run `f` against the installed deployment, or answer `:internal`
fn with_deployment<'a, F>(env: Env<'a>, f: F) -> NifResult<Term<'a>>
where
    F: FnOnce(&'static Deployment) -> NifResult<Term<'a>>,
{
    match config::deployment() {
        Some(deployment) => f(deployment),
        None => {
            tracing::error!("no deployment installed");
            Ok(internal_error_to_term(env))
        }
    }
}

/// Parse under the deployment policy, mapping failure to `{:error, {kind, msg}}`
fn parse_with<'a, F>(env: Env<'a>, input: &[u8], on_success: F) -> NifResult<Term<'a>>
where
    F: FnOnce(dom::Document) -> NifResult<Term<'a>>,
{
    with_deployment(env, |deployment| {
        match crate::core::parse(input, &deployment.policy, deployment.resolver.as_ref()) {
            Ok(doc) => on_success(doc),
            Err(e) => {
                tracing::debug!(kind = e.kind(), error = %e, "parse failed");
                Ok(parse_error_to_term(env, &e))
            }
        }
    })
}

fn ok_tuple<'a>(env: Env<'a>, value: Term<'a>) -> NifResult<Term<'a>> {
    Ok((term::ok(), value).encode(env))
}

// ============================================================================
// Strategy A: Document Handles
// ============================================================================

/// Parse XML and return a document handle
#[rustler::nif(schedule = "DirtyIo")]
fn parse<'a>(env: Env<'a>, input: Binary<'a>) -> NifResult<Term<'a>> {
    parse_with(env, input.as_slice(), |doc| {
        let resource = ResourceArc::new(DocumentResource::new(doc));
        ok_tuple(env, resource.encode(env))
    })
}

/// Parse many documents in parallel, one result per input, in order
#[rustler::nif(schedule = "DirtyIo")]
fn parse_batch<'a>(env: Env<'a>, inputs: Vec<Binary<'a>>) -> NifResult<Term<'a>> {
    with_deployment(env, |deployment| {
        let slices: Vec<&[u8]> = inputs.iter().map(|b| b.as_slice()).collect();
        let results = strategy::parse_parallel(&slices, &deployment.policy, deployment.resolver.as_ref());

        let mut list = Term::list_new_empty(env);
        for result in results.into_iter().rev() {
            let entry = match result {
                Ok(doc) => (term::ok(), ResourceArc::new(DocumentResource::new(doc))).encode(env),
                Err(e) => parse_error_to_term(env, &e),
            };
            list = list.list_prepend(entry);
        }
        Ok(list)
    })
}

/// Get the root element of a parsed document as nested tuples
#[rustler::nif]
fn get_root<'a>(env: Env<'a>, doc_ref: DocumentRef) -> NifResult<Term<'a>> {
    Ok(element_to_term(env, doc_ref.document().root()))
}

// ============================================================================
// Strategy B: Serialization
// ============================================================================

#[rustler::nif(schedule = "DirtyIo")]
fn parse_to_xml<'a>(env: Env<'a>, input: Binary<'a>) -> NifResult<Term<'a>> {
    parse_with(env, input.as_slice(), |doc| ok_tuple(env, str_to_binary(env, &doc.to_xml())))
}

#[rustler::nif]
fn to_xml<'a>(env: Env<'a>, doc_ref: DocumentRef) -> NifResult<Term<'a>> {
    Ok(str_to_binary(env, &doc_ref.document().to_xml()))
}

// ============================================================================
// Strategy C: Settings
// ============================================================================

/// Parse and extract settings. The selector is checked before parsing.
#[rustler::nif(schedule = "DirtyIo")]
fn parse_settings<'a>(env: Env<'a>, input: Binary<'a>, selector: &str) -> NifResult<Term<'a>> {
    let pattern = match PathPattern::parse(selector) {
        Ok(p) => p,
        Err(e) => return Ok(pattern_error_to_term(env, &e)),
    };
    parse_with(env, input.as_slice(), |doc| {
        let settings = settings::extract(&doc, &pattern);
        ok_tuple(env, settings_to_term(env, &settings)?)
    })
}

#[rustler::nif]
fn extract_settings<'a>(env: Env<'a>, doc_ref: DocumentRef, selector: &str) -> NifResult<Term<'a>> {
    match PathPattern::parse(selector) {
        Ok(pattern) => {
            let settings = settings::extract(doc_ref.document(), &pattern);
            ok_tuple(env, settings_to_term(env, &settings)?)
        }
        Err(e) => Ok(pattern_error_to_term(env, &e)),
    }
}

// ============================================================================
// Strategy D: Summary
// ============================================================================

#[rustler::nif(schedule = "DirtyIo")]
fn parse_summary<'a>(env: Env<'a>, input: Binary<'a>) -> NifResult<Term<'a>> {
    parse_with(env, input.as_slice(), |doc| {
        ok_tuple(env, summary_to_term(env, &summary::summarize(&doc)))
    })
}

#[rustler::nif]
fn summarize<'a>(env: Env<'a>, doc_ref: DocumentRef) -> NifResult<Term<'a>> {
    Ok(summary_to_term(env, &summary::summarize(doc_ref.document())))
}

// ============================================================================
// Info
// ============================================================================

/// Parser identity and the active policy
#[rustler::nif]
fn info<'a>(env: Env<'a>) -> NifResult<Term<'a>> {
    with_deployment(env, |deployment| {
        let pairs = [
            (term::parser().encode(env), str_to_binary(env, "policyxml")),
            (term::version().encode(env), str_to_binary(env, env!("CARGO_PKG_VERSION"))),
            (
                term::policy().encode(env),
                policy_to_term(env, &deployment.policy, deployment.resolver.name())?,
            ),
        ];
        Term::map_from_pairs(env, &pairs)
    })
}

// ============================================================================
// NIF Initialization
// ============================================================================

fn load(_env: Env, info: Term) -> bool {
    config::init_tracing();

    let deployment = match DeploymentOptions::from_load_info(info).and_then(DeploymentOptions::build) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "invalid load info");
            return false;
        }
    };

    tracing::info!(
        external_entities = deployment.policy.external_entities,
        parameter_entities = deployment.policy.parameter_entities,
        strictness = ?deployment.policy.strictness,
        scope = deployment.policy.scope.as_str(),
        resolver = deployment.resolver.name(),
        "deployment loaded"
    );
    if !config::install(deployment) {
        tracing::warn!("deployment already installed, keeping the first one");
    }
    true
}

rustler::init!("Elixir.PolicyXML.Native", load = load);
