//! ResourceArc Wrappers
//!
//! Parsed documents handed to the host. A document never changes after
//! parsing, so the resource is shared without a lock.

use crate::dom::Document;
use rustler::ResourceArc;

/// Wrapper for a parsed Document that can be stored in a ResourceArc.
/// Later calls (serialize, extract, summarize) reuse the tree instead of
/// re-parsing, and never reach the resolver again.
pub struct DocumentResource {
    doc: Document,
}

impl DocumentResource {
    pub fn new(doc: Document) -> Self {
        DocumentResource { doc }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }
}

#[rustler::resource_impl]
impl rustler::Resource for DocumentResource {}

/// Type alias for document ResourceArc
pub type DocumentRef = ResourceArc<DocumentResource>;
