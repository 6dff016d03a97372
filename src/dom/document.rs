//! Parsed Document
//!
//! Exactly one root element per successfully parsed document.

use super::node::Element;
use super::writer::element_to_xml;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: Element,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Document { root }
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Re-serialize the root element (no XML declaration, no DOCTYPE)
    pub fn to_xml(&self) -> String {
        element_to_xml(&self.root)
    }

    /// Number of elements, root included
    pub fn element_count(&self) -> usize {
        self.root.iter().count()
    }
}
