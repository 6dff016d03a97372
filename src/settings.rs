//! Settings Extraction
//!
//! Projects a parsed document onto a flat name/value map: every element
//! matched by a `PathPattern` contributes `name` attribute -> text.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::core::scanner::{is_name_char, is_name_start_char};
use crate::dom::{Document, Element};
use crate::error::PatternError;

/// Setting name to value, in order of first occurrence
pub type SettingsMap = IndexMap<String, String>;

/// Where matches are looked for, relative to the root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// `tag`, `./tag`: direct children of the root
    Children,
    /// `.//tag`: every element below the root
    Descendants,
    /// `//tag`: the whole tree, root included
    Tree,
}

/// A tag-name selector in ElementTree path syntax
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    axis: Axis,
    /// Tag name, `*` for any element
    tag: String,
}

impl PathPattern {
    pub fn parse(selector: &str) -> Result<Self, PatternError> {
        let selector = selector.trim();
        if selector.is_empty() {
            return Err(PatternError::Empty);
        }

        let (axis, tag) = if let Some(tag) = selector.strip_prefix(".//") {
            (Axis::Descendants, tag)
        } else if let Some(tag) = selector.strip_prefix("//") {
            (Axis::Tree, tag)
        } else if let Some(tag) = selector.strip_prefix("./") {
            (Axis::Children, tag)
        } else {
            (Axis::Children, selector)
        };

        if tag.contains(['/', '[', ']', '@', '(', ')']) {
            return Err(PatternError::Unsupported(selector.to_string()));
        }
        if tag != "*" && !is_tag_name(tag) {
            return Err(PatternError::InvalidName(tag.to_string()));
        }

        Ok(PathPattern {
            axis,
            tag: tag.to_string(),
        })
    }

    #[inline]
    fn accepts(&self, element: &Element) -> bool {
        self.tag == "*" || element.name == self.tag
    }

    /// Matching elements in document order
    pub fn select<'a>(&self, root: &'a Element) -> Vec<&'a Element> {
        match self.axis {
            Axis::Children => root.child_elements().filter(|e| self.accepts(e)).collect(),
            Axis::Descendants => root.descendants().filter(|e| self.accepts(e)).collect(),
            Axis::Tree => root.iter().filter(|e| self.accepts(e)).collect(),
        }
    }
}

impl FromStr for PathPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathPattern::parse(s)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.axis {
            Axis::Children => "./",
            Axis::Descendants => ".//",
            Axis::Tree => "//",
        };
        write!(f, "{}{}", prefix, self.tag)
    }
}

fn is_tag_name(tag: &str) -> bool {
    let bytes = tag.as_bytes();
    match bytes.split_first() {
        Some((&first, rest)) => is_name_start_char(first) && rest.iter().all(|&b| is_name_char(b)),
        None => false,
    }
}

/// Build the settings map for one document.
///
/// Elements without a non-empty `name` attribute or without text are
/// skipped. A repeated name keeps its first position and takes the later value.
pub fn extract(document: &Document, selector: &PathPattern) -> SettingsMap {
    let mut settings = SettingsMap::new();
    for element in selector.select(document.root()) {
        let name = match element.attribute("name") {
            Some(name) if !name.is_empty() => name,
            _ => continue,
        };
        let Some(value) = element.text() else {
            continue;
        };
        settings.insert(name.to_string(), value.to_string());
    }
    tracing::debug!(selector = %selector, count = settings.len(), "settings extracted");
    settings
}
