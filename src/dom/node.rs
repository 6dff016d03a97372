//! Tree nodes
//!
//! Owned, immutable once parsing finishes. Entity replacement text is
//! already merged into `Text` nodes and attribute values here.

/// A child of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Character data (CDATA sections are merged in)
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

/// An element with its attributes and children in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Get attribute value by name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Text before the first child node, None when there is none
    pub fn text(&self) -> Option<&str> {
        match self.children.first() {
            Some(Node::Text(t)) if !t.is_empty() => Some(t),
            _ => None,
        }
    }

    /// Append text, merging with a preceding text node
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }

    pub fn push(&mut self, node: Node) {
        match node {
            Node::Text(t) => self.push_text(&t),
            other => self.children.push(other),
        }
    }

    /// Direct child elements
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// This element and all descendant elements in document order
    pub fn iter(&self) -> ElementIter<'_> {
        ElementIter { stack: vec![self] }
    }

    /// Descendant elements in document order, excluding self
    pub fn descendants(&self) -> ElementIter<'_> {
        let mut iter = self.iter();
        iter.next();
        iter
    }
}

impl Drop for Element {
    /// Tear down descendants from a heap stack. The derived drop recurses once
    /// per nesting level and overflows on deep documents.
    fn drop(&mut self) {
        if !self.children.iter().any(|c| matches!(c, Node::Element(_))) {
            return;
        }
        let mut pending: Vec<Element> = Vec::new();
        for child in self.children.drain(..) {
            if let Node::Element(e) = child {
                pending.push(e);
            }
        }
        while let Some(mut e) = pending.pop() {
            for child in e.children.drain(..) {
                if let Node::Element(c) = child {
                    pending.push(c);
                }
            }
        }
    }
}

/// Pre-order element iterator (explicit stack, no recursion)
pub struct ElementIter<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for ElementIter<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.stack.pop()?;
        for child in current.children.iter().rev() {
            if let Node::Element(e) = child {
                self.stack.push(e);
            }
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Element {
        let mut b = Element::new("b");
        b.push(Node::Element(Element::new("c")));
        let mut root = Element::new("root");
        root.push_text("lead");
        root.push(Node::Element(Element::new("a")));
        root.push(Node::Element(b));
        root
    }

    #[test]
    fn test_document_order() {
        let root = sample();
        let names: Vec<_> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["root", "a", "b", "c"]);
        let names: Vec<_> = root.descendants().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_text_merging() {
        let mut e = Element::new("e");
        e.push_text("a");
        e.push(Node::Text("b".to_string()));
        e.push_text("");
        assert_eq!(e.children.len(), 1);
        assert_eq!(e.text(), Some("ab"));
    }

    #[test]
    fn test_text_is_leading_only() {
        let mut e = Element::new("e");
        e.push(Node::Comment("c".to_string()));
        e.push_text("after");
        assert_eq!(e.text(), None);
        assert_eq!(e.children.len(), 2);
    }

    #[test]
    fn test_drop_deep_tree() {
        let mut node = Element::new("leaf");
        for _ in 0..300_000 {
            let mut parent = Element::new("n");
            parent.push(Node::Element(node));
            node = parent;
        }
        assert_eq!(node.iter().count(), 300_001);
        drop(node);
    }

    #[test]
    fn test_attribute_lookup() {
        let mut e = Element::new("setting");
        e.attributes.push(("name".to_string(), "timeout".to_string()));
        assert_eq!(e.attribute("name"), Some("timeout"));
        assert_eq!(e.attribute("value"), None);
    }
}
