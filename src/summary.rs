//! Document Summary
//!
//! Element names plus a "name: value" digest, computed the way an
//! event-driven handler sees the document: the text buffer is cleared on
//! every start tag and read back (trimmed) on every end tag.

use crate::dom::{Document, Element, Node};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// Element names in document order
    pub elements: Vec<String>,
    /// One `"name: value\n"` line per end tag with non-empty buffered text
    pub content: String,
}

pub fn summarize(document: &Document) -> Summary {
    enum Event<'a> {
        Start(&'a Element),
        End(&'a str),
        Text(&'a str),
    }

    let mut summary = Summary::default();
    let mut buffer = String::new();
    let mut stack = vec![Event::Start(document.root())];

    while let Some(event) = stack.pop() {
        match event {
            Event::Start(element) => {
                summary.elements.push(element.name.clone());
                buffer.clear();
                stack.push(Event::End(&element.name));
                for child in element.children.iter().rev() {
                    match child {
                        Node::Element(e) => stack.push(Event::Start(e)),
                        Node::Text(t) => stack.push(Event::Text(t)),
                        Node::Comment(_) | Node::ProcessingInstruction { .. } => {}
                    }
                }
            }
            Event::Text(text) => buffer.push_str(text),
            Event::End(name) => {
                let value = buffer.trim();
                if !value.is_empty() {
                    summary.content.push_str(name);
                    summary.content.push_str(": ");
                    summary.content.push_str(value);
                    summary.content.push('\n');
                }
            }
        }
    }

    summary
}
