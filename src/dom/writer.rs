//! XML Serialization
//!
//! Writes a tree back out as markup. Entity references are not
//! reconstructed: whatever was substituted during parsing is written as
//! plain (escaped) text.

use super::node::{Element, Node};
use crate::core::entities::{encode_attribute, encode_text};

/// Serialize an element and its subtree.
/// Uses iterative approach with explicit stack to avoid stack overflow on deep XML
pub fn element_to_xml(root: &Element) -> String {
    let mut buf = String::with_capacity(1024);

    enum StackEntry<'a> {
        Enter(&'a Node),
        Close(&'a str),
    }

    let mut stack: Vec<StackEntry<'_>> = Vec::with_capacity(64);
    open_element(root, &mut buf, &mut stack);

    while let Some(entry) = stack.pop() {
        match entry {
            StackEntry::Close(name) => {
                buf.push_str("</");
                buf.push_str(name);
                buf.push('>');
            }
            StackEntry::Enter(Node::Element(e)) => open_element(e, &mut buf, &mut stack),
            StackEntry::Enter(Node::Text(t)) => buf.push_str(&encode_text(t)),
            StackEntry::Enter(Node::Comment(c)) => {
                buf.push_str("<!--");
                buf.push_str(c);
                buf.push_str("-->");
            }
            StackEntry::Enter(Node::ProcessingInstruction { target, data }) => {
                buf.push_str("<?");
                buf.push_str(target);
                if !data.is_empty() {
                    buf.push(' ');
                    buf.push_str(data);
                }
                buf.push_str("?>");
            }
        }
    }

    fn open_element<'a>(e: &'a Element, buf: &mut String, stack: &mut Vec<StackEntry<'a>>) {
        buf.push('<');
        buf.push_str(&e.name);
        for (name, value) in &e.attributes {
            buf.push(' ');
            buf.push_str(name);
            buf.push_str("=\"");
            buf.push_str(&encode_attribute(value));
            buf.push('"');
        }
        if e.children.is_empty() {
            buf.push_str("/>");
            return;
        }
        buf.push('>');
        // Closing tag first, then children in reverse so they pop in order
        stack.push(StackEntry::Close(&e.name));
        for child in e.children.iter().rev() {
            stack.push(StackEntry::Enter(child));
        }
    }

    buf
}
