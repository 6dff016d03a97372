//! DOM Module - Owned XML tree
//!
//! - `Element` / `Node`: the tree handed to consumers
//! - `Document`: root holder, exactly one root element
//! - writer: iterative serializer back to markup

pub mod document;
pub mod node;
pub mod writer;

pub use document::Document;
pub use node::{Element, Node};
