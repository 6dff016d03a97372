//! Core XML parsing primitives
//!
//! - Scanner: SIMD-accelerated delimiter detection using memchr
//! - Entities: predefined entities, character references, output escaping
//! - Attributes: start-tag attribute splitting
//! - DTD: entity declarations from the internal and external subsets
//! - Expansion: policy decisions, expansion budget, resolver calls
//! - Parser: prolog and body, producing a `Document`

pub mod attributes;
pub mod dtd;
pub mod entities;
pub mod expansion;
pub mod parser;
pub mod scanner;

pub use parser::parse;
