//! Parallel Batch Parsing
//!
//! Uses Rayon to parse independent documents concurrently. The policy and
//! resolver are shared read-only; each document gets its own declaration
//! table and expansion budget.

use rayon::prelude::*;

use crate::core::parse;
use crate::dom::Document;
use crate::error::ParseError;
use crate::policy::ParserPolicy;
use crate::resolver::EntityResolver;

/// Parse every input under the same policy, results in input order
pub fn parse_parallel<T: AsRef<[u8]> + Sync>(
    inputs: &[T],
    policy: &ParserPolicy,
    resolver: &dyn EntityResolver,
) -> Vec<Result<Document, ParseError>> {
    inputs
        .par_iter()
        .map(|input| parse(input.as_ref(), policy, resolver))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MapResolver;

    #[test]
    fn test_parallel_parse_keeps_order() {
        let inputs = ["<a/>", "<b><c/></b>", "<broken>", "<d>text</d>"];
        let results = parse_parallel(&inputs, &ParserPolicy::hardened(), &MapResolver::new());
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().root().name, "a");
        assert_eq!(results[1].as_ref().unwrap().element_count(), 2);
        assert_eq!(results[2].as_ref().unwrap_err().kind(), "malformed");
        assert_eq!(results[3].as_ref().unwrap().root().text(), Some("text"));
    }

    #[test]
    fn test_budget_is_per_document() {
        let mut policy = ParserPolicy::hardened();
        policy.max_expansion_bytes = Some(8);
        let xml = r#"<!DOCTYPE a [<!ENTITY e "12345">]><a>&e;</a>"#;
        let inputs = vec![xml.as_bytes().to_vec(); 16];
        let results = parse_parallel(&inputs, &policy, &MapResolver::new());
        assert!(results.iter().all(|r| r.is_ok()));
    }
}
