//! Parsing Strategy Module
//!
//! - parallel: many independent documents parsed on the rayon pool

pub mod parallel;

pub use parallel::parse_parallel;
