//! # sr-types
//!
//! Core types shared by the SymRefine crates: the arena expression tree and
//! its parser, datasets, candidates, configuration and the error taxonomy.

pub mod candidate;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod expr;
pub mod parse;

pub use candidate::*;
pub use config::*;
pub use dataset::*;
pub use errors::*;
pub use expr::*;
pub use parse::parse;
