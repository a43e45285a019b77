//! Core infrastructure: constructs, tokens, errors, and the bridge.yaml layer.

pub mod artifact;
pub mod builder;
pub mod construct;
pub mod error;
pub mod parser;
pub mod template;
pub mod tokens;
pub mod types;
