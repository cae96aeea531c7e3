//! Domain layer types and invariants.

pub mod content_type;
pub mod domains;
pub mod error;
pub mod nodes;
pub mod types;
