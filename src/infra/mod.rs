//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod memory;
pub mod side_store;
pub mod telemetry;
