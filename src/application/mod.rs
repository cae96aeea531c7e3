//! Collaborator contracts, property value conversion and command errors.

pub mod convert;
pub mod converters;
pub mod error;
pub mod repos;
