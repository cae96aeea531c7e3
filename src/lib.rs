//! Point-in-time snapshots over published content with a multi-level property
//! value cache and change-driven invalidation.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod published;
