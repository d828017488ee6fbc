//! Configuration and shared types
//!
//! Error taxonomy, process-state tags and the harness settings file.

pub mod config;
pub mod types;
