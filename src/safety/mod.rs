//! Scenario directories and their removal.

pub mod safe_cleanup;
pub mod workspace;
