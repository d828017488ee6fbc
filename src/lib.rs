//! capbox: Capsicum capability-mode sandboxing and its out-of-process verification
//!
//! # Architecture
//!
//! ## Rights ([`rights`])
//! - [`rights::Right`]: the kernel's capability rights, one payload bit each
//! - [`rights::RightsSet`]: set algebra over rights (set, clear, is_set, merge, remove)
//! - [`rights::codec`]: the packed two-word `cap_rights_t` layout
//! - [`rights::composite`]: named groups such as `CAP_PREAD` or `CAP_SOCK_CLIENT`
//!
//! ## Kernel Interface ([`kernel`])
//! - [`kernel::Kernel`]: the syscalls the sandbox consumes
//! - [`kernel::capsicum`]: FreeBSD bindings; `ENOSYS` elsewhere
//! - [`kernel::classify`]: errno to [`CapsicumError`] mapping
//!
//! ## Sandbox ([`sandbox`])
//! - [`sandbox::ProcessContext`]: one-way `Normal -> CapabilityMode` state, rights limiting
//! - [`sandbox::openat`]: directory-relative opens that survive `cap_enter`
//!
//! ## Verification Harness ([`harness`])
//! - [`harness::Registry`]: named procedures with argument generator and cleanup
//! - [`harness::run_if_directed`]: child-side dispatch of a re-exec directive
//! - [`harness::supervisor`]: spawn, deadline wait, process-group teardown
//! - [`harness::report`]: exit outcome, judgment and JSON report
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::workspace`]: per-run scenario directories
//! - [`safety::safe_cleanup`]: symlink-safe recursive removal
//!
//! ## Configuration ([`config`])
//! - [`config::config`]: harness settings file and environment overrides
//! - [`config::types`]: error taxonomy and shared enums
//!
//! # Design Principles
//!
//! 1. **One-way transitions stay in children** - nothing is asserted in a process after `cap_enter`
//! 2. **Kernel as truth** - rights are read back with `cap_rights_get`, not remembered
//! 3. **Narrow only** - the API has no way to widen a descriptor's rights
//! 4. **Minimal unsafe** - FFI lives in [`kernel::capsicum`] and [`safety::safe_cleanup`]

// Rights algebra and codec
pub mod rights;

// Kernel Primitives
pub mod kernel;

// Capability-mode process state
pub mod sandbox;

// Subprocess verification
pub mod harness;

// Built-in scenarios
pub mod scenarios;

// Safety & Cleanup
pub mod safety;

// Configuration
pub mod config;

// CLI entrypoint wiring for capcheck.
pub mod cli;

pub use config::types::*;
pub use rights::{Right, RightsSet};
pub use sandbox::ProcessContext;
