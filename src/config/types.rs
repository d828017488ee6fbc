/// Core error and shared types for capbox
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kernel operations whose failures are classified into [`CapsicumError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Syscall {
    CapEnter,
    CapGetMode,
    CapRightsLimit,
    CapRightsGet,
    OpenAt,
    Open,
    Mkdir,
}

impl Syscall {
    pub fn name(self) -> &'static str {
        match self {
            Syscall::CapEnter => "cap_enter",
            Syscall::CapGetMode => "cap_getmode",
            Syscall::CapRightsLimit => "cap_rights_limit",
            Syscall::CapRightsGet => "cap_rights_get",
            Syscall::OpenAt => "openat",
            Syscall::Open => "open",
            Syscall::Mkdir => "mkdir",
        }
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Process capability state. The only transition is `Normal -> CapabilityMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityMode {
    Normal,
    CapabilityMode,
}

impl CapabilityMode {
    pub fn is_sandboxed(self) -> bool {
        matches!(self, CapabilityMode::CapabilityMode)
    }
}

/// How scenario cleanup treats removal failures other than "already gone".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Any failure except a missing directory is reported as `CleanupFailed`.
    #[default]
    Strict,
    /// Failures are logged and swallowed.
    BestEffort,
}

/// Custom error types for capbox
#[derive(Error, Debug)]
pub enum CapsicumError {
    #[error("Invalid capability right: {0}")]
    InvalidRight(String),

    #[error("Malformed rights representation: {0}")]
    MalformedRights(String),

    #[error("Bad file descriptor in {op}")]
    BadDescriptor {
        op: Syscall,
        #[source]
        source: std::io::Error,
    },

    #[error("Permission denied in {op}: {source}")]
    PermissionDenied {
        op: Syscall,
        #[source]
        source: std::io::Error,
    },

    #[error("Not capable in {op}: {source}")]
    NotCapable {
        op: Syscall,
        #[source]
        source: std::io::Error,
    },

    #[error("Capability mode transition failed: {0}")]
    TransitionFailed(#[source] std::io::Error),

    #[error("{op} is not supported by this kernel")]
    Unsupported { op: Syscall },

    #[error("Failed to spawn procedure {procedure}: {reason}")]
    SpawnFailed { procedure: String, reason: String },

    #[error("Cleanup failed for {arg}: {reason}")]
    CleanupFailed { arg: String, reason: String },

    #[error("Unknown procedure: {0}")]
    UnknownProcedure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CapsicumError {
    /// True when the error is the signature of a held sandbox boundary.
    pub fn is_not_capable(&self) -> bool {
        matches!(self, CapsicumError::NotCapable { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CapsicumError::PermissionDenied { .. })
    }

    pub fn is_bad_descriptor(&self) -> bool {
        matches!(self, CapsicumError::BadDescriptor { .. })
    }
}

pub type Result<T> = std::result::Result<T, CapsicumError>;
