/// Per-scenario temporary directories.
///
/// Each verification run gets its own `capsicum-<uuid>` directory under the
/// configured temp root, created by the argument generator in the parent and
/// removed by the paired cleanup function once the child is gone.
use crate::config::types::{CapsicumError, CleanupPolicy, Result};
use crate::safety::safe_cleanup;
use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Name prefix of every scenario directory.
pub const SCENARIO_PREFIX: &str = "capsicum-";

/// A scenario directory. Not removed on drop: the child that uses it runs
/// in another process, and removal belongs to the harness cleanup step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioDir {
    path: PathBuf,
}

impl ScenarioDir {
    /// Create a fresh, uniquely named directory under `root` (mode 0700).
    pub fn create(root: &Path) -> Result<Self> {
        let path = root.join(format!("{}{}", SCENARIO_PREFIX, Uuid::new_v4()));
        fs::DirBuilder::new()
            .mode(0o700)
            .create(&path)
            .map_err(|e| {
                CapsicumError::Io(io::Error::new(
                    e.kind(),
                    format!("Failed to create scenario directory {}: {}", path.display(), e),
                ))
            })?;
        log::debug!("Created scenario directory {}", path.display());
        Ok(Self { path })
    }

    /// Wrap a directory handed over as a procedure argument.
    pub fn from_arg(arg: &str) -> Self {
        Self {
            path: PathBuf::from(arg),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The argument string passed to the child. A path that is not UTF-8
    /// cannot name the directory on the child's side, so it is refused.
    pub fn as_arg(&self) -> Result<String> {
        self.path.to_str().map(str::to_owned).ok_or_else(|| {
            CapsicumError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Scenario directory {} is not valid UTF-8", self.path.display()),
            ))
        })
    }

    /// Remove the directory and its contents. A directory that is already
    /// gone counts as removed under either policy.
    pub fn remove(&self, policy: CleanupPolicy) -> Result<()> {
        match safe_cleanup::remove_tree_secure(&self.path) {
            Ok(()) => Ok(()),
            Err(CapsicumError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("Scenario directory {} already removed", self.path.display());
                Ok(())
            }
            Err(e) => match policy {
                CleanupPolicy::Strict => Err(CapsicumError::CleanupFailed {
                    arg: self.path.display().to_string(),
                    reason: e.to_string(),
                }),
                CleanupPolicy::BestEffort => {
                    log::warn!(
                        "Failed to remove scenario directory {}: {}",
                        self.path.display(),
                        e
                    );
                    Ok(())
                }
            },
        }
    }
}

/// Argument generator for scenarios that work in a temp directory.
pub fn make_temp_dir(root: &Path) -> Result<String> {
    if root.to_str().is_none() {
        return Err(CapsicumError::Config(format!(
            "temp root {} is not valid UTF-8",
            root.display()
        )));
    }
    ScenarioDir::create(root)?.as_arg()
}

/// Cleanup paired with [`make_temp_dir`].
pub fn remove_temp_dir(arg: &str, policy: CleanupPolicy) -> Result<()> {
    ScenarioDir::from_arg(arg).remove(policy)
}
