//! Verification outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitOutcome {
    Exited { code: i32 },
    Signaled { signal: i32 },
    /// Killed by the harness after the configured timeout.
    TimedOut { timeout_ms: u64 },
}

impl ExitOutcome {
    /// Exit code 0 is success; every other ending is failure.
    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Exited { code: 0 })
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited { code } => write!(f, "exited with code {}", code),
            ExitOutcome::Signaled { signal } => write!(f, "killed by signal {}", signal),
            ExitOutcome::TimedOut { timeout_ms } => write!(f, "timed out after {}ms", timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Judgment {
    Pass,
    Fail { reason: String },
}

impl Judgment {
    /// Compare an outcome with the expectation. A timeout fails regardless of
    /// what was expected.
    pub fn of(outcome: &ExitOutcome, expect_success: bool) -> Self {
        if let ExitOutcome::TimedOut { .. } = outcome {
            return Judgment::Fail {
                reason: outcome.to_string(),
            };
        }
        match (outcome.is_success(), expect_success) {
            (true, true) | (false, false) => Judgment::Pass,
            (false, true) => Judgment::Fail {
                reason: format!("{}, expected success", outcome),
            },
            (true, false) => Judgment::Fail {
                reason: format!("{}, expected failure", outcome),
            },
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Judgment::Pass)
    }
}

/// Result of one verification run. Spawn, judgment and cleanup are recorded
/// independently; a run passes only when all three are clean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub procedure: String,
    pub expect_success: bool,
    pub argument: Option<String>,
    /// `None` when no child ran.
    pub outcome: Option<ExitOutcome>,
    pub judgment: Option<Judgment>,
    pub spawn_error: Option<String>,
    pub cleanup_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl VerificationReport {
    pub(crate) fn new(procedure: &str, expect_success: bool) -> Self {
        Self {
            procedure: procedure.to_string(),
            expect_success,
            argument: None,
            outcome: None,
            judgment: None,
            spawn_error: None,
            cleanup_error: None,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub(crate) fn record_outcome(&mut self, outcome: ExitOutcome) {
        self.judgment = Some(Judgment::of(&outcome, self.expect_success));
        self.outcome = Some(outcome);
    }

    pub(crate) fn finish(&mut self, elapsed: Duration) {
        self.duration_ms = elapsed.as_millis() as u64;
    }

    pub fn passed(&self) -> bool {
        self.spawn_error.is_none()
            && self.cleanup_error.is_none()
            && self.judgment.as_ref().map_or(false, Judgment::is_pass)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed() { "PASS" } else { "FAIL" };
        let expected = if self.expect_success { "success" } else { "failure" };
        write!(
            f,
            "{} {} (expected {}) in {}ms",
            status, self.procedure, expected, self.duration_ms
        )?;
        if let Some(outcome) = &self.outcome {
            write!(f, "\n  child {}", outcome)?;
        }
        if let Some(Judgment::Fail { reason }) = &self.judgment {
            write!(f, "\n  judgment: {}", reason)?;
        }
        if let Some(err) = &self.spawn_error {
            write!(f, "\n  spawn error: {}", err)?;
        }
        if let Some(err) = &self.cleanup_error {
            write!(f, "\n  cleanup error: {}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn judgment_matches_expectation() {
        let ok = ExitOutcome::Exited { code: 0 };
        let bad = ExitOutcome::Exited { code: 1 };
        let sig = ExitOutcome::Signaled { signal: 9 };

        assert!(Judgment::of(&ok, true).is_pass());
        assert!(Judgment::of(&bad, false).is_pass());
        assert!(Judgment::of(&sig, false).is_pass());
        assert!(!Judgment::of(&ok, false).is_pass());
        assert!(!Judgment::of(&bad, true).is_pass());
        assert!(!Judgment::of(&sig, true).is_pass());
    }

    #[test]
    fn timeout_never_passes() {
        let hung = ExitOutcome::TimedOut { timeout_ms: 10 };
        assert!(!Judgment::of(&hung, true).is_pass());
        assert!(!Judgment::of(&hung, false).is_pass());
    }

    #[test]
    fn cleanup_error_fails_an_otherwise_good_run() {
        let mut report = VerificationReport::new("p", true);
        report.record_outcome(ExitOutcome::Exited { code: 0 });
        assert!(report.passed());

        report.cleanup_error = Some("busy".into());
        assert!(!report.passed());
        assert!(report.judgment.as_ref().unwrap().is_pass());
        assert!(report.to_string().contains("cleanup error: busy"));
    }

    #[test]
    fn report_serializes_outcome_and_judgment() {
        let mut report = VerificationReport::new("cap_enter", true);
        report.record_outcome(ExitOutcome::Exited { code: 3 });
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["procedure"], "cap_enter");
        assert_eq!(json["outcome"]["kind"], "exited");
        assert_eq!(json["outcome"]["code"], 3);
        assert_eq!(json["judgment"]["verdict"], "fail");
        assert!(json["spawn_error"].is_null());
    }
}
