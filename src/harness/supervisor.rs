//! Child lifecycle: spawn with a directive, wait with a deadline, and tear
//! down the whole process group on timeout.

use super::report::ExitOutcome;
use super::Directive;
use crate::config::types::{CapsicumError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Limits applied to one child.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub grace: Duration,
    pub forward_output: bool,
}

/// Signals delivered while tearing a child down.
#[derive(Debug, Default, Clone)]
pub struct KillReport {
    pub term_sent: bool,
    pub kill_sent: bool,
    pub notes: Vec<String>,
}

/// Re-execute `exe` with `directive` and wait for it under `policy`.
pub fn run_child(exe: &Path, directive: &Directive, policy: &WaitPolicy) -> Result<ExitOutcome> {
    let mut cmd = Command::new(exe);
    cmd.args(directive.to_args())
        .stdin(Stdio::null())
        // Own group, so a timeout reaches anything the child forked.
        .process_group(0);
    if !policy.forward_output {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    }

    let mut child = cmd.spawn().map_err(|e| CapsicumError::SpawnFailed {
        procedure: directive.procname.clone(),
        reason: format!("{}: {}", exe.display(), e),
    })?;
    log::debug!(
        "Spawned {} for procedure {} (pid {})",
        exe.display(),
        directive.procname,
        child.id()
    );

    wait_with_deadline(&mut child, policy)
}

fn wait_with_deadline(child: &mut Child, policy: &WaitPolicy) -> Result<ExitOutcome> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Ok(match (status.code(), status.signal()) {
                    (Some(code), _) => ExitOutcome::Exited { code },
                    (None, Some(signal)) => ExitOutcome::Signaled { signal },
                    (None, None) => ExitOutcome::Exited { code: -1 },
                });
            }
            Ok(None) if started.elapsed() > policy.timeout => {
                let report = terminate_group(child, policy.grace);
                log::info!(
                    "Child {} timed out after {:?} (SIGTERM: {}, SIGKILL: {})",
                    child.id(),
                    policy.timeout,
                    report.term_sent,
                    report.kill_sent
                );
                for note in &report.notes {
                    log::debug!("{}", note);
                }
                return Ok(ExitOutcome::TimedOut {
                    timeout_ms: policy.timeout.as_millis() as u64,
                });
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // The child can no longer be watched; do not leave its group running.
                let report = terminate_group(child, policy.grace);
                log::warn!(
                    "Waiting for child {} failed ({}), group terminated (SIGTERM: {}, SIGKILL: {})",
                    child.id(),
                    e,
                    report.term_sent,
                    report.kill_sent
                );
                return Err(CapsicumError::Io(e));
            }
        }
    }
}

/// SIGTERM to the child's group, then SIGKILL once `grace` has passed, and
/// reap. Falls back to the child alone when the group is gone.
pub fn terminate_group(child: &mut Child, grace: Duration) -> KillReport {
    let mut report = KillReport::default();
    let pgid = Pid::from_raw(child.id() as i32);

    match killpg(pgid, Signal::SIGTERM) {
        Ok(()) => report.term_sent = true,
        Err(e) => report.notes.push(format!("group SIGTERM failed: {}", e)),
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if let Ok(Some(_)) = child.try_wait() {
            // Leader is gone; the rest of the group still gets SIGKILL below.
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => report.kill_sent = true,
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => {
            report.notes.push(format!("group SIGKILL failed: {}", e));
            if child.kill().is_ok() {
                report.kill_sent = true;
            }
        }
    }

    if let Err(e) = child.wait() {
        report.notes.push(format!("reaping child failed: {}", e));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(timeout_ms: u64) -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_millis(timeout_ms),
            grace: Duration::from_millis(50),
            forward_output: false,
        }
    }

    fn shell(script: &str) -> Child {
        Command::new("/bin/sh")
            .args(["-c", script])
            .process_group(0)
            .spawn()
            .unwrap()
    }

    #[test]
    fn collects_exit_codes() {
        let mut child = shell("exit 7");
        assert_eq!(
            wait_with_deadline(&mut child, &policy(5_000)).unwrap(),
            ExitOutcome::Exited { code: 7 }
        );
    }

    #[test]
    fn reports_signals() {
        let mut child = shell("kill -9 $$");
        assert_eq!(
            wait_with_deadline(&mut child, &policy(5_000)).unwrap(),
            ExitOutcome::Signaled { signal: 9 }
        );
    }

    #[test]
    fn kills_hung_children() {
        let mut child = shell("sleep 30");
        let started = Instant::now();
        let outcome = wait_with_deadline(&mut child, &policy(100)).unwrap();
        assert_eq!(outcome, ExitOutcome::TimedOut { timeout_ms: 100 });
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn wait_failure_terminates_group_and_returns_error() {
        use nix::sys::wait::waitpid;

        // The leader exits at once and is reaped behind the Child's back,
        // leaving its background sleep in the group.
        let mut child = shell("sleep 30 & exit 0");
        let pid = Pid::from_raw(child.id() as i32);
        waitpid(pid, None).unwrap();

        let started = Instant::now();
        let err = wait_with_deadline(&mut child, &policy(5_000)).unwrap_err();
        assert!(matches!(err, CapsicumError::Io(_)), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_executable_is_spawn_failure() {
        let directive = Directive::new("anything", "-");
        let err = run_child(Path::new("/nonexistent/capcheck"), &directive, &policy(1_000))
            .unwrap_err();
        assert!(matches!(err, CapsicumError::SpawnFailed { ref procedure, .. } if procedure == "anything"));
    }
}
