//! Subprocess harness tests
//!
//! This binary is its own child: `main` dispatches a launch directive first,
//! so every procedure registered below runs in a fresh re-execution of this
//! test executable.

use capbox::config::config::HarnessConfig;
use capbox::harness::{finish, ExitOutcome, Harness, Procedure, Registry, UNKNOWN_PROCEDURE_EXIT};
use capbox::kernel::HostKernel;
use capbox::{CapsicumError, CleanupPolicy};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

static COUNTED_CLEANUPS: AtomicUsize = AtomicUsize::new(0);

fn exits_zero(_: &str) {
    std::process::exit(0)
}

fn exits_three(_: &str) {
    std::process::exit(3)
}

fn returns(_: &str) {}

fn hangs(_: &str) {
    std::thread::sleep(Duration::from_secs(60));
}

fn aborts(_: &str) {
    std::process::abort()
}

fn echoes_arg(arg: &str) {
    if arg == "payload=42" {
        std::process::exit(0)
    }
    eprintln!("unexpected argument {:?}", arg);
    std::process::exit(1)
}

fn writes_into_dir(arg: &str) {
    finish(std::fs::write(Path::new(arg).join("left-behind"), b"data"))
}

fn registry() -> Registry {
    let builder = Registry::builder()
        .register(Procedure::new("exits_zero", exits_zero))
        .register(Procedure::new("exits_three", exits_three).expect_failure())
        .register(Procedure::new("returns_expecting_success", returns))
        .register(Procedure::new("returns_expecting_failure", returns).expect_failure())
        .register(Procedure::new("hangs", hangs).expect_failure())
        .register(Procedure::new("aborts", aborts).expect_failure())
        .register(Procedure::new("echoes_arg", echoes_arg).with_args(|_| Ok("payload=42".into())))
        .register(
            Procedure::new("cleanup_fails", exits_zero)
                .with_cleanup(|arg, _| Err(CapsicumError::CleanupFailed {
                    arg: arg.to_string(),
                    reason: "refused".into(),
                })),
        )
        .register(Procedure::new("counted", exits_three).with_cleanup(|arg, _| {
            assert_eq!(arg, "-");
            COUNTED_CLEANUPS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .register(Procedure::new("writes_into_dir", writes_into_dir).in_temp_dir());
    capbox::scenarios::register(builder)
        .build()
        .expect("registry")
}

fn config() -> HarnessConfig {
    HarnessConfig {
        timeout_ms: 20_000,
        grace_ms: 100,
        forward_output: false,
        ..HarnessConfig::default()
    }
}

fn test_exit_codes_are_judged(registry: &Registry) {
    let harness = Harness::new(registry, config());
    harness.assert_exits_correctly("exits_zero");
    harness.assert_exits_correctly("exits_three");
    harness.assert_exits_correctly("aborts");

    let report = harness.verify("exits_three").unwrap();
    assert_eq!(report.outcome, Some(ExitOutcome::Exited { code: 3 }));
}

fn test_returning_entry_contradicts_expectation(registry: &Registry) {
    let harness = Harness::new(registry, config());

    let report = harness.verify("returns_expecting_success").unwrap();
    assert_eq!(report.outcome, Some(ExitOutcome::Exited { code: 1 }));
    assert!(!report.passed());

    let report = harness.verify("returns_expecting_failure").unwrap();
    assert_eq!(report.outcome, Some(ExitOutcome::Exited { code: 0 }));
    assert!(!report.passed());
}

fn test_timeout_kills_and_fails(registry: &Registry) {
    let config = HarnessConfig {
        timeout_ms: 300,
        ..config()
    };
    let harness = Harness::new(registry, config);
    let started = Instant::now();
    let report = harness.verify("hangs").unwrap();
    assert_eq!(report.outcome, Some(ExitOutcome::TimedOut { timeout_ms: 300 }));
    // Expected failure, but a timeout is never a pass.
    assert!(!report.passed());
    assert!(started.elapsed() < Duration::from_secs(10));
}

fn test_argument_reaches_child(registry: &Registry) {
    Harness::new(registry, config()).assert_exits_correctly("echoes_arg");
}

fn test_cleanup_failure_is_reported_separately(registry: &Registry) {
    let report = Harness::new(registry, config()).verify("cleanup_fails").unwrap();
    assert!(report.judgment.as_ref().unwrap().is_pass());
    assert!(report.cleanup_error.as_deref().unwrap().contains("refused"));
    assert!(!report.passed());
}

fn test_cleanup_runs_exactly_once_per_run(registry: &Registry) {
    let before = COUNTED_CLEANUPS.load(Ordering::SeqCst);
    let harness = Harness::new(registry, config());
    let report = harness.verify("counted").unwrap();
    assert!(!report.passed());
    assert_eq!(COUNTED_CLEANUPS.load(Ordering::SeqCst), before + 1);

    let failing = Harness::new(registry, config()).with_executable("/nonexistent/capcheck");
    let report = failing.verify("counted").unwrap();
    assert!(report.spawn_error.is_some());
    assert_eq!(COUNTED_CLEANUPS.load(Ordering::SeqCst), before + 2);
}

fn test_temp_dir_is_removed_after_run(registry: &Registry) {
    let report = Harness::new(registry, config()).verify("writes_into_dir").unwrap();
    assert!(report.passed(), "{}", report);
    let dir = report.argument.expect("generated argument");
    assert!(!Path::new(&dir).exists());
}

fn test_best_effort_cleanup_swallows_errors(registry: &Registry) {
    let config = HarnessConfig {
        cleanup: CleanupPolicy::BestEffort,
        ..config()
    };
    // The procedure's own cleanup ignores the policy, so this still fails.
    let report = Harness::new(registry, config).verify("cleanup_fails").unwrap();
    assert!(report.cleanup_error.is_some());
}

fn test_unknown_procedure_in_child_exits_2(_: &Registry) {
    let exe = std::env::current_exe().unwrap();
    let status = std::process::Command::new(exe)
        .arg("--capsicum-internal-procname=no_such_procedure")
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(UNKNOWN_PROCEDURE_EXIT));
}

fn test_non_utf8_argument_does_not_break_dispatch(_: &Registry) {
    use std::os::unix::ffi::OsStrExt;

    let exe = std::env::current_exe().unwrap();
    let status = std::process::Command::new(exe)
        .arg(std::ffi::OsStr::from_bytes(b"stray-\xff"))
        .arg("--capsicum-internal-procname=exits_three")
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(3));
}

fn test_parallel_runs_keep_order(registry: &Registry) {
    let config = HarnessConfig { jobs: 4, ..config() };
    let names = ["exits_zero", "exits_three", "echoes_arg", "exits_zero", "aborts"];
    let reports = Harness::new(registry, config).verify_many(&names).unwrap();
    let got: Vec<&str> = reports.iter().map(|r| r.procedure.as_str()).collect();
    assert_eq!(got, names);
    assert!(reports.iter().all(|r| r.passed()));
}

fn test_builtin_scenarios(registry: &Registry) {
    if !HostKernel::supports_capsicum() {
        println!("    (skipped: no Capsicum on this platform)");
        return;
    }
    let harness = Harness::new(registry, config());
    for name in ["cap_enter", "openat", "cap_enter_ambient_open", "rights_narrowing"] {
        harness.assert_exits_correctly(name);
    }
}

fn test_builtin_scenarios_fail_without_capsicum(registry: &Registry) {
    if HostKernel::supports_capsicum() {
        return;
    }
    // cap_enter reports ENOSYS, so every positive scenario must fail.
    let harness = Harness::new(registry, config());
    for name in ["cap_enter", "openat"] {
        let report = harness.verify(name).unwrap();
        assert_eq!(report.outcome, Some(ExitOutcome::Exited { code: 1 }), "{}", name);
        assert!(report.cleanup_error.is_none(), "{}", report);
    }
}

const TESTS: &[(&str, fn(&Registry))] = &[
    ("exit_codes_are_judged", test_exit_codes_are_judged),
    ("returning_entry_contradicts_expectation", test_returning_entry_contradicts_expectation),
    ("timeout_kills_and_fails", test_timeout_kills_and_fails),
    ("argument_reaches_child", test_argument_reaches_child),
    ("cleanup_failure_is_reported_separately", test_cleanup_failure_is_reported_separately),
    ("cleanup_runs_exactly_once_per_run", test_cleanup_runs_exactly_once_per_run),
    ("temp_dir_is_removed_after_run", test_temp_dir_is_removed_after_run),
    ("best_effort_cleanup_swallows_errors", test_best_effort_cleanup_swallows_errors),
    ("unknown_procedure_in_child_exits_2", test_unknown_procedure_in_child_exits_2),
    ("non_utf8_argument_does_not_break_dispatch", test_non_utf8_argument_does_not_break_dispatch),
    ("parallel_runs_keep_order", test_parallel_runs_keep_order),
    ("builtin_scenarios", test_builtin_scenarios),
    ("builtin_scenarios_fail_without_capsicum", test_builtin_scenarios_fail_without_capsicum),
];

fn main() {
    let registry = registry();
    capbox::harness::run_if_directed(&registry);

    let filter: Vec<String> = std::env::args_os()
        .skip(1)
        .filter_map(|arg| arg.into_string().ok())
        .filter(|arg| !arg.starts_with('-'))
        .collect();

    let mut failed = Vec::new();
    let mut ran = 0;
    for (name, test) in TESTS {
        if !filter.is_empty() && !filter.iter().any(|f| name.contains(f.as_str())) {
            continue;
        }
        ran += 1;
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| test(&registry)));
        match outcome {
            Ok(()) => println!("test {} ... ok", name),
            Err(_) => {
                println!("test {} ... FAILED", name);
                failed.push(*name);
            }
        }
    }

    println!(
        "\ntest result: {}. {} passed; {} failed",
        if failed.is_empty() { "ok" } else { "FAILED" },
        ran - failed.len(),
        failed.len()
    );
    if !failed.is_empty() {
        std::process::exit(1);
    }
}
