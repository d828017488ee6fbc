//! Out-of-process verification.
//!
//! Entering capability mode cannot be undone, so every check that needs it
//! runs in a disposable child: the parent re-executes its own binary with a
//! directive naming a registered [`Procedure`], the child runs the entry and
//! exits, and the parent judges the exit status against the procedure's
//! expectation. Per run the states are
//! `SELECTED -> SPAWNED -> EXITED -> JUDGED -> CLEANED`, and cleanup runs
//! exactly once whenever an argument was generated.
//!
//! Any binary that spawns procedures must call [`run_if_directed`] at the top
//! of `main`, before it parses its own arguments.

pub mod report;
pub mod supervisor;

use crate::config::config::HarnessConfig;
use crate::config::types::{CapsicumError, CleanupPolicy, Result};
use crate::safety::workspace;
use report::VerificationReport;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Instant;
use supervisor::WaitPolicy;

pub use report::{ExitOutcome, Judgment};

pub const PROCNAME_FLAG: &str = "--capsicum-internal-procname";
pub const ARG_FLAG: &str = "--capsicum-internal-arg";
/// Argument passed when a procedure has no generator.
pub const DEFAULT_ARG: &str = "-";
/// Exit code of a child asked to run a procedure it does not know.
pub const UNKNOWN_PROCEDURE_EXIT: i32 = 2;

/// Child-side body of a procedure. It receives the generated argument and is
/// expected to end the process, normally through [`finish`].
pub type EntryFn = fn(&str);
/// Parent-side argument generator, given the configured temp root.
pub type ArgGenerator = Box<dyn Fn(&Path) -> Result<String> + Send + Sync>;
/// Parent-side cleanup, given the generated argument.
pub type CleanupFn = Box<dyn Fn(&str, CleanupPolicy) -> Result<()> + Send + Sync>;

/// A named check that runs in a child process.
pub struct Procedure {
    name: String,
    description: String,
    entry: EntryFn,
    expect_success: bool,
    generator: Option<ArgGenerator>,
    cleanup: Option<CleanupFn>,
}

impl Procedure {
    /// A procedure expected to exit 0, with the default argument and no cleanup.
    pub fn new(name: impl Into<String>, entry: EntryFn) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            entry,
            expect_success: true,
            generator: None,
            cleanup: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Expect the child to end in failure instead.
    pub fn expect_failure(mut self) -> Self {
        self.expect_success = false;
        self
    }

    pub fn with_args<G>(mut self, generator: G) -> Self
    where
        G: Fn(&Path) -> Result<String> + Send + Sync + 'static,
    {
        self.generator = Some(Box::new(generator));
        self
    }

    pub fn with_cleanup<C>(mut self, cleanup: C) -> Self
    where
        C: Fn(&str, CleanupPolicy) -> Result<()> + Send + Sync + 'static,
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Give each run a fresh scenario directory as its argument and remove it
    /// afterwards.
    pub fn in_temp_dir(self) -> Self {
        self.with_args(workspace::make_temp_dir)
            .with_cleanup(workspace::remove_temp_dir)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn expect_success(&self) -> bool {
        self.expect_success
    }

    fn generate_arg(&self, temp_root: &Path) -> Result<String> {
        match &self.generator {
            Some(generate) => generate(temp_root),
            None => Ok(DEFAULT_ARG.to_string()),
        }
    }

    fn clean_up(&self, arg: &str, policy: CleanupPolicy) -> Result<()> {
        match &self.cleanup {
            Some(cleanup) => cleanup(arg, policy),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedure")
            .field("name", &self.name)
            .field("expect_success", &self.expect_success)
            .field("has_generator", &self.generator.is_some())
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

/// Immutable name -> procedure table, in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    procedures: Vec<Procedure>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    procedures: Vec<Procedure>,
}

impl RegistryBuilder {
    pub fn register(mut self, procedure: Procedure) -> Self {
        self.procedures.push(procedure);
        self
    }

    /// Freeze the table. Two procedures with one name is a configuration error.
    pub fn build(self) -> Result<Registry> {
        let mut index = HashMap::with_capacity(self.procedures.len());
        for (i, procedure) in self.procedures.iter().enumerate() {
            if index.insert(procedure.name.clone(), i).is_some() {
                return Err(CapsicumError::Config(format!(
                    "duplicate procedure name: {}",
                    procedure.name
                )));
            }
        }
        Ok(Registry {
            procedures: self.procedures,
            index,
        })
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Result<&Procedure> {
        self.index
            .get(name)
            .map(|&i| &self.procedures[i])
            .ok_or_else(|| CapsicumError::UnknownProcedure(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.procedures.iter().map(Procedure::name).collect()
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

/// Launch directive carried on a child's command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub procname: String,
    pub arg: String,
}

impl Directive {
    pub fn new(procname: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            procname: procname.into(),
            arg: arg.into(),
        }
    }

    /// Find a directive among `args` (program name excluded). No procname
    /// flag means normal mode; a missing arg flag means [`DEFAULT_ARG`].
    /// Arguments that are not UTF-8 cannot be directive flags and are skipped.
    pub fn from_args<I, S>(args: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut procname = None;
        let mut arg = None;
        for raw in args {
            let Some(raw) = raw.as_ref().to_str() else {
                continue;
            };
            if let Some(value) = flag_value(raw, PROCNAME_FLAG) {
                procname = Some(value.to_string());
            } else if let Some(value) = flag_value(raw, ARG_FLAG) {
                arg = Some(value.to_string());
            }
        }
        procname.map(|procname| Self {
            procname,
            arg: arg.unwrap_or_else(|| DEFAULT_ARG.to_string()),
        })
    }

    pub fn to_args(&self) -> [String; 2] {
        [
            format!("{}={}", PROCNAME_FLAG, self.procname),
            format!("{}={}", ARG_FLAG, self.arg),
        ]
    }
}

fn flag_value<'a>(raw: &'a str, flag: &str) -> Option<&'a str> {
    raw.strip_prefix(flag)?.strip_prefix('=')
}

/// If this process was launched with a directive, run that procedure and
/// exit; otherwise return and let the caller carry on as normal.
pub fn run_if_directed(registry: &Registry) {
    if let Some(directive) = Directive::from_args(std::env::args_os().skip(1)) {
        dispatch(registry, &directive);
    }
}

fn dispatch(registry: &Registry, directive: &Directive) -> ! {
    let procedure = match registry.get(&directive.procname) {
        Ok(procedure) => procedure,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(UNKNOWN_PROCEDURE_EXIT);
        }
    };

    (procedure.entry)(&directive.arg);

    // Returning from the entry is itself a failure of the procedure, so the
    // exit code must contradict whatever was expected.
    eprintln!("procedure {} did not exit", procedure.name);
    std::process::exit(if procedure.expect_success { 1 } else { 0 });
}

/// End a procedure: exit 0 on `Ok`, print the error and exit 1 otherwise.
pub fn finish<E: std::fmt::Display>(result: std::result::Result<(), E>) -> ! {
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Parent-side driver: spawns, judges and cleans up procedure runs.
pub struct Harness<'r> {
    registry: &'r Registry,
    config: HarnessConfig,
    executable: Option<PathBuf>,
}

impl<'r> Harness<'r> {
    pub fn new(registry: &'r Registry, config: HarnessConfig) -> Self {
        Self {
            registry,
            config,
            executable: None,
        }
    }

    /// Spawn `path` instead of the current executable.
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn executable(&self) -> Result<PathBuf> {
        match &self.executable {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(CapsicumError::Io),
        }
    }

    /// Run one procedure in a child. Only an unknown name is an `Err`; spawn,
    /// judgment and cleanup failures are recorded in the report.
    pub fn verify(&self, name: &str) -> Result<VerificationReport> {
        let procedure = self.registry.get(name)?;
        let clock = Instant::now();
        let mut report = VerificationReport::new(procedure.name(), procedure.expect_success());

        let arg = match procedure.generate_arg(&self.config.temp_root) {
            Ok(arg) => arg,
            Err(e) => {
                report.spawn_error = Some(format!("argument generator failed: {}", e));
                report.finish(clock.elapsed());
                log::info!("{}", report);
                return Ok(report);
            }
        };
        report.argument = Some(arg.clone());

        let policy = WaitPolicy {
            timeout: self.config.timeout(),
            grace: self.config.grace(),
            forward_output: self.config.forward_output,
        };
        let directive = Directive::new(procedure.name(), arg.as_str());
        match self
            .executable()
            .and_then(|exe| supervisor::run_child(&exe, &directive, &policy))
        {
            Ok(outcome) => report.record_outcome(outcome),
            Err(e) => report.spawn_error = Some(e.to_string()),
        }

        if let Err(e) = procedure.clean_up(&arg, self.config.cleanup) {
            report.cleanup_error = Some(e.to_string());
        }

        report.finish(clock.elapsed());
        log::info!("{}", report);
        Ok(report)
    }

    /// Run several procedures, each in its own child, `config.jobs` at a
    /// time. Reports come back in the order of `names`. Every name is looked
    /// up before anything is spawned.
    pub fn verify_many<S: AsRef<str> + Sync>(&self, names: &[S]) -> Result<Vec<VerificationReport>> {
        for name in names {
            self.registry.get(name.as_ref())?;
        }

        let jobs = self.config.jobs.clamp(1, names.len().max(1));
        if jobs == 1 {
            return names.iter().map(|name| self.verify(name.as_ref())).collect();
        }

        let (task_tx, task_rx) = crossbeam_channel::unbounded::<(usize, &str)>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        for (i, name) in names.iter().enumerate() {
            if task_tx.send((i, name.as_ref())).is_err() {
                break;
            }
        }
        drop(task_tx);

        std::thread::scope(|scope| {
            for _ in 0..jobs {
                let task_rx = task_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for (i, name) in task_rx.iter() {
                        if done_tx.send((i, self.verify(name))).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(done_tx);

        let mut slots: Vec<Option<Result<VerificationReport>>> =
            (0..names.len()).map(|_| None).collect();
        for (i, result) in done_rx.try_iter() {
            slots[i] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }

    /// Run `name` and panic with the report unless it passed. For tests.
    pub fn assert_exits_correctly(&self, name: &str) {
        match self.verify(name) {
            Ok(report) if report.passed() => {}
            Ok(report) => panic!("{}", report),
            Err(e) => panic!("{}: {}", name, e),
        }
    }
}
