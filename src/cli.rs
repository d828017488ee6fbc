use crate::config::config::HarnessConfig;
use crate::harness::{self, Harness, Registry};
use crate::rights::codec::{decode, PackedRights};
use crate::rights::RightsSet;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Exit code for bad invocations (unknown procedure, unparsable rights).
pub const USAGE_EXIT: i32 = 2;

#[derive(Parser)]
#[command(author, version, about = "Capsicum capability-mode verification", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered verification procedures
    List,
    /// Run procedures in child processes and judge their exit status
    Verify {
        /// Procedure names to run
        names: Vec<String>,
        /// Run every registered procedure
        #[arg(long, conflicts_with = "names")]
        all: bool,
        /// Print reports as JSON
        #[arg(long)]
        json: bool,
        /// Per-child timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Children to run concurrently
        #[arg(long)]
        jobs: Option<usize>,
        /// Harness config file (defaults to ./capcheck.json when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Inspect the packed cap_rights_t representation
    Rights {
        #[command(subcommand)]
        action: RightsCommand,
    },
}

#[derive(Subcommand)]
enum RightsCommand {
    /// Print the packed words for a list of rights, e.g. CAP_READ,CAP_LOOKUP
    Encode {
        /// Right or composite names separated by ',' or '|'
        rights: Vec<String>,
    },
    /// Print the rights held by two packed words
    Decode {
        /// First word (hex with 0x prefix, or decimal)
        word0: String,
        /// Second word
        word1: String,
    },
}

fn usage_error(msg: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", msg);
    std::process::exit(USAGE_EXIT);
}

fn parse_word(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => raw.parse(),
    };
    parsed.with_context(|| format!("invalid rights word: {:?}", raw))
}

fn load_config(path: Option<PathBuf>, timeout_ms: Option<u64>, jobs: Option<usize>) -> Result<HarnessConfig> {
    let mut config = match path {
        Some(path) => HarnessConfig::load_from_file(path)?,
        None => HarnessConfig::load_default()?,
    };
    if let Some(timeout_ms) = timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(jobs) = jobs {
        config.jobs = jobs;
    }
    Ok(config.validated()?)
}

fn list(registry: &Registry) {
    let width = registry.iter().map(|p| p.name().len()).max().unwrap_or(0);
    for procedure in registry.iter() {
        let expect = if procedure.expect_success() { "success" } else { "failure" };
        println!(
            "{:<width$}  expect {:<7}  {}",
            procedure.name(),
            expect,
            procedure.description(),
            width = width
        );
    }
}

fn verify(registry: &Registry, names: Vec<String>, all: bool, json: bool, config: HarnessConfig) -> Result<bool> {
    let names: Vec<String> = if all || names.is_empty() {
        registry.names().into_iter().map(str::to_string).collect()
    } else {
        names
    };
    for name in &names {
        if let Err(e) = registry.get(name) {
            usage_error(e);
        }
    }

    log::info!(
        "Verifying {} procedure(s), timeout {}ms, {} job(s)",
        names.len(),
        config.timeout_ms,
        config.jobs
    );
    let harness = Harness::new(registry, config);
    let reports = harness.verify_many(&names)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}", report);
        }
        let passed = reports.iter().filter(|r| r.passed()).count();
        println!("{}/{} passed", passed, reports.len());
    }
    Ok(reports.iter().all(|r| r.passed()))
}

fn rights(action: RightsCommand) -> Result<()> {
    match action {
        RightsCommand::Encode { rights } => {
            let set: RightsSet = match rights.join(",").parse() {
                Ok(set) => set,
                Err(e) => usage_error(e),
            };
            let [w0, w1] = set.packed().words();
            println!("{:#018x} {:#018x}", w0, w1);
            println!("{}", set);
        }
        RightsCommand::Decode { word0, word1 } => {
            let words = match (parse_word(&word0), parse_word(&word1)) {
                (Ok(w0), Ok(w1)) => [w0, w1],
                (Err(e), _) | (_, Err(e)) => usage_error(e),
            };
            let packed = match PackedRights::from_words(words) {
                Ok(packed) => packed,
                Err(e) => usage_error(e),
            };
            let decoded = decode(&packed)?;
            if decoded.is_empty() {
                println!("none");
            }
            for right in decoded {
                println!("{}", right);
            }
        }
    }
    Ok(())
}

/// Entry point of `capcheck`. A child launched with a directive runs its
/// procedure and never returns from here.
pub fn run(registry: &Registry) -> Result<()> {
    env_logger::init();

    harness::run_if_directed(registry);

    let cli = Cli::parse();
    match cli.command {
        Commands::List => list(registry),
        Commands::Verify {
            names,
            all,
            json,
            timeout_ms,
            jobs,
            config,
        } => {
            let config = match load_config(config, timeout_ms, jobs) {
                Ok(config) => config,
                Err(e) => usage_error(format!("{:#}", e)),
            };
            if !verify(registry, names, all, json, config)? {
                std::process::exit(1);
            }
        }
        Commands::Rights { action } => rights(action)?,
    }
    Ok(())
}
