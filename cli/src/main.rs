//! Warden CLI: binary entry point.
//!
//! # Architecture
//!
//! ```text
//! main() -> WardenPaths::discover() -> init_tracing() -> run(command)
//!                                                          |
//!              Driver | integrity | library | Governance | Reporter | config
//!                                                          |
//!                                                   render::* -> stdout
//! ```
//!
//! Stdout carries the operator-facing report only. Logs go to
//! `<root>/.warden/logs/warden.log` and are dropped when no log file can be
//! opened.

mod render;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use warden_config::{WardenConfig, WardenPaths, config_path, get_value, set_value};
use warden_engine::{
    CloseOutcome, Driver, Governance, Reporter, Status, restore, snapshot, sync_library, verify,
    verify_library,
};

const SANDBOX_OBJECTIVE: &str = "Sandbox Session";

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Protocol governance for agent-driven work")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Push a new governance frame for a protocol.
    Init {
        protocol_id: String,
        objective: String,
    },
    /// Show the active frame and its requirements.
    Status,
    /// Advance the active frame along a transition.
    Next { trigger: Option<String> },
    /// Run a command through the journal.
    Exec {
        command: String,
        /// Reason for running a command that maps to no intent.
        #[arg(long)]
        justify: Option<String>,
    },
    /// Close the active frame.
    Close,
    /// Protocol library integrity checks.
    Verify(VerifyArgs),
    /// Modular library manifest maintenance.
    Library {
        #[command(subcommand)]
        action: LibraryAction,
    },
    /// Edit the protocol library.
    Gov {
        #[command(subcommand)]
        action: GovAction,
    },
    /// Journal reports.
    Report(ReportArgs),
    /// Initialize a protocol against isolated sandbox session files.
    Sandbox { protocol_id: String },
    /// Read or edit `config.toml`.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Args)]
#[group(multiple = false)]
struct VerifyArgs {
    /// Capture signatures and a byte-identical baseline.
    #[arg(long)]
    snapshot: bool,
    /// Compare against the last snapshot (default).
    #[arg(long)]
    verify: bool,
    /// Overwrite the live library with the baseline.
    #[arg(long)]
    restore: bool,
}

#[derive(Debug, Subcommand)]
enum LibraryAction {
    Sync,
    Verify,
}

#[derive(Debug, Subcommand)]
enum GovAction {
    /// List protocol ids, or print one protocol.
    Get { id: Option<String> },
    /// Add or replace a protocol from a JSON file and commit.
    Add { id: String, file: PathBuf },
    /// Remove a protocol and commit.
    Remove { id: String },
    /// Validate the library without writing.
    Validate,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Write an engineer report draft from the current cycle.
    #[arg(long, conflicts_with = "compliance")]
    draft: bool,
    /// Score an engineer report against the journal.
    #[arg(long)]
    compliance: bool,
    /// Engineer report to score instead of the default location.
    #[arg(long, requires = "compliance")]
    input: Option<PathBuf>,
    /// Emit the interaction claims as JSON.
    #[arg(long, conflicts_with_all = ["draft", "compliance"])]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    Path,
}

fn init_tracing(paths: &WardenPaths) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let (log_file, init_warnings) = open_log_file(&log_file_candidates(paths));

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::debug!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout is parsed by callers; no log file means no logs.
    tracing_subscriber::registry().with(env_filter).init();
}

fn log_file_candidates(paths: &WardenPaths) -> Vec<PathBuf> {
    let mut candidates = vec![paths.log_dir().join("warden.log")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".warden").join("logs").join("warden.log"));
    }
    candidates
}

fn open_log_file(candidates: &[PathBuf]) -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in candidates {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(candidate) {
            Ok(file) => return (Some((candidate.clone(), file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn open_driver(paths: &WardenPaths) -> Result<Driver> {
    let config = WardenConfig::load(&paths.local_config()).context("loading configuration")?;
    Driver::open(paths, &config).context("opening protocol driver")
}

fn run_init(paths: &WardenPaths, protocol_id: &str, objective: &str) -> Result<ExitCode> {
    let mut driver = open_driver(paths)?;
    let outcome = driver.init(protocol_id, objective)?;
    render::init(&outcome);
    Ok(ExitCode::SUCCESS)
}

fn run_verify(paths: &WardenPaths, args: &VerifyArgs) -> Result<ExitCode> {
    if args.snapshot {
        let outcome = snapshot(paths).context("capturing integrity snapshot")?;
        render::snapshot(&outcome);
        return Ok(ExitCode::SUCCESS);
    }
    if args.restore {
        let target = restore(paths).context("restoring baseline")?;
        println!("[INTEGRITY] Restored {} from baseline.", target.display());
        return Ok(ExitCode::SUCCESS);
    }
    tracing::debug!(explicit = args.verify, "Running integrity verification");
    let report = verify(paths).context("verifying protocol library")?;
    render::verify(&report);
    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_library(paths: &WardenPaths, action: &LibraryAction) -> Result<ExitCode> {
    match action {
        LibraryAction::Sync => {
            let report = sync_library(paths).context("synchronizing library")?;
            render::library_sync(&report);
            Ok(ExitCode::SUCCESS)
        }
        LibraryAction::Verify => {
            let verification = verify_library(paths).context("verifying library manifest")?;
            render::library_verify(&verification);
            if verification.passed() {
                println!("[LIBRARY] All files match the manifest.");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("[LIBRARY] Manifest verification failed.");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn run_gov(paths: &WardenPaths, action: &GovAction) -> Result<ExitCode> {
    let mut gov = Governance::open(paths).context("opening protocol library")?;
    match action {
        GovAction::Get { id: None } => {
            for id in gov.ids() {
                println!("{id}");
            }
        }
        GovAction::Get { id: Some(id) } => {
            let Some(raw) = gov.get(id) else {
                bail!("protocol '{id}' not found");
            };
            println!("{}", serde_json::to_string_pretty(raw)?);
        }
        GovAction::Add { id, file } => {
            let replaced = gov.add_file(id, file)?;
            let outcome = gov.commit()?;
            if let Some(sync) = &outcome.synced {
                render::library_sync(sync);
            }
            let verb = if replaced { "Replaced" } else { "Added" };
            println!("[GOV] {verb} protocol '{id}'.");
        }
        GovAction::Remove { id } => {
            gov.remove(id)?;
            let outcome = gov.commit()?;
            if let Some(sync) = &outcome.synced {
                render::library_sync(sync);
            }
            println!("[GOV] Removed protocol '{id}'.");
        }
        GovAction::Validate => {
            let report = gov.validate()?;
            render::validation(&report);
            if !report.passed() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_report(paths: &WardenPaths, args: &ReportArgs) -> Result<ExitCode> {
    let driver = open_driver(paths)?;
    let reporter = Reporter::new(driver.store(), driver.library());
    if args.draft {
        let outcome = reporter.draft(&paths.engineer_report())?;
        render::draft(&outcome);
    } else if args.compliance {
        let input = args
            .input
            .clone()
            .unwrap_or_else(|| paths.engineer_report());
        let outcome = reporter.compliance(&input)?;
        render::compliance(&outcome);
    } else if args.json {
        let report = reporter.interactions()?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render::interactions(&reporter.entries()?);
    }
    Ok(ExitCode::SUCCESS)
}

fn config_location(paths: &WardenPaths) -> Result<PathBuf> {
    config_path(&paths.local_config()).context("no config file location is available")
}

fn run_config(paths: &WardenPaths, action: &ConfigAction) -> Result<ExitCode> {
    let path = config_location(paths)?;
    match action {
        ConfigAction::Get { key } => match get_value(&path, key)? {
            Some(value) => println!("{value}"),
            None => {
                eprintln!("{key} is not set");
                return Ok(ExitCode::FAILURE);
            }
        },
        ConfigAction::Set { key, value } => {
            set_value(&path, key, value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(ExitCode::SUCCESS)
}

fn run(paths: &WardenPaths, command: Command) -> Result<ExitCode> {
    match command {
        Command::Init {
            protocol_id,
            objective,
        } => run_init(paths, &protocol_id, &objective),
        Command::Status => {
            match open_driver(paths)?.status()? {
                Status::Idle => render::idle(),
                Status::Active(report) => render::status(&report),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Next { trigger } => {
            let outcome = open_driver(paths)?.next(trigger.as_deref())?;
            render::next(&outcome);
            Ok(ExitCode::SUCCESS)
        }
        Command::Exec { command, justify } => {
            let outcome = open_driver(paths)?.exec(&command, justify.as_deref())?;
            render::exec(&outcome);
            Ok(if outcome.output.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Close => {
            match open_driver(paths)?.close()? {
                CloseOutcome::Idle => render::idle(),
                CloseOutcome::Closed {
                    protocol_id,
                    remaining_depth,
                    parent_status,
                } => render::closed(&protocol_id, remaining_depth, parent_status.as_ref()),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify(args) => run_verify(paths, &args),
        Command::Library { action } => run_library(paths, &action),
        Command::Gov { action } => run_gov(paths, &action),
        Command::Report(args) => run_report(paths, &args),
        Command::Sandbox { protocol_id } => {
            println!("[SANDBOX] {protocol_id}");
            run_init(&paths.sandboxed(), &protocol_id, SANDBOX_OBJECTIVE)
        }
        Command::Config { action } => run_config(paths, &action),
    }
}

fn report_error(err: &anyhow::Error, root: &Path) {
    tracing::error!(root = %root.display(), "{err:#}");
    eprintln!("Error: {err:#}");
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let paths = WardenPaths::discover();
    init_tracing(&paths);

    match run(&paths, cli.command) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err, paths.root());
            ExitCode::FAILURE
        }
    }
}
