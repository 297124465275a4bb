//! Coverage - operational coverage engine from the command line
//!
//! Thin front end over `coverage-core` for dispatch and back-office jobs:
//! - Plan generation, attendance and coverage assignment
//! - Payment status administration and undo
//! - Reconciliation, deduplication and consistency audits
//!
//! Every command prints its result as pretty JSON on stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;

use coverage_core::constants::paths::LOG_FILE_NAME;
use coverage_core::{
    paths, AttendanceOutcome, CallContext, CoverageConfig, CoverageEngine, ReconcileRequest,
    SqliteGuardDirectory,
};

mod batch;

/// Coverage - operational coverage engine
#[derive(Parser)]
#[command(name = "coverage")]
#[command(about = "Keep shift plans, open posts and extra shifts consistent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.coverage/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Tenant the caller acts for
    #[arg(long, global = true, default_value = "default")]
    tenant: String,

    /// Actor recorded in audit metadata
    #[arg(long, global = true, default_value = "cli")]
    actor: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a guard to the directory
    RegisterGuard { name: String },

    /// Add a post; without --guard it starts pending coverage
    RegisterPost {
        installation: String,
        role: String,
        #[arg(long)]
        guard: Option<String>,
    },

    /// Generate one month of plan entries for a post
    Generate { post: String, year: i32, month: u32 },

    /// Show one month of plan entries for a post
    Plan { post: String, year: i32, month: u32 },

    /// Mark attendance (worked | absent)
    Attend {
        entry: String,
        outcome: AttendanceOutcome,
        /// Reason code, required for absences
        #[arg(long)]
        reason: Option<String>,
    },

    /// Book a covering guard for a post on a date
    Assign {
        post: String,
        date: NaiveDate,
        guard: String,
        /// Plan entry of the absence being covered
        #[arg(long)]
        entry: Option<String>,
    },

    /// Move a covered entry to pending payment
    SubmitPayment { entry: String },

    /// Mark an extra shift paid
    Pay { extra_shift: String },

    /// Undo the most recent transition of an entry
    Undo { entry: String },

    /// Apply an assignment change from a date on
    Reconcile {
        post: String,
        effective_date: NaiveDate,
        /// New guard; omit to remove the current one
        #[arg(long)]
        guard: Option<String>,
        /// Fail instead of reconciling if the post moved past this version
        #[arg(long)]
        expected_version: Option<i64>,
    },

    /// Reconcile many posts from a JSON file of requests
    ReconcileBatch {
        #[arg(long)]
        file: PathBuf,
        /// Worker count; each worker has its own connection
        #[arg(long, default_value_t = 1)]
        parallel: usize,
    },

    /// Remove duplicate extra shifts for one key, or every key with --all
    Dedupe {
        #[arg(required_unless_present = "all")]
        post: Option<String>,
        #[arg(required_unless_present = "all")]
        date: Option<NaiveDate>,
        #[arg(long, conflicts_with_all = ["post", "date"])]
        all: bool,
    },

    /// Flag and repair ghost assignments on a date
    Audit { date: NaiveDate },

    /// Show every post's state on a date
    Daily { date: NaiveDate },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize logging to file, falling back to stderr
fn init_logging(filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let log_dir = paths::logs_dir();
    let log_file = std::fs::create_dir_all(&log_dir).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(LOG_FILE_NAME))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false);
    match log_file {
        Ok(file) => builder.with_writer(std::sync::Mutex::new(file)).init(),
        Err(_) => builder.with_writer(std::io::stderr).init(),
    }
}

fn load_config(cli: &Cli) -> Result<CoverageConfig> {
    let mut config = match &cli.config {
        Some(path) => CoverageConfig::load_from_path(path)?,
        None => CoverageConfig::load()?,
    };
    if let Some(db) = &cli.db {
        config.database.path = Some(db.clone());
    }
    Ok(config)
}

/// Engine plus guard directory, each on its own connection
pub(crate) fn open_engine(config: &CoverageConfig) -> Result<CoverageEngine> {
    let guards = open_guards(&config.database.resolved_path())?;
    CoverageEngine::open(config, Arc::new(guards)).context("Failed to open coverage database")
}

fn open_guards(path: &Path) -> Result<SqliteGuardDirectory> {
    SqliteGuardDirectory::open(path).context("Failed to open guard directory")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging.filter);

    let ctx = CallContext::new(cli.tenant.clone(), cli.actor.clone());
    tracing::info!(
        tenant = %ctx.tenant_id,
        actor = %ctx.actor_id,
        db = %config.database.resolved_path().display(),
        "Starting coverage command"
    );

    match cli.command {
        Commands::RegisterGuard { name } => {
            let guards = open_guards(&config.database.resolved_path())?;
            print_json(&guards.register(&ctx.tenant_id, &name)?)?;
        }
        Commands::RegisterPost {
            installation,
            role,
            guard,
        } => {
            let engine = open_engine(&config)?;
            print_json(&engine.register_post(&ctx, &installation, &role, guard.as_deref())?)?;
        }
        Commands::Generate { post, year, month } => {
            let engine = open_engine(&config)?;
            print_json(&engine.generate_monthly_plan(&ctx, &post, year, month)?)?;
        }
        Commands::Plan { post, year, month } => {
            let engine = open_engine(&config)?;
            print_json(&engine.get_monthly_plan(&ctx, &post, year, month)?)?;
        }
        Commands::Attend {
            entry,
            outcome,
            reason,
        } => {
            let engine = open_engine(&config)?;
            print_json(&engine.mark_attendance(&ctx, &entry, outcome, reason.as_deref())?)?;
        }
        Commands::Assign {
            post,
            date,
            guard,
            entry,
        } => {
            let engine = open_engine(&config)?;
            print_json(&engine.assign_coverage(&ctx, &post, date, &guard, entry.as_deref())?)?;
        }
        Commands::SubmitPayment { entry } => {
            let engine = open_engine(&config)?;
            print_json(&engine.submit_for_payment(&ctx, &entry)?)?;
        }
        Commands::Pay { extra_shift } => {
            let engine = open_engine(&config)?;
            print_json(&engine.mark_paid(&ctx, &extra_shift)?)?;
        }
        Commands::Undo { entry } => {
            let engine = open_engine(&config)?;
            print_json(&engine.undo_last_transition(&ctx, &entry)?)?;
        }
        Commands::Reconcile {
            post,
            effective_date,
            guard,
            expected_version,
        } => {
            let engine = open_engine(&config)?;
            let outcome = match expected_version {
                Some(version) => engine.reconcile_at_version(
                    &ctx,
                    &post,
                    guard.as_deref(),
                    effective_date,
                    version,
                )?,
                None => engine.reconcile(&ctx, &post, guard.as_deref(), effective_date)?,
            };
            print_json(&outcome)?;
        }
        Commands::ReconcileBatch { file, parallel } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let requests: Vec<ReconcileRequest> = serde_json::from_str(&contents)
                .with_context(|| format!("Invalid batch file {}", file.display()))?;
            let report = batch::reconcile_parallel(&config, &ctx, requests, parallel).await?;
            print_json(&report)?;
        }
        Commands::Dedupe { post, date, all } => {
            let engine = open_engine(&config)?;
            if all {
                let keys = engine.find_duplicate_coverage_keys(&ctx)?;
                print_json(&engine.deduplicate_batch(&ctx, &keys))?;
            } else {
                let post = post.context("post is required without --all")?;
                let date = date.context("date is required without --all")?;
                print_json(&engine.deduplicate_coverage(&ctx, &post, date)?)?;
            }
        }
        Commands::Audit { date } => {
            let engine = open_engine(&config)?;
            print_json(&engine.run_consistency_audit(&ctx, date)?)?;
        }
        Commands::Daily { date } => {
            let engine = open_engine(&config)?;
            print_json(&engine.get_daily_view(&ctx, date)?)?;
        }
    }

    Ok(())
}
