use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use log::{debug, error, info};

use crate::config::{Config, CONFIG};
use crate::context::MigrationContext;
use crate::database::Database;
use crate::error::StagewiseError;
use crate::ledger::{Ledger, LedgerEntry};
use crate::legacy::LegacyNameResolver;
use crate::logging::init_logging;
use crate::notify::LogNotifier;
use crate::plan::Plan;
use crate::runner::{RunReport, StageRunner};

#[derive(Parser)]
#[command(
    name = "stagewise",
    version,
    about = "Stagewise: staged, idempotent schema migrations for application upgrades"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the app data directory)
    #[arg(long = "config", short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct DbArgs {
    /// Database file to migrate (default: database.path from the configuration)
    #[arg(long = "db", short = 'd')]
    pub db: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Run the ordinary steps, load reference data, then run the deferred pass
    Migrate {
        /// Migration plan (TOML)
        #[arg(long = "plan", short = 'p')]
        plan: PathBuf,

        #[command(flatten)]
        db: DbArgs,

        /// Print the run report as JSON
        #[arg(long = "json", default_value_t = false)]
        json: bool,
    },

    /// Run only the deferred pass (safe to repeat)
    Deferred {
        /// Migration plan (TOML)
        #[arg(long = "plan", short = 'p')]
        plan: PathBuf,

        #[command(flatten)]
        db: DbArgs,

        /// Print the run report as JSON
        #[arg(long = "json", default_value_t = false)]
        json: bool,
    },

    /// Ask the schema probe a question
    Probe {
        #[command(subcommand)]
        query: ProbeQuery,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Print the preserved column name for a field
    #[command(name = "legacy-name")]
    LegacyName {
        /// Original field name
        field: String,
    },

    /// Show the step ledger and any legacy columns still present
    Status {
        #[command(flatten)]
        db: DbArgs,

        /// Print the status as JSON
        #[arg(long = "json", default_value_t = false)]
        json: bool,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ProbeQuery {
    /// Does the table exist?
    Table { table: String },
    /// Does the column exist on the table?
    Column { table: String, column: String },
    /// Is the component installed at this version or later?
    Component { name: String, min_version: String },
}

impl Cli {
    /// Parses the command line, sets up configuration and logging, and runs
    /// the command. A failure is logged before it is returned, while the
    /// logger is still alive.
    pub fn handle_command_line() -> Result<(), StagewiseError> {
        let args = Cli::parse();

        let project_dirs = ProjectDirs::from("", "", "stagewise");
        let config = Config::load_config(project_dirs.as_ref(), args.config.as_deref())?;
        let _logger = init_logging(&config.logging)?;
        debug!("Configuration: {:?}", config);
        let config = CONFIG.get_or_init(|| config);

        run_logged(args.command, config)
    }
}

fn run_logged(command: Command, config: &Config) -> Result<(), StagewiseError> {
    let result = command.execute(config);
    if let Err(err) = &result {
        error!("{:?}", err);
    }
    result
}

impl Command {
    pub fn execute(self, config: &Config) -> Result<(), StagewiseError> {
        match self {
            Command::Migrate { plan, db, json } => {
                let plan = Plan::from_file(&plan)?;
                let mut ctx = open_context(&db, config)?;
                let runner = StageRunner::with_loader(Box::new(plan.loader()));
                let report = runner.run(&plan, &mut ctx)?;
                print_report(&report, json)
            }
            Command::Deferred { plan, db, json } => {
                let plan = Plan::from_file(&plan)?;
                let mut ctx = open_context(&db, config)?;
                let report = StageRunner::new().run_deferred(&plan, &mut ctx)?;
                print_report(&report, json)
            }
            Command::Probe { query, db } => {
                let ctx = open_context(&db, config)?;
                let probe = ctx.probe();
                let answer = match &query {
                    ProbeQuery::Table { table } => probe.table_exists(table)?,
                    ProbeQuery::Column { table, column } => probe.column_exists(table, column)?,
                    ProbeQuery::Component { name, min_version } => {
                        probe.component_installed(name, min_version)?
                    }
                };
                println!("{}", answer);
                Ok(())
            }
            Command::LegacyName { field } => {
                println!("{}", LegacyNameResolver::from_config(&config.legacy).legacy_name(&field));
                Ok(())
            }
            Command::Status { db, json } => {
                let ctx = open_context(&db, config)?;
                Ledger::ensure(ctx.conn())?;
                let status = Status {
                    ledger: Ledger::entries(ctx.conn())?,
                    legacy_columns: leftover_legacy_columns(&ctx)?,
                };
                print_status(&status, json)
            }
        }
    }
}

fn open_context(db: &DbArgs, config: &Config) -> Result<MigrationContext, StagewiseError> {
    let path: &Path = db.db.as_deref().unwrap_or(config.database.path.as_path());
    let conn = Database::open(path, &config.database)?;
    info!("Migrating {}", path.display());
    Ok(MigrationContext::new(conn, config, Box::new(LogNotifier)))
}

#[derive(Debug, serde::Serialize)]
struct Status {
    ledger: Vec<LedgerEntry>,
    legacy_columns: Vec<(String, String)>,
}

/// `(table, column)` pairs whose column name follows the legacy scheme.
fn leftover_legacy_columns(ctx: &MigrationContext) -> Result<Vec<(String, String)>, StagewiseError> {
    let probe = ctx.probe();
    let mut found = Vec::new();
    for table in probe.tables()? {
        for column in probe.columns(&table)? {
            if ctx.legacy().original_name(&column).is_some() {
                found.push((table.clone(), column));
            }
        }
    }
    Ok(found)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StagewiseError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| StagewiseError::Error(format!("Failed to serialize output: {}", e)))
}

fn print_report(report: &RunReport, json: bool) -> Result<(), StagewiseError> {
    if json {
        println!("{}", to_json(report)?);
        return Ok(());
    }

    println!("{:<32} {:<9} {:<8} DETAIL", "STEP", "PHASE", "STATE");
    for step in &report.steps {
        println!(
            "{:<32} {:<9} {:<8} {}",
            step.id,
            step.phase,
            step.state,
            step.detail.as_deref().unwrap_or("")
        );
    }
    if !report.notices.is_empty() {
        println!();
        println!("Notices:");
        for notice in &report.notices {
            println!("  {}", notice);
        }
    }
    if report.records_loaded > 0 {
        println!();
        println!("Reference records loaded: {}", report.records_loaded);
    }
    Ok(())
}

fn print_status(status: &Status, json: bool) -> Result<(), StagewiseError> {
    if json {
        println!("{}", to_json(status)?);
        return Ok(());
    }

    if status.ledger.is_empty() {
        println!("No steps recorded.");
    } else {
        println!(
            "{:<32} {:<9} {:<10} {:<8} {:>4}  DETAIL",
            "STEP", "PHASE", "TARGET", "STATE", "RUNS"
        );
        for entry in &status.ledger {
            println!(
                "{:<32} {:<9} {:<10} {:<8} {:>4}  {}",
                entry.step_id,
                entry.phase,
                entry.target_version,
                entry.state,
                entry.runs,
                entry.detail.as_deref().unwrap_or("")
            );
        }
    }

    if !status.legacy_columns.is_empty() {
        println!();
        println!("Legacy columns still present:");
        for (table, column) in &status.legacy_columns {
            println!("  {}.{}", table, column);
        }
    }
    Ok(())
}
