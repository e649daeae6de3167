//! dbferry CLI - dependency-ordered table transfer between data stores.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dbferry::config::SystemResources;
use dbferry::orchestrator::{group_levels, merge_references, resolve};
use dbferry::{
    FerryError, Instance, JsonLinesReport, Orchestrator, PlanSummary, PluginRegistry, Profile,
    RunResult, Status, Table,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code when at least one table failed.
const EXIT_TABLES_FAILED: u8 = 4;

/// Exit code when the run was stopped.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "dbferry")]
#[command(about = "Dependency-ordered, paginated table transfer between data stores")]
#[command(version)]
struct Cli {
    /// Path to the profile (YAML, or JSON by extension)
    #[arg(short, long, default_value = "profile.yaml")]
    config: PathBuf,

    /// Output JSON results to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Append one JSON line per table outcome to this file
    #[arg(long)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the profile in its configured mode
    Run {
        /// Run a single pass regardless of the profile's mode
        #[arg(long)]
        once: bool,

        /// Do not wrap tables in transactions
        #[arg(long)]
        no_transaction: bool,

        /// Override the worker count
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Discover fields, row counts and levels without writing anything
    Prefetch,

    /// Print the dependency levels of every task
    Levels {
        /// Merge references discovered from the source schema
        #[arg(long)]
        discover: bool,
    },

    /// Validate the profile and its table files
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, FerryError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut profile = Profile::load(&cli.config)?;
    info!("Loaded profile from {:?}", cli.config);

    let registry = PluginRegistry::with_builtins();

    match cli.command {
        Commands::Check => {
            check_plugins(&profile, &registry)?;
            let tasks: usize = profile.instances.iter().map(|i| i.tasks.len()).sum();
            let tables: usize = profile
                .instances()?
                .iter()
                .flat_map(|i| i.tasks.iter())
                .map(|t| t.tables.len())
                .sum();
            if cli.output_json {
                println!(
                    "{}",
                    serde_json::json!({
                        "valid": true,
                        "instances": profile.instances.len(),
                        "tasks": tasks,
                        "tables": tables,
                    })
                );
            } else {
                println!(
                    "Profile is valid: {} instances, {} tasks, {} tables",
                    profile.instances.len(),
                    tasks,
                    tables
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Levels { discover } => {
            let instances = profile.instances()?;
            let mut out = Vec::new();
            for instance in &instances {
                for task in &instance.tasks {
                    let mut tables: Vec<Table> = task.tables.clone();
                    if discover {
                        if let Some(db) = task.primary_source() {
                            let mut assistant = registry.open_assistant(db).await?;
                            let discovered = assistant.get_tables().await?;
                            assistant.close().await;
                            merge_references(&mut tables, &discovered);
                        }
                    }
                    let unresolved = if task.kind.is_leveled() {
                        resolve(&mut tables)
                    } else {
                        Vec::new()
                    };
                    let levels: Vec<(i32, Vec<String>)> = group_levels(tables)
                        .into_iter()
                        .map(|(level, tables)| {
                            (level, tables.into_iter().map(|t| t.name).collect())
                        })
                        .collect();
                    out.push((instance.name.clone(), task.name.clone(), levels, unresolved));
                }
            }

            if cli.output_json {
                let json: Vec<_> = out
                    .iter()
                    .map(|(instance, task, levels, unresolved)| {
                        serde_json::json!({
                            "instance": instance,
                            "task": task,
                            "levels": levels
                                .iter()
                                .map(|(level, tables)| serde_json::json!({
                                    "level": level,
                                    "tables": tables,
                                }))
                                .collect::<Vec<_>>(),
                            "unresolved": unresolved,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                for (instance, task, levels, unresolved) in &out {
                    println!("{}/{}:", instance, task);
                    for (level, tables) in levels {
                        println!("  {:>5}: {}", level, tables.join(", "));
                    }
                    if !unresolved.is_empty() {
                        println!("  unresolved cycle: {}", unresolved.join(", "));
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Prefetch => {
            check_plugins(&profile, &registry)?;
            let orchestrator = build_orchestrator(&profile, registry, cli.report.as_ref())?;
            let mut summaries = Vec::new();
            for instance in profile.instances()? {
                summaries.extend(orchestrator.prefetch(&instance).await?);
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                print_plans(&summaries);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Run {
            once,
            no_transaction,
            threads,
        } => {
            if let Some(t) = threads {
                profile.threads = Some(t);
            }
            if profile.threads.is_none() {
                SystemResources::detect().log();
            }
            check_plugins(&profile, &registry)?;

            let orchestrator = build_orchestrator(&profile, registry, cli.report.as_ref())?;
            setup_signal_handler(orchestrator.clone());

            let mut runner = profile.runner(orchestrator, once)?;
            if no_transaction {
                runner = runner.with_transaction(false);
            }

            let instances: Vec<Instance> = profile.instances()?;
            let results = runner.run(&instances).await?;
            let Some(last) = results.last() else {
                return Ok(ExitCode::SUCCESS);
            };

            if cli.output_json {
                println!("{}", last.to_json()?);
            } else {
                print_result(last, results.len());
            }
            Ok(status_exit(last.status))
        }
    }
}

fn build_orchestrator(
    profile: &Profile,
    registry: PluginRegistry,
    report: Option<&PathBuf>,
) -> Result<Orchestrator, FerryError> {
    let mut orchestrator = Orchestrator::new(registry, profile.engine_settings());
    if let Some(path) = report {
        orchestrator = orchestrator.with_report(Arc::new(JsonLinesReport::open(path)?));
    }
    Ok(orchestrator)
}

/// Fail with a configuration error if a dialect or filter is unknown.
fn check_plugins(profile: &Profile, registry: &PluginRegistry) -> Result<(), FerryError> {
    for instance in profile.instances()? {
        for task in &instance.tasks {
            for db in task.sources.iter().chain(std::iter::once(&task.dest)) {
                if !registry.has_dialect(&db.dialect) {
                    return Err(FerryError::PluginNotFound {
                        capability: "dialect",
                        name: db.dialect.clone(),
                    });
                }
            }
            for table in &task.tables {
                if let Some(filter) = &table.filter {
                    registry.filter(filter)?;
                }
            }
        }
    }
    Ok(())
}

fn status_exit(status: Status) -> ExitCode {
    match status {
        Status::Done => ExitCode::SUCCESS,
        Status::Cancelled => ExitCode::from(EXIT_CANCELLED),
        _ => ExitCode::from(EXIT_TABLES_FAILED),
    }
}

fn print_plans(summaries: &[PlanSummary]) {
    for plan in summaries {
        println!("{}/{} ({}):", plan.instance, plan.task, plan.kind);
        for level in &plan.levels {
            println!("  level {}", level.level);
            for t in &level.tables {
                println!(
                    "    {} -> {}: {} rows, {} fields",
                    t.name, t.dest_name, t.total, t.fields
                );
            }
        }
        for t in &plan.excluded {
            println!("  excluded {}: {}", t.name, t.reason);
        }
        if !plan.unresolved.is_empty() {
            println!("  unresolved cycle: {}", plan.unresolved.join(", "));
        }
    }
}

fn print_result(result: &RunResult, runs: usize) {
    println!("\nTransfer {}!", result.status);
    println!("  Run ID: {}", result.run_id);
    if runs > 1 {
        println!("  Runs: {}", runs);
    }
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Tables: {}/{}", result.tables_done, result.tables_total);
    if result.tables_cancelled > 0 {
        println!("  Cancelled: {}", result.tables_cancelled);
    }
    println!("  Rows: {}", result.rows_transferred);
    println!("  Throughput: {} rows/sec", result.rows_per_second);
    if !result.failed_tables.is_empty() {
        println!("  Failed tables: {:?}", result.failed_tables);
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Stop the orchestrator on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler(orchestrator: Orchestrator) {
    let on_int = orchestrator.clone();
    tokio::spawn(async move {
        match signal(SignalKind::interrupt()) {
            Ok(mut sigint) => {
                sigint.recv().await;
                eprintln!("\nReceived SIGINT. Finishing in-flight pages and stopping...");
                on_int.stop();
            }
            Err(e) => warn!("Failed to set up SIGINT handler: {}", e),
        }
    });

    tokio::spawn(async move {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                eprintln!("\nReceived SIGTERM. Finishing in-flight pages and stopping...");
                orchestrator.stop();
            }
            Err(e) => warn!("Failed to set up SIGTERM handler: {}", e),
        }
    });
}

/// Stop the orchestrator on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler(orchestrator: Orchestrator) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("\nReceived Ctrl-C. Finishing in-flight pages and stopping...");
                orchestrator.stop();
            }
            Err(e) => warn!("Failed to set up Ctrl-C handler: {}", e),
        }
    });
}
