//! leveler CLI - Resource leveling engine
//!
//! Command-line interface for leveling workload files.

mod calendar;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use leveler_core::{LevelingError, Workload};
use leveler_solver::{importance, prepare, Leveler, LevelingOptions, TaskGraph};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "leveler")]
#[command(author, version, about = "Resource leveling engine", long_about = None)]
struct Cli {
    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Level a workload file
    Level {
        /// Workload file (TOML, or JSON by extension)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Override the search step budget
        #[arg(long, env = "LEVELER_MAX_STEPS")]
        max_steps: Option<u64>,

        /// Override the candidate assignments tried per task
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Validate a workload and show its partitions and initial ordering
    Check {
        /// Workload file (TOML, or JSON by extension)
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins over the `-v` count
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Level {
            file,
            format,
            max_steps,
            max_iterations,
        } => cmd_level(&file, format, max_steps, max_iterations),
        Commands::Check { file } => cmd_check(&file),
    }
}

fn load_workload(path: &Path) -> Result<Workload> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let workload = if is_json {
        serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?
    };
    Ok(workload)
}

/// Print per-task failures; anything else is a hard error
fn report_failure(err: LevelingError) -> Result<ExitCode> {
    if err.failures().is_empty() {
        return Err(err.into());
    }
    eprintln!("error: {}", err);
    for failure in err.failures() {
        eprintln!("  {}", failure);
    }
    Ok(ExitCode::FAILURE)
}

fn cmd_level(
    file: &Path,
    format: Format,
    max_steps: Option<u64>,
    max_iterations: Option<u32>,
) -> Result<ExitCode> {
    let mut workload = load_workload(file)?;
    if let Some(steps) = max_steps {
        workload.leveling.max_steps = steps;
    }
    if let Some(iterations) = max_iterations {
        workload.leveling.max_iterations = iterations;
    }

    tracing::info!(
        project = %workload.project.name,
        tasks = workload.tasks.len(),
        resources = workload.resources.len(),
        "leveling workload"
    );
    let leveler = Leveler::from_config(&workload.leveling);
    let (schedule, report) =
        match leveler.level_with_report(&workload.project, &workload.resources, &workload.tasks) {
            Ok(result) => result,
            Err(err) => return report_failure(err),
        };
    tracing::info!(
        steps = report.steps,
        nodes = report.nodes,
        reorderings = report.reorderings,
        fallbacks = report.fallbacks,
        candidates = report.candidates,
        "search finished"
    );

    match format {
        Format::Text => print!(
            "{}",
            calendar::render(&workload.project, &workload.tasks, &schedule)
        ),
        Format::Json => println!(
            "{}",
            serde_json::to_string_pretty(&schedule).context("failed to serialize schedule")?
        ),
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_check(file: &Path) -> Result<ExitCode> {
    let workload = load_workload(file)?;
    let graph = match TaskGraph::build(&workload.tasks, &workload.resources) {
        Ok(graph) => graph,
        Err(err) => return report_failure(err.into()),
    };

    println!(
        "{}: {} task(s), {} resource(s)",
        workload.project.name,
        workload.tasks.len(),
        workload.resources.len()
    );
    println!("Partitions:");
    for (idx, members) in graph.partitions().iter().enumerate() {
        println!("  {}: {}", idx + 1, members.join(", "));
    }

    let options = LevelingOptions::from(&workload.leveling);
    let state = match prepare(&graph, &options.strategies) {
        Ok(state) => state,
        Err(err) => return report_failure(err),
    };
    let order: Vec<String> = importance::sorted_tasks(&graph, &state)
        .iter()
        .map(|r| format!("{} ({})", graph.task_id(r.task), state.task(r.task).importance))
        .collect();
    println!("Ordering: {}", order.join(", "));
    Ok(ExitCode::SUCCESS)
}
