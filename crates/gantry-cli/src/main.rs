//! CLI binary for running and inspecting gantry validation pipelines.

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use gantry_engine::{
    build_plan, EngineConfig, Fixture, Mode, ModeConfig, Orchestrator, RobustnessScorer, RunReport,
};
use gantry_manifest::DocumentSet;
use gantry_types::LevelId;

#[derive(Parser)]
#[command(name = "gantry", version, about = "Staged validation runner for CI/CD pipeline definitions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a validation mode against a directory of pipeline definitions
    Run {
        /// Mode: quick|standard|full|custom|incremental
        mode: String,

        /// Space-separated level ids (custom/incremental only), e.g. "1 4 6"
        #[arg(short, long)]
        levels: Option<String>,

        /// Directory containing the pipeline-definition YAML files
        #[arg(short, long, default_value = ".")]
        docs: PathBuf,

        /// Also stream NDJSON trace records to this file
        #[arg(short, long)]
        trace: Option<PathBuf>,
    },

    /// List the validation level catalogue
    Levels,

    /// Show the execution groups a mode would run, without running anything
    Plan {
        /// Mode: quick|standard|full|custom|incremental
        mode: String,

        /// Space-separated level ids (custom/incremental only)
        #[arg(short, long)]
        levels: Option<String>,
    },

    /// Score one level's robustness against fixtures with known outcomes
    Score {
        /// Level id to score
        #[arg(short, long)]
        level: u8,

        /// Directory of fixture subdirectories (docs + expected.txt each)
        #[arg(short, long)]
        fixtures: PathBuf,

        /// Runs per fixture
        #[arg(short, long, default_value = "5")]
        runs: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            mode,
            levels,
            docs,
            trace,
        } => {
            cmd_run(&mode, levels.as_deref(), &docs, trace.as_deref()).await?;
        }
        Commands::Levels => {
            cmd_levels();
        }
        Commands::Plan { mode, levels } => {
            cmd_plan(&mode, levels.as_deref())?;
        }
        Commands::Score {
            level,
            fixtures,
            runs,
        } => {
            cmd_score(level, &fixtures, runs).await?;
        }
    }

    Ok(())
}

/// Parse a space-separated id list ("1 4 6") into an ordered level set.
fn parse_levels(raw: &str) -> anyhow::Result<BTreeSet<LevelId>> {
    raw.split_whitespace()
        .map(|token| {
            token
                .parse::<u8>()
                .map(LevelId::new)
                .map_err(|_| anyhow::anyhow!("invalid level id '{token}'"))
        })
        .collect()
}

fn resolve_mode(mode: &str, levels: Option<&str>) -> anyhow::Result<ModeConfig> {
    let mode: Mode = mode.parse()?;
    let levels = levels.map(parse_levels).transpose()?;
    Ok(ModeConfig::resolve(mode, levels)?)
}

async fn cmd_run(
    mode: &str,
    levels: Option<&str>,
    docs_dir: &std::path::Path,
    trace: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let mode = resolve_mode(mode, levels)?;
    let docs = DocumentSet::load(docs_dir)?;

    println!("Validating {} documents in {}", docs.len().await, docs_dir.display());
    println!(
        "Mode: {} ({} levels, fail-fast: {}, retry: {})",
        mode.mode,
        mode.levels.len(),
        mode.fail_fast,
        mode.retry_enabled
    );
    if let Some(path) = trace {
        println!("Trace: {}", path.display());
    }

    let orchestrator = Orchestrator::new();
    let report = orchestrator.run(mode, &docs, trace).await?;
    print_report(&orchestrator, &report);

    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn print_report(orchestrator: &Orchestrator, report: &RunReport) {
    println!("\nRun {}", report.run_id);
    println!(
        "Levels run: {}  Passed: {}  Failed: {}  Skipped: {}",
        report.total_run, report.passed, report.failed, report.skipped
    );
    if !report.failed_by_kind.is_empty() {
        println!("Failed by kind:");
        for (kind, count) in &report.failed_by_kind {
            println!("  {kind}: {count} (exit {})", kind.exit_code());
        }
    }
    println!("Wall time: {:.2}s", report.wall_time.as_secs_f64());

    println!("\nPer-level results:");
    for record in report.final_results() {
        let name = orchestrator
            .registry()
            .level_by_id(record.level)
            .map(|l| l.name)
            .unwrap_or("?");
        println!(
            "  {:>2} {:<20} {:<12} attempt {} ({}ms){}",
            record.level,
            name,
            record.verdict.as_str(),
            record.attempt,
            record.duration.as_millis(),
            if record.remediation_attempted {
                "  [remediated]"
            } else {
                ""
            }
        );
        if record.verdict.is_failure() {
            println!("       {}", record.message);
        }
    }
}

fn cmd_levels() {
    let orchestrator = Orchestrator::new();
    println!("Validation levels:");
    for level in orchestrator.registry().all_levels() {
        let deps = if level.depends_on.is_empty() {
            "-".to_string()
        } else {
            level
                .depends_on
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        println!(
            "  {:>2} {:<20} category={:<12} mandatory={:<5} retryable={:<5} depends_on={}",
            level.id, level.name, level.category, level.mandatory, level.retryable, deps
        );
    }
}

fn cmd_plan(mode: &str, levels: Option<&str>) -> anyhow::Result<()> {
    let mode = resolve_mode(mode, levels)?;
    let orchestrator = Orchestrator::new();
    let plan = build_plan(orchestrator.registry(), &mode.levels)?;

    if plan.is_empty() {
        println!("Empty plan: nothing to run");
        return Ok(());
    }

    println!(
        "Execution plan for {} ({} levels, {} groups):",
        mode.mode,
        plan.level_count(),
        plan.groups.len()
    );
    for (index, group) in plan.groups.iter().enumerate() {
        let names: Vec<String> = group
            .levels
            .iter()
            .map(|&id| {
                orchestrator
                    .registry()
                    .level_by_id(id)
                    .map(|l| format!("{} ({})", id, l.name))
                    .unwrap_or_else(|_| id.to_string())
            })
            .collect();
        println!("  group {}: {}", index + 1, names.join(", "));
    }
    Ok(())
}

async fn cmd_score(level_id: u8, fixtures_dir: &std::path::Path, runs: usize) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new();
    let level = orchestrator
        .registry()
        .level_by_id(LevelId::new(level_id))?
        .clone();

    let fixtures = Fixture::load_all(fixtures_dir)?;
    println!(
        "Scoring level {} ({}) against {} fixtures, {} runs each",
        level.id,
        level.name,
        fixtures.len(),
        runs
    );

    let scorer = RobustnessScorer::with_builtin_checks(EngineConfig::default());
    let metrics = scorer.score(&level, &fixtures, runs).await?;

    println!("  consistency: {:.3}", metrics.consistency);
    println!("  reliability: {:.3}", metrics.reliability);
    println!("  coverage:    {:.3}", metrics.coverage);
    println!("  latency:     {:.3}", metrics.latency);
    println!("Robustness score: {:.1}%", metrics.overall_percent());
    Ok(())
}
