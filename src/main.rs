//! Model Select Eval CLI
//!
//! Evaluates trained regression models and selects the best one.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use model_select_eval::{
    metrics_table, select_best, EvaluationRunner, MetricRegistry, PipelineConfig, ScoreReport,
    ScoreTable,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "model-select-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Text,
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every candidate model and publish the best one
    Evaluate {
        /// Pipeline configuration file
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,
    },

    /// Render a persisted score table and its winner
    Report {
        /// Score table written by `evaluate`
        #[arg(long)]
        scores: PathBuf,

        /// Metric used to pick the winner
        #[arg(long, default_value = "r2_score")]
        metric: String,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: ReportFormat,
    },

    /// List registered metrics and their optimization direction
    Metrics,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Evaluate { config } => {
            tracing::info!(config = %config.display(), "Loading configuration");
            let pipeline = PipelineConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;

            let mut runner = EvaluationRunner::from_config(pipeline)?;
            let summary = runner.run()?;

            let report = ScoreReport::new(&summary.scores).with_selection(&summary.selection);
            print!("{}", report.to_text());
            println!("Final model: {}", summary.final_model_path.display());
            println!("Tracking run: {}", summary.tracking.run_id);
            if let Some(version) = &summary.tracking.model_version {
                println!("Registered: {} v{}", version.name, version.version);
            }
        }
        Commands::Report {
            scores,
            metric,
            format,
        } => {
            tracing::info!(scores = %scores.display(), metric = %metric, "Generating report");
            let json = std::fs::read_to_string(&scores)
                .with_context(|| format!("reading {}", scores.display()))?;
            let table = ScoreTable::from_json(&json)
                .with_context(|| format!("parsing {}", scores.display()))?;
            let selection = select_best(&table, &metric, &MetricRegistry::new())?;

            let report = ScoreReport::new(&table).with_selection(&selection);
            match format {
                ReportFormat::Text => print!("{}", report.to_text()),
                ReportFormat::Markdown => print!("{}", report.to_markdown()),
                ReportFormat::Json => println!("{}", report.to_json()?),
            }
        }
        Commands::Metrics => {
            println!("{}", metrics_table(&MetricRegistry::new()));
        }
    }
    Ok(())
}
