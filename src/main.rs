//! GridFlow: flow-matching generative flow networks on hypergrids.
//!
//! Provides subcommands for training and inspection:
//!
//! - `train`    -- Run the flow-matching training loop and save the report
//! - `density`  -- Print the exact terminal density of the configured grid
//! - `inspect`  -- Summarize a saved training report

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gridflow::config::GridFlowConfig;
use gridflow::env::HyperGrid;
use gridflow::training::{Trainer, TrainingReport};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// GridFlow: flow-matching generative flow networks on hypergrids.
#[derive(Parser)]
#[command(name = "gridflow", version, about)]
struct Cli {
    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the flow-matching training loop.
    Train {
        /// Path to save the training report.
        #[arg(long, default_value = "data/report.json")]
        output: PathBuf,

        /// Override the number of outer training steps.
        #[arg(long)]
        steps: Option<usize>,

        /// Override the RNG seed.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the exact reward-proportional terminal density.
    Density,

    /// Summarize a saved training report.
    Inspect {
        /// Path to the report JSON file.
        #[arg(default_value = "data/report.json")]
        path: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str::<GridFlowConfig>(&text)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        }
        None => GridFlowConfig::default(),
    };

    match cli.command {
        Commands::Train {
            output,
            steps,
            seed,
        } => cmd_train(config, &output, steps, seed),
        Commands::Density => cmd_density(&config),
        Commands::Inspect { path } => cmd_inspect(&path),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_train(
    mut config: GridFlowConfig,
    output: &PathBuf,
    steps: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    if let Some(steps) = steps {
        config.training.n_train_steps = steps;
    }
    if let Some(seed) = seed {
        config.training.seed = seed;
    }

    tracing::info!(
        horizon = config.grid.horizon,
        ndim = config.grid.ndim,
        steps = config.training.n_train_steps,
        seed = config.training.seed,
        "Starting training run"
    );

    let mut trainer = Trainer::new(config)?;
    let report = trainer.run()?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    report.save_to_file(output)?;

    tracing::info!(
        path = %output.display(),
        final_loss = report.final_loss().unwrap_or(f64::NAN),
        "Training run finished"
    );
    Ok(())
}

fn cmd_density(config: &GridFlowConfig) -> Result<()> {
    let mut grid = HyperGrid::from_config(&config.grid)?;
    let density = grid.true_density();

    println!(
        "Exact terminal density ({}^{} grid, {} reachable states):",
        config.grid.horizon,
        config.grid.ndim,
        density.states.len()
    );
    for ((state, reward), p) in density
        .states
        .iter()
        .zip(&density.rewards)
        .zip(&density.density)
    {
        println!("  {state:?}  reward {reward:.6}  density {p:.6}");
    }
    let z: f64 = density.rewards.iter().sum();
    println!("Partition sum: {z:.6}");

    Ok(())
}

fn cmd_inspect(path: &PathBuf) -> Result<()> {
    let report = TrainingReport::load_from_file(path)?;

    println!("Training report: {}", path.display());
    println!("  Run id: {}", report.run_id);
    println!(
        "  Started: {}",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  Grid: {}^{} ({})",
        report.config.grid.horizon,
        report.config.grid.ndim,
        serde_json::to_string(&report.config.grid.reward)?
    );
    println!("  Learn passes: {}", report.losses.len());
    if let Some(loss) = report.final_loss() {
        println!("  Final loss: {loss:.6}");
    }
    println!("  Visited terminal states: {}", report.visited.len());
    println!();

    if !report.eval_history.is_empty() {
        println!("Evaluation history ({} entries):", report.eval_history.len());
        for record in report.eval_history.iter().take(10) {
            println!(
                "  step {:>6}  L1 {:.6}  KL {:.6}",
                record.step, record.error.l1, record.error.kl
            );
        }
        if report.eval_history.len() > 10 {
            println!("  ... and {} more", report.eval_history.len() - 10);
        }
    }

    Ok(())
}
