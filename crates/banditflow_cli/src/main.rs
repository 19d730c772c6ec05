// Thin driver around banditflow_core: parses flags, captures provenance and
// streams checkpoints into the record file. All numerics live in the core.

use anyhow::Result;
use banditflow_core::{execute, Checkpoint, HarnessError, MemoryMode, RunConfig, Scheme};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use banditflow_cli::provenance::Provenance;
use banditflow_cli::record::RecordWriter;

/// Gradient-flow learning dynamics of a memory-bounded two-armed bandit.
#[derive(Parser, Debug)]
#[command(name = "banditflow")]
struct Cli {
    /// Compute device; only `cpu` is available.
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Memory representation: `shift` or `ram`.
    #[arg(long)]
    memory_type: MemoryMode,

    /// After the main run, continue from its policy in the ram action space.
    #[arg(long)]
    bootstrap_ram: bool,

    /// Number of memory cells.
    #[arg(long)]
    memory: usize,

    #[arg(long, default_value_t = 2)]
    arms: usize,

    /// Success-rate gap between the odd arm and the fair one.
    #[arg(long, default_value_t = 0.4)]
    gamma: f64,

    /// Probability of a uniform restart at each step.
    #[arg(long, default_value_t = 0.0)]
    reset: f64,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Largest accepted change of the gradient per step.
    #[arg(long, default_value_t = 1e-4)]
    max_dgrad: f64,

    #[arg(long, default_value_t = 1e-8)]
    eps: f64,

    /// Standard deviation of the initial logits.
    #[arg(long, default_value_t = 1.0)]
    std0: f64,

    #[arg(long, default_value_t = 1)]
    trials: usize,

    /// Steps per warm-start trial (0 scores the initial logits only).
    #[arg(long, default_value_t = 0)]
    trials_steps: usize,

    #[arg(long, default_value_t = 1000)]
    stop_steps: usize,

    /// Proposal scheme: `euler`, `rk4` or `tsit5`.
    #[arg(long, default_value = "euler")]
    scheme: Scheme,

    /// Seconds between progress lines.
    #[arg(long, default_value_t = 2.0)]
    print_interval: f64,

    /// Seconds between intermediate checkpoints.
    #[arg(long, default_value_t = 10.0)]
    save_interval: f64,

    /// Record file (JSON Lines).
    #[arg(long)]
    output: PathBuf,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            arms: self.arms,
            memory: self.memory,
            memory_type: self.memory_type,
            bootstrap_ram: self.bootstrap_ram,
            gamma: self.gamma,
            reset: self.reset,
            seed: self.seed,
            max_dgrad: self.max_dgrad,
            eps: self.eps,
            std0: self.std0,
            trials: self.trials,
            trials_steps: self.trials_steps,
            stop_steps: self.stop_steps,
            scheme: self.scheme,
            print_interval: self.print_interval,
            save_interval: self.save_interval,
        }
    }
}

#[derive(Serialize)]
struct Header<'a> {
    config: &'a RunConfig,
    device: &'a str,
    output: &'a Path,
}

#[derive(Serialize)]
struct SnapshotRecord<'a> {
    #[serde(flatten)]
    checkpoint: &'a Checkpoint<'a>,
    git: &'a Provenance,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Runs the experiment, appending one record per checkpoint.
fn run(output: &Path, device: &str, config: &RunConfig, git: &Provenance) -> Result<()> {
    let header = Header {
        config,
        device,
        output,
    };
    let mut writer = RecordWriter::create(output, &header)?;
    let outcome = execute(config, &mut |checkpoint: &Checkpoint<'_>| -> Result<()> {
        writer.append(&SnapshotRecord { checkpoint, git })
    });
    finish(writer, outcome)
}

/// A failed run without any snapshot leaves no file behind; otherwise the
/// last durable snapshot stays in place.
fn finish(writer: RecordWriter, outcome: Result<()>) -> Result<()> {
    match outcome {
        Ok(()) => {
            info!(
                snapshots = writer.snapshots(),
                path = %writer.path().display(),
                "run complete"
            );
            Ok(())
        }
        Err(err) => {
            if writer.snapshots() == 0 {
                if let Err(cleanup) = writer.discard() {
                    error!("{cleanup:#}");
                }
            }
            Err(err)
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let git = Provenance::capture();
    let cli = Cli::parse();

    if cli.device != "cpu" {
        return Err(HarnessError::Config(format!(
            "device '{}' is not available, only cpu is supported",
            cli.device
        ))
        .into());
    }
    let config = cli.run_config();
    config.validate()?;

    run(&cli.output, &cli.device, &config, &git)
}
