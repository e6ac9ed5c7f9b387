//! vvring - exercise the lock-free ring buffers from real threads
//!
//! Subcommands:
//! - `stress`: push a sequence through each structure and verify it arrives
//!   intact
//! - `stream`: simulated audio callback fed by a tone producer, with optional
//!   WAV capture
//! - `bench`: throughput against `rtrb`
//! - `profile`: write the effective run profile to a RON file

mod bench;
mod config;
mod report;
mod stream;
mod stress;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{BenchSettings, RunProfile, StreamSettings, StressSettings, apply};
use crate::report::Report;

/// Lock-free SPSC ring buffer workbench
#[derive(Parser, Debug)]
#[command(name = "vvring")]
#[command(about = "Exercise lock-free SPSC ring buffers and queues", long_about = None)]
struct Cli {
    /// RON run profile with defaults for every command
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify sequence integrity across threads
    Stress(StressArgs),
    /// Simulate an audio callback fed through a frame ring
    Stream(StreamArgs),
    /// Compare queue throughput with rtrb
    Bench(BenchArgs),
    /// Write the effective run profile to a file
    Profile {
        /// Destination RON file
        output: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
struct StressArgs {
    /// Queue and ring capacity
    #[arg(long)]
    capacity: Option<usize>,

    /// Sequence numbers per structure
    #[arg(long)]
    iterations: Option<u64>,
}

impl StressArgs {
    fn apply_to(self, settings: &mut StressSettings) {
        apply(&mut settings.capacity, self.capacity);
        apply(&mut settings.iterations, self.iterations);
    }
}

#[derive(Args, Debug, Default)]
struct StreamArgs {
    /// Interleaved channels per frame
    #[arg(long)]
    channels: Option<usize>,

    /// Frames per simulated callback
    #[arg(short, long)]
    block_size: Option<usize>,

    /// Number of callbacks
    #[arg(long)]
    blocks: Option<usize>,

    /// Ring capacity in frames
    #[arg(long)]
    capacity: Option<usize>,

    /// Sample rate (Hz)
    #[arg(short, long)]
    sample_rate: Option<u32>,

    /// Tone frequency (Hz)
    #[arg(short, long)]
    frequency: Option<f64>,

    /// Producer rate relative to realtime (below 1.0 forces underruns)
    #[arg(long)]
    producer_speed: Option<f64>,

    /// Record the callback output to a 16-bit WAV file
    #[arg(short, long)]
    record: Option<PathBuf>,
}

impl StreamArgs {
    fn apply_to(self, settings: &mut StreamSettings) {
        apply(&mut settings.channels, self.channels);
        apply(&mut settings.block_size, self.block_size);
        apply(&mut settings.blocks, self.blocks);
        apply(&mut settings.capacity, self.capacity);
        apply(&mut settings.sample_rate, self.sample_rate);
        apply(&mut settings.frequency, self.frequency);
        apply(&mut settings.producer_speed, self.producer_speed);
        if self.record.is_some() {
            settings.record = self.record;
        }
    }
}

#[derive(Args, Debug, Default)]
struct BenchArgs {
    /// Queue capacity
    #[arg(long)]
    capacity: Option<usize>,

    /// Items pushed through each queue
    #[arg(long)]
    iterations: Option<u64>,
}

impl BenchArgs {
    fn apply_to(self, settings: &mut BenchSettings) {
        apply(&mut settings.capacity, self.capacity);
        apply(&mut settings.iterations, self.iterations);
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vvring=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    let Some(report) = execute(cli)? else {
        return Ok(());
    };

    if json {
        println!("{}", report.to_json().context("Failed to serialize report")?);
    } else {
        print!("{report}");
    }
    Ok(())
}

/// Resolve settings from the profile and flags, then run the command
fn execute(cli: Cli) -> Result<Option<Report>> {
    let mut profile = RunProfile::load_or_default(cli.config.as_deref())?;

    let report = match cli.command {
        Commands::Stress(args) => {
            args.apply_to(&mut profile.stress);
            Report::Stress(stress::run(&profile.stress)?)
        }
        Commands::Stream(args) => {
            args.apply_to(&mut profile.stream);
            Report::Stream(stream::run(&profile.stream)?)
        }
        Commands::Bench(args) => {
            args.apply_to(&mut profile.bench);
            Report::Bench(bench::run(&profile.bench)?)
        }
        Commands::Profile { output } => {
            profile.save(&output)?;
            tracing::info!(path = %output.display(), "Wrote run profile");
            return Ok(None);
        }
    };

    Ok(Some(report))
}
