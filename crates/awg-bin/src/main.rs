//! `awgctl`: command-line access to the AWG waveform tools.
//!
//! ```bash
//! awgctl encode --samples pulse.csv --name awg_ch1_a.wfm --nop 1000 -o pulse.bin
//! awgctl decode pulse.bin --json
//! awgctl upload --config awg.toml --channel 1 --samples pulse.csv
//! ```
//!
//! Sample files are headerless CSV: one point per row, the analog value
//! first, then optional marker 1 and marker 2 bits (`0`/`1`).

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use awg_core::{AwgConfig, SampleBuffer, WireFrame};
use awg_driver::AwgDriver;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "awgctl")]
#[command(about = "Encode, inspect and upload AWG waveform frames", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a CSV sample file into an upload frame
    Encode {
        /// CSV file: sample[,marker1[,marker2]] per row
        #[arg(long)]
        samples: PathBuf,

        /// Slot name written into the frame header
        #[arg(long)]
        name: String,

        /// Pad or truncate to this many points (default: row count)
        #[arg(long)]
        nop: Option<usize>,

        /// Sample clock in Hz
        #[arg(long, default_value = "1e9")]
        clock: f64,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print what an encoded frame contains
    Decode {
        /// Frame file produced by `encode`
        file: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Commit a CSV sample file to one channel
    Upload {
        /// Instrument configuration (TOML, overridable with AWG_* variables)
        #[arg(long)]
        config: PathBuf,

        /// Channel number, starting at 1
        #[arg(long)]
        channel: u8,

        /// CSV file: sample[,marker1[,marker2]] per row
        #[arg(long)]
        samples: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Encode {
            samples,
            name,
            nop,
            clock,
            output,
        } => encode(&samples, name, nop, clock, &output),
        Commands::Decode { file, json } => decode(&file, json),
        Commands::Upload {
            config,
            channel,
            samples,
        } => upload(&config, channel, &samples).await,
    }
}

fn encode(samples: &Path, name: String, nop: Option<usize>, clock: f64, output: &Path) -> Result<()> {
    let (analog, marker1, marker2) = read_samples(samples)?;
    let nop = nop.unwrap_or(analog.len());
    if nop == 0 {
        bail!("{} has no samples", samples.display());
    }

    let frame = WireFrame::new(name, SampleBuffer::fit(nop, &analog, &marker1, &marker2), clock);
    let bytes = frame.encode()?;
    std::fs::write(output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Wrote {} ({} points, {} bytes)",
        output.display(),
        nop,
        bytes.len()
    );
    Ok(())
}

fn decode(file: &Path, json: bool) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let frame = WireFrame::decode(&bytes)?;
    let summary = FrameSummary::from(&frame);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("slot:    {}", summary.name);
        println!("magic:   {}", summary.magic);
        println!("clock:   {:e} Hz", summary.clock);
        println!("nop:     {}", summary.nop);
        println!("range:   {} .. {}", summary.min, summary.max);
        println!("marker1: {} high", summary.marker1_high);
        println!("marker2: {} high", summary.marker2_high);
    }
    Ok(())
}

async fn upload(config: &Path, channel: u8, samples: &Path) -> Result<()> {
    let config = AwgConfig::load_from(config)
        .with_context(|| format!("Failed to load {}", config.display()))?;
    let (analog, marker1, marker2) = read_samples(samples)?;

    let driver = AwgDriver::from_config(&config).await?;
    tracing::info!("Connected: {}", driver.identify().await?);

    let buffer = SampleBuffer::fit(config.nop, &analog, &marker1, &marker2);
    let outcome = driver.commit(channel, buffer).await?;
    println!("Channel {}: {:?}", channel, outcome);
    Ok(())
}

/// Decoded frame contents, reduced to what is worth printing.
#[derive(Debug, Serialize)]
struct FrameSummary {
    name: String,
    magic: u32,
    clock: f64,
    nop: usize,
    min: f32,
    max: f32,
    marker1_high: usize,
    marker2_high: usize,
}

impl From<&WireFrame> for FrameSummary {
    fn from(frame: &WireFrame) -> Self {
        let samples = frame.buffer.samples();
        let (min, max) = if samples.is_empty() {
            (0.0, 0.0)
        } else {
            samples
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(*v), hi.max(*v))
                })
        };
        Self {
            name: frame.name.clone(),
            magic: frame.magic,
            clock: frame.clock,
            nop: frame.buffer.len(),
            min,
            max,
            marker1_high: frame.buffer.marker1().iter().filter(|b| **b).count(),
            marker2_high: frame.buffer.marker2().iter().filter(|b| **b).count(),
        }
    }
}

/// Read `sample[,marker1[,marker2]]` rows. Missing marker columns read as low.
fn read_samples(path: &Path) -> Result<(Vec<f32>, Vec<bool>, Vec<bool>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut samples = Vec::new();
    let mut marker1 = Vec::new();
    let mut marker2 = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Bad CSV row {}", row + 1))?;
        let value = record
            .get(0)
            .unwrap_or_default()
            .parse::<f32>()
            .with_context(|| format!("Row {}: invalid sample", row + 1))?;
        samples.push(value);
        marker1.push(parse_bit(record.get(1), row)?);
        marker2.push(parse_bit(record.get(2), row)?);
    }
    Ok((samples, marker1, marker2))
}

fn parse_bit(field: Option<&str>, row: usize) -> Result<bool> {
    match field.unwrap_or("0") {
        "" | "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        other => bail!("Row {}: invalid marker bit {:?}", row + 1, other),
    }
}
