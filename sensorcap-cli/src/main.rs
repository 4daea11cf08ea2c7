//! Sensor capture extraction CLI.
//!
//! Inspects frame containers and exports their contents to plain files.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use sensorcap_core::correlate::ImuCompanions;
use sensorcap_core::decoder::{RawSchema, SalvagePolicy};
use sensorcap_core::dispatch::ExportOptions;
use sensorcap_core::frame::FrameReader;
use sensorcap_core::output::write_frame_index;
use sensorcap_core::{Diagnostics, ExportDispatcher, FsExportSink, SensorProfile};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Extracts records from multi-sensor capture files.
#[derive(Parser, Debug)]
#[command(name = "sensorcap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print frame statistics for a container
    Info(InfoArgs),
    /// Export one or more capture files into a directory
    Export(ExportArgs),
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Input container file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Also write an `index,timestamp,length` CSV of every frame
    #[arg(long, value_name = "PATH")]
    csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Input capture files
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Sensor type of the inputs
    #[arg(short, long, value_enum)]
    sensor: Sensor,

    /// Output directory (created if missing)
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// Extension the inputs must carry
    #[arg(long, value_name = "EXT", default_value = "bin")]
    input_ext: String,

    /// Stop a file at its first undecodable frame instead of skipping it
    #[arg(long)]
    abort_on_decode_error: bool,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Sensor {
    /// Dump every frame payload unchanged
    Raw,
    /// Copy IMU/GNSS companion files recorded with each input
    Imu,
}

impl Sensor {
    fn profile(self, input_ext: &str) -> SensorProfile {
        match self {
            Sensor::Raw => SensorProfile::decode("raw", input_ext, RawSchema),
            Sensor::Imu => SensorProfile::correlate("imu", input_ext, ImuCompanions),
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Info(args) => info(args),
        Command::Export(args) => export(args),
    }
}

fn info(args: InfoArgs) -> Result<()> {
    let reader = FrameReader::open(&args.input)
        .with_context(|| format!("Failed to open {:?}", args.input))?;

    let mut frames = 0usize;
    let mut bytes = 0u64;
    let mut min_len = usize::MAX;
    let mut max_len = 0usize;
    let mut first_ts = None;
    let mut last_ts = None;
    let mut framing_error = None;

    for frame in reader {
        match frame {
            Ok(frame) => {
                frames += 1;
                bytes += frame.payload.len() as u64;
                min_len = min_len.min(frame.payload.len());
                max_len = max_len.max(frame.payload.len());
                first_ts.get_or_insert(frame.timestamp);
                last_ts = Some(frame.timestamp);
            }
            Err(e) => framing_error = Some(e),
        }
    }

    println!("Input:        {:?}", args.input);
    println!("Frames:       {}", frames);
    println!("Payload:      {} bytes", bytes);
    if frames > 0 {
        println!("Frame sizes:  {}..={} bytes", min_len, max_len);
    }
    if let (Some(first), Some(last)) = (first_ts, last_ts) {
        println!("Time range:   {:.6} .. {:.6} ({:.3}s)", first, last, last - first);
    }
    if let Some(e) = &framing_error {
        println!("Truncated:    {}", e);
    }

    if let Some(csv) = &args.csv {
        // A truncated container was already reported above.
        match write_frame_index(&args.input, csv) {
            Ok(_) => {}
            Err(e) if framing_error.is_some() => warn!("frame index is partial: {}", e),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to write frame index {:?}", csv))
            }
        }
    }

    Ok(())
}

fn export(args: ExportArgs) -> Result<()> {
    let profile = args.sensor.profile(&args.input_ext);
    let options = ExportOptions {
        salvage: if args.abort_on_decode_error {
            SalvagePolicy::AbortFile
        } else {
            SalvagePolicy::SkipRecord
        },
    };
    let diagnostics = Diagnostics::new();
    let dispatcher = ExportDispatcher::new(diagnostics.clone()).with_options(options);
    let mut sink = FsExportSink::new(&args.output)
        .with_context(|| format!("Failed to create output directory {:?}", args.output))?;

    let progress = spinner(args.quiet);
    let start_time = Instant::now();
    let mut failed = 0usize;

    for (i, input) in args.inputs.iter().enumerate() {
        progress.set_message(format!(
            "[{}/{}] {:?}",
            i + 1,
            args.inputs.len(),
            input.file_name().unwrap_or_default()
        ));

        // Failures and partial files are logged through the diagnostics handle.
        if dispatcher.export(input, &profile, &mut sink).is_err() {
            failed += 1;
        }
    }

    progress.finish_with_message(format!(
        "Done! Exported {} of {} files in {:.2}s",
        args.inputs.len() - failed,
        args.inputs.len(),
        start_time.elapsed().as_secs_f64()
    ));

    if !args.quiet {
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Sensor:       {}", profile.name);
        eprintln!("  Output:       {:?}", sink.out_dir());
        eprintln!("  Files:        {}", sink.written().len());
        eprintln!("  Warnings:     {}", diagnostics.warning_count());
        eprintln!("  Failed:       {}", failed);
    }

    if failed > 0 {
        anyhow::bail!("{} of {} inputs failed to export", failed, args.inputs.len());
    }
    Ok(())
}
