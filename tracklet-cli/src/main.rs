//! tracklet: command-line front end of the track-fit emulator.
//!
//! Builds derivative tables from pattern files, exports them for the
//! firmware, and fits event files.
#![allow(clippy::uninlined_format_args, clippy::too_many_lines)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;
use tracklet_algorithms::{
    process_events, DerivativeMode, DerivativeTable, FitConfig, HitPattern, TrackFitter,
};
use tracklet_io::{EventOutput, EventRecord, HitPatternWriter};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    TrackletIo(#[from] tracklet_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] tracklet_core::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    Argument(String),
}

/// Coefficient source of the fit.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Table coefficients (firmware behavior)
    Table,
    /// Exact floating coefficients, table fixed-point coefficients
    ExactForFloating,
    /// Coefficients recomputed per candidate
    Exact,
}

impl From<Mode> for DerivativeMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Table => DerivativeMode::Table,
            Mode::ExactForFloating => DerivativeMode::ExactForFloating,
            Mode::Exact => DerivativeMode::Exact,
        }
    }
}

/// Bit-level emulator of the L1 tracklet track fit.
#[derive(Parser)]
#[command(name = "tracklet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Fit configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TableArgs {
    /// Hit-pattern file
    patterns: PathBuf,

    /// Stereo-angle bits per 2S disk
    #[arg(long)]
    alpha_bits: Option<u32>,

    /// Curvature bins, as bits
    #[arg(long)]
    rinv_bits: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show statistics of a derivative table
    Info {
        #[command(flatten)]
        table: TableArgs,

        /// List every registered pattern
        #[arg(long)]
        list: bool,
    },

    /// Show the coefficients stored for one table row
    Lookup {
        #[command(flatten)]
        table: TableArgs,

        /// Layer mask, binary (layer 1 first)
        #[arg(long)]
        layers: String,

        /// Disk mask, binary (disk 1 first, two bits per disk)
        #[arg(long)]
        disks: String,

        /// Stereo-angle combination
        #[arg(long, default_value = "0")]
        alpha: u32,

        /// Curvature bin
        #[arg(long, default_value = "0")]
        rinv_bin: u32,
    },

    /// Write the firmware table files
    Export {
        #[command(flatten)]
        table: TableArgs,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Fit event files
    Fit {
        #[command(flatten)]
        table: TableArgs,

        /// Input event file(s)
        #[arg(required = true)]
        input: Vec<PathBuf>,

        /// Output file for fitted events
        #[arg(short, long)]
        output: PathBuf,

        /// Coefficient source
        #[arg(short, long, value_enum)]
        mode: Option<Mode>,

        /// Record hit patterns of barrel-seeded fits to this file
        #[arg(long)]
        record_patterns: Option<PathBuf>,
    },

    /// Write the hit patterns of all barrel-seeded candidates of event files
    Patterns {
        /// Input event file(s)
        #[arg(required = true)]
        input: Vec<PathBuf>,

        /// Output pattern file
        #[arg(short, long)]
        output: PathBuf,

        /// Write repeated patterns once
        #[arg(long)]
        unique: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn load_config(path: Option<&Path>) -> Result<FitConfig> {
    let Some(path) = path else {
        return Ok(FitConfig::default());
    };
    let text = fs::read_to_string(path)?;
    let config: FitConfig = serde_json::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

fn build_table(args: &TableArgs, mut config: FitConfig) -> Result<(DerivativeTable, FitConfig)> {
    if let Some(bits) = args.alpha_bits {
        config.alpha_bits = bits;
    }
    if let Some(bits) = args.rinv_bits {
        config.rinv_bits = bits;
    }
    config.validate()?;

    let start = Instant::now();
    let table = tracklet_io::load_derivative_table(&args.patterns, &config)?;
    info!(
        elapsed_ms = start.elapsed().as_millis(),
        "built derivative table from {}",
        args.patterns.display()
    );
    Ok((table, config))
}

fn parse_mask(text: &str, nbits: u32, what: &str) -> Result<u32> {
    let mask = u32::from_str_radix(text, 2)
        .map_err(|_| CliError::Argument(format!("{what} mask is not binary: {text}")))?;
    if mask >= 1 << nbits {
        return Err(CliError::Argument(format!(
            "{what} mask wider than {nbits} bits: {text}"
        )));
    }
    Ok(mask)
}

fn read_all_events(input: &[PathBuf]) -> Result<Vec<EventRecord>> {
    let mut events = Vec::new();
    for path in input {
        let mut records = tracklet_io::read_events(path)?;
        info!(events = records.len(), "read {}", path.display());
        events.append(&mut records);
    }
    Ok(events)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info { table, list } => {
            let (table, config) = build_table(&table, config)?;
            let layer_codes = table.layer_mem().iter().filter(|&&c| c >= 0).count();
            let disk_codes = table.disk_mem().iter().filter(|&&c| c >= 0).count();

            println!("Derivative table:");
            println!("  Alpha bits:  {}", config.alpha_bits);
            println!("  Rinv bins:   {}", config.rinv_bins());
            println!("  Patterns:    {}", table.patterns());
            println!("  Rows:        {}", table.entries());
            println!("  Layer codes: {}", layer_codes);
            println!("  Disk codes:  {}", disk_codes);

            if list {
                let rows = table.rows();
                let mut start = 0;
                while start < rows.len() {
                    let row = &rows[start];
                    let end = rows[start..]
                        .iter()
                        .position(|r| {
                            r.layer_mask() != row.layer_mask() || r.disk_mask() != row.disk_mask()
                        })
                        .map_or(rows.len(), |n| start + n);
                    let multiplicity = u32::try_from((end - start) >> config.rinv_bits)
                        .map_err(|_| CliError::Argument("pattern too large".into()))?;
                    let pattern = HitPattern {
                        layer_mask: row.layer_mask(),
                        disk_mask: row.disk_mask(),
                        alpha_index: 0,
                        multiplicity,
                    };
                    println!("  {pattern}  rows {start}..{end}");
                    start = end;
                }
            }
        }

        Commands::Lookup {
            table,
            layers,
            disks,
            alpha,
            rinv_bin,
        } => {
            let layer_mask = parse_mask(&layers, 6, "layer")?;
            let disk_mask = parse_mask(&disks, 10, "disk")?;
            let (table, config) = build_table(&table, config)?;
            if rinv_bin >= config.rinv_bins() {
                return Err(CliError::Argument(format!(
                    "rinv bin {rinv_bin} outside 0..{}",
                    config.rinv_bins()
                )));
            }

            let Some(base) = table.index(layer_mask, disk_mask) else {
                println!("No table entry for {layers} {disks}");
                return Ok(());
            };
            let row = table
                .derivatives(layer_mask, disk_mask, alpha, rinv_bin)
                .ok_or_else(|| {
                    CliError::Argument(format!(
                        "alpha {alpha} rinv bin {rinv_bin} outside the pattern"
                    ))
                })?;

            println!("Pattern {layers} {disks}: first row {base}");
            println!("  Alpha mask: {}", row.alpha_mask());
            println!("  Rinv bin:   {}", row.irinv());
            println!("  Hits:       {}", row.n_hits());
            println!("  t:          {:.6}", row.t());
            for (name, (fixed, float)) in ["rinv", "phi0", "t", "z0"]
                .iter()
                .zip(row.iminv_dt().iter().zip(row.minv_dt()))
            {
                let n = 2 * row.n_hits();
                println!("  {name:>4}  {:?}", &fixed[..n]);
                println!("        {:?}", &float[..n]);
            }
        }

        Commands::Export { table, output } => {
            let (table, _) = build_table(&table, config)?;
            let summary = tracklet_io::export_tables(&table, &output)?;
            println!(
                "Wrote {} files of {} rows to {}",
                summary.files,
                summary.rows,
                output.display()
            );
        }

        Commands::Fit {
            table,
            input,
            output,
            mode,
            record_patterns,
        } => {
            let mut config = config;
            if let Some(mode) = mode {
                config.derivative_mode = mode.into();
            }
            if record_patterns.is_some() {
                config.record_hit_patterns = true;
            }
            let (table, config) = build_table(&table, config)?;
            let fitter = TrackFitter::new(Arc::new(table), config)?;

            let mut events = read_all_events(&input)?
                .into_iter()
                .map(EventRecord::into_event)
                .collect::<tracklet_io::Result<Vec<_>>>()?;

            let start = Instant::now();
            let reports = process_events(&mut events, &fitter)?;
            let elapsed = start.elapsed();

            let tracks: usize = reports.iter().map(|r| r.n_tracks()).sum();
            let missing: usize = reports.iter().map(|r| r.n_missing()).sum();
            println!("Events:  {}", events.len());
            println!("Tracks:  {}", tracks);
            println!("Missing: {}", missing);
            println!("Time:    {:.3}s", elapsed.as_secs_f64());

            if let Some(path) = record_patterns {
                let n = tracklet_io::write_hit_patterns(&path, &reports, false)?;
                println!("Recorded {} hit patterns to {}", n, path.display());
            }

            let outputs: Vec<EventOutput> = events
                .into_iter()
                .zip(reports)
                .map(|(event, report)| EventOutput::new(event, report))
                .collect();
            tracklet_io::write_outputs(&output, &outputs)?;
            println!("Wrote {}", output.display());
        }

        Commands::Patterns {
            input,
            output,
            unique,
        } => {
            let table = DerivativeTable::new(&config);
            let fitter = TrackFitter::new(Arc::new(table), config)?;

            let mut writer = HitPatternWriter::create(&output)?;
            if unique {
                writer = writer.unique();
            }
            for event in read_all_events(&input)? {
                for candidate in &event.candidates {
                    if let Some(pattern) = fitter.recorded_pattern(candidate) {
                        writer.write_pattern(&pattern)?;
                    }
                }
            }
            writer.flush()?;
            println!("Wrote {} hit patterns to {}", writer.written(), output.display());
        }
    }

    Ok(())
}
