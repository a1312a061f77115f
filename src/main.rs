mod config;
mod error;
mod source;
mod splitter;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::{Overrides, Settings};
use crate::source::ReaderSource;
use crate::splitter::{FsTree, NullTree, SplitReport};

#[derive(Parser)]
#[command(
    name = "table_batcher",
    about = "Split a single-table SQL dump into transaction-wrapped batch files",
    after_help = "Example: cat users.sql | table_batcher --rows-per-batch 5000"
)]
struct Cli {
    /// Dump file to read (default: stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Root directory for structure/ and data/ (default: ./output)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Max rows per data batch file (default: 10000)
    #[arg(short = 'n', long)]
    rows_per_batch: Option<usize>,

    /// Settings file (toml, yaml or json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop reading once the end-of-data marker is seen
    #[arg(long)]
    stop_at_boundary: bool,

    /// Report the batches that would be written without writing them
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// No progress spinner
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let overrides = Overrides {
        rows_per_batch: cli.rows_per_batch,
        output_dir: cli.output_dir.clone(),
        stop_at_boundary: cli.stop_at_boundary,
    };
    let settings = Settings::load(cli.config.as_deref(), &overrides)?;
    info!(
        rows_per_batch = settings.rows_per_batch,
        output_dir = %settings.output_dir.display(),
        dry_run = cli.dry_run,
        "starting"
    );

    let reader: Box<dyn BufRead> = match &cli.input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    };
    let mut source = ReaderSource::new(reader);
    let pb = progress_bar(cli.quiet)?;

    let report = if cli.dry_run {
        splitter::split(&mut source, NullTree::new(&settings.output_dir), &settings, pb)?
    } else {
        splitter::split(&mut source, FsTree::new(&settings.output_dir), &settings, pb)?
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, cli.dry_run);
        let elapsed = t0.elapsed();
        if elapsed.as_secs() >= 1 {
            println!("\nDone in {}", format_duration(elapsed));
        }
    }

    Ok(())
}

fn progress_bar(quiet: bool) -> anyhow::Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} rows ({per_sec}) {msg}")?,
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

fn print_report(report: &SplitReport, dry_run: bool) {
    if dry_run {
        println!("Dry run, nothing written.");
    }

    for f in report.structure_files() {
        println!("Structure: {} ({} lines)", f.path.display(), f.lines);
    }

    let data: Vec<_> = report.data_files().collect();
    println!("Data:      {} batch files, {} rows", data.len(), report.rows);
    for f in &data {
        println!("  {:<40} {:>8} rows", f.path.display().to_string(), f.rows);
    }

    println!(
        "Read {} lines ({} skipped), stopped while {:?}",
        report.lines_read, report.lines_skipped, report.final_phase
    );

    if !report.warnings.is_empty() {
        println!("\n--- Warnings ---");
        for w in &report.warnings {
            println!("  {w}");
        }
        if report.warnings_suppressed > 0 {
            println!("  ... and {} more", report.warnings_suppressed);
        }
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "table_batcher",
            "-i",
            "dump.sql",
            "-o",
            "out",
            "-n",
            "500",
            "--stop-at-boundary",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.input, Some(PathBuf::from("dump.sql")));
        assert_eq!(cli.output_dir, Some(PathBuf::from("out")));
        assert_eq!(cli.rows_per_batch, Some(500));
        assert!(cli.stop_at_boundary && cli.dry_run && !cli.json);
    }

    #[test]
    fn cli_defaults_leave_settings_to_config() {
        let cli = Cli::try_parse_from(["table_batcher"]).unwrap();
        assert!(cli.input.is_none());
        assert!(cli.rows_per_batch.is_none());
        assert!(cli.output_dir.is_none());
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
