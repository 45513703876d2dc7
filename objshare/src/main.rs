//! objshare - Shared objects with a single serial writer
//!
//! CLI entry point for the demo workload and config inspection.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use objshare::cli::{Cli, Command, OutputFormat, get_log_path};
use objshare::config::Config;
use objshare::demo::{DemoReport, run_demo};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        "objshare loaded config: queue-capacity={}, read-timeout-ms={}",
        config.coordinator.queue_capacity, config.coordinator.read_timeout_ms
    );

    match cli.command {
        Some(Command::Demo {
            workers,
            increments,
            format,
        }) => cmd_demo(&config, workers, increments, format).await,
        Some(Command::Config) => cmd_config(&config),
        None => {
            println!("No command given. Run `objshare --help` for usage.");
            Ok(())
        }
    }
}

/// Run the demo workload and print its report
async fn cmd_demo(config: &Config, workers: usize, increments: usize, format: OutputFormat) -> Result<()> {
    let report = run_demo(config.coordinator.clone(), workers, increments).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }

    if !report.is_consistent() {
        return Err(eyre::eyre!(
            "Final count {} does not match expected {}",
            report.count,
            report.expected
        ));
    }
    Ok(())
}

fn print_report(report: &DemoReport) {
    println!("{}", "objshare demo".bright_cyan().bold());
    println!("  {:18} {}", "workers", report.workers);
    println!("  {:18} {}", "increments/worker", report.increments);
    println!("  {:18} {}", "commands applied", report.commands_applied);
    println!("  {:18} {}", "commands failed", report.commands_failed);
    println!("  {:18} {}ms", "elapsed", report.elapsed_ms);

    let verdict = if report.is_consistent() { "ok".green() } else { "MISMATCH".red() };
    println!(
        "Final count: {} (expected {}) {}",
        report.count.to_string().bold(),
        report.expected,
        verdict
    );
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml()?);
    Ok(())
}
