//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// objshare - shared objects with a single serial writer
#[derive(Parser)]
#[command(
    name = "objshare",
    about = "Coordinate concurrent workers around one shared object",
    version,
    after_help = "Logs are written to: ~/.local/share/objshare/logs/objshare.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run concurrent workers incrementing one shared counter
    Demo {
        /// Number of concurrent workers
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Increments issued by each worker
        #[arg(short, long, default_value = "100")]
        increments: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config,
}

/// Output format for demo results
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Path of the log file written by the binary
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("objshare")
        .join("logs")
        .join("objshare.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_command() {
        let cli = Cli::parse_from(["objshare"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_demo_defaults() {
        let cli = Cli::parse_from(["objshare", "demo"]);
        if let Some(Command::Demo {
            workers,
            increments,
            format,
        }) = cli.command
        {
            assert_eq!(workers, 4);
            assert_eq!(increments, 100);
            assert_eq!(format, OutputFormat::Text);
        } else {
            panic!("Expected Demo command");
        }
    }

    #[test]
    fn test_cli_parse_demo_args() {
        let cli = Cli::parse_from(["objshare", "demo", "--workers", "8", "-i", "3", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Some(Command::Demo {
                workers: 8,
                increments: 3,
                format: OutputFormat::Json
            })
        ));
    }

    #[test]
    fn test_cli_parse_config() {
        let cli = Cli::parse_from(["objshare", "-v", "config"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Command::Config)));
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text)));
        assert!(matches!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["objshare", "-c", "/path/to/config.yml", "config"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
    }

    #[test]
    fn test_log_path() {
        assert!(get_log_path().ends_with("objshare/logs/objshare.log"));
    }
}
