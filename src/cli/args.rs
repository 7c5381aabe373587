//! Command line argument parsing for the Pilum CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Pilum - inspect and verify segment files
#[derive(Parser, Debug, Clone)]
#[command(name = "pilum")]
#[command(about = "Inspect and verify Pilum segment files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct PilumArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human", global = true)]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl PilumArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the segments in a directory
    List(ListArgs),

    /// Show the descriptor and fields of a segment
    Info(SegmentArgs),

    /// Verify every checksum of a segment
    Check(SegmentArgs),
}

/// Arguments for listing segments
#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    /// Directory holding the segment files
    #[arg(short, long, value_name = "DIR")]
    pub path: PathBuf,
}

/// Arguments for commands that act on one segment
#[derive(Parser, Debug, Clone)]
pub struct SegmentArgs {
    /// Directory holding the segment files
    #[arg(short, long, value_name = "DIR")]
    pub path: PathBuf,

    /// Segment name, such as `_0`
    #[arg(short, long, value_name = "NAME")]
    pub segment: String,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_command() {
        let args = PilumArgs::try_parse_from(["pilum", "list", "--path", "/data/index"]).unwrap();
        match args.command {
            Command::List(list) => assert_eq!(list.path, PathBuf::from("/data/index")),
            other => panic!("Expected List command, got {other:?}"),
        }
    }

    #[test]
    fn test_segment_commands() {
        let args =
            PilumArgs::try_parse_from(["pilum", "check", "-p", "/data/index", "-s", "_a"]).unwrap();
        match args.command {
            Command::Check(check) => {
                assert_eq!(check.path, PathBuf::from("/data/index"));
                assert_eq!(check.segment, "_a");
            }
            other => panic!("Expected Check command, got {other:?}"),
        }

        assert!(PilumArgs::try_parse_from(["pilum", "info", "--path", "/data/index"]).is_err());
    }

    #[test]
    fn test_verbosity_levels() {
        let args = PilumArgs::try_parse_from(["pilum", "list", "-p", "."]).unwrap();
        assert_eq!(args.verbosity(), 1);

        let args = PilumArgs::try_parse_from(["pilum", "-vvv", "list", "-p", "."]).unwrap();
        assert_eq!(args.verbosity(), 3);

        let args = PilumArgs::try_parse_from(["pilum", "-vv", "--quiet", "list", "-p", "."]).unwrap();
        assert_eq!(args.verbosity(), 0);
    }

    #[test]
    fn test_output_format() {
        let args =
            PilumArgs::try_parse_from(["pilum", "--format", "json", "--pretty", "list", "-p", "."])
                .unwrap();
        assert_eq!(args.output_format, OutputFormat::Json);
        assert!(args.pretty);

        assert!(PilumArgs::try_parse_from(["pilum", "--format", "yaml", "list", "-p", "."]).is_err());
    }
}
