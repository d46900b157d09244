//! CLI argument definitions using clap
//!
//! Commands:
//! - tessdb check --config <path>
//! - tessdb ingest --config <path> [--records <path>]
//! - tessdb query --config <path> [--records <path>]
//! - tessdb serve --config <path> [--records <path>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tessdb - spatial records on a simulated dataflow mesh
#[derive(Parser, Debug)]
#[command(name = "tessdb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a configuration and print the per-node capacity plan
    Check {
        /// Path to configuration file
        #[arg(long, default_value = "./tessdb.json")]
        config: PathBuf,
    },

    /// Ingest JSON-lines records (stdin when no file is given)
    Ingest {
        /// Path to configuration file
        #[arg(long, default_value = "./tessdb.json")]
        config: PathBuf,

        /// JSON-lines record file
        #[arg(long)]
        records: Option<PathBuf>,
    },

    /// Execute one query read from stdin and exit
    Query {
        /// Path to configuration file
        #[arg(long, default_value = "./tessdb.json")]
        config: PathBuf,

        /// Records to ingest before the query runs
        #[arg(long)]
        records: Option<PathBuf>,
    },

    /// Answer JSON requests from stdin, one per line
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./tessdb.json")]
        config: PathBuf,

        /// Records to ingest before serving
        #[arg(long)]
        records: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_query_with_records() {
        let cli = Cli::try_parse_from(["tessdb", "query", "--config", "c.json", "--records", "r.jsonl"]).unwrap();
        match cli.command {
            Command::Query { config, records } => {
                assert_eq!(config, PathBuf::from("c.json"));
                assert_eq!(records, Some(PathBuf::from("r.jsonl")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_config_has_default() {
        let cli = Cli::try_parse_from(["tessdb", "check"]).unwrap();
        assert!(matches!(cli.command, Command::Check { config } if config == PathBuf::from("./tessdb.json")));
    }
}
