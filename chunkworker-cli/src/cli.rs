//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chunkworker", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Spawn a worker, configure it once and run jobs against it
    Run {
        /// JSON configuration payload (example: --payload='{"seed":42}')
        #[arg(long, value_name = "JSON")]
        payload: String,

        /// JSON job payload; repeat for several jobs (example: --job='{"x":0,"y":0}')
        #[arg(long = "job", value_name = "JSON", required = true)]
        jobs: Vec<String>,

        /// Wait for each job before sending the next instead of pipelining
        #[arg(long)]
        sequential: bool,

        /// Backend override: thread, process
        #[arg(long, value_name = "TYPE")]
        backend: Option<String>,

        /// Module locator override
        #[arg(long, value_name = "LOCATOR")]
        module_code: Option<String>,

        /// Binary resource locator to link against the module
        #[arg(long, value_name = "LOCATOR")]
        module_binary: Option<String>,
    },

    /// Run as a background worker over stdin/stdout (internal use)
    #[command(hide = true)]
    Worker {
        /// Worker ID assigned by the controller
        #[arg(long, value_name = "ID")]
        worker_id: Option<String>,

        /// Module locator
        #[arg(long, value_name = "LOCATOR", default_value = "builtin:terrain")]
        module_code: String,

        /// Binary resource locator to link against the module
        #[arg(long, value_name = "LOCATOR")]
        module_binary: Option<String>,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file (defaults to --config)
        #[arg(long, value_name = "PATH")]
        config_file: Option<PathBuf>,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path; prints to stdout when omitted
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_collects_jobs() {
        let cli = Cli::parse_from([
            "chunkworker",
            "run",
            "--payload",
            r#"{"seed":42}"#,
            "--job",
            r#"{"x":0,"y":0}"#,
            "--job",
            r#"{"x":1,"y":0}"#,
            "--sequential",
        ]);

        match cli.command {
            Some(Commands::Run {
                jobs, sequential, ..
            }) => {
                assert_eq!(jobs.len(), 2);
                assert!(sequential);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_worker_arguments() {
        let cli = Cli::parse_from([
            "chunkworker",
            "--log-level",
            "debug",
            "worker",
            "--worker-id",
            "worker-1",
            "--module-code",
            "modules/terrain.json",
            "--module-binary",
            "modules/palette.bin",
        ]);

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Some(Commands::Worker {
                worker_id,
                module_code,
                module_binary,
            }) => {
                assert_eq!(worker_id.as_deref(), Some("worker-1"));
                assert_eq!(module_code, "modules/terrain.json");
                assert_eq!(module_binary.as_deref(), Some("modules/palette.bin"));
            }
            _ => panic!("expected worker command"),
        }
    }
}
