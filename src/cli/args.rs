// ABOUTME: Command line interface definition
// ABOUTME: Two modes: the long-running service and one-shot task runs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "webpilot", version, about = "Browser-automation task execution engine")]
pub struct Cli {
    /// Configuration file (YAML).
    #[arg(short, long, env = "WEBPILOT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "webpilot=debug".
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP and websocket service (the default).
    Serve {
        /// Override the configured listen port.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Execute one task file and print the finished task as JSON.
    Run {
        /// Task file (YAML or JSON) with an entry url and an action list.
        file: PathBuf,

        /// Force simulation even when a browser is configured.
        #[arg(long)]
        simulate: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let cli = Cli::parse_from(["webpilot"]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_run_with_simulate() {
        let cli = Cli::parse_from(["webpilot", "run", "task.yaml", "--simulate"]);
        match cli.command {
            Some(Command::Run { file, simulate }) => {
                assert_eq!(file, PathBuf::from("task.yaml"));
                assert!(simulate);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_serve_port_override() {
        let cli = Cli::parse_from(["webpilot", "serve", "--port", "9000"]);
        match cli.command {
            Some(Command::Serve { port }) => assert_eq!(port, Some(9000)),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
