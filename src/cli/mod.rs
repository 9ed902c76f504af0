//! Command-line interface.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Process exit codes for the CLI driver.
pub mod exit_codes {
    /// Workflow completed.
    pub const COMPLETED: i32 = 0;
    /// Workflow failed.
    pub const FAILED: i32 = 1;
    /// Workflow partially completed.
    pub const PARTIALLY_COMPLETED: i32 = 2;
    /// Configuration invalid.
    pub const CONFIG_INVALID: i32 = 64;
    /// Workflow cancelled.
    pub const CANCELLED: i32 = 130;
}

/// Declarative workflow orchestrator for heterogeneous agent services.
#[derive(Debug, Parser)]
#[command(name = "maestro", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a workflow to completion.
    Run {
        /// Workflow document (YAML or JSON).
        config: PathBuf,
    },
    /// Validate a workflow document without running it.
    Validate {
        /// Workflow document (YAML or JSON).
        config: PathBuf,
    },
    /// Serve the REST control API.
    Serve {
        /// Bind address.
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
    /// Invoke one action against one configured agent and print the
    /// normalized response.
    TestAgent {
        /// Workflow document declaring the agent.
        config: PathBuf,
        /// Agent name.
        #[arg(long)]
        agent: String,
        /// Action to invoke.
        #[arg(long)]
        action: String,
        /// Parameters as a JSON object.
        #[arg(long)]
        params: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_command() {
        let cli = Cli::try_parse_from(["maestro", "run", "wf.yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { .. }));
        assert!(!cli.json_logs);
    }

    #[test]
    fn parses_test_agent_flags() {
        let cli = Cli::try_parse_from([
            "maestro",
            "test-agent",
            "wf.yaml",
            "--agent",
            "a1",
            "--action",
            "ping",
            "--params",
            "{}",
        ])
        .unwrap();
        match cli.command {
            Commands::TestAgent { agent, action, params, .. } => {
                assert_eq!(agent, "a1");
                assert_eq!(action, "ping");
                assert_eq!(params.as_deref(), Some("{}"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
