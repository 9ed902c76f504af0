//! Maestro CLI entry point.

use clap::Parser;

use maestro::cli::{commands, exit_codes, Cli, Commands};
use maestro::infrastructure::logging::init_tracing;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let result = match cli.command {
        Commands::Run { config } => commands::run::handle_run(&config).await,
        Commands::Validate { config } => commands::validate::handle_validate(&config),
        Commands::Serve { bind } => commands::serve::handle_serve(&bind).await,
        Commands::TestAgent { config, agent, action, params } => {
            commands::test_agent::handle_test_agent(&config, &agent, &action, params.as_deref())
                .await
        }
    };

    let code = match result {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "command failed");
            exit_codes::FAILED
        }
    };
    std::process::exit(code);
}
