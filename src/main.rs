//! Broker server binary.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use github_token_broker::{cli::Cli, config::Config, server::Server, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(filepath = %cli.config.display(), error = %e, "cannot load config");
            return ExitCode::FAILURE;
        }
    };
    info!(filepath = %cli.config.display(), "loaded configuration");

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        applications = config.applications.len(),
        "starting github token broker"
    );

    let server = match Server::new(config).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "error initializing server");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!(error = %e, "server crash");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
