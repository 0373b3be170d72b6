//! Magazine Gateway - edge-trust layer in front of a headless CMS

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use magazine_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let outcome = match cli.command {
        Some(Command::CheckConfig) => check_config(&cli),
        Some(Command::Serve) | None => run_server(&cli).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }
    Ok(config)
}

/// Validate configuration and print a redacted summary
fn check_config(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    config.validate().context("Configuration is invalid")?;

    let summary = serde_yaml::to_string(&config.redacted())
        .context("Failed to render configuration")?;
    println!("{summary}");
    println!("Configuration OK");
    Ok(())
}

/// Run the gateway server
async fn run_server(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        production = config.server.production,
        "Starting Magazine Gateway"
    );

    let gateway = Gateway::new(config).context("Failed to create gateway")?;
    gateway.run().await.context("Gateway error")?;
    Ok(())
}
