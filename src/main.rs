mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => commands::version::run()?,
        Commands::Check { namespace, secret } => commands::check::run(&namespace, &secret).await?,
        Commands::Crd { action } => commands::crd::run(action).await?,
        Commands::Operator {
            namespace,
            secret,
            metrics_port,
        } => commands::operator::run(&namespace, &secret, metrics_port).await?,
        Commands::Analyze { namespace, secret } => {
            commands::analyze::run(&namespace, &secret).await?
        }
        Commands::Discover { namespace, secret } => {
            commands::discover::run(&namespace, &secret).await?
        }
    }

    Ok(())
}
