//! RemoteStash command line entry point

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remotestash::cli::{Cli, CliHandler};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut handler = CliHandler::new(cli.config)?.with_peer(cli.peer);

    // Logs go to stderr so pulled items can be piped from stdout
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        handler.config().log_level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("remotestash={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("RemoteStash v{}", remotestash::VERSION);

    handler.handle_command(cli.command).await?;

    Ok(())
}
