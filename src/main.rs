use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cloud_connector::{Config, Daemon};

/// Cloud connector - routes broker commands to nodes connected over WebSocket
#[derive(Parser)]
#[command(name = "cloud-connector", version, about)]
struct Cli {
    /// Port to listen on for node connections
    #[arg(long, env = "CONNECTOR_PORT", value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Address to bind the node endpoint to
    #[arg(long, env = "CONNECTOR_BIND")]
    bind: Option<IpAddr>,

    /// Config file (defaults to ~/.config/cloud-connector/config.toml)
    #[arg(short, long, env = "CONNECTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity, RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,cloud_connector=info",
        1 => "info,cloud_connector=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    tracing::info!(
        bind = %config.server.bind,
        port = config.server.port,
        "starting cloud connector"
    );
    tracing::debug!(?config, "loaded configuration");

    let daemon = Daemon::new(config)?;
    daemon.run().await?;

    tracing::info!("cloud connector stopped");
    Ok(())
}
