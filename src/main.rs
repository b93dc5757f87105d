use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::Backends;
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::CONFIG;
use router::{ReconcilerState, create_router};
use tokio::sync::oneshot;

#[derive(Parser)]
#[command(name = "habitsync")]
#[command(about = "habitsync user data service - migrates and deletes user data")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long, help = "HTTP API server port", default_value = "3000")]
    http_port: u16,

    #[arg(long, help = "Bind address for the HTTP server", default_value = "0.0.0.0")]
    bind: String,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Common(CommonCommands),
}

impl Default for Commands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    // Handle common commands that don't require starting the service
    let command = cli.command.unwrap_or_default();
    let Commands::Common(ref common_cmd) = command;
    if utils::handle_common_command(common_cmd, &config).await? {
        return Ok(());
    }

    config.validate().context("Invalid configuration")?;
    let config = CONFIG.get_or_init(|| config);

    log::info!("Starting habitsync");

    let bind_ip = cli
        .bind
        .parse::<std::net::IpAddr>()
        .context("Invalid bind address")?;
    let http_addr = SocketAddr::new(bind_ip, cli.http_port);

    let backends = Backends::global_or_connect(config).await?;
    let state = ReconcilerState::from_config(backends, config)
        .context("Failed to build reconciler from configuration")?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {http_addr}"))?;
    log::info!("HTTP API server listening on {http_addr}");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                log::info!("HTTP server shutting down gracefully");
            })
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c signal")?;

    log::info!("Shutting down habitsync...");
    let _ = shutdown_tx.send(());

    match server.await {
        Ok(Ok(())) => log::info!("habitsync stopped gracefully"),
        Ok(Err(e)) => log::error!("HTTP server error: {e}"),
        Err(e) => log::error!("HTTP server task failed: {e}"),
    }

    Ok(())
}
