use std::sync::Arc;

use clap::{Parser, Subcommand};
use sandbox_gateway::config::{GatewayConfig, LogFormat};
use sandbox_gateway::driver::BollardContainerDriver;
use sandbox_gateway::proxy::{self, AppState};
use sandbox_gateway::pool::WorkerPoolController;

#[derive(Parser)]
#[command(name = "gateway", about = "Multi-tenant code-execution sandbox gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway HTTP server. The default when no subcommand is given.
    Serve,
    /// Print the resolved configuration (auth token redacted) and exit.
    Config,
}

fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = GatewayConfig::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Config => {
            init_tracing(config.log_format);
            println!("{:#?}", config.redacted());
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    init_tracing(config.log_format);

    let driver = Arc::new(BollardContainerDriver::connect().await?);
    let pool = WorkerPoolController::new(&config, driver);

    pool.begin_initialization();
    tracing::info!("sweeping stale containers from a previous run");
    pool.cleanup_stale_on_boot().await;

    pool.replenish_once().await;
    pool.finish_initialization();
    let _replenisher = pool.spawn_replenisher(config.pool.recycling_interval);
    let _recycler = pool.spawn_recycler(config.pool.recycling_interval);

    let state = AppState {
        pool: pool.clone(),
        http_client: reqwest::Client::new(),
        proxy_timeout: config.execution.proxy_timeout,
    };
    let app = proxy::router(state, config.auth_token.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down: tearing down all managed sandboxes");
    pool.cleanup_stale_on_boot().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
