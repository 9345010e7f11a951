use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dbs_core::AppConfig;
use dbs_server::create_router;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dbstudio", version, about = "Database browsing HTTP service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve(ServeArgs),
    /// Show how a connection URL would be interpreted
    CheckUrl { url: String },
}

#[derive(Debug, Default, Args)]
struct ServeArgs {
    /// Path to config.toml; searched for upwards from the working directory when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(args).await,
        Command::CheckUrl { url } => {
            let description = dbstudio::describe_url(&url)?;
            println!("{}", description);
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = AppConfig::load_from(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    dbs_telemetry::init_telemetry(&config.observability);
    tracing::info!(environment = ?config.environment, "Starting dbstudio");
    if !config.server.require_auth {
        tracing::warn!("Connection routes are not protected; set REQUIRE_AUTH=true to require a bearer token");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = dbstudio::bootstrap(config).await?;
    let registry = state.registry.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;

    registry.close_all().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
