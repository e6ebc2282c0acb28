use clap::{Parser, Subcommand};
use std::sync::Arc;
use tally::config::AppConfig;
use tally::server::AnalyticsServer;
use tokio::net::TcpListener;
use tokio::signal;

#[derive(Parser)]
#[command(name = "tally", about = "Analytics event ingest and reporting service")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Send randomized events to a running server
    Loadgen {
        /// Base URL of the server
        #[arg(long)]
        url: Option<String>,
        /// Number of events to send
        #[arg(long)]
        count: Option<usize>,
        /// Maximum requests in flight
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(Some(&cli.config))?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Loadgen {
            url,
            count,
            concurrency,
        } => {
            if let Some(url) = url {
                config.loadgen.url = url;
            }
            if let Some(count) = count {
                config.loadgen.count = count;
            }
            if let Some(concurrency) = concurrency {
                config.loadgen.concurrency = concurrency;
            }
            let summary = tally::loadgen::run(&config.loadgen).await;
            println!("{}", serde_json::to_string(&summary)?);
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(msg) = config.validate() {
        eprintln!("Configuration error: {msg}");
        return Err(msg.into());
    }

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        db = %config.database.path.display(),
        table = %config.table.name,
        "starting tally"
    );

    let server = Arc::new(AnalyticsServer::from_config(&config));
    server.init()?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    server.serve(listener, shutdown_signal()).await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!("shutting down...");
}
