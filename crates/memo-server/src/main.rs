//! memo-vault HTTP server
//!
//! Serves the note action handler over HTTP. Notes are kept in a blob store:
//! a directory tree by default, or process memory for throwaway instances.
//! Handler settings (bucket, key prefix, password, salt, ...) come from the
//! environment and are re-read for every invocation.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use memo_core::{BlobStore, FsBlobStore, MemoryBlobStore, Router, ServerConfig};
use memo_server::{app, AppState, ConfigSource};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// Directory tree under --data-dir
    Fs,
    /// Process memory (lost on exit)
    Memory,
}

#[derive(Parser, Debug)]
#[command(name = "memo-server")]
#[command(about = "Encrypted note backend for memo-vault")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 3002, env = "MEMO_PORT")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "MEMO_BIND")]
    bind: String,

    /// Blob store backend
    #[arg(long, value_enum, default_value_t = StoreKind::Fs, env = "MEMO_STORE")]
    store: StoreKind,

    /// Root directory for the filesystem blob store
    #[arg(long, default_value = "./data", env = "MEMO_DATA_DIR")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memo_server=info,memo_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let store: Arc<dyn BlobStore> = match cli.store {
        StoreKind::Fs => {
            std::fs::create_dir_all(&cli.data_dir)?;
            tracing::info!("Using filesystem blob store at {:?}", cli.data_dir);
            Arc::new(FsBlobStore::new(cli.data_dir.clone()))
        }
        StoreKind::Memory => {
            tracing::warn!("Using in-memory blob store; notes are lost on exit");
            Arc::new(MemoryBlobStore::new())
        }
    };

    check_environment(&ServerConfig::from_env());

    let state = Arc::new(AppState {
        router: Router::new(store),
        config: ConfigSource::Environment,
    });

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;

    tracing::info!("Starting memo-server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("memo-server shut down");
    Ok(())
}

/// Warn about settings that make every request fail.
fn check_environment(config: &ServerConfig) {
    if config.bucket.is_empty() {
        tracing::warn!("BUCKET is not set; note and config actions will fail");
    }
    if config.passwd.is_empty() {
        tracing::warn!("PASSWD is not set; sign-in is disabled");
    }
    if config.salt.is_empty() {
        tracing::warn!("SALT is not set; session tokens cannot be issued");
    }
    tracing::info!(
        "Notes under '{}/' in bucket '{}', compression {}",
        config.key_prefix,
        config.bucket,
        if config.use_compression { "on" } else { "off" }
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
