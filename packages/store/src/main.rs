//! The binary entrypoint for `zax-store`, the artifact store backend.
//!
//! Spawned by the engine daemon with the per-workspace cache directory as
//! its only configuration. Binds an ephemeral loopback port, publishes it
//! through `rust.port` in the cache directory, and serves the RPC surface
//! until asked to stop.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, bail},
};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The per-workspace cache directory this backend serves.
    #[arg(long, env = "ZAX_CACHE_DIR")]
    cache_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(true)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("ZAX_LOG")
                .from_env_lossy(),
        )
        .init();

    serve(cli.cache_dir).await
}

async fn serve(cache_dir: PathBuf) -> Result<()> {
    if !cache_dir.is_dir() {
        bail!("cache directory {cache_dir:?} does not exist");
    }

    // Failing to bring the schema up to date is fatal: serving against a
    // half-migrated database would corrupt delta history.
    let db = zax_store::db::Store::open(cache_dir.join("state.db"))
        .context("open artifact store database")?;

    let state = zax_store::api::ServiceState::new(db, cache_dir.join("artifacts"));
    let router = zax_store::api::router(state);

    // Bind an ephemeral loopback port, then publish it. The port file is
    // written only after the listener is live so the engine never reads a
    // port nothing answers on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind loopback listener")?;
    let addr = listener.local_addr().context("read listen address")?;
    tracing::info!(%addr, "listening");

    let port_file = cache_dir.join("rust.port");
    write_port_file(&port_file, addr.port())
        .await
        .context("publish port file")?;

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve RPC surface");

    if let Err(err) = tokio::fs::remove_file(&port_file).await {
        tracing::warn!(?err, path = ?port_file, "unable to remove port file");
    }
    tracing::info!("shutdown complete");
    served
}

/// Atomically publish the chosen port: write a sibling temp file, then
/// rename it into place.
async fn write_port_file(path: &std::path::Path, port: u16) -> Result<()> {
    let tmp = path.with_extension("port.tmp");
    tokio::fs::write(&tmp, format!("{port}\n"))
        .await
        .with_context(|| format!("write {tmp:?}"))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename {tmp:?} into place"))?;
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    use tokio::signal;

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
        _ = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        },
    }
}
