use anyhow::{Context, Result};
use clap::Parser;
use proctab_daemon::{
    collector::system_collector,
    config::Config,
    db::Database,
    hostname::local_hostname,
    server::{self, AppState},
    store::SnapshotStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "proctab-collector", about = "Process snapshot collector service", version)]
struct Args {
    /// Config file (TOML). Defaults to the platform config directory.
    #[arg(long, env = "PROCTAB_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.listen`.
    #[arg(long, env = "PROCTAB_LISTEN")]
    listen: Option<String>,

    /// SQLite database file, overrides `store.path`.
    #[arg(long, env = "PROCTAB_DB")]
    db: Option<PathBuf>,

    /// Hostname for locally collected snapshots.
    #[arg(long, env = "PROCTAB_HOSTNAME")]
    hostname: Option<String>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("proctab_daemon=info,tower_http=info")),
        )
        .init();
    info!("proctab collector starting...");

    let config_path = args.config.unwrap_or_else(Config::config_path);
    let config = Config::load_or_default(&config_path);

    // Initialize database
    let db = match args.db.or_else(|| config.store.path.clone()) {
        Some(path) => Database::open(&path)
            .with_context(|| format!("failed to open database {}", path.display()))?,
        None => Database::open_default().with_context(|| {
            format!("failed to open database {}", Database::default_path().display())
        })?,
    }
    .with_busy_timeout(config.store.busy_timeout());
    db.init_schema().context("failed to initialize schema")?;
    let db_path = db.path().display().to_string();

    let store = Arc::new(SnapshotStore::new(db).with_retry_policy(config.retry.policy()));
    let hostname = args
        .hostname
        .or_else(|| config.server.hostname.clone())
        .unwrap_or_else(local_hostname);
    let state = AppState::new(Arc::clone(&store), system_collector(), hostname.clone());

    let listen = args.listen.unwrap_or_else(|| config.server.listen.clone());
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    info!(%listen, %hostname, db = %db_path, "collector ready");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    store.close().context("failed to close store")?;
    info!("collector stopped");
    Ok(())
}
