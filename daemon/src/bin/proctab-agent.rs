use anyhow::Result;
use clap::Parser;
use proctab_daemon::{
    agent::{self, HttpUploader},
    collector::system_collector,
    config::Config,
    hostname::local_hostname,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "proctab-agent", about = "Uploads local process snapshots to a collector", version)]
struct Args {
    /// Config file (TOML). Defaults to the platform config directory.
    #[arg(long, env = "PROCTAB_CONFIG")]
    config: Option<PathBuf>,

    /// Collector upload URL, overrides `agent.upload_url`.
    #[arg(long, env = "PROCTAB_UPLOAD_URL")]
    url: Option<String>,

    /// Seconds between uploads; 0 uploads once.
    #[arg(long, env = "PROCTAB_INTERVAL")]
    interval: Option<u64>,

    /// Hostname to tag records with.
    #[arg(long, env = "PROCTAB_HOSTNAME")]
    hostname: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("proctab_daemon=info,proctab_agent=info")),
        )
        .init();

    let config = Config::load_or_default(&args.config.unwrap_or_else(Config::config_path));
    let timeout = config.agent.timeout();
    let url = args.url.unwrap_or(config.agent.upload_url);
    let hostname = args
        .hostname
        .or(config.agent.hostname)
        .unwrap_or_else(local_hostname);
    let interval = args.interval.unwrap_or(config.agent.interval_seconds);

    let collector = system_collector();
    let uploader = HttpUploader::new(url.clone(), timeout)?;
    info!(%url, %hostname, interval, timeout_secs = timeout.as_secs(), "agent starting");

    if interval == 0 {
        agent::run_once(collector.as_ref(), &hostname, &uploader).await?;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A failed upload is retried on the next tick
                if let Err(e) = agent::run_once(collector.as_ref(), &hostname, &uploader).await {
                    error!(error = %format!("{:#}", e), "upload failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("agent stopped");
                return Ok(());
            }
        }
    }
}
