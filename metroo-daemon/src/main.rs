#![forbid(unsafe_code)]

//! `metrood`: the Muti Metroo agent binary.

use anyhow::Context;
use clap::Parser;
use metroo_core::config::{Config, LogFormat};
use metroo_crypto::Identity;
use metroo_daemon::{http_api, Supervisor};
use metroo_transport::tcp::TcpProvider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "metrood", about = "Muti Metroo mesh agent", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "metroo.toml")]
    config: PathBuf,

    /// Override the configured data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn init_logging(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.agent.log_level.clone()));
    match cfg.agent.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (cfg, config_missing) = if args.config.exists() {
        let cfg = Config::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?;
        (cfg, false)
    } else {
        (Config::default(), true)
    };
    init_logging(&cfg);
    if config_missing {
        warn!("no config file at {}, using defaults", args.config.display());
    }

    let data_dir = args
        .data_dir
        .unwrap_or_else(|| Path::new(&cfg.agent.data_dir).to_path_buf());
    let identity = Identity::load_or_generate(&data_dir, cfg.agent.id)
        .context("loading agent identity")?;
    info!(agent = %identity.agent_id(), "identity loaded");

    // Development wiring: every configured transport name runs over the
    // length-framed TCP provider. Production builds register real quic/h2/ws
    // providers here instead.
    let provider = Arc::new(TcpProvider);

    let supervisor = Supervisor::new(cfg, identity, provider)?;
    supervisor.start().await?;

    if supervisor.config().api.enabled {
        let sup = supervisor.clone();
        tokio::spawn(async move {
            if let Err(e) = http_api::serve(sup).await {
                warn!(error = %e, "control API exited");
            }
        });
    }

    tokio::signal::ctrl_c().await.ok();
    supervisor.shutdown().await;
    Ok(())
}
