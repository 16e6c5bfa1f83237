#![forbid(unsafe_code)]

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tubeproxy::{
    api::{self, AppState},
    artifact::TransientStore,
    config::{DEFAULT_CONFIG_PATH, Overrides, load_config_from},
    engine::YtDlpEngine,
    extractor::ExtractionClient,
    security::{ensure_not_root, restrict_transient_root},
    session::DownloadManager,
    validate::UrlValidator,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve the tubeproxy download API.")]
struct Cli {
    #[arg(
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Env-style config file (default /etc/tubeproxy-env)"
    )]
    config: PathBuf,
    #[arg(
        long = "download-root",
        value_name = "PATH",
        help = "Directory holding in-flight downloads"
    )]
    download_root: Option<PathBuf>,
    #[arg(long = "host", value_name = "ADDR", help = "Listen address")]
    host: Option<String>,
    #[arg(long = "port", value_name = "PORT", help = "Listen port")]
    port: Option<u16>,
    #[arg(long = "ytdlp-bin", value_name = "PATH", help = "yt-dlp executable")]
    ytdlp_bin: Option<PathBuf>,
    #[arg(
        long = "engine-timeout-secs",
        value_name = "SECS",
        help = "Kill yt-dlp after this many seconds (0 disables)"
    )]
    engine_timeout_secs: Option<u64>,
    #[arg(
        long = "static-root",
        value_name = "PATH",
        help = "Directory with the landing page"
    )]
    static_root: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            download_root: self.download_root.clone(),
            host: self.host.clone(),
            port: self.port,
            ytdlp_bin: self.ytdlp_bin.clone(),
            engine_timeout_secs: self.engine_timeout_secs,
            static_root: self.static_root.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    ensure_not_root("tubeproxy backend")?;

    let cli = Cli::parse();
    let config = load_config_from(&cli.config, cli.overrides())
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let store = TransientStore::open(&config.download_root)?;
    restrict_transient_root(store.root())?;
    store.sweep_stale();

    let engine = YtDlpEngine::new(config.engine.clone());
    let client = ExtractionClient::new(Arc::new(engine), store, config.engine_timeout);
    let manager = DownloadManager::new(Arc::new(UrlValidator::default()), client)
        .with_download_limit(config.max_concurrent_downloads);
    let app = api::router(AppState::new(manager, config.static_root.clone()));

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        %addr,
        download_root = %config.download_root.display(),
        max_concurrent_downloads = config.max_concurrent_downloads,
        "tubeproxy listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}
