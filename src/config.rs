//! Process-wide configuration, read once at startup and shared read-only.
//!
//! Values come from built-in defaults, then an optional env-style file of
//! `KEY="value"` lines, then whatever the command line overrides.

use anyhow::{Context, Result, anyhow};
use std::{
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::engine::{DEFAULT_YTDLP_BIN, EngineConfig};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tubeproxy-env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_DOWNLOAD_ROOT: &str = "downloads";
pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Raw values found in the config file. Everything is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub download_root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ytdlp_bin: Option<PathBuf>,
    pub engine_timeout_secs: Option<u64>,
    pub max_concurrent_downloads: Option<usize>,
    pub static_root: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub user_agent: Option<String>,
}

/// Command-line overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub download_root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ytdlp_bin: Option<PathBuf>,
    pub engine_timeout_secs: Option<u64>,
    pub static_root: Option<PathBuf>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub download_root: PathBuf,
    pub host: IpAddr,
    pub port: u16,
    pub engine: EngineConfig,
    /// `None` disables the engine timeout.
    pub engine_timeout: Option<Duration>,
    pub max_concurrent_downloads: usize,
    pub static_root: Option<PathBuf>,
}

impl ProxyConfig {
    pub fn resolve(file: EnvConfig, overrides: Overrides) -> Result<Self> {
        let host_raw = overrides
            .host
            .or(file.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_owned());
        let host: IpAddr = host_raw
            .trim()
            .parse()
            .with_context(|| format!("invalid listen host {host_raw:?}"))?;

        let timeout_secs = overrides
            .engine_timeout_secs
            .or(file.engine_timeout_secs)
            .unwrap_or(DEFAULT_ENGINE_TIMEOUT_SECS);

        let max_concurrent_downloads = file
            .max_concurrent_downloads
            .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS);
        if max_concurrent_downloads == 0 {
            return Err(anyhow!("MAX_CONCURRENT_DOWNLOADS must be at least 1"));
        }

        let engine = EngineConfig {
            program: overrides
                .ytdlp_bin
                .or(file.ytdlp_bin)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN)),
            headers: EngineConfig::browser_headers(file.user_agent.as_deref()),
            cookies: file.cookies_file,
        };

        Ok(Self {
            download_root: overrides
                .download_root
                .or(file.download_root)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_ROOT)),
            host,
            port: overrides.port.or(file.port).unwrap_or(DEFAULT_PORT),
            engine,
            engine_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            max_concurrent_downloads,
            static_root: overrides.static_root.or(file.static_root),
        })
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value_raw)) = trimmed.split_once('=') else {
            continue;
        };
        let value = value_raw.trim().trim_matches('"');
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "DOWNLOAD_ROOT" => cfg.download_root = Some(PathBuf::from(value)),
            "TUBEPROXY_HOST" => cfg.host = Some(value.to_string()),
            "TUBEPROXY_PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing TUBEPROXY_PORT from {}", path.display()))?;
                cfg.port = Some(port);
            }
            "YTDLP_BIN" => cfg.ytdlp_bin = Some(PathBuf::from(value)),
            "ENGINE_TIMEOUT_SECS" => {
                let secs: u64 = value.parse().with_context(|| {
                    format!("Parsing ENGINE_TIMEOUT_SECS from {}", path.display())
                })?;
                cfg.engine_timeout_secs = Some(secs);
            }
            "MAX_CONCURRENT_DOWNLOADS" => {
                let limit: usize = value.parse().with_context(|| {
                    format!("Parsing MAX_CONCURRENT_DOWNLOADS from {}", path.display())
                })?;
                cfg.max_concurrent_downloads = Some(limit);
            }
            "STATIC_ROOT" => cfg.static_root = Some(PathBuf::from(value)),
            "COOKIES_FILE" => cfg.cookies_file = Some(PathBuf::from(value)),
            "USER_AGENT" => cfg.user_agent = Some(value.to_string()),
            _ => {}
        }
    }
    Ok(Some(cfg))
}

/// Reads `path` if present and applies `overrides`.
pub fn load_config_from(path: impl AsRef<Path>, overrides: Overrides) -> Result<ProxyConfig> {
    let file = read_env_config(path.as_ref())?.unwrap_or_default();
    ProxyConfig::resolve(file, overrides)
}
