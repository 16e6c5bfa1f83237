//! The external extraction engine and its `yt-dlp` implementation.
//!
//! The rest of the crate talks to the engine only through
//! [`ExtractionEngine`], so tests can swap in the in-process fake engine
//! and never touch the network.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::catalog::RawVariant;

pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// One line per finished download: title and final path, tab separated.
const PRINT_TEMPLATE: &str = "after_move:%(title)s\t%(filepath)s";

/// Longest slice of stderr kept in error details.
const STDERR_TAIL: usize = 600;

const FORMAT_UNAVAILABLE_MARKERS: &[&str] = &["requested format is not available"];
const VIDEO_UNAVAILABLE_MARKERS: &[&str] = &[
    "video unavailable",
    "unsupported url",
    "is not a valid url",
    "private video",
    "this video has been removed",
];

/// Metadata returned by a metadata-only engine run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInfo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub formats: Vec<RawVariant>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<RawVariant>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<RawVariant>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Where and under which stem the engine must write its output. The engine
/// may pick the extension.
#[derive(Debug, Clone, Copy)]
pub struct FetchTarget<'a> {
    pub dir: &'a Path,
    pub stem: &'a str,
}

/// What a successful fetch reports back.
#[derive(Debug, Clone, Default)]
pub struct FetchedMedia {
    /// Final output path, if the engine reported one.
    pub path: Option<PathBuf>,
    pub title: Option<String>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("video unavailable: {0}")]
    Unavailable(String),

    #[error("requested format is not available: {0}")]
    FormatUnavailable(String),

    #[error("engine failed: {0}")]
    Failed(String),

    #[error("engine i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine returned malformed metadata: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Capability interface for the opaque extraction engine.
#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    /// Metadata-only run. Must not write anything to disk. `Ok(None)` means
    /// the engine produced no usable info.
    async fn extract_info(&self, url: &str) -> Result<Option<RawInfo>, EngineError>;

    /// Downloads exactly `format_id`, merging streams into one container if
    /// needed, into `target`.
    async fn fetch(
        &self,
        url: &str,
        format_id: &str,
        target: FetchTarget<'_>,
    ) -> Result<FetchedMedia, EngineError>;
}

/// Startup configuration for [`YtDlpEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub program: PathBuf,
    /// Browser-like header set sent with every upstream request.
    pub headers: Vec<(String, String)>,
    pub cookies: Option<PathBuf>,
}

impl EngineConfig {
    pub fn browser_headers(user_agent: Option<&str>) -> Vec<(String, String)> {
        vec![
            (
                "User-Agent".to_owned(),
                user_agent.unwrap_or(DEFAULT_USER_AGENT).to_owned(),
            ),
            (
                "Accept".to_owned(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_owned(),
            ),
            ("Accept-Language".to_owned(), "en-US,en;q=0.9".to_owned()),
        ]
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_YTDLP_BIN),
            headers: Self::browser_headers(None),
            cookies: None,
        }
    }
}

/// Drives the `yt-dlp` executable. Children are killed when the calling
/// future is dropped, so a timeout or a vanished client never leaves a
/// download running in the background.
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    config: EngineConfig,
}

impl YtDlpEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.program);
        command
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--no-progress");

        for (name, value) in &self.config.headers {
            if name.eq_ignore_ascii_case("user-agent") {
                command.arg("--user-agent").arg(value);
            } else {
                command.arg("--add-header").arg(format!("{name}:{value}"));
            }
        }

        if let Some(cookies) = &self.config.cookies
            && cookies.exists()
        {
            command.arg("--cookies").arg(cookies);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ExtractionEngine for YtDlpEngine {
    async fn extract_info(&self, url: &str) -> Result<Option<RawInfo>, EngineError> {
        let mut command = self.command();
        command.arg("--dump-single-json").arg("--skip-download").arg(url);

        debug!(program = %self.config.program.display(), "probing formats");
        let output = command.output().await?;
        if !output.status.success() {
            return Err(classify_failure(output.status, &output.stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(trimmed)?))
    }

    async fn fetch(
        &self,
        url: &str,
        format_id: &str,
        target: FetchTarget<'_>,
    ) -> Result<FetchedMedia, EngineError> {
        let template = target.dir.join(format!("{}.%(ext)s", target.stem));

        let mut command = self.command();
        command
            .arg("--format")
            .arg(format_id)
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("--remux-video")
            .arg("mp4")
            .arg("--output")
            .arg(&template)
            .arg("--print")
            .arg(PRINT_TEMPLATE)
            .arg("--no-simulate")
            .arg(url);

        debug!(format_id, "fetching media");
        let output = command.output().await?;
        if !output.status.success() {
            return Err(classify_failure(output.status, &output.stderr));
        }

        Ok(parse_printed(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Reads the single `title<TAB>filepath` line printed after the move. The
/// path never contains a tab, so the line is split at the last one.
fn parse_printed(stdout: &str) -> FetchedMedia {
    let Some((title, path)) = stdout.lines().rev().find_map(|line| line.rsplit_once('\t')) else {
        return FetchedMedia::default();
    };
    let title = title.trim();
    let path = path.trim();
    FetchedMedia {
        title: (!title.is_empty()).then(|| title.to_owned()),
        path: (!path.is_empty()).then(|| PathBuf::from(path)),
    }
}

fn classify_failure(status: std::process::ExitStatus, stderr: &[u8]) -> EngineError {
    let text = String::from_utf8_lossy(stderr);
    let lower = text.to_lowercase();
    let detail = format!("exit status {status}: {}", stderr_tail(&text));

    if FORMAT_UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        EngineError::FormatUnavailable(detail)
    } else if VIDEO_UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        EngineError::Unavailable(detail)
    } else {
        EngineError::Failed(detail)
    }
}

fn stderr_tail(text: &str) -> &str {
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text;
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
