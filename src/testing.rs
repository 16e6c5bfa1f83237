//! In-process stand-in for the extraction engine.
//!
//! `FakeEngine` answers from canned data, writes its payload where a real
//! engine would, and counts how often it was called. It is fully
//! deterministic so manager and API behavior can be tested without network
//! access.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::catalog::RawVariant;
use crate::engine::{EngineError, ExtractionEngine, FetchTarget, FetchedMedia, RawInfo};

pub const FAKE_TITLE: &str = "Fake Video";

#[derive(Debug, Clone)]
enum FetchBehavior {
    Write(Vec<u8>),
    /// Reports success without producing a file.
    NoOutput,
    /// Writes a partial fragment, then fails.
    Fail(String),
}

#[derive(Debug, Default)]
struct CallLog {
    probes: Vec<String>,
    fetches: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct FakeEngine {
    info: Option<RawInfo>,
    probe_failure: Option<String>,
    fetch: FetchBehavior,
    delay: Option<Duration>,
    calls: Arc<Mutex<CallLog>>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    /// A video with a muxed 360p mp4 (`18`), a video-only 1080p mp4 (`137`)
    /// and an audio-only m4a (`140`).
    pub fn new() -> Self {
        Self {
            info: Some(RawInfo {
                title: Some(FAKE_TITLE.to_owned()),
                formats: default_formats(),
            }),
            probe_failure: None,
            fetch: FetchBehavior::Write(b"fake-video-bytes".to_vec()),
            delay: None,
            calls: Arc::new(Mutex::new(CallLog::default())),
        }
    }

    pub fn with_formats(mut self, formats: Vec<RawVariant>) -> Self {
        let title = self.info.as_ref().and_then(|info| info.title.clone());
        self.info = Some(RawInfo { title, formats });
        self
    }

    pub fn without_info(mut self) -> Self {
        self.info = None;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.fetch = FetchBehavior::Write(payload);
        self
    }

    pub fn without_output(mut self) -> Self {
        self.fetch = FetchBehavior::NoOutput;
        self
    }

    pub fn failing_probe(mut self, message: impl Into<String>) -> Self {
        self.probe_failure = Some(message.into());
        self
    }

    pub fn failing_fetch(mut self, message: impl Into<String>) -> Self {
        self.fetch = FetchBehavior::Fail(message.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn probe_calls(&self) -> usize {
        self.calls.lock().probes.len()
    }

    pub fn fetch_calls(&self) -> usize {
        self.calls.lock().fetches.len()
    }

    pub fn total_calls(&self) -> usize {
        let calls = self.calls.lock();
        calls.probes.len() + calls.fetches.len()
    }

    fn knows_format(&self, format_id: &str) -> bool {
        self.info.as_ref().is_some_and(|info| {
            info.formats
                .iter()
                .any(|f| f.format_id.as_deref() == Some(format_id))
        })
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ExtractionEngine for FakeEngine {
    async fn extract_info(&self, url: &str) -> Result<Option<RawInfo>, EngineError> {
        self.calls.lock().probes.push(url.to_owned());
        self.pause().await;
        if let Some(message) = &self.probe_failure {
            return Err(EngineError::Failed(message.clone()));
        }
        Ok(self.info.clone())
    }

    async fn fetch(
        &self,
        url: &str,
        format_id: &str,
        target: FetchTarget<'_>,
    ) -> Result<FetchedMedia, EngineError> {
        self.calls
            .lock()
            .fetches
            .push((url.to_owned(), format_id.to_owned()));
        self.pause().await;

        if self.info.is_none() {
            return Err(EngineError::Unavailable("fake: no such video".into()));
        }
        if !self.knows_format(format_id) {
            return Err(EngineError::FormatUnavailable(format!(
                "fake: format {format_id} not offered"
            )));
        }

        let path: PathBuf = target.dir.join(format!("{}.mp4", target.stem));
        match &self.fetch {
            FetchBehavior::Write(payload) => {
                tokio::fs::write(&path, payload).await?;
                Ok(FetchedMedia {
                    path: Some(path),
                    title: self.info.as_ref().and_then(|info| info.title.clone()),
                })
            }
            FetchBehavior::NoOutput => Ok(FetchedMedia::default()),
            FetchBehavior::Fail(message) => {
                let fragment = target.dir.join(format!("{}.f{format_id}.mp4.part", target.stem));
                tokio::fs::write(&fragment, b"partial").await?;
                Err(EngineError::Failed(message.clone()))
            }
        }
    }
}

fn default_formats() -> Vec<RawVariant> {
    vec![
        RawVariant {
            format_id: Some("18".into()),
            format_note: Some("360p".into()),
            ext: Some("mp4".into()),
            height: Some(360),
            vcodec: Some("avc1.42001E".into()),
            acodec: Some("mp4a.40.2".into()),
            filesize: Some(1_048_576),
            filesize_approx: None,
        },
        RawVariant {
            format_id: Some("137".into()),
            format_note: None,
            ext: Some("mp4".into()),
            height: Some(1080),
            vcodec: Some("avc1.640028".into()),
            acodec: Some("none".into()),
            filesize: None,
            filesize_approx: Some(8_388_608),
        },
        RawVariant {
            format_id: Some("140".into()),
            format_note: Some("medium".into()),
            ext: Some("m4a".into()),
            height: None,
            vcodec: Some("none".into()),
            acodec: Some("mp4a.40.2".into()),
            filesize: Some(524_288),
            filesize_approx: None,
        },
    ]
}
