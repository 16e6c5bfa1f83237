//! Per-request download lifecycle.
//!
//! A [`DownloadSession`] walks
//! `Received → Validating → (Listing | Materializing → Streaming) → Completed`
//! and can drop into `Failed(reason)` from any non-terminal state. The
//! manager itself keeps nothing between requests; each call builds its own
//! session and, for downloads, its own artifact.
//!
//! Cleanup is tied to ownership rather than to exit paths: once
//! materialization succeeds the [`DownloadArtifact`] holds the only
//! [`crate::artifact::ArtifactGuard`] for the session directory, and that
//! artifact moves into the [`ArtifactStream`] handed to the transport.
//! Whether the stream is drained, errors out, or is dropped because the
//! client went away, the directory is removed when the stream is dropped.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::fs::File;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::io::ReaderStream;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::artifact::DownloadArtifact;
use crate::catalog::FormatCatalog;
use crate::error::DownloadError;
use crate::extractor::ExtractionClient;
use crate::validate::UrlValidator;

/// Inbound request as seen by the manager. Fields are trimmed on
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRequest {
    pub url: String,
    pub format_id: Option<String>,
}

impl VideoRequest {
    pub fn new(url: impl AsRef<str>, format_id: Option<&str>) -> Self {
        Self {
            url: url.as_ref().trim().to_owned(),
            format_id: format_id
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Received,
    Validating,
    Listing,
    Materializing,
    Streaming,
    Completed,
    Failed(DownloadError),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn allows(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (from, Failed(_)) => !from.is_terminal(),
            (Received, Validating)
            | (Validating, Listing)
            | (Validating, Materializing)
            | (Listing, Completed)
            | (Materializing, Streaming)
            | (Streaming, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Validating => write!(f, "validating"),
            Self::Listing => write!(f, "listing"),
            Self::Materializing => write!(f, "materializing"),
            Self::Streaming => write!(f, "streaming"),
            Self::Completed => write!(f, "completed"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// State machine instance for one request.
#[derive(Debug)]
pub struct DownloadSession {
    id: Uuid,
    state: SessionState,
    span: Span,
}

impl DownloadSession {
    pub fn new(kind: &'static str) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            state: SessionState::Received,
            span: info_span!("session", %id, kind),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    fn advance(&mut self, next: SessionState) {
        if !self.state.allows(&next) {
            debug_assert!(false, "illegal transition {} -> {}", self.state, next);
            warn!(parent: &self.span, from = %self.state, to = %next, "ignoring illegal transition");
            return;
        }
        debug!(parent: &self.span, from = %self.state, to = %next, "transition");
        self.state = next;
    }

    /// Moves to `Failed(reason)` and hands the reason back for propagation.
    fn fail(&mut self, reason: DownloadError) -> DownloadError {
        warn!(parent: &self.span, state = %self.state, %reason, "session failed");
        self.advance(SessionState::Failed(reason.clone()));
        reason
    }
}

impl Drop for DownloadSession {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            debug!(parent: &self.span, state = %self.state, "session abandoned");
        }
    }
}

/// Orchestrates validation, extraction and hand-off to the transport.
#[derive(Clone)]
pub struct DownloadManager {
    validator: Arc<UrlValidator>,
    client: ExtractionClient,
    download_slots: Option<Arc<Semaphore>>,
}

impl DownloadManager {
    pub fn new(validator: Arc<UrlValidator>, client: ExtractionClient) -> Self {
        Self {
            validator,
            client,
            download_slots: None,
        }
    }

    /// Bounds how many downloads materialize or stream at once. Further
    /// downloads wait for a slot after validation.
    pub fn with_download_limit(mut self, limit: usize) -> Self {
        self.download_slots = Some(Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    pub fn client(&self) -> &ExtractionClient {
        &self.client
    }

    /// Lists the downloadable variants for `request.url`.
    pub async fn list_formats(&self, request: &VideoRequest) -> Result<FormatCatalog, DownloadError> {
        let mut session = DownloadSession::new("list");
        let span = session.span().clone();
        self.run_listing(&mut session, request)
            .instrument(span)
            .await
    }

    async fn run_listing(
        &self,
        session: &mut DownloadSession,
        request: &VideoRequest,
    ) -> Result<FormatCatalog, DownloadError> {
        session.advance(SessionState::Validating);
        if !self.validator.validate(&request.url) {
            return Err(session.fail(DownloadError::InvalidUrl));
        }

        session.advance(SessionState::Listing);
        match self.client.list_formats(&request.url).await {
            Ok(catalog) => {
                session.advance(SessionState::Completed);
                info!(formats = catalog.len(), "listed formats");
                Ok(catalog)
            }
            Err(err) => Err(session.fail(err.into())),
        }
    }

    /// Validates, materializes and opens the requested variant. The returned
    /// stream owns the artifact; dropping it reclaims the storage.
    pub async fn download(&self, request: &VideoRequest) -> Result<ArtifactStream, DownloadError> {
        let mut session = DownloadSession::new("download");
        let span = session.span().clone();
        let (artifact, file, permit) = self
            .prepare(&mut session, request)
            .instrument(span)
            .await?;
        Ok(ArtifactStream::new(session, artifact, file, permit))
    }

    async fn prepare(
        &self,
        session: &mut DownloadSession,
        request: &VideoRequest,
    ) -> Result<(DownloadArtifact, File, Option<OwnedSemaphorePermit>), DownloadError> {
        session.advance(SessionState::Validating);
        if !self.validator.validate(&request.url) {
            return Err(session.fail(DownloadError::InvalidUrl));
        }
        let Some(format_id) = request.format_id.as_deref() else {
            return Err(session.fail(DownloadError::MissingFormat));
        };

        let permit = match &self.download_slots {
            Some(slots) => {
                debug!(available = slots.available_permits(), "waiting for a download slot");
                let permit = slots.clone().acquire_owned().await.map_err(|_| {
                    session.fail(DownloadError::BackendFailure(
                        "download slots closed".to_owned(),
                    ))
                })?;
                Some(permit)
            }
            None => None,
        };

        session.advance(SessionState::Materializing);
        let artifact = self
            .client
            .materialize(session.id(), &request.url, format_id)
            .await
            .map_err(|err| session.fail(err.into()))?;

        // From here on `artifact` carries the cleanup obligation; any early
        // return drops it.
        let Some(file) = open_non_empty(&artifact).await else {
            return Err(session.fail(DownloadError::ArtifactMissing));
        };

        session.advance(SessionState::Streaming);
        debug!(
            size = artifact.size_hint,
            filename = %artifact.suggested_filename,
            "artifact ready"
        );
        Ok((artifact, file, permit))
    }
}

async fn open_non_empty(artifact: &DownloadArtifact) -> Option<File> {
    let file = File::open(artifact.path()).await.ok()?;
    let metadata = file.metadata().await.ok()?;
    (metadata.is_file() && metadata.len() > 0).then_some(file)
}

/// Response body for a download. Yields the artifact's bytes and finishes
/// the session: `Completed` at end of file, `Failed(StreamInterrupted)` on a
/// read error or when dropped early.
pub struct ArtifactStream {
    // Field order is drop order: close the file before the directory goes.
    inner: ReaderStream<File>,
    session: DownloadSession,
    sent: u64,
    artifact: DownloadArtifact,
    // Released after the directory is gone.
    _permit: Option<OwnedSemaphorePermit>,
}

impl ArtifactStream {
    fn new(
        session: DownloadSession,
        artifact: DownloadArtifact,
        file: File,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            inner: ReaderStream::new(file),
            session,
            sent: 0,
            artifact,
            _permit: permit,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    pub fn state(&self) -> &SessionState {
        self.session.state()
    }

    pub fn suggested_filename(&self) -> &str {
        &self.artifact.suggested_filename
    }

    pub fn mime_type(&self) -> &str {
        &self.artifact.mime_type
    }

    pub fn size_hint(&self) -> Option<u64> {
        self.artifact.size_hint
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }
}

impl fmt::Debug for ArtifactStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStream")
            .field("session", &self.session.id())
            .field("state", self.session.state())
            .field("sent", &self.sent)
            .finish()
    }
}

impl Stream for ArtifactStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                if !this.session.state().is_terminal() {
                    warn!(parent: this.session.span(), error = %err, sent = this.sent, "read failed mid-stream");
                    this.session.fail(DownloadError::StreamInterrupted);
                }
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if !this.session.state().is_terminal() {
                    this.session.advance(SessionState::Completed);
                    info!(parent: this.session.span(), sent = this.sent, "download completed");
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ArtifactStream {
    fn drop(&mut self) {
        if !self.session.state().is_terminal() {
            warn!(parent: self.session.span(), sent = self.sent, "client went away mid-stream");
            self.session.fail(DownloadError::StreamInterrupted);
        }
    }
}
