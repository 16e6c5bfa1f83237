//! Adapter between the download manager and the extraction engine.
//!
//! Listing and materializing are separate engine runs: listing is cheap and
//! happens on every quality lookup, materializing is expensive and only
//! happens once the user confirmed a format. Engine errors never cross this
//! boundary raw; they are translated into [`ExtractionError`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mime_guess::MimeGuess;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::artifact::{
    ARTIFACT_STEM, DownloadArtifact, SESSION_DIR_PREFIX, TransientStore, locate_output,
};
use crate::catalog::{self, FormatCatalog};
use crate::engine::{EngineError, ExtractionEngine, FetchTarget};
use crate::error::ExtractionError;

const DEFAULT_FILENAME_STEM: &str = "youtube_video";
const DEFAULT_EXTENSION: &str = "mp4";
const MAX_TITLE_CHARS: usize = 120;

#[derive(Clone)]
pub struct ExtractionClient {
    engine: Arc<dyn ExtractionEngine>,
    store: TransientStore,
    timeout: Option<Duration>,
}

impl ExtractionClient {
    pub fn new(
        engine: Arc<dyn ExtractionEngine>,
        store: TransientStore,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            engine,
            store,
            timeout,
        }
    }

    pub fn store(&self) -> &TransientStore {
        &self.store
    }

    /// Metadata-only lookup. Never writes to storage.
    pub async fn list_formats(&self, url: &str) -> Result<FormatCatalog, ExtractionError> {
        let info = self
            .bounded(self.engine.extract_info(url))
            .await?
            .map_err(|err| translate(err, "listing formats"))?
            .ok_or(ExtractionError::NotFound)?;

        let catalog = catalog::build(&info.formats);
        debug!(
            raw = info.formats.len(),
            offered = catalog.len(),
            "built format catalog"
        );
        if catalog.is_empty() {
            return Err(ExtractionError::NotFound);
        }
        Ok(catalog)
    }

    /// Fetches `format_id` into a freshly allocated session directory owned
    /// by the returned artifact. On any error the directory, including
    /// partial output, is gone before this returns.
    pub async fn materialize(
        &self,
        session: Uuid,
        url: &str,
        format_id: &str,
    ) -> Result<DownloadArtifact, ExtractionError> {
        let guard = self.store.allocate(session).map_err(|err| {
            warn!(error = %err, "could not allocate transient storage");
            ExtractionError::BackendFailure(format!("allocating transient storage: {err}"))
        })?;

        let target = FetchTarget {
            dir: guard.dir(),
            stem: ARTIFACT_STEM,
        };
        let fetched = self
            .bounded(self.engine.fetch(url, format_id, target))
            .await?
            .map_err(|err| translate(err, "materializing format"))?;

        let path = fetched
            .path
            .and_then(|path| contained_file(guard.dir(), &path))
            .or_else(|| locate_output(guard.dir()))
            .unwrap_or_else(|| guard.dir().join(format!("{ARTIFACT_STEM}.{DEFAULT_EXTENSION}")));

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or(DEFAULT_EXTENSION)
            .to_ascii_lowercase();
        let mime_type = MimeGuess::from_ext(&extension)
            .first()
            .filter(|mime| mime.type_() == mime_guess::mime::VIDEO)
            .map(|mime| mime.to_string())
            .unwrap_or_else(|| "video/mp4".to_owned());
        let size_hint = std::fs::metadata(&path).ok().map(|meta| meta.len());

        Ok(DownloadArtifact {
            suggested_filename: client_filename(
                public_title(fetched.title.as_deref(), guard.dir()),
                &extension,
            ),
            mime_type,
            size_hint,
            path,
            guard,
        })
    }

    /// Applies the configured engine timeout. The engine future is dropped
    /// on expiry, which kills the child process.
    async fn bounded<F, T>(&self, fut: F) -> Result<T, ExtractionError>
    where
        F: Future<Output = T>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                warn!(timeout_secs = limit.as_secs(), "extraction engine timed out");
                ExtractionError::BackendFailure(format!(
                    "extraction engine timed out after {}s",
                    limit.as_secs()
                ))
            }),
            None => Ok(fut.await),
        }
    }
}

/// Resolves `path` and accepts it only if it is a regular file inside `dir`.
fn contained_file(dir: &Path, path: &Path) -> Option<PathBuf> {
    let dir = std::fs::canonicalize(dir).ok()?;
    let path = std::fs::canonicalize(path).ok()?;
    (path.starts_with(&dir) && path.is_file()).then_some(path)
}

/// Drops a reported title that mentions the session directory.
fn public_title<'a>(title: Option<&'a str>, dir: &Path) -> Option<&'a str> {
    let dir_name = dir.file_name().and_then(|name| name.to_str())?;
    title.filter(|title| !title.contains(dir_name) && !title.contains(SESSION_DIR_PREFIX))
}

fn translate(err: EngineError, stage: &str) -> ExtractionError {
    match err {
        EngineError::Unavailable(detail) => {
            debug!(stage, %detail, "engine reports video unavailable");
            ExtractionError::NotFound
        }
        EngineError::FormatUnavailable(detail) => {
            debug!(stage, %detail, "engine rejected format");
            ExtractionError::InvalidFormat
        }
        other => {
            warn!(stage, error = %other, "extraction engine failed");
            ExtractionError::BackendFailure(format!("{stage}: {other}"))
        }
    }
}

/// Name the client sees in `Content-Disposition`. Derived from the video
/// title when there is one, restricted to a conservative ASCII subset so
/// the header stays valid.
pub fn client_filename(title: Option<&str>, extension: &str) -> String {
    let stem = title
        .map(|title| {
            let cleaned: String = title
                .chars()
                .map(|c| match c {
                    'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '(' | ')' => c,
                    _ => '_',
                })
                .take(MAX_TITLE_CHARS)
                .collect();
            let collapsed = cleaned
                .split('_')
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("_");
            collapsed.trim_matches('.').to_owned()
        })
        .filter(|stem| !stem.is_empty() && stem != "NA")
        .unwrap_or_else(|| DEFAULT_FILENAME_STEM.to_owned());
    format!("{stem}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RawVariant;
    use crate::testing::FakeEngine;
    use tempfile::tempdir;

    fn client(engine: FakeEngine, root: &std::path::Path) -> ExtractionClient {
        ExtractionClient::new(
            Arc::new(engine),
            TransientStore::open(root).unwrap(),
            Some(Duration::from_secs(5)),
        )
    }

    const URL: &str = "https://www.youtube.com/watch?v=abc123";

    #[tokio::test]
    async fn list_formats_builds_catalog_without_touching_storage() {
        let root = tempdir().unwrap();
        let client = client(FakeEngine::new(), root.path());
        let catalog = client.list_formats(URL).await.unwrap();
        assert!(!catalog.is_empty());
        assert_eq!(client.store().live_sessions(), 0);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn list_formats_without_info_is_not_found() {
        let root = tempdir().unwrap();
        let client = client(FakeEngine::new().without_info(), root.path());
        assert_eq!(
            client.list_formats(URL).await.unwrap_err(),
            ExtractionError::NotFound
        );
    }

    #[tokio::test]
    async fn list_formats_with_only_audio_is_not_found() {
        let root = tempdir().unwrap();
        let engine = FakeEngine::new().with_formats(vec![RawVariant {
            format_id: Some("140".into()),
            ext: Some("mp4".into()),
            vcodec: Some("none".into()),
            acodec: Some("mp4a".into()),
            ..RawVariant::default()
        }]);
        let client = client(engine, root.path());
        assert_eq!(
            client.list_formats(URL).await.unwrap_err(),
            ExtractionError::NotFound
        );
    }

    #[tokio::test]
    async fn list_formats_backend_failure_is_opaque() {
        let root = tempdir().unwrap();
        let client = client(
            FakeEngine::new().failing_probe("boom at /srv/secret"),
            root.path(),
        );
        assert!(matches!(
            client.list_formats(URL).await.unwrap_err(),
            ExtractionError::BackendFailure(_)
        ));
    }

    #[tokio::test]
    async fn materialize_owns_exactly_one_directory() {
        let root = tempdir().unwrap();
        let client = client(FakeEngine::new().with_payload(b"video".to_vec()), root.path());
        let session = Uuid::new_v4();
        let artifact = client.materialize(session, URL, "18").await.unwrap();
        assert_eq!(artifact.session(), session);
        assert_eq!(client.store().live_sessions(), 1);
        assert_eq!(std::fs::read(artifact.path()).unwrap(), b"video");
        assert_eq!(artifact.size_hint, Some(5));
        assert_eq!(artifact.mime_type, "video/mp4");
        assert_eq!(artifact.suggested_filename, "Fake_Video.mp4");
        drop(artifact);
        assert_eq!(client.store().live_sessions(), 0);
    }

    #[tokio::test]
    async fn unknown_format_is_invalid_and_leaves_nothing() {
        let root = tempdir().unwrap();
        let client = client(FakeEngine::new(), root.path());
        let err = client
            .materialize(Uuid::new_v4(), URL, "9999")
            .await
            .unwrap_err();
        assert_eq!(err, ExtractionError::InvalidFormat);
        assert_eq!(client.store().live_sessions(), 0);
    }

    #[tokio::test]
    async fn failed_fetch_removes_partial_output() {
        let root = tempdir().unwrap();
        let client = client(FakeEngine::new().failing_fetch("disk full"), root.path());
        let err = client
            .materialize(Uuid::new_v4(), URL, "18")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::BackendFailure(_)));
        assert_eq!(client.store().live_sessions(), 0);
    }

    #[tokio::test]
    async fn slow_engine_times_out_and_cleans_up() {
        let root = tempdir().unwrap();
        let client = ExtractionClient::new(
            Arc::new(FakeEngine::new().with_delay(Duration::from_secs(30))),
            TransientStore::open(root.path()).unwrap(),
            Some(Duration::from_millis(50)),
        );
        let err = client
            .materialize(Uuid::new_v4(), URL, "18")
            .await
            .unwrap_err();
        match err {
            ExtractionError::BackendFailure(detail) => assert!(detail.contains("timed out")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(client.store().live_sessions(), 0);
    }

    #[tokio::test]
    async fn null_or_empty_format_list_is_not_found() {
        let root = tempdir().unwrap();
        let client = client(FakeEngine::new().with_formats(Vec::new()), root.path());
        assert_eq!(
            client.list_formats(URL).await.unwrap_err(),
            ExtractionError::NotFound
        );
    }

    #[test]
    fn reported_path_must_resolve_inside_session_dir() {
        let root = tempdir().unwrap();
        let session = root.path().join("session-a");
        std::fs::create_dir(&session).unwrap();
        std::fs::write(session.join("media.mp4"), b"ok").unwrap();
        std::fs::write(root.path().join("outside.mp4"), b"secret").unwrap();

        assert!(contained_file(&session, &session.join("../outside.mp4")).is_none());
        assert!(contained_file(&session, &root.path().join("outside.mp4")).is_none());
        assert!(contained_file(&session, &session.join("missing.mp4")).is_none());
        assert_eq!(
            contained_file(&session, &session.join("media.mp4")),
            Some(std::fs::canonicalize(session.join("media.mp4")).unwrap())
        );
    }

    #[test]
    fn titles_naming_the_session_dir_are_dropped() {
        let dir = std::path::Path::new("/srv/downloads/session-1234abcd");
        assert_eq!(
            public_title(Some("/srv/downloads/session-1234abcd/media.mp4"), dir),
            None
        );
        assert_eq!(public_title(Some("session-1234abcd"), dir), None);
        assert_eq!(public_title(Some("Cat video"), dir), Some("Cat video"));
        assert_eq!(
            client_filename(public_title(Some("/tmp/session-9/media.mp4"), dir), "mp4"),
            "youtube_video.mp4"
        );
    }

    #[test]
    fn client_filename_sanitizes_titles() {
        assert_eq!(client_filename(None, "mp4"), "youtube_video.mp4");
        assert_eq!(client_filename(Some("NA"), "mp4"), "youtube_video.mp4");
        assert_eq!(
            client_filename(Some("My \"Great\" Video / Part 2"), "webm"),
            "My_Great_Video_Part_2.webm"
        );
        assert_eq!(client_filename(Some("日本語"), "mp4"), "youtube_video.mp4");
    }
}
