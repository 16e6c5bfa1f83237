//! Transient storage for materialized downloads.
//!
//! Every download gets its own directory under the transient root, named
//! after a fresh UUID. The directory is wrapped in an [`ArtifactGuard`]
//! which removes it, together with anything the engine left inside
//! (fragments, `.part` files, the merged output), when the guard is dropped.
//! Whoever holds the guard owns the cleanup obligation; moving it moves the
//! obligation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Prefix of every per-session directory. Used to recognize leftovers.
pub const SESSION_DIR_PREFIX: &str = "session-";

/// Name stem the engine writes under inside a session directory.
pub const ARTIFACT_STEM: &str = "media";

/// Root directory that holds in-flight session directories.
#[derive(Debug, Clone)]
pub struct TransientStore {
    root: PathBuf,
}

impl TransientStore {
    /// Creates the root if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating transient root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates a uniquely named, empty session directory.
    pub fn allocate(&self, session: Uuid) -> std::io::Result<ArtifactGuard> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{SESSION_DIR_PREFIX}{session}"))
            .rand_bytes(0)
            .tempdir_in(&self.root)?;
        debug!(dir = %dir.path().display(), "allocated transient directory");
        Ok(ArtifactGuard {
            session,
            dir: Some(dir),
        })
    }

    /// Number of session directories currently on disk.
    pub fn live_sessions(&self) -> usize {
        self.session_dirs().count()
    }

    /// Removes session directories left behind by a previous process. Only
    /// meant for startup, before any request is accepted.
    pub fn sweep_stale(&self) -> usize {
        let mut removed = 0;
        for path in self.session_dirs().collect::<Vec<_>>() {
            match fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(err) => warn!(
                    dir = %path.display(),
                    error = %err,
                    "could not remove stale transient directory"
                ),
            }
        }
        if removed > 0 {
            info!(removed, "swept stale transient directories");
        }
        removed
    }

    fn session_dirs(&self) -> impl Iterator<Item = PathBuf> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(SESSION_DIR_PREFIX))
            })
            .map(|entry| entry.into_path())
    }
}

/// Cleanup obligation for one session directory. Fires exactly once, on
/// drop or on [`ArtifactGuard::release`], whichever comes first.
#[derive(Debug)]
pub struct ArtifactGuard {
    session: Uuid,
    dir: Option<TempDir>,
}

impl ArtifactGuard {
    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Location of the session directory. Internal only: never put this in
    /// anything a client can see.
    pub fn dir(&self) -> &Path {
        // `dir` is only `None` after `release`, which consumes the guard.
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }

    /// Removes the directory now and reports the outcome.
    pub fn release(mut self) -> std::io::Result<()> {
        self.reclaim()
    }

    fn reclaim(&mut self) -> std::io::Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => {
                debug!(session = %self.session, "transient directory removed");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                warn!(
                    session = %self.session,
                    dir = %path.display(),
                    error = %err,
                    "failed to remove transient directory"
                );
                Err(err)
            }
        }
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        let _ = self.reclaim();
    }
}

/// A materialized variant plus the cleanup obligation for its storage.
#[derive(Debug)]
pub struct DownloadArtifact {
    pub(crate) guard: ArtifactGuard,
    pub(crate) path: PathBuf,
    pub size_hint: Option<u64>,
    pub suggested_filename: String,
    pub mime_type: String,
}

impl DownloadArtifact {
    pub fn session(&self) -> Uuid {
        self.guard.session()
    }

    /// Internal location of the bytes.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Picks the engine's output inside `dir` when it did not report a path:
/// the largest regular file that is not an in-progress fragment.
pub fn locate_output(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            !name.ends_with(".part") && !name.ends_with(".ytdl") && !name.ends_with(".temp")
        })
        .filter_map(|entry| {
            let len = entry.metadata().ok()?.len();
            Some((len, entry.into_path()))
        })
        .max_by_key(|(len, _)| *len)
        .map(|(_, path)| path)
}
