#![forbid(unsafe_code)]

//! Startup hardening for the proxy backend.

use std::path::Path;

use anyhow::{Context, Result, bail};
use nix::unistd::Uid;

/// Fails fast when the backend is started as root. The extraction engine
/// runs arbitrary upstream-driven code paths and writes files, so it must
/// live under an unprivileged account.
pub fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::current().is_root() {
        bail!("{process} must not be run as root; start it under an unprivileged account");
    }
    Ok(())
}

/// Restricts the transient root to its owner so in-flight artifacts are not
/// readable by other local users.
#[cfg(unix)]
pub fn restrict_transient_root(root: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata =
        std::fs::metadata(root).with_context(|| format!("inspecting {}", root.display()))?;
    if !metadata.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    let mut perms = metadata.permissions();
    if perms.mode() & 0o777 != 0o700 {
        perms.set_mode(0o700);
        std::fs::set_permissions(root, perms)
            .with_context(|| format!("restricting permissions on {}", root.display()))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn restrict_transient_root(root: &Path) -> Result<()> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn transient_root_becomes_owner_only() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("downloads");
        std::fs::create_dir(&root).unwrap();
        std::fs::set_permissions(&root, std::fs::Permissions::from_mode(0o755)).unwrap();

        restrict_transient_root(&root).unwrap();
        let mode = std::fs::metadata(&root).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn regular_file_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(restrict_transient_root(&file).is_err());
    }
}
