//! Filesystem operations tailored to `zax`.
//!
//! Inside this module, we refer to `std::fs` or `tokio::fs` by fully
//! qualified path to make it maximally clear what we are using. Everything
//! outside this module goes through these helpers so that error context and
//! tracing stay uniform.

use std::path::Path;

use color_eyre::{
    Result,
    eyre::{Context, OptionExt},
};
use tap::{Pipe, TapFallible};
use tokio::task::spawn_blocking;
use tracing::{debug, instrument, trace};

use crate::path::{AbsDirPath, AbsFilePath};

/// Determine the canonical cache root for the current user.
///
/// - macOS: `$HOME/Library/Caches/zax`
/// - elsewhere: `$HOME/.cache/zax`
///
/// Per-workspace cache directories live directly underneath, keyed by
/// workspace id.
#[instrument]
pub async fn user_cache_root() -> Result<AbsDirPath> {
    let home = spawn_blocking(homedir::my_home)
        .await
        .context("join task")?
        .context("get user home directory")?
        .ok_or_eyre("user has no home directory")?;

    let base = if cfg!(target_os = "macos") {
        home.join("Library").join("Caches").join("zax")
    } else {
        home.join(".cache").join("zax")
    };

    base.pipe(AbsDirPath::try_from)
        .tap_ok(|dir| debug!(?dir, "user cache root"))
}

/// Create the directory and all its parents, if they don't already exist.
#[instrument]
pub async fn create_dir_all(dir: &AbsDirPath) -> Result<()> {
    tokio::fs::create_dir_all(dir.as_std_path())
        .await
        .with_context(|| format!("create dir: {dir:?}"))
        .tap_ok(|_| trace!(?dir, "create directory"))
}

/// Create a single directory, failing if it already exists.
///
/// This is the atomic primitive behind the engine lock; the distinction
/// between "created" and "already there" is the whole point, so the raw
/// error kind is preserved for the caller.
pub async fn create_dir(dir: &AbsDirPath) -> std::io::Result<()> {
    tokio::fs::create_dir(dir.as_std_path()).await
}

/// Buffer the file content from disk.
/// Returns `None` if the file does not exist.
#[instrument]
pub async fn read_buffered(path: &AbsFilePath) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path.as_std_path()).await {
        Ok(buf) => {
            trace!(?path, bytes = buf.len(), "read file");
            Ok(Some(buf))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(format!("read file: {path:?}")),
    }
}

/// Buffer the file content from disk as UTF-8.
/// Returns `None` if the file does not exist.
#[instrument]
pub async fn read_buffered_utf8(path: &AbsFilePath) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path.as_std_path()).await {
        Ok(buf) => {
            trace!(?path, bytes = buf.len(), "read file as string");
            Ok(Some(buf))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(format!("read file: {path:?}")),
    }
}

/// Buffer the file content from disk as UTF-8, failing if it doesn't exist.
#[instrument]
pub async fn must_read_buffered_utf8(path: &AbsFilePath) -> Result<String> {
    tokio::fs::read_to_string(path.as_std_path())
        .await
        .with_context(|| format!("read file: {path:?}"))
}

/// Write the provided file content to disk.
#[instrument(skip(content))]
pub async fn write(path: &AbsFilePath, content: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(&parent).await?;
    }
    tokio::fs::write(path.as_std_path(), content.as_ref())
        .await
        .with_context(|| format!("write file: {path:?}"))
        .tap_ok(|_| trace!(?path, "write file"))
}

/// Write the provided file content to disk atomically: the content lands in
/// a sibling `.tmp` file which is then renamed into place, so readers never
/// observe a partial file.
#[instrument(skip(content))]
pub async fn write_atomic(path: &AbsFilePath, content: impl AsRef<[u8]>) -> Result<()> {
    let tmp = format!("{}.tmp", path.as_str_lossy());
    let tmp = AbsFilePath::try_from(tmp).context("derive temp path")?;

    tokio::fs::write(tmp.as_std_path(), content.as_ref())
        .await
        .with_context(|| format!("write temp file: {tmp:?}"))?;
    tokio::fs::rename(tmp.as_std_path(), path.as_std_path())
        .await
        .with_context(|| format!("rename {tmp:?} into place"))
        .tap_ok(|_| trace!(?path, "write file atomically"))
}

/// Remove a file, tolerating it not existing.
#[instrument]
pub async fn remove_file(path: &AbsFilePath) -> Result<()> {
    match tokio::fs::remove_file(path.as_std_path()).await {
        Ok(()) => {
            trace!(?path, "remove file");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).context(format!("remove file: {path:?}")),
    }
}

/// Remove an empty directory, tolerating it not existing.
#[instrument]
pub async fn remove_dir(dir: &AbsDirPath) -> Result<()> {
    match tokio::fs::remove_dir(dir.as_std_path()).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).context(format!("remove dir: {dir:?}")),
    }
}

/// Report whether the path names an existing file.
pub async fn is_file(path: impl AsRef<Path>) -> bool {
    tokio::fs::metadata(path.as_ref())
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Report whether the path names an existing directory.
pub async fn is_dir(path: impl AsRef<Path>) -> bool {
    tokio::fs::metadata(path.as_ref())
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// The Unix permission bits of the path, masked to `0o777`.
#[instrument]
pub async fn mode(path: impl AsRef<Path> + std::fmt::Debug) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;

    let meta = tokio::fs::metadata(path.as_ref())
        .await
        .with_context(|| format!("stat {:?}", path.as_ref()))?;
    Ok(meta.permissions().mode() & 0o777)
}

/// Set the Unix permission bits of the path.
#[instrument]
pub async fn set_mode(path: impl AsRef<Path> + std::fmt::Debug, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path.as_ref(), std::fs::Permissions::from_mode(mode))
        .await
        .with_context(|| format!("chmod {:?}", path.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    fn abs_file(dir: &tempfile::TempDir, name: &str) -> AbsFilePath {
        AbsFilePath::try_from(dir.path().join(name)).unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn read_of_missing_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = abs_file(&tmp, "missing.txt");
        pretty_assert_eq!(read_buffered(&path).await.unwrap(), None);
    }

    #[test_log::test(tokio::test)]
    async fn atomic_write_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = abs_file(&tmp, "out.json");

        write_atomic(&path, b"{}").await.unwrap();

        pretty_assert_eq!(
            read_buffered_utf8(&path).await.unwrap(),
            Some("{}".to_string())
        );
        let leftovers = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(".tmp"))
            .count();
        pretty_assert_eq!(leftovers, 0);
    }

    #[test_log::test(tokio::test)]
    async fn remove_file_tolerates_absence() {
        let tmp = tempfile::tempdir().unwrap();
        let path = abs_file(&tmp, "missing.txt");
        remove_file(&path).await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn mode_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("private");
        std::fs::create_dir(&dir).unwrap();

        set_mode(&dir, 0o700).await.unwrap();
        pretty_assert_eq!(mode(&dir).await.unwrap(), 0o700);
    }
}
