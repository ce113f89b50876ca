//! The per-workspace cache directory and its well-known files.
//!
//! One directory per workspace id, private to the user (`0700`). Everything
//! the daemon and backend persist lives here: the bring-up lock, the engine
//! pid and log, the Unix socket, the backend port file, run artifacts, and
//! the SQLite database.

use color_eyre::{Result, eyre::bail};
use derive_more::Display;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    fs, mk_rel_dir, mk_rel_file,
    path::{AbsDirPath, AbsFilePath, JoinWith as _, TryJoinWith as _},
};

/// The permission bits required on the cache directory.
const CACHE_DIR_MODE: u32 = 0o700;

#[derive(Clone, Eq, PartialEq, Debug, Display)]
#[display("{root}")]
pub struct CacheDir {
    root: AbsDirPath,
}

impl CacheDir {
    /// The cache directory for a workspace id, under the user cache root.
    ///
    /// This computes the path only; call [`CacheDir::ensure`] to create it.
    #[instrument(name = "CacheDir::for_workspace")]
    pub async fn for_workspace(id: &protocol::WorkspaceId) -> Result<Self> {
        let root = fs::user_cache_root().await?.try_join_dir(id.as_str())?;
        Ok(Self { root })
    }

    /// Wrap an existing cache directory path, as handed to the engine.
    pub fn at(root: AbsDirPath) -> Self {
        Self { root }
    }

    /// Create the directory if needed and enforce its private mode.
    ///
    /// A pre-existing directory with any mode other than `0700` is a fatal
    /// configuration error: the cache holds a Unix socket and a database
    /// that must not be reachable by other users.
    #[instrument(name = "CacheDir::ensure", skip(self), fields(root = %self.root))]
    pub async fn ensure(&self) -> Result<()> {
        if !fs::is_dir(self.root.as_std_path()).await {
            fs::create_dir_all(&self.root).await?;
            fs::set_mode(self.root.as_std_path(), CACHE_DIR_MODE).await?;
            return Ok(());
        }

        let mode = fs::mode(self.root.as_std_path()).await?;
        if mode != CACHE_DIR_MODE {
            bail!(
                "configuration error: cache directory {} has mode {mode:03o}, expected {CACHE_DIR_MODE:03o}",
                self.root
            );
        }
        Ok(())
    }

    pub fn root(&self) -> &AbsDirPath {
        &self.root
    }

    /// The bring-up lock directory (`engine.lock/`).
    pub fn lock_dir(&self) -> AbsDirPath {
        self.root.join(mk_rel_dir!("engine.lock"))
    }

    /// The engine pid file.
    pub fn pid_file(&self) -> AbsFilePath {
        self.root.join(mk_rel_file!("engine.pid"))
    }

    /// The append-only engine log.
    pub fn log_file(&self) -> AbsFilePath {
        self.root.join(mk_rel_file!("engine.log"))
    }

    /// The Unix stream socket the engine serves on.
    pub fn socket_file(&self) -> AbsFilePath {
        self.root.join(mk_rel_file!("zax.sock"))
    }

    /// The plain-text TCP port file published by the backend.
    pub fn port_file(&self) -> AbsFilePath {
        self.root.join(mk_rel_file!("rust.port"))
    }

    /// The SQLite database owned by the backend.
    pub fn db_file(&self) -> AbsFilePath {
        self.root.join(mk_rel_file!("state.db"))
    }

    /// The root of all run artifact directories.
    pub fn artifacts_dir(&self) -> AbsDirPath {
        self.root.join(mk_rel_dir!("artifacts"))
    }

    /// The artifact directory for one run.
    pub fn run_artifacts_dir(&self, run_id: Uuid) -> Result<AbsDirPath> {
        self.artifacts_dir().try_join_dir(run_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    fn cache_in(tmp: &tempfile::TempDir) -> CacheDir {
        CacheDir::at(AbsDirPath::try_from(tmp.path().join("cache")).unwrap())
    }

    #[test_log::test(tokio::test)]
    async fn ensure_creates_a_private_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(&tmp);

        cache.ensure().await.unwrap();

        let mode = fs::mode(cache.root().as_std_path()).await.unwrap();
        pretty_assert_eq!(mode, 0o700);
    }

    #[test_log::test(tokio::test)]
    async fn ensure_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(&tmp);

        cache.ensure().await.unwrap();
        cache.ensure().await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn ensure_refuses_a_shared_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(&tmp);

        std::fs::create_dir_all(cache.root().as_std_path()).unwrap();
        fs::set_mode(cache.root().as_std_path(), 0o755).await.unwrap();

        let err = cache.ensure().await.unwrap_err();
        assert!(err.to_string().contains("configuration error"));
    }

    #[test]
    fn well_known_files_live_under_the_root() {
        let root = AbsDirPath::try_from("/cache/0123456789abcdef").unwrap();
        let cache = CacheDir::at(root.clone());

        for file in [
            cache.pid_file(),
            cache.log_file(),
            cache.socket_file(),
            cache.port_file(),
            cache.db_file(),
        ] {
            assert!(root.contains(&file));
        }
        assert!(root.contains(&cache.lock_dir()));
        assert!(root.contains(&cache.artifacts_dir()));
    }
}
