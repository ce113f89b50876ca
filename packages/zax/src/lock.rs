//! The cross-process engine bring-up lock.
//!
//! Directory creation is the atomic primitive: whoever `mkdir`s
//! `engine.lock/` holds the lock, and writes its pid inside for stale
//! recovery. The pid file is diagnostic only; correctness rests entirely on
//! the `mkdir`. A file-creation lock would not leave room for that metadata
//! under the same atomic, which is why the directory form is used.

use std::time::Duration;

use color_eyre::{Result, eyre::Context};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::{
    cache::CacheDir,
    fs, mk_rel_file,
    path::{AbsDirPath, AbsFilePath, JoinWith as _},
};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A held engine bring-up lock. Release it with [`EngineLock::release`];
/// releasing is best-effort, and a crashed holder is recovered by the next
/// acquirer through the pid file.
#[derive(Debug)]
pub struct EngineLock {
    dir: AbsDirPath,
}

impl EngineLock {
    /// Acquire the lock for the given cache directory, waiting up to 30
    /// seconds for a live contender to release it.
    pub async fn acquire(cache: &CacheDir) -> Result<Self> {
        Self::acquire_with(cache.lock_dir(), ACQUIRE_TIMEOUT).await
    }

    /// Acquire with an explicit timeout.
    #[instrument(name = "EngineLock::acquire")]
    pub async fn acquire_with(dir: AbsDirPath, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;

        loop {
            if Self::try_create(&dir).await? {
                return Ok(Self { dir });
            }

            // A dead holder is recovered immediately, and acquisition is
            // retried exactly once before falling back to polling.
            if Self::recover_stale(&dir).await? && Self::try_create(&dir).await? {
                return Ok(Self { dir });
            }

            if Instant::now() >= deadline {
                color_eyre::eyre::bail!(
                    "timed out after {}s waiting for engine lock at {dir}",
                    timeout.as_secs()
                );
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Attempt the atomic `mkdir`; on success, record our pid inside.
    async fn try_create(dir: &AbsDirPath) -> Result<bool> {
        match fs::create_dir(dir).await {
            Ok(()) => {
                let pid = std::process::id();
                fs::write(&Self::pid_file(dir), pid.to_string())
                    .await
                    .context("write lock pid")?;
                debug!(?dir, pid, "acquired engine lock");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err).with_context(|| format!("create lock dir {dir:?}")),
        }
    }

    /// Remove the lock if its recorded holder is no longer alive.
    ///
    /// Returns whether a stale lock was cleared. A lock directory without a
    /// readable pid is treated as held: its owner may be between the `mkdir`
    /// and the pid write.
    async fn recover_stale(dir: &AbsDirPath) -> Result<bool> {
        let pid_file = Self::pid_file(dir);
        let Some(content) = fs::read_buffered_utf8(&pid_file).await? else {
            return Ok(false);
        };
        let Ok(pid) = content.trim().parse::<i32>() else {
            warn!(?pid_file, ?content, "unparsable pid in lock; leaving it");
            return Ok(false);
        };

        if process_alive(pid) {
            return Ok(false);
        }

        warn!(pid, ?dir, "recovering stale engine lock from dead process");
        fs::remove_file(&pid_file).await?;
        fs::remove_dir(dir).await?;
        Ok(true)
    }

    /// Release the lock. All cleanup is best-effort.
    #[instrument(name = "EngineLock::release", skip(self), fields(dir = %self.dir))]
    pub async fn release(self) {
        if let Err(err) = fs::remove_file(&Self::pid_file(&self.dir)).await {
            warn!(?err, "unable to remove lock pid file");
        }
        if let Err(err) = fs::remove_dir(&self.dir).await {
            warn!(?err, "unable to remove lock directory");
        }
    }

    fn pid_file(dir: &AbsDirPath) -> AbsFilePath {
        dir.join(mk_rel_file!("pid"))
    }
}

/// Signal-0 liveness probe. `EPERM` means the process exists but belongs to
/// another user, which still counts as alive.
fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    fn lock_dir(tmp: &tempfile::TempDir) -> AbsDirPath {
        AbsDirPath::try_from(tmp.path().join("engine.lock")).unwrap()
    }

    /// A pid that almost certainly does not name a live process: a child
    /// that has already been spawned, exited, and reaped.
    fn dead_pid() -> i32 {
        let child = std::process::Command::new("true")
            .spawn()
            .expect("spawn true");
        let pid = child.id() as i32;
        let mut child = child;
        child.wait().expect("wait for true");
        pid
    }

    #[test_log::test(tokio::test)]
    async fn acquire_then_release_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = lock_dir(&tmp);

        let lock = EngineLock::acquire_with(dir.clone(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(dir.exists().await);
        lock.release().await;
        assert!(!dir.exists().await);
    }

    #[test_log::test(tokio::test)]
    async fn held_lock_blocks_until_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = lock_dir(&tmp);

        let _held = EngineLock::acquire_with(dir.clone(), Duration::from_secs(1))
            .await
            .unwrap();

        let err = EngineLock::acquire_with(dir, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test_log::test(tokio::test)]
    async fn concurrent_acquires_admit_exactly_one_winner() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = lock_dir(&tmp);

        let attempts = (0..8)
            .map(|_| {
                let dir = dir.clone();
                tokio::spawn(async move {
                    EngineLock::acquire_with(dir, Duration::from_millis(200)).await
                })
            })
            .collect::<Vec<_>>();

        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        pretty_assert_eq!(winners, 1);
    }

    #[test_log::test(tokio::test)]
    async fn stale_lock_is_recovered() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = lock_dir(&tmp);

        std::fs::create_dir_all(dir.as_std_path()).unwrap();
        std::fs::write(dir.as_std_path().join("pid"), dead_pid().to_string()).unwrap();

        let lock = EngineLock::acquire_with(dir.clone(), Duration::from_secs(1))
            .await
            .unwrap();
        lock.release().await;
    }

    #[test_log::test(tokio::test)]
    async fn live_lock_is_not_recovered() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = lock_dir(&tmp);

        // A lock held by this very process is definitely alive.
        std::fs::create_dir_all(dir.as_std_path()).unwrap();
        std::fs::write(
            dir.as_std_path().join("pid"),
            std::process::id().to_string(),
        )
        .unwrap();

        let err = EngineLock::acquire_with(dir, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
