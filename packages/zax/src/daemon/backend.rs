//! Supervision of the backend subprocess.
//!
//! The engine owns the backend's lifetime: it deletes any stale port file
//! *before* spawning, redirects the backend's output into the engine log,
//! waits for the freshly written port, and tears the process down with
//! SIGTERM → grace → SIGKILL on shutdown.

use std::{process::Stdio, time::Duration};

use color_eyre::{
    Result,
    eyre::{Context, OptionExt, bail},
};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::{cache::CacheDir, fs, path::AbsFilePath};

/// How long to wait for the backend to publish its port.
const PORT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period between SIGTERM and SIGKILL at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A running backend process and the port it published.
#[derive(Debug)]
pub struct Backend {
    child: tokio::process::Child,
    pub port: u16,
}

/// Spawn the backend binary for this cache directory and wait for its port.
///
/// The backend binary lives next to the current executable. Failure to spawn
/// is fatal for the engine.
#[instrument]
pub async fn spawn(cache: &CacheDir) -> Result<Backend> {
    // A leftover port file from a previous backend would race the fresh
    // one; delete it before the new process can possibly write.
    fs::remove_file(&cache.port_file()).await?;

    let exe = std::env::current_exe().context("locate current executable")?;
    let bin = exe
        .parent()
        .ok_or_eyre("current executable has no parent directory")?
        .join("zax-store");

    let stdout = open_log(cache).await?;
    let stderr = stdout.try_clone().context("clone log handle")?;

    let child = tokio::process::Command::new(&bin)
        .arg("--cache-dir")
        .arg(cache.root().as_std_path())
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()
        .with_context(|| format!("spawn backend binary {bin:?}"))?;
    info!(pid = child.id(), ?bin, "spawned backend");

    let port = wait_for_port(&cache.port_file()).await?;
    info!(port, "backend published its port");

    Ok(Backend { child, port })
}

async fn open_log(cache: &CacheDir) -> Result<std::fs::File> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(cache.log_file().as_std_path())
        .await
        .context("open engine log for backend output")?;
    Ok(file.into_std().await)
}

/// Poll for the port file, validating its content once present.
///
/// The backend writes the file atomically after binding, so content is never
/// partial: anything unparsable or out of `1..=65535` is corruption, not a
/// race, and fails immediately.
async fn wait_for_port(path: &AbsFilePath) -> Result<u16> {
    let deadline = Instant::now() + PORT_WAIT_TIMEOUT;
    loop {
        if let Some(content) = fs::read_buffered_utf8(path).await? {
            let trimmed = content.trim();
            let port = trimmed
                .parse::<u32>()
                .with_context(|| format!("invalid port file content {trimmed:?}"))?;
            if !(1..=65535).contains(&port) {
                bail!("port file names out-of-range port {port}");
            }
            return Ok(port as u16);
        }

        if Instant::now() >= deadline {
            bail!(
                "backend did not publish {path} within {}s",
                PORT_WAIT_TIMEOUT.as_secs()
            );
        }
        tokio::time::sleep(PORT_POLL_INTERVAL).await;
    }
}

impl Backend {
    /// Stop the backend: SIGTERM, wait out the grace period, escalate to
    /// SIGKILL. Best-effort by design.
    #[instrument(skip(self), fields(pid = self.child.id()))]
    pub async fn shutdown(mut self) {
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
                Ok(status) => {
                    debug!(?status, "backend exited after SIGTERM");
                    return;
                }
                Err(_elapsed) => warn!("backend ignored SIGTERM; escalating"),
            }
        }

        if let Err(err) = self.child.kill().await {
            warn!(?err, "unable to kill backend");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    fn port_file(tmp: &tempfile::TempDir) -> AbsFilePath {
        AbsFilePath::try_from(tmp.path().join("rust.port")).unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn port_file_is_parsed_once_present() {
        let tmp = tempfile::tempdir().unwrap();
        let path = port_file(&tmp);

        let waiter = tokio::spawn({
            let path = path.clone();
            async move { wait_for_port(&path).await }
        });
        tokio::time::sleep(Duration::from_millis(150)).await;
        std::fs::write(path.as_std_path(), "43187\n").unwrap();

        let port = waiter.await.unwrap().unwrap();
        pretty_assert_eq!(port, 43187);
    }

    #[test_log::test(tokio::test)]
    async fn garbage_port_file_fails_fast() {
        let tmp = tempfile::tempdir().unwrap();
        let path = port_file(&tmp);
        std::fs::write(path.as_std_path(), "not-a-port\n").unwrap();

        let err = wait_for_port(&path).await.unwrap_err();
        assert!(err.to_string().contains("invalid port file"));
    }

    #[test_log::test(tokio::test)]
    async fn out_of_range_port_fails_fast() {
        let tmp = tempfile::tempdir().unwrap();
        let path = port_file(&tmp);
        std::fs::write(path.as_std_path(), "0\n").unwrap();

        let err = wait_for_port(&path).await.unwrap_err();
        assert!(err.to_string().contains("out-of-range"));
    }
}
