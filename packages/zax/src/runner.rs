//! Spawning and supervising the external tools.
//!
//! Tools run in the detected package manager's runner convention, under a
//! wall-clock watchdog. A tool that exceeds its budget is terminated with
//! SIGTERM, given a short grace period, then killed.

use std::time::Duration;

use color_eyre::{Result, eyre::Context};
use tokio::{io::AsyncReadExt, process::Child};
use tracing::{debug, instrument, warn};

pub mod eslint;
pub mod manager;
pub mod normalize;
pub mod vitest;

pub use manager::PackageManager;

/// Wall-clock budget for each external tool.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period between SIGTERM and SIGKILL when a tool is over budget.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// The result of waiting on a spawned tool.
#[derive(Debug)]
pub(crate) enum ToolExit {
    /// The tool exited on its own.
    Completed {
        success: bool,
        stderr: String,
    },
    /// The watchdog fired and the tool was terminated.
    TimedOut,
}

/// Wait for a child process under the tool watchdog, collecting stderr.
///
/// Stdout and stderr must have been piped by the caller; both are drained
/// concurrently so the child can never block on a full pipe.
#[instrument(skip(child))]
pub(crate) async fn supervise(mut child: Child, timeout: Duration) -> Result<ToolExit> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let drain_stdout = tokio::spawn(async move {
        let mut sink = Vec::new();
        if let Some(mut stdout) = stdout {
            let _ = stdout.read_to_end(&mut sink).await;
        }
    });
    let collect_stderr = tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buffer).await;
        }
        String::from_utf8_lossy(&buffer).into_owned()
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.context("wait for tool")?,
        Err(_elapsed) => {
            warn!(timeout = ?timeout, "tool exceeded its time budget; terminating");
            terminate(&mut child).await;
            drain_stdout.abort();
            collect_stderr.abort();
            return Ok(ToolExit::TimedOut);
        }
    };

    let _ = drain_stdout.await;
    let stderr = collect_stderr.await.unwrap_or_default();
    debug!(?status, stderr_bytes = stderr.len(), "tool exited");

    Ok(ToolExit::Completed {
        success: status.success(),
        stderr,
    })
}

/// SIGTERM the child, wait out the grace period, then SIGKILL.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    if let Err(err) = child.kill().await {
        warn!(?err, "unable to kill tool process");
    }
}

/// Truncate tool stderr for inclusion in error messages.
pub(crate) fn truncate_stderr(stderr: &str) -> String {
    const LIMIT: usize = 2048;
    if stderr.len() <= LIMIT {
        return stderr.trim_end().to_string();
    }
    let mut end = LIMIT;
    while !stderr.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &stderr[..end])
}
