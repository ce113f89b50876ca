//! Spawning the test runner.

use std::process::Stdio;

use tracing::{debug, instrument};

use crate::{
    check::CheckError,
    path::{AbsDirPath, AbsFilePath},
    runner::{self, PackageManager, ToolExit},
};

/// Build the full argv for a vitest invocation.
///
/// A `files` list restricts the run to the affected test files; `None` runs
/// the whole suite.
pub fn command(
    manager: PackageManager,
    output: &AbsFilePath,
    files: Option<&[String]>,
) -> Vec<String> {
    let mut argv = manager
        .runner_prefix()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    argv.push("vitest".to_string());
    argv.push("run".to_string());
    argv.push("--reporter=json".to_string());
    argv.push(format!("--outputFile={}", output.as_str_lossy()));
    if let Some(files) = files {
        argv.extend(files.iter().cloned());
    }
    argv
}

/// Run vitest in the workspace root and wait for it under the watchdog.
///
/// Success means "vitest completed"; whether the output file exists is the
/// caller's concern, because a restricted run that matches no tests can
/// legitimately produce nothing.
#[instrument(skip(files))]
pub async fn run(
    manager: PackageManager,
    root: &AbsDirPath,
    output: &AbsFilePath,
    files: Option<&[String]>,
) -> Result<(), CheckError> {
    let argv = command(manager, output, files);
    debug!(?argv, "spawning vitest");

    let child = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .current_dir(root.as_std_path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(CheckError::VitestNotFound);
        }
        Err(err) => return Err(CheckError::internal(format!("spawn vitest: {err}"))),
    };

    let exit = runner::supervise(child, runner::TOOL_TIMEOUT)
        .await
        .map_err(CheckError::internal)?;

    match exit {
        ToolExit::TimedOut => Err(CheckError::VitestTimeout {
            timeout: runner::TOOL_TIMEOUT,
        }),
        ToolExit::Completed { success, stderr } => {
            if output.exists().await {
                return Ok(());
            }
            if success {
                // A restricted run that matched no tests writes no report.
                return Ok(());
            }
            if stderr.contains("command not found") || stderr.contains("vitest: not found") {
                return Err(CheckError::VitestNotFound);
            }
            Err(CheckError::VitestFailed {
                stderr: runner::truncate_stderr(&stderr),
            })
        }
    }
}
