//! Spawning the linter.
//!
//! Unlike the test runner, the linter is best-effort: every failure mode is
//! classified into a skip reason and the check continues without findings.

use std::process::Stdio;

use color_eyre::{Result, eyre::Context};
use protocol::check::v1::SkipReason;
use tracing::{debug, instrument};

use crate::{
    path::{AbsDirPath, AbsFilePath},
    runner::{self, PackageManager, ToolExit},
};

/// Stderr fragments that mean the linter binary could not be resolved.
const NOT_FOUND_MARKERS: &[&str] = &[
    "command not found",
    "npx: command not found",
    "eslint: not found",
    "eslint: command not found",
];

/// Stderr fragments that mean the workspace has no lint configuration.
const NO_CONFIG_MARKERS: &[&str] = &["No ESLint configuration", "eslint.config"];

/// The outcome of a linter invocation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LintOutcome {
    /// The linter produced a report. A nonzero exit with output present is
    /// still completion: lint errors are expected.
    Completed { output: AbsFilePath },
    Skipped(SkipReason),
}

/// Build the full argv for an eslint invocation against `target`.
pub fn command(manager: PackageManager, output: &AbsFilePath, target: &str) -> Vec<String> {
    let mut argv = manager
        .runner_prefix()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    argv.extend([
        "eslint".to_string(),
        "-f".to_string(),
        "json".to_string(),
        "-o".to_string(),
        output.as_str_lossy().into_owned(),
        target.to_string(),
    ]);
    argv
}

/// Run eslint in the workspace root, classifying every failure mode.
#[instrument]
pub async fn run(
    manager: PackageManager,
    root: &AbsDirPath,
    output: &AbsFilePath,
    target: &str,
) -> Result<LintOutcome> {
    let argv = command(manager, output, target);
    debug!(?argv, "spawning eslint");

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
            return Ok(LintOutcome::Skipped(SkipReason::NotFound));
        }
        Err(err) => return Err(err).context("spawn eslint"),
    };

    let exit = runner::supervise(child, runner::TOOL_TIMEOUT).await?;
    let (success, stderr) = match exit {
        ToolExit::TimedOut => return Ok(LintOutcome::Skipped(SkipReason::Timeout)),
        ToolExit::Completed { success, stderr } => (success, stderr),
    };

    if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
        return Ok(LintOutcome::Skipped(SkipReason::NotFound));
    }
    if NO_CONFIG_MARKERS.iter().any(|m| stderr.contains(m)) {
        return Ok(LintOutcome::Skipped(SkipReason::NoConfig));
    }
    if !success && !output.exists().await {
        return Ok(LintOutcome::Skipped(SkipReason::Failed));
    }

    Ok(LintOutcome::Completed {
        output: output.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use simple_test_case::test_case;

    fn output() -> AbsFilePath {
        AbsFilePath::try_from("/cache/artifacts/run/eslint.json").unwrap()
    }

    #[test_case(PackageManager::Bun, "packages/app"; "bun_scoped")]
    #[test_case(PackageManager::Npm, "."; "npm_unscoped")]
    #[test]
    fn command_ends_with_the_target(manager: PackageManager, target: &str) {
        let argv = command(manager, &output(), target);
        let prefix = manager.runner_prefix();
        pretty_assert_eq!(&argv[..prefix.len()], prefix);
        pretty_assert_eq!(argv.last().unwrap(), target);
    }

    #[test]
    fn command_requests_json_output() {
        let argv = command(PackageManager::Npm, &output(), ".");
        let json_flag = argv.windows(2).any(|w| w[0] == "-f" && w[1] == "json");
        let out_flag = argv
            .windows(2)
            .any(|w| w[0] == "-o" && w[1] == "/cache/artifacts/run/eslint.json");
        assert!(json_flag);
        assert!(out_flag);
    }
}
