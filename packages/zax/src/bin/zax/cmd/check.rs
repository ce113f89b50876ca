//! The `check` subcommand: attach to (or start) the workspace engine, run
//! one check, and report the delta.

use std::{process::Stdio, time::Duration};

use clap::Args;
use color_eyre::{Result, eyre::Context};
use protocol::check::v1::{CheckRequest, CheckSummary};
use tracing::{debug, info, warn};

use zax::{
    cache::CacheDir,
    check::exit_code,
    client::EngineClient,
    fs,
    lock::EngineLock,
    path::AbsDirPath,
    workspace::Workspace,
};

/// How long to wait for a freshly spawned engine's socket to become healthy.
const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Args, Debug)]
pub struct Options {
    /// Force a full test run, bypassing affected-test selection
    #[arg(long, default_value_t = false)]
    deopt: bool,

    /// Restrict the delta to a package path relative to the workspace root
    #[arg(short = 'p', long = "package")]
    package: Option<String>,
}

pub async fn exec(options: Options) -> Result<u8> {
    let start = AbsDirPath::current().context("get working directory")?;
    let workspace = Workspace::discover(&start)
        .await
        .context("discover workspace")?;
    info!(%workspace, id = %workspace.id, "resolved workspace");

    let package_scope = options.package.clone().or(workspace.package_scope.clone());

    let cache = CacheDir::for_workspace(&workspace.id).await?;
    cache.ensure().await?;

    let client = attach_engine(&cache).await?;

    let request = CheckRequest::builder()
        .workspace_id(workspace.id.clone())
        .workspace_root(workspace.root.as_std_path())
        .maybe_package_scope(package_scope)
        .deopt(options.deopt)
        .build();
    let summary = client.check(&request).await?;

    print!("{}", render(&summary, options.deopt));
    Ok(exit_code(&summary))
}

/// Attach to the workspace engine, starting one if the socket is not
/// answering. Bring-up is serialized by the cross-process engine lock, so
/// concurrent CLI invocations cannot race a second daemon into existence.
async fn attach_engine(cache: &CacheDir) -> Result<EngineClient> {
    let lock = EngineLock::acquire(cache).await?;

    let client = EngineClient::new(cache.socket_file());
    if client.healthy().await {
        lock.release().await;
        return Ok(client);
    }

    // Nothing is answering: whatever left this socket (and pid file) behind
    // is dead. Clear the stale socket and bring up a fresh engine.
    if cache.socket_file().exists().await {
        warn!(socket = %cache.socket_file(), "removing stale engine socket");
        fs::remove_file(&cache.socket_file()).await?;
    }

    if let Err(err) = spawn_engine(cache) {
        lock.release().await;
        return Err(err);
    }

    let ready = client.wait_healthy(ENGINE_READY_TIMEOUT).await;
    lock.release().await;
    ready?;

    Ok(client)
}

/// Start the engine daemon as a detached child of this process.
fn spawn_engine(cache: &CacheDir) -> Result<()> {
    let exe = std::env::current_exe().context("locate current executable")?;
    let child = std::process::Command::new(exe)
        .arg("engine")
        .arg("--cache-dir")
        .arg(cache.root().as_std_path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn engine daemon")?;
    debug!(pid = child.id(), "spawned engine");
    Ok(())
}

/// Render the summary in the fixed report format.
fn render(summary: &CheckSummary, deopt: bool) -> String {
    let mut out = String::new();

    if !deopt {
        out.push_str(&format!(
            "Δ {} files changed → {} tests affected\n",
            summary.dirty_count, summary.affected_count
        ));
    }
    if summary.eslint_skipped {
        let reason = summary
            .eslint_skip_reason
            .map(|reason| reason.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        out.push_str(&format!("eslint: skipped ({reason})\n"));
    }
    if summary.vitest_skipped {
        out.push_str("No tests affected, skipping vitest\n");
    }

    out.push_str(&format!(
        "{} new failures, {} fixed | {} new findings, {} fixed\n",
        summary.new_test_failures,
        summary.fixed_test_failures,
        summary.new_findings,
        summary.fixed_findings
    ));

    let verdict = if summary.vitest_failed_total == 0 {
        "all"
    } else {
        "some"
    };
    let skipped = if summary.skipped_count > 0 {
        format!(" (skipped {} unaffected)", summary.skipped_count)
    } else {
        String::new()
    };
    out.push_str(&format!(
        "{verdict} tests passed in {}s{skipped}\n",
        summary.duration_secs
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use protocol::check::v1::SkipReason;

    fn base_summary() -> CheckSummary {
        CheckSummary::builder()
            .new_test_failures(0)
            .fixed_test_failures(0)
            .new_findings(0)
            .fixed_findings(0)
            .build()
    }

    #[test]
    fn clean_run_renders_two_lines() {
        let mut summary = base_summary();
        summary.dirty_count = 3;
        summary.affected_count = 2;
        summary.duration_secs = 4;

        let rendered = render(&summary, false);
        pretty_assert_eq!(
            rendered,
            "Δ 3 files changed → 2 tests affected\n\
             0 new failures, 0 fixed | 0 new findings, 0 fixed\n\
             all tests passed in 4s\n"
        );
    }

    #[test]
    fn deopt_omits_the_delta_line() {
        let summary = base_summary();
        let rendered = render(&summary, true);
        assert!(!rendered.contains("files changed"));
    }

    #[test]
    fn failures_render_with_counts() {
        let mut summary = base_summary();
        summary.new_test_failures = 2;
        summary.vitest_failed_total = 2;

        let rendered = render(&summary, false);
        assert!(rendered.contains("2 new failures, 0 fixed | 0 new findings, 0 fixed\n"));
        assert!(rendered.contains("some tests passed"));
    }

    #[test]
    fn skipped_tools_are_reported() {
        let mut summary = base_summary();
        summary.eslint_skipped = true;
        summary.eslint_skip_reason = Some(SkipReason::NoConfig);
        summary.vitest_skipped = true;
        summary.new_findings = 3;

        let rendered = render(&summary, false);
        assert!(rendered.contains("eslint: skipped (no config)\n"));
        assert!(rendered.contains("No tests affected, skipping vitest\n"));
        assert!(rendered.contains("0 new failures, 0 fixed | 3 new findings, 0 fixed\n"));
    }

    #[test]
    fn unaffected_tests_are_counted_in_the_verdict_line() {
        let mut summary = base_summary();
        summary.skipped_count = 7;
        summary.duration_secs = 1;

        let rendered = render(&summary, false);
        assert!(rendered.contains("all tests passed in 1s (skipped 7 unaffected)\n"));
    }
}
