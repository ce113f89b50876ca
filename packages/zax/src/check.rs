//! The check pipeline and its error taxonomy.
//!
//! One check: affected-test selection → tool spawns → path normalization →
//! manifest ingestion → delta summary. Every failure mode surfaces as a
//! [`CheckError`] kind with a fixed HTTP status, so the daemon and the CLI
//! agree on what went wrong.

use std::time::Duration;

use enum_assoc::Assoc;
use http::StatusCode;
use protocol::{
    artifacts::v1::{Artifact, ArtifactKind, ArtifactManifest},
    check::v1::{CheckRequest, CheckSummary},
    rpc::v1::{AffectedTestsRequest, DeltaSummaryRequest, IngestManifestRequest},
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    cache::CacheDir,
    client::{RpcError, StoreClient},
    fs,
    path::{AbsDirPath, AbsFilePath, TryJoinWith as _},
    runner::{PackageManager, eslint, eslint::LintOutcome, normalize, vitest},
};

/// A classified check failure.
///
/// The kind string is the stable cross-process name of the failure; the
/// status is what the engine's HTTP surface answers with.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display, Assoc)]
#[func(pub const fn status(&self) -> StatusCode)]
#[func(pub const fn kind(&self) -> &'static str)]
pub enum CheckError {
    #[assoc(status = StatusCode::CONFLICT)]
    #[assoc(kind = "CONCURRENT_CHECK")]
    #[display("check already in progress")]
    ConcurrentCheck,

    #[assoc(status = StatusCode::INTERNAL_SERVER_ERROR)]
    #[assoc(kind = "DEPS_NOT_INSTALLED")]
    #[display("dependencies are not installed; run `{install_command}` first")]
    DepsNotInstalled { install_command: &'static str },

    #[assoc(status = StatusCode::INTERNAL_SERVER_ERROR)]
    #[assoc(kind = "VITEST_NOT_FOUND")]
    #[display("vitest could not be resolved; is it installed in this workspace?")]
    VitestNotFound,

    #[assoc(status = StatusCode::GATEWAY_TIMEOUT)]
    #[assoc(kind = "VITEST_TIMEOUT")]
    #[display("vitest exceeded its {}s budget and was terminated", timeout.as_secs())]
    VitestTimeout { timeout: Duration },

    #[assoc(status = StatusCode::INTERNAL_SERVER_ERROR)]
    #[assoc(kind = "VITEST_FAILED")]
    #[display("vitest failed without producing a report: {stderr}")]
    VitestFailed { stderr: String },

    #[assoc(status = StatusCode::INTERNAL_SERVER_ERROR)]
    #[assoc(kind = "PARSE_ERROR")]
    #[display("tool output did not match the expected schema: {message}")]
    Parse { message: String },

    #[assoc(status = StatusCode::GATEWAY_TIMEOUT)]
    #[assoc(kind = "RPC_TIMEOUT")]
    #[display("backend RPC exceeded its deadline: {message}")]
    RpcTimeout { message: String },

    #[assoc(status = StatusCode::INTERNAL_SERVER_ERROR)]
    #[assoc(kind = "INTERNAL")]
    #[display("{message}")]
    Internal { message: String },
}

impl CheckError {
    /// Wrap an unclassified failure.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal {
            message: format!("{err:#}"),
        }
    }
}

impl From<RpcError> for CheckError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Timeout => CheckError::RpcTimeout {
                message: "no response within the deadline".to_string(),
            },
            RpcError::Status { code, message } if code == StatusCode::UNPROCESSABLE_ENTITY => {
                CheckError::Parse { message }
            }
            other => CheckError::internal(other),
        }
    }
}

/// The CLI exit code for a summary: zero only when nothing regressed.
pub fn exit_code(summary: &CheckSummary) -> u8 {
    if summary.new_test_failures == 0 && summary.new_findings == 0 {
        0
    } else {
        1
    }
}

/// Run one check end to end. The caller is responsible for mutual exclusion;
/// this function assumes it is the only check in flight for the workspace.
#[instrument(skip(cache, store, request), fields(workspace_id = %request.workspace_id))]
pub async fn run(
    cache: &CacheDir,
    store: &StoreClient,
    request: &CheckRequest,
) -> Result<CheckSummary, CheckError> {
    let started = std::time::Instant::now();
    let root = AbsDirPath::try_from(&request.workspace_root).map_err(CheckError::internal)?;

    let manager = PackageManager::detect(&root).await;
    if !fs::is_dir(root.as_std_path().join("node_modules")).await {
        return Err(CheckError::DepsNotInstalled {
            install_command: manager.install_command(),
        });
    }

    let run_id = Uuid::new_v4();
    let run_dir = cache.run_artifacts_dir(run_id).map_err(CheckError::internal)?;
    fs::create_dir_all(&run_dir)
        .await
        .map_err(CheckError::internal)?;

    let affected = store
        .affected_tests(
            &AffectedTestsRequest::builder()
                .workspace_id(request.workspace_id.clone())
                .workspace_root(request.workspace_root.clone())
                .force_full(request.deopt)
                .maybe_package_scope(request.package_scope.clone())
                .build(),
        )
        .await?;

    // Test runner: full, restricted, or skipped outright.
    let vitest_output = run_dir
        .try_join_file("vitest.json")
        .map_err(CheckError::internal)?;
    let vitest_skipped = if affected.is_full_run {
        vitest::run(manager, &root, &vitest_output, None).await?;
        false
    } else if !affected.test_files.is_empty() {
        vitest::run(manager, &root, &vitest_output, Some(&affected.test_files)).await?;
        false
    } else {
        true
    };

    let mut vitest_failed_total = 0;
    let vitest_report_ready = !vitest_skipped && vitest_output.exists().await;
    if vitest_report_ready {
        vitest_failed_total = normalize::vitest_report(&vitest_output, &root)
            .await
            .map_err(|err| CheckError::Parse {
                message: format!("{err:#}"),
            })?;
    }

    // Linter: always attempted; classified skips keep the check going.
    let eslint_output = run_dir
        .try_join_file("eslint.json")
        .map_err(CheckError::internal)?;
    let target = request.package_scope.as_deref().unwrap_or(".");
    let lint = eslint::run(manager, &root, &eslint_output, target)
        .await
        .map_err(CheckError::internal)?;
    let (eslint_skipped, eslint_skip_reason, eslint_report_ready) = match lint {
        LintOutcome::Completed { ref output } => {
            let ready = output.exists().await;
            if ready {
                normalize::eslint_report(output, &root)
                    .await
                    .map_err(|err| CheckError::Parse {
                        message: format!("{err:#}"),
                    })?;
            }
            (false, None, ready)
        }
        LintOutcome::Skipped(reason) => (true, Some(reason), false),
    };

    // Manifest: one entry per report that actually exists.
    let mut artifacts = Vec::new();
    if vitest_report_ready {
        artifacts.push(
            build_artifact(run_id, "vitest", ArtifactKind::TestFailure, &vitest_output).await?,
        );
    }
    if eslint_report_ready {
        artifacts
            .push(build_artifact(run_id, "eslint", ArtifactKind::Finding, &eslint_output).await?);
    }

    let manifest = ArtifactManifest::builder()
        .workspace_id(request.workspace_id.clone())
        .run_id(run_id)
        .artifacts(artifacts)
        .build();
    store
        .ingest_manifest(
            &IngestManifestRequest::builder()
                .manifest(manifest)
                .maybe_package_scope(request.package_scope.clone())
                .build(),
        )
        .await?;

    let delta = store
        .delta_summary(
            &DeltaSummaryRequest::builder()
                .workspace_id(request.workspace_id.clone())
                .maybe_package_scope(request.package_scope.clone())
                .build(),
        )
        .await?;

    let affected_count = if affected.is_full_run {
        affected.total_test_files
    } else {
        affected.test_files.len() as u64
    };
    let skipped_count = if affected.is_full_run {
        0
    } else {
        affected
            .total_test_files
            .saturating_sub(affected.test_files.len() as u64)
    };

    let summary = CheckSummary::builder()
        .new_test_failures(delta.new_test_failures)
        .fixed_test_failures(delta.fixed_test_failures)
        .new_findings(delta.new_findings)
        .fixed_findings(delta.fixed_findings)
        .eslint_skipped(eslint_skipped)
        .maybe_eslint_skip_reason(eslint_skip_reason)
        .vitest_skipped(vitest_skipped)
        .affected_count(affected_count)
        .skipped_count(skipped_count)
        .dirty_count(affected.dirty_files.len() as u64)
        .vitest_failed_total(vitest_failed_total)
        .duration_secs(started.elapsed().as_secs())
        .build();

    info!(
        run_id = %run_id,
        new_failures = summary.new_test_failures,
        new_findings = summary.new_findings,
        "check complete"
    );
    Ok(summary)
}

/// Hash a report file and describe it for the manifest.
async fn build_artifact(
    run_id: Uuid,
    tool: &str,
    kind: ArtifactKind,
    path: &AbsFilePath,
) -> Result<Artifact, CheckError> {
    let content = fs::read_buffered(path)
        .await
        .map_err(CheckError::internal)?
        .ok_or_else(|| CheckError::internal(format!("report {path} disappeared before hashing")))?;

    Ok(Artifact::builder()
        .artifact_id(format!("{run_id}-{tool}"))
        .kind(kind)
        .path(path.as_std_path())
        .hash(hex::encode(blake3::hash(&content).as_bytes()))
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use simple_test_case::test_case;

    fn summary(new_failures: u64, new_findings: u64) -> CheckSummary {
        CheckSummary::builder()
            .new_test_failures(new_failures)
            .fixed_test_failures(0)
            .new_findings(new_findings)
            .fixed_findings(0)
            .build()
    }

    #[test_case(0, 0, 0; "clean")]
    #[test_case(1, 0, 1; "new_failures")]
    #[test_case(0, 3, 1; "new_findings")]
    #[test_case(2, 2, 1; "both")]
    #[test]
    fn exit_codes(new_failures: u64, new_findings: u64, expected: u8) {
        pretty_assert_eq!(exit_code(&summary(new_failures, new_findings)), expected);
    }

    #[test]
    fn statuses_follow_the_taxonomy() {
        pretty_assert_eq!(CheckError::ConcurrentCheck.status(), StatusCode::CONFLICT);
        pretty_assert_eq!(
            CheckError::VitestTimeout {
                timeout: Duration::from_secs(300)
            }
            .status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        pretty_assert_eq!(
            CheckError::RpcTimeout {
                message: String::new()
            }
            .status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        pretty_assert_eq!(
            CheckError::DepsNotInstalled {
                install_command: "npm install"
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn concurrent_check_message_is_the_contract_body() {
        pretty_assert_eq!(
            CheckError::ConcurrentCheck.to_string(),
            "check already in progress"
        );
    }

    #[test]
    fn deps_error_names_the_install_command() {
        let err = CheckError::DepsNotInstalled {
            install_command: "pnpm install",
        };
        assert!(err.to_string().contains("pnpm install"));
    }

    #[test]
    fn rpc_timeouts_map_to_the_timeout_kind() {
        let err = CheckError::from(RpcError::Timeout);
        pretty_assert_eq!(err.kind(), "RPC_TIMEOUT");
    }

    #[test]
    fn backend_rejections_map_to_parse_errors() {
        let err = CheckError::from(RpcError::Status {
            code: StatusCode::UNPROCESSABLE_ENTITY,
            message: "bad report".to_string(),
        });
        pretty_assert_eq!(err.kind(), "PARSE_ERROR");
    }
}
