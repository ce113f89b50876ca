//! Version 1 of the engine HTTP surface, served over the per-workspace
//! Unix socket.

use std::{fmt, path::PathBuf};

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::WorkspaceId;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Builder)]
pub struct CheckRequest {
    pub workspace_id: WorkspaceId,

    /// Root of the workspace; must name an existing directory.
    #[builder(into)]
    pub workspace_root: PathBuf,

    #[builder(into)]
    #[serde(default)]
    pub package_scope: Option<String>,

    /// Force a full test run, bypassing affected-test selection.
    #[builder(default)]
    #[serde(default)]
    pub deopt: bool,
}

/// Why a tool produced no usable output.
///
/// A classified skip is not an error: the check continues and reports the
/// reason in the summary.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    #[serde(rename = "timeout")]
    Timeout,

    #[serde(rename = "not found")]
    NotFound,

    #[serde(rename = "no config")]
    NoConfig,

    #[serde(rename = "failed")]
    Failed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Timeout => "timeout",
            SkipReason::NotFound => "not found",
            SkipReason::NoConfig => "no config",
            SkipReason::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The result of one check run: the delta plus enough context for the CLI
/// to render its report.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Builder)]
pub struct CheckSummary {
    pub new_test_failures: u64,
    pub fixed_test_failures: u64,
    pub new_findings: u64,
    pub fixed_findings: u64,

    #[builder(default)]
    pub eslint_skipped: bool,
    pub eslint_skip_reason: Option<SkipReason>,

    #[builder(default)]
    pub vitest_skipped: bool,

    /// Number of test files selected for this run.
    #[builder(default)]
    pub affected_count: u64,

    /// Number of known test files not selected (0 on a full run).
    #[builder(default)]
    pub skipped_count: u64,

    /// Number of VCS-dirty files observed.
    #[builder(default)]
    pub dirty_count: u64,

    /// Absolute count of failed tests in this run, regardless of delta.
    #[builder(default)]
    pub vitest_failed_total: u64,

    #[builder(default)]
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}
