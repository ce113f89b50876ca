//! Version 1 of the backend RPC surface.
//!
//! Every RPC is unary request/response JSON over localhost TCP. The backend
//! owns the artifact store; the engine is its only client.

use std::path::PathBuf;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::{WorkspaceId, artifacts::v1::ArtifactManifest};

/// Response to `Ping`: liveness plus version echo.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    pub version: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Builder)]
pub struct IngestManifestRequest {
    pub manifest: ArtifactManifest,

    /// Forward-slash path of the package the check was scoped to, if any.
    #[builder(into)]
    pub package_scope: Option<String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct IngestManifestResponse {}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Builder)]
pub struct DeltaSummaryRequest {
    pub workspace_id: WorkspaceId,

    #[builder(into)]
    pub package_scope: Option<String>,
}

/// Set-difference counts between the latest run and its predecessor.
///
/// A baseline run (no predecessor) reports `fixed = 0` and `new` equal to
/// the full size of the latest run's sets.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeltaSummary {
    pub new_test_failures: u64,
    pub fixed_test_failures: u64,
    pub new_findings: u64,
    pub fixed_findings: u64,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Builder)]
pub struct AffectedTestsRequest {
    pub workspace_id: WorkspaceId,

    /// Root of the workspace on disk. The backend derives the dirty-file set
    /// from VCS state under this root on demand.
    #[builder(into)]
    pub workspace_root: PathBuf,

    /// Bypass affected-test selection and run everything.
    #[builder(default)]
    pub force_full: bool,

    #[builder(into)]
    pub package_scope: Option<String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AffectedTestsResponse {
    /// Workspace-root-relative paths reported changed by the VCS.
    pub dirty_files: Vec<String>,

    /// Test files judged worth running. Empty with `is_full_run` set means
    /// "run everything"; empty without it means "skip the runner".
    pub test_files: Vec<String>,

    pub is_full_run: bool,

    /// Total number of test files known in the workspace, so callers can
    /// report how many were skipped as unaffected.
    pub total_test_files: u64,
}
