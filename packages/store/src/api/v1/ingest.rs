use std::path::PathBuf;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use color_eyre::{Report, eyre::Context};
use protocol::{
    artifacts::v1::{Artifact, ArtifactKind},
    rpc::v1::{IngestManifestRequest, IngestManifestResponse},
};
use tracing::{error, info, warn};

use crate::{
    api::ServiceState,
    db::RunRecord,
    ingest::{parse_eslint, parse_vitest},
};

/// Ingest one run's artifact manifest.
///
/// Every artifact path must resolve inside `artifacts/<run_id>/` under the
/// cache directory, and its content hash must match the manifest. All rows
/// land in a single transaction together with the `runs` row.
#[tracing::instrument(skip(state, request), fields(run_id = %request.manifest.run_id))]
pub async fn handle(
    State(state): State<ServiceState>,
    Json(request): Json<IngestManifestRequest>,
) -> IngestResponse {
    let manifest = &request.manifest;
    let run_dir = state.artifacts_root.join(manifest.run_id.to_string());

    let mut failures = Vec::new();
    let mut findings = Vec::new();
    for artifact in &manifest.artifacts {
        if !artifact.path.starts_with(&run_dir) {
            warn!(path = ?artifact.path, "artifact path outside the run directory");
            return IngestResponse::InvalidPath(artifact.path.clone());
        }

        let content = match tokio::fs::read(&artifact.path)
            .await
            .with_context(|| format!("read artifact {:?}", artifact.path))
        {
            Ok(content) => content,
            Err(err) => {
                error!(?err, "unable to read artifact");
                return IngestResponse::Internal(err);
            }
        };

        let actual = hex::encode(blake3::hash(&content).as_bytes());
        if actual != artifact.hash {
            warn!(path = ?artifact.path, "artifact content hash mismatch");
            return IngestResponse::HashMismatch(artifact.clone());
        }

        match artifact.kind {
            ArtifactKind::TestFailure => match parse_vitest(&content) {
                Ok((rows, _)) => failures.extend(rows),
                Err(err) => return IngestResponse::Unparsable(err),
            },
            ArtifactKind::Finding => match parse_eslint(&content) {
                Ok(rows) => findings.extend(rows),
                Err(err) => return IngestResponse::Unparsable(err),
            },
        }
    }

    let record = RunRecord {
        run_id: manifest.run_id,
        workspace_id: manifest.workspace_id.clone(),
        package_scope: request.package_scope.clone().unwrap_or_default(),
        started_at: jiff::Timestamp::now().as_millisecond(),
    };

    let mut db = state.db.lock().await;
    match db.ingest(&record, &failures, &findings) {
        Ok(()) => {
            info!(
                failures = failures.len(),
                findings = findings.len(),
                "manifest ingested"
            );
            IngestResponse::Success
        }
        Err(err) => {
            error!(?err, "manifest ingestion failed");
            IngestResponse::Internal(err)
        }
    }
}

#[derive(Debug)]
pub enum IngestResponse {
    Success,
    InvalidPath(PathBuf),
    HashMismatch(Artifact),
    Unparsable(Report),
    Internal(Report),
}

impl IntoResponse for IngestResponse {
    fn into_response(self) -> axum::response::Response {
        let error = |status: StatusCode, message: String| {
            (status, Json(serde_json::json!({ "error": message }))).into_response()
        };
        match self {
            IngestResponse::Success => Json(IngestManifestResponse::default()).into_response(),
            IngestResponse::InvalidPath(path) => error(
                StatusCode::BAD_REQUEST,
                format!("artifact path {path:?} is outside the run's artifact directory"),
            ),
            IngestResponse::HashMismatch(artifact) => error(
                StatusCode::BAD_REQUEST,
                format!("artifact {} content hash mismatch", artifact.artifact_id),
            ),
            IngestResponse::Unparsable(err) => {
                error(StatusCode::UNPROCESSABLE_ENTITY, format!("{err:#}"))
            }
            IngestResponse::Internal(err) => {
                error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
            }
        }
    }
}
