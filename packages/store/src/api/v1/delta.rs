use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use color_eyre::Report;
use protocol::rpc::v1::{DeltaSummary, DeltaSummaryRequest};
use tracing::error;

use crate::api::ServiceState;

/// Compute the delta between the latest run and its predecessor for the
/// requested workspace/scope pair. Read-only.
#[tracing::instrument(skip(state))]
pub async fn handle(
    State(state): State<ServiceState>,
    Json(request): Json<DeltaSummaryRequest>,
) -> DeltaResponse {
    let db = state.db.lock().await;
    match db.delta(&request.workspace_id, request.package_scope.as_deref()) {
        Ok(summary) => DeltaResponse::Success(summary),
        Err(err) => {
            error!(?err, "delta computation failed");
            DeltaResponse::Error(err)
        }
    }
}

#[derive(Debug)]
pub enum DeltaResponse {
    Success(DeltaSummary),
    Error(Report),
}

impl IntoResponse for DeltaResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            DeltaResponse::Success(summary) => Json(summary).into_response(),
            DeltaResponse::Error(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": format!("{error:#}") })),
            )
                .into_response(),
        }
    }
}
