use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use color_eyre::Report;
use protocol::rpc::v1::{AffectedTestsRequest, AffectedTestsResponse};
use tracing::{error, warn};

use crate::{affected, api::ServiceState};

/// Select the tests worth running for the current dirty-file set.
///
/// The dirty set is derived from VCS state under the requested root; the
/// observed set is also recorded for audit, which does not touch run history.
#[tracing::instrument(skip(state))]
pub async fn handle(
    State(state): State<ServiceState>,
    Json(request): Json<AffectedTestsRequest>,
) -> AffectedResponse {
    let selection = match affected::select(&request.workspace_root, request.force_full).await {
        Ok(selection) => selection,
        Err(err) => {
            error!(?err, "affected-test selection failed");
            return AffectedResponse::Error(err);
        }
    };

    {
        let mut db = state.db.lock().await;
        let observed_at = jiff::Timestamp::now().as_millisecond();
        if let Err(err) =
            db.record_dirty(&request.workspace_id, &selection.dirty_files, observed_at)
        {
            warn!(?err, "unable to record dirty files");
        }
    }

    AffectedResponse::Success(AffectedTestsResponse {
        dirty_files: selection.dirty_files,
        test_files: selection.test_files,
        is_full_run: selection.is_full_run,
        total_test_files: selection.total_test_files,
    })
}

#[derive(Debug)]
pub enum AffectedResponse {
    Success(AffectedTestsResponse),
    Error(Report),
}

impl IntoResponse for AffectedResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            AffectedResponse::Success(response) => Json(response).into_response(),
            AffectedResponse::Error(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": format!("{error:#}") })),
            )
                .into_response(),
        }
    }
}
