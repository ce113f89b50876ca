use axum::Json;
use protocol::rpc::v1::PingResponse;

/// Liveness probe plus version echo, used by the engine during bring-up.
#[tracing::instrument]
pub async fn handle() -> Json<PingResponse> {
    Json(PingResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
