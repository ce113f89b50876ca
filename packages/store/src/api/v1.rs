use axum::{Router, routing::post};

use crate::api::ServiceState;

pub mod affected;
pub mod delta;
pub mod ingest;
pub mod ping;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/ping", post(ping::handle))
        .route("/ingest-manifest", post(ingest::handle))
        .route("/delta-summary", post(delta::handle))
        .route("/affected-tests", post(affected::handle))
}
