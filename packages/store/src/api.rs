//! RPC endpoint handlers for the backend service.
//!
//! The surface is four unary request/response RPCs carried as JSON over
//! localhost HTTP. The engine is the only caller; there is no authentication
//! because the listener binds loopback only and the port is published through
//! the private cache directory.

use std::{path::PathBuf, sync::Arc};

use axum::Router;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::db::Store;

pub mod v1;

/// Shared state for all handlers.
///
/// The store sits behind a mutex: the backend is single-threaded from the
/// engine's point of view, and the mutex gives each RPC exclusive use of the
/// connection for its one transaction.
#[derive(Clone)]
pub struct ServiceState {
    pub db: Arc<Mutex<Store>>,
    /// The `artifacts/` directory inside the cache dir; manifest paths must
    /// resolve inside it.
    pub artifacts_root: PathBuf,
}

impl ServiceState {
    pub fn new(db: Store, artifacts_root: PathBuf) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            artifacts_root,
        }
    }
}

pub fn router(state: ServiceState) -> Router {
    Router::new()
        .nest("/rpc/v1", v1::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_server(artifacts_root: PathBuf) -> axum_test::TestServer {
    let state = ServiceState::new(Store::in_memory().unwrap(), artifacts_root);
    axum_test::TestServer::new(router(state)).unwrap()
}
