//! The engine daemon.
//!
//! One daemon per workspace, bound to the Unix socket inside the cache
//! directory. It supervises the backend subprocess and serves a small
//! HTTP/JSON surface: `/health`, `/version`, and `/check`. At most one check
//! executes at a time, and `/check` is additionally rate limited to one
//! request per second.

use std::{
    sync::{Arc, atomic::Ordering},
    time::{Duration, Instant},
};

use atomic_time::AtomicInstant;
use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use color_eyre::{Result, eyre::Context};
use http::StatusCode;
use protocol::check::v1::{CheckRequest, ErrorBody, HealthResponse, VersionResponse};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

use crate::{
    cache::CacheDir,
    check::{self, CheckError},
    client::{RpcError, StoreClient},
    fs,
};

pub mod backend;

/// Minimum spacing between `/check` requests.
const CHECK_WINDOW: Duration = Duration::from_secs(1);

/// Ping retry schedule while the backend comes up.
const PING_RETRY_SCHEDULE: &[Duration] = &[
    Duration::from_millis(500),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
];

/// Track the most recent admission into a rate-limited window.
///
/// Admission is racy by design: two truly simultaneous requests may both be
/// admitted, but the single-flight guard still serializes the work. The
/// window exists to shed pathological retry loops, not to be a precise
/// limiter.
#[derive(Clone)]
pub struct RateWindow {
    last: Arc<AtomicInstant>,
    window: Duration,
}

impl std::fmt::Debug for RateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateWindow")
            .field("last", &self.last.load(Ordering::Relaxed))
            .field("window", &self.window)
            .finish()
    }
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        let past = Instant::now()
            .checked_sub(window)
            .unwrap_or_else(Instant::now);
        Self {
            last: Arc::new(AtomicInstant::new(past)),
            window,
        }
    }

    /// Admit a request, or report how long the caller should wait.
    pub fn try_admit(&self) -> Result<(), Duration> {
        let elapsed = self.last.load(Ordering::Relaxed).elapsed();
        if elapsed < self.window {
            return Err(self.window - elapsed);
        }
        self.last.store(Instant::now(), Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Clone)]
pub struct EngineState {
    pub cache: CacheDir,
    pub store: StoreClient,
    /// The process-wide "check in progress" flag: `try_lock` failure is the
    /// 409, returned before any filesystem side effect.
    pub check_guard: Arc<Mutex<()>>,
    pub rate: RateWindow,
}

/// Bring up the backend, bind the socket, and serve until signaled.
#[instrument(skip(cache), fields(cache = %cache))]
pub async fn serve(cache: CacheDir) -> Result<()> {
    if !cache.root().exists().await {
        color_eyre::eyre::bail!("cache directory {} does not exist", cache.root());
    }

    fs::write(&cache.pid_file(), std::process::id().to_string())
        .await
        .context("write engine pid file")?;

    let backend = backend::spawn(&cache).await.context("bring up backend")?;
    let store = StoreClient::new(backend.port)?;
    ping_until_healthy(&store).await?;

    // A socket file from a dead engine would make bind fail; the pid/lock
    // protocol guarantees no live engine owns it at this point.
    fs::remove_file(&cache.socket_file()).await?;
    let listener = tokio::net::UnixListener::bind(cache.socket_file().as_std_path())
        .with_context(|| format!("bind unix socket {}", cache.socket_file()))?;
    info!(socket = %cache.socket_file(), "engine listening");

    let state = EngineState {
        cache: cache.clone(),
        store,
        check_guard: Arc::new(Mutex::new(())),
        rate: RateWindow::new(CHECK_WINDOW),
    };

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve engine surface");

    info!("shutting down; cleaning up backend and socket");
    backend.shutdown().await;
    for file in [cache.port_file(), cache.socket_file(), cache.pid_file()] {
        if let Err(err) = fs::remove_file(&file).await {
            warn!(?err, %file, "unable to remove cache file at shutdown");
        }
    }

    served
}

/// Ping the backend on its published port until it answers, with a bounded
/// retry schedule. The port is re-read from the client each attempt, never
/// remembered from a previous backend.
async fn ping_until_healthy(store: &StoreClient) -> Result<()> {
    let mut last_err = None;
    for delay in PING_RETRY_SCHEDULE {
        match store.ping().await {
            Ok(ping) => {
                info!(version = %ping.version, "backend is healthy");
                return Ok(());
            }
            Err(err) => {
                warn!(%err, ?delay, "backend not ready yet");
                last_err = Some(err);
            }
        }
        tokio::time::sleep(*delay).await;
    }

    match store.ping().await {
        Ok(ping) => {
            info!(version = %ping.version, "backend is healthy");
            Ok(())
        }
        Err(err) => {
            let last = last_err.map(|e| e.to_string()).unwrap_or_default();
            color_eyre::eyre::bail!("backend never became healthy: {err} (earlier: {last})")
        }
    }
}

pub fn router(state: EngineState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/check", post(handle_check))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[instrument]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[instrument(skip(state))]
async fn version(State(state): State<EngineState>) -> Response {
    match state.store.ping().await {
        Ok(ping) => Json(VersionResponse {
            version: ping.version,
        })
        .into_response(),
        Err(RpcError::Timeout) => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            "backend timed out answering version query",
        ),
        Err(err) => {
            error!(%err, "backend unavailable for version query");
            error_response(StatusCode::BAD_GATEWAY, "backend unavailable")
        }
    }
}

#[instrument(skip(state, body))]
async fn handle_check(State(state): State<EngineState>, body: axum::body::Bytes) -> Response {
    // Rate limit first, mirroring a front middleware: even rejected
    // requests consume the window.
    if let Err(wait) = state.rate.try_admit() {
        return rate_limited(wait);
    }

    // Single flight: refuse before any filesystem side effect.
    let Ok(_guard) = state.check_guard.try_lock() else {
        return check_error_response(&CheckError::ConcurrentCheck);
    };

    let request = match serde_json::from_slice::<CheckRequest>(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid request: {err}"));
        }
    };
    if !fs::is_dir(&request.workspace_root).await {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!(
                "workspace_root {:?} is not an existing directory",
                request.workspace_root
            ),
        );
    }

    match check::run(&state.cache, &state.store, &request).await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => {
            error!(kind = err.kind(), %err, "check failed");
            check_error_response(&err)
        }
    }
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

fn check_error_response(err: &CheckError) -> Response {
    (err.status(), Json(ErrorBody::new(err.to_string()))).into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(message))).into_response()
}

fn rate_limited(wait: Duration) -> Response {
    let retry_after = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorBody::new("rate limited; retry shortly")),
    )
        .into_response();
    response.headers_mut().insert(
        http::header::RETRY_AFTER,
        http::HeaderValue::from(retry_after),
    );
    response
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            info!("received SIGTERM, starting graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::AbsDirPath;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    fn test_state(tmp: &tempfile::TempDir) -> EngineState {
        EngineState {
            cache: CacheDir::at(AbsDirPath::try_from(tmp.path()).unwrap()),
            // Port 1 is never serving; backend-dependent routes fail fast.
            store: StoreClient::new(1).unwrap(),
            check_guard: Arc::new(Mutex::new(())),
            rate: RateWindow::new(CHECK_WINDOW),
        }
    }

    fn test_server(state: EngineState) -> axum_test::TestServer {
        axum_test::TestServer::new(router(state)).unwrap()
    }

    #[test]
    fn rate_window_admits_then_refuses() {
        let rate = RateWindow::new(Duration::from_secs(1));
        assert!(rate.try_admit().is_ok());
        assert!(rate.try_admit().is_err());
    }

    #[test]
    fn rate_window_reopens_after_the_window() {
        let rate = RateWindow::new(Duration::from_millis(0));
        assert!(rate.try_admit().is_ok());
        assert!(rate.try_admit().is_ok());
    }

    #[test_log::test(tokio::test)]
    async fn health_answers_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let server = test_server(test_state(&tmp));

        let response = server.get("/health").await;
        response.assert_status_ok();
        pretty_assert_eq!(
            response.json::<HealthResponse>().status,
            "ok"
        );
    }

    #[test_log::test(tokio::test)]
    async fn unknown_routes_get_json_404() {
        let tmp = tempfile::tempdir().unwrap();
        let server = test_server(test_state(&tmp));

        let response = server.get("/nope").await;
        response.assert_status(StatusCode::NOT_FOUND);
        pretty_assert_eq!(response.json::<ErrorBody>().error, "not found");
    }

    #[test_log::test(tokio::test)]
    async fn version_reports_backend_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let server = test_server(test_state(&tmp));

        let response = server.get("/version").await;
        response.assert_status(StatusCode::BAD_GATEWAY);
    }

    #[test_log::test(tokio::test)]
    async fn invalid_check_body_is_a_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let server = test_server(test_state(&tmp));

        let response = server
            .post("/check")
            .json(&serde_json::json!({ "workspace_id": "NOT-HEX" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[test_log::test(tokio::test)]
    async fn missing_workspace_root_is_a_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let server = test_server(test_state(&tmp));

        let response = server
            .post("/check")
            .json(&serde_json::json!({
                "workspace_id": "0123456789abcdef",
                "workspace_root": "/definitely/not/a/real/directory"
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[test_log::test(tokio::test)]
    async fn in_flight_check_conflicts() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(&tmp);
        let server = test_server(state.clone());

        // Simulate an in-flight check by holding the guard across the call.
        let guard = state.check_guard.clone();
        let _held = guard.try_lock().unwrap();

        let response = server
            .post("/check")
            .json(&serde_json::json!({
                "workspace_id": "0123456789abcdef",
                "workspace_root": tmp.path()
            }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        pretty_assert_eq!(
            response.json::<ErrorBody>().error,
            "check already in progress"
        );
    }

    #[test_log::test(tokio::test)]
    async fn rapid_checks_are_rate_limited() {
        let tmp = tempfile::tempdir().unwrap();
        let server = test_server(test_state(&tmp));
        let body = serde_json::json!({
            "workspace_id": "0123456789abcdef",
            "workspace_root": "/definitely/not/a/real/directory"
        });

        // First request consumes the window (and fails validation).
        let first = server.post("/check").json(&body).await;
        first.assert_status(StatusCode::BAD_REQUEST);

        let second = server.post("/check").json(&body).await;
        second.assert_status(StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key(http::header::RETRY_AFTER));
    }
}
