//! Clients for the two service surfaces: the backend RPC service (localhost
//! TCP) and the engine daemon (HTTP over the per-workspace Unix socket).

use std::time::Duration;

use color_eyre::{
    Result, Section, SectionExt,
    eyre::{Context, eyre},
};
use derive_more::{Debug, Display};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use protocol::{
    check::v1::{CheckRequest, CheckSummary, ErrorBody, HealthResponse, VersionResponse},
    rpc::v1::{
        AffectedTestsRequest, AffectedTestsResponse, DeltaSummary, DeltaSummaryRequest,
        IngestManifestRequest, IngestManifestResponse, PingResponse,
    },
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::net::UnixStream;
use tracing::{debug, instrument};
use url::Url;

use crate::path::AbsFilePath;

/// Deadline for ordinary backend RPCs issued from the engine.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for version/liveness queries.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for a whole check as seen from the CLI. Generous: it must cover
/// both tool watchdogs plus ingestion.
const CHECK_TIMEOUT: Duration = Duration::from_secs(900);

/// How a backend RPC failed, kept separate from transport plumbing so
/// callers can map deadline misses and rejections to their own taxonomy.
#[derive(Debug)]
pub enum RpcError {
    /// The RPC exceeded its deadline.
    Timeout,
    /// The backend answered with a non-success status.
    Status { code: StatusCode, message: String },
    /// The request never completed for another reason.
    Transport(color_eyre::Report),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout => write!(f, "backend RPC timed out"),
            RpcError::Status { code, message } => {
                write!(f, "backend returned {code}: {message}")
            }
            RpcError::Transport(err) => write!(f, "backend unreachable: {err:#}"),
        }
    }
}

/// Client for the backend RPC service.
///
/// ## Cloning
///
/// This type is cheaply cloneable, and clones share the underlying HTTP
/// connection pool.
#[derive(Clone, Debug, Display)]
#[display("{base}")]
pub struct StoreClient {
    #[debug("{:?}", base.as_str())]
    base: Url,

    #[debug(skip)]
    http: reqwest::Client,
}

impl StoreClient {
    /// Create a client against the port the backend published.
    pub fn new(port: u16) -> Result<Self> {
        let base = Url::parse(&format!("http://127.0.0.1:{port}/")).context("parse base url")?;
        Ok(Self {
            base,
            http: reqwest::Client::new(),
        })
    }

    /// Check that the backend is reachable and report its version.
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<PingResponse, RpcError> {
        self.rpc("rpc/v1/ping", &serde_json::json!({}), PING_TIMEOUT)
            .await
    }

    #[instrument(skip(self, request))]
    pub async fn ingest_manifest(
        &self,
        request: &IngestManifestRequest,
    ) -> Result<IngestManifestResponse, RpcError> {
        self.rpc("rpc/v1/ingest-manifest", request, RPC_TIMEOUT)
            .await
    }

    #[instrument(skip(self))]
    pub async fn delta_summary(
        &self,
        request: &DeltaSummaryRequest,
    ) -> Result<DeltaSummary, RpcError> {
        self.rpc("rpc/v1/delta-summary", request, RPC_TIMEOUT).await
    }

    #[instrument(skip(self))]
    pub async fn affected_tests(
        &self,
        request: &AffectedTestsRequest,
    ) -> Result<AffectedTestsResponse, RpcError> {
        self.rpc("rpc/v1/affected-tests", request, RPC_TIMEOUT)
            .await
    }

    async fn rpc<Req, Res>(
        &self,
        path: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Res, RpcError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let url = self
            .base
            .join(path)
            .map_err(|err| RpcError::Transport(eyre!(err)))?;

        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RpcError::Timeout
                } else {
                    RpcError::Transport(eyre!(err))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&message)
                .map(|body| body.error)
                .unwrap_or(message);
            return Err(RpcError::Status {
                code: status,
                message,
            });
        }

        response
            .json::<Res>()
            .await
            .map_err(|err| RpcError::Transport(eyre!(err)))
    }
}

/// Client for the engine daemon's HTTP surface over its Unix socket.
///
/// Each request opens a fresh connection; the surface is tiny and the cost
/// of a Unix-socket handshake is negligible next to the work behind it.
#[derive(Clone, Debug, Display)]
#[display("{socket}")]
pub struct EngineClient {
    socket: AbsFilePath,
}

impl EngineClient {
    pub fn new(socket: AbsFilePath) -> Self {
        Self { socket }
    }

    /// Probe the daemon with an actual `/health` round trip.
    ///
    /// A connectable-but-dead socket file answers nothing; only a parsed
    /// `ok` counts as healthy.
    #[instrument(skip(self))]
    pub async fn healthy(&self) -> bool {
        let probe = async {
            let (status, body) = self.request(http::Method::GET, "/health", None).await?;
            if status != StatusCode::OK {
                return Ok::<bool, color_eyre::Report>(false);
            }
            let health = serde_json::from_slice::<HealthResponse>(&body)?;
            Ok(health.status == "ok")
        };
        match tokio::time::timeout(Duration::from_secs(2), probe).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(err)) => {
                debug!(?err, "health probe failed");
                false
            }
            Err(_elapsed) => false,
        }
    }

    /// Wait for the daemon to become healthy, polling every 100ms.
    #[instrument(skip(self))]
    pub async fn wait_healthy(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.healthy().await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                color_eyre::eyre::bail!(
                    "engine did not become ready within {}s",
                    timeout.as_secs()
                );
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Query the engine (and transitively the backend) version.
    #[instrument(skip(self))]
    pub async fn version(&self) -> Result<VersionResponse> {
        let (status, body) = self.request(http::Method::GET, "/version", None).await?;
        if status != StatusCode::OK {
            return Err(error_from_body(status, &body));
        }
        serde_json::from_slice(&body).context("parse version response")
    }

    /// Run one check and return its summary.
    #[instrument(skip(self, request))]
    pub async fn check(&self, request: &CheckRequest) -> Result<CheckSummary> {
        let body = serde_json::to_vec(request).context("encode check request")?;
        let (status, body) = tokio::time::timeout(
            CHECK_TIMEOUT,
            self.request(http::Method::POST, "/check", Some(body)),
        )
        .await
        .map_err(|_| eyre!("check timed out after {}s", CHECK_TIMEOUT.as_secs()))??;

        if status != StatusCode::OK {
            return Err(error_from_body(status, &body));
        }
        serde_json::from_slice(&body).context("parse check summary")
    }

    async fn request(
        &self,
        method: http::Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes)> {
        let stream = UnixStream::connect(self.socket.as_std_path())
            .await
            .with_context(|| format!("connect to engine socket {}", self.socket))?;

        let (mut sender, connection) =
            hyper::client::conn::http1::handshake::<_, Full<Bytes>>(TokioIo::new(stream))
                .await
                .context("http handshake")?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(?err, "engine connection closed with error");
            }
        });

        let request = http::Request::builder()
            .method(method)
            .uri(path)
            .header(http::header::HOST, "zax-engine")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .context("build request")?;

        let response = sender.send_request(request).await.context("send request")?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .context("read response body")?
            .to_bytes();
        Ok((status, body))
    }
}

fn error_from_body(status: StatusCode, body: &[u8]) -> color_eyre::Report {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => eyre!(parsed.error),
        Err(_) => eyre!("engine returned unexpected status {status}")
            .with_section(|| String::from_utf8_lossy(body).into_owned().header("Body:")),
    }
}
