use alloy_primitives::Address;
use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use trustgraph_core::{checksum_address, AccountId, CoreError, Profile, Stats, TrustLine};
use trustgraph_engine::{EngineError, QueryControl, TrustGraph, UpsertOutcome};
use trustgraph_indexer::{
    export, listener::RpcProvider, sink::remote::TCB_ID_HEADER, CirclesClient, ProfileCache,
    ProfileDirectory, Storage,
};

#[derive(Clone)]
struct AppState {
    graph: Arc<TrustGraph>,
    storage: Option<Storage>,
    directory: ProfileDirectory,
    tcb_id: Option<Arc<str>>,
    head: Option<RpcProvider>,
    query_timeout: Duration,
}

/// Runtime configuration for the trust graph API server.
#[derive(Debug, Clone)]
pub struct ApiRuntimeConfig {
    port: u16,
    database_url: Option<String>,
    tcb_id: Option<String>,
    rpc_url: Option<String>,
    enrichment_url: Option<String>,
    query_timeout: Duration,
    enrichment_timeout: Duration,
}

impl ApiRuntimeConfig {
    /// Build runtime configuration from environment variables.
    ///
    /// - `PORT` (default 8080)
    /// - `DATABASE_URL` (optional; in-memory only when unset)
    /// - `TCB_ID` (writes are refused when unset)
    /// - `RPC_URL` (optional ledger head for `/stats`)
    /// - `ENRICHMENT_URL` (optional profile directory)
    /// - `QUERY_TIMEOUT_MS` (default 2000)
    /// - `ENRICHMENT_TIMEOUT_SECS` (default 10)
    pub fn from_env() -> anyhow::Result<Self> {
        let port = parse_env_u64("PORT")?.unwrap_or(8080);
        let port = u16::try_from(port).context("PORT out of range")?;

        Ok(Self {
            port,
            database_url: non_empty_env("DATABASE_URL"),
            tcb_id: non_empty_env("TCB_ID"),
            rpc_url: non_empty_env("RPC_URL"),
            enrichment_url: non_empty_env("ENRICHMENT_URL"),
            query_timeout: Duration::from_millis(parse_env_u64("QUERY_TIMEOUT_MS")?.unwrap_or(2000)),
            enrichment_timeout: Duration::from_secs(
                parse_env_u64("ENRICHMENT_TIMEOUT_SECS")?.unwrap_or(10),
            ),
        })
    }

    /// Deterministic test configuration: no ledger head, no enrichment.
    pub fn for_test(database_url: Option<String>, tcb_id: impl Into<String>) -> Self {
        Self {
            port: 0,
            database_url,
            tcb_id: Some(tcb_id.into()),
            rpc_url: None,
            enrichment_url: None,
            query_timeout: Duration::from_secs(2),
            enrichment_timeout: Duration::from_secs(1),
        }
    }

    /// Use `url` as the profile directory.
    pub fn with_enrichment_url(mut self, url: impl Into<String>) -> Self {
        self.enrichment_url = Some(url.into());
        self
    }

    /// Override the per-query deadline.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env_u64(name: &str) -> anyhow::Result<Option<u64>> {
    let Some(raw) = non_empty_env(name) else {
        return Ok(None);
    };
    let v: u64 = raw
        .parse()
        .with_context(|| format!("Invalid {} (expected u64)", name))?;
    Ok(Some(v))
}

async fn build_state(config: &ApiRuntimeConfig) -> anyhow::Result<AppState> {
    let graph = Arc::new(TrustGraph::new());

    let storage = match &config.database_url {
        Some(url) => {
            let storage = Storage::new(url, None, None).await?;
            storage.run_migrations().await?;

            let lines = storage.all_trust_lines().await?;
            for line in &lines {
                graph.apply(line);
            }
            info!("Replayed {} trust lines from storage", lines.len());
            Some(storage)
        }
        None => {
            warn!("DATABASE_URL not set, trust lines are kept in memory only");
            None
        }
    };

    let client = config
        .enrichment_url
        .as_deref()
        .map(|url| CirclesClient::new(url, config.enrichment_timeout))
        .transpose()?;
    let directory = ProfileDirectory::new(Arc::new(ProfileCache::new()), client);

    // Only the block number is read from the ledger.
    let head = config
        .rpc_url
        .as_deref()
        .map(|url| RpcProvider::new(url, Address::ZERO))
        .transpose()?;

    if config.tcb_id.is_none() {
        warn!("TCB_ID not set, trust line submission is disabled");
    }

    Ok(AppState {
        graph,
        storage,
        directory,
        tcb_id: config.tcb_id.as_deref().map(Arc::from),
        head,
        query_timeout: config.query_timeout,
    })
}

fn router_for_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/trust/:truster/:trustee/:amount", get(find_trust_graph))
        .route(
            "/trust/:truster/:trustee/:amount/:block_number",
            post(add_trust_line),
        )
        .route("/stats", get(get_stats))
        .route("/export", get(export_csv))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build an in-process API router from explicit runtime config.
pub async fn build_app(config: &ApiRuntimeConfig) -> anyhow::Result<Router> {
    let state = build_state(config).await?;
    Ok(router_for_state(state))
}

/// Run the API server with explicit runtime configuration.
pub async fn run_with_config(config: ApiRuntimeConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;
    let storage_for_shutdown = state.storage.clone();
    let app = router_for_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Trust graph API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(storage) = storage_for_shutdown {
        storage.close().await;
    }
    info!("Trust graph API shutdown complete");
    Ok(())
}

/// Run the API server using environment-driven configuration.
pub async fn run_from_env() -> anyhow::Result<()> {
    run_with_config(ApiRuntimeConfig::from_env()?).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

const ERROR_CODE_INVALID_REQUEST: &str = "invalid_request";
const ERROR_CODE_FORBIDDEN: &str = "forbidden";
const ERROR_CODE_QUERY_CANCELLED: &str = "query_cancelled";
const ERROR_CODE_QUERY_DEADLINE_EXCEEDED: &str = "query_deadline_exceeded";
const ERROR_CODE_UNAVAILABLE: &str = "unavailable";
const ERROR_CODE_INTERNAL_ERROR: &str = "internal_error";

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[derive(Serialize)]
struct ErrorInfo {
    code: &'static str,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorInfo {
                code,
                message: message.into(),
            },
        }),
    )
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, ERROR_CODE_INVALID_REQUEST, msg)
}

fn forbidden(msg: impl Into<String>) -> ApiError {
    api_error(StatusCode::FORBIDDEN, ERROR_CODE_FORBIDDEN, msg)
}

fn unavailable(msg: impl Into<String>) -> ApiError {
    api_error(StatusCode::SERVICE_UNAVAILABLE, ERROR_CODE_UNAVAILABLE, msg)
}

fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        ERROR_CODE_INTERNAL_ERROR,
        format!("Internal error: {}", err),
    )
}

fn engine_error(err: EngineError) -> ApiError {
    match err {
        EngineError::InvalidArgument(e) => bad_request(e.to_string()),
        EngineError::Cancelled => api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            ERROR_CODE_QUERY_CANCELLED,
            "Query cancelled",
        ),
        EngineError::DeadlineExceeded => api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            ERROR_CODE_QUERY_DEADLINE_EXCEEDED,
            "Query deadline exceeded",
        ),
    }
}

fn parse_address(field: &str, raw: &str) -> Result<AccountId, ApiError> {
    checksum_address(raw).map_err(|_| bad_request(format!("Invalid {}: {}", field, raw)))
}

/// Parse a decimal path segment. Digit strings too large for `i128` saturate.
fn parse_decimal(field: &str, raw: &str) -> Result<i128, ApiError> {
    match raw.parse::<i128>() {
        Ok(v) => Ok(v),
        Err(_) if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) => Ok(i128::MAX),
        Err(_) => Err(bad_request(format!("Invalid {}: {}", field, raw))),
    }
}

async fn health(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    if let Some(storage) = &state.storage {
        storage.health_check().await.map_err(|e| {
            warn!("Health check failed: {:#}", e);
            unavailable("Storage unavailable")
        })?;
    }
    Ok("OK")
}

async fn find_trust_graph(
    State(state): State<AppState>,
    Path((truster, trustee, amount)): Path<(String, String, String)>,
) -> Result<Json<Vec<Profile>>, ApiError> {
    let truster = parse_address("truster", &truster)?;
    let trustee = parse_address("trustee", &trustee)?;
    let amount = parse_decimal("amount", &amount)?;

    let token = CancellationToken::new();
    // Abandoned requests stop the search.
    let _cancel_on_drop = token.clone().drop_guard();
    let control = QueryControl::new()
        .with_cancellation(token)
        .with_timeout(state.query_timeout);

    let graph = state.graph.clone();
    let path = tokio::task::spawn_blocking(move || {
        graph.find_trust_graph(&truster, &trustee, amount, &control)
    })
    .await
    .map_err(internal_error)?
    .map_err(engine_error)?;

    debug!(hops = path.len().saturating_sub(1), "Trust graph query answered");

    Ok(Json(state.directory.resolve_all(&path).await))
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum SubmitResponse {
    Applied { message: String },
    Rejected { reason: &'static str },
}

async fn add_trust_line(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((truster, trustee, amount, block_number)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(expected) = state.tcb_id.as_deref() else {
        return Err(forbidden("Trust line submission is disabled"));
    };
    let provided = headers
        .get(TCB_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided != expected {
        return Err(forbidden("Invalid or missing TCB-ID"));
    }

    let truster = parse_address("truster", &truster)?;
    let trustee = parse_address("trustee", &trustee)?;
    let amount = parse_decimal("amount", &amount)?;
    let block_number = parse_decimal("blockNumber", &block_number)?;

    let line = TrustLine::new(truster, trustee, amount, block_number)
        .map_err(|e: CoreError| bad_request(e.to_string()))?;
    if i64::try_from(line.block_number).is_err() {
        return Err(bad_request(format!(
            "blockNumber out of range: {}",
            line.block_number
        )));
    }

    // Storage first: a failed write leaves memory untouched and the caller can retry.
    if let Some(storage) = &state.storage {
        storage.upsert_trust_line(&line).await.map_err(|e| {
            warn!("Failed to persist trust line: {:#}", e);
            unavailable("Storage unavailable")
        })?;
    }

    match state.graph.apply(&line) {
        UpsertOutcome::Applied { .. } => {
            info!(
                "Created at {} trust line {} -> {} ({})",
                line.block_number, line.truster, line.trustee, line.amount
            );
            let message = format!("{}|{}|{} created.", line.truster, line.trustee, line.amount);
            Ok((StatusCode::CREATED, Json(SubmitResponse::Applied { message })))
        }
        UpsertOutcome::Rejected(reason) => Ok((
            StatusCode::OK,
            Json(SubmitResponse::Rejected {
                reason: reason.as_str(),
            }),
        )),
    }
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<Stats>, ApiError> {
    let latest_block = state
        .graph
        .ingest_stats()
        .latest_block
        .unwrap_or_default()
        .to_string();

    let current_block = match &state.head {
        Some(provider) => provider
            .get_block_number()
            .await
            .map_err(|e| {
                warn!("Failed to read ledger head: {:#}", e);
                unavailable("Ledger head unavailable")
            })?
            .to_string(),
        None => "unknown".to_string(),
    };

    Ok(Json(Stats {
        latest_block,
        current_block,
    }))
}

async fn export_csv(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.graph.snapshot_all();
    let mut body: Vec<u8> = Vec::new();
    export::write_snapshot(&snapshot, &state.directory, &mut body)
        .await
        .map_err(internal_error)?;

    Ok(([(header::CONTENT_TYPE, "text/csv")], body))
}
