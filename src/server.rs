//! JSON HTTP server.
//!
//! Exposes search, record lookup and source listing to agents and other
//! tools over HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/tools/search` | `{query, source?, source_type?, limit?}` → ranked hits |
//! | `POST` | `/tools/get` | `{filename, source?}` → record, or `null` when missing |
//! | `POST` | `/tools/sources` | `{source_type?}` → record counts per source |
//!
//! Successful calls answer `{ "result": ... }`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `timeout` (408), `internal` (500),
//! `upstream_error` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use docroute_core::embedding::Embedder;
use docroute_core::router::{QueryRouter, SearchRequest};
use docroute_core::store::CorpusStore;
use docroute_core::Error;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::get::get_document;
use crate::sources::list_sources;
use crate::sqlite_store::SqliteStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CorpusStore>,
    pub embedder: Arc<dyn Embedder>,
    pub router: Arc<QueryRouter>,
    /// Upper bound for one request's work.
    pub request_timeout: Duration,
}

/// Build the route table over `state`.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/search", post(handle_search))
        .route("/tools/get", post(handle_get))
        .route("/tools/sources", post(handle_sources))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let state = AppState {
        store: Arc::new(SqliteStore::new(pool)),
        embedder: create_embedder(&config.embedding)?,
        router: Arc::new(QueryRouter::new(config.retrieval.params())?),
        request_timeout: Duration::from_secs(config.server.request_timeout_secs),
    };

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(bind = %bind_addr, embedder = state.embedder.model_name(), "server started");
    println!("docroute server listening on http://{}", bind_addr);

    axum::serve(listener, app(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Embedding(_) | Error::RateLimitExceeded { .. } => StatusCode::BAD_GATEWAY,
            Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status != StatusCode::BAD_REQUEST {
            warn!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request".to_string(),
            message: rejection.body_text(),
        }
    }
}

fn timeout_error(limit: Duration) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout".to_string(),
        message: format!("request timed out after {}s", limit.as_secs()),
    }
}

/// Run a handler body under the configured request timeout.
async fn bounded<T, F>(limit: Duration, fut: F) -> Result<Json<serde_json::Value>, AppError>
where
    T: Serialize,
    F: Future<Output = docroute_core::Result<T>>,
{
    let result = tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| timeout_error(limit))??;
    Ok(Json(serde_json::json!({ "result": result })))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /tools/* ============

#[derive(Debug, Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    source_type: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<SearchBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(body) = body?;
    let req = SearchRequest {
        query: &body.query,
        source: body.source.as_deref(),
        source_type: body.source_type.as_deref(),
        limit: body.limit,
    };
    bounded(
        state.request_timeout,
        state
            .router
            .search(state.store.as_ref(), state.embedder.as_ref(), &req),
    )
    .await
}

#[derive(Debug, Deserialize)]
struct GetBody {
    filename: String,
    #[serde(default)]
    source: Option<String>,
}

async fn handle_get(
    State(state): State<AppState>,
    body: Result<Json<GetBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(body) = body?;
    bounded(
        state.request_timeout,
        get_document(state.store.as_ref(), &body.filename, body.source.as_deref()),
    )
    .await
}

#[derive(Debug, Default, Deserialize)]
struct SourcesBody {
    #[serde(default)]
    source_type: Option<String>,
}

async fn handle_sources(
    State(state): State<AppState>,
    body: Result<Json<SourcesBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(body) = body?;
    bounded(
        state.request_timeout,
        list_sources(state.store.as_ref(), body.source_type.as_deref()),
    )
    .await
}
