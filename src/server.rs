//! HTTP API server.
//!
//! Exposes books and their analyses as a JSON API. Every handler goes
//! through the shared [`App`], so the HTTP layer and the CLI observe the same
//! cache and the same in-flight de-duplication.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version and provider) |
//! | `GET`    | `/api/books` | Stored books, newest first, without text |
//! | `GET`    | `/api/books/{id}?refresh=bool` | Stored or freshly downloaded book |
//! | `GET`    | `/api/books/{id}/analyses` | Cached analyses of a book |
//! | `POST`   | `/api/analysis/{kind}` | Get or compute an analysis (`{"book_id": 84}`) |
//! | `DELETE` | `/api/analysis/{kind}/{id}` | Invalidate a cached analysis |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "book not found: 999999" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `provider_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends can
//! call the API directly.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use gutenberg_analyst_core::{
    AnalysisError, AnalysisKind, AnalysisRecord, Book, BookId, BookSummary,
};

use crate::app::App;

/// Shared state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    app: Arc<App>,
}

/// Starts the HTTP server on `[server].bind` and serves until the process
/// is terminated.
pub async fn run_server(app: Arc<App>) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let router = router(app);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "HTTP server listening");
    println!("Server listening on http://{}", bind_addr);
    axum::serve(listener, router).await?;

    Ok(())
}

/// All routes with CORS applied.
pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/books", get(handle_list_books))
        .route("/api/books/{id}", get(handle_get_book))
        .route("/api/books/{id}/analyses", get(handle_list_analyses))
        .route("/api/analysis/{kind}", post(handle_analyze))
        .route("/api/analysis/{kind}/{id}", delete(handle_invalidate))
        .layer(cors)
        .with_state(AppState { app })
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        let (status, code) = match &err {
            AnalysisError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AnalysisError::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            AnalysisError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            AnalysisError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::warn!(error = %err, %status, "request failed");
        }
        ApiError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn parse_book_id(raw: &str) -> Result<BookId, ApiError> {
    match raw.trim().parse::<BookId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(bad_request(format!(
            "book id must be a positive integer, got '{}'",
            raw
        ))),
    }
}

fn parse_kind(raw: &str) -> Result<AnalysisKind, ApiError> {
    raw.parse().map_err(|e| bad_request(format!("{}", e)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    provider: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state.app.provider_name().to_string(),
    })
}

// ============ Books ============

async fn handle_list_books(
    State(state): State<AppState>,
) -> Result<Json<Vec<BookSummary>>, ApiError> {
    Ok(Json(state.app.list_books().await?))
}

#[derive(Deserialize, Default)]
struct BookQuery {
    #[serde(default)]
    refresh: bool,
}

async fn handle_get_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BookQuery>,
) -> Result<Json<Book>, ApiError> {
    let id = parse_book_id(&id)?;
    Ok(Json(state.app.get_or_fetch(id, query.refresh).await?))
}

async fn handle_list_analyses(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AnalysisRecord>>, ApiError> {
    let id = parse_book_id(&id)?;
    Ok(Json(state.app.list_analyses(id).await?))
}

// ============ Analyses ============

/// Body of `POST /api/analysis/{kind}`.
///
/// Signed so a negative id is reported as a bad request rather than a
/// deserialization failure.
#[derive(Deserialize)]
struct AnalysisRequest {
    book_id: i64,
}

async fn handle_analyze(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Result<Json<AnalysisRecord>, ApiError> {
    let kind = parse_kind(&kind)?;
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;
    let id = parse_book_id(&req.book_id.to_string())?;
    Ok(Json(state.app.analyze(id, kind).await?))
}

#[derive(Serialize)]
struct InvalidateResponse {
    book_id: BookId,
    kind: AnalysisKind,
    removed: bool,
}

async fn handle_invalidate(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    let id = parse_book_id(&id)?;
    let removed = state.app.invalidate(id, kind).await?;
    Ok(Json(InvalidateResponse {
        book_id: id,
        kind,
        removed,
    }))
}
