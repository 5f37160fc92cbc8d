//! HTTP API over the translation pipeline, glossary management and usage.
//!
//! ## Routes
//!
//! - `GET /health`: liveness plus whether translation is enabled.
//! - `POST /translate`: `{ text, sourceLanguage, targetLanguage }`.
//! - `GET /glossary?sourceLanguage=&targetLanguage=`: caller's terms.
//! - `POST /glossary`: add a term; `{ "id": null }` when it already exists.
//! - `PUT /glossary/:id`, `DELETE /glossary/:id`: owner-only mutations.
//! - `GET /usage`: current month's translated characters.
//! - `GET /metrics`: per-stage latency percentiles.
//!
//! The caller identity comes from the configured user header.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::db::StoreError;
use crate::metrics::MetricSummary;
use crate::translate::glossary::{GlossaryEntry, GlossaryError};
use crate::translate::{Origin, TranslateError, TranslateRequest};
use crate::usage::MonthlyUsage;
use crate::AppContext;

/// Build the axum `Router` for the given context.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/translate", post(translate_handler))
        .route("/glossary", get(list_glossary_handler).post(add_glossary_handler))
        .route(
            "/glossary/:id",
            put(update_glossary_handler).delete(delete_glossary_handler),
        )
        .route("/usage", get(usage_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    ctx: Arc<AppContext>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = router(ctx);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

// --- Errors ---

pub enum ApiError {
    Translate(TranslateError),
    Glossary(GlossaryError),
    Store(StoreError),
}

impl From<TranslateError> for ApiError {
    fn from(e: TranslateError) -> Self {
        ApiError::Translate(e)
    }
}

impl From<GlossaryError> for ApiError {
    fn from(e: GlossaryError) -> Self {
        ApiError::Glossary(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Translate(e) => {
                let status = match &e {
                    TranslateError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    TranslateError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
                    TranslateError::Upstream(_) | TranslateError::EmptyResponse => {
                        StatusCode::BAD_GATEWAY
                    }
                    TranslateError::InvalidConfig(_) | TranslateError::Store(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.to_string())
            }
            ApiError::Glossary(e) => {
                let status = match &e {
                    GlossaryError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
                    GlossaryError::Forbidden(_) => StatusCode::FORBIDDEN,
                    GlossaryError::NotFound => StatusCode::NOT_FOUND,
                    GlossaryError::Duplicate(_) => StatusCode::CONFLICT,
                    GlossaryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    GlossaryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// --- Handlers ---

/// `GET /health`
async fn health_handler(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Json(json!({ "ok": true, "translation": ctx.translation_service.has_provider() }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateResponse {
    pub translated_text: Option<String>,
    pub origin: Option<Origin>,
}

/// `POST /translate`
async fn translate_handler(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(request): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>, ApiError> {
    let caller = ctx.identity.resolve(&headers);
    let result = ctx.translation_service.translate(&request, caller.as_ref()).await?;
    Ok(Json(match result {
        Some(t) => TranslateResponse {
            translated_text: Some(t.translated_text),
            origin: Some(t.origin),
        },
        None => TranslateResponse {
            translated_text: None,
            origin: None,
        },
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LanguagePair {
    source_language: String,
    target_language: String,
}

/// `GET /glossary`
async fn list_glossary_handler(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(pair): Query<LanguagePair>,
) -> Result<Json<Vec<GlossaryEntry>>, ApiError> {
    let caller = ctx.identity.resolve(&headers);
    let entries = ctx
        .glossary
        .list(caller.as_ref(), &pair.source_language, &pair.target_language)?;
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddTermBody {
    term: String,
    custom_translation: String,
    source_language: String,
    target_language: String,
}

/// `POST /glossary`
async fn add_glossary_handler(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<AddTermBody>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = ctx.identity.resolve(&headers);
    let id = ctx.glossary.add(
        caller.as_ref(),
        &body.term,
        &body.custom_translation,
        &body.source_language,
        &body.target_language,
    )?;
    let status = if id.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "id": id }))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTermBody {
    term: String,
    custom_translation: String,
}

/// `PUT /glossary/:id`
async fn update_glossary_handler(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateTermBody>,
) -> Result<StatusCode, ApiError> {
    let caller = ctx.identity.resolve(&headers);
    ctx.glossary
        .update(caller.as_ref(), &id, &body.term, &body.custom_translation)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /glossary/:id`
async fn delete_glossary_handler(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let caller = ctx.identity.resolve(&headers);
    ctx.glossary.delete(caller.as_ref(), &id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /usage`: `null` for unauthenticated callers.
async fn usage_handler(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> Result<Json<Option<MonthlyUsage>>, ApiError> {
    let usage = match ctx.identity.resolve(&headers) {
        Some(user) => Some(ctx.usage.current(&user)?),
        None => None,
    };
    Ok(Json(usage))
}

/// `GET /metrics`
async fn metrics_handler(State(ctx): State<Arc<AppContext>>) -> Json<HashMap<String, MetricSummary>> {
    Json(ctx.metrics.summary())
}
