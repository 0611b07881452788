pub mod auth;
pub mod config_api;
pub mod entities;
pub mod graph_api;
pub mod ingest;
pub mod search_api;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::types::ErrorResponse;
use crate::core::AppState;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn bad_request(detail: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: detail.into(),
        }),
    )
}

pub(crate) fn unprocessable(detail: impl Into<String>) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorResponse {
            error: detail.into(),
        }),
    )
}

pub(crate) fn not_found(detail: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: detail.into(),
        }),
    )
}

pub(crate) fn conflict(detail: impl Into<String>) -> ApiError {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse {
            error: detail.into(),
        }),
    )
}

pub(crate) fn unavailable(detail: impl Into<String>) -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: detail.into(),
        }),
    )
}

pub(crate) fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/search", post(search_api::search_handler))
        .route("/ingest/text", post(ingest::ingest_text_handler))
        .route(
            "/entities/hard-delete",
            post(entities::hard_delete_handler),
        )
        .route("/entities/merge", post(entities::merge_handler))
        .route(
            "/entities/merge-candidates",
            get(entities::merge_candidates_handler),
        )
        .route(
            "/entities/{entity_type}/{entity_id}",
            delete(entities::soft_delete_handler),
        )
        .route(
            "/entities/{entity_type}/{entity_id}",
            put(entities::update_handler),
        )
        .route("/config", get(config_api::get_config_handler))
        .route("/config", post(config_api::update_config_handler))
        .route("/pii/report", get(config_api::pii_report_handler))
        .route(
            "/pii/mark-public/{person_id}",
            post(config_api::mark_public_handler),
        )
        .route("/pii/bulk-redact", post(config_api::bulk_redact_handler))
        .route("/graph/nodes", get(graph_api::graph_nodes_handler))
        .layer(axum::middleware::from_fn(auth::require_api_key))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 200 when both stores answer, 503 otherwise.
async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let relational_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let graph_ok = match &state.graph {
        Some(graph) => graph.ping().await,
        None => false,
    };

    if relational_ok && graph_ok {
        Ok(Json(serde_json::json!({
            "status": "healthy",
            "service": "packrat",
            "version": env!("CARGO_PKG_VERSION"),
        })))
    } else {
        Err(unavailable(format!(
            "relational_ok={} graph_ok={}",
            relational_ok, graph_ok
        )))
    }
}
