use std::sync::Arc;

use axum::{extract::State, response::Json};

use super::{internal, unprocessable, ApiError};
use crate::core::types::{SearchRequest, SearchResponse, MAX_QUERY_CHARS, MAX_SEARCH_LIMIT};
use crate::core::AppState;
use crate::search;

pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    if req.q.trim().is_empty() {
        return Err(unprocessable("q must not be empty"));
    }
    if req.q.chars().count() > MAX_QUERY_CHARS {
        return Err(unprocessable(format!(
            "q exceeds {} characters",
            MAX_QUERY_CHARS
        )));
    }
    if req.limit < 1 || req.limit > MAX_SEARCH_LIMIT {
        return Err(unprocessable(format!(
            "limit must be between 1 and {}",
            MAX_SEARCH_LIMIT
        )));
    }

    search::search(&state, &req.q, req.limit)
        .await
        .map(Json)
        .map_err(internal)
}
