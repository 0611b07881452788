use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::Json,
};

use super::{bad_request, unavailable, ApiError};
use crate::core::AppState;
use crate::graph::LABEL_ALLOWLIST;

// ---------------------------------------------------------------------------
// GET /graph/nodes?label=Person&filter_email=... - node lookup with an
// allowlisted label and filter_* property params, always parameterized.
// ---------------------------------------------------------------------------

const MAX_PROP_LEN: usize = 64;
const MAX_VALUE_LEN: usize = 1000;

pub async fn graph_nodes_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(label) = params.get("label") else {
        return Err(bad_request("label query parameter is required"));
    };
    if !LABEL_ALLOWLIST.contains(&label.as_str()) {
        return Err(bad_request(format!(
            "Unknown label '{}'. Allowed: {:?}",
            label, LABEL_ALLOWLIST
        )));
    }

    let filters: Vec<(String, String)> = params
        .iter()
        .filter_map(|(key, value)| {
            let prop = key.strip_prefix("filter_")?;
            if prop.is_empty() || prop.len() > MAX_PROP_LEN || value.len() > MAX_VALUE_LEN {
                return None;
            }
            Some((prop.to_string(), value.clone()))
        })
        .collect();

    let Some(graph) = &state.graph else {
        return Err(unavailable("Graph store not connected"));
    };
    let nodes = graph.nodes(label, &filters).await.map_err(|e| {
        tracing::error!("graph node query failed: label={} error={}", label, e);
        unavailable("Graph query failed")
    })?;

    let count = nodes.len();
    tracing::info!(
        "graph nodes queried: label={} filters={} count={}",
        label,
        filters.len(),
        count
    );
    Ok(Json(serde_json::json!({
        "nodes": nodes,
        "label": label,
        "count": count,
    })))
}
