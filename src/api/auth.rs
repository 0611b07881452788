use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{Json, Response},
};
use subtle::ConstantTimeEq;

use crate::core::config;
use crate::core::types::ErrorResponse;

use super::ApiError;

// ---------------------------------------------------------------------------
// API-key auth. Two scoped keys via env; when neither is set, auth is
// disabled (development mode). Keys ride the X-API-Key header and are
// compared in constant time. Rejections log at warn.
// ---------------------------------------------------------------------------

const WRITE_PATHS: &[&str] = &[
    "/ingest",
    "/entities/merge",
    "/entities/hard-delete",
    "/config",
    "/pii/bulk-redact",
    "/pii/mark-public",
];

pub async fn require_api_key(req: Request, next: Next) -> Result<Response, ApiError> {
    let (read_key, write_key) = config::api_keys();
    if read_key.is_none() && write_key.is_none() {
        return Ok(next.run(req).await); // dev mode
    }

    let path = req.uri().path().to_string();
    let provided = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if provided.is_empty() {
        tracing::warn!("auth: missing key for {}", path);
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "X-API-Key header required".to_string(),
            }),
        ));
    }

    let needs_write = WRITE_PATHS.iter().any(|p| path.starts_with(p));
    let valid = if needs_write && write_key.is_some() {
        matches(&provided, write_key.as_deref())
    } else {
        matches(&provided, read_key.as_deref()) || matches(&provided, write_key.as_deref())
    };

    if !valid {
        tracing::warn!("auth: invalid key for {}", path);
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "Invalid or insufficient API key".to_string(),
            }),
        ));
    }
    Ok(next.run(req).await)
}

fn matches(provided: &str, expected: Option<&str>) -> bool {
    match expected {
        Some(key) => provided.as_bytes().ct_eq(key.as_bytes()).into(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_comparison_is_exact() {
        assert!(matches("secret", Some("secret")));
        assert!(!matches("secret", Some("Secret")));
        assert!(!matches("secret", Some("secret2")));
        assert!(!matches("secret", None));
        assert!(!matches("", Some("secret")));
    }

    #[test]
    fn write_paths_cover_mutations() {
        for p in [
            "/ingest/text",
            "/entities/merge",
            "/entities/hard-delete",
            "/config",
            "/pii/bulk-redact",
        ] {
            assert!(
                WRITE_PATHS.iter().any(|w| p.starts_with(w)),
                "{} should be write-scoped",
                p
            );
        }
        assert!(!WRITE_PATHS.iter().any(|w| "/search".starts_with(w)));
        assert!(!WRITE_PATHS.iter().any(|w| "/pii/report".starts_with(w)));
    }
}
