use serde::Deserialize;
use thiserror::Error;

/// The embedding endpoint treats each input independently, so the context
/// limit is per-input, not cumulative. Batch size stays single-digit.
pub const EMBED_BATCH_SIZE: i64 = 8;

/// Client timeout for batch embedding calls.
pub const EMBED_TIMEOUT_SECS: u64 = 120;
/// Query embedding is on the search hot path - much tighter.
pub const QUERY_EMBED_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding endpoint returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("embedding response malformed: {0}")]
    BadResponse(String),
}

impl EmbedError {
    /// HTTP 400 carrying a context/length marker - the signal for the
    /// batch-overflow fallback in the embedding worker.
    pub fn is_context_overflow(&self) -> bool {
        match self {
            EmbedError::Http { status, body } => {
                let lower = body.to_ascii_lowercase();
                *status == 400 && (lower.contains("context") || lower.contains("length"))
            }
            _ => false,
        }
    }
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct SingleEmbedResponse {
    embedding: Vec<f32>,
}

/// Thin client for the model-serving endpoint (Ollama-compatible API).
#[derive(Clone)]
pub struct EmbedClient {
    client: reqwest::Client,
    base_url: String,
}

impl EmbedClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// Embed a batch of texts via `/api/embed`. Returns one vector per input.
    pub async fn embed_batch(
        &self,
        model: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let resp = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .timeout(std::time::Duration::from_secs(EMBED_TIMEOUT_SECS))
            .json(&serde_json::json!({ "model": model, "input": texts }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(
                "embedding request failed: status={} batch_size={} body={}",
                status,
                texts.len(),
                body.chars().take(500).collect::<String>()
            );
            return Err(EmbedError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: BatchEmbedResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::BadResponse(e.to_string()))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(EmbedError::BadResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings)
    }

    /// Embed a single query string via `/api/embeddings`. Returns `None` on
    /// any failure - the search pipeline degrades instead of erroring.
    pub async fn embed_query(&self, model: &str, query: &str) -> Option<Vec<f32>> {
        let result = async {
            let resp = self
                .client
                .post(format!("{}/api/embeddings", self.base_url))
                .timeout(std::time::Duration::from_secs(QUERY_EMBED_TIMEOUT_SECS))
                .json(&serde_json::json!({ "model": model, "prompt": query }))
                .send()
                .await?
                .error_for_status()?;
            resp.json::<SingleEmbedResponse>().await
        }
        .await;

        match result {
            Ok(r) => Some(r.embedding),
            Err(e) => {
                tracing::warn!("query embedding failed: {}", e);
                None
            }
        }
    }
}
