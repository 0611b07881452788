use serde::Deserialize;

// ---------------------------------------------------------------------------
// Reranker gateway. Cross-encoder scoring lives behind an HTTP endpoint;
// when it is unconfigured, unreachable, or the candidate set is too small,
// the gateway answers None and the caller keeps fusion order with
// degraded=true. This function never raises.
// ---------------------------------------------------------------------------

/// Below this many candidates reranking is not worth the latency.
pub const MIN_RERANK_CANDIDATES: usize = 5;

/// Candidates are clipped to this many characters to keep latency flat.
pub const RERANK_SNIPPET_CHARS: usize = 500;

const RERANK_TIMEOUT_SECS: u64 = 30;

#[derive(Deserialize)]
struct RerankResponse {
    scores: Vec<f64>,
}

#[derive(Clone)]
pub struct RerankGateway {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl RerankGateway {
    pub fn new(client: reqwest::Client, endpoint: Option<String>) -> Self {
        if endpoint.is_none() {
            tracing::info!("rerank endpoint not configured — search will skip reranking");
        }
        Self { client, endpoint }
    }

    pub fn is_available(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Score candidates against the query, aligned to input order. `None`
    /// means "preserve fusion order and flag the response degraded".
    pub async fn score(&self, query: &str, candidates: &[String]) -> Option<Vec<f64>> {
        if candidates.len() < MIN_RERANK_CANDIDATES {
            return None;
        }
        let endpoint = self.endpoint.as_ref()?;

        let clipped: Vec<String> = candidates
            .iter()
            .map(|c| c.chars().take(RERANK_SNIPPET_CHARS).collect())
            .collect();

        let result = async {
            let resp = self
                .client
                .post(endpoint)
                .timeout(std::time::Duration::from_secs(RERANK_TIMEOUT_SECS))
                .json(&serde_json::json!({ "query": query, "documents": clipped }))
                .send()
                .await?
                .error_for_status()?;
            resp.json::<RerankResponse>().await
        }
        .await;

        match result {
            Ok(r) if r.scores.len() == candidates.len() => Some(r.scores),
            Ok(r) => {
                tracing::warn!(
                    "reranker returned {} scores for {} candidates — ignoring",
                    r.scores.len(),
                    candidates.len()
                );
                None
            }
            Err(e) => {
                tracing::warn!("rerank call failed: {}", e);
                None
            }
        }
    }
}
