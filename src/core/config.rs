use std::collections::HashMap;
use std::path::PathBuf;

use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Environment knobs - deployment-level settings read once at startup.
// Runtime tuning (fusion weights, chunk sizes, cache TTL) lives in the
// `config` DB table and is read per-operation via `load_runtime_config`.
// ---------------------------------------------------------------------------

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_DROP_ZONE: &str = "DROP_ZONE_PATH";
pub const ENV_OLLAMA_URL: &str = "OLLAMA_URL";
pub const ENV_GRAPH_URI: &str = "GRAPH_URI";
pub const ENV_GRAPH_USER: &str = "GRAPH_USER";
pub const ENV_GRAPH_PASSWORD: &str = "GRAPH_PASSWORD";
pub const ENV_RERANK_URL: &str = "RERANK_URL";
pub const ENV_RETENTION_DAYS: &str = "RETENTION_DAYS";
pub const ENV_DELETION_LOG: &str = "DELETION_LOG_PATH";
pub const ENV_API_KEY_READ: &str = "API_KEY_READ";
pub const ENV_API_KEY_WRITE: &str = "API_KEY_WRITE";
pub const ENV_NER_DISABLED: &str = "PACKRAT_NER_DISABLED";

fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn drop_zone_path() -> PathBuf {
    PathBuf::from(env_trimmed(ENV_DROP_ZONE).unwrap_or_else(|| "./drop-zone".to_string()))
}

pub fn ollama_url() -> String {
    env_trimmed(ENV_OLLAMA_URL).unwrap_or_else(|| "http://localhost:11434".to_string())
}

/// Bolt URI of the graph store, e.g. `bolt://localhost:7687`.
pub fn graph_uri() -> String {
    env_trimmed(ENV_GRAPH_URI).unwrap_or_else(|| "bolt://localhost:7687".to_string())
}

pub fn graph_user() -> String {
    env_trimmed(ENV_GRAPH_USER).unwrap_or_else(|| "neo4j".to_string())
}

pub fn graph_password() -> String {
    env_trimmed(ENV_GRAPH_PASSWORD).unwrap_or_default()
}

/// Cross-encoder scoring endpoint. Unset means the reranker is unavailable
/// and search degrades to fusion order.
pub fn rerank_url() -> Option<String> {
    env_trimmed(ENV_RERANK_URL)
}

pub fn retention_days() -> i64 {
    env_trimmed(ENV_RETENTION_DAYS)
        .and_then(|v| v.parse().ok())
        .unwrap_or(30)
}

pub fn deletion_log_path() -> PathBuf {
    PathBuf::from(
        env_trimmed(ENV_DELETION_LOG).unwrap_or_else(|| "./data/deletion_log.jsonl".to_string()),
    )
}

/// (read_key, write_key). Both `None` disables auth entirely (dev mode).
pub fn api_keys() -> (Option<String>, Option<String>) {
    (env_trimmed(ENV_API_KEY_READ), env_trimmed(ENV_API_KEY_WRITE))
}

pub fn ner_disabled() -> bool {
    let Some(v) = env_trimmed(ENV_NER_DISABLED) else {
        return false;
    };
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

// ---------------------------------------------------------------------------
// Runtime config table
// ---------------------------------------------------------------------------

/// The enumerated set of runtime-tunable keys. Rows in the `config` table
/// with keys outside this set are logged and ignored, never silently applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    Bm25Weight,
    VectorWeight,
    RrfK,
    ChunkSize,
    ChunkOverlap,
    EmbedModel,
    EmbedRetryMax,
    SearchCacheTtl,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 8] = [
        ConfigKey::Bm25Weight,
        ConfigKey::VectorWeight,
        ConfigKey::RrfK,
        ConfigKey::ChunkSize,
        ConfigKey::ChunkOverlap,
        ConfigKey::EmbedModel,
        ConfigKey::EmbedRetryMax,
        ConfigKey::SearchCacheTtl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::Bm25Weight => "bm25_weight",
            ConfigKey::VectorWeight => "vector_weight",
            ConfigKey::RrfK => "rrf_k",
            ConfigKey::ChunkSize => "chunk_size",
            ConfigKey::ChunkOverlap => "chunk_overlap",
            ConfigKey::EmbedModel => "embed_model",
            ConfigKey::EmbedRetryMax => "embed_retry_max",
            ConfigKey::SearchCacheTtl => "search_cache_ttl",
        }
    }

    pub fn from_str(key: &str) -> Option<ConfigKey> {
        Self::ALL.iter().copied().find(|k| k.as_str() == key)
    }
}

/// Runtime configuration snapshot, coerced to concrete types.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub bm25_weight: f64,
    pub vector_weight: f64,
    pub rrf_k: u32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_model: String,
    pub embed_retry_max: i32,
    pub search_cache_ttl: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bm25_weight: 0.5,
            vector_weight: 0.5,
            rrf_k: 60,
            chunk_size: 512,
            chunk_overlap: 50,
            embed_model: env_trimmed("EMBED_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".to_string()),
            embed_retry_max: 5,
            search_cache_ttl: 60,
        }
    }
}

impl RuntimeConfig {
    /// Whether the operator moved the fusion weights off the 0.5/0.5 default.
    pub fn use_weighted_fusion(&self) -> bool {
        (self.bm25_weight - 0.5).abs() > 0.01 || (self.vector_weight - 0.5).abs() > 0.01
    }

    pub fn to_map(&self) -> HashMap<&'static str, serde_json::Value> {
        HashMap::from([
            ("bm25_weight", serde_json::json!(self.bm25_weight)),
            ("vector_weight", serde_json::json!(self.vector_weight)),
            ("rrf_k", serde_json::json!(self.rrf_k)),
            ("chunk_size", serde_json::json!(self.chunk_size)),
            ("chunk_overlap", serde_json::json!(self.chunk_overlap)),
            ("embed_model", serde_json::json!(self.embed_model)),
            ("embed_retry_max", serde_json::json!(self.embed_retry_max)),
            ("search_cache_ttl", serde_json::json!(self.search_cache_ttl)),
        ])
    }

    /// Apply one `(value, type_tag)` pair from the config table. Returns
    /// false when the value cannot be coerced to the declared type.
    fn apply(&mut self, key: ConfigKey, value: &str, value_type: &str) -> bool {
        match (key, value_type) {
            (ConfigKey::Bm25Weight, "float") => parse_into(value, &mut self.bm25_weight),
            (ConfigKey::VectorWeight, "float") => parse_into(value, &mut self.vector_weight),
            (ConfigKey::RrfK, "int") => parse_into(value, &mut self.rrf_k),
            (ConfigKey::ChunkSize, "int") => parse_into(value, &mut self.chunk_size),
            (ConfigKey::ChunkOverlap, "int") => parse_into(value, &mut self.chunk_overlap),
            (ConfigKey::EmbedModel, "str") => {
                self.embed_model = value.to_string();
                true
            }
            (ConfigKey::EmbedRetryMax, "int") => parse_into(value, &mut self.embed_retry_max),
            (ConfigKey::SearchCacheTtl, "int") => parse_into(value, &mut self.search_cache_ttl),
            _ => false,
        }
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) -> bool {
    match value.trim().parse::<T>() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}

/// Read the full runtime config from the `config` table, coercing each row
/// by its declared type tag. Falls back to defaults when the table is
/// unreadable - a degraded read never takes the query path down with it.
pub async fn load_runtime_config(pool: &PgPool) -> RuntimeConfig {
    let mut cfg = RuntimeConfig::default();
    let rows: Result<Vec<(String, String, String)>, sqlx::Error> =
        sqlx::query_as("SELECT key, value, value_type FROM config")
            .fetch_all(pool)
            .await;

    match rows {
        Ok(rows) => {
            for (key, value, value_type) in rows {
                match ConfigKey::from_str(&key) {
                    Some(k) => {
                        if !cfg.apply(k, &value, &value_type) {
                            tracing::warn!(
                                "config row '{}' has bad value '{}' for type '{}' — keeping default",
                                key,
                                value,
                                value_type
                            );
                        }
                    }
                    None => tracing::warn!("unknown config key '{}' ignored", key),
                }
            }
        }
        Err(e) => {
            tracing::warn!("config read failed: {} — using defaults", e);
        }
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_balanced() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.bm25_weight, 0.5);
        assert_eq!(cfg.vector_weight, 0.5);
        assert!(!cfg.use_weighted_fusion());
    }

    #[test]
    fn apply_coerces_by_type_tag() {
        let mut cfg = RuntimeConfig::default();
        assert!(cfg.apply(ConfigKey::RrfK, "90", "int"));
        assert_eq!(cfg.rrf_k, 90);
        assert!(cfg.apply(ConfigKey::Bm25Weight, "0.8", "float"));
        assert_eq!(cfg.bm25_weight, 0.8);
        // Wrong tag is rejected, value untouched.
        assert!(!cfg.apply(ConfigKey::RrfK, "0.5", "float"));
        assert_eq!(cfg.rrf_k, 90);
        // Garbage value is rejected.
        assert!(!cfg.apply(ConfigKey::ChunkSize, "not-a-number", "int"));
        assert_eq!(cfg.chunk_size, 512);
    }

    #[test]
    fn weighted_fusion_triggers_on_divergence() {
        let mut cfg = RuntimeConfig::default();
        cfg.bm25_weight = 0.9;
        cfg.vector_weight = 0.1;
        assert!(cfg.use_weighted_fusion());
        cfg.bm25_weight = 0.505;
        cfg.vector_weight = 0.5;
        assert!(!cfg.use_weighted_fusion());
    }

    #[test]
    fn every_key_round_trips() {
        for k in ConfigKey::ALL {
            assert_eq!(ConfigKey::from_str(k.as_str()), Some(k));
        }
        assert_eq!(ConfigKey::from_str("no_such_key"), None);
    }
}
