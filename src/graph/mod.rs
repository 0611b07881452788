use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use neo4rs::{query, Graph};
use serde_json::Value;

use crate::core::config;

// ---------------------------------------------------------------------------
// Graph store session. Every mutation goes through apply_event with MERGE
// semantics keyed on stable ids, so replaying a committed outbox row is a
// no-op - the invariant the crash-recovery story leans on.
// ---------------------------------------------------------------------------

pub const LABEL_ALLOWLIST: &[&str] = &["Person", "Document", "Concept", "Chunk"];
const MAX_NODE_RESULTS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxEvent {
    DocumentAdded,
    EntityDeleted,
    PersonMerged,
    EntityUpdated,
    EntityHardDeleted,
    ConceptAdded,
}

impl OutboxEvent {
    pub fn parse(s: &str) -> Option<OutboxEvent> {
        match s {
            "document_added" => Some(OutboxEvent::DocumentAdded),
            "entity_deleted" => Some(OutboxEvent::EntityDeleted),
            "person_merged" => Some(OutboxEvent::PersonMerged),
            "entity_updated" => Some(OutboxEvent::EntityUpdated),
            "entity_hard_deleted" => Some(OutboxEvent::EntityHardDeleted),
            "concept_added" => Some(OutboxEvent::ConceptAdded),
            _ => None,
        }
    }
}

/// The drainer's view of the graph store. A seam for swapping the backend
/// (or a test double) without touching the outbox loop.
#[async_trait]
pub trait GraphSink: Send + Sync {
    async fn apply(&self, event_type: &str, payload: &Value) -> Result<()>;
    async fn healthy(&self) -> bool;
}

#[async_trait]
impl GraphSink for GraphStore {
    async fn apply(&self, event_type: &str, payload: &Value) -> Result<()> {
        self.apply_event(event_type, payload).await
    }

    async fn healthy(&self) -> bool {
        self.ping().await
    }
}

pub struct GraphStore {
    graph: Graph,
}

impl GraphStore {
    /// Connect with bounded exponential backoff. The drainer refuses to
    /// start without a session; the supervisor restarts the process.
    pub async fn connect() -> Result<Self> {
        let uri = config::graph_uri();
        let user = config::graph_user();
        let password = config::graph_password();

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_secs(60))
            .with_max_elapsed_time(Some(Duration::from_secs(600)))
            .build();

        let graph = backoff::future::retry(policy, || {
            let (uri, user, password) = (uri.clone(), user.clone(), password.clone());
            async move {
                Graph::new(&uri, &user, &password).await.map_err(|e| {
                    tracing::warn!("graph connect retry: {}", e);
                    backoff::Error::transient(e)
                })
            }
        })
        .await
        .context("graph store unreachable after bounded retries")?;

        tracing::info!("graph store connected at {}", uri);
        Ok(Self { graph })
    }

    pub async fn ping(&self) -> bool {
        self.graph.run(query("RETURN 1")).await.is_ok()
    }

    /// Apply one outbox event. Unknown event types are an error (the row
    /// dead-letters after the attempt budget).
    pub async fn apply_event(&self, event_type: &str, payload: &Value) -> Result<()> {
        let event = OutboxEvent::parse(event_type)
            .with_context(|| format!("unknown outbox event type '{}'", event_type))?;
        match event {
            OutboxEvent::DocumentAdded => self.apply_document_added(payload).await,
            OutboxEvent::EntityDeleted | OutboxEvent::EntityHardDeleted => {
                self.apply_entity_deleted(payload).await
            }
            OutboxEvent::PersonMerged => self.apply_person_merged(payload).await,
            OutboxEvent::EntityUpdated => self.apply_entity_updated(payload).await,
            OutboxEvent::ConceptAdded => self.apply_concept_added(payload).await,
        }
    }

    async fn apply_document_added(&self, payload: &Value) -> Result<()> {
        let doc_id = str_field(payload, "doc_id")?;
        let source_path = payload["source_path"].as_str().unwrap_or_default();
        let doc_title = match source_path.rsplit('/').next() {
            Some(name) if !name.is_empty() => name,
            _ => "Document",
        };
        let ts = payload["ingested_at"].as_str().unwrap_or_default();
        let sender = &payload["sender"];

        let (cypher, params) = document_added_cypher(payload, doc_id, source_path, doc_title, ts, sender);

        let mut q = query(&cypher);
        for (k, v) in params {
            q = q.param(&k, v);
        }
        self.graph.run(q).await.context("document_added apply failed")?;
        Ok(())
    }

    async fn apply_entity_deleted(&self, payload: &Value) -> Result<()> {
        let id = payload["entity_id"]
            .as_str()
            .or_else(|| payload["id"].as_str())
            .context("entity_deleted payload missing id")?;
        self.graph
            .run(query("MATCH (n {id: $id}) DETACH DELETE n").param("id", id.to_string()))
            .await
            .context("entity delete apply failed")?;
        Ok(())
    }

    async fn apply_person_merged(&self, payload: &Value) -> Result<()> {
        let from_id = str_field(payload, "merged_from")?;
        let ts = payload["merged_at"].as_str().unwrap_or_default();
        self.graph
            .run(
                query("MATCH (a:Person {id: $from_id})-[r]->() SET r.invalid_at = $ts")
                    .param("from_id", from_id.to_string())
                    .param("ts", ts.to_string()),
            )
            .await
            .context("person_merged apply failed")?;
        Ok(())
    }

    async fn apply_entity_updated(&self, payload: &Value) -> Result<()> {
        let id = str_field(payload, "entity_id")?;
        let Some(diffs) = payload["diffs"].as_object() else {
            return Ok(());
        };

        let mut setters = Vec::new();
        let mut params: Vec<(String, String)> = vec![("id".to_string(), id.to_string())];
        for (key, value) in diffs {
            let prop: String = key
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if prop.is_empty() || value.is_null() {
                continue;
            }
            let param = format!("p_{}", prop);
            setters.push(format!("n.`{}` = ${}", prop, param));
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            params.push((param, rendered));
        }
        if setters.is_empty() {
            return Ok(());
        }

        let cypher = format!("MATCH (n {{id: $id}}) SET {}", setters.join(", "));
        let mut q = query(&cypher);
        for (k, v) in params {
            q = q.param(&k, v);
        }
        self.graph.run(q).await.context("entity_updated apply failed")?;
        Ok(())
    }

    async fn apply_concept_added(&self, payload: &Value) -> Result<()> {
        let chunk_id = str_field(payload, "chunk_id")?;
        let name = str_field(payload, "entity_text")?;
        let label = payload["entity_label"].as_str().unwrap_or("CONCEPT");
        let ts = payload["valid_at"].as_str().unwrap_or_default();
        self.graph
            .run(
                query(
                    "MERGE (c:Concept {name: $name, kind: $kind}) \
                     MERGE (ch:Chunk {id: $chunk_id}) \
                     MERGE (ch)-[m:MENTIONS]->(c) \
                     ON CREATE SET m.valid_at = $ts",
                )
                .param("name", name.to_string())
                .param("kind", label.to_string())
                .param("chunk_id", chunk_id.to_string())
                .param("ts", ts.to_string()),
            )
            .await
            .context("concept_added apply failed")?;
        Ok(())
    }

    /// Node lookup for the operator API. `label` must come from the
    /// allowlist (validated at the HTTP layer); property values are always
    /// passed as parameters.
    pub async fn nodes(
        &self,
        label: &str,
        filters: &[(String, String)],
    ) -> Result<Vec<serde_json::Map<String, Value>>> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        for (prop, value) in filters {
            let safe: String = prop
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if safe.is_empty() {
                continue;
            }
            let name = format!("p_{}", safe);
            conditions.push(format!("n.`{}` = ${}", safe, name));
            params.push((name, value.clone()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let cypher = format!(
            "MATCH (n:{}){} RETURN n LIMIT {}",
            label, where_clause, MAX_NODE_RESULTS
        );

        let mut q = query(&cypher);
        for (k, v) in params {
            q = q.param(&k, v);
        }

        let mut stream = self.graph.execute(q).await.context("graph query failed")?;
        let mut out = Vec::new();
        while let Some(row) = stream.next().await.context("graph row read failed")? {
            let node: neo4rs::Node = row.get("n").context("graph row missing node")?;
            out.push(node_properties(&node));
        }
        Ok(out)
    }
}

fn node_properties(node: &neo4rs::Node) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    for key in node.keys() {
        let value = if let Ok(s) = node.get::<String>(key) {
            Value::String(s)
        } else if let Ok(i) = node.get::<i64>(key) {
            Value::from(i)
        } else if let Ok(f) = node.get::<f64>(key) {
            Value::from(f)
        } else if let Ok(b) = node.get::<bool>(key) {
            Value::Bool(b)
        } else {
            continue;
        };
        map.insert(key.to_string(), value);
    }
    map
}

fn str_field<'a>(payload: &'a Value, key: &str) -> Result<&'a str> {
    payload[key]
        .as_str()
        .with_context(|| format!("payload missing '{}'", key))
}

/// One batched Cypher statement upserting sender, document, the SENT edge
/// and every recipient with its RECEIVED edge. All edges carry valid_at.
fn document_added_cypher(
    payload: &Value,
    doc_id: &str,
    source_path: &str,
    doc_title: &str,
    ts: &str,
    sender: &Value,
) -> (String, Vec<(String, String)>) {
    let mut parts = vec![
        "MERGE (sender:Person {email: $sender_email}) \
         ON CREATE SET sender.id = $sender_id, sender.display_name = $sender_name, sender.pii = true \
         MERGE (d:Document {id: $doc_id}) \
         ON CREATE SET d.source_path = $path, d.source_type = $type, d.title = $title, d.ingested_at = $ts \
         MERGE (sender)-[sr:SENT {thread_id: $doc_id}]->(d) \
         ON CREATE SET sr.valid_at = $ts"
            .to_string(),
    ];
    let mut params: Vec<(String, String)> = vec![
        (
            "sender_email".into(),
            sender["email"].as_str().unwrap_or("unknown@unknown").to_string(),
        ),
        (
            "sender_id".into(),
            sender["id"].as_str().unwrap_or(doc_id).to_string(),
        ),
        (
            "sender_name".into(),
            sender["name"].as_str().unwrap_or_default().to_string(),
        ),
        ("doc_id".into(), doc_id.to_string()),
        ("path".into(), source_path.to_string()),
        ("title".into(), doc_title.to_string()),
        (
            "type".into(),
            payload["source_type"].as_str().unwrap_or_default().to_string(),
        ),
        ("ts".into(), ts.to_string()),
    ];

    if let Some(recipients) = payload["recipients"].as_array() {
        for (i, r) in recipients.iter().enumerate() {
            let Some(email) = r["email"].as_str() else {
                continue;
            };
            parts.push(format!(
                "MERGE (r{i}:Person {{email: $remail_{i}}}) \
                 ON CREATE SET r{i}.pii = true \
                 MERGE (r{i})-[rel{i}:RECEIVED {{thread_id: $doc_id, field: $rfield_{i}}}]->(d) \
                 ON CREATE SET rel{i}.valid_at = $ts"
            ));
            params.push((format!("remail_{i}"), email.to_string()));
            params.push((
                format!("rfield_{i}"),
                r["field"].as_str().unwrap_or("to").to_string(),
            ));
        }
    }

    (parts.join(" "), params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_types_round_trip() {
        for name in [
            "document_added",
            "entity_deleted",
            "person_merged",
            "entity_updated",
            "entity_hard_deleted",
            "concept_added",
        ] {
            assert!(OutboxEvent::parse(name).is_some(), "{} should parse", name);
        }
        assert!(OutboxEvent::parse("bogus").is_none());
    }

    #[test]
    fn document_added_cypher_covers_all_recipients() {
        let payload = json!({
            "doc_id": "d1",
            "source_path": "/drop-zone/inbox.mbox",
            "source_type": "mail",
            "ingested_at": "2026-01-01T00:00:00Z",
            "sender": { "id": "p1", "email": "alice@example.com", "name": "Alice" },
            "recipients": [
                { "email": "bob@example.com", "name": "Bob", "field": "to" },
                { "email": "carol@example.com", "name": "", "field": "cc" },
            ],
        });
        let (cypher, params) = document_added_cypher(
            &payload,
            "d1",
            "/drop-zone/inbox.mbox",
            "inbox.mbox",
            "2026-01-01T00:00:00Z",
            &payload["sender"],
        );

        // Idempotent MERGE everywhere, no CREATE.
        assert!(!cypher.contains("CREATE ("));
        assert!(cypher.matches("MERGE").count() >= 5);
        assert!(cypher.contains("[:SENT") || cypher.contains("sr:SENT"));
        assert!(cypher.contains("rel0:RECEIVED"));
        assert!(cypher.contains("rel1:RECEIVED"));
        assert!(params.iter().any(|(k, v)| k == "remail_0" && v == "bob@example.com"));
        assert!(params.iter().any(|(k, v)| k == "rfield_1" && v == "cc"));
        // Every $param placeholder has a binding.
        for (key, _) in &params {
            assert!(cypher.contains(&format!("${}", key)), "unbound param {}", key);
        }
    }
}
