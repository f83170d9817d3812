//! Memory platform client boundary
//!
//! The platform stores raw interaction turns, derives episodes and
//! reflections from them, and serves scored semantic retrieval over a
//! namespace. Core code depends only on the [`MemoryPlatform`] trait;
//! [`IndexedMemoryPlatform`] is the local adapter, indexing record text with
//! Tantivy BM25 and keeping session transcripts in process.

use crate::error::{Result, StrataError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tantivy::collector::TopDocs;
use tantivy::query::{AllQuery, BooleanQuery, Occur, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of a best-effort tier retrieval.
///
/// Collaborator failures degrade to an empty result instead of failing the
/// request; this type keeps the two paths distinguishable so callers and
/// tests can assert on them. A degraded retrieval still carries the fallback
/// value (usually empty) the caller should proceed with.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval<T> {
    Healthy(T),
    Degraded { value: T, reason: String },
}

impl<T> Retrieval<T> {
    pub fn value(&self) -> &T {
        match self {
            Retrieval::Healthy(value) => value,
            Retrieval::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Retrieval::Healthy(value) => value,
            Retrieval::Degraded { value, .. } => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Retrieval::Degraded { .. })
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            Retrieval::Healthy(_) => None,
            Retrieval::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Retrieval::Degraded {
            value,
            reason: reason.into(),
        }
    }
}

/// A record retrieved from the platform's semantic store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub namespace: String,
    pub content: serde_json::Value,
    pub score: f32,
    pub timestamp: String,
}

/// One turn message as stored in a session transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Low-level memory platform contract
#[async_trait]
pub trait MemoryPlatform: Send + Sync {
    /// Store an interaction event (turn messages) for a session; the
    /// platform detects episode boundaries from these
    async fn create_event(
        &self,
        actor_id: &str,
        session_id: &str,
        messages: &[(String, String)],
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    /// Scored semantic retrieval over a namespace; records below
    /// `min_score` are excluded before returning
    async fn retrieve(
        &self,
        namespace: &str,
        query: &str,
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<MemoryRecord>>;

    /// Conversation history for a session, oldest first
    async fn session_messages(
        &self,
        actor_id: &str,
        session_id: &str,
        max_messages: usize,
    ) -> Result<Vec<TurnMessage>>;

    /// Delete a session's short-term transcript
    async fn delete_session(&self, actor_id: &str, session_id: &str) -> Result<bool>;

    async fn health_check(&self) -> bool;
}

/// Tantivy schema field handles
struct RecordFields {
    record_id: Field,
    namespace: Field,
    text: Field,
    content_json: Field,
    timestamp: Field,
}

/// Local platform adapter: BM25 record index plus in-process transcripts
pub struct IndexedMemoryPlatform {
    index: Index,
    reader: IndexReader,
    fields: RecordFields,
    transcripts: RwLock<HashMap<String, Vec<TurnMessage>>>,
}

impl std::fmt::Debug for IndexedMemoryPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedMemoryPlatform")
            .field("index", &"<TantivyIndex>")
            .finish()
    }
}

impl IndexedMemoryPlatform {
    fn build_schema() -> (Schema, RecordFields) {
        let mut schema_builder = Schema::builder();

        let record_id = schema_builder.add_text_field("record_id", STRING | STORED);
        let namespace = schema_builder.add_text_field("namespace", STRING | STORED);
        let text = schema_builder.add_text_field("text", TEXT | STORED);
        let content_json = schema_builder.add_text_field("content_json", STORED);
        let timestamp = schema_builder.add_text_field("timestamp", STRING | STORED);

        let schema = schema_builder.build();
        let fields = RecordFields {
            record_id,
            namespace,
            text,
            content_json,
            timestamp,
        };

        (schema, fields)
    }

    /// Create an adapter with an in-memory index
    pub fn new() -> Result<Self> {
        let (schema, fields) = Self::build_schema();
        let index = Index::create_in_ram(schema);

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| StrataError::SearchIndex(format!("Failed to create reader: {e}")))?;

        Ok(Self {
            index,
            reader,
            fields,
            transcripts: RwLock::new(HashMap::new()),
        })
    }

    fn transcript_key(actor_id: &str, session_id: &str) -> String {
        format!("{}:{}", actor_id, session_id)
    }

    /// Index a derived record (episode, reflection, fact) under a namespace.
    ///
    /// The searchable text is every string leaf of the content document, so
    /// retrieval matches on situations, intents, insights and patterns alike.
    pub fn put_record(&self, namespace: &str, content: serde_json::Value) -> Result<String> {
        let record_id = Uuid::new_v4().to_string();
        let text = flatten_text(&content);
        let content_json = serde_json::to_string(&content)
            .map_err(|e| StrataError::Serialization(e.to_string()))?;

        let mut writer: IndexWriter = self
            .index
            .writer(15_000_000)
            .map_err(|e| StrataError::SearchIndex(format!("Failed to create writer: {e}")))?;

        writer
            .add_document(doc!(
                self.fields.record_id => record_id.as_str(),
                self.fields.namespace => namespace,
                self.fields.text => text.as_str(),
                self.fields.content_json => content_json.as_str(),
                self.fields.timestamp => Utc::now().to_rfc3339().as_str(),
            ))
            .map_err(|e| StrataError::SearchIndex(format!("Failed to add document: {e}")))?;

        writer
            .commit()
            .map_err(|e| StrataError::SearchIndex(format!("Failed to commit: {e}")))?;

        self.reader
            .reload()
            .map_err(|e| StrataError::SearchIndex(format!("Failed to reload reader: {e}")))?;

        Ok(record_id)
    }

    fn namespace_query(&self, namespace: &str) -> TermQuery {
        TermQuery::new(
            Term::from_field_text(self.fields.namespace, namespace),
            IndexRecordOption::Basic,
        )
    }
}

#[async_trait]
impl MemoryPlatform for IndexedMemoryPlatform {
    async fn create_event(
        &self,
        actor_id: &str,
        session_id: &str,
        messages: &[(String, String)],
        _metadata: HashMap<String, String>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut transcripts = self.transcripts.write().await;
        let turns = transcripts
            .entry(Self::transcript_key(actor_id, session_id))
            .or_default();
        for (content, role) in messages {
            turns.push(TurnMessage {
                role: role.to_lowercase(),
                content: content.clone(),
                timestamp: now,
            });
        }
        tracing::debug!(
            "memory event created for {} ({} messages)",
            session_id,
            messages.len()
        );
        Ok(())
    }

    async fn retrieve(
        &self,
        namespace: &str,
        query: &str,
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<MemoryRecord>> {
        let searcher = self.reader.searcher();
        let namespace_filter = self.namespace_query(namespace);

        let trimmed = query.trim();
        let final_query: Box<dyn tantivy::query::Query> = if trimmed.is_empty() || trimmed == "*" {
            Box::new(BooleanQuery::new(vec![
                (Occur::Must, Box::new(namespace_filter)),
                (Occur::Must, Box::new(AllQuery)),
            ]))
        } else {
            let query_parser = QueryParser::for_index(&self.index, vec![self.fields.text]);
            let (parsed, _errors) = query_parser.parse_query_lenient(trimmed);
            Box::new(BooleanQuery::new(vec![
                (Occur::Must, Box::new(namespace_filter)),
                (Occur::Must, parsed),
            ]))
        };

        let top_docs = searcher
            .search(&final_query, &TopDocs::with_limit(max_results.max(1)))
            .map_err(|e| StrataError::SearchIndex(format!("Search failed: {e}")))?;

        // BM25 scores are unbounded; normalize against the top hit so the
        // min_score threshold works on a 0..=1 scale.
        let top_score = top_docs.first().map(|(score, _)| *score).unwrap_or(1.0);

        let mut records = Vec::new();
        for (raw_score, doc_address) in top_docs {
            let doc: tantivy::TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| StrataError::SearchIndex(format!("Doc fetch failed: {e}")))?;

            let score = if top_score > 0.0 {
                raw_score / top_score
            } else {
                0.0
            };
            if score < min_score {
                continue;
            }

            let content = doc
                .get_first(self.fields.content_json)
                .and_then(|v| v.as_str())
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(serde_json::Value::Null);

            records.push(MemoryRecord {
                id: doc
                    .get_first(self.fields.record_id)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                namespace: namespace.to_string(),
                content,
                score,
                timestamp: doc
                    .get_first(self.fields.timestamp)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        Ok(records)
    }

    async fn session_messages(
        &self,
        actor_id: &str,
        session_id: &str,
        max_messages: usize,
    ) -> Result<Vec<TurnMessage>> {
        let transcripts = self.transcripts.read().await;
        let turns = transcripts
            .get(&Self::transcript_key(actor_id, session_id))
            .cloned()
            .unwrap_or_default();

        let skip = turns.len().saturating_sub(max_messages);
        Ok(turns.into_iter().skip(skip).collect())
    }

    async fn delete_session(&self, actor_id: &str, session_id: &str) -> Result<bool> {
        let mut transcripts = self.transcripts.write().await;
        Ok(transcripts
            .remove(&Self::transcript_key(actor_id, session_id))
            .is_some())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Concatenate every string leaf of a JSON document into searchable text
fn flatten_text(value: &serde_json::Value) -> String {
    let mut parts = Vec::new();
    collect_strings(value, &mut parts);
    parts.join(" ")
}

fn collect_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_strings(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_and_retrieve_scoped_by_namespace() {
        let platform = IndexedMemoryPlatform::new().unwrap();
        platform
            .put_record(
                "/tenant/t1/episodes/u1",
                json!({"situation": "password reset request", "intent": "reset password"}),
            )
            .unwrap();
        platform
            .put_record(
                "/tenant/t2/episodes/u1",
                json!({"situation": "password reset request", "intent": "reset password"}),
            )
            .unwrap();

        let hits = platform
            .retrieve("/tenant/t1/episodes/u1", "password reset", 5, 0.0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].namespace, "/tenant/t1/episodes/u1");
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn retrieve_filters_below_min_score() {
        let platform = IndexedMemoryPlatform::new().unwrap();
        platform
            .put_record("/episodes/u1", json!({"situation": "password reset steps"}))
            .unwrap();
        platform
            .put_record("/episodes/u1", json!({"situation": "billing dispute refund"}))
            .unwrap();

        let hits = platform
            .retrieve("/episodes/u1", "password reset", 5, 0.9)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content["situation"]
            .as_str()
            .unwrap()
            .contains("password"));
    }

    #[tokio::test]
    async fn broad_query_returns_everything_in_namespace() {
        let platform = IndexedMemoryPlatform::new().unwrap();
        platform
            .put_record("/episodes/u1", json!({"situation": "a"}))
            .unwrap();
        platform
            .put_record("/episodes/u1", json!({"situation": "b"}))
            .unwrap();

        let hits = platform.retrieve("/episodes/u1", "*", 10, 0.0).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn transcripts_round_trip_and_cap() {
        let platform = IndexedMemoryPlatform::new().unwrap();
        for i in 0..5 {
            platform
                .create_event(
                    "u1",
                    "s1",
                    &[(format!("message {i}"), "USER".to_string())],
                    HashMap::new(),
                )
                .await
                .unwrap();
        }

        let recent = platform.session_messages("u1", "s1", 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "message 2");
        assert_eq!(recent[0].role, "user");

        assert!(platform.delete_session("u1", "s1").await.unwrap());
        assert!(platform
            .session_messages("u1", "s1", 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn retrieval_degraded_yields_empty_value() {
        let degraded: Retrieval<Vec<MemoryRecord>> =
            Retrieval::degraded(Vec::new(), "platform down");
        assert!(degraded.is_degraded());
        assert_eq!(degraded.degraded_reason(), Some("platform down"));
        assert!(degraded.into_value().is_empty());
    }
}
