//! Knowledge search boundary
//!
//! Semantic search over the ingested knowledge base is an external
//! collaborator; core code depends on the [`KnowledgeSearch`] trait.
//! [`IndexedKnowledgeSearch`] adapts the local platform index by scoping
//! queries to the tenant's facts namespace.

use crate::error::Result;
use crate::namespace::{MemoryKind, MemorySettings, resolve_namespace};
use crate::platform::IndexedMemoryPlatform;
use crate::platform::MemoryPlatform;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One scored chunk returned by the knowledge search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub score: f32,
    pub source: String,
    pub chunk_id: Option<String>,
    pub document_id: Option<String>,
}

/// Knowledge search contract
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn search(&self, query: &str, tenant_id: &str, top_k: usize) -> Result<Vec<SearchHit>>;
}

/// Adapter over the local BM25 record index, scoped to the facts namespace.
///
/// Fact records are indexed with `content` and `source` fields; the tenant
/// id stands in for the per-user scope because knowledge is shared across a
/// tenant's users.
pub struct IndexedKnowledgeSearch {
    platform: Arc<IndexedMemoryPlatform>,
    settings: MemorySettings,
}

impl IndexedKnowledgeSearch {
    pub fn new(platform: Arc<IndexedMemoryPlatform>, settings: MemorySettings) -> Self {
        Self { platform, settings }
    }

    fn namespace(&self, tenant_id: &str) -> String {
        resolve_namespace(
            &self.settings,
            MemoryKind::Facts,
            "shared",
            Some(tenant_id),
        )
    }

    /// Ingest one knowledge chunk for a tenant
    pub fn put_fact(
        &self,
        tenant_id: &str,
        content: &str,
        source: &str,
        document_id: Option<&str>,
    ) -> Result<String> {
        self.platform.put_record(
            &self.namespace(tenant_id),
            serde_json::json!({
                "content": content,
                "source": source,
                "document_id": document_id,
            }),
        )
    }
}

#[async_trait]
impl KnowledgeSearch for IndexedKnowledgeSearch {
    async fn search(&self, query: &str, tenant_id: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let records = self
            .platform
            .retrieve(&self.namespace(tenant_id), query, top_k, 0.0)
            .await?;

        Ok(records
            .into_iter()
            .map(|record| SearchHit {
                content: record
                    .content
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                score: record.score,
                source: record
                    .content
                    .get("source")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown")
                    .to_string(),
                chunk_id: Some(record.id),
                document_id: record
                    .content
                    .get("document_id")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> IndexedKnowledgeSearch {
        IndexedKnowledgeSearch::new(
            Arc::new(IndexedMemoryPlatform::new().unwrap()),
            MemorySettings::default(),
        )
    }

    #[tokio::test]
    async fn facts_are_searchable_per_tenant() {
        let search = fixture();
        search
            .put_fact(
                "t1",
                "To reset your password, open Settings and choose Reset Password.",
                "help-center.md",
                Some("doc-1"),
            )
            .unwrap();

        let hits = search.search("reset password", "t1", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "help-center.md");
        assert_eq!(hits[0].document_id.as_deref(), Some("doc-1"));

        let other = search.search("reset password", "t2", 5).await.unwrap();
        assert!(other.is_empty());
    }
}
