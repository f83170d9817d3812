//! Session memory - short-term conversation context
//!
//! Serves recent turns from an in-process cache keyed by
//! `(user_id, session_id)`, rebuilding from the platform on a miss. History
//! unavailability never blocks an interaction: failures degrade to an empty
//! new session.

use crate::error::{Result, StrataError};
use crate::namespace::MemorySettings;
use crate::platform::{MemoryPlatform, Retrieval};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A single conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

/// The conversation context for one session.
///
/// Owned exclusively by the cache entry keyed `(user_id, session_id)`;
/// never shared across tenants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn add_message(&mut self, role: impl Into<String>, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
        self.updated_at = Utc::now();
    }

    /// The most recent `count` messages, oldest first
    pub fn recent(&self, count: usize) -> &[Message] {
        let skip = self.messages.len().saturating_sub(count);
        &self.messages[skip..]
    }
}

/// Cache key for one session's context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn session(user_id: &str, session_id: &str) -> Self {
        Self(format!("{}:{}", user_id, session_id))
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheEntry {
    data: Vec<u8>,
    inserted_at: DateTime<Utc>,
}

/// In-memory session cache with TTL and capacity eviction
pub struct SessionCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    max_entries: usize,
    ttl: Duration,
    stats: RwLock<CacheStats>,
}

impl SessionCache {
    pub fn new(max_entries: usize, ttl_seconds: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
            ttl: Duration::seconds(ttl_seconds as i64),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<SessionContext> {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(key) {
            let fresh = Utc::now() - entry.inserted_at < self.ttl;
            if fresh {
                if let Ok(context) = bincode::deserialize(&entry.data) {
                    self.stats.write().await.hits += 1;
                    return Some(context);
                }
            }
        }
        self.stats.write().await.misses += 1;
        None
    }

    pub async fn put(&self, key: CacheKey, context: &SessionContext) -> Result<()> {
        let data = bincode::serialize(context)
            .map_err(|e| StrataError::Serialization(e.to_string()))?;

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            self.stats.write().await.evictions += 1;
            if let Some(first) = entries.keys().next().cloned() {
                entries.remove(&first);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                data,
                inserted_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }
}

/// Short-term memory tier over the platform's session transcripts
pub struct SessionMemoryService {
    platform: Arc<dyn MemoryPlatform>,
    settings: MemorySettings,
    cache: SessionCache,
}

impl SessionMemoryService {
    pub fn new(platform: Arc<dyn MemoryPlatform>, settings: MemorySettings) -> Self {
        let cache = SessionCache::new(10_000, settings.cache_ttl_seconds);
        Self {
            platform,
            settings,
            cache,
        }
    }

    /// Load the session context: cache first, then the platform, degrading
    /// to an empty new session when the platform is unavailable
    pub async fn get_session(&self, session_id: &str, user_id: &str) -> Retrieval<SessionContext> {
        let key = CacheKey::session(user_id, session_id);

        if self.settings.enable_memory_cache {
            if let Some(context) = self.cache.get(&key).await {
                tracing::debug!("session cache hit for {}", session_id);
                return Retrieval::Healthy(context);
            }
        }

        match self
            .platform
            .session_messages(user_id, session_id, self.settings.max_session_messages)
            .await
        {
            Ok(turns) => {
                let mut context = SessionContext::new(session_id, user_id);
                for turn in turns {
                    context.messages.push(Message {
                        role: turn.role,
                        content: turn.content,
                        timestamp: turn.timestamp,
                        metadata: HashMap::new(),
                    });
                }

                if self.settings.enable_memory_cache {
                    let _ = self.cache.put(key, &context).await;
                }

                tracing::debug!(
                    "session loaded: {} ({} messages)",
                    session_id,
                    context.message_count()
                );
                Retrieval::Healthy(context)
            }
            Err(e) => {
                tracing::warn!("session load failed for {}: {}", session_id, e);
                Retrieval::degraded(
                    SessionContext::new(session_id, user_id),
                    format!("session history unavailable: {e}"),
                )
            }
        }
    }

    /// Persist one conversation turn (user message, assistant response, and
    /// optional tool summaries) and update the cached context in place
    pub async fn save_turn(
        &self,
        session_id: &str,
        user_id: &str,
        user_message: &str,
        assistant_response: &str,
        tool_calls: &[(String, String)],
    ) -> Result<()> {
        let mut messages: Vec<(String, String)> = vec![
            (user_message.to_string(), "USER".to_string()),
            (assistant_response.to_string(), "ASSISTANT".to_string()),
        ];
        for (name, result) in tool_calls {
            let clipped: String = result.chars().take(500).collect();
            messages.push((format!("Tool: {}, Result: {}", name, clipped), "TOOL".to_string()));
        }

        self.platform
            .create_event(user_id, session_id, &messages, HashMap::new())
            .await?;

        if self.settings.enable_memory_cache {
            let key = CacheKey::session(user_id, session_id);
            if let Some(mut context) = self.cache.get(&key).await {
                context.add_message("user", user_message);
                context.add_message("assistant", assistant_response);
                for (name, result) in tool_calls {
                    let clipped: String = result.chars().take(200).collect();
                    context.add_message("tool", format!("{}: {}", name, clipped));
                }
                let _ = self.cache.put(key, &context).await;
            }
        }

        tracing::debug!("turn saved for {}", session_id);
        Ok(())
    }

    /// Drop the cached context and the platform transcript for a session
    pub async fn clear_session(&self, session_id: &str, user_id: &str) -> Result<bool> {
        self.cache
            .invalidate(&CacheKey::session(user_id, session_id))
            .await;
        self.platform.delete_session(user_id, session_id).await
    }

    /// Invalidate a single cached session, or everything when ids are absent
    pub async fn invalidate_cache(&self, session_id: Option<&str>, user_id: Option<&str>) {
        match (user_id, session_id) {
            (Some(user), Some(session)) => {
                self.cache.invalidate(&CacheKey::session(user, session)).await;
            }
            _ => self.cache.clear().await,
        }
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}

/// Render recent messages as a prompt section. Each message is clamped to
/// 500 characters; the whole block is end-truncated with an ellipsis marker,
/// never inside a message line boundary mid-record.
pub fn build_session_context(
    context: &SessionContext,
    max_messages: usize,
    max_chars: usize,
) -> String {
    let recent = context.recent(max_messages);
    if recent.is_empty() {
        return String::new();
    }

    let mut lines = vec!["## Conversation so far:".to_string()];
    for msg in recent {
        let clipped: String = msg.content.chars().take(500).collect();
        lines.push(format!("[{}]: {}", msg.role, clipped));
    }

    truncate_with_ellipsis(lines.join("\n"), max_chars)
}

/// End-truncate `text` to `max_chars`, suffixing `...` when cut
pub fn truncate_with_ellipsis(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let keep = max_chars.saturating_sub(3);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{IndexedMemoryPlatform, MemoryRecord, TurnMessage};
    use async_trait::async_trait;

    struct FailingPlatform;

    #[async_trait]
    impl MemoryPlatform for FailingPlatform {
        async fn create_event(
            &self,
            _actor_id: &str,
            _session_id: &str,
            _messages: &[(String, String)],
            _metadata: HashMap<String, String>,
        ) -> Result<()> {
            Err(StrataError::Collaborator("platform down".into()))
        }

        async fn retrieve(
            &self,
            _namespace: &str,
            _query: &str,
            _max_results: usize,
            _min_score: f32,
        ) -> Result<Vec<MemoryRecord>> {
            Err(StrataError::Collaborator("platform down".into()))
        }

        async fn session_messages(
            &self,
            _actor_id: &str,
            _session_id: &str,
            _max_messages: usize,
        ) -> Result<Vec<TurnMessage>> {
            Err(StrataError::Collaborator("platform down".into()))
        }

        async fn delete_session(&self, _actor_id: &str, _session_id: &str) -> Result<bool> {
            Ok(false)
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    fn service() -> SessionMemoryService {
        SessionMemoryService::new(
            Arc::new(IndexedMemoryPlatform::new().unwrap()),
            MemorySettings::default(),
        )
    }

    #[tokio::test]
    async fn save_turn_then_get_session_round_trips() {
        let service = service();
        service
            .save_turn("s1", "u1", "How do I reset my password?", "Click reset.", &[])
            .await
            .unwrap();
        // Drop the cache so the platform path is exercised.
        service.invalidate_cache(Some("s1"), Some("u1")).await;

        let retrieval = service.get_session("s1", "u1").await;
        assert!(!retrieval.is_degraded());
        let context = retrieval.into_value();
        assert_eq!(context.message_count(), 2);
        assert_eq!(context.messages[0].role, "user");
        assert_eq!(context.messages[1].role, "assistant");
    }

    #[tokio::test]
    async fn cache_serves_second_read() {
        let service = service();
        service
            .save_turn("s1", "u1", "hello", "hi there", &[])
            .await
            .unwrap();

        service.get_session("s1", "u1").await.into_value();
        service.get_session("s1", "u1").await.into_value();

        let stats = service.cache_stats().await;
        assert!(stats.hits >= 1);
    }

    #[tokio::test]
    async fn platform_failure_degrades_to_empty_session() {
        let service =
            SessionMemoryService::new(Arc::new(FailingPlatform), MemorySettings::default());

        let retrieval = service.get_session("s1", "u1").await;
        assert!(retrieval.is_degraded());
        let context = retrieval.into_value();
        assert_eq!(context.session_id, "s1");
        assert!(context.messages.is_empty());
    }

    #[tokio::test]
    async fn save_turn_updates_cached_context_in_place() {
        let service = service();
        service.save_turn("s1", "u1", "one", "two", &[]).await.unwrap();
        let first = service.get_session("s1", "u1").await.into_value();
        assert_eq!(first.message_count(), 2);

        service
            .save_turn(
                "s1",
                "u1",
                "three",
                "four",
                &[("search".to_string(), "result".to_string())],
            )
            .await
            .unwrap();

        let second = service.get_session("s1", "u1").await.into_value();
        assert_eq!(second.message_count(), 5);
        assert_eq!(second.messages[4].role, "tool");
    }

    #[test]
    fn session_context_block_is_truncated_at_the_end() {
        let mut context = SessionContext::new("s1", "u1");
        for i in 0..50 {
            context.add_message("user", format!("message number {i} with some padding text"));
        }

        let block = build_session_context(&context, 50, 300);
        assert!(block.chars().count() <= 300);
        assert!(block.ends_with("..."));
        assert!(block.starts_with("## Conversation so far:"));
    }

    #[test]
    fn empty_session_renders_empty_block() {
        let context = SessionContext::new("s1", "u1");
        assert_eq!(build_session_context(&context, 10, 1000), "");
    }

    #[test]
    fn per_message_clamp_applies() {
        let mut context = SessionContext::new("s1", "u1");
        context.add_message("user", "x".repeat(900));
        let block = build_session_context(&context, 10, 10_000);
        // header + role label + 500 clamped chars
        assert!(block.len() < 600);
    }
}
