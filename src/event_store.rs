//! Append-only event log with optimistic concurrency
//!
//! Appends are keyed by `(stream_key, version)` and conditional: the first
//! writer for a version wins, every other writer gets
//! [`StrataError::Concurrency`]. Reconciliation (reload-and-retry or abort)
//! is the caller's policy, never the store's.

use crate::error::{Result, StrataError};
use crate::events::{stream_key, AggregateType, DomainEvent};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Event store contract
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Conditionally append one event. Fails with `Concurrency` when an
    /// event already exists for this aggregate at this version.
    async fn append(&self, event: &DomainEvent) -> Result<()>;

    /// Events for an aggregate in ascending version order, starting at
    /// `from_version` (inclusive)
    async fn events(
        &self,
        aggregate_id: &str,
        aggregate_type: AggregateType,
        from_version: u64,
    ) -> Result<Vec<DomainEvent>>;

    /// Latest appended version; 0 for an aggregate with no events
    async fn latest_version(
        &self,
        aggregate_id: &str,
        aggregate_type: AggregateType,
    ) -> Result<u64>;
}

/// In-process event store backed by a map of version-ordered streams
#[derive(Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<String, BTreeMap<u64, DomainEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: &DomainEvent) -> Result<()> {
        let key = event.stream_key();
        let mut streams = self.streams.write().await;
        let stream = streams.entry(key.clone()).or_default();
        if stream.contains_key(&event.version) {
            tracing::warn!(
                "event append conflict on {} at version {}",
                key,
                event.version
            );
            return Err(StrataError::Concurrency(format!(
                "Event version {} already exists for {}",
                event.version, event.aggregate_id
            )));
        }
        stream.insert(event.version, event.clone());
        tracing::debug!(
            "event stored: {} {} v{}",
            event.event_type(),
            event.aggregate_id,
            event.version
        );
        Ok(())
    }

    async fn events(
        &self,
        aggregate_id: &str,
        aggregate_type: AggregateType,
        from_version: u64,
    ) -> Result<Vec<DomainEvent>> {
        let key = stream_key(aggregate_type, aggregate_id);
        let streams = self.streams.read().await;
        Ok(streams
            .get(&key)
            .map(|stream| {
                stream
                    .range(from_version..)
                    .map(|(_, event)| event.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_version(
        &self,
        aggregate_id: &str,
        aggregate_type: AggregateType,
    ) -> Result<u64> {
        let key = stream_key(aggregate_type, aggregate_id);
        let streams = self.streams.read().await;
        Ok(streams
            .get(&key)
            .and_then(|stream| stream.keys().next_back().copied())
            .unwrap_or(0))
    }
}

/// Append a batch of drained aggregate events in order, stopping at the
/// first conflict
pub async fn append_all(store: &dyn EventStore, events: &[DomainEvent]) -> Result<()> {
    for event in events {
        store.append(event).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;
    use std::sync::Arc;

    fn event(id: &str, version: u64) -> DomainEvent {
        DomainEvent::new(
            id,
            AggregateType::ConversationSession,
            version,
            EventPayload::SessionStarted {
                session_id: id.into(),
                agent_id: "agent-1".into(),
                user_id: "u1".into(),
                tenant_id: "t1".into(),
            },
        )
    }

    #[tokio::test]
    async fn append_and_read_back_in_order() {
        let store = InMemoryEventStore::new();
        store.append(&event("s1", 2)).await.unwrap();
        store.append(&event("s1", 1)).await.unwrap();
        store.append(&event("s1", 3)).await.unwrap();

        let events = store
            .events("s1", AggregateType::ConversationSession, 0)
            .await
            .unwrap();
        let versions: Vec<u64> = events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);

        let from_two = store
            .events("s1", AggregateType::ConversationSession, 2)
            .await
            .unwrap();
        assert_eq!(from_two.len(), 2);
        assert_eq!(from_two[0].version, 2);
    }

    #[tokio::test]
    async fn duplicate_version_raises_concurrency_error() {
        let store = InMemoryEventStore::new();
        store.append(&event("s1", 1)).await.unwrap();
        let err = store.append(&event("s1", 1)).await.unwrap_err();
        assert!(matches!(err, StrataError::Concurrency(_)));
    }

    #[tokio::test]
    async fn concurrent_appends_at_same_version_have_one_winner() {
        let store = Arc::new(InMemoryEventStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.append(&event("s1", 1)).await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(StrataError::Concurrency(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn latest_version_is_zero_for_unknown_aggregate() {
        let store = InMemoryEventStore::new();
        let version = store
            .latest_version("nope", AggregateType::Agent)
            .await
            .unwrap();
        assert_eq!(version, 0);
    }

    #[tokio::test]
    async fn latest_version_tracks_highest_append() {
        let store = InMemoryEventStore::new();
        store.append(&event("s1", 1)).await.unwrap();
        store.append(&event("s1", 2)).await.unwrap();
        let version = store
            .latest_version("s1", AggregateType::ConversationSession)
            .await
            .unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn streams_are_isolated_by_aggregate_type() {
        let store = InMemoryEventStore::new();
        store.append(&event("same-id", 1)).await.unwrap();
        let version = store
            .latest_version("same-id", AggregateType::Agent)
            .await
            .unwrap();
        assert_eq!(version, 0);
    }
}
