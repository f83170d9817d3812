//! SQLite persistence for the event log and aggregate snapshots

use crate::agent::{Agent, ConversationSession};
use crate::error::{Result, StrataError};
use crate::event_store::EventStore;
use crate::events::{stream_key, version_sort_key, AggregateType, DomainEvent};
use crate::repository::{AgentRepository, SessionRepository};
use crate::types::{AgentId, SessionId};
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;

/// Open (or create) the database at `data_dir/strata.db` and run migrations
pub async fn connect(data_dir: impl AsRef<Path>) -> Result<SqlitePool> {
    let data_dir = data_dir.as_ref();
    std::fs::create_dir_all(data_dir)?;

    let options = SqliteConnectOptions::new()
        .filename(data_dir.join("strata.db"))
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StrataError::Database(e.into()))?;

    Ok(pool)
}

/// Event store backed by the `domain_events` table.
///
/// The primary key `(stream_key, sort_key)` makes the insert conditional:
/// a second writer for the same aggregate version hits the unique constraint
/// and surfaces as a `Concurrency` error.
#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEventStore").finish()
    }
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(&self, event: &DomainEvent) -> Result<()> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| StrataError::Serialization(e.to_string()))?;
        let metadata = serde_json::to_string(&event.metadata)
            .map_err(|e| StrataError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO domain_events (
                stream_key, sort_key, event_id, event_type, aggregate_id,
                aggregate_type, version, occurred_at, payload, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.stream_key())
        .bind(version_sort_key(event.version))
        .bind(&event.event_id)
        .bind(event.event_type())
        .bind(&event.aggregate_id)
        .bind(event.aggregate_type.to_string())
        .bind(event.version as i64)
        .bind(event.timestamp.to_rfc3339())
        .bind(payload)
        .bind(metadata)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(
                    "event stored: {} {} v{}",
                    event.event_type(),
                    event.aggregate_id,
                    event.version
                );
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                tracing::warn!(
                    "event append conflict on {} at version {}",
                    event.stream_key(),
                    event.version
                );
                Err(StrataError::Concurrency(format!(
                    "Event version {} already exists for {}",
                    event.version, event.aggregate_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn events(
        &self,
        aggregate_id: &str,
        aggregate_type: AggregateType,
        from_version: u64,
    ) -> Result<Vec<DomainEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, aggregate_id, aggregate_type, version,
                   occurred_at, payload, metadata
            FROM domain_events
            WHERE stream_key = ? AND sort_key >= ?
            ORDER BY sort_key ASC
            "#,
        )
        .bind(stream_key(aggregate_type, aggregate_id))
        .bind(version_sort_key(from_version))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| row_to_event(row, aggregate_type)).collect()
    }

    async fn latest_version(
        &self,
        aggregate_id: &str,
        aggregate_type: AggregateType,
    ) -> Result<u64> {
        let row = sqlx::query(
            r#"
            SELECT version FROM domain_events
            WHERE stream_key = ?
            ORDER BY sort_key DESC
            LIMIT 1
            "#,
        )
        .bind(stream_key(aggregate_type, aggregate_id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<i64, _>("version") as u64).unwrap_or(0))
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow, aggregate_type: AggregateType) -> Result<DomainEvent> {
    let payload = serde_json::from_str(row.get::<String, _>("payload").as_str())
        .map_err(|e| StrataError::Serialization(e.to_string()))?;
    let metadata = serde_json::from_str(row.get::<String, _>("metadata").as_str())
        .map_err(|e| StrataError::Serialization(e.to_string()))?;
    let occurred_at = chrono::DateTime::parse_from_rfc3339(row.get::<String, _>("occurred_at").as_str())
        .map_err(|e| StrataError::Serialization(e.to_string()))?
        .with_timezone(&chrono::Utc);

    Ok(DomainEvent {
        event_id: row.get("event_id"),
        timestamp: occurred_at,
        aggregate_id: row.get("aggregate_id"),
        aggregate_type,
        version: row.get::<i64, _>("version") as u64,
        metadata,
        payload,
    })
}

/// Agent snapshot repository backed by the `agents` table
#[derive(Clone)]
pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn get(&self, id: &AgentId) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT snapshot FROM agents WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            serde_json::from_str(r.get::<String, _>("snapshot").as_str())
                .map_err(|e| StrataError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn save(&self, agent: &Agent) -> Result<()> {
        let snapshot = serde_json::to_string(agent)
            .map_err(|e| StrataError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO agents (id, tenant_id, is_active, version, snapshot, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                is_active = excluded.is_active,
                version = excluded.version,
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(agent.id.as_str())
        .bind(&agent.tenant_id)
        .bind(agent.is_active)
        .bind(agent.version as i64)
        .bind(snapshot)
        .bind(agent.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &AgentId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Session snapshot repository backed by the `sessions` table
#[derive(Clone)]
pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn get(&self, id: &SessionId) -> Result<Option<ConversationSession>> {
        let row = sqlx::query("SELECT snapshot FROM sessions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            serde_json::from_str(r.get::<String, _>("snapshot").as_str())
                .map_err(|e| StrataError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn save(&self, session: &ConversationSession) -> Result<()> {
        let snapshot = serde_json::to_string(session)
            .map_err(|e| StrataError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, agent_id, user_id, tenant_id, status, version, snapshot, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                version = excluded.version,
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session.id.as_str())
        .bind(session.agent_id.as_str())
        .bind(&session.user_id)
        .bind(&session.tenant_id)
        .bind(session.status.to_string())
        .bind(session.version as i64)
        .bind(snapshot)
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;
    use crate::types::Prompt;

    async fn test_pool() -> (SqlitePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = connect(dir.path()).await.unwrap();
        (pool, dir)
    }

    fn started(id: &str, version: u64) -> DomainEvent {
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
    async fn sqlite_append_and_replay_round_trip() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteEventStore::new(pool);

        store.append(&started("s1", 1)).await.unwrap();
        store.append(&started("s1", 2)).await.unwrap();

        let events = store
            .events("s1", AggregateType::ConversationSession, 0)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].version, 1);
        assert_eq!(events[1].version, 2);
        assert_eq!(events[0].event_type(), "SessionStarted");

        let latest = store
            .latest_version("s1", AggregateType::ConversationSession)
            .await
            .unwrap();
        assert_eq!(latest, 2);
    }

    #[tokio::test]
    async fn sqlite_duplicate_version_is_concurrency_error() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteEventStore::new(pool);

        store.append(&started("s1", 1)).await.unwrap();
        let err = store.append(&started("s1", 1)).await.unwrap_err();
        assert!(matches!(err, StrataError::Concurrency(_)));
    }

    #[tokio::test]
    async fn sqlite_agent_snapshot_round_trip() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteAgentRepository::new(pool);

        let agent = Agent::create("bot", "t1", "You are helpful.", "desc", None);
        repo.save(&agent).await.unwrap();

        let loaded = repo.get(&agent.id).await.unwrap().unwrap();
        assert_eq!(loaded, agent);

        let prompt = Prompt::new("q").unwrap();
        let (mutated, _) = agent.invoke(&prompt, &SessionId::generate(), false);
        repo.save(&mutated).await.unwrap();

        let reloaded = repo.get(&agent.id).await.unwrap().unwrap();
        assert_eq!(reloaded.version, 1);

        assert!(repo.delete(&agent.id).await.unwrap());
        assert!(repo.get(&agent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_session_snapshot_round_trip() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteSessionRepository::new(pool);

        let agent = Agent::create("bot", "t1", "sys", "", None);
        let (session, _) = ConversationSession::create(agent.id.clone(), "u1", "t1");
        repo.save(&session).await.unwrap();

        let (ended, _) = session.end("user_ended").unwrap();
        repo.save(&ended).await.unwrap();

        let loaded = repo.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ended.status);
        assert_eq!(loaded.version, 2);
    }
}
