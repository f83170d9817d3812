//! Snapshot repositories for aggregates
//!
//! The event log is the audit trail; these repositories persist the current
//! aggregate snapshot for fast loads. In-memory implementations back tests
//! and single-process deployments; the SQLite implementations live in
//! [`crate::store`].

use crate::agent::{Agent, ConversationSession};
use crate::error::Result;
use crate::types::{AgentId, SessionId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage contract for agent snapshots
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn get(&self, id: &AgentId) -> Result<Option<Agent>>;
    async fn save(&self, agent: &Agent) -> Result<()>;
    async fn delete(&self, id: &AgentId) -> Result<bool>;
}

/// Storage contract for session snapshots
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, id: &SessionId) -> Result<Option<ConversationSession>>;
    async fn save(&self, session: &ConversationSession) -> Result<()>;
}

/// Map-backed agent repository
#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<String, Agent>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn get(&self, id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.agents.read().await.get(id.as_str()).cloned())
    }

    async fn save(&self, agent: &Agent) -> Result<()> {
        self.agents
            .write()
            .await
            .insert(agent.id.as_str().to_string(), agent.clone());
        Ok(())
    }

    async fn delete(&self, id: &AgentId) -> Result<bool> {
        Ok(self.agents.write().await.remove(id.as_str()).is_some())
    }
}

/// Map-backed session repository
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, ConversationSession>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get(&self, id: &SessionId) -> Result<Option<ConversationSession>> {
        Ok(self.sessions.read().await.get(id.as_str()).cloned())
    }

    async fn save(&self, session: &ConversationSession) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id.as_str().to_string(), session.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn agent_round_trip() {
        let repo = InMemoryAgentRepository::new();
        let agent = Agent::create("bot", "t1", "sys", "", None);
        repo.save(&agent).await.unwrap();

        let loaded = repo.get(&agent.id).await.unwrap().unwrap();
        assert_eq!(loaded, agent);

        assert!(repo.delete(&agent.id).await.unwrap());
        assert!(repo.get(&agent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_save_overwrites_snapshot() {
        let repo = InMemorySessionRepository::new();
        let agent = Agent::create("bot", "t1", "sys", "", None);
        let (session, _) = ConversationSession::create(agent.id.clone(), "u1", "t1");
        repo.save(&session).await.unwrap();

        let bumped = session.record_interaction(10);
        repo.save(&bumped).await.unwrap();

        let loaded = repo.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.message_count, 1);
        assert_eq!(loaded.total_tokens, 10);
    }
}
