//! # Strata - Event-Sourced Agent Orchestration with Layered Memory

pub mod agent;
pub mod compose;
pub mod episodic;
pub mod error;
pub mod event_store;
pub mod events;
pub mod llm;
pub mod namespace;
pub mod orchestrator;
pub mod patterns;
pub mod platform;
pub mod reflection;
pub mod repository;
pub mod search;
pub mod session_memory;
pub mod store;
pub mod types;

pub use agent::{Agent, ConversationSession, Recorded, SessionStatus};
pub use compose::{build_search_context, ComposeInputs, ContextComposer};
pub use episodic::{
    build_episode_context, Assessment, Episode, EpisodeStats, EpisodicMemoryService,
};
pub use error::{Result, StrataError};
pub use event_store::{EventStore, InMemoryEventStore};
pub use events::{AggregateType, DomainEvent, EventPayload};
pub use llm::{GenerateRequest, Generated, LanguageModel, OpenAiCompatClient};
pub use namespace::{
    resolve_namespace, resolve_session_namespace, MemoryKind, MemorySettings, TenantConfig,
    TenantRegistry,
};
pub use orchestrator::{
    ConversationView, Orchestrator, QuestionOutcome, Services, SubmitQuestion,
};
pub use patterns::{
    AppliedPattern, PatternAnalysis, PatternApplicator, PatternConfig, PatternKind, RiskLevel,
};
pub use platform::{IndexedMemoryPlatform, MemoryPlatform, MemoryRecord, Retrieval, TurnMessage};
pub use reflection::{build_reflection_context, Reflection, ReflectionService};
pub use repository::{
    AgentRepository, InMemoryAgentRepository, InMemorySessionRepository, SessionRepository,
};
pub use search::{IndexedKnowledgeSearch, KnowledgeSearch, SearchHit};
pub use session_memory::{
    build_session_context, CacheStats, Message, SessionContext, SessionMemoryService,
};
pub use store::{SqliteAgentRepository, SqliteEventStore, SqliteSessionRepository};
pub use types::{
    AgentConfig, AgentId, MessageRole, ModelParameters, ModelResponse, Prompt, RagConfig,
    SessionId, Source,
};

use std::path::Path;
use std::sync::Arc;

/// The assembled engine: storage, memory tiers and orchestration wired into
/// one explicit dependency graph
#[derive(Clone)]
pub struct StrataRuntime {
    services: Services,
    orchestrator: Arc<Orchestrator>,
    platform: Arc<IndexedMemoryPlatform>,
}

impl std::fmt::Debug for StrataRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrataRuntime").finish()
    }
}

impl StrataRuntime {
    /// SQLite-backed runtime rooted at `data_dir`
    pub async fn new(
        data_dir: impl AsRef<Path>,
        settings: MemorySettings,
        language_model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let pool = store::connect(data_dir).await?;
        let agents: Arc<dyn AgentRepository> = SqliteAgentRepository::new(pool.clone());
        let sessions: Arc<dyn SessionRepository> = SqliteSessionRepository::new(pool.clone());
        let event_store: Arc<dyn EventStore> = SqliteEventStore::new(pool);
        Self::assemble(agents, sessions, event_store, settings, language_model)
    }

    /// Fully in-process runtime, for tests and single-shot tooling
    pub fn in_memory(
        settings: MemorySettings,
        language_model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        Self::assemble(
            Arc::new(InMemoryAgentRepository::new()),
            Arc::new(InMemorySessionRepository::new()),
            Arc::new(InMemoryEventStore::new()),
            settings,
            language_model,
        )
    }

    fn assemble(
        agents: Arc<dyn AgentRepository>,
        sessions: Arc<dyn SessionRepository>,
        event_store: Arc<dyn EventStore>,
        settings: MemorySettings,
        language_model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let platform = Arc::new(IndexedMemoryPlatform::new()?);
        let registry = Arc::new(TenantRegistry::new(settings.clone()));

        let services = Services {
            agents,
            sessions,
            event_store,
            knowledge_search: Arc::new(IndexedKnowledgeSearch::new(
                Arc::clone(&platform),
                settings.clone(),
            )),
            language_model,
            session_memory: Arc::new(SessionMemoryService::new(
                Arc::clone(&platform) as Arc<dyn MemoryPlatform>,
                settings,
            )),
            episodic_memory: Arc::new(EpisodicMemoryService::new(
                Arc::clone(&platform) as Arc<dyn MemoryPlatform>,
                Arc::clone(&registry),
            )),
            reflections: Arc::new(ReflectionService::new(
                Arc::clone(&platform) as Arc<dyn MemoryPlatform>,
                Arc::clone(&registry),
            )),
            registry,
        };

        Ok(Self {
            orchestrator: Arc::new(Orchestrator::new(services.clone())),
            services,
            platform,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// The local memory platform, for seeding records and knowledge
    pub fn platform(&self) -> &Arc<IndexedMemoryPlatform> {
        &self.platform
    }

    /// Create and persist a new agent
    pub async fn create_agent(
        &self,
        name: impl Into<String>,
        tenant_id: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Result<Agent> {
        let agent = Agent::create(name, tenant_id, system_prompt, "", None);
        self.services.agents.save(&agent).await?;
        Ok(agent)
    }

    /// Submit a question through the orchestration pipeline
    pub async fn submit_question(&self, command: SubmitQuestion) -> Result<QuestionOutcome> {
        self.orchestrator.handle(command).await
    }

    /// End a session and persist the SessionEnded event
    pub async fn end_session(
        &self,
        session_id: &SessionId,
        reason: impl Into<String>,
    ) -> Result<ConversationSession> {
        let session = self
            .services
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| {
                StrataError::Validation(format!("Session not found: {session_id}"))
            })?;

        let reason = reason.into();
        let mut recorded = Recorded::new(session);
        recorded.try_apply(|s| s.end(&reason))?;
        self.persist_session(&mut recorded).await?;
        Ok(recorded.into_state())
    }

    /// Expire a session; a no-op on sessions already in a terminal state
    pub async fn expire_session(&self, session_id: &SessionId) -> Result<ConversationSession> {
        let session = self
            .services
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| {
                StrataError::Validation(format!("Session not found: {session_id}"))
            })?;

        let mut recorded = Recorded::new(session);
        recorded.apply_optional(|s| s.expire());
        self.persist_session(&mut recorded).await?;
        Ok(recorded.into_state())
    }

    /// Delete an agent snapshot; its event history remains immutable
    pub async fn delete_agent(&self, agent_id: &AgentId) -> Result<bool> {
        self.services.agents.delete(agent_id).await
    }

    /// Drop a tenant's registration and evict cached session contexts.
    /// The cache is keyed by user and session, so teardown clears it
    /// wholesale; it is a read optimization, not the source of truth.
    pub async fn remove_tenant(&self, tenant_id: &str) -> bool {
        let removed = self.services.registry.remove_tenant(tenant_id).await;
        if removed {
            self.services.session_memory.invalidate_cache(None, None).await;
        }
        removed
    }

    async fn persist_session(
        &self,
        recorded: &mut Recorded<ConversationSession>,
    ) -> Result<()> {
        event_store::append_all(
            self.services.event_store.as_ref(),
            &recorded.take_events(),
        )
        .await?;
        self.services.sessions.save(recorded.state()).await
    }
}
