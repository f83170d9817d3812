//! Question orchestration - the top-level use case
//!
//! One request runs the pipeline: load aggregate, gather the four memory
//! tiers concurrently, compose the context, invoke the model, record and
//! persist events, then hand the raw turn back to memory for future episode
//! detection. Validation failures happen before any side effect; tier
//! failures degrade to empty sections; a version conflict on persist
//! surfaces as a concurrency error the caller retries from the top.

use crate::agent::{Agent, ConversationSession, Recorded};
use crate::compose::{ComposeInputs, ContextComposer};
use crate::episodic::{Episode, EpisodicMemoryService};
use crate::error::{Result, StrataError};
use crate::event_store::{append_all, EventStore};
use crate::llm::{GenerateRequest, LanguageModel};
use crate::namespace::TenantRegistry;
use crate::patterns::{PatternApplicator, RiskLevel};
use crate::platform::Retrieval;
use crate::reflection::{Reflection, ReflectionService};
use crate::repository::{AgentRepository, SessionRepository};
use crate::search::{KnowledgeSearch, SearchHit};
use crate::session_memory::{Message, SessionContext, SessionMemoryService};
use crate::types::{AgentId, ModelResponse, Prompt, SessionId, Source};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Everything the orchestrator depends on, wired once at process start.
/// No hidden global state: construct it, share it by reference.
#[derive(Clone)]
pub struct Services {
    pub agents: Arc<dyn AgentRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub event_store: Arc<dyn EventStore>,
    pub knowledge_search: Arc<dyn KnowledgeSearch>,
    pub language_model: Arc<dyn LanguageModel>,
    pub session_memory: Arc<SessionMemoryService>,
    pub episodic_memory: Arc<EpisodicMemoryService>,
    pub reflections: Arc<ReflectionService>,
    pub registry: Arc<TenantRegistry>,
}

/// Command to submit a question to an agent
#[derive(Debug, Clone)]
pub struct SubmitQuestion {
    /// Existing session to continue; a new session is created when absent
    /// or unknown
    pub session_id: Option<SessionId>,
    pub agent_id: AgentId,
    pub user_id: String,
    pub tenant_id: String,
    pub question: String,
    pub enable_episodic: bool,
    pub enable_reflections: bool,
}

impl SubmitQuestion {
    pub fn new(
        agent_id: AgentId,
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        Self {
            session_id: None,
            agent_id,
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            question: question.into(),
            enable_episodic: true,
            enable_reflections: true,
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Result of one orchestrated question
#[derive(Debug, Clone)]
pub struct QuestionOutcome {
    pub response_content: String,
    pub tokens_used: u32,
    pub latency_ms: u64,
    pub sources: Vec<SearchHit>,
    pub episodes_used: usize,
    pub reflections_used: usize,
    pub risk_level: RiskLevel,
    pub session_id: SessionId,
    /// Tiers that degraded to empty this request, with reasons
    pub degraded_tiers: Vec<String>,
}

/// Read-side view of a conversation
#[derive(Debug, Clone)]
pub struct ConversationView {
    pub session: ConversationSession,
    pub messages: Vec<Message>,
}

struct GatheredContext {
    session: Retrieval<SessionContext>,
    episodes: Retrieval<Vec<Episode>>,
    reflections: Retrieval<Vec<Reflection>>,
    search_hits: Retrieval<Vec<SearchHit>>,
}

impl GatheredContext {
    fn degraded_tiers(&self) -> Vec<String> {
        let mut degraded = Vec::new();
        for (name, reason) in [
            ("session", self.session.degraded_reason()),
            ("episodes", self.episodes.degraded_reason()),
            ("reflections", self.reflections.degraded_reason()),
            ("search", self.search_hits.degraded_reason()),
        ] {
            if let Some(reason) = reason {
                degraded.push(format!("{name}: {reason}"));
            }
        }
        degraded
    }
}

/// Orchestrates one question through memory gathering, composition,
/// generation and persistence
pub struct Orchestrator {
    services: Services,
    applicator: PatternApplicator,
    /// A tier slower than this degrades to empty rather than blocking
    tier_timeout: Duration,
}

impl Orchestrator {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            applicator: PatternApplicator::default(),
            tier_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_tier_timeout(mut self, tier_timeout: Duration) -> Self {
        self.tier_timeout = tier_timeout;
        self
    }

    pub fn with_applicator(mut self, applicator: PatternApplicator) -> Self {
        self.applicator = applicator;
        self
    }

    /// Handle a question end to end
    pub async fn handle(&self, command: SubmitQuestion) -> Result<QuestionOutcome> {
        let started = std::time::Instant::now();
        let prompt = Prompt::new(&command.question)?;

        let (agent, mut session, session_is_new) = self.load_aggregates(&command).await?;
        if session_is_new {
            tracing::debug!("session created: {}", session.state().id);
        }
        let gathered = self.gather_context(&agent, &command).await;
        let degraded_tiers = gathered.degraded_tiers();
        for tier in &degraded_tiers {
            tracing::warn!("context tier degraded: {}", tier);
        }

        let analysis = self
            .applicator
            .analyze_patterns(&command.question, gathered.reflections.value());
        let guidance = self.applicator.build_guidance_prompt(&analysis);

        let settings = self.services.registry.settings_for(&command.tenant_id).await;
        let composer = ContextComposer::new(settings);
        let context = composer.compose(&ComposeInputs {
            reflections: gathered.reflections.value(),
            guidance: if guidance.is_empty() {
                None
            } else {
                Some(&guidance)
            },
            episodes: gathered.episodes.value(),
            session: Some(gathered.session.value()),
            search_hits: gathered.search_hits.value(),
        });

        let mut recorded_agent = Recorded::new(agent);
        let session_id = session.state().id.clone();
        recorded_agent.apply(|a| a.invoke(&prompt, &session_id, context.is_some()));

        let request = {
            let agent = recorded_agent.state();
            GenerateRequest {
                prompt: command.question.clone(),
                system_prompt: agent.config.system_prompt.clone(),
                context: context.clone(),
                model_id: agent.config.model_params.model_id.clone(),
                temperature: agent.config.model_params.temperature,
                max_tokens: agent.config.model_params.max_tokens,
            }
        };

        let generated = self.services.language_model.generate(&request).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let search_hits = gathered.search_hits.value().clone();
        let response = ModelResponse::new(
            generated.content.clone(),
            generated.tokens_used,
            request.model_id.clone(),
            latency_ms,
        )
        .with_sources(search_hits.iter().map(hit_to_source).collect());

        recorded_agent.apply(|a| a.record_response(&session_id, &response));
        session.apply_quiet(|s| s.record_interaction(generated.tokens_used as u64));

        self.persist(&mut recorded_agent, &mut session).await?;

        self.spawn_save_interaction(
            &command,
            &session_id,
            command.question.clone(),
            generated.content.clone(),
            search_hits.len(),
        );

        Ok(QuestionOutcome {
            response_content: generated.content,
            tokens_used: generated.tokens_used,
            latency_ms,
            sources: search_hits,
            episodes_used: gathered.episodes.value().len(),
            reflections_used: gathered.reflections.value().len(),
            risk_level: analysis.risk_level,
            session_id,
            degraded_tiers,
        })
    }

    /// Streaming variant. Chunks are forwarded as they arrive, but only
    /// after context gathering has completed; the full response must be
    /// captured before anything is persisted, so a mid-stream failure fails
    /// the whole request with nothing recorded.
    pub async fn handle_streaming(
        &self,
        command: SubmitQuestion,
        chunk_tx: tokio::sync::mpsc::Sender<String>,
    ) -> Result<QuestionOutcome> {
        let started = std::time::Instant::now();
        let prompt = Prompt::new(&command.question)?;

        let (agent, mut session, _) = self.load_aggregates(&command).await?;
        let gathered = self.gather_context(&agent, &command).await;
        let degraded_tiers = gathered.degraded_tiers();

        let analysis = self
            .applicator
            .analyze_patterns(&command.question, gathered.reflections.value());
        let guidance = self.applicator.build_guidance_prompt(&analysis);

        let settings = self.services.registry.settings_for(&command.tenant_id).await;
        let composer = ContextComposer::new(settings);
        let context = composer.compose(&ComposeInputs {
            reflections: gathered.reflections.value(),
            guidance: if guidance.is_empty() {
                None
            } else {
                Some(&guidance)
            },
            episodes: gathered.episodes.value(),
            session: Some(gathered.session.value()),
            search_hits: gathered.search_hits.value(),
        });

        let mut recorded_agent = Recorded::new(agent);
        let session_id = session.state().id.clone();
        recorded_agent.apply(|a| a.invoke(&prompt, &session_id, context.is_some()));

        let request = {
            let agent = recorded_agent.state();
            GenerateRequest {
                prompt: command.question.clone(),
                system_prompt: agent.config.system_prompt.clone(),
                context,
                model_id: agent.config.model_params.model_id.clone(),
                temperature: agent.config.model_params.temperature,
                max_tokens: agent.config.model_params.max_tokens,
            }
        };

        let mut stream = self.services.language_model.generate_stream(&request).await?;
        let mut content = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            content.push_str(&chunk);
            let _ = chunk_tx.send(chunk).await;
        }
        drop(chunk_tx);

        let latency_ms = started.elapsed().as_millis() as u64;
        let tokens_used = (content.len() / 4) as u32;

        let search_hits = gathered.search_hits.value().clone();
        let response = ModelResponse::new(
            content.clone(),
            tokens_used,
            request.model_id.clone(),
            latency_ms,
        )
        .with_sources(search_hits.iter().map(hit_to_source).collect());

        recorded_agent.apply(|a| a.record_response(&session_id, &response));
        session.apply_quiet(|s| s.record_interaction(tokens_used as u64));

        self.persist(&mut recorded_agent, &mut session).await?;

        self.spawn_save_interaction(
            &command,
            &session_id,
            command.question.clone(),
            content.clone(),
            search_hits.len(),
        );

        Ok(QuestionOutcome {
            response_content: content,
            tokens_used,
            latency_ms,
            sources: search_hits,
            episodes_used: gathered.episodes.value().len(),
            reflections_used: gathered.reflections.value().len(),
            risk_level: analysis.risk_level,
            session_id,
            degraded_tiers,
        })
    }

    /// Read-side conversation view; `None` when the session is unknown or
    /// belongs to a different user
    pub async fn get_conversation(
        &self,
        session_id: &SessionId,
        user_id: &str,
    ) -> Result<Option<ConversationView>> {
        let Some(session) = self.services.sessions.get(session_id).await? else {
            return Ok(None);
        };
        if session.user_id != user_id {
            return Ok(None);
        }

        let context = self
            .services
            .session_memory
            .get_session(session_id.as_str(), user_id)
            .await
            .into_value();

        Ok(Some(ConversationView {
            session,
            messages: context.messages,
        }))
    }

    async fn load_aggregates(
        &self,
        command: &SubmitQuestion,
    ) -> Result<(Agent, Recorded<ConversationSession>, bool)> {
        let agent = self
            .services
            .agents
            .get(&command.agent_id)
            .await?
            .ok_or_else(|| {
                StrataError::Validation(format!("Agent not found: {}", command.agent_id))
            })?;
        if !agent.is_active {
            return Err(StrataError::Validation(format!(
                "Agent is not active: {}",
                command.agent_id
            )));
        }

        if let Some(session_id) = &command.session_id {
            if let Some(existing) = self.services.sessions.get(session_id).await? {
                return Ok((agent, Recorded::new(existing), false));
            }
            let (session, event) = ConversationSession::create_with_id(
                session_id.clone(),
                agent.id.clone(),
                &command.user_id,
                &command.tenant_id,
            );
            return Ok((agent, Recorded::seeded(session, event), true));
        }

        let (session, event) =
            ConversationSession::create(agent.id.clone(), &command.user_id, &command.tenant_id);
        Ok((agent, Recorded::seeded(session, event), true))
    }

    /// Fan out the four tier retrievals concurrently, each bounded by the
    /// per-tier timeout
    async fn gather_context(&self, agent: &Agent, command: &SubmitQuestion) -> GatheredContext {
        let tenant_config = self
            .services
            .registry
            .tenant_config(&command.tenant_id)
            .await;
        let use_episodes = command.enable_episodic && tenant_config.enable_episodic_memory;
        let use_reflections = command.enable_reflections && tenant_config.enable_reflections;
        let session_key = command
            .session_id
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_default();

        let session_fut = async {
            if session_key.is_empty() {
                return Retrieval::Healthy(SessionContext::new("", &command.user_id));
            }
            match timeout(
                self.tier_timeout,
                self.services
                    .session_memory
                    .get_session(&session_key, &command.user_id),
            )
            .await
            {
                Ok(retrieval) => retrieval,
                Err(_) => Retrieval::degraded(
                    SessionContext::new(&session_key, &command.user_id),
                    "session history timed out",
                ),
            }
        };

        let episodes_fut = async {
            if !use_episodes {
                return Retrieval::Healthy(Vec::new());
            }
            match timeout(
                self.tier_timeout,
                self.services.episodic_memory.retrieve_similar_episodes(
                    &command.user_id,
                    &command.question,
                    Some(&command.tenant_id),
                    None,
                    None,
                ),
            )
            .await
            {
                Ok(retrieval) => retrieval,
                Err(_) => Retrieval::degraded(Vec::new(), "episodic memory timed out"),
            }
        };

        let reflections_fut = async {
            if !use_reflections {
                return Retrieval::Healthy(Vec::new());
            }
            match timeout(
                self.tier_timeout,
                self.services.reflections.retrieve_relevant_reflections(
                    &command.user_id,
                    &command.question,
                    Some(&command.tenant_id),
                ),
            )
            .await
            {
                Ok(retrieval) => retrieval,
                Err(_) => Retrieval::degraded(Vec::new(), "reflection memory timed out"),
            }
        };

        let search_fut = async {
            match timeout(
                self.tier_timeout,
                self.services.knowledge_search.search(
                    &command.question,
                    &command.tenant_id,
                    agent.config.rag_config.top_k,
                ),
            )
            .await
            {
                Ok(Ok(hits)) => Retrieval::Healthy(hits),
                Ok(Err(e)) => {
                    Retrieval::degraded(Vec::new(), format!("knowledge search unavailable: {e}"))
                }
                Err(_) => Retrieval::degraded(Vec::new(), "knowledge search timed out"),
            }
        };

        let (session, episodes, reflections, search_hits) =
            tokio::join!(session_fut, episodes_fut, reflections_fut, search_fut);

        GatheredContext {
            session,
            episodes,
            reflections,
            search_hits,
        }
    }

    /// Drain pending events into the store, then upsert snapshots. A version
    /// conflict aborts before snapshots are touched.
    async fn persist(
        &self,
        agent: &mut Recorded<Agent>,
        session: &mut Recorded<ConversationSession>,
    ) -> Result<()> {
        append_all(self.services.event_store.as_ref(), &agent.take_events()).await?;
        append_all(self.services.event_store.as_ref(), &session.take_events()).await?;

        self.services.agents.save(agent.state()).await?;
        self.services.sessions.save(session.state()).await?;
        Ok(())
    }

    /// Hand the finished turn back to memory, detached from the response
    /// path: a cancelled caller or a failed save never affects the answer.
    fn spawn_save_interaction(
        &self,
        command: &SubmitQuestion,
        session_id: &SessionId,
        question: String,
        answer: String,
        source_count: usize,
    ) {
        let session_memory = Arc::clone(&self.services.session_memory);
        let episodic = Arc::clone(&self.services.episodic_memory);
        let user_id = command.user_id.clone();
        let tenant_id = command.tenant_id.clone();
        let session_id = session_id.as_str().to_string();
        let enable_episodic = command.enable_episodic;

        tokio::spawn(async move {
            let tool_calls = if source_count > 0 {
                vec![(
                    "search_knowledge_base".to_string(),
                    format!("Found {source_count} relevant documents"),
                )]
            } else {
                Vec::new()
            };

            if let Err(e) = session_memory
                .save_turn(&session_id, &user_id, &question, &answer, &tool_calls)
                .await
            {
                tracing::warn!("session turn save failed for {}: {}", session_id, e);
            }

            if enable_episodic {
                if let Err(e) = episodic
                    .save_interaction(
                        &session_id,
                        &user_id,
                        &question,
                        &answer,
                        &tool_calls,
                        Some(&tenant_id),
                    )
                    .await
                {
                    tracing::warn!("episode interaction save failed for {}: {}", session_id, e);
                }
            }
        });
    }
}

fn hit_to_source(hit: &SearchHit) -> Source {
    Source {
        chunk_id: hit.chunk_id.clone().unwrap_or_default(),
        document_id: hit.document_id.clone().unwrap_or_default(),
        content: hit.content.clone(),
        score: hit.score,
        metadata: Default::default(),
    }
}
