//! Agent and ConversationSession aggregates
//!
//! Aggregates are the consistency boundary for event emission: every
//! state-changing method is a pure transition returning the next state
//! together with the domain event it emitted, and bumps `version` by exactly
//! one. Nothing here persists; the [`Recorded`] wrapper accumulates pending
//! events until the caller drains them for the event store.

use crate::error::{Result, StrataError};
use crate::events::{AggregateType, DomainEvent, EventPayload};
use crate::types::{AgentConfig, AgentId, ModelParameters, ModelResponse, Prompt, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Agent ────────────────────────────────────────────────────────────────────

/// An AI agent that answers prompts under a configured system prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub description: String,
    pub tenant_id: String,
    pub is_active: bool,
    pub config: AgentConfig,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Factory: a new active agent with defaults applied
    pub fn create(
        name: impl Into<String>,
        tenant_id: impl Into<String>,
        system_prompt: impl Into<String>,
        description: impl Into<String>,
        model_params: Option<ModelParameters>,
    ) -> Self {
        let now = Utc::now();
        let params = model_params.unwrap_or_else(ModelParameters::default_chat);
        Self {
            id: AgentId::generate(),
            name: name.into(),
            description: description.into(),
            tenant_id: tenant_id.into(),
            is_active: true,
            config: AgentConfig::new(system_prompt, params),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record an invocation. The actual model call happens elsewhere; this
    /// transition only captures the fact that it was requested.
    pub fn invoke(
        &self,
        prompt: &Prompt,
        session_id: &SessionId,
        has_context: bool,
    ) -> (Agent, DomainEvent) {
        let mut next = self.clone();
        next.version += 1;
        let event = DomainEvent::new(
            self.id.as_str(),
            AggregateType::Agent,
            next.version,
            EventPayload::AgentInvoked {
                agent_id: self.id.to_string(),
                session_id: session_id.to_string(),
                prompt_content: prompt.content().to_string(),
                prompt_role: prompt.role().to_string(),
                has_context,
            },
        );
        (next, event)
    }

    /// Record a generated response
    pub fn record_response(
        &self,
        session_id: &SessionId,
        response: &ModelResponse,
    ) -> (Agent, DomainEvent) {
        let mut next = self.clone();
        next.version += 1;
        let event = DomainEvent::new(
            self.id.as_str(),
            AggregateType::Agent,
            next.version,
            EventPayload::ResponseGenerated {
                agent_id: self.id.to_string(),
                session_id: session_id.to_string(),
                response_content: response.content.clone(),
                tokens_used: response.tokens_used,
                model: response.model.clone(),
                latency_ms: response.latency_ms,
                source_count: response.source_count(),
            },
        );
        (next, event)
    }

    /// Replace the configuration
    pub fn update_config(&self, config: AgentConfig) -> Agent {
        let mut next = self.clone();
        next.config = config;
        next.updated_at = Utc::now();
        next
    }

    pub fn deactivate(&self) -> Agent {
        let mut next = self.clone();
        next.is_active = false;
        next.updated_at = Utc::now();
        next
    }

    pub fn activate(&self) -> Agent {
        let mut next = self.clone();
        next.is_active = true;
        next.updated_at = Utc::now();
        next
    }

    /// Apply a persisted event during replay. Agent events carry no state
    /// beyond the audit trail, so replay only advances the version.
    pub fn apply_event(&mut self, event: &DomainEvent) {
        match &event.payload {
            EventPayload::AgentInvoked { .. } | EventPayload::ResponseGenerated { .. } => {
                self.version = event.version;
                self.updated_at = event.timestamp;
            }
            _ => {}
        }
    }

    /// Fold an ascending event stream over a snapshot
    pub fn replay(mut self, events: &[DomainEvent]) -> Agent {
        for event in events {
            self.apply_event(event);
        }
        self
    }
}

// ─── ConversationSession ──────────────────────────────────────────────────────

/// Session lifecycle state; transitions are one-directional
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
    Expired,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Ended => write!(f, "ended"),
            SessionStatus::Expired => write!(f, "expired"),
        }
    }
}

/// A conversation between one user and one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: SessionId,
    pub agent_id: AgentId,
    pub user_id: String,
    pub tenant_id: String,
    pub status: SessionStatus,
    pub message_count: u32,
    pub total_tokens: u64,
    pub ended_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    /// Factory: a new active session, already started (version 1 carries the
    /// SessionStarted event)
    pub fn create(
        agent_id: AgentId,
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> (ConversationSession, DomainEvent) {
        Self::create_with_id(SessionId::generate(), agent_id, user_id, tenant_id)
    }

    /// Factory variant keeping a caller-supplied session id, so history
    /// stored under that id stays reachable
    pub fn create_with_id(
        id: SessionId,
        agent_id: AgentId,
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> (ConversationSession, DomainEvent) {
        let now = Utc::now();
        let session = ConversationSession {
            id,
            agent_id,
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            status: SessionStatus::Active,
            message_count: 0,
            total_tokens: 0,
            ended_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        session.start()
    }

    fn start(&self) -> (ConversationSession, DomainEvent) {
        let mut next = self.clone();
        next.version += 1;
        let event = DomainEvent::new(
            self.id.as_str(),
            AggregateType::ConversationSession,
            next.version,
            EventPayload::SessionStarted {
                session_id: self.id.to_string(),
                agent_id: self.agent_id.to_string(),
                user_id: self.user_id.clone(),
                tenant_id: self.tenant_id.clone(),
            },
        );
        (next, event)
    }

    /// End the session. Errors when the session is not active.
    pub fn end(&self, reason: impl Into<String>) -> Result<(ConversationSession, DomainEvent)> {
        if self.status != SessionStatus::Active {
            return Err(StrataError::Validation(format!(
                "Session {} is not active",
                self.id
            )));
        }
        Ok(self.close(SessionStatus::Ended, reason.into()))
    }

    /// Mark the session as expired. A no-op on sessions that already reached
    /// a terminal state: no event, state unchanged.
    pub fn expire(&self) -> (ConversationSession, Option<DomainEvent>) {
        if self.status != SessionStatus::Active {
            return (self.clone(), None);
        }
        let (next, event) = self.close(SessionStatus::Expired, "expired".to_string());
        (next, Some(event))
    }

    fn close(&self, status: SessionStatus, reason: String) -> (ConversationSession, DomainEvent) {
        let now = Utc::now();
        let mut next = self.clone();
        next.status = status;
        next.ended_at = Some(now);
        next.updated_at = now;
        next.version += 1;
        let event = DomainEvent::new(
            self.id.as_str(),
            AggregateType::ConversationSession,
            next.version,
            EventPayload::SessionEnded {
                session_id: self.id.to_string(),
                reason,
                message_count: self.message_count,
                total_tokens: self.total_tokens,
            },
        );
        (next, event)
    }

    /// Count one interaction. Accumulates counters without emitting an event.
    pub fn record_interaction(&self, tokens_used: u64) -> ConversationSession {
        let mut next = self.clone();
        next.message_count += 1;
        next.total_tokens += tokens_used;
        next.updated_at = Utc::now();
        next
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Apply a persisted event during replay
    pub fn apply_event(&mut self, event: &DomainEvent) {
        match &event.payload {
            EventPayload::SessionStarted { .. } => {
                self.status = SessionStatus::Active;
                self.version = event.version;
            }
            EventPayload::SessionEnded {
                reason,
                message_count,
                total_tokens,
                ..
            } => {
                self.status = if reason == "expired" {
                    SessionStatus::Expired
                } else {
                    SessionStatus::Ended
                };
                self.message_count = *message_count;
                self.total_tokens = *total_tokens;
                self.ended_at = Some(event.timestamp);
                self.updated_at = event.timestamp;
                self.version = event.version;
            }
            _ => {}
        }
    }

    /// Rebuild a session entirely from its event stream. Returns `None` when
    /// the stream does not begin with SessionStarted.
    pub fn replay(events: &[DomainEvent]) -> Option<ConversationSession> {
        let first = events.first()?;
        let EventPayload::SessionStarted {
            session_id,
            agent_id,
            user_id,
            tenant_id,
        } = &first.payload
        else {
            return None;
        };
        let mut session = ConversationSession {
            id: SessionId::parse(session_id).ok()?,
            agent_id: AgentId::parse(agent_id).ok()?,
            user_id: user_id.clone(),
            tenant_id: tenant_id.clone(),
            status: SessionStatus::Active,
            message_count: 0,
            total_tokens: 0,
            ended_at: None,
            version: first.version,
            created_at: first.timestamp,
            updated_at: first.timestamp,
        };
        for event in &events[1..] {
            session.apply_event(event);
        }
        Some(session)
    }
}

// ─── Recorded ─────────────────────────────────────────────────────────────────

/// Wraps an aggregate and accumulates the events its transitions emit.
///
/// Transitions stay pure (`&T -> (T, DomainEvent)`); this wrapper is the thin
/// mutable shell the persistence step drains. `take_events` is idempotent:
/// the buffer is empty afterwards.
#[derive(Debug, Clone)]
pub struct Recorded<T> {
    state: T,
    pending: Vec<DomainEvent>,
}

impl<T> Recorded<T> {
    pub fn new(state: T) -> Self {
        Self {
            state,
            pending: Vec::new(),
        }
    }

    /// Wrap a freshly-created aggregate together with its creation event
    pub fn seeded(state: T, event: DomainEvent) -> Self {
        Self {
            state,
            pending: vec![event],
        }
    }

    pub fn state(&self) -> &T {
        &self.state
    }

    pub fn pending(&self) -> &[DomainEvent] {
        &self.pending
    }

    /// Run an event-emitting transition
    pub fn apply(&mut self, transition: impl FnOnce(&T) -> (T, DomainEvent)) {
        let (next, event) = transition(&self.state);
        self.state = next;
        self.pending.push(event);
    }

    /// Run a fallible event-emitting transition
    pub fn try_apply(
        &mut self,
        transition: impl FnOnce(&T) -> Result<(T, DomainEvent)>,
    ) -> Result<()> {
        let (next, event) = transition(&self.state)?;
        self.state = next;
        self.pending.push(event);
        Ok(())
    }

    /// Run a transition that may decline to emit (e.g. expire on a
    /// terminal session)
    pub fn apply_optional(&mut self, transition: impl FnOnce(&T) -> (T, Option<DomainEvent>)) {
        let (next, event) = transition(&self.state);
        self.state = next;
        if let Some(event) = event {
            self.pending.push(event);
        }
    }

    /// Run a counter-style mutation that emits no event
    pub fn apply_quiet(&mut self, transition: impl FnOnce(&T) -> T) {
        self.state = transition(&self.state);
    }

    /// Drain and return all pending events; the buffer is empty afterwards
    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending)
    }

    pub fn into_state(self) -> T {
        self.state
    }
}
