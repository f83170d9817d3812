//! Immutable domain events emitted by aggregate transitions
//!
//! Events are write-once records: once appended to the event store they are
//! never mutated or deleted. The envelope carries identity, ordering and
//! audit metadata; the payload carries the per-kind fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The aggregate kind an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateType {
    Agent,
    ConversationSession,
}

impl std::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateType::Agent => write!(f, "Agent"),
            AggregateType::ConversationSession => write!(f, "ConversationSession"),
        }
    }
}

/// Per-kind event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    /// An agent was invoked with a prompt
    AgentInvoked {
        agent_id: String,
        session_id: String,
        prompt_content: String,
        prompt_role: String,
        has_context: bool,
    },
    /// The agent generated a response
    ResponseGenerated {
        agent_id: String,
        session_id: String,
        response_content: String,
        tokens_used: u32,
        model: String,
        latency_ms: u64,
        source_count: usize,
    },
    /// A new conversation session was started
    SessionStarted {
        session_id: String,
        agent_id: String,
        user_id: String,
        tenant_id: String,
    },
    /// A conversation session ended or expired
    SessionEnded {
        session_id: String,
        reason: String,
        message_count: u32,
        total_tokens: u64,
    },
}

impl EventPayload {
    /// Stable event-type name, used as the stored discriminator
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::AgentInvoked { .. } => "AgentInvoked",
            EventPayload::ResponseGenerated { .. } => "ResponseGenerated",
            EventPayload::SessionStarted { .. } => "SessionStarted",
            EventPayload::SessionEnded { .. } => "SessionEnded",
        }
    }
}

/// Envelope for a single domain event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub aggregate_id: String,
    pub aggregate_type: AggregateType,
    pub version: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn new(
        aggregate_id: impl Into<String>,
        aggregate_type: AggregateType,
        version: u64,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            aggregate_id: aggregate_id.into(),
            aggregate_type,
            version,
            metadata: HashMap::new(),
            payload,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// Partition string used by event stores: `{aggregate_type}#{aggregate_id}`
    pub fn stream_key(&self) -> String {
        stream_key(self.aggregate_type, &self.aggregate_id)
    }
}

/// Build the partition string for an aggregate's event stream
pub fn stream_key(aggregate_type: AggregateType, aggregate_id: &str) -> String {
    format!("{}#{}", aggregate_type, aggregate_id)
}

/// Zero-padded sort key for a version, preserving lexicographic order
pub fn version_sort_key(version: u64) -> String {
    format!("v{:010}", version)
}
