//! Value objects shared across the agent and session aggregates

use crate::error::{Result, StrataError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Opaque identifier for an agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    /// Generate a new unique agent id
    pub fn generate() -> Self {
        Self(format!("agent-{}", &Uuid::new_v4().simple().to_string()[..12]))
    }

    /// Wrap an existing id; rejects empty or whitespace-only values
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(StrataError::Validation("AgentId cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for a conversation session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new unique session id
    pub fn generate() -> Self {
        Self(format!(
            "session-{}",
            &Uuid::new_v4().simple().to_string()[..12]
        ))
    }

    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(StrataError::Validation("SessionId cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A validated prompt submitted to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    content: String,
    role: MessageRole,
}

impl Prompt {
    /// Create a user prompt; content is trimmed and must be non-empty
    pub fn new(content: impl Into<String>) -> Result<Self> {
        Self::with_role(content, MessageRole::User)
    }

    pub fn with_role(content: impl Into<String>, role: MessageRole) -> Result<Self> {
        let content = content.into();
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(StrataError::Validation(
                "Prompt content cannot be empty".into(),
            ));
        }
        Ok(Self {
            content: trimmed.to_string(),
            role,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    /// Rough token estimate (4 chars ≈ 1 token)
    pub fn token_estimate(&self) -> usize {
        self.content.len() / 4
    }
}

/// A source document that contributed to a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A generated response from the language model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    pub tokens_used: u32,
    pub model: String,
    pub latency_ms: u64,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl ModelResponse {
    pub fn new(
        content: impl Into<String>,
        tokens_used: u32,
        model: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            content: content.into(),
            tokens_used,
            model: model.into(),
            latency_ms,
            sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

/// Language-model sampling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub model_id: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl ModelParameters {
    /// Validating constructor: temperature and top_p in [0, 1],
    /// max_tokens in (0, 100_000]
    pub fn new(
        model_id: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
        top_p: f32,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(StrataError::Validation(
                "temperature must be between 0 and 1".into(),
            ));
        }
        if max_tokens == 0 {
            return Err(StrataError::Validation("max_tokens must be positive".into()));
        }
        if max_tokens > 100_000 {
            return Err(StrataError::Validation(
                "max_tokens cannot exceed 100000".into(),
            ));
        }
        if !(0.0..=1.0).contains(&top_p) {
            return Err(StrataError::Validation(
                "top_p must be between 0 and 1".into(),
            ));
        }
        Ok(Self {
            model_id: model_id.into(),
            temperature,
            max_tokens,
            top_p,
        })
    }

    /// Default parameters for a general chat model
    pub fn default_chat() -> Self {
        Self {
            model_id: "claude-3-sonnet".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            top_p: 0.9,
        }
    }
}

/// Retrieval configuration for the knowledge-search tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub rerank_enabled: bool,
    pub max_context_tokens: u32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.7,
            rerank_enabled: true,
            max_context_tokens: 4000,
        }
    }
}

/// Agent configuration: base instructions plus model and retrieval knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub system_prompt: String,
    pub model_params: ModelParameters,
    pub rag_config: RagConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentConfig {
    pub fn new(system_prompt: impl Into<String>, model_params: ModelParameters) -> Self {
        let now = Utc::now();
        Self {
            system_prompt: system_prompt.into(),
            model_params,
            rag_config: RagConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_generation_is_unique() {
        assert_ne!(AgentId::generate().as_str(), AgentId::generate().as_str());
    }

    #[test]
    fn agent_id_rejects_empty() {
        assert!(AgentId::parse("   ").is_err());
    }

    #[test]
    fn prompt_trims_and_validates() {
        let prompt = Prompt::new("  hello  ").unwrap();
        assert_eq!(prompt.content(), "hello");
        assert!(Prompt::new("").is_err());
    }

    #[test]
    fn prompt_token_estimate() {
        let prompt = Prompt::new("abcdefgh").unwrap();
        assert_eq!(prompt.token_estimate(), 2);
    }

    #[test]
    fn model_parameters_bounds() {
        assert!(ModelParameters::new("m", 1.5, 100, 0.9).is_err());
        assert!(ModelParameters::new("m", 0.5, 0, 0.9).is_err());
        assert!(ModelParameters::new("m", 0.5, 200_000, 0.9).is_err());
        assert!(ModelParameters::new("m", 0.5, 100, 2.0).is_err());
        assert!(ModelParameters::new("m", 0.5, 100, 0.9).is_ok());
    }
}
