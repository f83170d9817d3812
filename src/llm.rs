//! Language model boundary
//!
//! The inference call is an external collaborator; core code depends on the
//! [`LanguageModel`] trait. [`OpenAiCompatClient`] adapts any
//! chat-completions-compatible HTTP endpoint.

use crate::error::{Result, StrataError};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: String,
    /// Composed memory context; absent means bare system prompt
    pub context: Option<String>,
    pub model_id: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerateRequest {
    /// The user-facing prompt with the composed context folded in, the way
    /// the model should see it
    pub fn full_prompt(&self) -> String {
        match &self.context {
            Some(context) if !context.is_empty() => format!(
                "Based on the following context, answer the user's question.\n\n\
                 Context:\n{}\n\nUser Question: {}",
                context, self.prompt
            ),
            _ => self.prompt.clone(),
        }
    }
}

/// Generation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generated {
    pub content: String,
    pub tokens_used: u32,
}

/// Language model contract
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generated>;

    /// Streaming variant yielding text chunks as they arrive
    async fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<String>>>;
}

/// Adapter for OpenAI-compatible chat-completions endpoints
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn payload(&self, request: &GenerateRequest, stream: bool) -> serde_json::Value {
        json!({
            "model": request.model_id,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": stream,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.full_prompt()},
            ],
        })
    }

    fn request_builder(&self, payload: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(self.endpoint()).json(payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generated> {
        let payload = self.payload(request, false);
        let response = self
            .request_builder(&payload)
            .send()
            .await
            .map_err(|e| StrataError::ModelInvocation(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StrataError::ModelInvocation(e.to_string()))?;

        if !status.is_success() {
            return Err(StrataError::ModelInvocation(format!(
                "model endpoint returned {status}: {body}"
            )));
        }

        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| {
                StrataError::ModelInvocation("model response had no content".to_string())
            })?
            .to_string();

        let tokens_used = body
            .get("usage")
            .and_then(|usage| usage.get("total_tokens"))
            .and_then(|tokens| tokens.as_u64())
            .unwrap_or_else(|| (content.len() / 4) as u64) as u32;

        tracing::debug!(
            "generation complete: model {} used {} tokens",
            request.model_id,
            tokens_used
        );

        Ok(Generated {
            content,
            tokens_used,
        })
    }

    async fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let payload = self.payload(request, true);
        let mut response = self
            .request_builder(&payload)
            .send()
            .await
            .map_err(|e| StrataError::ModelInvocation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StrataError::ModelInvocation(format!(
                "model endpoint returned {status}: {body}"
            )));
        }

        let (mut tx, rx) = mpsc::unbounded::<Result<String>>();
        tokio::spawn(async move {
            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        let chunk_str = String::from_utf8_lossy(&chunk);
                        for line in chunk_str.lines() {
                            let line = line.trim();
                            if line.is_empty() || line == "data: [DONE]" {
                                continue;
                            }
                            let Some(data) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data)
                            else {
                                continue;
                            };
                            if let Some(content) = parsed
                                .get("choices")
                                .and_then(|choices| choices.get(0))
                                .and_then(|choice| choice.get("delta"))
                                .and_then(|delta| delta.get("content"))
                                .and_then(|content| content.as_str())
                            {
                                if content.is_empty() {
                                    continue;
                                }
                                if tx.send(Ok(content.to_string())).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        let _ = tx
                            .send(Err(StrataError::ModelInvocation(e.to_string())))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(rx.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_prompt_folds_in_context() {
        let request = GenerateRequest {
            prompt: "How do I reset my password?".into(),
            system_prompt: "You are a support agent.".into(),
            context: Some("## Insights from Past Experience:\n- numbered steps".into()),
            model_id: "claude-3-sonnet".into(),
            temperature: 0.7,
            max_tokens: 4096,
        };

        let full = request.full_prompt();
        assert!(full.starts_with("Based on the following context"));
        assert!(full.contains("numbered steps"));
        assert!(full.ends_with("User Question: How do I reset my password?"));
    }

    #[test]
    fn absent_context_leaves_the_prompt_untouched() {
        let request = GenerateRequest {
            prompt: "Hello".into(),
            system_prompt: "sys".into(),
            context: None,
            model_id: "m".into(),
            temperature: 0.5,
            max_tokens: 100,
        };
        assert_eq!(request.full_prompt(), "Hello");
    }
}
