//! Episodic memory - structured records of past interactions
//!
//! Episodes capture what happened, what the user intended, and how it went.
//! The platform derives them from saved interaction turns; this tier
//! retrieves the ones similar to the current query and renders them into a
//! bounded prompt section.

use crate::error::Result;
use crate::namespace::{MemoryKind, TenantRegistry};
use crate::platform::{MemoryPlatform, MemoryRecord, Retrieval};
use crate::session_memory::truncate_with_ellipsis;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome evaluation of an episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Assessment {
    Success,
    Failure,
    Partial,
    Unknown,
}

impl Assessment {
    fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "SUCCESS" => Assessment::Success,
            "FAILURE" => Assessment::Failure,
            "PARTIAL" => Assessment::Partial,
            _ => Assessment::Unknown,
        }
    }
}

impl std::fmt::Display for Assessment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Assessment::Success => write!(f, "SUCCESS"),
            Assessment::Failure => write!(f, "FAILURE"),
            Assessment::Partial => write!(f, "PARTIAL"),
            Assessment::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// An episodic memory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    /// What happened
    pub situation: String,
    /// What the user was trying to accomplish
    pub intent: String,
    pub assessment: Assessment,
    /// Why the outcome occurred
    pub justification: String,
    /// Episode-level learnings
    pub reflection: String,
    pub tools_used: Vec<String>,
    pub timestamp: String,
}

impl Episode {
    /// Parse an episode from a raw platform record
    pub fn from_record(record: &MemoryRecord) -> Self {
        let content = &record.content;
        let text = |key: &str| {
            content
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let reflection = content
            .get("episode_reflection")
            .or_else(|| content.get("reflection"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let tools_used = content
            .get("tools_used")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Episode {
            id: record.id.clone(),
            situation: text("situation"),
            intent: text("intent"),
            assessment: Assessment::parse(&text("assessment")),
            justification: text("justification"),
            reflection,
            tools_used,
            timestamp: record.timestamp.clone(),
        }
    }
}

/// Aggregated statistics over a user's episodes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeStats {
    pub total_episodes: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub partial_count: usize,
    pub success_rate: f32,
    pub most_used_tools: Vec<(String, usize)>,
}

/// Episodic memory tier
pub struct EpisodicMemoryService {
    platform: Arc<dyn MemoryPlatform>,
    registry: Arc<TenantRegistry>,
}

impl EpisodicMemoryService {
    pub fn new(platform: Arc<dyn MemoryPlatform>, registry: Arc<TenantRegistry>) -> Self {
        Self { platform, registry }
    }

    async fn namespace(&self, user_id: &str, tenant_id: Option<&str>) -> String {
        match tenant_id {
            Some(tenant) => {
                self.registry
                    .namespace_for(tenant, MemoryKind::Episodes, user_id)
                    .await
            }
            None => crate::namespace::resolve_namespace(
                self.registry.base_settings(),
                MemoryKind::Episodes,
                user_id,
                None,
            ),
        }
    }

    /// Retrieve episodes similar to the query, best first. Collaborator
    /// failures degrade to an empty list.
    pub async fn retrieve_similar_episodes(
        &self,
        user_id: &str,
        query: &str,
        tenant_id: Option<&str>,
        max_results: Option<usize>,
        min_score: Option<f32>,
    ) -> Retrieval<Vec<Episode>> {
        let settings = match tenant_id {
            Some(tenant) => self.registry.settings_for(tenant).await,
            None => self.registry.base_settings().clone(),
        };
        let max_results = max_results.unwrap_or(settings.max_episodes_per_query);
        let min_score = min_score.unwrap_or(settings.min_episode_score);
        let namespace = self.namespace(user_id, tenant_id).await;

        match self
            .platform
            .retrieve(&namespace, query, max_results, min_score)
            .await
        {
            Ok(records) => {
                let episodes: Vec<Episode> =
                    records.iter().map(Episode::from_record).collect();
                tracing::debug!(
                    "retrieved {} similar episodes for {}",
                    episodes.len(),
                    user_id
                );
                Retrieval::Healthy(episodes)
            }
            Err(e) => {
                tracing::warn!("episode retrieval failed for {}: {}", user_id, e);
                Retrieval::degraded(Vec::new(), format!("episodic memory unavailable: {e}"))
            }
        }
    }

    /// Save an interaction for future episode detection. Invoked after the
    /// response is computed; the caller treats failures as advisory.
    pub async fn save_interaction(
        &self,
        session_id: &str,
        user_id: &str,
        user_message: &str,
        assistant_response: &str,
        tool_calls: &[(String, String)],
        tenant_id: Option<&str>,
    ) -> Result<()> {
        let mut messages: Vec<(String, String)> = vec![
            (user_message.to_string(), "USER".to_string()),
            (assistant_response.to_string(), "ASSISTANT".to_string()),
        ];
        for (name, result) in tool_calls {
            let clipped: String = result.chars().take(500).collect();
            messages.push((format!("Tool: {}, Result: {}", name, clipped), "TOOL".to_string()));
        }

        let mut metadata = HashMap::new();
        if let Some(tenant) = tenant_id {
            metadata.insert("tenant_id".to_string(), tenant.to_string());
        }

        self.platform
            .create_event(user_id, session_id, &messages, metadata)
            .await?;

        tracing::debug!(
            "interaction saved for episode detection: {} ({} tool calls)",
            session_id,
            tool_calls.len()
        );
        Ok(())
    }

    /// Statistics over a user's episode namespace
    pub async fn episode_stats(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<EpisodeStats> {
        let namespace = self.namespace(user_id, tenant_id).await;
        let records = self.platform.retrieve(&namespace, "*", 100, 0.0).await?;
        let episodes: Vec<Episode> = records.iter().map(Episode::from_record).collect();

        let success_count = episodes
            .iter()
            .filter(|e| e.assessment == Assessment::Success)
            .count();
        let failure_count = episodes
            .iter()
            .filter(|e| e.assessment == Assessment::Failure)
            .count();
        let partial_count = episodes
            .iter()
            .filter(|e| e.assessment == Assessment::Partial)
            .count();

        let mut tool_counts: HashMap<String, usize> = HashMap::new();
        for episode in &episodes {
            for tool in &episode.tools_used {
                *tool_counts.entry(tool.clone()).or_insert(0) += 1;
            }
        }
        let mut most_used_tools: Vec<(String, usize)> = tool_counts.into_iter().collect();
        most_used_tools.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_used_tools.truncate(5);

        let success_rate = if episodes.is_empty() {
            0.0
        } else {
            success_count as f32 / episodes.len() as f32
        };

        Ok(EpisodeStats {
            total_episodes: episodes.len(),
            success_count,
            failure_count,
            partial_count,
            success_rate,
            most_used_tools,
        })
    }
}

/// Render episodes as a numbered prompt section, end-truncated with an
/// ellipsis marker
pub fn build_episode_context(episodes: &[Episode], max_chars: usize) -> String {
    if episodes.is_empty() {
        return String::new();
    }

    let mut lines = vec!["## Past Similar Experiences:".to_string()];
    for (i, episode) in episodes.iter().enumerate() {
        lines.push(format!("\n### Experience {}:", i + 1));
        lines.push(format!("- Situation: {}", episode.situation));
        lines.push(format!("- Intent: {}", episode.intent));
        lines.push(format!("- Outcome: {}", episode.assessment));
        if !episode.reflection.is_empty() {
            lines.push(format!("- Learning: {}", episode.reflection));
        }
        if !episode.tools_used.is_empty() {
            lines.push(format!("- Tools used: {}", episode.tools_used.join(", ")));
        }
    }

    truncate_with_ellipsis(lines.join("\n"), max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::MemorySettings;
    use crate::platform::IndexedMemoryPlatform;
    use serde_json::json;

    fn fixture() -> (Arc<IndexedMemoryPlatform>, EpisodicMemoryService) {
        let platform = Arc::new(IndexedMemoryPlatform::new().unwrap());
        let registry = Arc::new(TenantRegistry::new(MemorySettings::default()));
        let service = EpisodicMemoryService::new(platform.clone(), registry);
        (platform, service)
    }

    fn episode_json(situation: &str, assessment: &str, tools: &[&str]) -> serde_json::Value {
        json!({
            "situation": situation,
            "intent": "get help",
            "assessment": assessment,
            "justification": "clear steps were provided",
            "episode_reflection": "users prefer numbered steps",
            "tools_used": tools,
        })
    }

    #[tokio::test]
    async fn retrieves_similar_episodes_from_tenant_namespace() {
        let (platform, service) = fixture();
        platform
            .put_record(
                "/tenant/t1/episodes/u1",
                episode_json("password reset walkthrough", "SUCCESS", &["search_kb"]),
            )
            .unwrap();

        let episodes = service
            .retrieve_similar_episodes("u1", "password reset", Some("t1"), None, Some(0.0))
            .await
            .into_value();

        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].assessment, Assessment::Success);
        assert_eq!(episodes[0].situation, "password reset walkthrough");
        assert_eq!(episodes[0].reflection, "users prefer numbered steps");
    }

    #[tokio::test]
    async fn other_tenants_episodes_are_invisible() {
        let (platform, service) = fixture();
        platform
            .put_record(
                "/tenant/t2/episodes/u1",
                episode_json("password reset walkthrough", "SUCCESS", &[]),
            )
            .unwrap();

        let episodes = service
            .retrieve_similar_episodes("u1", "password reset", Some("t1"), None, Some(0.0))
            .await
            .into_value();
        assert!(episodes.is_empty());
    }

    #[tokio::test]
    async fn stats_aggregate_assessments_and_tools() {
        let (platform, service) = fixture();
        let ns = "/tenant/t1/episodes/u1";
        platform
            .put_record(ns, episode_json("a", "SUCCESS", &["search_kb", "mailer"]))
            .unwrap();
        platform
            .put_record(ns, episode_json("b", "FAILURE", &["search_kb"]))
            .unwrap();
        platform.put_record(ns, episode_json("c", "PARTIAL", &[])).unwrap();

        let stats = service.episode_stats("u1", Some("t1")).await.unwrap();
        assert_eq!(stats.total_episodes, 3);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.partial_count, 1);
        assert_eq!(stats.most_used_tools[0], ("search_kb".to_string(), 2));
    }

    #[test]
    fn context_block_is_bounded_and_ends_with_ellipsis() {
        let episodes: Vec<Episode> = (0..20)
            .map(|i| Episode {
                id: format!("ep-{i}"),
                situation: format!("a fairly long situation description number {i}"),
                intent: "resolve an issue".to_string(),
                assessment: Assessment::Success,
                justification: String::new(),
                reflection: "something was learned".to_string(),
                tools_used: vec!["search".to_string()],
                timestamp: String::new(),
            })
            .collect();

        let block = build_episode_context(&episodes, 500);
        assert!(block.chars().count() <= 500);
        assert!(block.ends_with("..."));
        assert!(block.starts_with("## Past Similar Experiences:"));
    }

    #[test]
    fn empty_episodes_render_empty_block() {
        assert_eq!(build_episode_context(&[], 500), "");
    }

    #[test]
    fn unknown_assessment_parses_as_unknown() {
        let record = MemoryRecord {
            id: "r1".into(),
            namespace: "/episodes/u1".into(),
            content: json!({"situation": "s", "assessment": "WEIRD"}),
            score: 1.0,
            timestamp: String::new(),
        };
        assert_eq!(Episode::from_record(&record).assessment, Assessment::Unknown);
    }
}
