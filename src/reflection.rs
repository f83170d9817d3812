//! Reflection memory - distilled insights over many episodes
//!
//! Reflections are read-only inputs here: the platform distills them in the
//! background from accumulated episodes. This tier retrieves the ones
//! relevant to the current use case and renders them into the
//! highest-priority prompt section.

use crate::namespace::{MemoryKind, TenantRegistry};
use crate::platform::{MemoryPlatform, MemoryRecord, Retrieval};
use crate::session_memory::truncate_with_ellipsis;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A distillation of many episodes into reusable guidance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub id: String,
    /// The scenario this reflection applies to
    pub use_case: String,
    /// The distilled insight
    pub insight: String,
    pub success_patterns: Vec<String>,
    pub failure_patterns: Vec<String>,
    pub best_practices: Vec<String>,
    /// How many episodes fed this reflection
    pub episode_count: u32,
    pub timestamp: String,
}

impl Reflection {
    /// Parse a reflection from a raw platform record
    pub fn from_record(record: &MemoryRecord) -> Self {
        let content = &record.content;
        let text = |key: &str| {
            content
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let list = |key: &str| {
            content
                .get(key)
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default()
        };

        Reflection {
            id: record.id.clone(),
            use_case: text("use_case"),
            insight: text("insight"),
            success_patterns: list("success_patterns"),
            failure_patterns: list("failure_patterns"),
            best_practices: list("best_practices"),
            episode_count: content
                .get("episode_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            timestamp: record.timestamp.clone(),
        }
    }
}

/// Reflection memory tier
pub struct ReflectionService {
    platform: Arc<dyn MemoryPlatform>,
    registry: Arc<TenantRegistry>,
}

impl ReflectionService {
    pub fn new(platform: Arc<dyn MemoryPlatform>, registry: Arc<TenantRegistry>) -> Self {
        Self { platform, registry }
    }

    /// Retrieve reflections relevant to the use case, best first.
    /// Collaborator failures degrade to an empty list.
    pub async fn retrieve_relevant_reflections(
        &self,
        user_id: &str,
        use_case: &str,
        tenant_id: Option<&str>,
    ) -> Retrieval<Vec<Reflection>> {
        let settings = match tenant_id {
            Some(tenant) => self.registry.settings_for(tenant).await,
            None => self.registry.base_settings().clone(),
        };
        let namespace = match tenant_id {
            Some(tenant) => {
                self.registry
                    .namespace_for(tenant, MemoryKind::Reflections, user_id)
                    .await
            }
            None => crate::namespace::resolve_namespace(
                self.registry.base_settings(),
                MemoryKind::Reflections,
                user_id,
                None,
            ),
        };

        match self
            .platform
            .retrieve(&namespace, use_case, settings.max_reflections_per_query, 0.0)
            .await
        {
            Ok(records) => {
                let reflections: Vec<Reflection> =
                    records.iter().map(Reflection::from_record).collect();
                tracing::debug!(
                    "retrieved {} relevant reflections for {}",
                    reflections.len(),
                    user_id
                );
                Retrieval::Healthy(reflections)
            }
            Err(e) => {
                tracing::warn!("reflection retrieval failed for {}: {}", user_id, e);
                Retrieval::degraded(Vec::new(), format!("reflection memory unavailable: {e}"))
            }
        }
    }
}

/// Render reflections as a prompt section, end-truncated with an ellipsis
/// marker
pub fn build_reflection_context(reflections: &[Reflection], max_chars: usize) -> String {
    if reflections.is_empty() {
        return String::new();
    }

    let mut lines = vec!["## Insights from Past Experience:".to_string()];
    for reflection in reflections {
        lines.push(format!("\n### {}:", reflection.use_case));
        if !reflection.insight.is_empty() {
            lines.push(format!("Insight: {}", reflection.insight));
        }
        if !reflection.success_patterns.is_empty() {
            lines.push("What works well:".to_string());
            for pattern in &reflection.success_patterns {
                lines.push(format!("- {}", pattern));
            }
        }
        if !reflection.failure_patterns.is_empty() {
            lines.push("What to avoid:".to_string());
            for pattern in &reflection.failure_patterns {
                lines.push(format!("- {}", pattern));
            }
        }
        if !reflection.best_practices.is_empty() {
            lines.push("Best practices:".to_string());
            for practice in &reflection.best_practices {
                lines.push(format!("- {}", practice));
            }
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

    fn reflection_json() -> serde_json::Value {
        json!({
            "use_case": "Password reset support",
            "insight": "Clear step-by-step instructions improve success rate",
            "success_patterns": ["Provide numbered steps", "Include screenshots when possible"],
            "failure_patterns": ["Too much technical jargon"],
            "best_practices": ["Verify user identity first"],
            "episode_count": 15,
        })
    }

    #[tokio::test]
    async fn retrieves_reflections_with_tenant_isolation() {
        let platform = Arc::new(IndexedMemoryPlatform::new().unwrap());
        let registry = Arc::new(TenantRegistry::new(MemorySettings::default()));
        let service = ReflectionService::new(platform.clone(), registry);

        platform
            .put_record("/tenant/t1/reflections/u1", reflection_json())
            .unwrap();

        let reflections = service
            .retrieve_relevant_reflections("u1", "password reset help", Some("t1"))
            .await
            .into_value();
        assert_eq!(reflections.len(), 1);
        assert_eq!(reflections[0].use_case, "Password reset support");
        assert_eq!(reflections[0].success_patterns.len(), 2);
        assert_eq!(reflections[0].episode_count, 15);

        let other_tenant = service
            .retrieve_relevant_reflections("u1", "password reset help", Some("t2"))
            .await
            .into_value();
        assert!(other_tenant.is_empty());
    }

    #[test]
    fn reflection_context_has_pattern_groups() {
        let record = MemoryRecord {
            id: "ref-1".into(),
            namespace: "/reflections/u1".into(),
            content: reflection_json(),
            score: 0.92,
            timestamp: String::new(),
        };
        let reflection = Reflection::from_record(&record);

        let block = build_reflection_context(std::slice::from_ref(&reflection), 2000);
        assert!(block.contains("## Insights from Past Experience:"));
        assert!(block.contains("Password reset support"));
        assert!(block.contains("What works well:"));
        assert!(block.contains("Provide numbered steps"));
        assert!(block.contains("What to avoid:"));
        assert!(block.contains("Too much technical jargon"));
        assert!(block.contains("Best practices:"));
        assert!(block.contains("Verify user identity first"));
    }

    #[test]
    fn long_reflection_context_is_truncated() {
        let reflection = Reflection {
            id: "ref-1".into(),
            use_case: "Test".into(),
            insight: "A".repeat(2000),
            success_patterns: vec!["B".repeat(500)],
            failure_patterns: vec![],
            best_practices: vec![],
            episode_count: 1,
            timestamp: String::new(),
        };

        let block = build_reflection_context(&[reflection], 500);
        assert!(block.chars().count() <= 500);
        assert!(block.ends_with("..."));
    }

    #[test]
    fn empty_reflections_render_empty_block() {
        assert_eq!(build_reflection_context(&[], 500), "");
    }
}
