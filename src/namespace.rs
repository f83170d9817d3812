//! Tenant namespace resolution and per-tenant configuration
//!
//! The namespace is the sole isolation boundary between tenants' memory
//! records, so [`resolve_namespace`] must stay pure and deterministic:
//! identical inputs always produce the identical path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// The memory tier a namespace belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Session,
    Episodes,
    Reflections,
    Facts,
}

/// Tunables for the memory tiers, mirroring the platform defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Episodes returned per query
    pub max_episodes_per_query: usize,
    /// Character budget for the episode context section
    pub episode_context_max_chars: usize,
    pub episode_namespace_prefix: String,

    /// Reflections returned per query
    pub max_reflections_per_query: usize,
    /// Character budget for the reflection context section
    pub reflection_context_max_chars: usize,
    pub reflection_namespace_prefix: String,

    /// Facts (knowledge search) returned per query
    pub max_facts_per_query: usize,
    pub semantic_namespace_prefix: String,
    /// Character budget for the knowledge-search context section
    pub search_context_max_chars: usize,

    pub session_namespace_prefix: String,
    /// Prior turns loaded when rebuilding a session
    pub max_session_messages: usize,
    /// Character budget for the session history section
    pub session_context_max_chars: usize,

    pub enable_tenant_isolation: bool,
    pub tenant_namespace_prefix: String,

    pub enable_memory_cache: bool,
    pub cache_ttl_seconds: u64,

    /// Minimum relevance score for episode retrieval
    pub min_episode_score: f32,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_episodes_per_query: 3,
            episode_context_max_chars: 2000,
            episode_namespace_prefix: "/episodes".to_string(),
            max_reflections_per_query: 2,
            reflection_context_max_chars: 1000,
            reflection_namespace_prefix: "/reflections".to_string(),
            max_facts_per_query: 5,
            semantic_namespace_prefix: "/facts".to_string(),
            search_context_max_chars: 2000,
            session_namespace_prefix: "/sessions".to_string(),
            max_session_messages: 100,
            session_context_max_chars: 4000,
            enable_tenant_isolation: true,
            tenant_namespace_prefix: "/tenant".to_string(),
            enable_memory_cache: true,
            cache_ttl_seconds: 300,
            min_episode_score: 0.5,
        }
    }
}

impl MemorySettings {
    pub fn builder() -> MemorySettingsBuilder {
        MemorySettingsBuilder::default()
    }

    fn kind_prefix(&self, kind: MemoryKind) -> &str {
        match kind {
            MemoryKind::Session => &self.session_namespace_prefix,
            MemoryKind::Episodes => &self.episode_namespace_prefix,
            MemoryKind::Reflections => &self.reflection_namespace_prefix,
            MemoryKind::Facts => &self.semantic_namespace_prefix,
        }
    }
}

/// Configuration builder
#[derive(Debug, Default)]
pub struct MemorySettingsBuilder {
    settings: MemorySettings,
}

impl MemorySettingsBuilder {
    pub fn max_episodes(mut self, count: usize) -> Self {
        self.settings.max_episodes_per_query = count;
        self
    }

    pub fn max_reflections(mut self, count: usize) -> Self {
        self.settings.max_reflections_per_query = count;
        self
    }

    pub fn max_session_messages(mut self, count: usize) -> Self {
        self.settings.max_session_messages = count;
        self
    }

    pub fn episode_context_max_chars(mut self, chars: usize) -> Self {
        self.settings.episode_context_max_chars = chars;
        self
    }

    pub fn reflection_context_max_chars(mut self, chars: usize) -> Self {
        self.settings.reflection_context_max_chars = chars;
        self
    }

    pub fn tenant_isolation(mut self, enabled: bool) -> Self {
        self.settings.enable_tenant_isolation = enabled;
        self
    }

    pub fn memory_cache(mut self, enabled: bool) -> Self {
        self.settings.enable_memory_cache = enabled;
        self
    }

    pub fn min_episode_score(mut self, score: f32) -> Self {
        self.settings.min_episode_score = score;
        self
    }

    pub fn build(self) -> MemorySettings {
        self.settings
    }
}

/// Resolve the storage namespace for `(user, tenant, kind)`.
///
/// With isolation enabled and a tenant supplied the path is
/// `{tenant_prefix}/{tenant}{kind_prefix}/{user}`, otherwise
/// `{kind_prefix}/{user}`.
pub fn resolve_namespace(
    settings: &MemorySettings,
    kind: MemoryKind,
    user_id: &str,
    tenant_id: Option<&str>,
) -> String {
    let prefix = settings.kind_prefix(kind);
    match tenant_id {
        Some(tenant) if settings.enable_tenant_isolation => {
            format!(
                "{}/{}{}/{}",
                settings.tenant_namespace_prefix, tenant, prefix, user_id
            )
        }
        _ => format!("{}/{}", prefix, user_id),
    }
}

/// Session namespaces also carry the session id so one user's sessions stay
/// separate streams
pub fn resolve_session_namespace(
    settings: &MemorySettings,
    user_id: &str,
    session_id: &str,
    tenant_id: Option<&str>,
) -> String {
    format!(
        "{}/{}",
        resolve_namespace(settings, MemoryKind::Session, user_id, tenant_id),
        session_id
    )
}

/// Per-tenant overrides of the base settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub name: String,
    pub max_episodes_per_query: Option<usize>,
    pub max_reflections_per_query: Option<usize>,
    pub max_session_messages: Option<usize>,
    pub enable_episodic_memory: bool,
    pub enable_reflections: bool,
    /// Custom namespace prefix replacing `{tenant_prefix}/{tenant_id}`
    pub namespace_prefix: Option<String>,
}

impl TenantConfig {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        let tenant_id = tenant_id.into();
        let name = format!("Tenant-{}", tenant_id);
        Self {
            tenant_id,
            name,
            max_episodes_per_query: None,
            max_reflections_per_query: None,
            max_session_messages: None,
            enable_episodic_memory: true,
            enable_reflections: true,
            namespace_prefix: None,
        }
    }

    pub fn namespace_prefix(&self, base: &MemorySettings) -> String {
        self.namespace_prefix.clone().unwrap_or_else(|| {
            format!("{}/{}", base.tenant_namespace_prefix, self.tenant_id)
        })
    }
}

/// Registry of tenant configurations.
///
/// Unknown tenants are auto-registered with defaults on first access so a
/// missing registration never fails a request.
pub struct TenantRegistry {
    base: MemorySettings,
    tenants: RwLock<HashMap<String, TenantConfig>>,
}

impl TenantRegistry {
    pub fn new(base: MemorySettings) -> Self {
        Self {
            base,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    pub fn base_settings(&self) -> &MemorySettings {
        &self.base
    }

    pub async fn register(&self, config: TenantConfig) {
        tracing::info!("tenant registered: {}", config.tenant_id);
        self.tenants
            .write()
            .await
            .insert(config.tenant_id.clone(), config);
    }

    /// Fetch a tenant's config, auto-registering defaults when unknown
    pub async fn tenant_config(&self, tenant_id: &str) -> TenantConfig {
        if let Some(config) = self.tenants.read().await.get(tenant_id) {
            return config.clone();
        }

        let config = TenantConfig::new(tenant_id);
        let mut tenants = self.tenants.write().await;
        let entry = tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                tracing::info!("tenant auto-registered: {}", tenant_id);
                config
            });
        entry.clone()
    }

    /// Effective settings for a tenant: base settings with overrides applied
    pub async fn settings_for(&self, tenant_id: &str) -> MemorySettings {
        let config = self.tenant_config(tenant_id).await;
        let mut settings = self.base.clone();
        if let Some(max) = config.max_episodes_per_query {
            settings.max_episodes_per_query = max;
        }
        if let Some(max) = config.max_reflections_per_query {
            settings.max_reflections_per_query = max;
        }
        if let Some(max) = config.max_session_messages {
            settings.max_session_messages = max;
        }
        // A custom prefix folds the tenant id in, so resolution keeps the
        // plain `{prefix}{kind}/{user}` shape.
        if config.namespace_prefix.is_some() {
            settings.tenant_namespace_prefix = String::new();
        }
        settings
    }

    /// Effective namespace for a tenant-scoped retrieval
    pub async fn namespace_for(
        &self,
        tenant_id: &str,
        kind: MemoryKind,
        user_id: &str,
    ) -> String {
        let config = self.tenant_config(tenant_id).await;
        let settings = self.settings_for(tenant_id).await;
        match &config.namespace_prefix {
            Some(custom) => format!(
                "{}{}/{}",
                custom,
                settings.kind_prefix(kind),
                user_id
            ),
            None => resolve_namespace(&self.base, kind, user_id, Some(tenant_id)),
        }
    }

    pub async fn remove_tenant(&self, tenant_id: &str) -> bool {
        let removed = self.tenants.write().await.remove(tenant_id).is_some();
        if removed {
            tracing::info!("tenant removed: {}", tenant_id);
        }
        removed
    }

    pub async fn registered_tenants(&self) -> Vec<String> {
        self.tenants.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_includes_tenant_when_isolated() {
        let settings = MemorySettings::default();
        let ns = resolve_namespace(&settings, MemoryKind::Episodes, "u456", Some("t123"));
        assert_eq!(ns, "/tenant/t123/episodes/u456");
    }

    #[test]
    fn namespace_without_tenant_uses_kind_prefix() {
        let settings = MemorySettings::default();
        let ns = resolve_namespace(&settings, MemoryKind::Reflections, "u456", None);
        assert_eq!(ns, "/reflections/u456");
    }

    #[test]
    fn namespace_ignores_tenant_when_isolation_disabled() {
        let settings = MemorySettings::builder().tenant_isolation(false).build();
        let ns = resolve_namespace(&settings, MemoryKind::Episodes, "u456", Some("t123"));
        assert_eq!(ns, "/episodes/u456");
    }

    #[test]
    fn distinct_tenants_never_share_a_namespace() {
        let settings = MemorySettings::default();
        let a = resolve_namespace(&settings, MemoryKind::Episodes, "u1", Some("t1"));
        let b = resolve_namespace(&settings, MemoryKind::Episodes, "u1", Some("t2"));
        assert_ne!(a, b);
    }

    #[test]
    fn resolution_is_deterministic() {
        let settings = MemorySettings::default();
        let a = resolve_namespace(&settings, MemoryKind::Facts, "u1", Some("t1"));
        let b = resolve_namespace(&settings, MemoryKind::Facts, "u1", Some("t1"));
        assert_eq!(a, b);
    }

    #[test]
    fn session_namespace_carries_session_id() {
        let settings = MemorySettings::default();
        let ns = resolve_session_namespace(&settings, "u1", "sess-9", Some("t1"));
        assert_eq!(ns, "/tenant/t1/sessions/u1/sess-9");
    }

    #[tokio::test]
    async fn unknown_tenant_is_auto_registered_with_defaults() {
        let registry = TenantRegistry::new(MemorySettings::default());
        let config = registry.tenant_config("t-new").await;
        assert_eq!(config.name, "Tenant-t-new");
        assert!(config.enable_episodic_memory);
        assert!(registry
            .registered_tenants()
            .await
            .contains(&"t-new".to_string()));
    }

    #[tokio::test]
    async fn tenant_overrides_apply_to_settings() {
        let registry = TenantRegistry::new(MemorySettings::default());
        let mut config = TenantConfig::new("t1");
        config.max_episodes_per_query = Some(7);
        config.max_reflections_per_query = Some(1);
        registry.register(config).await;

        let settings = registry.settings_for("t1").await;
        assert_eq!(settings.max_episodes_per_query, 7);
        assert_eq!(settings.max_reflections_per_query, 1);
        assert_eq!(settings.max_session_messages, 100);
    }

    #[tokio::test]
    async fn custom_namespace_prefix_replaces_tenant_segment() {
        let registry = TenantRegistry::new(MemorySettings::default());
        let mut config = TenantConfig::new("t1");
        config.namespace_prefix = Some("/org/acme".to_string());
        registry.register(config).await;

        let ns = registry
            .namespace_for("t1", MemoryKind::Episodes, "u1")
            .await;
        assert_eq!(ns, "/org/acme/episodes/u1");
    }

    #[tokio::test]
    async fn remove_tenant_drops_registration() {
        let registry = TenantRegistry::new(MemorySettings::default());
        registry.tenant_config("t1").await;
        assert!(registry.remove_tenant("t1").await);
        assert!(!registry.remove_tenant("t1").await);
    }
}
