//! Context composer - merge memory tiers into one bounded prompt context
//!
//! Precedence is fixed, highest first: reflection guidance, episodic
//! experience, session history, knowledge-search results. Distilled lessons
//! outrank raw history because they carry cross-session learning; recent
//! turns outrank one-shot search hits because conversational continuity
//! matters more than a single retrieval match.

use crate::episodic::{build_episode_context, Episode};
use crate::namespace::MemorySettings;
use crate::reflection::{build_reflection_context, Reflection};
use crate::search::SearchHit;
use crate::session_memory::{build_session_context, truncate_with_ellipsis, SessionContext};

/// The four sources feeding one composed context
#[derive(Debug, Clone, Copy, Default)]
pub struct ComposeInputs<'a> {
    pub reflections: &'a [Reflection],
    /// Pattern-applicator guidance; reflection-derived, so it rides in the
    /// reflection section
    pub guidance: Option<&'a str>,
    pub episodes: &'a [Episode],
    pub session: Option<&'a SessionContext>,
    pub search_hits: &'a [SearchHit],
}

/// Merges tier outputs under per-section character budgets
#[derive(Debug, Clone)]
pub struct ContextComposer {
    settings: MemorySettings,
}

impl ContextComposer {
    pub fn new(settings: MemorySettings) -> Self {
        Self { settings }
    }

    /// Compose the context string. Sections that render empty are omitted;
    /// `None` signals the caller to fall back to the bare system prompt.
    pub fn compose(&self, inputs: &ComposeInputs<'_>) -> Option<String> {
        let mut sections: Vec<String> = Vec::new();

        let mut reflection_section = build_reflection_context(
            inputs.reflections,
            self.settings.reflection_context_max_chars,
        );
        if let Some(guidance) = inputs.guidance {
            if !guidance.is_empty() {
                if reflection_section.is_empty() {
                    reflection_section = guidance.to_string();
                } else {
                    reflection_section.push_str("\n\n");
                    reflection_section.push_str(guidance);
                }
            }
        }
        if !reflection_section.is_empty() {
            sections.push(reflection_section);
        }

        let episode_section =
            build_episode_context(inputs.episodes, self.settings.episode_context_max_chars);
        if !episode_section.is_empty() {
            sections.push(episode_section);
        }

        if let Some(session) = inputs.session {
            let session_section = build_session_context(
                session,
                self.settings.max_session_messages,
                self.settings.session_context_max_chars,
            );
            if !session_section.is_empty() {
                sections.push(session_section);
            }
        }

        let search_section =
            build_search_context(inputs.search_hits, self.settings.search_context_max_chars);
        if !search_section.is_empty() {
            sections.push(search_section);
        }

        if sections.is_empty() {
            return None;
        }

        Some(sections.join("\n\n---\n\n"))
    }
}

/// Render knowledge-search hits as a prompt section, end-truncated with an
/// ellipsis marker
pub fn build_search_context(hits: &[SearchHit], max_chars: usize) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut lines = vec!["## Relevant Knowledge Base Information:".to_string()];
    for (i, hit) in hits.iter().enumerate() {
        lines.push(format!("\n### Source {}: {}", i + 1, hit.source));
        lines.push(hit.content.clone());
    }

    truncate_with_ellipsis(lines.join("\n"), max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episodic::Assessment;

    fn composer() -> ContextComposer {
        ContextComposer::new(MemorySettings::default())
    }

    fn reflection() -> Reflection {
        Reflection {
            id: "ref-1".into(),
            use_case: "Password reset support".into(),
            insight: "Numbered steps work".into(),
            success_patterns: vec!["numbered steps".into()],
            failure_patterns: vec![],
            best_practices: vec![],
            episode_count: 3,
            timestamp: String::new(),
        }
    }

    fn episode() -> Episode {
        Episode {
            id: "ep-1".into(),
            situation: "User asked to reset their password".into(),
            intent: "reset password".into(),
            assessment: Assessment::Success,
            justification: String::new(),
            reflection: "walkthrough helped".into(),
            tools_used: vec![],
            timestamp: String::new(),
        }
    }

    fn hit() -> SearchHit {
        SearchHit {
            content: "Open Settings, choose Reset Password.".into(),
            score: 0.9,
            source: "help.md".into(),
            chunk_id: None,
            document_id: None,
        }
    }

    #[test]
    fn all_sources_empty_composes_to_none() {
        let composed = composer().compose(&ComposeInputs::default());
        assert!(composed.is_none());
    }

    #[test]
    fn reflections_alone_render_only_the_reflection_section() {
        let reflections = [reflection()];
        let composed = composer()
            .compose(&ComposeInputs {
                reflections: &reflections,
                ..Default::default()
            })
            .unwrap();

        assert!(composed.contains("## Insights from Past Experience:"));
        assert!(!composed.contains("## Past Similar Experiences:"));
        assert!(!composed.contains("## Conversation so far:"));
        assert!(!composed.contains("## Relevant Knowledge Base Information:"));
        assert!(!composed.contains("---"));
    }

    #[test]
    fn precedence_puts_reflections_before_episodes_before_search() {
        let reflections = [reflection()];
        let episodes = [episode()];
        let hits = [hit()];
        let mut session = SessionContext::new("s1", "u1");
        session.add_message("user", "hello again");

        let composed = composer()
            .compose(&ComposeInputs {
                reflections: &reflections,
                guidance: None,
                episodes: &episodes,
                session: Some(&session),
                search_hits: &hits,
            })
            .unwrap();

        let reflection_pos = composed.find("## Insights from Past Experience:").unwrap();
        let episode_pos = composed.find("## Past Similar Experiences:").unwrap();
        let session_pos = composed.find("## Conversation so far:").unwrap();
        let search_pos = composed
            .find("## Relevant Knowledge Base Information:")
            .unwrap();

        assert!(reflection_pos < episode_pos);
        assert!(episode_pos < session_pos);
        assert!(session_pos < search_pos);
        assert!(composed.contains("\n\n---\n\n"));
    }

    #[test]
    fn guidance_rides_inside_the_reflection_section() {
        let reflections = [reflection()];
        let episodes = [episode()];
        let composed = composer()
            .compose(&ComposeInputs {
                reflections: &reflections,
                guidance: Some("## Guidance from past learning:\nRisk level: LOW"),
                episodes: &episodes,
                session: None,
                search_hits: &[],
            })
            .unwrap();

        let guidance_pos = composed.find("## Guidance from past learning:").unwrap();
        let episode_pos = composed.find("## Past Similar Experiences:").unwrap();
        assert!(guidance_pos < episode_pos);
    }

    #[test]
    fn empty_session_is_omitted_entirely() {
        let session = SessionContext::new("s1", "u1");
        let hits = [hit()];
        let composed = composer()
            .compose(&ComposeInputs {
                session: Some(&session),
                search_hits: &hits,
                ..Default::default()
            })
            .unwrap();

        assert!(!composed.contains("## Conversation so far:"));
        assert!(composed.contains("## Relevant Knowledge Base Information:"));
    }

    #[test]
    fn search_section_is_bounded() {
        let hits: Vec<SearchHit> = (0..30)
            .map(|i| SearchHit {
                content: format!("chunk {i} with a reasonably long body of text"),
                score: 0.5,
                source: format!("doc-{i}.md"),
                chunk_id: None,
                document_id: None,
            })
            .collect();

        let block = build_search_context(&hits, 400);
        assert!(block.chars().count() <= 400);
        assert!(block.ends_with("..."));
    }
}
