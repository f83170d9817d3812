//! Pattern applicator - steer agent behavior with learned patterns
//!
//! Scores reflection-derived success/failure/best-practice statements
//! against the current query with a bounded lexical-overlap heuristic and
//! classifies the risk of proceeding. The resulting guidance block steers
//! the downstream model call; it never gates it.

use crate::reflection::Reflection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Category of a matched pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Success,
    Failure,
    BestPractice,
}

/// Risk classification for the current query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// A pattern statement that matched the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedPattern {
    pub kind: PatternKind,
    pub pattern: String,
    pub confidence: f32,
    pub source_reflection_id: String,
    pub recommendation: String,
}

/// Result of analyzing a query against reflections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub query: String,
    pub applied_patterns: Vec<AppliedPattern>,
    pub overall_recommendation: String,
    pub risk_level: RiskLevel,
    pub suggested_approach: String,
}

impl PatternAnalysis {
    fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            applied_patterns: Vec::new(),
            overall_recommendation: String::new(),
            risk_level: RiskLevel::Low,
            suggested_approach: String::new(),
        }
    }

    pub fn of_kind(&self, kind: PatternKind) -> Vec<&AppliedPattern> {
        self.applied_patterns
            .iter()
            .filter(|p| p.kind == kind)
            .collect()
    }

    pub fn has_failure_patterns(&self) -> bool {
        self.applied_patterns
            .iter()
            .any(|p| p.kind == PatternKind::Failure)
    }

    pub fn has_success_patterns(&self) -> bool {
        self.applied_patterns
            .iter()
            .any(|p| p.kind == PatternKind::Success)
    }
}

/// Configuration for pattern matching.
///
/// The stop-word set is an input, not a constant: callers localize or
/// extend it without touching the scoring thresholds.
#[derive(Debug, Clone)]
pub struct PatternConfig {
    pub min_confidence: f32,
    pub max_patterns_per_type: usize,
    pub stop_words: HashSet<String>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        let stop_words = ["a", "the", "is", "are", "to", "for"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self {
            min_confidence: 0.5,
            max_patterns_per_type: 3,
            stop_words,
        }
    }
}

/// Applies reflection-derived patterns to the current query
pub struct PatternApplicator {
    config: PatternConfig,
}

impl Default for PatternApplicator {
    fn default() -> Self {
        Self::new(PatternConfig::default())
    }
}

impl PatternApplicator {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    /// Score every pattern statement against the query and classify risk
    pub fn analyze_patterns(&self, query: &str, reflections: &[Reflection]) -> PatternAnalysis {
        let mut analysis = PatternAnalysis::empty(query);
        if reflections.is_empty() {
            return analysis;
        }

        let query_lower = query.to_lowercase();
        for reflection in reflections {
            self.apply_reflection(&query_lower, reflection, &mut analysis);
        }

        analysis.applied_patterns = self.limit_patterns(analysis.applied_patterns);
        analysis.risk_level = self.assess_risk(&analysis);
        analysis.overall_recommendation = self.overall_recommendation(&analysis);
        analysis.suggested_approach = self.suggest_approach(&analysis);

        tracing::debug!(
            "pattern analysis complete: {} patterns, risk {}",
            analysis.applied_patterns.len(),
            analysis.risk_level
        );

        analysis
    }

    fn apply_reflection(
        &self,
        query_lower: &str,
        reflection: &Reflection,
        analysis: &mut PatternAnalysis,
    ) {
        let pools = [
            (PatternKind::Success, &reflection.success_patterns),
            (PatternKind::Failure, &reflection.failure_patterns),
            (PatternKind::BestPractice, &reflection.best_practices),
        ];

        for (kind, statements) in pools {
            for statement in statements {
                let confidence = self.pattern_confidence(query_lower, statement);
                if confidence >= self.config.min_confidence {
                    analysis.applied_patterns.push(AppliedPattern {
                        kind,
                        pattern: statement.clone(),
                        confidence,
                        source_reflection_id: reflection.id.clone(),
                        recommendation: recommendation_for(kind, statement),
                    });
                }
            }
        }
    }

    /// Lexical-overlap confidence in [0, 1]: `min(0.3 + jaccard * 0.7, 1)`
    /// over non-stop-word tokens, with a 0.3 floor when the pattern has any
    /// tokens and 0.0 for an empty pattern.
    pub fn pattern_confidence(&self, query_lower: &str, pattern: &str) -> f32 {
        let pattern_lower = pattern.to_lowercase();
        let pattern_words: HashSet<&str> = pattern_lower.split_whitespace().collect();
        if pattern_words.is_empty() {
            return 0.0;
        }

        let query_words: HashSet<&str> = query_lower.split_whitespace().collect();
        let stop = &self.config.stop_words;

        let common: Vec<&&str> = query_words
            .intersection(&pattern_words)
            .filter(|w| !stop.contains(**w))
            .collect();
        if common.is_empty() {
            // Some topical relatedness is assumed for any retrieved pattern.
            return 0.3;
        }

        let union: Vec<&&str> = query_words
            .union(&pattern_words)
            .filter(|w| !stop.contains(**w))
            .collect();
        if union.is_empty() {
            return 0.3;
        }

        let jaccard = common.len() as f32 / union.len() as f32;
        (0.3 + jaccard * 0.7).min(1.0)
    }

    /// Sort descending by confidence (stable, so encounter order breaks
    /// ties) and cap each category
    fn limit_patterns(&self, patterns: Vec<AppliedPattern>) -> Vec<AppliedPattern> {
        let mut sorted = patterns;
        sorted.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut result = Vec::new();
        let mut counts: std::collections::HashMap<PatternKind, usize> =
            std::collections::HashMap::new();
        for pattern in sorted {
            let count = counts.entry(pattern.kind).or_insert(0);
            if *count < self.config.max_patterns_per_type {
                *count += 1;
                result.push(pattern);
            }
        }
        result
    }

    fn assess_risk(&self, analysis: &PatternAnalysis) -> RiskLevel {
        let failures = analysis.of_kind(PatternKind::Failure);
        let success_count = analysis.of_kind(PatternKind::Success).len();

        if !failures.is_empty() {
            let avg: f32 =
                failures.iter().map(|p| p.confidence).sum::<f32>() / failures.len() as f32;
            if avg > 0.7 || failures.len() >= 2 {
                return RiskLevel::High;
            }
        }

        if success_count > failures.len() {
            return RiskLevel::Low;
        }
        if failures.is_empty() {
            RiskLevel::Low
        } else {
            RiskLevel::Medium
        }
    }

    fn overall_recommendation(&self, analysis: &PatternAnalysis) -> String {
        let mut parts = Vec::new();
        if analysis.has_failure_patterns() {
            parts.push("This resembles patterns that caused problems before; proceed carefully.");
        }
        if analysis.has_success_patterns() {
            parts.push("Previously successful approaches apply here.");
        }
        if !analysis.of_kind(PatternKind::BestPractice).is_empty() {
            parts.push("Related best practices are available.");
        }
        if parts.is_empty() {
            return "No noteworthy patterns were detected.".to_string();
        }
        parts.join(" ")
    }

    fn suggest_approach(&self, analysis: &PatternAnalysis) -> String {
        if analysis.risk_level == RiskLevel::High {
            return "Risk is high: review the past failure patterns and consider a \
                    different approach."
                .to_string();
        }
        if let Some(top) = analysis.of_kind(PatternKind::Success).first() {
            return format!("Follow the successful pattern: {}", clip(&top.pattern, 150));
        }
        if let Some(top) = analysis.of_kind(PatternKind::BestPractice).first() {
            return format!("Apply the best practice: {}", clip(&top.pattern, 150));
        }
        "Proceed with the standard approach.".to_string()
    }

    /// Render the guidance block injected ahead of the model call.
    /// Empty when nothing matched.
    pub fn build_guidance_prompt(&self, analysis: &PatternAnalysis) -> String {
        if analysis.applied_patterns.is_empty() {
            return String::new();
        }

        let mut lines = vec!["## Guidance from past learning:".to_string()];
        lines.push(format!("\n{}", analysis.overall_recommendation));
        lines.push(format!(
            "\nRisk level: {}",
            analysis.risk_level.to_string().to_uppercase()
        ));

        let failures = analysis.of_kind(PatternKind::Failure);
        if !failures.is_empty() {
            lines.push("\n### Patterns to avoid:".to_string());
            for pattern in failures.iter().take(2) {
                lines.push(format!("- {}", pattern.recommendation));
            }
        }

        let successes = analysis.of_kind(PatternKind::Success);
        if !successes.is_empty() {
            lines.push("\n### Successful patterns:".to_string());
            for pattern in successes.iter().take(2) {
                lines.push(format!("- {}", pattern.recommendation));
            }
        }

        let practices = analysis.of_kind(PatternKind::BestPractice);
        if !practices.is_empty() {
            lines.push("\n### Best practices:".to_string());
            for pattern in practices.iter().take(2) {
                lines.push(format!("- {}", pattern.recommendation));
            }
        }

        lines.push(format!(
            "\nSuggested approach: {}",
            analysis.suggested_approach
        ));

        lines.join("\n")
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn recommendation_for(kind: PatternKind, pattern: &str) -> String {
    let clipped = clip(pattern, 100);
    match kind {
        PatternKind::Success => format!("Consider this approach: {}", clipped),
        PatternKind::Failure => format!("Caution, a past failure pattern: {}", clipped),
        PatternKind::BestPractice => format!("Best practice: {}", clipped),
    }
}
