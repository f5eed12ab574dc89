//! # Review Criteria
//!
//! The closed set of judgments a persona can apply to a draft, plus one escape
//! hatch for user-supplied evaluators. Keeping the set closed keeps the review
//! table exhaustive and testable.

use regex::RegexBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::skills::artifact_registry::{DraftArtifact, PersonaAssessment};
use crate::state::skills_ledger::{Severity, SkillPattern};

/// Prefix of flags raised for claims or signals nobody could verify
pub const UNVERIFIED_PREFIX: &str = "[UNVERIFIED]";

/// Publish-blocking flag: AI-generated content without a disclosure
pub const UNDISCLOSED_AI_CONTENT: &str = "undisclosed_ai_content";

/// Signals computed from the draft itself rather than assessed by a model
pub const COMPUTED_SIGNALS: [&str; 4] = [
    "word_count",
    "source_count",
    "unverified_markers",
    "has_ai_disclosure",
];

/// Flag for something that could not be verified
pub fn unverified_flag(subject: &str) -> String {
    format!("{} {}", UNVERIFIED_PREFIX, subject)
}

/// Lowercase, underscore-separated identifier fragment (max 40 chars)
pub fn slug(text: &str) -> String {
    let mut out = String::new();
    for c in text.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    let trimmed: String = out.trim_end_matches('_').chars().take(40).collect();
    trimmed.trim_end_matches('_').to_string()
}

/// A candidate skill pattern observed during review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    pub pattern_id: String,
    pub description: String,
    pub severity: Severity,
    pub example: String,
}

/// What a reviewer sees: the draft plus its numeric signals
#[derive(Debug)]
pub struct DraftView<'a> {
    draft: &'a DraftArtifact,
    signals: BTreeMap<String, f64>,
    text: String,
}

impl<'a> DraftView<'a> {
    /// Merge computed draft metrics with a persona's assessed signals.
    /// Computed metrics win on name clashes.
    pub fn new(draft: &'a DraftArtifact, assessment: Option<&PersonaAssessment>) -> Self {
        let mut signals: BTreeMap<String, f64> = assessment
            .map(|a| {
                a.signals
                    .iter()
                    .filter(|(_, v)| v.is_finite())
                    .map(|(k, v)| (k.clone(), *v))
                    .collect()
            })
            .unwrap_or_default();

        let has_disclosure = draft
            .ai_disclosure
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty());

        signals.insert("word_count".into(), draft.word_count() as f64);
        signals.insert("source_count".into(), draft.sources.len() as f64);
        signals.insert(
            "unverified_markers".into(),
            draft.body.matches(UNVERIFIED_PREFIX).count() as f64,
        );
        signals.insert(
            "has_ai_disclosure".into(),
            if has_disclosure { 1.0 } else { 0.0 },
        );

        let text = format!("{}\n{}\n{}", draft.title, draft.summary, draft.body);
        Self {
            draft,
            signals,
            text,
        }
    }

    pub fn draft(&self) -> &DraftArtifact {
        self.draft
    }

    pub fn signal(&self, name: &str) -> Option<f64> {
        self.signals.get(name).copied()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Case-insensitive substring test
    pub fn contains(&self, needle: &str) -> bool {
        let needle = needle.trim();
        !needle.is_empty() && self.text.to_lowercase().contains(&needle.to_lowercase())
    }

    /// Case-insensitive whole-phrase test
    pub fn contains_phrase(&self, phrase: &str) -> bool {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return false;
        }
        let pattern = format!(r"(?:^|\W){}(?:$|\W)", regex::escape(phrase));
        match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(re) => re.is_match(&self.text),
            Err(_) => self.contains(phrase),
        }
    }
}

/// Result of applying one criterion
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionOutcome {
    /// In `[0, 1]`
    pub score: f64,
    pub flags: Vec<String>,
    pub findings: Vec<Finding>,
    pub note: Option<String>,
}

impl CriterionOutcome {
    pub fn pass() -> Self {
        Self {
            score: 1.0,
            flags: Vec::new(),
            findings: Vec::new(),
            note: None,
        }
    }

    pub fn scored(score: f64, note: impl Into<String>) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            flags: Vec::new(),
            findings: Vec::new(),
            note: Some(note.into()),
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }

    pub fn passed(&self) -> bool {
        self.score >= 1.0 - f64::EPSILON && self.flags.is_empty()
    }
}

/// User-supplied evaluation capability
pub trait CriterionEvaluator: Send + Sync + fmt::Debug {
    fn evaluate(&self, signal: &str, view: &DraftView<'_>) -> CriterionOutcome;
}

/// How a criterion judges its signal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Judgment {
    /// Signal value must lie within `[min, max]`; partial credit outside
    NumericThreshold {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// None of the phrases may appear (case-insensitive, whole phrase)
    KeywordBan {
        phrases: Vec<String>,
        #[serde(default)]
        flag: Option<String>,
    },
    /// `required` markers must be present; forbidden ones must be absent
    FlagPresence {
        marker: String,
        required: bool,
        flag: String,
    },
    /// Delegated to a user-supplied evaluator. Not configurable from files.
    #[serde(skip)]
    Custom(Arc<dyn CriterionEvaluator>),
}

/// One acceptance criterion of a persona
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    pub signal: String,
    pub judgment: Judgment,
}

impl Criterion {
    pub fn numeric(signal: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            signal: signal.to_string(),
            judgment: Judgment::NumericThreshold { min, max },
        }
    }

    pub fn keyword_ban(signal: &str, phrases: &[&str], flag: Option<&str>) -> Self {
        Self {
            signal: signal.to_string(),
            judgment: Judgment::KeywordBan {
                phrases: phrases.iter().map(|p| p.to_string()).collect(),
                flag: flag.map(str::to_string),
            },
        }
    }

    pub fn flag_presence(signal: &str, marker: &str, required: bool, flag: &str) -> Self {
        Self {
            signal: signal.to_string(),
            judgment: Judgment::FlagPresence {
                marker: marker.to_string(),
                required,
                flag: flag.to_string(),
            },
        }
    }

    pub fn custom(signal: &str, evaluator: Arc<dyn CriterionEvaluator>) -> Self {
        Self {
            signal: signal.to_string(),
            judgment: Judgment::Custom(evaluator),
        }
    }

    /// Whether this criterion reads a signal only a model assessment can supply
    pub fn needs_assessment(&self) -> bool {
        matches!(self.judgment, Judgment::NumericThreshold { .. })
            && !COMPUTED_SIGNALS.contains(&self.signal.as_str())
    }

    pub fn evaluate(&self, view: &DraftView<'_>) -> CriterionOutcome {
        let signal = self.signal.as_str();
        match &self.judgment {
            Judgment::NumericThreshold { min, max } => numeric(signal, *min, *max, view),
            Judgment::KeywordBan { phrases, flag } => {
                keyword_ban(signal, phrases, flag.as_deref(), view)
            }
            Judgment::FlagPresence {
                marker,
                required,
                flag,
            } => flag_presence(signal, marker, *required, flag, view),
            Judgment::Custom(evaluator) => {
                let mut outcome = evaluator.evaluate(signal, view);
                outcome.score = if outcome.score.is_finite() {
                    outcome.score.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                outcome
            }
        }
    }
}

fn numeric(
    signal: &str,
    min: Option<f64>,
    max: Option<f64>,
    view: &DraftView<'_>,
) -> CriterionOutcome {
    let Some(value) = view.signal(signal) else {
        return CriterionOutcome::scored(0.0, format!("{signal} was not assessed"))
            .with_flag(unverified_flag(signal));
    };

    let mut score: f64 = 1.0;
    let mut notes = Vec::new();

    if let Some(min) = min {
        if value < min {
            score = if min > 0.0 { value / min } else { 0.0 };
            notes.push(format!("{signal} {value:.2} below minimum {min:.2}"));
        }
    }
    if let Some(max) = max {
        if value > max {
            score = score.min(if value > 0.0 { max / value } else { 0.0 });
            notes.push(format!("{signal} {value:.2} above maximum {max:.2}"));
        }
    }

    if notes.is_empty() {
        CriterionOutcome::pass()
    } else {
        CriterionOutcome::scored(score, notes.join(", "))
    }
}

fn keyword_ban(
    signal: &str,
    phrases: &[String],
    flag: Option<&str>,
    view: &DraftView<'_>,
) -> CriterionOutcome {
    let hits: Vec<&String> = phrases.iter().filter(|p| view.contains_phrase(p)).collect();
    if hits.is_empty() {
        return CriterionOutcome::pass();
    }

    let listed: Vec<&str> = hits.iter().map(|h| h.as_str()).collect();
    let mut outcome =
        CriterionOutcome::scored(0.0, format!("banned phrases used: {}", listed.join(", ")));
    if let Some(flag) = flag {
        outcome = outcome.with_flag(flag);
    }
    for phrase in hits {
        outcome = outcome.with_finding(Finding {
            pattern_id: format!("{}:{}", signal, slug(phrase)),
            description: format!("Banned phrase \"{}\"", phrase),
            severity: Severity::BestPractice,
            example: phrase.clone(),
        });
    }
    outcome
}

fn flag_presence(
    signal: &str,
    marker: &str,
    required: bool,
    flag: &str,
    view: &DraftView<'_>,
) -> CriterionOutcome {
    let present = view.contains(marker) || view.signal(marker).is_some_and(|v| v > 0.0);
    if present == required {
        return CriterionOutcome::pass();
    }

    let (note, severity) = if required {
        (format!("required marker '{marker}' missing"), Severity::Architectural)
    } else {
        (format!("forbidden marker '{marker}' present"), Severity::Medium)
    };

    CriterionOutcome::scored(0.0, note.clone())
        .with_flag(flag)
        .with_finding(Finding {
            pattern_id: format!("{}:{}", signal, slug(flag)),
            description: note,
            severity,
            example: if required { String::new() } else { marker.to_string() },
        })
}

/// Apply a learned pattern as an extra criterion: any recorded example showing
/// up again in the draft fails it.
pub fn evaluate_learned(pattern: &SkillPattern, view: &DraftView<'_>) -> CriterionOutcome {
    let recurring: Vec<&String> = pattern
        .examples
        .iter()
        .filter(|e| view.contains(e))
        .collect();

    match recurring.first() {
        None => CriterionOutcome::pass(),
        Some(example) => CriterionOutcome::scored(
            0.0,
            format!("recurring issue {}: {}", pattern.pattern_id, pattern.description),
        )
        .with_finding(Finding {
            pattern_id: pattern.pattern_id.clone(),
            description: pattern.description.clone(),
            severity: pattern.severity,
            example: (*example).clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn draft(body: &str) -> DraftArtifact {
        DraftArtifact {
            title: "Edge caching".into(),
            summary: "Why caches move closer to readers".into(),
            body: body.into(),
            sources: vec!["https://example.com/cdn".into()],
            ai_disclosure: None,
        }
    }

    fn disclosure_criterion() -> Criterion {
        Criterion::flag_presence("disclosure", "has_ai_disclosure", true, UNDISCLOSED_AI_CONTENT)
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("In today's fast-paced world"), "in_today_s_fast_paced_world");
        assert_eq!(slug("  [UNVERIFIED] claims  "), "unverified_claims");
    }

    #[test]
    fn test_computed_signals() {
        let d = draft("one two three [UNVERIFIED] four");
        let view = DraftView::new(&d, None);
        assert_eq!(view.signal("word_count"), Some(5.0));
        assert_eq!(view.signal("source_count"), Some(1.0));
        assert_eq!(view.signal("unverified_markers"), Some(1.0));
        assert_eq!(view.signal("has_ai_disclosure"), Some(0.0));
        assert_eq!(view.signal("clarity"), None);
    }

    #[test]
    fn test_numeric_partial_credit() {
        let d = draft("a b c d e");
        let view = DraftView::new(&d, None);

        let below = Criterion::numeric("word_count", Some(10.0), None).evaluate(&view);
        assert!((below.score - 0.5).abs() < 1e-9);

        let above = Criterion::numeric("word_count", None, Some(4.0)).evaluate(&view);
        assert!((above.score - 0.8).abs() < 1e-9);

        let inside = Criterion::numeric("word_count", Some(1.0), Some(10.0)).evaluate(&view);
        assert!(inside.passed());
    }

    #[test]
    fn test_missing_signal_is_unverified() {
        let d = draft("text");
        let view = DraftView::new(&d, None);
        let outcome = Criterion::numeric("clarity", Some(0.7), None).evaluate(&view);
        assert_eq!(outcome.score, 0.0);
        assert_eq!(outcome.flags, vec!["[UNVERIFIED] clarity".to_string()]);
    }

    #[test]
    fn test_keyword_ban_whole_phrase() {
        let d = draft("Let us Delve into caching. Delivery matters.");
        let view = DraftView::new(&d, None);

        let ban =
            Criterion::keyword_ban("tone", &["delve", "deliver"], Some("policy:banned_phrase"));
        let outcome = ban.evaluate(&view);
        assert_eq!(outcome.score, 0.0);
        assert_eq!(outcome.flags, vec!["policy:banned_phrase".to_string()]);
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].pattern_id, "tone:delve");
    }

    #[test]
    fn test_flag_presence_required_and_forbidden() {
        let d = draft("A claim [UNVERIFIED] stands here.");
        let view = DraftView::new(&d, None);

        let disclosure = disclosure_criterion().evaluate(&view);
        assert_eq!(disclosure.flags, vec![UNDISCLOSED_AI_CONTENT.to_string()]);
        assert_eq!(disclosure.findings[0].severity, Severity::Architectural);

        let unverified = Criterion::flag_presence(
            "verification",
            UNVERIFIED_PREFIX,
            false,
            "[UNVERIFIED] claims in draft",
        )
        .evaluate(&view);
        assert_eq!(unverified.score, 0.0);
        assert_eq!(unverified.findings[0].pattern_id, "verification:unverified_claims_in_draft");

        let mut disclosed = draft("Clean text.");
        disclosed.ai_disclosure = Some("Drafted with AI assistance.".into());
        let view = DraftView::new(&disclosed, None);
        assert!(disclosure_criterion().evaluate(&view).passed());
    }

    #[test]
    fn test_learned_pattern_recurrence() {
        let pattern = SkillPattern {
            pattern_id: "clarity:synergy".into(),
            description: "Corporate jargon".into(),
            severity: Severity::Medium,
            occurrences: vec![crate::state::skills_ledger::Occurrence {
                run_id: "old".into(),
                timestamp: Utc::now(),
            }],
            examples: vec!["synergy".into()],
        };

        let hit = draft("We unlock SYNERGY at the edge.");
        let outcome = evaluate_learned(&pattern, &DraftView::new(&hit, None));
        assert_eq!(outcome.score, 0.0);
        assert_eq!(outcome.findings[0].pattern_id, "clarity:synergy");

        let clean = draft("Caches reduce latency.");
        assert!(evaluate_learned(&pattern, &DraftView::new(&clean, None)).passed());
    }

    #[derive(Debug)]
    struct LengthRatio;

    impl CriterionEvaluator for LengthRatio {
        fn evaluate(&self, _signal: &str, view: &DraftView<'_>) -> CriterionOutcome {
            CriterionOutcome::scored(view.draft().word_count() as f64 / 2.0, "ratio")
        }
    }

    #[test]
    fn test_custom_evaluator_is_clamped() {
        let d = draft("one two three four");
        let view = DraftView::new(&d, None);
        let outcome = Criterion::custom("length", Arc::new(LengthRatio)).evaluate(&view);
        assert_eq!(outcome.score, 1.0);
    }

    #[test]
    fn test_judgment_config_shape() {
        let criterion: Criterion = serde_json::from_value(serde_json::json!({
            "signal": "tone",
            "judgment": { "kind": "keyword_ban", "phrases": ["delve"] }
        }))
        .unwrap();
        assert!(matches!(
            criterion.judgment,
            Judgment::KeywordBan { ref flag, .. } if flag.is_none()
        ));
        assert!(!criterion.needs_assessment());
        assert!(Criterion::numeric("clarity", Some(0.7), None).needs_assessment());
        assert!(!Criterion::numeric("word_count", Some(300.0), None).needs_assessment());
    }
}
