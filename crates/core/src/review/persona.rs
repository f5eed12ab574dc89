//! # Persona Reviewer
//!
//! One weighted reviewer per simulated stakeholder. Each persona scores a draft
//! against its own ordered criteria, extended by learned patterns from the
//! skills ledger, and returns a [`ReviewVote`]. Scoring is local to the
//! persona; weights only matter once the consensus engine aggregates votes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::criteria::{
    evaluate_learned, slug, Criterion, CriterionOutcome, DraftView, Finding,
    UNDISCLOSED_AI_CONTENT, UNVERIFIED_PREFIX,
};
use crate::error::StageError;
use crate::skills::artifact_registry::{DraftArtifact, PersonaAssessment};
use crate::state::artifact_store::Artifact;
use crate::state::skills_ledger::{Severity, SkillPattern};

/// Flag prefix marking a persona whose assessment could not be obtained
pub const NO_VOTE_PREFIX: &str = "[NO_VOTE]";

/// Score at or above which a persona approves
pub const APPROVE_BAND: f64 = 0.8;
/// Score at or above which a persona asks for revision instead of rejecting
pub const REVISE_BAND: f64 = 0.4;

/// A reviewer's (or the consensus engine's) verdict.
///
/// Ordered from most to least conservative, so `min` picks the safer one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Reject,
    Revise,
    Approve,
}

impl Verdict {
    /// Fixed score bands
    pub fn from_score(score: f64) -> Self {
        if score >= APPROVE_BAND {
            Self::Approve
        } else if score >= REVISE_BAND {
            Self::Revise
        } else {
            Self::Reject
        }
    }

    /// The more conservative of two verdicts
    pub fn most_conservative(self, other: Self) -> Self {
        self.min(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Revise => "revise",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A simulated stakeholder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub id: String,
    /// In `(0, 1]`; normalized by the consensus engine
    pub weight: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

impl PersonaProfile {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
            description: String::new(),
            criteria: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Check configuration-time invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("persona id must not be empty".into());
        }
        if !(self.weight > 0.0 && self.weight <= 1.0) {
            return Err(format!(
                "persona '{}' weight {} must be in (0, 1]",
                self.id, self.weight
            ));
        }
        Ok(())
    }

    /// Signals this persona needs a model assessment for, in criteria order
    pub fn assessed_signals(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.criteria
            .iter()
            .filter(|c| c.needs_assessment())
            .map(|c| c.signal.as_str())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    /// Learned patterns that extend this persona's criteria
    pub fn relevant_patterns<'a>(&self, learned: &'a [SkillPattern]) -> Vec<&'a SkillPattern> {
        learned
            .iter()
            .filter(|p| self.criteria.iter().any(|c| c.signal == p.signal()))
            .collect()
    }
}

/// One persona's opinion of one draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewVote {
    pub persona_id: String,
    /// In `[0, 1]`
    pub score: f64,
    pub verdict: Verdict,
    pub rationale: String,
    #[serde(default)]
    pub flags: BTreeSet<String>,
    /// Failed criteria, as candidate skill patterns
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// The persona never assessed the draft; the vote carries no weight
    #[serde(default)]
    pub abstained: bool,
}

/// Applies persona criteria to drafts
#[derive(Debug, Clone)]
pub struct PersonaReviewer {
    blocking_flags: BTreeSet<String>,
}

impl Default for PersonaReviewer {
    fn default() -> Self {
        Self::new([UNDISCLOSED_AI_CONTENT.to_string()])
    }
}

impl PersonaReviewer {
    pub fn new(blocking_flags: impl IntoIterator<Item = String>) -> Self {
        Self {
            blocking_flags: blocking_flags.into_iter().collect(),
        }
    }

    pub fn review(
        &self,
        persona: &PersonaProfile,
        draft: &Artifact,
        learned: &[SkillPattern],
    ) -> ReviewVote {
        self.review_with_assessment(persona, draft, learned, None)
    }

    /// Placeholder vote for a persona whose assessment failed
    pub fn missing_vote(&self, persona: &PersonaProfile, err: &StageError) -> ReviewVote {
        ReviewVote {
            persona_id: persona.id.clone(),
            score: 0.0,
            verdict: Verdict::Revise,
            rationale: format!(
                "no assessment after {} attempt(s): {}",
                err.attempts,
                err.cause.excerpt()
            ),
            flags: BTreeSet::from([format!("{NO_VOTE_PREFIX} {}", persona.id)]),
            findings: Vec::new(),
            abstained: true,
        }
    }

    /// Review a draft artifact, merging the persona's assessed signals
    pub fn review_with_assessment(
        &self,
        persona: &PersonaProfile,
        draft: &Artifact,
        learned: &[SkillPattern],
        assessment: Option<&PersonaAssessment>,
    ) -> ReviewVote {
        match draft.decode_payload::<DraftArtifact>() {
            Ok(payload) => self.review_draft(persona, &payload, learned, assessment),
            Err(err) => {
                tracing::warn!(persona = %persona.id, error = %err, "draft artifact unreadable");
                ReviewVote {
                    persona_id: persona.id.clone(),
                    score: 0.0,
                    verdict: Verdict::Reject,
                    rationale: format!("draft could not be read: {err}"),
                    flags: BTreeSet::from([format!("{UNVERIFIED_PREFIX} draft")]),
                    findings: Vec::new(),
                    abstained: false,
                }
            }
        }
    }

    /// Review a typed draft
    pub fn review_draft(
        &self,
        persona: &PersonaProfile,
        draft: &DraftArtifact,
        learned: &[SkillPattern],
        assessment: Option<&PersonaAssessment>,
    ) -> ReviewVote {
        let view = DraftView::new(draft, assessment);

        let mut outcomes: Vec<CriterionOutcome> =
            persona.criteria.iter().map(|c| c.evaluate(&view)).collect();
        outcomes.extend(
            persona
                .relevant_patterns(learned)
                .into_iter()
                .map(|p| evaluate_learned(p, &view)),
        );

        let total = outcomes.len();
        let passed = outcomes.iter().filter(|o| o.passed()).count();
        let score = if total == 0 {
            1.0
        } else {
            (outcomes.iter().map(|o| o.score).sum::<f64>() / total as f64).clamp(0.0, 1.0)
        };

        let mut flags = BTreeSet::new();
        let mut findings: Vec<Finding> = Vec::new();
        let mut notes = Vec::new();
        for outcome in outcomes {
            flags.extend(outcome.flags);
            notes.extend(outcome.note);
            for finding in outcome.findings {
                push_unique(&mut findings, finding);
            }
        }

        if let Some(assessment) = assessment {
            flags.extend(
                assessment
                    .flags
                    .iter()
                    .map(|f| f.trim())
                    .filter(|f| !f.is_empty())
                    .map(str::to_string),
            );
            for issue in &assessment.issues {
                let detail = if issue.excerpt.trim().is_empty() {
                    &issue.description
                } else {
                    &issue.excerpt
                };
                let detail = slug(detail);
                if detail.is_empty() {
                    continue;
                }
                push_unique(
                    &mut findings,
                    Finding {
                        pattern_id: format!("{}:{}", issue.signal.trim(), detail),
                        description: issue.description.clone(),
                        severity: issue.severity.unwrap_or(Severity::Medium),
                        example: issue.excerpt.trim().to_string(),
                    },
                );
            }
        }

        let mut verdict = Verdict::from_score(score);
        if flags.iter().any(|f| self.blocking_flags.contains(f)) {
            verdict = Verdict::Reject;
        } else if !flags.is_empty() {
            verdict = verdict.most_conservative(Verdict::Revise);
        }

        let mut rationale = format!("{passed}/{total} criteria met");
        if let Some(text) = assessment.map(|a| a.rationale.trim()).filter(|r| !r.is_empty()) {
            rationale = format!("{text} ({rationale})");
        }
        if !notes.is_empty() {
            rationale.push_str("; ");
            rationale.push_str(&notes.join("; "));
        }

        tracing::debug!(
            persona = %persona.id,
            score,
            verdict = %verdict,
            flags = flags.len(),
            "persona review complete"
        );

        ReviewVote {
            persona_id: persona.id.clone(),
            score,
            verdict,
            rationale,
            flags,
            findings,
            abstained: false,
        }
    }
}

fn push_unique(findings: &mut Vec<Finding>, finding: Finding) {
    if !findings.iter().any(|f| f.pattern_id == finding.pattern_id) {
        findings.push(finding);
    }
}

/// Review with the default blocking flags
pub fn review(persona: &PersonaProfile, draft: &Artifact, learned: &[SkillPattern]) -> ReviewVote {
    PersonaReviewer::default().review(persona, draft, learned)
}

/// Phrases the brand guardian never wants to see
pub const BANNED_PHRASES: [&str; 5] = [
    "delve",
    "game-changer",
    "in today's fast-paced world",
    "unlock the power",
    "revolutionize",
];

/// The stock editorial board
pub fn default_personas() -> Vec<PersonaProfile> {
    vec![
        PersonaProfile::new("editor", 0.35)
            .with_description("Managing editor: clarity, structure and length")
            .with_criterion(Criterion::numeric("clarity", Some(0.7), None))
            .with_criterion(Criterion::numeric("structure", Some(0.6), None))
            .with_criterion(Criterion::numeric("word_count", Some(300.0), Some(2500.0))),
        PersonaProfile::new("fact_checker", 0.30)
            .with_description("Fact checker: every claim sourced and verified")
            .with_criterion(Criterion::numeric("accuracy", Some(0.8), None))
            .with_criterion(Criterion::numeric("source_count", Some(2.0), None))
            .with_criterion(Criterion::flag_presence(
                "verification",
                UNVERIFIED_PREFIX,
                false,
                "[UNVERIFIED] unverified_claims",
            )),
        PersonaProfile::new("brand_guardian", 0.20)
            .with_description("Brand guardian: voice, banned phrasing and AI disclosure")
            .with_criterion(Criterion::numeric("tone", Some(0.6), None))
            .with_criterion(Criterion::keyword_ban(
                "tone",
                &BANNED_PHRASES,
                Some("policy:banned_phrase"),
            ))
            .with_criterion(Criterion::flag_presence(
                "disclosure",
                "has_ai_disclosure",
                true,
                UNDISCLOSED_AI_CONTENT,
            )),
        PersonaProfile::new("audience_advocate", 0.15)
            .with_description("Audience advocate: is it worth a reader's time")
            .with_criterion(Criterion::numeric("engagement", Some(0.6), None))
            .with_criterion(Criterion::numeric("readability", Some(0.6), None)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::skills::artifact_registry::AssessedIssue;
    use crate::state::artifact_store::StageId;
    use crate::state::skills_ledger::Occurrence;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn words(n: usize) -> String {
        vec!["latency"; n].join(" ")
    }

    fn draft_artifact(body: String, disclosed: bool) -> Artifact {
        let draft = DraftArtifact {
            title: "Edge caching".into(),
            summary: "How caches cut latency".into(),
            body,
            sources: vec!["https://a.example".into(), "https://b.example".into()],
            ai_disclosure: disclosed.then(|| "Drafted with AI assistance.".to_string()),
        };
        Artifact::from_payload(StageId::Draft, 0, &draft).unwrap()
    }

    fn assessment(pairs: &[(&str, f64)]) -> PersonaAssessment {
        PersonaAssessment {
            signals: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect::<BTreeMap<_, _>>(),
            flags: Vec::new(),
            rationale: String::new(),
            issues: Vec::new(),
        }
    }

    #[test]
    fn test_verdict_bands() {
        assert_eq!(Verdict::from_score(0.8), Verdict::Approve);
        assert_eq!(Verdict::from_score(0.79), Verdict::Revise);
        assert_eq!(Verdict::from_score(0.4), Verdict::Revise);
        assert_eq!(Verdict::from_score(0.39), Verdict::Reject);
        assert_eq!(
            Verdict::Approve.most_conservative(Verdict::Reject),
            Verdict::Reject
        );
    }

    #[test]
    fn test_editor_approves_clean_draft() {
        let editor = &default_personas()[0];
        let artifact = draft_artifact(words(400), true);
        let vote = PersonaReviewer::default().review_with_assessment(
            editor,
            &artifact,
            &[],
            Some(&assessment(&[("clarity", 0.9), ("structure", 0.8)])),
        );
        assert_eq!(vote.score, 1.0);
        assert_eq!(vote.verdict, Verdict::Approve);
        assert!(vote.flags.is_empty());
        assert!(vote.rationale.starts_with("3/3"));
    }

    #[test]
    fn test_missing_assessment_is_unverified() {
        let editor = &default_personas()[0];
        let artifact = draft_artifact(words(400), true);
        let vote = review(editor, &artifact, &[]);

        assert!(vote.flags.contains("[UNVERIFIED] clarity"));
        assert!(vote.flags.contains("[UNVERIFIED] structure"));
        assert_eq!(vote.verdict, Verdict::Reject);
    }

    #[test]
    fn test_blocking_flag_forces_reject_despite_high_score() {
        let brand = &default_personas()[2];
        let artifact = draft_artifact(words(400), false);
        let vote = PersonaReviewer::default().review_with_assessment(
            brand,
            &artifact,
            &[],
            Some(&assessment(&[("tone", 1.0)])),
        );
        assert!(vote.score > 0.6);
        assert!(vote.flags.contains(UNDISCLOSED_AI_CONTENT));
        assert_eq!(vote.verdict, Verdict::Reject);
    }

    #[test]
    fn test_non_blocking_flag_caps_at_revise() {
        let persona = PersonaProfile::new("copy_desk", 0.5)
            .with_criterion(Criterion::numeric("clarity", Some(0.5), None))
            .with_criterion(Criterion::numeric("structure", Some(0.5), None))
            .with_criterion(Criterion::numeric("flow", Some(0.5), None))
            .with_criterion(Criterion::numeric("voice", Some(0.5), None))
            .with_criterion(Criterion::keyword_ban(
                "tone",
                &["delve"],
                Some("policy:banned_phrase"),
            ));
        let artifact = draft_artifact(format!("{} delve", words(50)), true);
        let vote = PersonaReviewer::default().review_with_assessment(
            &persona,
            &artifact,
            &[],
            Some(&assessment(&[
                ("clarity", 1.0),
                ("structure", 1.0),
                ("flow", 1.0),
                ("voice", 1.0),
            ])),
        );
        assert!((vote.score - 0.8).abs() < 1e-9);
        assert_eq!(vote.verdict, Verdict::Revise);
        assert_eq!(vote.findings[0].pattern_id, "tone:delve");
    }

    #[test]
    fn test_learned_pattern_extends_matching_persona_only() {
        let pattern = SkillPattern {
            pattern_id: "clarity:passive_voice".into(),
            description: "Passive voice hides the actor".into(),
            severity: Severity::Medium,
            occurrences: vec![Occurrence {
                run_id: "earlier".into(),
                timestamp: Utc::now(),
            }],
            examples: vec!["mistakes were made".into()],
        };
        let personas = default_personas();
        let artifact = draft_artifact(format!("{} mistakes were made", words(400)), true);
        let signals = assessment(&[
            ("clarity", 1.0),
            ("structure", 1.0),
            ("engagement", 1.0),
            ("readability", 1.0),
        ]);

        let editor = PersonaReviewer::default().review_with_assessment(
            &personas[0],
            &artifact,
            std::slice::from_ref(&pattern),
            Some(&signals),
        );
        assert!(editor.rationale.starts_with("3/4"));
        assert!(editor.findings.iter().any(|f| f.pattern_id == "clarity:passive_voice"));

        let advocate = PersonaReviewer::default().review_with_assessment(
            &personas[3],
            &artifact,
            std::slice::from_ref(&pattern),
            Some(&signals),
        );
        assert_eq!(advocate.score, 1.0);
    }

    #[test]
    fn test_assessed_issues_become_findings() {
        let editor = &default_personas()[0];
        let artifact = draft_artifact(words(400), true);
        let mut signals = assessment(&[("clarity", 0.5), ("structure", 0.9)]);
        signals.rationale = "Intro buries the lede".into();
        signals.issues.push(AssessedIssue {
            signal: "clarity".into(),
            excerpt: "It is important to note".into(),
            description: "Throat-clearing opener".into(),
            severity: Some(Severity::BestPractice),
        });

        let vote = PersonaReviewer::default().review_with_assessment(
            editor,
            &artifact,
            &[],
            Some(&signals),
        );
        assert!(vote.rationale.starts_with("Intro buries the lede"));
        let finding = vote
            .findings
            .iter()
            .find(|f| f.pattern_id == "clarity:it_is_important_to_note")
            .unwrap();
        assert_eq!(finding.severity, Severity::BestPractice);
    }

    #[test]
    fn test_unreadable_draft_is_rejected() {
        let artifact = Artifact::new(StageId::Draft, 0, serde_json::Map::new());
        let vote = review(&default_personas()[1], &artifact, &[]);
        assert_eq!(vote.verdict, Verdict::Reject);
        assert_eq!(vote.score, 0.0);
    }

    #[test]
    fn test_missing_vote_abstains() {
        let persona = &default_personas()[3];
        let err = StageError::new(StageId::Review, 3, TransportError::RateLimited);
        let vote = PersonaReviewer::default().missing_vote(persona, &err);
        assert!(vote.abstained);
        assert_eq!(vote.score, 0.0);
        assert_eq!(vote.verdict, Verdict::Revise);
        assert!(vote.flags.contains("[NO_VOTE] audience_advocate"));
        assert!(vote.rationale.contains("3 attempt(s)"));
    }

    #[test]
    fn test_persona_validation() {
        assert!(PersonaProfile::new("editor", 0.35).validate().is_ok());
        assert!(PersonaProfile::new("editor", 0.0).validate().is_err());
        assert!(PersonaProfile::new("", 0.5).validate().is_err());
        assert_eq!(default_personas()[2].assessed_signals(), vec!["tone"]);
    }
}
