//! # Artifact Registry
//!
//! Typed payloads handed between pipeline stages. Every payload derives
//! `JsonSchema`: the schema is sent to the model as the answer format and is
//! also what the decoder checks raw output against.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pressroom_core::skills::artifact_registry::{DraftArtifact, StagePayload, ValidationRules};
//!
//! let violations = draft.validate(&ValidationRules::default());
//! let artifact = Artifact::from_payload(DraftArtifact::STAGE, revision, &draft)?;
//! ```

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::review::consensus::ConsensusResult;
use crate::review::persona::ReviewVote;
use crate::state::artifact_store::StageId;
use crate::state::skills_ledger::Severity;

/// Content rules beyond the JSON schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    pub min_draft_words: usize,
    pub min_sources: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            min_draft_words: 300,
            min_sources: 2,
        }
    }
}

/// A payload one stage persists for the next
pub trait StagePayload: Serialize + DeserializeOwned + JsonSchema + Send + Sync {
    const STAGE: StageId;

    /// Content-rule violations; empty when valid
    fn validate(&self, rules: &ValidationRules) -> Vec<String>;
}

fn require_text(violations: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        violations.push(format!("{} must not be empty", field));
    }
}

// ============================================================================
// Scout
// ============================================================================

/// The topic and angle the run will pursue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TopicArtifact {
    pub topic: String,
    /// What makes this piece worth writing now
    pub angle: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub rationale: String,
}

impl StagePayload for TopicArtifact {
    const STAGE: StageId = StageId::Scout;

    fn validate(&self, _rules: &ValidationRules) -> Vec<String> {
        let mut violations = Vec::new();
        require_text(&mut violations, "topic", &self.topic);
        require_text(&mut violations, "angle", &self.angle);
        violations
    }
}

// ============================================================================
// Research
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceNote {
    pub title: String,
    pub url: String,
    /// The claim this source supports
    pub claim: String,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResearchArtifact {
    pub summary: String,
    pub key_points: Vec<String>,
    pub sources: Vec<SourceNote>,
    #[serde(default)]
    pub open_questions: Vec<String>,
}

impl StagePayload for ResearchArtifact {
    const STAGE: StageId = StageId::Research;

    fn validate(&self, rules: &ValidationRules) -> Vec<String> {
        let mut violations = Vec::new();
        if self.key_points.iter().all(|p| p.trim().is_empty()) {
            violations.push("at least one key point is required".into());
        }
        if self.sources.len() < rules.min_sources {
            violations.push(format!(
                "{} sources found, at least {} required",
                self.sources.len(),
                rules.min_sources
            ));
        }
        violations
    }
}

// ============================================================================
// Draft
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DraftArtifact {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    /// Markdown body
    pub body: String,
    /// URLs cited in the body
    #[serde(default)]
    pub sources: Vec<String>,
    /// Reader-facing note that AI assisted the piece
    #[serde(default)]
    pub ai_disclosure: Option<String>,
}

impl DraftArtifact {
    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }
}

impl StagePayload for DraftArtifact {
    const STAGE: StageId = StageId::Draft;

    fn validate(&self, rules: &ValidationRules) -> Vec<String> {
        let mut violations = Vec::new();
        require_text(&mut violations, "title", &self.title);
        let words = self.word_count();
        if words < rules.min_draft_words {
            violations.push(format!(
                "body has {} words, at least {} required",
                words, rules.min_draft_words
            ));
        }
        violations
    }
}

// ============================================================================
// Review
// ============================================================================

/// A concrete problem a persona spotted in the draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssessedIssue {
    /// Criterion signal the issue relates to, e.g. `clarity`
    pub signal: String,
    /// Verbatim offending text from the draft
    #[serde(default)]
    pub excerpt: String,
    pub description: String,
    #[serde(default)]
    pub severity: Option<Severity>,
}

/// A persona's model-produced reading of the draft
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PersonaAssessment {
    /// Signal name → value in `[0, 1]`
    pub signals: BTreeMap<String, f64>,
    /// Policy or verification flags, e.g. `[UNVERIFIED] statistic in para 3`
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub issues: Vec<AssessedIssue>,
}

impl PersonaAssessment {
    /// Out-of-range signal values
    pub fn violations(&self) -> Vec<String> {
        self.signals
            .iter()
            .filter(|(_, v)| !(0.0..=1.0).contains(*v))
            .map(|(k, v)| format!("signal '{}' = {} is outside [0, 1]", k, v))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewArtifact {
    pub draft_revision: u32,
    pub votes: Vec<ReviewVote>,
}

impl StagePayload for ReviewArtifact {
    const STAGE: StageId = StageId::Review;

    fn validate(&self, _rules: &ValidationRules) -> Vec<String> {
        let mut violations = Vec::new();
        if self.votes.is_empty() {
            violations.push("review has no votes".into());
        }
        for vote in &self.votes {
            if !(0.0..=1.0).contains(&vote.score) {
                violations.push(format!(
                    "vote from '{}' has score {} outside [0, 1]",
                    vote.persona_id, vote.score
                ));
            }
        }
        violations
    }
}

// ============================================================================
// Consensus
// ============================================================================

/// Consensus result plus what the next draft must address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConsensusArtifact {
    pub result: ConsensusResult,
    pub draft_revision: u32,
    /// Dissenting personas' rationale, routed back to drafting on revise
    #[serde(default)]
    pub feedback: Vec<String>,
}

impl StagePayload for ConsensusArtifact {
    const STAGE: StageId = StageId::Consensus;

    fn validate(&self, _rules: &ValidationRules) -> Vec<String> {
        Vec::new()
    }
}

// ============================================================================
// Publish
// ============================================================================

/// Packaging the publisher model supplies. Title, body and disclosure are
/// never taken from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PublishMetadata {
    /// URL slug, lowercase with hyphens
    pub slug: String,
    /// Under 160 characters
    #[serde(default)]
    pub meta_description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl StagePayload for PublishMetadata {
    const STAGE: StageId = StageId::Publish;

    fn validate(&self, _rules: &ValidationRules) -> Vec<String> {
        let mut violations = Vec::new();
        if slugify(&self.slug).is_empty() {
            violations.push("slug must contain at least one letter or digit".into());
        }
        violations
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PublishArtifact {
    pub title: String,
    /// URL slug, lowercase with hyphens
    pub slug: String,
    /// Final markdown body
    pub body: String,
    #[serde(default)]
    pub meta_description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub ai_disclosure: Option<String>,
    /// Draft revision the body was taken from
    #[serde(default)]
    pub draft_revision: u32,
}

impl PublishArtifact {
    /// Package an approved draft. The text is the draft's, verbatim; only
    /// the slug, description and tags come from `metadata`.
    pub fn from_approved(
        draft: &DraftArtifact,
        draft_revision: u32,
        metadata: PublishMetadata,
    ) -> Self {
        let slug = if slugify(&metadata.slug).is_empty() {
            slugify(&draft.title)
        } else {
            metadata.slug
        };
        Self {
            title: draft.title.clone(),
            slug,
            body: draft.body.clone(),
            meta_description: metadata.meta_description,
            tags: metadata.tags,
            ai_disclosure: draft.ai_disclosure.clone(),
            draft_revision,
        }
    }

    /// Slug safe to use as a file name
    pub fn file_slug(&self) -> String {
        slugify(&self.slug)
    }

    /// Markdown document with a small front matter block
    pub fn to_markdown(&self) -> String {
        let mut doc = String::from("---\n");
        doc.push_str(&format!("title: {:?}\n", self.title));
        if !self.meta_description.is_empty() {
            doc.push_str(&format!("description: {:?}\n", self.meta_description));
        }
        if !self.tags.is_empty() {
            doc.push_str(&format!("tags: [{}]\n", self.tags.join(", ")));
        }
        doc.push_str("---\n\n");
        doc.push_str(&format!("# {}\n\n", self.title));
        doc.push_str(self.body.trim());
        doc.push('\n');
        if let Some(disclosure) = self.ai_disclosure.as_deref().filter(|d| !d.trim().is_empty()) {
            doc.push_str(&format!("\n---\n\n_{}_\n", disclosure.trim()));
        }
        doc
    }
}

fn slugify(raw: &str) -> String {
    let mut slug = String::new();
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

impl StagePayload for PublishArtifact {
    const STAGE: StageId = StageId::Publish;

    fn validate(&self, _rules: &ValidationRules) -> Vec<String> {
        let mut violations = Vec::new();
        if self.file_slug().is_empty() {
            violations.push("slug must contain at least one letter or digit".into());
        }
        require_text(&mut violations, "body", &self.body);
        violations
    }
}
