//! # Drafting Skill
//!
//! Writes the article from the brief and research notes. On revision cycles
//! the request also carries the previous draft and the board's feedback.

use serde::{Deserialize, Serialize};

use crate::review::consensus::ConsensusResult;
use crate::skills::artifact_registry::{
    ConsensusArtifact, DraftArtifact, ResearchArtifact, TopicArtifact, ValidationRules,
};
use crate::skills::generator::GenerationRequest;
use crate::skills::prompts;

/// What the editorial board asked to change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionNotes {
    /// Revision being written
    pub revision: u32,
    pub previous: DraftArtifact,
    pub result: ConsensusResult,
    pub feedback: Vec<String>,
}

impl RevisionNotes {
    pub fn new(revision: u32, previous: DraftArtifact, consensus: &ConsensusArtifact) -> Self {
        Self {
            revision,
            previous,
            result: consensus.result.clone(),
            feedback: consensus.feedback.clone(),
        }
    }

    fn render(&self) -> String {
        let mut out = format!(
            "## Revision {} requested\nThe board scored the previous draft {:.2} and decided to {}.\n",
            self.revision, self.result.weighted_score, self.result.decision
        );
        if !self.result.unresolved_flags.is_empty() {
            out.push_str("\nUnresolved flags:\n");
            for flag in &self.result.unresolved_flags {
                out.push_str(&format!("- {}\n", flag));
            }
        }
        if !self.feedback.is_empty() {
            out.push_str("\nFeedback:\n");
            for line in &self.feedback {
                out.push_str(&format!("- {}\n", line));
            }
        }
        out.push_str(&format!(
            "\n## Previous draft\n# {}\n\n{}\n",
            self.previous.title, self.previous.body
        ));
        out
    }
}

pub struct DraftingSkill;

impl DraftingSkill {
    pub const LABEL: &'static str = "draft";

    pub fn request(
        topic: &TopicArtifact,
        research: &ResearchArtifact,
        notes: Option<&RevisionNotes>,
        rules: &ValidationRules,
    ) -> GenerationRequest {
        let mut prompt = format!(
            "## Brief\nTopic: {}\nAngle: {}\nAudience: {}\n\n## Research\n{}\n",
            topic.topic, topic.angle, topic.audience, research.summary
        );
        for point in &research.key_points {
            prompt.push_str(&format!("- {}\n", point));
        }
        prompt.push_str("\nSources:\n");
        for source in &research.sources {
            let marker = if source.verified { "" } else { " (unverified)" };
            prompt.push_str(&format!(
                "- {} <{}>: {}{}\n",
                source.title, source.url, source.claim, marker
            ));
        }
        prompt.push_str(&format!(
            "\nWrite at least {} words.\n",
            rules.min_draft_words
        ));
        if let Some(notes) = notes {
            prompt.push('\n');
            prompt.push_str(&notes.render());
        }

        GenerationRequest::for_payload::<DraftArtifact>(Self::LABEL, prompts::DRAFTER, prompt)
    }
}
