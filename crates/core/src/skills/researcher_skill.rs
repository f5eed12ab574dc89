//! # Researcher Skill
//!
//! Gathers the facts and sources behind the chosen topic.

use crate::skills::artifact_registry::{ResearchArtifact, TopicArtifact, ValidationRules};
use crate::skills::generator::GenerationRequest;
use crate::skills::prompts;

pub struct ResearcherSkill;

impl ResearcherSkill {
    pub const LABEL: &'static str = "research";

    pub fn request(topic: &TopicArtifact, rules: &ValidationRules) -> GenerationRequest {
        let mut prompt = format!(
            "Topic: {}\nAngle: {}\n",
            topic.topic.trim(),
            topic.angle.trim()
        );
        if !topic.audience.is_empty() {
            prompt.push_str(&format!("Audience: {}\n", topic.audience));
        }
        if !topic.keywords.is_empty() {
            prompt.push_str(&format!("Keywords: {}\n", topic.keywords.join(", ")));
        }
        prompt.push_str(&format!(
            "\nProvide at least {} independent sources.",
            rules.min_sources
        ));

        GenerationRequest::for_payload::<ResearchArtifact>(Self::LABEL, prompts::RESEARCHER, prompt)
    }
}
