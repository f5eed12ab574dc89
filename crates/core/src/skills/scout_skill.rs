//! # Scout Skill
//!
//! Turns a loose topic hint into a concrete [`TopicArtifact`].

use crate::skills::artifact_registry::TopicArtifact;
use crate::skills::generator::GenerationRequest;
use crate::skills::prompts;

pub struct ScoutSkill;

impl ScoutSkill {
    pub const LABEL: &'static str = "scout";

    pub fn request(topic_hint: &str) -> GenerationRequest {
        let prompt = format!(
            "Topic hint: {}\n\nPick one specific story and its angle.",
            topic_hint.trim()
        );
        GenerationRequest::for_payload::<TopicArtifact>(Self::LABEL, prompts::SCOUT, prompt)
    }
}
