//! # Publisher Skill
//!
//! Asks for packaging only. The published text is the approved draft itself.

use crate::skills::artifact_registry::{DraftArtifact, PublishMetadata};
use crate::skills::generator::GenerationRequest;
use crate::skills::prompts;

pub struct PublisherSkill;

impl PublisherSkill {
    pub const LABEL: &'static str = "publish";

    pub fn request(draft: &DraftArtifact, approval_note: Option<&str>) -> GenerationRequest {
        let mut prompt = format!(
            "## Approved draft\n# {}\n\n{}\n\n{}\n",
            draft.title, draft.summary, draft.body
        );
        if let Some(disclosure) = &draft.ai_disclosure {
            prompt.push_str(&format!("\nAI disclosure: {}\n", disclosure));
        }
        if let Some(note) = approval_note.filter(|n| !n.trim().is_empty()) {
            prompt.push_str(&format!("\nNote from the approving editor: {}\n", note.trim()));
        }
        GenerationRequest::for_payload::<PublishMetadata>(Self::LABEL, prompts::PUBLISHER, prompt)
    }
}
