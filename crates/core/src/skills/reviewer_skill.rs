//! # Reviewer Skill
//!
//! Asks the model to read a draft as one persona and score the signals that
//! persona's criteria need. The scoring itself stays deterministic in
//! [`crate::review::persona`]; the model only supplies the signals.

use crate::review::persona::PersonaProfile;
use crate::skills::artifact_registry::{DraftArtifact, PersonaAssessment};
use crate::skills::generator::GenerationRequest;
use crate::skills::prompts;
use crate::state::skills_ledger::SkillPattern;

pub struct ReviewerSkill;

impl ReviewerSkill {
    pub const LABEL_PREFIX: &'static str = "assess";

    pub fn label(persona: &PersonaProfile) -> String {
        format!("{}:{}", Self::LABEL_PREFIX, persona.id)
    }

    pub fn request(
        persona: &PersonaProfile,
        draft: &DraftArtifact,
        learned: &[SkillPattern],
    ) -> GenerationRequest {
        let signals = persona.assessed_signals();
        let mut prompt = format!("## Persona: {}\n", persona.id);
        if !persona.description.is_empty() {
            prompt.push_str(&format!("{}\n", persona.description));
        }
        prompt.push_str(&format!(
            "\nScore these signals in `signals`: {}\n",
            if signals.is_empty() {
                "(none, only flags and issues)".to_string()
            } else {
                signals.join(", ")
            }
        ));

        let relevant = persona.relevant_patterns(learned);
        if !relevant.is_empty() {
            prompt.push_str("\nRecurring problems from earlier pieces. Check for them:\n");
            for pattern in relevant {
                prompt.push_str(&format!(
                    "- {} [{}]: {}\n",
                    pattern.pattern_id,
                    pattern.severity.as_str(),
                    pattern.description
                ));
            }
        }

        prompt.push_str(&format!(
            "\n## Draft\n# {}\n\n{}\n",
            draft.title, draft.body
        ));
        if let Some(disclosure) = &draft.ai_disclosure {
            prompt.push_str(&format!("\nDisclosure: {}\n", disclosure));
        }

        GenerationRequest::for_payload::<PersonaAssessment>(
            Self::label(persona),
            prompts::REVIEWER,
            prompt,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::persona::default_personas;
    use crate::state::skills_ledger::{Occurrence, Severity};
    use chrono::Utc;

    #[test]
    fn test_request_lists_signals_and_patterns() {
        let editor = &default_personas()[0];
        let draft = DraftArtifact {
            title: "Edge caching".into(),
            summary: String::new(),
            body: "Body".into(),
            sources: Vec::new(),
            ai_disclosure: None,
        };
        let learned = vec![
            SkillPattern {
                pattern_id: "clarity:jargon".into(),
                description: "Unexplained jargon".into(),
                severity: Severity::Medium,
                occurrences: vec![Occurrence {
                    run_id: "r".into(),
                    timestamp: Utc::now(),
                }],
                examples: vec!["TTFB".into()],
            },
            SkillPattern {
                pattern_id: "tone:delve".into(),
                description: "Banned phrase".into(),
                severity: Severity::BestPractice,
                occurrences: Vec::new(),
                examples: Vec::new(),
            },
        ];

        let request = ReviewerSkill::request(editor, &draft, &learned);
        assert_eq!(request.label, "assess:editor");
        assert!(request.prompt.contains("clarity, structure"));
        assert!(request.prompt.contains("clarity:jargon [medium]"));
        assert!(!request.prompt.contains("tone:delve"));
    }
}
