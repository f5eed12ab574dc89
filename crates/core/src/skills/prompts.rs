//! Default prompt templates bundled at compile time.

/// Scout - picks the topic and angle
pub const SCOUT: &str = include_str!("defaults/scout.md");

/// Researcher - gathers key points and sources
pub const RESEARCHER: &str = include_str!("defaults/researcher.md");

/// Drafter - writes and revises the article
pub const DRAFTER: &str = include_str!("defaults/drafter.md");

/// Reviewer - scores the draft as one persona
pub const REVIEWER: &str = include_str!("defaults/reviewer.md");

/// Publisher - packages the approved draft
pub const PUBLISHER: &str = include_str!("defaults/publisher.md");

/// All default prompts with their slugs
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("scout", SCOUT),
        ("researcher", RESEARCHER),
        ("drafter", DRAFTER),
        ("reviewer", REVIEWER),
        ("publisher", PUBLISHER),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_prompts_non_empty() {
        for (slug, content) in all_defaults() {
            assert!(content.len() > 50, "Prompt '{}' seems too short", slug);
            assert!(
                content.contains("exactly one JSON object"),
                "Prompt '{}' must ask for JSON",
                slug
            );
        }
    }

    #[test]
    fn test_prompt_count() {
        assert_eq!(all_defaults().len(), 5);
    }
}
