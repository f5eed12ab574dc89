//! # Pressroom Skills
//!
//! The generation side of the pipeline: one skill per stage that builds the
//! prompt, the transport that sends it, and the decoder that reads the answer.
//!
//! ## Architecture
//!
//! ```text
//! Skill::request(..)  ──► GenerationRequest { system, prompt, schema }
//!                              │
//!                     Generator::generate (HttpGenerator | ScriptedGenerator)
//!                              │
//!                     decoder::decode_as::<Payload>
//! ```

pub mod decoder;
pub mod generator;
pub mod llm_helpers;
pub mod prompts;

// Stage payloads
pub mod artifact_registry;

// Stage skills
pub mod drafting_skill;
pub mod publisher_skill;
pub mod researcher_skill;
pub mod reviewer_skill;
pub mod scout_skill;

pub use decoder::{decode, decode_as, ExpectedShape};
pub use drafting_skill::{DraftingSkill, RevisionNotes};
pub use generator::{GenerationRequest, Generator, ScriptedGenerator};
pub use llm_helpers::HttpGenerator;
pub use publisher_skill::PublisherSkill;
pub use researcher_skill::ResearcherSkill;
pub use reviewer_skill::ReviewerSkill;
pub use scout_skill::ScoutSkill;
