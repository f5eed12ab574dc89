//! Persona review and consensus.

pub mod consensus;
pub mod criteria;
pub mod persona;

pub use consensus::{
    decide, ConsensusEngine, ConsensusPolicy, ConsensusResult, Decision, DecisionRule,
};
pub use criteria::{
    Criterion, CriterionEvaluator, CriterionOutcome, DraftView, Finding, Judgment,
    UNDISCLOSED_AI_CONTENT, UNVERIFIED_PREFIX,
};
pub use persona::{default_personas, review, PersonaProfile, PersonaReviewer, ReviewVote, Verdict};
