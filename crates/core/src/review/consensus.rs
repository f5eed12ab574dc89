//! # Consensus Engine
//!
//! Turns independent persona votes into one decision. Rules are evaluated in a
//! fixed order and the first match wins, which makes the more conservative
//! outcome win every tie:
//!
//! 1. any blocking flag among unresolved flags → `reject`
//! 2. weighted score below threshold → `reject`
//! 3. `reject` vote from a persona heavier than `veto_weight` → `revise`
//! 4. no unresolved flags → `approve`
//! 5. otherwise → `revise`
//!
//! An abstained vote carries no weight and always counts as dissent; its
//! `[NO_VOTE]` flag keeps the run from approving until a human resolves it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::criteria::UNDISCLOSED_AI_CONTENT;
use super::persona::{PersonaProfile, ReviewVote, Verdict};

/// Scores within this distance of the threshold count as meeting it
pub const THRESHOLD_EPSILON: f64 = 1e-9;

/// The consensus decision shares the verdict vocabulary
pub type Decision = Verdict;

/// Tunables of the decision table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusPolicy {
    pub threshold: f64,
    pub veto_weight: f64,
    pub blocking_flags: BTreeSet<String>,
    /// Flags a human has explicitly resolved for this run
    pub resolved_flags: BTreeSet<String>,
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            veto_weight: 0.3,
            blocking_flags: BTreeSet::from([UNDISCLOSED_AI_CONTENT.to_string()]),
            resolved_flags: BTreeSet::new(),
        }
    }
}

impl ConsensusPolicy {
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    pub fn with_resolved_flags(mut self, resolved: impl IntoIterator<Item = String>) -> Self {
        self.resolved_flags.extend(resolved);
        self
    }
}

/// Which rule produced the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    BlockingFlag,
    BelowThreshold,
    SeniorVeto,
    Approved,
    UnresolvedFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConsensusResult {
    pub decision: Decision,
    pub weighted_score: f64,
    pub dissenting: BTreeSet<String>,
    pub unresolved_flags: BTreeSet<String>,
    pub rule: DecisionRule,
}

impl ConsensusResult {
    pub fn is_approved(&self) -> bool {
        self.decision == Decision::Approve
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsensusEngine {
    policy: ConsensusPolicy,
}

impl ConsensusEngine {
    pub fn new(policy: ConsensusPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ConsensusPolicy {
        &self.policy
    }

    pub fn decide(
        &self,
        votes: &[ReviewVote],
        profiles: &HashMap<String, PersonaProfile>,
    ) -> ConsensusResult {
        let weight_of = |vote: &ReviewVote| {
            if vote.abstained {
                return 0.0;
            }
            profiles
                .get(&vote.persona_id)
                .map(|p| p.weight.max(0.0))
                .unwrap_or(0.0)
        };

        let total_weight: f64 = votes.iter().map(weight_of).sum();
        let weighted_score = if total_weight > 0.0 {
            votes
                .iter()
                .map(|v| weight_of(v) / total_weight * v.score.clamp(0.0, 1.0))
                .sum()
        } else {
            0.0
        };

        let unresolved_flags: BTreeSet<String> = votes
            .iter()
            .flat_map(|v| v.flags.iter())
            .filter(|f| !self.policy.resolved_flags.contains(*f))
            .cloned()
            .collect();

        let senior_veto = votes
            .iter()
            .any(|v| v.verdict == Verdict::Reject && weight_of(v) > self.policy.veto_weight);

        let meets_threshold = weighted_score + THRESHOLD_EPSILON >= self.policy.threshold;

        let (decision, rule) = if unresolved_flags
            .iter()
            .any(|f| self.policy.blocking_flags.contains(f))
        {
            (Decision::Reject, DecisionRule::BlockingFlag)
        } else if !meets_threshold {
            (Decision::Reject, DecisionRule::BelowThreshold)
        } else if senior_veto {
            (Decision::Revise, DecisionRule::SeniorVeto)
        } else if unresolved_flags.is_empty() {
            (Decision::Approve, DecisionRule::Approved)
        } else {
            (Decision::Revise, DecisionRule::UnresolvedFlags)
        };

        let dissenting = votes
            .iter()
            .filter(|v| v.abstained || v.verdict != decision)
            .map(|v| v.persona_id.clone())
            .collect();

        tracing::debug!(
            weighted_score,
            decision = %decision,
            ?rule,
            flags = unresolved_flags.len(),
            "consensus reached"
        );

        ConsensusResult {
            decision,
            weighted_score,
            dissenting,
            unresolved_flags,
            rule,
        }
    }
}

/// Decide with default veto and blocking-flag settings
pub fn decide(
    votes: &[ReviewVote],
    profiles: &HashMap<String, PersonaProfile>,
    threshold: f64,
) -> ConsensusResult {
    ConsensusEngine::new(ConsensusPolicy::with_threshold(threshold)).decide(votes, profiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(id: &str, score: f64) -> ReviewVote {
        ReviewVote {
            persona_id: id.into(),
            score,
            verdict: Verdict::from_score(score),
            rationale: String::new(),
            flags: BTreeSet::new(),
            findings: Vec::new(),
            abstained: false,
        }
    }

    fn profiles(weights: &[(&str, f64)]) -> HashMap<String, PersonaProfile> {
        weights
            .iter()
            .map(|(id, w)| (id.to_string(), PersonaProfile::new(*id, *w)))
            .collect()
    }

    #[test]
    fn test_weighted_score_below_threshold_rejects() {
        let board = profiles(&[("editor", 0.5), ("fact_checker", 0.3), ("brand", 0.2)]);
        let votes = vec![vote("editor", 0.9), vote("fact_checker", 0.6), vote("brand", 0.3)];

        let result = decide(&votes, &board, 0.7);
        assert!((result.weighted_score - 0.69).abs() < 1e-9);
        assert_eq!(result.decision, Decision::Reject);
        assert_eq!(result.rule, DecisionRule::BelowThreshold);
        assert_eq!(
            result.dissenting,
            BTreeSet::from(["editor".to_string(), "fact_checker".to_string()])
        );
    }

    #[test]
    fn test_blocking_flag_overrides_high_score() {
        let board = profiles(&[("editor", 0.5), ("brand", 0.5)]);
        let mut flagged = vote("brand", 0.95);
        flagged.flags.insert(UNDISCLOSED_AI_CONTENT.to_string());
        let votes = vec![vote("editor", 0.95), flagged];

        let result = decide(&votes, &board, 0.7);
        assert!((result.weighted_score - 0.95).abs() < 1e-9);
        assert_eq!(result.decision, Decision::Reject);
        assert_eq!(result.rule, DecisionRule::BlockingFlag);
    }

    #[test]
    fn test_unverified_flag_blocks_approval() {
        let board = profiles(&[("editor", 0.6), ("fact_checker", 0.4)]);
        let mut unsure = vote("fact_checker", 0.9);
        unsure.flags.insert("[UNVERIFIED] accuracy".into());
        let votes = vec![vote("editor", 0.9), unsure];

        let result = decide(&votes, &board, 0.7);
        assert_eq!(result.decision, Decision::Revise);
        assert_eq!(result.rule, DecisionRule::UnresolvedFlags);
        assert!(result.unresolved_flags.contains("[UNVERIFIED] accuracy"));
    }

    #[test]
    fn test_missing_vote_has_no_weight_and_dissents() {
        let board = profiles(&[("editor", 0.5), ("fact_checker", 0.3), ("brand", 0.2)]);
        let mut missing = vote("brand", 0.0);
        missing.verdict = Verdict::Revise;
        missing.abstained = true;
        missing.flags.insert("[NO_VOTE] brand".into());
        let votes = vec![vote("editor", 0.9), vote("fact_checker", 0.9), missing];

        let result = decide(&votes, &board, 0.7);
        assert!((result.weighted_score - 0.9).abs() < 1e-9);
        assert_eq!(result.decision, Decision::Revise);
        assert_eq!(result.rule, DecisionRule::UnresolvedFlags);
        assert_eq!(result.dissenting, BTreeSet::from(["brand".to_string()]));

        let policy =
            ConsensusPolicy::default().with_resolved_flags(["[NO_VOTE] brand".to_string()]);
        let result = ConsensusEngine::new(policy).decide(&votes, &board);
        assert_eq!(result.decision, Decision::Approve);
        assert!(result.dissenting.contains("brand"));
    }

    #[test]
    fn test_resolved_flags_are_ignored() {
        let board = profiles(&[("editor", 0.6), ("fact_checker", 0.4)]);
        let mut unsure = vote("fact_checker", 0.9);
        unsure.flags.insert("[UNVERIFIED] accuracy".into());
        let votes = vec![vote("editor", 0.9), unsure];

        let policy =
            ConsensusPolicy::default().with_resolved_flags(["[UNVERIFIED] accuracy".to_string()]);
        let result = ConsensusEngine::new(policy).decide(&votes, &board);
        assert_eq!(result.decision, Decision::Approve);
        assert!(result.unresolved_flags.is_empty());
    }

    #[test]
    fn test_senior_veto_downgrades_to_revise() {
        let board = profiles(&[("editor", 0.35), ("a", 0.05), ("b", 0.6)]);
        let votes = vec![vote("editor", 0.1), vote("a", 1.0), vote("b", 1.0)];

        let result = decide(&votes, &board, 0.6);
        assert!(result.weighted_score >= 0.6);
        assert_eq!(result.decision, Decision::Revise);
        assert_eq!(result.rule, DecisionRule::SeniorVeto);
    }

    #[test]
    fn test_junior_reject_does_not_veto() {
        let board = profiles(&[("editor", 0.8), ("intern", 0.2)]);
        let votes = vec![vote("editor", 1.0), vote("intern", 0.1)];

        let result = decide(&votes, &board, 0.7);
        assert_eq!(result.decision, Decision::Approve);
        assert_eq!(result.dissenting, BTreeSet::from(["intern".to_string()]));
    }

    #[test]
    fn test_threshold_tie_meets() {
        let board = profiles(&[("a", 0.5), ("b", 0.5)]);
        let votes = vec![vote("a", 0.8), vote("b", 0.8)];
        assert_eq!(decide(&votes, &board, 0.8).decision, Decision::Approve);
    }

    #[test]
    fn test_unknown_personas_carry_no_weight() {
        let board = profiles(&[("editor", 1.0)]);
        let votes = vec![vote("editor", 0.9), vote("stranger", 0.0)];
        let result = decide(&votes, &board, 0.7);
        assert!((result.weighted_score - 0.9).abs() < 1e-9);

        let empty = decide(&[], &board, 0.7);
        assert_eq!(empty.weighted_score, 0.0);
        assert_eq!(empty.decision, Decision::Reject);
    }

    #[test]
    fn test_decision_is_deterministic_and_order_insensitive() {
        let board = profiles(&[("a", 0.4), ("b", 0.3), ("c", 0.3)]);
        let mut b = vote("b", 0.5);
        b.flags.insert("z".into());
        b.flags.insert("m".into());
        let votes = vec![vote("a", 0.9), b, vote("c", 0.2)];
        let mut reversed = votes.clone();
        reversed.reverse();

        let first = decide(&votes, &board, 0.5);
        let second = decide(&reversed, &board, 0.5);
        assert_eq!(first.decision, second.decision);
        assert_eq!(first.dissenting, second.dissenting);
        assert_eq!(
            serde_json::to_string(&first.unresolved_flags).unwrap(),
            r#"["m","z"]"#
        );
    }

    #[test]
    fn test_monotonic_in_single_score() {
        let board = profiles(&[("a", 0.5), ("b", 0.35), ("c", 0.15)]);
        for persona in ["a", "b", "c"] {
            let mut previous = Decision::Reject;
            for step in 0..=20 {
                let score = step as f64 / 20.0;
                let votes: Vec<ReviewVote> = [("a", 0.7), ("b", 0.6), ("c", 0.9)]
                    .iter()
                    .map(|(id, s)| vote(id, if *id == persona { score } else { *s }))
                    .collect();
                let decision = decide(&votes, &board, 0.7).decision;
                assert!(
                    decision >= previous,
                    "{persona} at {score}: {previous} -> {decision}"
                );
                previous = decision;
            }
        }
    }
}
