//! # Pipeline Stages
//!
//! The fixed editorial pipeline as a state machine, including the bounded
//! revise loop between review and drafting.

use serde::{Deserialize, Serialize};

use crate::state::artifact_store::StageId;

/// Stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Picking topic and angle
    Scouting,
    /// Gathering sources
    Researching,
    /// Writing (or revising) the draft
    Drafting,
    /// Personas reviewing the draft
    Reviewing,
    /// Consensus engine deciding
    Deciding,
    /// Halted at the human gate
    AwaitingApproval,
    /// Packaging the approved draft
    Publishing,
    Published,
    Rejected,
    Failed,
}

impl PipelineStage {
    /// Artifact this stage produces, if any
    pub fn artifact(&self) -> Option<StageId> {
        match self {
            Self::Scouting => Some(StageId::Scout),
            Self::Researching => Some(StageId::Research),
            Self::Drafting => Some(StageId::Draft),
            Self::Reviewing => Some(StageId::Review),
            Self::Deciding => Some(StageId::Consensus),
            Self::Publishing => Some(StageId::Publish),
            Self::AwaitingApproval | Self::Published | Self::Rejected | Self::Failed => None,
        }
    }

    /// Stage a halt is attributed to. Between artifacts that is the last
    /// decision point (the consensus) or, once publishing began, publish.
    pub fn in_flight(&self) -> StageId {
        self.artifact().unwrap_or(match self {
            Self::AwaitingApproval | Self::Rejected => StageId::Consensus,
            _ => StageId::Publish,
        })
    }
}

/// The pipeline state machine
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stage: PipelineStage,
    /// Revise decisions taken so far
    pub revision_cycles: u32,
    /// Revise decisions allowed before the run is force-rejected
    pub max_revision_cycles: u32,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Pipeline {
    pub fn new(max_revision_cycles: u32) -> Self {
        Self {
            stage: PipelineStage::Scouting,
            revision_cycles: 0,
            max_revision_cycles,
        }
    }

    /// Advance to the next stage
    pub fn advance(&mut self) {
        self.stage = match self.stage {
            PipelineStage::Scouting => PipelineStage::Researching,
            PipelineStage::Researching => PipelineStage::Drafting,
            PipelineStage::Drafting => PipelineStage::Reviewing,
            PipelineStage::Reviewing => PipelineStage::Deciding,
            PipelineStage::Deciding => PipelineStage::AwaitingApproval,
            PipelineStage::AwaitingApproval => PipelineStage::Publishing,
            PipelineStage::Publishing => PipelineStage::Published,
            terminal @ (PipelineStage::Published
            | PipelineStage::Rejected
            | PipelineStage::Failed) => terminal,
        };
    }

    /// Handle a revise decision: loop back to drafting, or force a reject
    /// once the cap is exceeded. Returns whether another draft is allowed.
    pub fn revise(&mut self) -> bool {
        self.revision_cycles += 1;
        if self.revision_cycles > self.max_revision_cycles {
            self.stage = PipelineStage::Rejected;
            false
        } else {
            self.stage = PipelineStage::Drafting;
            true
        }
    }

    /// Continue a persisted run at the given revision
    pub fn resume_at(&mut self, stage: PipelineStage, revision_cycles: u32) {
        self.stage = stage;
        self.revision_cycles = revision_cycles;
    }

    pub fn reject(&mut self) {
        self.stage = PipelineStage::Rejected;
    }

    pub fn fail(&mut self) {
        self.stage = PipelineStage::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_advance() {
        let mut pipeline = Pipeline::default();
        assert_eq!(pipeline.stage, PipelineStage::Scouting);

        let expected = [
            PipelineStage::Researching,
            PipelineStage::Drafting,
            PipelineStage::Reviewing,
            PipelineStage::Deciding,
            PipelineStage::AwaitingApproval,
            PipelineStage::Publishing,
            PipelineStage::Published,
            PipelineStage::Published,
        ];
        for stage in expected {
            pipeline.advance();
            assert_eq!(pipeline.stage, stage);
        }
    }

    #[test]
    fn test_revision_cap_forces_reject_on_third_revise() {
        let mut pipeline = Pipeline::new(2);
        pipeline.stage = PipelineStage::Deciding;

        assert!(pipeline.revise());
        assert_eq!(pipeline.stage, PipelineStage::Drafting);

        pipeline.stage = PipelineStage::Deciding;
        assert!(pipeline.revise());
        assert_eq!(pipeline.stage, PipelineStage::Drafting);

        pipeline.stage = PipelineStage::Deciding;
        assert!(!pipeline.revise());
        assert_eq!(pipeline.stage, PipelineStage::Rejected);
        pipeline.advance();
        assert_eq!(pipeline.stage, PipelineStage::Rejected);
    }

    #[test]
    fn test_zero_cap_never_revises() {
        let mut pipeline = Pipeline::new(0);
        assert!(!pipeline.revise());
        assert_eq!(pipeline.stage, PipelineStage::Rejected);
    }

    #[test]
    fn test_stage_artifacts() {
        assert_eq!(PipelineStage::Deciding.artifact(), Some(StageId::Consensus));
        assert_eq!(PipelineStage::AwaitingApproval.artifact(), None);
        assert_eq!(PipelineStage::Reviewing.in_flight(), StageId::Review);
        assert_eq!(PipelineStage::AwaitingApproval.in_flight(), StageId::Consensus);
        assert_eq!(PipelineStage::Published.in_flight(), StageId::Publish);
    }

    #[test]
    fn test_fail_is_sticky() {
        let mut pipeline = Pipeline::default();
        pipeline.fail();
        pipeline.advance();
        assert_eq!(pipeline.stage, PipelineStage::Failed);
        assert_eq!(pipeline.stage.artifact(), None);
    }
}
