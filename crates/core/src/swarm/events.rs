//! # Pipeline Events
//!
//! Progress events emitted while a run executes. They are streamed to an
//! optional listener and kept in the run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::artifact_store::StageId;

/// Kind of pipeline event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    RunStarted,
    RunResumed,
    StageStarted,
    /// A persisted artifact was reused instead of regenerating it
    StageReused,
    StageCompleted,
    /// Retry budget exhausted; the run halted
    StageFailed,
    PersonaReviewed,
    ConsensusReached,
    RevisionRequested,
    PatternLearned,
    /// Halted at the human gate
    AwaitingApproval,
    Published,
    RunRejected,
    RunDeclined,
}

/// An event in a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub kind: PipelineEventKind,
    #[serde(default)]
    pub stage: Option<StageId>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl PipelineEvent {
    pub fn new(kind: PipelineEventKind, run_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            kind,
            stage: None,
            data: None,
        }
    }

    pub fn with_stage(mut self, stage: StageId) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = PipelineEvent::new(PipelineEventKind::StageStarted, "run-1")
            .with_stage(StageId::Draft)
            .with_data(serde_json::json!({ "revision": 1 }));

        assert_eq!(event.run_id, "run-1");
        assert_eq!(event.stage, Some(StageId::Draft));
        assert_eq!(event.data.unwrap()["revision"], 1);
        assert_ne!(
            event.id,
            PipelineEvent::new(PipelineEventKind::StageStarted, "run-1").id
        );
    }
}
