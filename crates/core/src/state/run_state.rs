//! # Run State
//!
//! The machine-readable state of one pipeline run, kept next to its artifacts
//! in `runs/<run_id>/state.json`. This is what `resume` reads to continue a
//! halted run without re-running successful stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::artifact_store::{read_json, ArtifactStore, StageId};
use super::io;
use crate::error::{excerpt, PipelineError, StageError, StoreError};
use crate::review::consensus::ConsensusResult;

/// Lifecycle phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Running,
    AwaitingApproval,
    Published,
    Rejected,
    Declined,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Published => "published",
            Self::Rejected => "rejected",
            Self::Declined => "declined",
            Self::Failed => "failed",
        }
    }

    /// Terminal phases never execute another stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Rejected | Self::Declined)
    }
}

/// Pointer to a persisted artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub stage: StageId,
    pub revision: u32,
}

/// Why a run stopped, with enough context to fix and resume it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaltReport {
    pub stage: StageId,
    pub error_kind: String,
    pub attempts: u32,
    pub excerpt: String,
    pub at: DateTime<Utc>,
}

impl HaltReport {
    pub fn new(
        stage: StageId,
        error_kind: impl Into<String>,
        attempts: u32,
        excerpt: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            error_kind: error_kind.into(),
            attempts,
            excerpt: excerpt.into(),
            at: Utc::now(),
        }
    }

    /// Halt report for any error that stopped a run; `stage` is the stage in
    /// flight when the error is not a stage failure
    pub fn for_error(stage: StageId, err: &PipelineError) -> Self {
        match err {
            PipelineError::Stage(err) => Self::from(err),
            other => Self::new(stage, other.kind(), 0, excerpt(&other.to_string())),
        }
    }
}

impl From<&StageError> for HaltReport {
    fn from(err: &StageError) -> Self {
        Self::new(err.stage, err.cause.kind(), err.attempts, err.cause.excerpt())
    }
}


/// Persisted state of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    /// Topic hint the run was started with
    pub topic: String,
    pub phase: RunPhase,
    /// Current revision cycle (0 on the first draft)
    pub revision: u32,
    /// Last artifact that passed validation
    #[serde(default)]
    pub last_validated: Option<ArtifactRef>,
    /// Most recent consensus result
    #[serde(default)]
    pub last_decision: Option<ConsensusResult>,
    /// Set when the run ended in a forced reject after too many revisions
    #[serde(default)]
    pub forced_reject: bool,
    #[serde(default)]
    pub published_slug: Option<String>,
    #[serde(default)]
    pub published_path: Option<PathBuf>,
    #[serde(default)]
    pub halt: Option<HaltReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, topic: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            topic: topic.into(),
            phase: RunPhase::Running,
            revision: 0,
            last_validated: None,
            last_decision: None,
            forced_reject: false,
            published_slug: None,
            published_path: None,
            halt: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a validated artifact
    pub fn mark_validated(&mut self, stage: StageId, revision: u32) {
        self.last_validated = Some(ArtifactRef { stage, revision });
    }

    /// Record a halt; the run stays resumable
    pub fn halt(&mut self, report: HaltReport) {
        self.phase = RunPhase::Failed;
        self.halt = Some(report);
    }

    fn path(store: &ArtifactStore, run_id: &str) -> Result<PathBuf, StoreError> {
        Ok(store.run_dir(run_id)?.join("state.json"))
    }

    /// Load run state, `None` if the run does not exist
    pub async fn load(store: &ArtifactStore, run_id: &str) -> Result<Option<Self>, StoreError> {
        read_json(&Self::path(store, run_id)?).await
    }

    /// Save run state atomically
    pub async fn save(&mut self, store: &ArtifactStore) -> Result<(), StoreError> {
        self.updated_at = Utc::now();
        let path = Self::path(store, &self.run_id)?;
        let content = serde_json::to_vec_pretty(self).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;
        io::write_atomic(&path, &content)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }
}
