//! # Approval State
//!
//! The human gate's external signal. A run halted at the gate proceeds to
//! Publish only once an explicit approval is recorded in
//! `runs/<run_id>/approval.json`; a missing record keeps it halted forever.
//! The same record carries human overrides that resolve review flags.
//!
//! A decision can only be recorded while the run is awaiting approval, and it
//! is bound to the revision that was on the table at that moment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::artifact_store::{read_json, ArtifactStore};
use super::io;
use super::run_state::{RunPhase, RunState};
use crate::error::{ApprovalError, StoreError};

/// Decision taken by a human at the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    Declined,
}

/// Human input recorded for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// `None` while nobody has decided
    #[serde(default)]
    pub status: Option<ApprovalStatus>,
    #[serde(default)]
    pub decided_by: Option<String>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub note: Option<String>,
    /// Draft revision the decision was taken on
    #[serde(default)]
    pub revision: Option<u32>,
    /// Review flags a human has explicitly marked resolved
    #[serde(default)]
    pub resolved_flags: BTreeSet<String>,
}

impl ApprovalRecord {
    pub fn is_approved(&self) -> bool {
        self.status == Some(ApprovalStatus::Approved)
    }

    /// The decision, if it was taken on `revision`
    pub fn decision_for(&self, revision: u32) -> Option<ApprovalStatus> {
        self.status.filter(|_| self.revision == Some(revision))
    }
}

/// File-backed approval records, one per run
#[derive(Debug, Clone)]
pub struct ApprovalManager {
    store: ArtifactStore,
}

impl ApprovalManager {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    fn path(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.store.run_dir(run_id)?.join("approval.json"))
    }

    /// Load the record for a run (empty when nothing was recorded)
    pub async fn load(&self, run_id: &str) -> Result<ApprovalRecord, StoreError> {
        Ok(read_json(&self.path(run_id)?).await?.unwrap_or_default())
    }

    async fn save(&self, run_id: &str, record: &ApprovalRecord) -> Result<(), StoreError> {
        let path = self.path(run_id)?;
        let content = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;
        io::write_atomic(&path, &content)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }

    async fn decide(
        &self,
        run_id: &str,
        status: ApprovalStatus,
        decided_by: &str,
        note: Option<String>,
    ) -> Result<ApprovalRecord, ApprovalError> {
        let state = RunState::load(&self.store, run_id)
            .await?
            .ok_or_else(|| ApprovalError::RunNotFound(run_id.to_string()))?;
        if state.phase != RunPhase::AwaitingApproval {
            return Err(ApprovalError::NotAwaitingApproval {
                run_id: run_id.to_string(),
                phase: state.phase.as_str().to_string(),
            });
        }

        let mut record = self.load(run_id).await?;
        record.status = Some(status);
        record.decided_by = Some(decided_by.to_string());
        record.decided_at = Some(Utc::now());
        record.note = note;
        record.revision = Some(state.revision);
        self.save(run_id, &record).await?;

        tracing::info!(
            run_id,
            ?status,
            decided_by,
            revision = state.revision,
            "human gate decision recorded"
        );
        Ok(record)
    }

    /// Record an explicit approval for publication
    pub async fn approve(
        &self,
        run_id: &str,
        decided_by: &str,
        note: Option<String>,
    ) -> Result<ApprovalRecord, ApprovalError> {
        self.decide(run_id, ApprovalStatus::Approved, decided_by, note)
            .await
    }

    /// Record that a human declined publication
    pub async fn decline(
        &self,
        run_id: &str,
        decided_by: &str,
        note: Option<String>,
    ) -> Result<ApprovalRecord, ApprovalError> {
        self.decide(run_id, ApprovalStatus::Declined, decided_by, note)
            .await
    }

    /// Mark a review flag as resolved by a human override
    pub async fn resolve_flag(
        &self,
        run_id: &str,
        flag: &str,
    ) -> Result<ApprovalRecord, StoreError> {
        let mut record = self.load(run_id).await?;
        if record.resolved_flags.insert(flag.to_string()) {
            self.save(run_id, &record).await?;
            tracing::info!(run_id, flag, "flag resolved by human override");
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_in_phase(store: &ArtifactStore, run_id: &str, phase: RunPhase, revision: u32) {
        let mut state = RunState::new(run_id, "edge caching");
        state.phase = phase;
        state.revision = revision;
        state.save(store).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_record_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let approvals = ApprovalManager::new(ArtifactStore::in_runtime(dir.path()));

        let record = approvals.load("run-1").await.unwrap();
        assert_eq!(record.status, None);
        assert!(!record.is_approved());
    }

    #[tokio::test]
    async fn test_approve_and_resolve_flags() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::in_runtime(dir.path());
        run_in_phase(&store, "run-1", RunPhase::AwaitingApproval, 1).await;
        let approvals = ApprovalManager::new(store);

        approvals
            .resolve_flag("run-1", "[UNVERIFIED] accuracy")
            .await
            .unwrap();
        approvals
            .approve("run-1", "editor-in-chief", Some("ship it".into()))
            .await
            .unwrap();

        let record = approvals.load("run-1").await.unwrap();
        assert!(record.is_approved());
        assert_eq!(record.decided_by.as_deref(), Some("editor-in-chief"));
        assert_eq!(record.revision, Some(1));
        assert!(record.resolved_flags.contains("[UNVERIFIED] accuracy"));
    }

    #[tokio::test]
    async fn test_decline() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::in_runtime(dir.path());
        run_in_phase(&store, "run-2", RunPhase::AwaitingApproval, 0).await;
        let approvals = ApprovalManager::new(store);

        approvals.decline("run-2", "legal", None).await.unwrap();
        let record = approvals.load("run-2").await.unwrap();
        assert_eq!(record.status, Some(ApprovalStatus::Declined));
        assert_eq!(record.decision_for(0), Some(ApprovalStatus::Declined));
    }

    #[tokio::test]
    async fn test_decisions_outside_the_gate_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::in_runtime(dir.path());
        run_in_phase(&store, "running", RunPhase::Running, 0).await;
        run_in_phase(&store, "failed", RunPhase::Failed, 0).await;
        let approvals = ApprovalManager::new(store);

        for run_id in ["running", "failed"] {
            let err = approvals.approve(run_id, "editor", None).await.unwrap_err();
            assert!(matches!(err, ApprovalError::NotAwaitingApproval { .. }));
            assert_eq!(approvals.load(run_id).await.unwrap().status, None);
        }
        assert!(matches!(
            approvals.decline("missing", "editor", None).await,
            Err(ApprovalError::RunNotFound(_))
        ));
    }

    #[test]
    fn test_decision_is_bound_to_its_revision() {
        let record = ApprovalRecord {
            status: Some(ApprovalStatus::Approved),
            revision: Some(0),
            ..ApprovalRecord::default()
        };
        assert_eq!(record.decision_for(0), Some(ApprovalStatus::Approved));
        assert_eq!(record.decision_for(1), None);

        let legacy = ApprovalRecord {
            status: Some(ApprovalStatus::Approved),
            ..ApprovalRecord::default()
        };
        assert_eq!(legacy.decision_for(0), None);
    }

    #[test]
    fn test_resolving_twice_keeps_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let approvals = ApprovalManager::new(ArtifactStore::in_runtime(dir.path()));

        tokio_test::block_on(async {
            tokio_test::assert_ok!(approvals.resolve_flag("run-3", "policy:banned_phrase").await);
            let record = tokio_test::assert_ok!(
                approvals.resolve_flag("run-3", "policy:banned_phrase").await
            );
            assert_eq!(record.resolved_flags.len(), 1);
            assert_eq!(record.status, None);
        });
    }
}
