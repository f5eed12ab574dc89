pub mod approval;
pub mod artifact_store;
pub mod io;
pub mod run_state;
pub mod skills_ledger;

pub use approval::{ApprovalManager, ApprovalRecord, ApprovalStatus};
pub use artifact_store::{Artifact, ArtifactStore, StageId, ARTIFACT_SCHEMA_VERSION};
pub use run_state::{ArtifactRef, HaltReport, RunPhase, RunState};
pub use skills_ledger::{LedgerHandle, Occurrence, Severity, SkillPattern, SkillsLedger};
pub use io::get_runtime_path;
