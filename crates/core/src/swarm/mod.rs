//! # Pipeline Orchestration
//!
//! Runs the editorial pipeline stage by stage.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Topic hint → Scout → Research → Draft → Review → Consensus → Human Gate → Publish
//!                                   ▲                  │
//!                                   └──── revise ──────┘
//! ```

pub mod coordinator;
pub mod events;
pub mod pipeline;
pub mod stage_runner;

pub use coordinator::{
    Coordinator, CoordinatorConfig, LedgerSettings, RunOutcome, RunReport, CONFIG_FILE,
    LEDGER_FILE,
};
pub use events::{PipelineEvent, PipelineEventKind};
pub use pipeline::{Pipeline, PipelineStage};
pub use stage_runner::{RetryPolicy, StageOutput, StageReport, StageRunner, StageStatus};
