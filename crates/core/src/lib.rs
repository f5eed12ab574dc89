//! # Pressroom Core
//!
//! The newsroom behind Pressroom: a staged editorial pipeline that turns a
//! topic hint into a published article, with a panel of reviewer personas, a
//! weighted consensus gate, and a skills ledger that remembers what reviewers
//! keep finding.
//!
//! ## Architecture
//!
//! - `skills/` - Stage skills, the generation transport and the JSON decoder
//! - `review/` - Persona criteria, reviewer votes and the consensus engine
//! - `models` - LLM provider configuration
//! - `state/` - Artifact store, run state, approvals and the skills ledger
//! - `swarm/` - Stage runner and the pipeline coordinator
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pressroom_core::state::{get_runtime_path, LedgerHandle, SkillsLedger};
//! use pressroom_core::swarm::{Coordinator, CoordinatorConfig};
//!
//! let runtime = get_runtime_path();
//! let config = CoordinatorConfig::load_or_default(&runtime).await?;
//! let generator = config.model.create_generator()?;
//! let ledger = LedgerHandle::new(SkillsLedger::load(config.ledger_path(&runtime))?);
//! let mut coordinator = Coordinator::new(config, generator, ledger, runtime)?;
//! let report = coordinator.run("edge caching for small teams").await?;
//! ```

pub mod error;
pub mod models;
pub mod review;
pub mod skills;
pub mod state;
pub mod swarm;

pub use error::{ApprovalError, PipelineError, StageError, StageFailure};
pub use models::{LlmProvider, ModelConfig};
pub use swarm::{Coordinator, CoordinatorConfig, RunOutcome, RunReport};
