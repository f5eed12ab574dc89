//! # Pipeline Errors
//!
//! Error taxonomy for the editorial pipeline. Transport and decode failures are
//! absorbed by the stage runner up to their retry budget; anything past the
//! budget surfaces as a [`StageError`] and halts the run.
//!
//! A `reject` or `revise` consensus decision is a normal outcome and never
//! appears here.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::artifact_store::StageId;

/// Maximum number of characters of raw model output kept in error reports
pub const EXCERPT_CHARS: usize = 240;

/// Cut a raw response down to a short, char-safe excerpt.
pub fn excerpt(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    cut.push('…');
    cut
}

// ============================================================================
// Transport
// ============================================================================

/// Failure of the external generation capability
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("generation call timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("rate limited by provider")]
    RateLimited,

    #[error("unexpected provider response: {0}")]
    Response(String),

    #[error("generator misconfigured: {0}")]
    Config(String),
}

impl TransportError {
    /// Whether the stage runner may retry the call with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Request(_) | Self::RateLimited => true,
            Self::Api { status, .. } => *status == 408 || *status >= 500,
            Self::Response(_) | Self::Config(_) => false,
        }
    }
}

// ============================================================================
// Decode
// ============================================================================

/// Why a raw response could not be turned into a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorReason {
    NoJsonFound,
    MalformedJson,
    SchemaMismatch,
}

impl DecodeErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoJsonFound => "no_json_found",
            Self::MalformedJson => "malformed_json",
            Self::SchemaMismatch => "schema_mismatch",
        }
    }
}

impl fmt::Display for DecodeErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of a failed decode. Never raised past the stage boundary.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{reason}: {detail}")]
pub struct DecodeError {
    pub reason: DecodeErrorReason,
    pub detail: String,
    pub raw_excerpt: String,
}

impl DecodeError {
    pub fn new(reason: DecodeErrorReason, detail: impl Into<String>, raw: &str) -> Self {
        Self {
            reason,
            detail: detail.into(),
            raw_excerpt: excerpt(raw),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// A decoded payload that breaks its stage's content rules
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{stage} payload failed validation: {}", .violations.join("; "))]
pub struct ValidationError {
    pub stage: StageId,
    pub violations: Vec<String>,
}

// ============================================================================
// Storage
// ============================================================================

/// Artifact and run-state persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact {stage} r{revision} already exists for run {run_id}")]
    AlreadyExists {
        run_id: String,
        stage: StageId,
        revision: u32,
    },

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid run id '{0}'")]
    InvalidRunId(String),

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid document at {}: {source}", .path.display())]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("payload does not match {stage}: {source}")]
    Payload {
        stage: StageId,
        #[source]
        source: serde_json::Error,
    },
}

/// A human gate decision that cannot be recorded
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("run {0} not found")]
    RunNotFound(String),

    #[error("run {run_id} is {phase}; only a run awaiting approval can be approved or declined")]
    NotAwaitingApproval { run_id: String, phase: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Skills ledger failures. Corruption is fatal for the run and never repaired.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("skills ledger at {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to read skills ledger at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to flush skills ledger to {}: {source}", .path.display())]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to lock skills ledger at {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Stage / Pipeline
// ============================================================================

/// The last error a stage hit before giving up
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("schema validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("artifact store error: {0}")]
    Store(#[from] StoreError),
}

impl StageFailure {
    /// Stable error-kind label for halt reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Decode(e) => e.reason.as_str(),
            Self::Validation(_) => "schema_validation",
            Self::Store(_) => "store",
        }
    }

    /// Verbatim excerpt of what went wrong
    pub fn excerpt(&self) -> String {
        match self {
            Self::Decode(e) if !e.raw_excerpt.is_empty() => {
                format!("{} | raw: {}", e.detail, e.raw_excerpt)
            }
            other => excerpt(&other.to_string()),
        }
    }
}

/// A stage that exhausted its retry budget
#[derive(Debug, Error)]
#[error("stage {stage} failed after {attempts} attempt(s): {cause}")]
pub struct StageError {
    pub stage: StageId,
    pub attempts: u32,
    #[source]
    pub cause: StageFailure,
}

impl StageError {
    pub fn new(stage: StageId, attempts: u32, cause: impl Into<StageFailure>) -> Self {
        Self {
            stage,
            attempts,
            cause: cause.into(),
        }
    }
}

/// Errors surfaced to callers of the orchestrator
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run {0} not found")]
    RunNotFound(String),
}

impl PipelineError {
    /// Stable error-kind label for halt reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stage(e) => e.cause.kind(),
            Self::Ledger(_) => "ledger",
            Self::Store(_) => "store",
            Self::Config(_) => "config",
            Self::RunNotFound(_) => "run_not_found",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_truncates_long_text() {
        let raw = "x".repeat(1000);
        let cut = excerpt(&raw);
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 1);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_transport_retryability() {
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransportError::RateLimited.is_retryable());
        assert!(TransportError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_retryable());
        assert!(!TransportError::Api {
            status: 401,
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!TransportError::Config("missing key".into()).is_retryable());
    }

    #[test]
    fn test_stage_failure_kind() {
        let err = StageFailure::from(DecodeError::new(
            DecodeErrorReason::NoJsonFound,
            "nothing",
            "plain prose",
        ));
        assert_eq!(err.kind(), "no_json_found");
        assert!(err.excerpt().contains("plain prose"));
    }

    #[test]
    fn test_pipeline_error_kind() {
        let err = PipelineError::from(LedgerError::Corrupt {
            path: PathBuf::from("skills.json"),
            reason: "bad".into(),
        });
        assert_eq!(err.kind(), "ledger");

        let err = PipelineError::from(StageError::new(
            StageId::Draft,
            2,
            TransportError::RateLimited,
        ));
        assert_eq!(err.kind(), "transport");
    }
}
