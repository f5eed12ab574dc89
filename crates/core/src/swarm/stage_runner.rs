//! # Stage Runner
//!
//! Executes one stage: generate → decode → validate → persist.
//!
//! ```text
//! PENDING → RUNNING → DECODED → VALIDATED → DONE
//!              │          │          │
//!              └──────────┴──────────┴──→ FAILED
//! ```
//!
//! Transport failures (timeouts included) are retried with exponential
//! backoff through `backon`. A decode failure or a validation failure each earn one re-prompt
//! carrying the error; the second occurrence is fatal.

use backon::{ExponentialBuilder, Retryable};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{StageError, TransportError, ValidationError};
use crate::skills::artifact_registry::{StagePayload, ValidationRules};
use crate::skills::decoder;
use crate::skills::generator::{GenerationRequest, Generator};
use crate::state::artifact_store::{Artifact, ArtifactStore, StageId};

/// Status of a stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Decoded,
    Validated,
    Done,
    Failed,
}

/// Transport retry and timeout settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Generation calls per stage attempt, first call included
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            call_timeout_ms: 120_000,
        }
    }
}

impl RetryPolicy {
    /// Doubling backoff between calls, capped at `max_backoff_ms`
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// How a stage execution went
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageId,
    pub status: StageStatus,
    /// Generation calls made, retries included
    pub attempts: u32,
    pub decode_retries: u32,
    pub validation_retries: u32,
}

impl StageReport {
    fn new(stage: StageId) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            attempts: 0,
            decode_retries: 0,
            validation_retries: 0,
        }
    }
}

/// A persisted stage result
#[derive(Debug, Clone)]
pub struct StageOutput<P> {
    pub payload: P,
    pub artifact: Artifact,
    pub report: StageReport,
}

#[derive(Clone)]
pub struct StageRunner {
    generator: Arc<dyn Generator>,
    store: ArtifactStore,
    retry: RetryPolicy,
    rules: ValidationRules,
}

impl StageRunner {
    pub fn new(generator: Arc<dyn Generator>, store: ArtifactStore) -> Self {
        Self {
            generator,
            store,
            retry: RetryPolicy::default(),
            rules: ValidationRules::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run a generating stage and persist its artifact
    pub async fn run<P: StagePayload>(
        &self,
        run_id: &str,
        revision: u32,
        request: GenerationRequest,
    ) -> Result<StageOutput<P>, StageError> {
        let rules = self.rules.clone();
        let (payload, mut report) = self
            .generate_validated::<P, _>(P::STAGE, request, |p| p.validate(&rules))
            .await?;

        let artifact = self
            .persist(run_id, revision, &payload)
            .await
            .map_err(|mut e| {
                e.attempts = report.attempts;
                e
            })?;
        report.status = StageStatus::Done;

        tracing::info!(
            run_id,
            stage = %P::STAGE,
            revision,
            attempts = report.attempts,
            "stage done"
        );
        Ok(StageOutput {
            payload,
            artifact,
            report,
        })
    }

    /// Validate and persist a payload produced without generation
    pub async fn persist<P: StagePayload>(
        &self,
        run_id: &str,
        revision: u32,
        payload: &P,
    ) -> Result<Artifact, StageError> {
        let violations = payload.validate(&self.rules);
        if !violations.is_empty() {
            return Err(StageError::new(
                P::STAGE,
                0,
                ValidationError {
                    stage: P::STAGE,
                    violations,
                },
            ));
        }

        let artifact = Artifact::from_payload(P::STAGE, revision, payload)
            .map_err(|e| StageError::new(P::STAGE, 0, e))?;
        self.store
            .write(run_id, &artifact)
            .await
            .map_err(|e| StageError::new(P::STAGE, 0, e))?;
        Ok(artifact)
    }

    /// Generate, decode and validate without persisting
    pub async fn generate_validated<T, F>(
        &self,
        stage: StageId,
        request: GenerationRequest,
        validate: F,
    ) -> Result<(T, StageReport), StageError>
    where
        T: DeserializeOwned + JsonSchema,
        F: Fn(&T) -> Vec<String>,
    {
        let mut report = StageReport::new(stage);
        let mut current = request.clone();

        loop {
            report.status = StageStatus::Running;
            let raw = self.call_with_retry(stage, &current, &mut report).await?;

            let payload: T = match decoder::decode_as(&raw) {
                Ok(payload) => payload,
                Err(err) if report.decode_retries == 0 => {
                    report.decode_retries += 1;
                    tracing::warn!(
                        %stage,
                        reason = %err.reason,
                        "undecodable response, re-prompting"
                    );
                    current = request.with_feedback(&format!("{}: {}", err.reason, err.detail));
                    continue;
                }
                Err(err) => {
                    report.status = StageStatus::Failed;
                    return Err(StageError::new(stage, report.attempts, err));
                }
            };
            report.status = StageStatus::Decoded;

            let violations = validate(&payload);
            if violations.is_empty() {
                report.status = StageStatus::Validated;
                return Ok((payload, report));
            }
            if report.validation_retries == 0 {
                report.validation_retries += 1;
                tracing::warn!(
                    %stage,
                    violations = violations.len(),
                    "payload failed validation, re-prompting"
                );
                current = request.with_feedback(&format!(
                    "schema_validation: {}",
                    violations.join("; ")
                ));
                continue;
            }

            report.status = StageStatus::Failed;
            return Err(StageError::new(
                stage,
                report.attempts,
                ValidationError { stage, violations },
            ));
        }
    }

    async fn call_with_retry(
        &self,
        stage: StageId,
        request: &GenerationRequest,
        report: &mut StageReport,
    ) -> Result<String, StageError> {
        let timeout = self.retry.call_timeout();
        let calls = AtomicU32::new(0);
        let calls_made = &calls;
        let generator = &self.generator;

        let result = (move || async move {
            calls_made.fetch_add(1, Ordering::Relaxed);
            match tokio::time::timeout(timeout, generator.generate(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            }
        })
        .retry(self.retry.backoff())
        .when(TransportError::is_retryable)
        .notify(|err: &TransportError, delay: Duration| {
            tracing::warn!(
                %stage,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "generation failed, retrying"
            );
        })
        .await;

        report.attempts += calls.load(Ordering::Relaxed);
        result.map_err(|err| {
            report.status = StageStatus::Failed;
            StageError::new(stage, report.attempts, err)
        })
    }
}
