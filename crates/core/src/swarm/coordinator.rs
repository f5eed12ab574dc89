//! # Pipeline Coordinator
//!
//! Drives a run from topic hint to published article:
//!
//! ```text
//! Scout → Research → Draft → Review (personas in parallel) → Consensus
//!                      ▲                                         │
//!                      └────────── revise (bounded) ─────────────┤
//!                                                                ▼
//!                                              Human Gate → Publish
//! ```
//!
//! Every stage output is an immutable artifact on disk. Replaying a run reuses
//! whatever is already persisted, so `resume` never re-executes a stage that
//! succeeded.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{PipelineError, StoreError};
use crate::models::ModelConfig;
use crate::review::consensus::{ConsensusEngine, ConsensusPolicy, Decision};
use crate::review::criteria::UNDISCLOSED_AI_CONTENT;
use crate::review::persona::{default_personas, PersonaProfile, PersonaReviewer, Verdict};
use crate::skills::artifact_registry::{
    ConsensusArtifact, DraftArtifact, PersonaAssessment, PublishArtifact, PublishMetadata,
    ResearchArtifact, ReviewArtifact, StagePayload, TopicArtifact, ValidationRules,
};
use crate::skills::generator::{GenerationRequest, Generator};
use crate::skills::{
    DraftingSkill, PublisherSkill, ResearcherSkill, ReviewerSkill, RevisionNotes, ScoutSkill,
};
use crate::state::approval::{ApprovalManager, ApprovalStatus};
use crate::state::artifact_store::{ArtifactStore, StageId};
use crate::state::io;
use crate::state::run_state::{HaltReport, RunPhase, RunState};
use crate::state::skills_ledger::LedgerHandle;

use super::events::{PipelineEvent, PipelineEventKind};
use super::pipeline::{Pipeline, PipelineStage};
use super::stage_runner::{RetryPolicy, StageRunner};

/// Name of the configuration file inside the runtime directory
pub const CONFIG_FILE: &str = "config.json";

/// Default ledger file name inside the runtime directory
pub const LEDGER_FILE: &str = "skills.json";

/// Skills ledger tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Occurrences before a pattern extends review criteria
    pub min_occurrences: usize,
    /// Examples kept per pattern
    pub max_examples: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            min_occurrences: 2,
            max_examples: 5,
        }
    }
}

/// Configuration for the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Model used by every stage without an override
    pub model: ModelConfig,
    /// Per-stage model overrides (stage id -> model)
    pub per_stage_models: HashMap<String, ModelConfig>,
    /// Minimum weighted score for approval
    pub threshold: f64,
    /// A rejecting persona heavier than this holds the run at revise
    pub veto_weight: f64,
    /// Flags that force a reject
    pub blocking_flags: BTreeSet<String>,
    /// Revise decisions allowed before a forced reject
    pub max_revision_cycles: u32,
    pub retry: RetryPolicy,
    pub validation: ValidationRules,
    pub ledger: LedgerSettings,
    pub personas: Vec<PersonaProfile>,
    /// Where published markdown goes (default `<runtime>/published`)
    pub output_dir: Option<PathBuf>,
    /// Skills ledger file (default `<runtime>/skills.json`)
    pub ledger_path: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            per_stage_models: HashMap::new(),
            threshold: 0.7,
            veto_weight: 0.3,
            blocking_flags: BTreeSet::from([UNDISCLOSED_AI_CONTENT.to_string()]),
            max_revision_cycles: 2,
            retry: RetryPolicy::default(),
            validation: ValidationRules::default(),
            ledger: LedgerSettings::default(),
            personas: default_personas(),
            output_dir: None,
            ledger_path: None,
        }
    }
}

impl CoordinatorConfig {
    /// Load `<runtime>/config.json`. A missing file yields the defaults.
    pub async fn load_or_default(runtime_dir: &Path) -> Result<Self, PipelineError> {
        let path = runtime_dir.join(CONFIG_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(PipelineError::Config(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(PipelineError::Config(format!(
                "threshold {} must be in [0, 1]",
                self.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.veto_weight) {
            return Err(PipelineError::Config(format!(
                "veto_weight {} must be in [0, 1]",
                self.veto_weight
            )));
        }
        if self.personas.is_empty() {
            return Err(PipelineError::Config("at least one persona is required".into()));
        }
        let mut ids = BTreeSet::new();
        for persona in &self.personas {
            persona.validate().map_err(PipelineError::Config)?;
            if !ids.insert(persona.id.as_str()) {
                return Err(PipelineError::Config(format!(
                    "duplicate persona id '{}'",
                    persona.id
                )));
            }
        }
        for stage in self.per_stage_models.keys() {
            if StageId::parse(stage).is_none() {
                return Err(PipelineError::Config(format!("unknown stage '{}'", stage)));
            }
        }
        Ok(())
    }

    pub fn consensus_policy(&self, resolved_flags: BTreeSet<String>) -> ConsensusPolicy {
        ConsensusPolicy {
            threshold: self.threshold,
            veto_weight: self.veto_weight,
            blocking_flags: self.blocking_flags.clone(),
            resolved_flags,
        }
    }

    pub fn ledger_path(&self, runtime_dir: &Path) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| runtime_dir.join(LEDGER_FILE))
    }

    pub fn output_dir(&self, runtime_dir: &Path) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| runtime_dir.join("published"))
    }

    /// Model for a stage: per-stage override, else the global model
    pub fn model_for(&self, stage: StageId) -> &ModelConfig {
        self.per_stage_models
            .get(stage.as_str())
            .unwrap_or(&self.model)
    }
}

/// How a run (or a resume) ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Halted at the human gate
    AwaitingApproval,
    Published { slug: String, path: PathBuf },
    /// `forced` when the revision cap was exceeded
    Rejected { forced: bool },
    Declined,
}

/// Result of running or resuming the pipeline
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub state: RunState,
    pub events: Vec<PipelineEvent>,
}

/// The pipeline coordinator
pub struct Coordinator {
    config: CoordinatorConfig,
    runtime_dir: PathBuf,
    store: ArtifactStore,
    approvals: ApprovalManager,
    ledger: LedgerHandle,
    runner: StageRunner,
    stage_runners: HashMap<StageId, StageRunner>,
    reviewer: PersonaReviewer,
    profiles: HashMap<String, PersonaProfile>,
    events: Vec<PipelineEvent>,
    event_tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        generator: Arc<dyn Generator>,
        ledger: LedgerHandle,
        runtime_dir: impl Into<PathBuf>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let runtime_dir = runtime_dir.into();
        let store = ArtifactStore::in_runtime(&runtime_dir);
        let runner = StageRunner::new(generator, store.clone())
            .with_retry(config.retry.clone())
            .with_rules(config.validation.clone());
        let profiles = config
            .personas
            .iter()
            .map(|p| (p.id.clone(), p.clone()))
            .collect();

        Ok(Self {
            reviewer: PersonaReviewer::new(config.blocking_flags.iter().cloned()),
            approvals: ApprovalManager::new(store.clone()),
            config,
            runtime_dir,
            store,
            ledger,
            runner,
            stage_runners: HashMap::new(),
            profiles,
            events: Vec::new(),
            event_tx: None,
        })
    }

    /// Set event channel for streaming events
    pub fn with_event_channel(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Use a dedicated generator for one stage
    pub fn with_stage_generator(mut self, stage: StageId, generator: Arc<dyn Generator>) -> Self {
        let runner = StageRunner::new(generator, self.store.clone())
            .with_retry(self.config.retry.clone())
            .with_rules(self.config.validation.clone());
        self.stage_runners.insert(stage, runner);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn approvals(&self) -> &ApprovalManager {
        &self.approvals
    }

    fn runner_for(&self, stage: StageId) -> &StageRunner {
        self.stage_runners.get(&stage).unwrap_or(&self.runner)
    }

    async fn emit(&mut self, event: PipelineEvent) {
        self.events.push(event.clone());
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Start a new run for a topic hint
    #[tracing::instrument(
        skip(self),
        fields(topic_preview = %topic.chars().take(50).collect::<String>())
    )]
    pub async fn run(&mut self, topic: &str) -> Result<RunReport, PipelineError> {
        let run_id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let mut state = RunState::new(&run_id, topic);
        state.save(&self.store).await?;

        tracing::info!(run_id = %run_id, "run started");
        self.emit(
            PipelineEvent::new(PipelineEventKind::RunStarted, &run_id)
                .with_data(serde_json::json!({ "topic": topic })),
        )
        .await;

        self.drive(state).await
    }

    /// Continue a run from its persisted artifacts
    #[tracing::instrument(skip(self))]
    pub async fn resume(&mut self, run_id: &str) -> Result<RunReport, PipelineError> {
        let mut state = RunState::load(&self.store, run_id)
            .await?
            .ok_or_else(|| PipelineError::RunNotFound(run_id.to_string()))?;

        if state.phase.is_terminal() {
            tracing::info!(run_id, phase = state.phase.as_str(), "run already finished");
            let outcome = terminal_outcome(&state);
            return Ok(RunReport {
                run_id: run_id.to_string(),
                outcome,
                state,
                events: std::mem::take(&mut self.events),
            });
        }

        state.phase = RunPhase::Running;
        state.halt = None;
        self.emit(PipelineEvent::new(PipelineEventKind::RunResumed, run_id))
            .await;

        self.drive(state).await
    }

    /// Run the pipeline; any error halts the run with a persisted report
    async fn drive(&mut self, mut state: RunState) -> Result<RunReport, PipelineError> {
        let mut pipeline = Pipeline::new(self.config.max_revision_cycles);
        let err = match self.execute_run(&mut state, &mut pipeline).await {
            Ok(outcome) => {
                return Ok(RunReport {
                    run_id: state.run_id.clone(),
                    outcome,
                    state,
                    events: std::mem::take(&mut self.events),
                })
            }
            Err(err) => err,
        };

        let stage = match &err {
            PipelineError::Stage(err) => err.stage,
            _ => pipeline.stage.in_flight(),
        };
        pipeline.fail();
        let report = HaltReport::for_error(stage, &err);
        tracing::error!(
            run_id = %state.run_id,
            %stage,
            error_kind = %report.error_kind,
            error = %err,
            "run halted"
        );

        let (error_kind, attempts) = (report.error_kind.clone(), report.attempts);
        state.halt(report);
        if let Err(save_err) = state.save(&self.store).await {
            tracing::error!(run_id = %state.run_id, error = %save_err, "halt not persisted");
        }
        self.emit(
            PipelineEvent::new(PipelineEventKind::StageFailed, &state.run_id)
                .with_stage(stage)
                .with_data(serde_json::json!({
                    "error_kind": error_kind,
                    "attempts": attempts,
                })),
        )
        .await;
        Err(err)
    }

    async fn execute_run(
        &mut self,
        state: &mut RunState,
        pipeline: &mut Pipeline,
    ) -> Result<RunOutcome, PipelineError> {
        let rules = self.config.validation.clone();

        let request = ScoutSkill::request(&state.topic);
        let topic: TopicArtifact = self.execute(state, 0, request).await?;
        pipeline.advance();

        let request = ResearcherSkill::request(&topic, &rules);
        let research: ResearchArtifact = self.execute(state, 0, request).await?;
        pipeline.advance();

        let mut revision = 0u32;
        let mut notes: Option<RevisionNotes> = None;
        let (draft, revision) = loop {
            pipeline.resume_at(PipelineStage::Drafting, revision);
            state.revision = revision;

            let request = DraftingSkill::request(&topic, &research, notes.as_ref(), &rules);
            let draft: DraftArtifact = self.execute(state, revision, request).await?;
            pipeline.advance();

            let review = self.review(state, revision).await?;
            pipeline.advance();

            let consensus = self.decide(state, revision, &review).await?;
            state.last_decision = Some(consensus.result.clone());

            match consensus.result.decision {
                Decision::Approve => {
                    pipeline.advance();
                    break (draft, revision);
                }
                Decision::Reject => {
                    pipeline.reject();
                    return self.finish_rejected(state, false).await;
                }
                Decision::Revise => {
                    if !pipeline.revise() {
                        return self.finish_rejected(state, true).await;
                    }
                    self.emit(
                        PipelineEvent::new(PipelineEventKind::RevisionRequested, &state.run_id)
                            .with_data(serde_json::json!({
                                "revision": revision + 1,
                                "weighted_score": consensus.result.weighted_score,
                            })),
                    )
                    .await;
                    notes = Some(RevisionNotes::new(revision + 1, draft, &consensus));
                    revision += 1;
                }
            }
        };

        // Human gate
        let approval = self.approvals.load(&state.run_id).await?;
        let decision = approval.decision_for(revision);
        if decision.is_none() && approval.status.is_some() {
            tracing::warn!(
                run_id = %state.run_id,
                decided_revision = ?approval.revision,
                revision,
                "ignoring a gate decision made for another revision"
            );
        }
        match decision {
            None => {
                state.phase = RunPhase::AwaitingApproval;
                state.save(&self.store).await?;
                tracing::info!(run_id = %state.run_id, revision, "awaiting human approval");
                self.emit(
                    PipelineEvent::new(PipelineEventKind::AwaitingApproval, &state.run_id)
                        .with_stage(StageId::Consensus),
                )
                .await;
                return Ok(RunOutcome::AwaitingApproval);
            }
            Some(ApprovalStatus::Declined) => {
                state.phase = RunPhase::Declined;
                state.save(&self.store).await?;
                self.emit(PipelineEvent::new(PipelineEventKind::RunDeclined, &state.run_id))
                    .await;
                return Ok(RunOutcome::Declined);
            }
            Some(ApprovalStatus::Approved) => {}
        }
        pipeline.advance();

        let publish = match self.reuse::<PublishArtifact>(state, revision).await? {
            Some(publish) => publish,
            None => {
                self.package(state, &draft, revision, approval.note.as_deref())
                    .await?
            }
        };
        let path = self.export(&state.run_id, &publish).await?;
        pipeline.advance();

        let slug = publish.file_slug();
        state.phase = RunPhase::Published;
        state.published_slug = Some(slug.clone());
        state.published_path = Some(path.clone());
        state.save(&self.store).await?;

        tracing::info!(run_id = %state.run_id, slug = %slug, path = %path.display(), "published");
        self.emit(
            PipelineEvent::new(PipelineEventKind::Published, &state.run_id)
                .with_stage(StageId::Publish)
                .with_data(serde_json::json!({ "slug": slug, "path": path })),
        )
        .await;

        Ok(RunOutcome::Published { slug, path })
    }

    /// Reuse a persisted artifact or run the generating stage
    async fn execute<P: StagePayload>(
        &mut self,
        state: &mut RunState,
        revision: u32,
        request: GenerationRequest,
    ) -> Result<P, PipelineError> {
        if let Some(payload) = self.reuse::<P>(state, revision).await? {
            return Ok(payload);
        }

        self.emit(
            PipelineEvent::new(PipelineEventKind::StageStarted, &state.run_id)
                .with_stage(P::STAGE)
                .with_data(serde_json::json!({ "revision": revision })),
        )
        .await;

        let output = self
            .runner_for(P::STAGE)
            .run::<P>(&state.run_id, revision, request)
            .await?;
        self.complete(state, P::STAGE, revision, output.report.attempts)
            .await?;
        Ok(output.payload)
    }

    /// Publish the approved draft verbatim; the model only supplies the slug,
    /// meta description and tags
    async fn package(
        &mut self,
        state: &mut RunState,
        draft: &DraftArtifact,
        revision: u32,
        note: Option<&str>,
    ) -> Result<PublishArtifact, PipelineError> {
        self.emit(
            PipelineEvent::new(PipelineEventKind::StageStarted, &state.run_id)
                .with_stage(StageId::Publish)
                .with_data(serde_json::json!({ "revision": revision })),
        )
        .await;

        let runner = self.runner_for(StageId::Publish).clone();
        let rules = runner.rules().clone();
        let request = PublisherSkill::request(draft, note);
        let (metadata, report) = runner
            .generate_validated::<PublishMetadata, _>(StageId::Publish, request, |m| {
                m.validate(&rules)
            })
            .await?;

        let publish = PublishArtifact::from_approved(draft, revision, metadata);
        runner
            .persist(&state.run_id, revision, &publish)
            .await
            .map_err(|mut e| {
                e.attempts = report.attempts;
                e
            })?;
        tracing::info!(
            run_id = %state.run_id,
            revision,
            attempts = report.attempts,
            "approved draft packaged"
        );
        self.complete(state, StageId::Publish, revision, report.attempts)
            .await?;
        Ok(publish)
    }

    async fn reuse<P: StagePayload>(
        &mut self,
        state: &mut RunState,
        revision: u32,
    ) -> Result<Option<P>, PipelineError> {
        let Some(artifact) = self.store.find(&state.run_id, P::STAGE, revision).await? else {
            return Ok(None);
        };
        let payload = artifact.decode_payload::<P>()?;
        state.mark_validated(P::STAGE, revision);

        tracing::debug!(run_id = %state.run_id, stage = %P::STAGE, revision, "reusing artifact");
        self.emit(
            PipelineEvent::new(PipelineEventKind::StageReused, &state.run_id)
                .with_stage(P::STAGE)
                .with_data(serde_json::json!({ "revision": revision })),
        )
        .await;
        Ok(Some(payload))
    }

    async fn complete(
        &mut self,
        state: &mut RunState,
        stage: StageId,
        revision: u32,
        attempts: u32,
    ) -> Result<(), PipelineError> {
        state.mark_validated(stage, revision);
        state.save(&self.store).await?;
        self.emit(
            PipelineEvent::new(PipelineEventKind::StageCompleted, &state.run_id)
                .with_stage(stage)
                .with_data(serde_json::json!({ "revision": revision, "attempts": attempts })),
        )
        .await;
        Ok(())
    }

    /// Every persona assesses the draft concurrently; votes are joined before
    /// anything is persisted.
    async fn review(
        &mut self,
        state: &mut RunState,
        revision: u32,
    ) -> Result<ReviewArtifact, PipelineError> {
        if let Some(review) = self.reuse::<ReviewArtifact>(state, revision).await? {
            return Ok(review);
        }

        self.emit(
            PipelineEvent::new(PipelineEventKind::StageStarted, &state.run_id)
                .with_stage(StageId::Review)
                .with_data(serde_json::json!({ "revision": revision })),
        )
        .await;

        let draft_artifact = self.store.read(&state.run_id, StageId::Draft, revision).await?;
        let draft: DraftArtifact = draft_artifact.decode_payload()?;
        self.ledger.refresh().await?;
        let learned = self
            .ledger
            .active_patterns(self.config.ledger.min_occurrences)
            .await;

        let personas = self.config.personas.clone();
        let runner = self.runner_for(StageId::Review).clone();
        let assessments = join_all(personas.iter().map(|persona| {
            let request = ReviewerSkill::request(persona, &draft, &learned);
            let runner = &runner;
            async move {
                runner
                    .generate_validated::<PersonaAssessment, _>(StageId::Review, request, |a| {
                        a.violations()
                    })
                    .await
            }
        }))
        .await;

        let mut votes = Vec::with_capacity(personas.len());
        let mut attempts = 0;
        let mut first_error = None;
        for (persona, assessment) in personas.iter().zip(assessments) {
            match assessment {
                Ok((assessment, report)) => {
                    attempts += report.attempts;
                    votes.push(self.reviewer.review_with_assessment(
                        persona,
                        &draft_artifact,
                        &learned,
                        Some(&assessment),
                    ));
                }
                Err(err) => {
                    attempts += err.attempts;
                    tracing::warn!(
                        run_id = %state.run_id,
                        persona = %persona.id,
                        error = %err,
                        "assessment failed, recording a missing vote"
                    );
                    votes.push(self.reviewer.missing_vote(persona, &err));
                    first_error.get_or_insert(err);
                }
            }
        }
        // Nothing to aggregate when every persona failed
        if let Some(err) = first_error.filter(|_| votes.iter().all(|v| v.abstained)) {
            return Err(err.into());
        }

        for vote in &votes {
            self.emit(
                PipelineEvent::new(PipelineEventKind::PersonaReviewed, &state.run_id)
                    .with_stage(StageId::Review)
                    .with_data(serde_json::json!({
                        "persona": vote.persona_id,
                        "score": vote.score,
                        "verdict": vote.verdict,
                        "flags": vote.flags,
                        "abstained": vote.abstained,
                    })),
            )
            .await;
        }

        let review = ReviewArtifact {
            draft_revision: revision,
            votes,
        };
        self.runner_for(StageId::Review)
            .persist(&state.run_id, revision, &review)
            .await?;
        self.complete(state, StageId::Review, revision, attempts)
            .await?;
        Ok(review)
    }

    /// Aggregate votes, learn their findings, then persist the decision
    async fn decide(
        &mut self,
        state: &mut RunState,
        revision: u32,
        review: &ReviewArtifact,
    ) -> Result<ConsensusArtifact, PipelineError> {
        if let Some(consensus) = self.reuse::<ConsensusArtifact>(state, revision).await? {
            return Ok(consensus);
        }

        let approval = self.approvals.load(&state.run_id).await?;
        let engine = ConsensusEngine::new(self.config.consensus_policy(approval.resolved_flags));
        let result = engine.decide(&review.votes, &self.profiles);

        for vote in &review.votes {
            for finding in &vote.findings {
                let learned = self
                    .ledger
                    .learn_pattern(
                        &finding.pattern_id,
                        &finding.description,
                        finding.severity,
                        &finding.example,
                        &state.run_id,
                    )
                    .await?;
                if learned {
                    self.emit(
                        PipelineEvent::new(PipelineEventKind::PatternLearned, &state.run_id)
                            .with_data(serde_json::json!({
                                "pattern_id": finding.pattern_id,
                                "persona": vote.persona_id,
                            })),
                    )
                    .await;
                }
            }
        }

        let feedback = review
            .votes
            .iter()
            .filter(|v| v.verdict != Verdict::Approve || !v.flags.is_empty())
            .map(|v| {
                format!(
                    "{} ({}, {:.2}): {}",
                    v.persona_id, v.verdict, v.score, v.rationale
                )
            })
            .collect();

        let consensus = ConsensusArtifact {
            result,
            draft_revision: revision,
            feedback,
        };
        self.runner_for(StageId::Consensus)
            .persist(&state.run_id, revision, &consensus)
            .await?;

        tracing::info!(
            run_id = %state.run_id,
            revision,
            decision = %consensus.result.decision,
            weighted_score = consensus.result.weighted_score,
            "consensus reached"
        );
        self.complete(state, StageId::Consensus, revision, 0).await?;
        self.emit(
            PipelineEvent::new(PipelineEventKind::ConsensusReached, &state.run_id)
                .with_stage(StageId::Consensus)
                .with_data(serde_json::json!({
                    "decision": consensus.result.decision,
                    "weighted_score": consensus.result.weighted_score,
                    "dissenting": consensus.result.dissenting,
                    "unresolved_flags": consensus.result.unresolved_flags,
                })),
        )
        .await;
        Ok(consensus)
    }

    async fn finish_rejected(
        &mut self,
        state: &mut RunState,
        forced: bool,
    ) -> Result<RunOutcome, PipelineError> {
        state.phase = RunPhase::Rejected;
        state.forced_reject = forced;
        state.save(&self.store).await?;

        tracing::info!(run_id = %state.run_id, forced, "run rejected");
        self.emit(
            PipelineEvent::new(PipelineEventKind::RunRejected, &state.run_id)
                .with_data(serde_json::json!({ "forced": forced })),
        )
        .await;
        Ok(RunOutcome::Rejected { forced })
    }

    /// Render the publish artifact to `<output_dir>/<slug>.md`. A slug taken
    /// by another run gets the run id appended instead of being overwritten.
    async fn export(
        &self,
        run_id: &str,
        publish: &PublishArtifact,
    ) -> Result<PathBuf, PipelineError> {
        let dir = self.config.output_dir(&self.runtime_dir);
        let slug = publish.file_slug();
        let markdown = publish.to_markdown();

        let path = dir.join(format!("{}.md", slug));
        let created = io::write_new(&path, markdown.as_bytes())
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        if created {
            return Ok(path);
        }
        // Same document from an earlier attempt of this run
        if tokio::fs::read(&path).await.ok().as_deref() == Some(markdown.as_bytes()) {
            return Ok(path);
        }

        let path = dir.join(format!("{}-{}.md", slug, run_id));
        tracing::warn!(run_id, slug = %slug, "slug already published, suffixing with the run id");
        io::write_atomic(&path, markdown.as_bytes())
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

fn terminal_outcome(state: &RunState) -> RunOutcome {
    match state.phase {
        RunPhase::Published => RunOutcome::Published {
            slug: state.published_slug.clone().unwrap_or_default(),
            path: state.published_path.clone().unwrap_or_default(),
        },
        RunPhase::Declined => RunOutcome::Declined,
        _ => RunOutcome::Rejected {
            forced: state.forced_reject,
        },
    }
}
