//! Pressroom CLI
//!
//! Runs the editorial pipeline from the terminal: start a run, resume a halted
//! one, record the human gate decision, and inspect the skills ledger.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pressroom_core::state::{
    get_runtime_path, ApprovalManager, ArtifactStore, LedgerHandle, RunState, SkillsLedger, StageId,
};
use pressroom_core::swarm::{
    Coordinator, CoordinatorConfig, PipelineEvent, PipelineEventKind, RunOutcome, RunReport,
};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pressroom")]
#[command(author, version, about = "Pressroom - editorial pipeline with a reviewer board")]
struct Args {
    /// Runtime directory (defaults to $PRESSROOM_RUNTIME_PATH or ./.pressroom)
    #[arg(long, global = true)]
    runtime: Option<PathBuf>,

    /// Print every pipeline event as JSON
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Start a new run for a topic hint
    Run {
        /// What the piece should be about
        topic: String,
    },
    /// Continue a halted run from its persisted artifacts
    Resume { run_id: String },
    /// Record the human gate decision for a run
    Approve {
        run_id: String,
        /// Decline publication instead of approving it
        #[arg(long)]
        decline: bool,
        /// Note passed on to the publisher
        #[arg(short, long)]
        note: Option<String>,
        /// Who decided
        #[arg(long, env = "USER", default_value = "editor")]
        by: String,
    },
    /// Mark a review flag as resolved by a human
    ResolveFlag { run_id: String, flag: String },
    /// Show the state of a run
    Status { run_id: String },
    /// List learned skill patterns
    Patterns {
        /// Minimum occurrences (defaults to the configured threshold)
        #[arg(long)]
        min: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let runtime = args.runtime.clone().unwrap_or_else(get_runtime_path);

    let _ = dotenvy::from_path(runtime.join(".env"));
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pressroom=info,pressroom_core=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
    tracing::debug!(runtime = %runtime.display(), "using runtime directory");

    let config = CoordinatorConfig::load_or_default(&runtime)
        .await
        .with_context(|| format!("loading configuration from {}", runtime.display()))?;

    match args.command {
        CliCommand::Run { topic } => {
            println!("🚀 Starting run: {}", topic);
            let mut coordinator = build_coordinator(config, &runtime, args.verbose)?;
            let result = coordinator.run(&topic).await;
            print_result(result)
        }
        CliCommand::Resume { run_id } => {
            println!("🔁 Resuming run {}", run_id);
            let mut coordinator = build_coordinator(config, &runtime, args.verbose)?;
            let result = coordinator.resume(&run_id).await;
            print_result(result)
        }
        CliCommand::Approve {
            run_id,
            decline,
            note,
            by,
        } => {
            let store = existing_run(&runtime, &run_id).await?;
            let approvals = ApprovalManager::new(store);
            if decline {
                approvals.decline(&run_id, &by, note).await?;
                println!("✋ Run {} declined by {}", run_id, by);
            } else {
                approvals.approve(&run_id, &by, note).await?;
                println!("✅ Run {} approved by {}", run_id, by);
                println!("   Continue with: pressroom resume {}", run_id);
            }
            Ok(())
        }
        CliCommand::ResolveFlag { run_id, flag } => {
            let store = existing_run(&runtime, &run_id).await?;
            let record = ApprovalManager::new(store)
                .resolve_flag(&run_id, &flag)
                .await?;
            println!("Resolved flags for {}:", run_id);
            for flag in &record.resolved_flags {
                println!("  - {}", flag);
            }
            Ok(())
        }
        CliCommand::Status { run_id } => {
            let store = ArtifactStore::in_runtime(&runtime);
            let state = RunState::load(&store, &run_id)
                .await?
                .with_context(|| format!("run {} not found", run_id))?;
            print_status(&store, &state).await
        }
        CliCommand::Patterns { min } => {
            let ledger = SkillsLedger::load(config.ledger_path(&runtime))?;
            let min = min.unwrap_or(config.ledger.min_occurrences);
            let patterns = ledger.active_patterns(min);
            if patterns.is_empty() {
                println!("No patterns seen at least {} time(s)", min);
            }
            for pattern in patterns {
                println!(
                    "{} [{}] x{}: {}",
                    pattern.pattern_id,
                    pattern.severity.as_str(),
                    pattern.occurrence_count(),
                    pattern.description
                );
                for example in &pattern.examples {
                    println!("    e.g. {:?}", example);
                }
            }
            Ok(())
        }
    }
}

fn build_coordinator(
    config: CoordinatorConfig,
    runtime: &Path,
    verbose: bool,
) -> Result<Coordinator> {
    let generator = config
        .model
        .create_generator()
        .context("creating the default generator")?;

    let mut overrides = Vec::new();
    for (stage, model) in &config.per_stage_models {
        let stage = StageId::parse(stage).with_context(|| format!("unknown stage '{}'", stage))?;
        let generator = model
            .create_generator()
            .with_context(|| format!("creating the generator for {}", stage))?;
        overrides.push((stage, generator));
    }

    let ledger = SkillsLedger::load(config.ledger_path(runtime))?
        .with_max_examples(config.ledger.max_examples);

    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(print_events(rx, verbose));

    let mut coordinator = Coordinator::new(config, generator, LedgerHandle::new(ledger), runtime)?
        .with_event_channel(tx);
    for (stage, generator) in overrides {
        coordinator = coordinator.with_stage_generator(stage, generator);
    }
    Ok(coordinator)
}

async fn print_events(mut rx: mpsc::Receiver<PipelineEvent>, verbose: bool) {
    while let Some(event) = rx.recv().await {
        if verbose {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
            continue;
        }
        match event.kind {
            PipelineEventKind::StageCompleted | PipelineEventKind::StageReused => {
                let stage = event.stage.map(|s| s.to_string()).unwrap_or_default();
                let reused = event.kind == PipelineEventKind::StageReused;
                println!("   • {}{}", stage, if reused { " (reused)" } else { "" });
            }
            PipelineEventKind::ConsensusReached => {
                if let Some(data) = &event.data {
                    println!(
                        "   ⚖ consensus: {} ({:.2})",
                        data["decision"].as_str().unwrap_or("?"),
                        data["weighted_score"].as_f64().unwrap_or(0.0)
                    );
                }
            }
            PipelineEventKind::RevisionRequested => println!("   ↺ revision requested"),
            _ => {}
        }
    }
}

fn print_result(result: Result<RunReport, pressroom_core::PipelineError>) -> Result<()> {
    let report = match result {
        Ok(report) => report,
        Err(pressroom_core::PipelineError::Stage(err)) => {
            eprintln!("❌ Run halted: {}", err);
            eprintln!("   Fix the cause, then: pressroom resume <run_id>");
            bail!("stage {} failed", err.stage);
        }
        Err(other) => return Err(other.into()),
    };

    println!("Run {}", report.run_id);
    match &report.outcome {
        RunOutcome::AwaitingApproval => {
            println!("⏸  Awaiting human approval");
            println!("   pressroom approve {}", report.run_id);
        }
        RunOutcome::Published { slug, path } => {
            println!("✅ Published '{}' to {}", slug, path.display());
        }
        RunOutcome::Rejected { forced } => {
            if *forced {
                println!("❌ Rejected after too many revisions");
            } else {
                println!("❌ Rejected by the review board");
            }
        }
        RunOutcome::Declined => println!("✋ Declined at the human gate"),
    }
    if let Some(decision) = &report.state.last_decision {
        println!(
            "   Last decision: {} ({:.2}, {:?})",
            decision.decision, decision.weighted_score, decision.rule
        );
        for flag in &decision.unresolved_flags {
            println!("   ⚑ {}", flag);
        }
    }
    Ok(())
}

async fn existing_run(runtime: &Path, run_id: &str) -> Result<ArtifactStore> {
    let store = ArtifactStore::in_runtime(runtime);
    if RunState::load(&store, run_id).await?.is_none() {
        bail!("run {} not found under {}", run_id, runtime.display());
    }
    Ok(store)
}

async fn print_status(store: &ArtifactStore, state: &RunState) -> Result<()> {
    println!("Run {}", state.run_id);
    println!("   Topic:    {}", state.topic);
    println!("   Phase:    {}", state.phase.as_str());
    println!("   Revision: {}", state.revision);
    if let Some(halt) = &state.halt {
        println!(
            "   Halted at {} after {} attempt(s): {} ({})",
            halt.stage, halt.attempts, halt.error_kind, halt.excerpt
        );
    }
    if let Some(path) = &state.published_path {
        println!("   Published: {}", path.display());
    }
    println!("   Artifacts:");
    for (stage, revision) in store.list(&state.run_id).await? {
        println!("     {}-r{}", stage, revision);
    }
    Ok(())
}
