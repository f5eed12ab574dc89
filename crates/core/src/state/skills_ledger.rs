//! # Skills Ledger
//!
//! Quality patterns learned across runs. Each pattern is an append-only
//! occurrence log keyed by `pattern_id`; the reviewer turns active patterns
//! into extra review criteria on later runs.
//!
//! Several `pressroom` processes may share one ledger file. Every learn call
//! takes an exclusive lock on `<ledger>.lock`, re-reads the file, records the
//! occurrence and writes the result back with [`io::write_atomic`]. In-memory
//! state only moves forward after that write succeeds, so a failed flush
//! changes nothing.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::io;
use crate::error::LedgerError;

/// Current on-disk format version
const LEDGER_VERSION: u32 = 1;

/// Default number of examples retained per pattern
pub const DEFAULT_MAX_EXAMPLES: usize = 5;

/// How much a learned pattern matters
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    Architectural,
    BestPractice,
}

impl Severity {
    /// Ordering rank, highest first: architectural > medium > best_practice > low
    pub fn rank(&self) -> u8 {
        match self {
            Self::Architectural => 3,
            Self::Medium => 2,
            Self::BestPractice => 1,
            Self::Low => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::Architectural => "architectural",
            Self::BestPractice => "best_practice",
        }
    }
}

/// One sighting of a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A recurring quality issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillPattern {
    pub pattern_id: String,
    pub description: String,
    pub severity: Severity,
    pub occurrences: Vec<Occurrence>,
    pub examples: Vec<String>,
}

impl SkillPattern {
    pub fn occurrence_count(&self) -> usize {
        self.occurrences.len()
    }

    /// Review signal the pattern is namespaced under (`"clarity:jargon"` → `"clarity"`)
    pub fn signal(&self) -> &str {
        self.pattern_id
            .split_once(':')
            .map(|(signal, _)| signal)
            .unwrap_or(&self.pattern_id)
    }

    pub fn seen_in(&self, run_id: &str) -> bool {
        self.occurrences.iter().any(|o| o.run_id == run_id)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default)]
    patterns: BTreeMap<String, SkillPattern>,
}

/// The learned-pattern ledger. Shared within a process through [`LedgerHandle`].
#[derive(Debug)]
pub struct SkillsLedger {
    path: Option<PathBuf>,
    patterns: BTreeMap<String, SkillPattern>,
    max_examples: usize,
}

impl SkillsLedger {
    /// A ledger that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            patterns: BTreeMap::new(),
            max_examples: DEFAULT_MAX_EXAMPLES,
        }
    }

    /// Load the ledger file. A missing file is an empty ledger; a corrupt one is fatal.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let patterns = match std::fs::read_to_string(&path) {
            Ok(content) => parse_ledger(&path, &content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(LedgerError::Read { path, source }),
        };

        tracing::debug!(path = %path.display(), patterns = patterns.len(), "skills ledger loaded");
        Ok(Self {
            path: Some(path),
            patterns,
            max_examples: DEFAULT_MAX_EXAMPLES,
        })
    }

    /// Set how many recent examples each pattern keeps
    pub fn with_max_examples(mut self, max_examples: usize) -> Self {
        self.max_examples = max_examples.max(1);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, pattern_id: &str) -> Option<&SkillPattern> {
        self.patterns.get(pattern_id)
    }

    /// Re-read the ledger file to pick up what other processes learned
    pub async fn refresh(&mut self) -> Result<(), LedgerError> {
        if let Some(path) = &self.path {
            self.patterns = read_ledger(path).await?;
        }
        Ok(())
    }

    /// Upsert a pattern occurrence.
    ///
    /// Returns `false` when `(pattern_id, run_id)` was already recorded; replaying
    /// a run never double-counts.
    pub async fn learn_pattern(
        &mut self,
        pattern_id: &str,
        description: &str,
        severity: Severity,
        example: &str,
        run_id: &str,
    ) -> Result<bool, LedgerError> {
        let Some(path) = self.path.clone() else {
            return Ok(record_occurrence(
                &mut self.patterns,
                self.max_examples,
                pattern_id,
                description,
                severity,
                example,
                run_id,
            ));
        };

        let _lock = LedgerLock::acquire(&path).await?;
        let mut next = read_ledger(&path).await?;
        let learned = record_occurrence(
            &mut next,
            self.max_examples,
            pattern_id,
            description,
            severity,
            example,
            run_id,
        );
        if learned {
            flush(&path, &next).await?;
        }
        self.patterns = next;
        Ok(learned)
    }

    /// Patterns seen at least `min_occurrences` times, most severe and most
    /// frequent first
    pub fn active_patterns(&self, min_occurrences: usize) -> Vec<SkillPattern> {
        let mut active: Vec<SkillPattern> = self
            .patterns
            .values()
            .filter(|p| p.occurrence_count() >= min_occurrences)
            .cloned()
            .collect();

        active.sort_by(|a, b| {
            b.severity
                .rank()
                .cmp(&a.severity.rank())
                .then_with(|| b.occurrence_count().cmp(&a.occurrence_count()))
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });
        active
    }
}

/// Apply one sighting to a pattern map. `false` when the run was already counted.
fn record_occurrence(
    patterns: &mut BTreeMap<String, SkillPattern>,
    max_examples: usize,
    pattern_id: &str,
    description: &str,
    severity: Severity,
    example: &str,
    run_id: &str,
) -> bool {
    let pattern = patterns
        .entry(pattern_id.to_string())
        .or_insert_with(|| SkillPattern {
            pattern_id: pattern_id.to_string(),
            description: description.to_string(),
            severity,
            occurrences: Vec::new(),
            examples: Vec::new(),
        });
    if pattern.seen_in(run_id) {
        return false;
    }

    if severity.rank() > pattern.severity.rank() {
        pattern.severity = severity;
    }
    pattern.occurrences.push(Occurrence {
        run_id: run_id.to_string(),
        timestamp: Utc::now(),
    });

    let example = example.trim();
    if !example.is_empty() {
        pattern.examples.retain(|e| e != example);
        pattern.examples.push(example.to_string());
        let overflow = pattern.examples.len().saturating_sub(max_examples);
        pattern.examples.drain(..overflow);
    }
    true
}

async fn read_ledger(path: &Path) -> Result<BTreeMap<String, SkillPattern>, LedgerError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => parse_ledger(path, &content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(source) => Err(LedgerError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn flush(path: &Path, patterns: &BTreeMap<String, SkillPattern>) -> Result<(), LedgerError> {
    let file = LedgerFile {
        version: LEDGER_VERSION,
        patterns: patterns.clone(),
    };
    let content = serde_json::to_vec_pretty(&file).map_err(|e| LedgerError::Flush {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;

    io::write_atomic(path, &content)
        .await
        .map_err(|source| LedgerError::Flush {
            path: path.to_path_buf(),
            source,
        })
}

fn parse_ledger(path: &Path, content: &str) -> Result<BTreeMap<String, SkillPattern>, LedgerError> {
    let file: LedgerFile = serde_json::from_str(content).map_err(|e| LedgerError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if file.version > LEDGER_VERSION {
        return Err(LedgerError::Corrupt {
            path: path.to_path_buf(),
            reason: format!(
                "unsupported ledger version {} (max {})",
                file.version, LEDGER_VERSION
            ),
        });
    }

    for (key, pattern) in &file.patterns {
        if key != &pattern.pattern_id {
            return Err(LedgerError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("entry '{}' holds pattern '{}'", key, pattern.pattern_id),
            });
        }
    }

    Ok(file.patterns)
}

/// `skills.json` → `skills.json.lock`
fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("skills.json"));
    name.push(".lock");
    path.with_file_name(name)
}

/// Exclusive advisory lock on the ledger's lock file, released on drop
struct LedgerLock {
    _file: File,
}

impl LedgerLock {
    async fn acquire(ledger_path: &Path) -> Result<Self, LedgerError> {
        let lock_path = lock_path_for(ledger_path);
        let acquired = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            if let Some(dir) = lock_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)?;
            // Blocks until other writers release the lock
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .unwrap_or_else(|join| Err(std::io::Error::new(std::io::ErrorKind::Other, join)));

        acquired
            .map(|file| Self { _file: file })
            .map_err(|source| LedgerError::Lock {
                path: ledger_path.to_path_buf(),
                source,
            })
    }
}

/// Shared access to the ledger.
///
/// Concurrent pipeline runs in one process share a handle and every learn
/// call takes the lock. Runs in other processes are serialized by the file
/// lock, so occurrence counts are never lost.
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    inner: Arc<Mutex<SkillsLedger>>,
}

impl LedgerHandle {
    pub fn new(ledger: SkillsLedger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(SkillsLedger::in_memory())
    }

    pub async fn learn_pattern(
        &self,
        pattern_id: &str,
        description: &str,
        severity: Severity,
        example: &str,
        run_id: &str,
    ) -> Result<bool, LedgerError> {
        let mut ledger = self.inner.lock().await;
        ledger
            .learn_pattern(pattern_id, description, severity, example, run_id)
            .await
    }

    pub async fn refresh(&self) -> Result<(), LedgerError> {
        self.inner.lock().await.refresh().await
    }

    /// Read-only snapshot of the active patterns
    pub async fn active_patterns(&self, min_occurrences: usize) -> Vec<SkillPattern> {
        self.inner.lock().await.active_patterns(min_occurrences)
    }

    pub async fn get(&self, pattern_id: &str) -> Option<SkillPattern> {
        self.inner.lock().await.get(pattern_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_learn_is_idempotent_per_run() {
        let mut ledger = SkillsLedger::in_memory();

        assert!(ledger
            .learn_pattern(
                "tone:delve",
                "Overused filler verb",
                Severity::BestPractice,
                "delve",
                "run-1",
            )
            .await
            .unwrap());
        assert!(!ledger
            .learn_pattern(
                "tone:delve",
                "Overused filler verb",
                Severity::BestPractice,
                "delve",
                "run-1",
            )
            .await
            .unwrap());

        assert_eq!(ledger.get("tone:delve").unwrap().occurrence_count(), 1);

        ledger
            .learn_pattern(
                "tone:delve",
                "Overused filler verb",
                Severity::BestPractice,
                "delve into",
                "run-2",
            )
            .await
            .unwrap();
        let pattern = ledger.get("tone:delve").unwrap();
        assert_eq!(pattern.occurrence_count(), 2);
        assert_eq!(pattern.examples, vec!["delve".to_string(), "delve into".to_string()]);
    }

    #[tokio::test]
    async fn test_examples_keep_most_recent() {
        let mut ledger = SkillsLedger::in_memory().with_max_examples(2);
        for i in 0..4 {
            ledger
                .learn_pattern(
                    "clarity:jargon",
                    "Jargon",
                    Severity::Medium,
                    &format!("term-{i}"),
                    &format!("run-{i}"),
                )
                .await
                .unwrap();
        }
        let pattern = ledger.get("clarity:jargon").unwrap();
        assert_eq!(pattern.examples, vec!["term-2".to_string(), "term-3".to_string()]);
        assert_eq!(pattern.occurrence_count(), 4);
    }

    #[tokio::test]
    async fn test_active_patterns_ordering() {
        let mut ledger = SkillsLedger::in_memory();
        for run in ["a", "b", "c"] {
            ledger.learn_pattern("tone:hype", "Hype", Severity::Low, "", run).await.unwrap();
        }
        for run in ["a", "b"] {
            ledger
                .learn_pattern(
                    "disclosure:missing",
                    "No disclosure",
                    Severity::Architectural,
                    "",
                    run,
                )
                .await
                .unwrap();
            ledger
                .learn_pattern("clarity:passive", "Passive voice", Severity::Medium, "", run)
                .await
                .unwrap();
        }
        for run in ["a", "b", "c"] {
            ledger
                .learn_pattern("clarity:jargon", "Jargon", Severity::Medium, "", run)
                .await
                .unwrap();
        }
        ledger.learn_pattern("tone:rare", "Rare", Severity::Architectural, "", "a").await.unwrap();

        let ids: Vec<String> = ledger
            .active_patterns(2)
            .into_iter()
            .map(|p| p.pattern_id)
            .collect();
        assert_eq!(
            ids,
            vec!["disclosure:missing", "clarity:jargon", "clarity:passive", "tone:hype"]
        );
    }

    #[tokio::test]
    async fn test_severity_only_escalates() {
        let mut ledger = SkillsLedger::in_memory();
        ledger.learn_pattern("verification:x", "x", Severity::Medium, "", "a").await.unwrap();
        ledger.learn_pattern("verification:x", "x", Severity::Low, "", "b").await.unwrap();
        assert_eq!(ledger.get("verification:x").unwrap().severity, Severity::Medium);
        ledger
            .learn_pattern("verification:x", "x", Severity::Architectural, "", "c")
            .await
            .unwrap();
        assert_eq!(ledger.get("verification:x").unwrap().severity, Severity::Architectural);
    }

    #[tokio::test]
    async fn test_persisted_ledger_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skills.json");

        let mut ledger = SkillsLedger::load(&path).unwrap();
        assert!(ledger.is_empty());
        ledger
            .learn_pattern("tone:delve", "Filler", Severity::BestPractice, "delve", "run-1")
            .await
            .unwrap();

        let reloaded = SkillsLedger::load(&path).unwrap();
        assert_eq!(reloaded.get("tone:delve").unwrap().occurrence_count(), 1);
    }

    #[test]
    fn test_corrupt_ledger_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skills.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = SkillsLedger::load(&path).unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { .. }));
        // The corrupt file is left untouched for a human to inspect
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn test_failed_learn_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skills.json");
        let mut ledger = SkillsLedger::load(&path).unwrap();
        // A directory where the ledger file should be
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let err = ledger
            .learn_pattern("tone:delve", "Filler", Severity::Low, "delve", "run-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Read { .. }));
        assert!(ledger.is_empty());
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_separately_loaded_ledgers_do_not_lose_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skills.json");

        let mut first = SkillsLedger::load(&path).unwrap();
        let mut second = SkillsLedger::load(&path).unwrap();
        first
            .learn_pattern("p1", "Pattern", Severity::Low, "x", "run-a")
            .await
            .unwrap();
        second
            .learn_pattern("p1", "Pattern", Severity::Low, "y", "run-b")
            .await
            .unwrap();

        let reloaded = SkillsLedger::load(&path).unwrap();
        assert_eq!(reloaded.get("p1").unwrap().occurrence_count(), 2);
        // The second writer merged on top of the first
        assert_eq!(second.get("p1").unwrap().examples, vec!["x".to_string(), "y".to_string()]);

        first.refresh().await.unwrap();
        assert_eq!(first.get("p1").unwrap().occurrence_count(), 2);
    }

    #[tokio::test]
    async fn test_parallel_writers_on_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skills.json");

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                tokio::spawn(async move {
                    let mut ledger = SkillsLedger::load(&path).unwrap();
                    ledger
                        .learn_pattern("tone:hype", "Hype", Severity::Low, "", &format!("run-{i}"))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }

        let reloaded = SkillsLedger::load(&path).unwrap();
        assert_eq!(reloaded.get("tone:hype").unwrap().occurrence_count(), 8);

        // Only the ledger and its lock file remain; no temp files
        let files = io::list_files(dir.path()).await.unwrap();
        assert_eq!(files, vec!["skills.json".to_string(), "skills.json.lock".to_string()]);
    }

    #[test]
    fn test_lock_path() {
        assert_eq!(
            lock_path_for(Path::new("/data/skills.json")),
            PathBuf::from("/data/skills.json.lock")
        );
    }

    #[tokio::test]
    async fn test_handle_serializes_concurrent_learns() {
        let handle = LedgerHandle::in_memory();
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    handle
                        .learn_pattern("tone:hype", "Hype", Severity::Low, "", &format!("run-{i}"))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(handle.get("tone:hype").await.unwrap().occurrence_count(), 16);
    }
}
