//! # Artifact Store
//!
//! Versioned JSON documents handed between pipeline stages. One file per
//! `(run_id, stage, revision)` under `<runtime>/runs/<run_id>/`; files are
//! immutable once written.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::io;
use crate::error::StoreError;

/// Schema version stamped on every artifact this build writes
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

/// Identifier of a pipeline stage that produces an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Scout,
    Research,
    Draft,
    Review,
    Consensus,
    Publish,
}

impl StageId {
    /// All stages in pipeline order
    pub const ALL: [StageId; 6] = [
        StageId::Scout,
        StageId::Research,
        StageId::Draft,
        StageId::Review,
        StageId::Consensus,
        StageId::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scout => "scout",
            Self::Research => "research",
            Self::Draft => "draft",
            Self::Review => "review",
            Self::Consensus => "consensus",
            Self::Publish => "publish",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage's output, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub stage: StageId,
    pub schema_version: u32,
    /// Revision cycle this artifact belongs to (0 on the first pass)
    #[serde(default)]
    pub revision: u32,
    pub payload: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(stage: StageId, revision: u32, payload: Map<String, Value>) -> Self {
        Self {
            stage,
            schema_version: ARTIFACT_SCHEMA_VERSION,
            revision,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Build an artifact from a typed payload. The payload must serialize to a JSON object.
    pub fn from_payload<T: Serialize>(
        stage: StageId,
        revision: u32,
        payload: &T,
    ) -> Result<Self, StoreError> {
        match serde_json::to_value(payload) {
            Ok(Value::Object(map)) => Ok(Self::new(stage, revision, map)),
            Ok(other) => Err(StoreError::Payload {
                stage,
                source: serde::ser::Error::custom(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )),
            }),
            Err(source) => Err(StoreError::Payload { stage, source }),
        }
    }

    /// Deserialize the payload into its typed form
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(Value::Object(self.payload.clone())).map_err(|source| {
            StoreError::Payload {
                stage: self.stage,
                source,
            }
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// File-backed store for run artifacts. Downstream tooling may read these files
/// but only the pipeline writes them.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `<runtime>/runs`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted inside a runtime directory
    pub fn in_runtime(runtime_dir: &Path) -> Self {
        Self::new(runtime_dir.join("runs"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one run. Run ids are single path segments.
    pub fn run_dir(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        validate_run_id(run_id)?;
        Ok(self.root.join(run_id))
    }

    pub fn artifact_path(
        &self,
        run_id: &str,
        stage: StageId,
        revision: u32,
    ) -> Result<PathBuf, StoreError> {
        Ok(self
            .run_dir(run_id)?
            .join(format!("{}-r{}.json", stage.as_str(), revision)))
    }

    /// Persist an artifact. Refuses to overwrite an existing one.
    pub async fn write(&self, run_id: &str, artifact: &Artifact) -> Result<PathBuf, StoreError> {
        let path = self.artifact_path(run_id, artifact.stage, artifact.revision)?;
        let content = serde_json::to_vec_pretty(artifact).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;

        let created = io::write_new(&path, &content)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        if !created {
            return Err(StoreError::AlreadyExists {
                run_id: run_id.to_string(),
                stage: artifact.stage,
                revision: artifact.revision,
            });
        }

        tracing::debug!(
            run_id,
            stage = %artifact.stage,
            revision = artifact.revision,
            "artifact written"
        );
        Ok(path)
    }

    /// Read an artifact, failing when it is missing
    pub async fn read(
        &self,
        run_id: &str,
        stage: StageId,
        revision: u32,
    ) -> Result<Artifact, StoreError> {
        let path = self.artifact_path(run_id, stage, revision)?;
        self.find(run_id, stage, revision)
            .await?
            .ok_or(StoreError::NotFound(path))
    }

    /// Read an artifact if it exists
    pub async fn find(
        &self,
        run_id: &str,
        stage: StageId,
        revision: u32,
    ) -> Result<Option<Artifact>, StoreError> {
        let path = self.artifact_path(run_id, stage, revision)?;
        read_json(&path).await
    }

    /// Highest-revision artifact of a stage
    pub async fn latest(
        &self,
        run_id: &str,
        stage: StageId,
    ) -> Result<Option<Artifact>, StoreError> {
        let latest = self
            .list(run_id)
            .await?
            .into_iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, revision)| revision)
            .max();

        match latest {
            Some(revision) => self.find(run_id, stage, revision).await,
            None => Ok(None),
        }
    }

    /// All `(stage, revision)` pairs persisted for a run, in pipeline order
    pub async fn list(&self, run_id: &str) -> Result<Vec<(StageId, u32)>, StoreError> {
        let dir = self.run_dir(run_id)?;
        let files = io::list_files(&dir)
            .await
            .map_err(|source| StoreError::Io { path: dir, source })?;

        let mut found: Vec<(StageId, u32)> = files
            .iter()
            .filter_map(|name| parse_artifact_name(name))
            .collect();
        found.sort_by_key(|(stage, revision)| (*revision, *stage));
        Ok(found)
    }
}

fn validate_run_id(run_id: &str) -> Result<(), StoreError> {
    let valid = !run_id.is_empty()
        && !run_id.starts_with('.')
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidRunId(run_id.to_string()))
    }
}

/// Read and parse a JSON document, `None` when the file is missing
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|source| StoreError::Serde {
            path: path.to_path_buf(),
            source,
        })
}

/// `draft-r2.json` → `(Draft, 2)`
fn parse_artifact_name(name: &str) -> Option<(StageId, u32)> {
    let stem = name.strip_suffix(".json")?;
    let (stage, revision) = stem.rsplit_once("-r")?;
    Some((StageId::parse(stage)?, revision.parse().ok()?))
}
