//! Tracking storage backends
//!
//! Provides the `TrackingBackend` trait, a JSON file store for local
//! tracking URIs and an in-memory store for tests.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{Run, RunStatus};

/// Errors from tracking storage operations
#[derive(Debug, thiserror::Error)]
pub enum TrackingStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Invalid artifact path: {0:?}")]
    InvalidArtifactPath(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tracking server returned HTTP {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Unexpected tracking server response: {0}")]
    Response(String),
}

/// Result alias for tracking storage operations
pub type Result<T> = std::result::Result<T, TrackingStorageError>;

/// A registered model version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    /// Registered model name
    pub name: String,
    /// Version assigned by the registry
    pub version: String,
    /// Run that produced the model
    pub run_id: String,
    /// Artifact location the version points at
    pub source: String,
}

/// Serializable snapshot of a run for persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub run_name: Option<String>,
    pub experiment_name: String,
    pub status: RunStatus,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, Vec<MetricEntry>>,
    pub artifacts: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub start_time_ms: Option<u64>,
    pub end_time_ms: Option<u64>,
}

/// A single metric data point for serialization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricEntry {
    pub value: f64,
    pub step: u64,
}

impl From<&Run> for RunRecord {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.run_id.clone(),
            run_name: run.run_name.clone(),
            experiment_name: run.experiment_name.clone(),
            status: run.status,
            params: run.params.clone(),
            metrics: run
                .metrics
                .iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        v.iter()
                            .map(|(val, step)| MetricEntry {
                                value: *val,
                                step: *step,
                            })
                            .collect(),
                    )
                })
                .collect(),
            artifacts: run.artifacts.clone(),
            tags: run.tags.clone(),
            start_time_ms: run.start_time_ms,
            end_time_ms: run.end_time_ms,
        }
    }
}

impl RunRecord {
    /// Convert back into a `Run`
    #[must_use]
    pub fn into_run(self) -> Run {
        Run {
            run_id: self.run_id,
            run_name: self.run_name,
            experiment_name: self.experiment_name,
            status: self.status,
            params: self.params,
            metrics: self
                .metrics
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().map(|e| (e.value, e.step)).collect()))
                .collect(),
            artifacts: self.artifacts,
            tags: self.tags,
            start_time_ms: self.start_time_ms,
            end_time_ms: self.end_time_ms,
        }
    }
}

/// Reject absolute paths and parent-directory components
///
/// # Errors
///
/// Returns `TrackingStorageError::InvalidArtifactPath` for anything that is
/// not a plain relative path.
pub fn validate_artifact_path(artifact_path: &str) -> Result<&Path> {
    let path = Path::new(artifact_path);
    let plain = !artifact_path.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if plain {
        Ok(path)
    } else {
        Err(TrackingStorageError::InvalidArtifactPath(
            artifact_path.to_string(),
        ))
    }
}

/// Trait for tracking storage backends
///
/// Implementations persist and retrieve runs and their artifacts. Stores
/// with a model registry also accept registrations.
pub trait TrackingBackend: std::fmt::Debug {
    /// Save a run to the backend
    fn save_run(&mut self, run: &Run) -> Result<()>;

    /// Load a run by its ID
    fn load_run(&self, run_id: &str) -> Result<Run>;

    /// List all stored runs
    fn list_runs(&self) -> Result<Vec<Run>>;

    /// Store artifact bytes for a run, returning the artifact location
    fn save_artifact(&mut self, run: &Run, artifact_path: &str, bytes: &[u8]) -> Result<String>;

    /// Register a logged artifact under a model name
    ///
    /// Stores without a registry return an error.
    fn register_model(&mut self, name: &str, run: &Run, artifact_path: &str)
        -> Result<ModelVersion>;

    /// Whether this store has a model registry
    fn supports_registry(&self) -> bool {
        false
    }

    /// Human-readable store location for log and error messages
    fn describe(&self) -> String;
}

impl<B: TrackingBackend + ?Sized> TrackingBackend for Box<B> {
    fn save_run(&mut self, run: &Run) -> Result<()> {
        (**self).save_run(run)
    }

    fn load_run(&self, run_id: &str) -> Result<Run> {
        (**self).load_run(run_id)
    }

    fn list_runs(&self) -> Result<Vec<Run>> {
        (**self).list_runs()
    }

    fn save_artifact(&mut self, run: &Run, artifact_path: &str, bytes: &[u8]) -> Result<String> {
        (**self).save_artifact(run, artifact_path, bytes)
    }

    fn register_model(
        &mut self,
        name: &str,
        run: &Run,
        artifact_path: &str,
    ) -> Result<ModelVersion> {
        (**self).register_model(name, run, artifact_path)
    }

    fn supports_registry(&self) -> bool {
        (**self).supports_registry()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// JSON file-based tracking backend
///
/// Layout under the root directory:
///
/// ```text
/// {run_id}/run.json
/// {run_id}/artifacts/{artifact_path}
/// ```
#[derive(Debug)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    /// Create a new JSON file backend; the directory is created on first write
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Root directory of the store
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.dir.join(run_id)
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("run.json")
    }

    /// Location of a stored artifact
    #[must_use]
    pub fn artifact_path(&self, run_id: &str, artifact_path: &str) -> PathBuf {
        self.run_dir(run_id).join("artifacts").join(artifact_path)
    }
}

impl TrackingBackend for JsonFileBackend {
    fn save_run(&mut self, run: &Run) -> Result<()> {
        fs::create_dir_all(self.run_dir(&run.run_id))?;
        let record = RunRecord::from(run);
        let json = serde_json::to_string_pretty(&record)?;
        fs::write(self.run_path(&run.run_id), json)?;
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<Run> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Err(TrackingStorageError::RunNotFound(run_id.to_string()));
        }
        let json = fs::read_to_string(path)?;
        let record: RunRecord = serde_json::from_str(&json)?;
        Ok(record.into_run())
    }

    fn list_runs(&self) -> Result<Vec<Run>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path().join("run.json");
            if path.is_file() {
                let json = fs::read_to_string(&path)?;
                let record: RunRecord = serde_json::from_str(&json)?;
                runs.push(record.into_run());
            }
        }
        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(runs)
    }

    fn save_artifact(&mut self, run: &Run, artifact_path: &str, bytes: &[u8]) -> Result<String> {
        validate_artifact_path(artifact_path)?;
        let path = self.artifact_path(&run.run_id, artifact_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }

    fn register_model(
        &mut self,
        name: &str,
        _run: &Run,
        _artifact_path: &str,
    ) -> Result<ModelVersion> {
        Err(TrackingStorageError::Response(format!(
            "file store {} cannot register model {name}",
            self.dir.display()
        )))
    }

    fn describe(&self) -> String {
        format!("file:{}", self.dir.display())
    }
}

/// In-memory tracking backend for testing
///
/// Stores runs and artifacts in maps. Registry support is opt-in.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    runs: HashMap<String, RunRecord>,
    artifacts: BTreeMap<(String, String), Vec<u8>>,
    registry: Option<Vec<ModelVersion>>,
}

impl InMemoryBackend {
    /// Store without a model registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with a model registry
    #[must_use]
    pub fn with_registry() -> Self {
        Self {
            registry: Some(Vec::new()),
            ..Self::default()
        }
    }

    /// Stored artifact bytes
    #[must_use]
    pub fn artifact(&self, run_id: &str, artifact_path: &str) -> Option<&[u8]> {
        self.artifacts
            .get(&(run_id.to_string(), artifact_path.to_string()))
            .map(Vec::as_slice)
    }

    /// Registered model versions, in registration order
    #[must_use]
    pub fn registered_models(&self) -> &[ModelVersion] {
        self.registry.as_deref().unwrap_or_default()
    }
}

impl TrackingBackend for InMemoryBackend {
    fn save_run(&mut self, run: &Run) -> Result<()> {
        self.runs.insert(run.run_id.clone(), RunRecord::from(run));
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<Run> {
        self.runs
            .get(run_id)
            .map(|r| r.clone().into_run())
            .ok_or_else(|| TrackingStorageError::RunNotFound(run_id.to_string()))
    }

    fn list_runs(&self) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self.runs.values().map(|r| r.clone().into_run()).collect();
        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(runs)
    }

    fn save_artifact(&mut self, run: &Run, artifact_path: &str, bytes: &[u8]) -> Result<String> {
        validate_artifact_path(artifact_path)?;
        self.artifacts.insert(
            (run.run_id.clone(), artifact_path.to_string()),
            bytes.to_vec(),
        );
        Ok(format!("memory:{}/{artifact_path}", run.run_id))
    }

    fn register_model(
        &mut self,
        name: &str,
        run: &Run,
        artifact_path: &str,
    ) -> Result<ModelVersion> {
        let registry = self.registry.as_mut().ok_or_else(|| {
            TrackingStorageError::Response(format!("in-memory store cannot register {name}"))
        })?;
        let version = registry.iter().filter(|v| v.name == name).count() + 1;
        let model_version = ModelVersion {
            name: name.to_string(),
            version: version.to_string(),
            run_id: run.run_id.clone(),
            source: format!("runs:/{}/{artifact_path}", run.run_id),
        };
        registry.push(model_version.clone());
        Ok(model_version)
    }

    fn supports_registry(&self) -> bool {
        self.registry.is_some()
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
