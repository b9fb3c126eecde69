//! Experiment tracking sink.
//!
//! Records the parameters, metrics and model artifact of an evaluation run.
//! Persistence goes through the [`TrackingBackend`](storage::TrackingBackend)
//! trait; the store kind is picked from the tracking URI scheme.
//!
//! - **`ExperimentTracker`**: handle that manages runs for one experiment
//! - **`Run`**: one evaluation run with params, metrics, artifacts and tags
//! - **`TrackingBackend`**: local JSON files, in-memory, or an MLflow server
//!
//! # Example
//!
//! ```
//! use model_select_eval::tracking::{ExperimentTracker, RunStatus};
//! use model_select_eval::tracking::storage::InMemoryBackend;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let mut tracker = ExperimentTracker::new("model-evaluation", InMemoryBackend::new());
//!
//! let run_id = tracker.start_run(Some("evaluate"))?;
//! tracker.log_param(&run_id, "alpha", "0.5")?;
//! tracker.log_metric(&run_id, "r2_score", 0.91, 0)?;
//! tracker.end_run(&run_id, RunStatus::Completed)?;
//!
//! let run = tracker.get_run(&run_id)?;
//! assert_eq!(run.status, RunStatus::Completed);
//! # Ok(())
//! # }
//! ```

pub mod rest;
pub mod storage;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use rest::MlflowRestBackend;
use storage::{JsonFileBackend, ModelVersion, TrackingBackend, TrackingStorageError};

/// Status of a tracking run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is actively recording
    Active,
    /// Run completed successfully
    Completed,
    /// Run failed
    Failed,
    /// Run was cancelled
    Cancelled,
}

impl RunStatus {
    /// MLflow run status name
    #[must_use]
    pub const fn as_mlflow(&self) -> &'static str {
        match self {
            Self::Active => "RUNNING",
            Self::Completed => "FINISHED",
            Self::Failed => "FAILED",
            Self::Cancelled => "KILLED",
        }
    }

    /// Parse an MLflow run status name
    #[must_use]
    pub fn from_mlflow(status: &str) -> Option<Self> {
        match status {
            "RUNNING" | "SCHEDULED" => Some(Self::Active),
            "FINISHED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "KILLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A single tracking run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for the run
    pub run_id: String,
    /// Optional human-readable name
    pub run_name: Option<String>,
    /// Parent experiment name
    pub experiment_name: String,
    /// Current status
    pub status: RunStatus,
    /// Hyperparameters: key -> value (string-encoded)
    pub params: BTreeMap<String, String>,
    /// Metrics: key -> list of (value, step)
    pub metrics: BTreeMap<String, Vec<(f64, u64)>>,
    /// Artifact paths relative to the run's artifact root
    pub artifacts: Vec<String>,
    /// Tags: key -> value
    pub tags: BTreeMap<String, String>,
    /// Unix timestamp (ms) when the run started
    pub start_time_ms: Option<u64>,
    /// Unix timestamp (ms) when the run ended
    pub end_time_ms: Option<u64>,
}

impl Run {
    fn new(run_id: String, run_name: Option<String>, experiment_name: String) -> Self {
        Self {
            run_id,
            run_name,
            experiment_name,
            status: RunStatus::Active,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: Vec::new(),
            tags: BTreeMap::new(),
            start_time_ms: Some(now_ms()),
            end_time_ms: None,
        }
    }

    /// Most recently logged value of a metric
    #[must_use]
    pub fn latest_metric(&self, key: &str) -> Option<f64> {
        self.metrics
            .get(key)
            .and_then(|values| values.last())
            .map(|(value, _)| *value)
    }
}

pub(crate) fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Errors from experiment tracking operations
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run is not active: {0}")]
    RunNotActive(String),

    #[error("Tracking store at {0} has no model registry")]
    RegistryUnsupported(String),

    #[error("Unsupported tracking URI: {0}")]
    UnsupportedUri(String),

    #[error("Storage error: {0}")]
    Storage(#[from] TrackingStorageError),
}

impl TrackingError {
    /// Error classification
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RegistryUnsupported(_) | Self::UnsupportedUri(_) => ErrorKind::Configuration,
            Self::RunNotFound(_) | Self::RunNotActive(_) | Self::Storage(_) => ErrorKind::Io,
        }
    }
}

/// Result alias for tracking operations
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Where runs are recorded, decided by URI scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingUri {
    /// Local file store (`file:` URIs and bare paths)
    Local(PathBuf),
    /// Remote MLflow tracking server (`http://`, `https://`)
    Remote(String),
}

impl TrackingUri {
    /// Parse a tracking URI
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::UnsupportedUri` for an empty URI or a scheme
    /// other than `file`, `http` or `https`.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(TrackingError::UnsupportedUri(uri.to_string()));
        }

        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(path)));
        }
        if let Some(path) = uri.strip_prefix("file:") {
            return Ok(Self::Local(PathBuf::from(path)));
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(Self::Remote(uri.trim_end_matches('/').to_string()));
        }
        if uri.contains("://") {
            return Err(TrackingError::UnsupportedUri(uri.to_string()));
        }
        Ok(Self::Local(PathBuf::from(uri)))
    }

    /// Whether runs go to a local file store
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Open the backend for this URI
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client for a remote store cannot be built.
    pub fn open(&self) -> Result<Box<dyn TrackingBackend>> {
        match self {
            Self::Local(dir) => Ok(Box::new(JsonFileBackend::new(dir))),
            Self::Remote(url) => Ok(Box::new(MlflowRestBackend::new(url)?)),
        }
    }
}

impl std::fmt::Display for TrackingUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(dir) => write!(f, "file:{}", dir.display()),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

/// Experiment tracker
///
/// Manages runs under a single experiment name. Active runs live in memory
/// and are persisted through the backend when they end.
#[derive(Debug)]
pub struct ExperimentTracker<B: TrackingBackend> {
    experiment_name: String,
    tags: HashMap<String, String>,
    backend: B,
    /// Active runs held in memory for fast mutation
    active_runs: HashMap<String, Run>,
}

impl<B: TrackingBackend> ExperimentTracker<B> {
    /// Create a new tracker for the given experiment name
    pub fn new(experiment_name: impl Into<String>, backend: B) -> Self {
        Self {
            experiment_name: experiment_name.into(),
            tags: HashMap::new(),
            backend,
            active_runs: HashMap::new(),
        }
    }

    /// Add an experiment-level tag
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Get the experiment name
    #[must_use]
    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    /// Get the storage backend
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether the backend can register models
    #[must_use]
    pub fn supports_registry(&self) -> bool {
        self.backend.supports_registry()
    }

    /// Start a new run, optionally with a human-readable name
    ///
    /// Returns the run ID.
    ///
    /// # Errors
    ///
    /// Infallible for the bundled backends; kept fallible for API stability.
    pub fn start_run(&mut self, run_name: Option<&str>) -> Result<String> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();

        let mut run = Run::new(
            run_id.clone(),
            run_name.map(String::from),
            self.experiment_name.clone(),
        );
        for (k, v) in &self.tags {
            run.tags.insert(k.clone(), v.clone());
        }

        tracing::debug!(run_id = %run_id, experiment = %self.experiment_name, "Started tracking run");
        self.active_runs.insert(run_id.clone(), run);
        Ok(run_id)
    }

    /// End a run with the given status, persisting it to the backend
    ///
    /// # Errors
    ///
    /// Returns an error if the run is not active or cannot be persisted.
    pub fn end_run(&mut self, run_id: &str, status: RunStatus) -> Result<()> {
        let mut run = self
            .active_runs
            .remove(run_id)
            .ok_or_else(|| TrackingError::RunNotFound(run_id.to_string()))?;

        run.status = status;
        run.end_time_ms = Some(now_ms());

        self.backend.save_run(&run)?;
        tracing::debug!(run_id, status = ?status, "Ended tracking run");
        Ok(())
    }

    fn active_run(&mut self, run_id: &str) -> Result<&mut Run> {
        self.active_runs
            .get_mut(run_id)
            .ok_or_else(|| TrackingError::RunNotActive(run_id.to_string()))
    }

    /// Log a single parameter (hyperparameter)
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::RunNotActive` if the run has ended or never started.
    pub fn log_param(&mut self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.active_run(run_id)?
            .params
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Log multiple parameters at once
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::RunNotActive` if the run has ended or never started.
    pub fn log_params(&mut self, run_id: &str, params: &BTreeMap<String, String>) -> Result<()> {
        let run = self.active_run(run_id)?;
        for (k, v) in params {
            run.params.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    /// Log a metric value at a given step
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::RunNotActive` if the run has ended or never started.
    pub fn log_metric(&mut self, run_id: &str, key: &str, value: f64, step: u64) -> Result<()> {
        self.active_run(run_id)?
            .metrics
            .entry(key.to_string())
            .or_default()
            .push((value, step));
        Ok(())
    }

    /// Store a model artifact under `artifact_path` and optionally register it
    ///
    /// Returns the registered version when `registered_name` is given.
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::RegistryUnsupported` when registration is
    /// requested from a store without a registry, or a storage error.
    pub fn log_model(
        &mut self,
        run_id: &str,
        artifact_path: &str,
        bytes: &[u8],
        registered_name: Option<&str>,
    ) -> Result<Option<ModelVersion>> {
        if registered_name.is_some() && !self.backend.supports_registry() {
            return Err(TrackingError::RegistryUnsupported(self.backend.describe()));
        }

        let run = self
            .active_runs
            .get_mut(run_id)
            .ok_or_else(|| TrackingError::RunNotActive(run_id.to_string()))?;
        let location = self.backend.save_artifact(run, artifact_path, bytes)?;
        run.artifacts.push(artifact_path.to_string());
        tracing::info!(run_id, artifact = %location, "Logged model artifact");

        let Some(name) = registered_name else {
            return Ok(None);
        };
        let version = self.backend.register_model(name, run, artifact_path)?;
        tracing::info!(model = %version.name, version = %version.version, "Registered model");
        Ok(Some(version))
    }

    /// Retrieve a run by ID
    ///
    /// Checks active (in-memory) runs first, then falls back to the backend.
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::RunNotFound` if neither holds the run.
    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        if let Some(run) = self.active_runs.get(run_id) {
            return Ok(run.clone());
        }
        self.backend
            .load_run(run_id)
            .map_err(|e| TrackingError::RunNotFound(format!("{run_id}: {e}")))
    }

    /// List all runs (active + persisted)
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot list its runs.
    pub fn list_runs(&self) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self.active_runs.values().cloned().collect();
        for r in self.backend.list_runs()? {
            if !self.active_runs.contains_key(&r.run_id) {
                runs.push(r);
            }
        }
        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(runs)
    }
}
