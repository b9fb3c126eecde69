//! Persistence of evaluation results and the winning model.
//!
//! Writes the score table, the best model and the optional summary to their
//! configured locations, and records the winner in the tracking sink.

use crate::error::ErrorKind;
use crate::metrics::{MEAN_ABSOLUTE_ERROR, MEAN_SQUARED_ERROR, R2_SCORE};
use crate::model::{ModelError, ModelStore, Regressor};
use crate::report::EvaluationSummary;
use crate::scorer::{MetricScores, ScoreTable};
use crate::tracking::storage::{ModelVersion, TrackingBackend};
use crate::tracking::{ExperimentTracker, RunStatus, TrackingError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Metrics recorded for every tracked run
pub const TRACKED_METRICS: [&str; 3] = [R2_SCORE, MEAN_SQUARED_ERROR, MEAN_ABSOLUTE_ERROR];

/// Artifact slot the winning model is logged under
pub const MODEL_ARTIFACT_PATH: &str = "model/model.json";

/// Errors raised while persisting or publishing results
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Tracked metric {metric} missing from scores of {model_id}")]
    MissingTrackedMetric { metric: String, model_id: String },

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode results: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Model(#[from] ModelError),

    #[error("Tracking failed: {0}")]
    Tracking(#[from] TrackingError),
}

impl PublishError {
    /// Error classification
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingTrackedMetric { .. } => ErrorKind::Configuration,
            Self::Io { .. } | Self::Encode(_) => ErrorKind::Io,
            Self::Model(e) => e.kind(),
            Self::Tracking(e) => e.kind(),
        }
    }
}

/// Identity of the tracking run that recorded the winner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRun {
    /// Tracking run ID
    pub run_id: String,
    /// Registered version, when the store has a registry
    pub model_version: Option<ModelVersion>,
}

/// Writes results through a model store and a tracking sink
#[derive(Debug)]
pub struct ResultPublisher<'a, S: ModelStore> {
    store: &'a S,
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), PublishError> {
    let io_err = |source| PublishError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, contents).map_err(io_err)
}

impl<'a, S: ModelStore> ResultPublisher<'a, S> {
    /// Create a publisher that serializes models with `store`
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Write the full score table as pretty JSON, overwriting `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be encoded or written.
    pub fn persist_scores(&self, table: &ScoreTable, path: &Path) -> Result<(), PublishError> {
        let json = table.to_json()?;
        write_file(path, json.as_bytes())?;
        tracing::info!(path = %path.display(), models = table.len(), "Persisted scores");
        Ok(())
    }

    /// Write the selected model, overwriting `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the model store cannot save the model.
    pub fn persist_best_model(&self, model: &S::Model, path: &Path) -> Result<(), PublishError> {
        self.store.save(model, path)?;
        tracing::info!(path = %path.display(), model = model.model_type(), "Persisted best model");
        Ok(())
    }

    /// Write the run summary, overwriting `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the summary cannot be encoded or written.
    pub fn persist_summary(
        &self,
        summary: &EvaluationSummary,
        path: &Path,
    ) -> Result<(), PublishError> {
        let json = summary.to_json()?;
        write_file(path, json.as_bytes())?;
        tracing::info!(path = %path.display(), "Persisted evaluation summary");
        Ok(())
    }

    /// Record the winner's hyperparameters, metrics and artifact
    ///
    /// The model is registered under `registered_model_name` only when the
    /// tracking store has a registry. A run that fails part-way is ended as
    /// [`RunStatus::Failed`].
    ///
    /// # Errors
    ///
    /// Returns `PublishError::MissingTrackedMetric` before opening a run if
    /// any tracked metric is absent, or the first tracking failure.
    pub fn publish_to_tracker<B: TrackingBackend>(
        &self,
        tracker: &mut ExperimentTracker<B>,
        model: &S::Model,
        scores: &MetricScores,
        registered_model_name: &str,
    ) -> Result<PublishedRun, PublishError> {
        let model_id = model.model_type();
        let mut metrics = Vec::with_capacity(TRACKED_METRICS.len());
        for metric in TRACKED_METRICS {
            let value = scores
                .get(metric)
                .ok_or_else(|| PublishError::MissingTrackedMetric {
                    metric: metric.to_string(),
                    model_id: model_id.to_string(),
                })?;
            metrics.push((metric, value));
        }
        let bytes = self.store.to_bytes(model)?;

        let run_id = tracker.start_run(Some(model_id))?;
        let registered = tracker
            .supports_registry()
            .then_some(registered_model_name);

        let outcome = (|| -> Result<Option<ModelVersion>, TrackingError> {
            tracker.log_param(&run_id, "model_type", model_id)?;
            tracker.log_params(&run_id, &model.params())?;
            for (metric, value) in &metrics {
                tracker.log_metric(&run_id, metric, *value, 0)?;
            }
            tracker.log_model(&run_id, MODEL_ARTIFACT_PATH, &bytes, registered)
        })();

        match outcome {
            Ok(model_version) => {
                tracker.end_run(&run_id, RunStatus::Completed)?;
                tracing::info!(
                    run_id = %run_id,
                    model = model_id,
                    registered = model_version.is_some(),
                    "Published best model to tracker"
                );
                Ok(PublishedRun {
                    run_id,
                    model_version,
                })
            }
            Err(e) => {
                if let Err(end_err) = tracker.end_run(&run_id, RunStatus::Failed) {
                    tracing::warn!(run_id = %run_id, error = %end_err, "Could not mark run as failed");
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metrics::Direction;
    use crate::model::{JsonModelStore, ModelArtifact, Ridge};
    use crate::selection::Selection;
    use crate::tracking::storage::InMemoryBackend;

    fn ridge() -> ModelArtifact {
        ModelArtifact::Ridge(Ridge {
            alpha: 0.5,
            coefficients: vec![1.0, 2.0],
            intercept: 0.1,
        })
    }

    fn full_scores() -> MetricScores {
        [
            (R2_SCORE, 0.9),
            (MEAN_SQUARED_ERROR, 1.2),
            (MEAN_ABSOLUTE_ERROR, 0.8),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_persist_scores_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval/scores.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale").unwrap();

        let mut table = ScoreTable::new();
        table.insert("Ridge", full_scores());
        let store = JsonModelStore::new();
        ResultPublisher::new(&store).persist_scores(&table, &path).unwrap();

        let parsed = ScoreTable::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn test_persist_best_model_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final/nested/model.json");
        let store = JsonModelStore::new();
        ResultPublisher::new(&store)
            .persist_best_model(&ridge(), &path)
            .unwrap();
        assert_eq!(store.load(&path).unwrap(), ridge());
    }

    #[test]
    fn test_persist_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let mut table = ScoreTable::new();
        table.insert("Ridge", full_scores());
        let selection = Selection {
            model_id: "Ridge".to_string(),
            metric: R2_SCORE.to_string(),
            score: 0.9,
            direction: Direction::Maximize,
        };
        let store = JsonModelStore::new();
        ResultPublisher::new(&store)
            .persist_summary(&EvaluationSummary::new(&selection, &table), &path)
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["best_model"], "Ridge");
        assert_eq!(value["direction"], "maximize");
    }

    #[test]
    fn test_publish_local_store_logs_without_registering() {
        let store = JsonModelStore::new();
        let mut tracker = ExperimentTracker::new("exp", InMemoryBackend::new());

        let published = ResultPublisher::new(&store)
            .publish_to_tracker(&mut tracker, &ridge(), &full_scores(), "abc")
            .unwrap();

        assert!(published.model_version.is_none());
        let run = tracker.get_run(&published.run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.params.get("alpha").map(String::as_str), Some("0.5"));
        assert_eq!(run.params.get("model_type").map(String::as_str), Some("Ridge"));
        assert_eq!(run.latest_metric(R2_SCORE), Some(0.9));
        assert_eq!(run.latest_metric(MEAN_SQUARED_ERROR), Some(1.2));
        assert_eq!(run.latest_metric(MEAN_ABSOLUTE_ERROR), Some(0.8));
        assert_eq!(run.artifacts, vec![MODEL_ARTIFACT_PATH]);
        assert!(tracker
            .backend()
            .artifact(&published.run_id, MODEL_ARTIFACT_PATH)
            .is_some());
    }

    #[test]
    fn test_publish_registry_store_registers_model() {
        let store = JsonModelStore::new();
        let mut tracker = ExperimentTracker::new("exp", InMemoryBackend::with_registry());

        let published = ResultPublisher::new(&store)
            .publish_to_tracker(&mut tracker, &ridge(), &full_scores(), "abc")
            .unwrap();

        let version = published.model_version.unwrap();
        assert_eq!(version.name, "abc");
        assert_eq!(tracker.backend().registered_models().len(), 1);
    }

    #[test]
    fn test_missing_tracked_metric_opens_no_run() {
        let store = JsonModelStore::new();
        let mut tracker = ExperimentTracker::new("exp", InMemoryBackend::new());
        let scores: MetricScores = [(R2_SCORE, 0.9), (MEAN_ABSOLUTE_ERROR, 0.8)]
            .into_iter()
            .collect();

        let err = ResultPublisher::new(&store)
            .publish_to_tracker(&mut tracker, &ridge(), &scores, "abc")
            .unwrap_err();

        assert!(matches!(
            err,
            PublishError::MissingTrackedMetric { ref metric, .. } if metric == MEAN_SQUARED_ERROR
        ));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(tracker.list_runs().unwrap().is_empty());
    }
}
