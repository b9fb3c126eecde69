//! Batch evaluation of candidate models against one test split.
//!
//! Evaluation is all-or-nothing: the first candidate that fails to load,
//! predict or score aborts the batch, so selection never compares a partial
//! set of candidates.

use crate::data::FeatureMatrix;
use crate::error::ErrorKind;
use crate::metrics::MetricError;
use crate::model::{ModelError, ModelStore, Regressor};
use crate::scorer::{ModelScorer, ScoreError, ScoreTable};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort a batch evaluation
#[derive(Error, Debug)]
pub enum EvaluateError {
    #[error("{0}")]
    Metric(#[from] MetricError),

    #[error("Candidate {index} ({}): {source}", path.display())]
    Load {
        index: usize,
        path: PathBuf,
        #[source]
        source: ModelError,
    },

    #[error("Candidate {index} ({model_id}): prediction failed: {source}")]
    Predict {
        index: usize,
        model_id: String,
        #[source]
        source: ModelError,
    },

    #[error("Candidate {index}: {source}")]
    Score {
        index: usize,
        #[source]
        source: ScoreError,
    },

    #[error(
        "Candidate {index}: duplicate model identifier {model_id}: {} and {}",
        first.display(),
        second.display()
    )]
    DuplicateModel {
        index: usize,
        model_id: String,
        first: PathBuf,
        second: PathBuf,
    },
}

impl EvaluateError {
    /// Error classification
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Metric(e) => e.kind(),
            Self::Load { source, .. } | Self::Predict { source, .. } => source.kind(),
            Self::Score { source, .. } => source.kind(),
            Self::DuplicateModel { .. } => ErrorKind::Configuration,
        }
    }

    /// Position of the failing candidate, if the failure is tied to one
    #[must_use]
    pub const fn candidate_index(&self) -> Option<usize> {
        match self {
            Self::Load { index, .. }
            | Self::Predict { index, .. }
            | Self::Score { index, .. }
            | Self::DuplicateModel { index, .. } => Some(*index),
            Self::Metric(_) => None,
        }
    }
}

/// A loaded candidate together with its test-set predictions
#[derive(Debug, Clone)]
pub struct TrainedModel<M> {
    /// Loaded model
    pub model: M,
    /// Artifact the model was loaded from
    pub source: PathBuf,
    /// Predictions on the test features
    pub predictions: Vec<f64>,
}

/// Models loaded during one evaluation run, in load order
#[derive(Debug, Clone)]
pub struct TrainedModelSet<M> {
    entries: Vec<(String, TrainedModel<M>)>,
}

impl<M> TrainedModelSet<M> {
    /// Create an empty set
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn insert(&mut self, model_id: String, model: TrainedModel<M>) {
        self.entries.push((model_id, model));
    }

    /// Look up a model by identifier
    #[must_use]
    pub fn get(&self, model_id: &str) -> Option<&TrainedModel<M>> {
        self.entries
            .iter()
            .find(|(id, _)| id == model_id)
            .map(|(_, m)| m)
    }

    /// Remove and return a model by identifier
    pub fn take(&mut self, model_id: &str) -> Option<TrainedModel<M>> {
        let pos = self.entries.iter().position(|(id, _)| id == model_id)?;
        Some(self.entries.remove(pos).1)
    }

    /// Model identifiers in load order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    /// Number of models
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no model was loaded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<M> Default for TrainedModelSet<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads, predicts and scores every candidate in order
pub struct BatchEvaluator<'a, S: ModelStore> {
    store: &'a S,
    scorer: ModelScorer<'a>,
}

impl<'a, S: ModelStore> BatchEvaluator<'a, S> {
    /// Create a new batch evaluator
    #[must_use]
    pub const fn new(store: &'a S, scorer: ModelScorer<'a>) -> Self {
        Self { store, scorer }
    }

    /// Evaluate every candidate artifact against the test split
    ///
    /// Metric names are resolved before any artifact is loaded.
    ///
    /// # Errors
    ///
    /// Returns the first failure; no entries are produced for candidates
    /// after the failing one.
    pub fn evaluate<P: AsRef<Path>, N: AsRef<str>>(
        &self,
        model_paths: &[P],
        x_test: &FeatureMatrix,
        y_test: &[f64],
        metric_names: &[N],
    ) -> Result<(TrainedModelSet<S::Model>, ScoreTable), EvaluateError> {
        self.scorer.registry().resolve_all(metric_names)?;

        let mut models = TrainedModelSet::new();
        let mut table = ScoreTable::new();

        for (index, path) in model_paths.iter().enumerate() {
            let path = path.as_ref();

            let model = self
                .store
                .load(path)
                .map_err(|source| EvaluateError::Load {
                    index,
                    path: path.to_path_buf(),
                    source,
                })?;
            let model_id = model.model_type().to_string();
            tracing::info!(model = %model_id, path = %path.display(), "Loaded candidate");

            if let Some(existing) = models.get(&model_id) {
                return Err(EvaluateError::DuplicateModel {
                    index,
                    model_id,
                    first: existing.source.clone(),
                    second: path.to_path_buf(),
                });
            }

            let predictions = model
                .predict(x_test)
                .map_err(|source| EvaluateError::Predict {
                    index,
                    model_id: model_id.clone(),
                    source,
                })?;

            let scores = self
                .scorer
                .score(&model_id, y_test, &predictions, metric_names)
                .map_err(|source| EvaluateError::Score { index, source })?;

            table.insert(model_id.clone(), scores);
            models.insert(
                model_id,
                TrainedModel {
                    model,
                    source: path.to_path_buf(),
                    predictions,
                },
            );
        }

        Ok((models, table))
    }
}
