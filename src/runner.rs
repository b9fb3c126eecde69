//! Evaluation run orchestration.
//!
//! Sequences one run: load the test split, apply the pre-fitted transformer,
//! evaluate every candidate in the models directory, select the winner,
//! persist scores and the best model, then record the winner in the tracker.
//! Any stage failure aborts the run; there are no retries.

use crate::config::{ConfigError, PipelineConfig};
use crate::data::{load_test_split, DataError, FeatureTransformer};
use crate::error::ErrorKind;
use crate::evaluator::{BatchEvaluator, EvaluateError};
use crate::metrics::MetricRegistry;
use crate::model::{discover_candidates, JsonModelStore, ModelError, ModelStore};
use crate::publish::{PublishError, PublishedRun, ResultPublisher, TRACKED_METRICS};
use crate::report::EvaluationSummary;
use crate::scorer::{ModelScorer, ScoreError, ScoreTable};
use crate::selection::{select_best, Selection, SelectionError};
use crate::tracking::storage::TrackingBackend;
use crate::tracking::{ExperimentTracker, TrackingError, TrackingUri};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage a run failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configure,
    LoadData,
    Transform,
    Discover,
    Evaluate,
    Select,
    PersistScores,
    PersistModel,
    PersistSummary,
    Track,
}

impl Stage {
    /// Stable snake_case name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::LoadData => "load_data",
            Self::Transform => "transform",
            Self::Discover => "discover",
            Self::Evaluate => "evaluate",
            Self::Select => "select",
            Self::PersistScores => "persist_scores",
            Self::PersistModel => "persist_model",
            Self::PersistSummary => "persist_summary",
            Self::Track => "track",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort an evaluation run
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Tracking setup failed: {0}")]
    TrackingSetup(#[source] TrackingError),

    #[error("Loading test split failed: {0}")]
    LoadData(#[source] DataError),

    #[error("Feature transformation failed: {0}")]
    Transform(#[source] DataError),

    #[error("Candidate discovery failed: {0}")]
    Discover(#[source] ModelError),

    #[error("Evaluation failed: {0}")]
    Evaluate(#[from] EvaluateError),

    #[error("Selection failed: {0}")]
    Select(#[from] SelectionError),

    #[error("Selected model {0} was not retained by the evaluator")]
    WinnerMissing(String),

    #[error("Persisting scores failed: {0}")]
    PersistScores(#[source] PublishError),

    #[error("Persisting best model failed: {0}")]
    PersistModel(#[source] PublishError),

    #[error("Persisting summary failed: {0}")]
    PersistSummary(#[source] PublishError),

    #[error("Scoring tracked metrics failed: {0}")]
    TrackedScore(#[source] ScoreError),

    #[error("Publishing to tracker failed: {0}")]
    Track(#[source] PublishError),
}

impl RunError {
    /// Stage the run failed in
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Config(_) | Self::TrackingSetup(_) => Stage::Configure,
            Self::LoadData(_) => Stage::LoadData,
            Self::Transform(_) => Stage::Transform,
            Self::Discover(_) => Stage::Discover,
            Self::Evaluate(_) => Stage::Evaluate,
            Self::Select(_) | Self::WinnerMissing(_) => Stage::Select,
            Self::PersistScores(_) => Stage::PersistScores,
            Self::PersistModel(_) => Stage::PersistModel,
            Self::PersistSummary(_) => Stage::PersistSummary,
            Self::TrackedScore(_) | Self::Track(_) => Stage::Track,
        }
    }

    /// Error classification
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(e) => e.kind(),
            Self::TrackingSetup(e) => e.kind(),
            Self::LoadData(e) | Self::Transform(e) => e.kind(),
            Self::Discover(e) => e.kind(),
            Self::Evaluate(e) => e.kind(),
            Self::Select(e) => e.kind(),
            Self::WinnerMissing(_) => ErrorKind::Selection,
            Self::PersistScores(e)
            | Self::PersistModel(e)
            | Self::PersistSummary(e)
            | Self::Track(e) => e.kind(),
            Self::TrackedScore(e) => e.kind(),
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Winning model and score
    pub selection: Selection,
    /// Scores of every candidate, in evaluation order
    pub scores: ScoreTable,
    /// Candidate artifacts that were evaluated
    pub candidates: Vec<PathBuf>,
    /// Where the winning model was written
    pub final_model_path: PathBuf,
    /// Tracking run that recorded the winner
    pub tracking: PublishedRun,
}

/// Runs the evaluation pipeline for one configuration
#[derive(Debug)]
pub struct EvaluationRunner<S: ModelStore, B: TrackingBackend> {
    config: PipelineConfig,
    registry: MetricRegistry,
    store: S,
    tracker: ExperimentTracker<B>,
}

impl EvaluationRunner<JsonModelStore, Box<dyn TrackingBackend>> {
    /// Build a runner with JSON model artifacts and the tracking store
    /// named by the configured (or environment) tracking URI
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the tracking URI
    /// is unsupported.
    pub fn from_config(config: PipelineConfig) -> Result<Self, RunError> {
        config.validate()?;
        let uri = TrackingUri::parse(&config.tracking.resolve_uri())
            .map_err(RunError::TrackingSetup)?;
        let backend = uri.open().map_err(RunError::TrackingSetup)?;
        tracing::info!(tracking_uri = %uri, "Opened tracking store");

        let tracker = ExperimentTracker::new(config.tracking.experiment_name.clone(), backend);
        Ok(Self::new(config, JsonModelStore::new(), tracker))
    }
}

impl<S: ModelStore, B: TrackingBackend> EvaluationRunner<S, B> {
    /// Create a runner with the default metric registry
    #[must_use]
    pub fn new(config: PipelineConfig, store: S, tracker: ExperimentTracker<B>) -> Self {
        Self {
            config,
            registry: MetricRegistry::new(),
            store,
            tracker,
        }
    }

    /// Replace the metric registry
    #[must_use]
    pub fn with_registry(mut self, registry: MetricRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Get the configuration
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Get the experiment tracker
    #[must_use]
    pub const fn tracker(&self) -> &ExperimentTracker<B> {
        &self.tracker
    }

    /// Execute one evaluation run
    ///
    /// # Errors
    ///
    /// Returns the first stage failure; see [`RunError::stage`].
    pub fn run(&mut self) -> Result<RunSummary, RunError> {
        tracing::info!(
            models = %self.config.model.trained_models_path.display(),
            test_split = %self.config.data.test_split_path.display(),
            metric = self.config.selection_metric(),
            "Starting evaluation run"
        );

        self.execute().map_err(|e| {
            tracing::error!(stage = %e.stage(), kind = %e.kind(), error = %e, "Evaluation run failed");
            e
        })
    }

    fn execute(&mut self) -> Result<RunSummary, RunError> {
        let config = &self.config;
        let metric_names = config.evaluation.metric_names()?;

        let (raw_x, y_test) = load_test_split(&config.data.test_split_path, &config.data.target_column)
            .map_err(RunError::LoadData)?;
        let x_test = FeatureTransformer::load(&config.data.transformer_path)
            .and_then(|t| t.transform(&raw_x))
            .map_err(RunError::Transform)?;

        let candidates =
            discover_candidates(&config.model.trained_models_path).map_err(RunError::Discover)?;
        tracing::info!(candidates = candidates.len(), "Discovered candidate models");

        let scorer = ModelScorer::new(&self.registry);
        let (mut models, scores) = BatchEvaluator::new(&self.store, scorer).evaluate(
            &candidates,
            &x_test,
            &y_test,
            &metric_names,
        )?;

        let selection = select_best(&scores, config.selection_metric(), &self.registry)?;
        let winner = models
            .take(&selection.model_id)
            .ok_or_else(|| RunError::WinnerMissing(selection.model_id.clone()))?;

        let publisher = ResultPublisher::new(&self.store);
        publisher
            .persist_scores(&scores, &config.evaluation.eval_scores_path)
            .map_err(RunError::PersistScores)?;
        publisher
            .persist_best_model(&winner.model, &config.model.final_model_path)
            .map_err(RunError::PersistModel)?;
        if let Some(path) = &config.evaluation.eval_summary_path {
            publisher
                .persist_summary(&EvaluationSummary::new(&selection, &scores), path)
                .map_err(RunError::PersistSummary)?;
        }

        let mut tracked = scores.get(&selection.model_id).cloned().unwrap_or_default();
        scorer
            .complete(
                &selection.model_id,
                &y_test,
                &winner.predictions,
                &TRACKED_METRICS,
                &mut tracked,
            )
            .map_err(RunError::TrackedScore)?;

        self.tracker.add_tag("selection_metric", selection.metric.clone());
        self.tracker.add_tag("selection_direction", selection.direction.to_string());
        self.tracker.add_tag("candidates", candidates.len().to_string());

        let tracking = publisher
            .publish_to_tracker(
                &mut self.tracker,
                &winner.model,
                &tracked,
                &config.tracking.registered_model_name,
            )
            .map_err(RunError::Track)?;

        tracing::info!(
            model = %selection.model_id,
            metric = %selection.metric,
            score = selection.score,
            run_id = %tracking.run_id,
            "Evaluation run complete"
        );

        Ok(RunSummary {
            selection,
            scores,
            candidates,
            final_model_path: config.model.final_model_path.clone(),
            tracking,
        })
    }
}
