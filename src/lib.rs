//! # Model Select Eval
//!
//! Evaluation and selection stage for trained regression models.
//!
//! Every candidate artifact in a models directory is scored against the same
//! held-out test split. The best candidate is picked by a configured metric,
//! and the scores and winning model are persisted. The winner's parameters
//! and metrics are then recorded in an experiment tracking store.
//!
//! ## Architecture
//!
//! ```text
//! Test split (CSV) + pre-fitted transformer
//!        ↓
//! Candidate artifacts (models directory)
//!        ↓
//! Batch evaluation (predict + score every metric, all-or-nothing)
//!        ↓
//! Selection (explicit direction per metric, first wins ties)
//!        ↓
//! Scores JSON + best model + summary
//!        ↓
//! Tracking store (local files or MLflow server with registry)
//! ```
//!
//! ## Example
//!
//! ```
//! use model_select_eval::{select_best, MetricRegistry, MetricScores, ScoreTable};
//!
//! let mut table = ScoreTable::new();
//! table.insert("A", [("r2_score", 0.9)].into_iter().collect::<MetricScores>());
//! table.insert("B", [("r2_score", 0.9)].into_iter().collect::<MetricScores>());
//! table.insert("C", [("r2_score", 0.8)].into_iter().collect::<MetricScores>());
//!
//! let best = select_best(&table, "r2_score", &MetricRegistry::new()).unwrap();
//! assert_eq!(best.model_id, "A");
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod model;
pub mod publish;
pub mod report;
pub mod runner;
pub mod scorer;
pub mod selection;
pub mod tracking;

pub use config::{ConfigError, DataConfig, EvalConfig, ModelConfig, PipelineConfig, TrackingConfig};
pub use data::{load_test_split, DataError, FeatureMatrix, FeatureTransformer};
pub use error::ErrorKind;
pub use evaluator::{BatchEvaluator, EvaluateError, TrainedModel, TrainedModelSet};
pub use metrics::{
    Direction, MetricDefinition, MetricError, MetricRegistry, MEAN_ABSOLUTE_ERROR,
    MEAN_SQUARED_ERROR, R2_SCORE,
};
pub use model::{discover_candidates, JsonModelStore, ModelArtifact, ModelError, ModelStore, Regressor};
pub use publish::{PublishError, PublishedRun, ResultPublisher, TRACKED_METRICS};
pub use report::{metrics_table, EvaluationSummary, ScoreReport};
pub use runner::{EvaluationRunner, RunError, RunSummary, Stage};
pub use scorer::{MetricScores, ModelScorer, ScoreError, ScoreTable};
pub use selection::{select_best, Selection, SelectionError};
pub use tracking::{ExperimentTracker, Run, RunStatus, TrackingError, TrackingUri};
