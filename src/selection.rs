//! Best-model selection over a score table.
//!
//! The optimization direction comes from the metric's registry entry, never
//! from its name. Ties keep the model that was scored first.

use crate::error::ErrorKind;
use crate::metrics::{Direction, MetricError, MetricRegistry};
use crate::scorer::ScoreTable;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that prevent choosing a winner
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionError {
    #[error("No candidate models to select from")]
    NoCandidates,

    #[error("Selection metric {metric} has no score for model {model_id}")]
    MissingMetric { metric: String, model_id: String },

    #[error("Selection metric {metric} is not a finite number for model {model_id}")]
    NonFiniteScore { metric: String, model_id: String },

    #[error("{0}")]
    Metric(#[from] MetricError),
}

impl SelectionError {
    /// Error classification
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Metric(e) => e.kind(),
            _ => ErrorKind::Selection,
        }
    }
}

/// The chosen model and the score that won
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Winning model identifier
    pub model_id: String,
    /// Metric used for ranking
    pub metric: String,
    /// Winning score
    pub score: f64,
    /// Direction the metric was optimized in
    pub direction: Direction,
}

/// Pick the best model in `table` by `metric`
///
/// # Errors
///
/// Returns `SelectionError::Metric` if the metric is not registered,
/// `SelectionError::NoCandidates` for an empty table, and
/// `SelectionError::MissingMetric` if any model lacks a score for it.
pub fn select_best(
    table: &ScoreTable,
    metric: &str,
    registry: &MetricRegistry,
) -> Result<Selection, SelectionError> {
    let direction = registry.direction(metric)?;
    select_best_with(table, metric, direction)
}

/// Pick the best model in `table` by `metric` in an explicit direction
///
/// # Errors
///
/// Same as [`select_best`], minus the registry lookup.
pub fn select_best_with(
    table: &ScoreTable,
    metric: &str,
    direction: Direction,
) -> Result<Selection, SelectionError> {
    let mut best: Option<(&str, f64)> = None;

    for (model_id, scores) in table {
        let score = scores
            .get(metric)
            .ok_or_else(|| SelectionError::MissingMetric {
                metric: metric.to_string(),
                model_id: model_id.to_string(),
            })?;
        if !score.is_finite() {
            return Err(SelectionError::NonFiniteScore {
                metric: metric.to_string(),
                model_id: model_id.to_string(),
            });
        }

        match best {
            Some((_, current)) if !direction.is_better(score, current) => {}
            _ => best = Some((model_id, score)),
        }
    }

    let (model_id, score) = best.ok_or(SelectionError::NoCandidates)?;
    tracing::info!(
        model = model_id,
        metric,
        score,
        direction = %direction,
        "Selected best model"
    );

    Ok(Selection {
        model_id: model_id.to_string(),
        metric: metric.to_string(),
        score,
        direction,
    })
}
