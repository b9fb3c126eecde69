//! Regression metric registry.
//!
//! Maps a metric name to a scoring function and the direction in which the
//! metric improves. The registry is the only place a metric name is resolved,
//! so an unknown name surfaces as [`MetricError::UnknownMetric`] rather than a
//! failure deep inside a scoring loop.
//!
//! Registered by default:
//! - `r2_score`: coefficient of determination (maximize)
//! - `mean_squared_error`: **root** mean squared error (minimize)
//! - `mean_absolute_error`: mean absolute error (minimize)

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Name of the coefficient of determination metric
pub const R2_SCORE: &str = "r2_score";
/// Name of the (root) mean squared error metric
pub const MEAN_SQUARED_ERROR: &str = "mean_squared_error";
/// Name of the mean absolute error metric
pub const MEAN_ABSOLUTE_ERROR: &str = "mean_absolute_error";

/// Errors raised while resolving or computing a metric
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Length mismatch: {actual} actual values vs {predicted} predictions")]
    LengthMismatch { actual: usize, predicted: usize },

    #[error("Cannot score an empty sequence")]
    Empty,

    #[error("{metric} needs at least {required} samples, got {got}")]
    TooFewSamples {
        metric: &'static str,
        required: usize,
        got: usize,
    },

    #[error("Non-numeric {series} value at index {index}")]
    NonFinite { series: &'static str, index: usize },
}

impl MetricError {
    /// Configuration for an unknown name, computation for everything else
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownMetric(_) => ErrorKind::Configuration,
            _ => ErrorKind::Computation,
        }
    }
}

/// Direction in which a metric improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Higher is better
    Maximize,
    /// Lower is better
    Minimize,
}

impl Direction {
    /// Whether `candidate` is strictly better than `current`
    ///
    /// Strictness keeps the earliest model when scores tie.
    #[must_use]
    pub fn is_better(self, candidate: f64, current: f64) -> bool {
        match self {
            Self::Maximize => candidate > current,
            Self::Minimize => candidate < current,
        }
    }

    /// Get direction name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Maximize => "maximize",
            Self::Minimize => "minimize",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scoring function signature: `(actual, predicted) -> score`
pub type ScoreFn = fn(&[f64], &[f64]) -> Result<f64, MetricError>;

/// A registered metric
#[derive(Debug, Clone)]
pub struct MetricDefinition {
    /// Metric name as used in configuration
    pub name: String,
    /// Optimization direction
    pub direction: Direction,
    /// Scoring function
    pub score: ScoreFn,
}

impl MetricDefinition {
    /// Create a new metric definition
    #[must_use]
    pub fn new(name: impl Into<String>, direction: Direction, score: ScoreFn) -> Self {
        Self {
            name: name.into(),
            direction,
            score,
        }
    }

    /// Compute this metric
    ///
    /// # Errors
    ///
    /// Propagates the scoring function's [`MetricError`].
    pub fn compute(&self, actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
        (self.score)(actual, predicted)
    }
}

/// Registry of named metrics
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    metrics: BTreeMap<String, MetricDefinition>,
}

impl MetricRegistry {
    /// Create an empty registry
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            metrics: BTreeMap::new(),
        }
    }

    /// Create a registry with the three regression metrics
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(MetricDefinition::new(R2_SCORE, Direction::Maximize, r2_score));
        registry.register(MetricDefinition::new(
            MEAN_SQUARED_ERROR,
            Direction::Minimize,
            root_mean_squared_error,
        ));
        registry.register(MetricDefinition::new(
            MEAN_ABSOLUTE_ERROR,
            Direction::Minimize,
            mean_absolute_error,
        ));
        registry
    }

    /// Register a metric, returning the definition it replaced (if any)
    pub fn register(&mut self, definition: MetricDefinition) -> Option<MetricDefinition> {
        self.metrics.insert(definition.name.clone(), definition)
    }

    /// Resolve a metric by name
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::UnknownMetric`] if the name is not registered.
    pub fn resolve(&self, name: &str) -> Result<&MetricDefinition, MetricError> {
        self.metrics
            .get(name)
            .ok_or_else(|| MetricError::UnknownMetric(name.to_string()))
    }

    /// Resolve every name, failing on the first unknown one
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::UnknownMetric`] naming the first unregistered metric.
    pub fn resolve_all<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<&MetricDefinition>, MetricError> {
        names.iter().map(|n| self.resolve(n.as_ref())).collect()
    }

    /// Optimization direction of a metric
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::UnknownMetric`] if the name is not registered.
    pub fn direction(&self, name: &str) -> Result<Direction, MetricError> {
        self.resolve(name).map(|d| d.direction)
    }

    /// Resolve and compute a metric in one step
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::UnknownMetric`] for an unregistered name, or the
    /// computation error raised by the metric itself.
    pub fn compute(&self, name: &str, actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
        self.resolve(name)?.compute(actual, predicted)
    }

    /// Registered metric definitions, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.values()
    }

    /// Number of registered metrics
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Check if no metrics are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a pair of series before scoring
fn check_inputs(actual: &[f64], predicted: &[f64]) -> Result<(), MetricError> {
    if actual.len() != predicted.len() {
        return Err(MetricError::LengthMismatch {
            actual: actual.len(),
            predicted: predicted.len(),
        });
    }
    if actual.is_empty() {
        return Err(MetricError::Empty);
    }
    if let Some(index) = actual.iter().position(|v| !v.is_finite()) {
        return Err(MetricError::NonFinite {
            series: "actual",
            index,
        });
    }
    if let Some(index) = predicted.iter().position(|v| !v.is_finite()) {
        return Err(MetricError::NonFinite {
            series: "predicted",
            index,
        });
    }
    Ok(())
}

/// Coefficient of determination
///
/// A constant target scores 1.0 when predicted exactly and 0.0 otherwise.
///
/// # Errors
///
/// Returns a computation error for mismatched, empty or non-finite input,
/// or for fewer than two samples.
#[allow(clippy::cast_precision_loss)]
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
    check_inputs(actual, predicted)?;
    if actual.len() < 2 {
        return Err(MetricError::TooFewSamples {
            metric: R2_SCORE,
            required: 2,
            got: actual.len(),
        });
    }

    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();

    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}

/// Mean squared error
///
/// # Errors
///
/// Returns a computation error for mismatched, empty or non-finite input.
#[allow(clippy::cast_precision_loss)]
pub fn mean_squared_error(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
    check_inputs(actual, predicted)?;
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    Ok(sum / actual.len() as f64)
}

/// Square root of the mean squared error
///
/// Registered under the `mean_squared_error` name.
///
/// # Errors
///
/// Returns a computation error for mismatched, empty or non-finite input.
pub fn root_mean_squared_error(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
    mean_squared_error(actual, predicted).map(f64::sqrt)
}

/// Mean absolute error
///
/// # Errors
///
/// Returns a computation error for mismatched, empty or non-finite input.
#[allow(clippy::cast_precision_loss)]
pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
    check_inputs(actual, predicted)?;
    let sum: f64 = actual.iter().zip(predicted).map(|(y, p)| (y - p).abs()).sum();
    Ok(sum / actual.len() as f64)
}
