//! Per-model scoring and the score table.
//!
//! [`MetricScores`] and [`ScoreTable`] keep insertion order: the order in
//! which models were scored is what breaks ties during selection, and the
//! persisted JSON lists models and metrics in that same order.

use crate::error::ErrorKind;
use crate::metrics::{MetricError, MetricRegistry};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

/// Scoring failure for one model, carrying the offending metric
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Scoring {model_id} with {metric} failed: {source}")]
pub struct ScoreError {
    /// Model being scored
    pub model_id: String,
    /// Metric that failed
    pub metric: String,
    /// Underlying dispatch or computation error
    #[source]
    pub source: MetricError,
}

impl ScoreError {
    /// Classification of the underlying metric error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// Metric name to score, in computation order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricScores {
    entries: Vec<(String, f64)>,
}

impl MetricScores {
    /// Create an empty score map
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert a score, replacing (in place) any previous value for the metric
    pub fn insert(&mut self, metric: impl Into<String>, score: f64) {
        let metric = metric.into();
        match self.entries.iter_mut().find(|(name, _)| *name == metric) {
            Some(entry) => entry.1 = score,
            None => self.entries.push((metric, score)),
        }
    }

    /// Score for a metric
    #[must_use]
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(name, _)| name == metric)
            .map(|(_, score)| *score)
    }

    /// Check whether a metric has a score
    #[must_use]
    pub fn contains(&self, metric: &str) -> bool {
        self.get(metric).is_some()
    }

    /// Metric names in computation order
    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Iterate over `(metric, score)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(name, score)| (name.as_str(), *score))
    }

    /// Number of scored metrics
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was scored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for MetricScores {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut scores = Self::new();
        for (metric, score) in iter {
            scores.insert(metric, score);
        }
        scores
    }
}

/// Model identifier to metric scores, in scoring order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreTable {
    entries: Vec<(String, MetricScores)>,
}

impl ScoreTable {
    /// Create an empty table
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Record a model's scores, replacing (in place) an existing entry
    pub fn insert(&mut self, model_id: impl Into<String>, scores: MetricScores) {
        let model_id = model_id.into();
        match self.entries.iter_mut().find(|(id, _)| *id == model_id) {
            Some(entry) => entry.1 = scores,
            None => self.entries.push((model_id, scores)),
        }
    }

    /// Scores for one model
    #[must_use]
    pub fn get(&self, model_id: &str) -> Option<&MetricScores> {
        self.entries
            .iter()
            .find(|(id, _)| id == model_id)
            .map(|(_, scores)| scores)
    }

    /// Model identifiers in scoring order
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    /// Iterate over `(model_id, scores)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricScores)> {
        self.entries.iter().map(|(id, scores)| (id.as_str(), scores))
    }

    /// Number of models
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no model was scored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a table previously written with [`ScoreTable::to_json`]
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is not a `{model: {metric: score}}` map.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl<'a> IntoIterator for &'a ScoreTable {
    type Item = (&'a str, &'a MetricScores);
    type IntoIter = Box<dyn Iterator<Item = Self::Item> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

fn serialize_ordered<S, V>(entries: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

/// Map visitor that keeps document order
struct OrderedVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
    type Value = Vec<(String, V)>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries: Vec<(String, V)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => entries.push((key, value)),
            }
        }
        Ok(entries)
    }
}

impl Serialize for MetricScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_ordered(&self.entries, serializer)
    }
}

impl<'de> Deserialize<'de> for MetricScores {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_map(OrderedVisitor::<f64>(PhantomData))
            .map(|entries| Self { entries })
    }
}

impl Serialize for ScoreTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_ordered(&self.entries, serializer)
    }
}

impl<'de> Deserialize<'de> for ScoreTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_map(OrderedVisitor::<MetricScores>(PhantomData))
            .map(|entries| Self { entries })
    }
}

/// Applies registered metrics to one model's predictions
#[derive(Debug, Clone, Copy)]
pub struct ModelScorer<'a> {
    registry: &'a MetricRegistry,
}

impl<'a> ModelScorer<'a> {
    /// Create a scorer backed by a registry
    #[must_use]
    pub const fn new(registry: &'a MetricRegistry) -> Self {
        Self { registry }
    }

    /// Registry used for dispatch
    #[must_use]
    pub const fn registry(&self) -> &'a MetricRegistry {
        self.registry
    }

    /// Score predictions with each metric, in the order given
    ///
    /// # Errors
    ///
    /// Stops at the first metric that cannot be resolved or computed and
    /// returns a [`ScoreError`] naming it.
    pub fn score<S: AsRef<str>>(
        &self,
        model_id: &str,
        actual: &[f64],
        predicted: &[f64],
        metric_names: &[S],
    ) -> Result<MetricScores, ScoreError> {
        let mut scores = MetricScores::new();
        self.score_into(model_id, actual, predicted, metric_names, &mut scores)?;
        Ok(scores)
    }

    /// Add the metrics missing from `scores`
    ///
    /// Metrics already present keep their value.
    ///
    /// # Errors
    ///
    /// Same as [`ModelScorer::score`].
    pub fn complete<S: AsRef<str>>(
        &self,
        model_id: &str,
        actual: &[f64],
        predicted: &[f64],
        metric_names: &[S],
        scores: &mut MetricScores,
    ) -> Result<(), ScoreError> {
        let missing: Vec<&str> = metric_names
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| !scores.contains(name))
            .collect();
        self.score_into(model_id, actual, predicted, &missing, scores)
    }

    fn score_into<S: AsRef<str>>(
        &self,
        model_id: &str,
        actual: &[f64],
        predicted: &[f64],
        metric_names: &[S],
        scores: &mut MetricScores,
    ) -> Result<(), ScoreError> {
        for name in metric_names {
            let name = name.as_ref();
            let score = self
                .registry
                .compute(name, actual, predicted)
                .map_err(|source| ScoreError {
                    model_id: model_id.to_string(),
                    metric: name.to_string(),
                    source,
                })?;
            tracing::info!(model = model_id, metric = name, score, "Evaluated metric");
            scores.insert(name, score);
        }
        Ok(())
    }
}
