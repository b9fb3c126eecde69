//! Report generation for evaluation results.
//!
//! Renders a score table as plain text, markdown or JSON with the selected
//! model marked, and builds the run summary written next to the scores.

use crate::metrics::{Direction, MetricRegistry};
use crate::scorer::ScoreTable;
use crate::selection::Selection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use tabled::builder::Builder;
use tabled::{Table, Tabled};

/// Summary of one evaluation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    /// Summary generation timestamp
    pub generated_at: DateTime<Utc>,
    /// Crate version that produced the summary
    pub framework_version: String,
    /// Metric used for selection
    pub selection_metric: String,
    /// Direction the selection metric was optimized in
    pub direction: Direction,
    /// Winning model identifier
    pub best_model: String,
    /// Winning score
    pub best_score: f64,
    /// Number of candidates evaluated
    pub candidates: usize,
    /// Full score table
    pub scores: ScoreTable,
}

impl EvaluationSummary {
    /// Build a summary for a finished selection
    #[must_use]
    pub fn new(selection: &Selection, scores: &ScoreTable) -> Self {
        Self {
            generated_at: Utc::now(),
            framework_version: env!("CARGO_PKG_VERSION").to_string(),
            selection_metric: selection.metric.clone(),
            direction: selection.direction,
            best_model: selection.model_id.clone(),
            best_score: selection.score,
            candidates: scores.len(),
            scores: scores.clone(),
        }
    }

    /// Render summary as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Score table with the winner marked
#[derive(Debug, Clone)]
pub struct ScoreReport<'a> {
    scores: &'a ScoreTable,
    selection: Option<&'a Selection>,
}

impl<'a> ScoreReport<'a> {
    /// Create a report over a score table
    #[must_use]
    pub const fn new(scores: &'a ScoreTable) -> Self {
        Self {
            scores,
            selection: None,
        }
    }

    /// Mark the selected model
    #[must_use]
    pub const fn with_selection(mut self, selection: &'a Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Metric columns in first-seen order across all models
    #[must_use]
    pub fn metric_columns(&self) -> Vec<&'a str> {
        let mut columns: Vec<&str> = Vec::new();
        for (_, scores) in self.scores {
            for metric in scores.metrics() {
                if !columns.contains(&metric) {
                    columns.push(metric);
                }
            }
        }
        columns
    }

    fn is_winner(&self, model_id: &str) -> bool {
        self.selection.is_some_and(|s| s.model_id == model_id)
    }

    fn rows(&self, columns: &[&str]) -> Vec<Vec<String>> {
        self.scores
            .iter()
            .map(|(model_id, scores)| {
                let mut row = Vec::with_capacity(columns.len() + 2);
                row.push(model_id.to_string());
                row.extend(
                    columns
                        .iter()
                        .map(|m| scores.get(m).map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))),
                );
                row.push(if self.is_winner(model_id) { "✓" } else { "" }.to_string());
                row
            })
            .collect()
    }

    fn header(columns: &[&str]) -> Vec<String> {
        let mut header = Vec::with_capacity(columns.len() + 2);
        header.push("Model".to_string());
        header.extend(columns.iter().map(|c| (*c).to_string()));
        header.push("Best".to_string());
        header
    }

    /// Render report as plain text table
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();
        let columns = self.metric_columns();

        let mut builder = Builder::default();
        builder.push_record(Self::header(&columns));
        for row in self.rows(&columns) {
            builder.push_record(row);
        }
        writeln!(output, "{}", builder.build()).ok();

        if let Some(selection) = self.selection {
            writeln!(output).ok();
            writeln!(
                output,
                "Best model: {} ({} = {:.4}, {})",
                selection.model_id, selection.metric, selection.score, selection.direction
            )
            .ok();
        }

        output
    }

    /// Render report as markdown
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();
        let columns = self.metric_columns();

        writeln!(output, "# Model Evaluation").ok();
        writeln!(output).ok();

        if let Some(selection) = self.selection {
            writeln!(output, "**Selection Metric:** {} ({})", selection.metric, selection.direction).ok();
            writeln!(output, "**Best Model:** {}", selection.model_id).ok();
            writeln!(output).ok();
        }

        writeln!(output, "| {} |", Self::header(&columns).join(" | ")).ok();
        writeln!(output, "|{}", "---|".repeat(columns.len() + 2)).ok();
        for row in self.rows(&columns) {
            writeln!(output, "| {} |", row.join(" | ")).ok();
        }

        output
    }

    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct JsonReport<'r> {
            scores: &'r ScoreTable,
            #[serde(skip_serializing_if = "Option::is_none")]
            selection: Option<&'r Selection>,
        }

        serde_json::to_string_pretty(&JsonReport {
            scores: self.scores,
            selection: self.selection,
        })
    }
}

/// Table row for the registered-metric listing
#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    name: String,
    #[tabled(rename = "Direction")]
    direction: String,
}

/// Render the registered metrics and their optimization direction
#[must_use]
pub fn metrics_table(registry: &MetricRegistry) -> String {
    let rows: Vec<MetricRow> = registry
        .iter()
        .map(|m| MetricRow {
            name: m.name.clone(),
            direction: m.direction.to_string(),
        })
        .collect();
    Table::new(rows).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metrics::{MEAN_ABSOLUTE_ERROR, R2_SCORE};
    use crate::scorer::MetricScores;

    fn sample_table() -> ScoreTable {
        let mut table = ScoreTable::new();
        table.insert(
            "LinearRegression",
            [(R2_SCORE, 0.91), (MEAN_ABSOLUTE_ERROR, 1.25)]
                .into_iter()
                .collect::<MetricScores>(),
        );
        table.insert(
            "Ridge",
            [(R2_SCORE, 0.87), (MEAN_ABSOLUTE_ERROR, 1.5)]
                .into_iter()
                .collect::<MetricScores>(),
        );
        table
    }

    fn sample_selection() -> Selection {
        Selection {
            model_id: "LinearRegression".to_string(),
            metric: R2_SCORE.to_string(),
            score: 0.91,
            direction: Direction::Maximize,
        }
    }

    #[test]
    fn test_metric_columns_in_scoring_order() {
        let table = sample_table();
        let report = ScoreReport::new(&table);
        assert_eq!(report.metric_columns(), vec![R2_SCORE, MEAN_ABSOLUTE_ERROR]);
    }

    #[test]
    fn test_text_marks_winner() {
        let table = sample_table();
        let selection = sample_selection();
        let text = ScoreReport::new(&table).with_selection(&selection).to_text();

        assert!(text.contains("LinearRegression"));
        assert!(text.contains("0.9100"));
        assert!(text.contains("✓"));
        assert!(text.contains("Best model: LinearRegression (r2_score = 0.9100, maximize)"));
    }

    #[test]
    fn test_markdown_layout() {
        let table = sample_table();
        let selection = sample_selection();
        let md = ScoreReport::new(&table).with_selection(&selection).to_markdown();

        assert!(md.starts_with("# Model Evaluation"));
        assert!(md.contains("| Model | r2_score | mean_absolute_error | Best |"));
        assert!(md.contains("|---|---|---|---|"));
        assert!(md.contains("| LinearRegression | 0.9100 | 1.2500 | ✓ |"));
        assert!(md.contains("| Ridge | 0.8700 | 1.5000 |  |"));
    }

    #[test]
    fn test_missing_metric_rendered_as_dash() {
        let mut table = sample_table();
        table.insert("DummyRegressor", [(R2_SCORE, 0.0)].into_iter().collect::<MetricScores>());
        let md = ScoreReport::new(&table).to_markdown();
        assert!(md.contains("| DummyRegressor | 0.0000 | - |  |"));
    }

    #[test]
    fn test_json_without_selection() {
        let table = sample_table();
        let json = ScoreReport::new(&table).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("selection").is_none());
        assert_eq!(value["scores"]["Ridge"][R2_SCORE], 0.87);
    }

    #[test]
    fn test_summary_round_trip() {
        let table = sample_table();
        let summary = EvaluationSummary::new(&sample_selection(), &table);
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.best_model, "LinearRegression");

        let parsed: EvaluationSummary = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(parsed, summary);
    }

    #[test]
    fn test_metrics_table_lists_directions() {
        let text = metrics_table(&MetricRegistry::new());
        assert!(text.contains("r2_score"));
        assert!(text.contains("maximize"));
        assert!(text.contains("mean_absolute_error"));
        assert!(text.contains("minimize"));
    }
}
