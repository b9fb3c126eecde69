//! Pipeline configuration loaded from YAML.
//!
//! Four sections: `data`, `model`, `evaluation` and `tracking`. The records
//! are immutable once loaded and handed to the runner at construction.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable consulted when no tracking URI is configured
pub const TRACKING_URI_ENV: &str = "MLFLOW_TRACKING_URI";

/// Tracking store used when neither the config nor the environment names one
pub const DEFAULT_TRACKING_URI: &str = "./mlruns";

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Empty metric name in eval_metrics: {0:?}")]
    EmptyMetricName(String),

    #[error("No evaluation metrics configured")]
    NoMetrics,

    #[error("Selection metric {0} is not among the evaluated metrics")]
    SelectionMetricNotEvaluated(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl ConfigError {
    /// Error classification
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::IoError { .. } => ErrorKind::Io,
            _ => ErrorKind::Configuration,
        }
    }
}

/// Test split and preprocessing inputs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataConfig {
    /// CSV file holding the held-out test split
    pub test_split_path: PathBuf,
    /// Column holding the regression target
    pub target_column: String,
    /// Pre-fitted feature transformer (JSON)
    pub transformer_path: PathBuf,
}

/// Candidate and output model locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelConfig {
    /// Directory of trained candidate artifacts
    pub trained_models_path: PathBuf,
    /// Where the winning model is written
    pub final_model_path: PathBuf,
}

/// Metric selection and score outputs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvalConfig {
    /// Comma-separated metric names, e.g. `"r2_score, mean_absolute_error"`
    pub eval_metrics: String,
    /// Metric used to pick the winner
    pub eval_metric_selection: String,
    /// Where the score table is written
    pub eval_scores_path: PathBuf,
    /// Optional run summary (JSON)
    #[serde(default)]
    pub eval_summary_path: Option<PathBuf>,
}

impl EvalConfig {
    /// Parse `eval_metrics` into an ordered, de-duplicated list
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyMetricName` if an entry is blank and
    /// `ConfigError::NoMetrics` if the list is empty.
    pub fn metric_names(&self) -> Result<Vec<String>, ConfigError> {
        if self.eval_metrics.trim().is_empty() {
            return Err(ConfigError::NoMetrics);
        }

        let mut names: Vec<String> = Vec::new();
        for raw in self.eval_metrics.split(',') {
            let name = raw.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyMetricName(self.eval_metrics.clone()));
            }
            if names.iter().any(|n| n == name) {
                tracing::warn!(metric = name, "Ignoring repeated metric");
                continue;
            }
            names.push(name.to_string());
        }
        Ok(names)
    }
}

/// Experiment tracking settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingConfig {
    /// Tracking store URI; falls back to `MLFLOW_TRACKING_URI`
    #[serde(default)]
    pub mlflow_uri: Option<String>,
    /// Experiment runs are grouped under
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
    /// Registry name for the winner when the store has a registry
    #[serde(default = "default_registered_model_name")]
    pub registered_model_name: String,
}

fn default_experiment_name() -> String {
    "model-evaluation".to_string()
}

fn default_registered_model_name() -> String {
    "abc".to_string()
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            mlflow_uri: None,
            experiment_name: default_experiment_name(),
            registered_model_name: default_registered_model_name(),
        }
    }
}

impl TrackingConfig {
    /// Resolve the tracking URI: config, then environment, then `./mlruns`
    #[must_use]
    pub fn resolve_uri(&self) -> String {
        self.resolve_uri_with(std::env::var(TRACKING_URI_ENV).ok())
    }

    fn resolve_uri_with(&self, env_uri: Option<String>) -> String {
        self.mlflow_uri
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .or_else(|| env_uri.filter(|u| !u.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_TRACKING_URI.to_string())
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Data section
    pub data: DataConfig,
    /// Model section
    pub model: ModelConfig,
    /// Evaluation section
    pub evaluation: EvalConfig,
    /// Tracking section (optional)
    #[serde(default)]
    pub tracking: TrackingConfig,
}

impl PipelineConfig {
    /// Load and validate pipeline configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&content)?;
        tracing::debug!(path = %path.display(), "Loaded pipeline configuration");
        Ok(config)
    }

    /// Parse and validate pipeline configuration from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed or fails validation.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns an error if the metric list is malformed, the selection metric
    /// is not evaluated, or a required name is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.target_column.trim().is_empty() {
            return Err(ConfigError::MissingField("data.target_column".to_string()));
        }
        let selection = self.evaluation.eval_metric_selection.trim();
        if selection.is_empty() {
            return Err(ConfigError::MissingField(
                "evaluation.eval_metric_selection".to_string(),
            ));
        }
        if self.tracking.experiment_name.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "tracking.experiment_name".to_string(),
            ));
        }

        let metrics = self.evaluation.metric_names()?;
        if !metrics.iter().any(|m| m == selection) {
            return Err(ConfigError::SelectionMetricNotEvaluated(
                selection.to_string(),
            ));
        }
        Ok(())
    }

    /// Selection metric with surrounding whitespace removed
    #[must_use]
    pub fn selection_metric(&self) -> &str {
        self.evaluation.eval_metric_selection.trim()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
data:
  test_split_path: artifacts/data/test.csv
  target_column: total_claim_amount
  transformer_path: artifacts/data/transformer.json
model:
  trained_models_path: artifacts/models/trained
  final_model_path: artifacts/models/final/model.json
evaluation:
  eval_metrics: 'r2_score, mean_squared_error, mean_absolute_error'
  eval_metric_selection: r2_score
  eval_scores_path: artifacts/evaluation/scores.json
tracking:
  mlflow_uri: file:./mlruns
";

    fn eval_config(metrics: &str) -> EvalConfig {
        EvalConfig {
            eval_metrics: metrics.to_string(),
            eval_metric_selection: "r2_score".to_string(),
            eval_scores_path: PathBuf::from("scores.json"),
            eval_summary_path: None,
        }
    }

    // ==========================================================================
    // Parsing
    // ==========================================================================

    #[test]
    fn test_parse_full_config() {
        let config = PipelineConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.data.target_column, "total_claim_amount");
        assert_eq!(
            config.model.final_model_path,
            PathBuf::from("artifacts/models/final/model.json")
        );
        assert_eq!(config.selection_metric(), "r2_score");
        assert_eq!(config.evaluation.eval_summary_path, None);
        assert_eq!(config.tracking.mlflow_uri.as_deref(), Some("file:./mlruns"));
        assert_eq!(config.tracking.experiment_name, "model-evaluation");
        assert_eq!(config.tracking.registered_model_name, "abc");
    }

    #[test]
    fn test_tracking_section_is_optional() {
        let yaml = SAMPLE.split("tracking:").next().unwrap();
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.tracking, TrackingConfig::default());
    }

    #[test]
    fn test_missing_section_is_yaml_error() {
        let err = PipelineConfig::from_yaml("data:\n  target_column: y\n").unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::load(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.evaluation.metric_names().unwrap().len(), 3);
    }

    // ==========================================================================
    // Metric list
    // ==========================================================================

    #[test]
    fn test_metric_names_trims_and_keeps_order() {
        let names = eval_config(" mean_absolute_error ,r2_score").metric_names().unwrap();
        assert_eq!(names, vec!["mean_absolute_error", "r2_score"]);
    }

    #[test]
    fn test_metric_names_drops_repeats() {
        let names = eval_config("r2_score, mean_absolute_error, r2_score")
            .metric_names()
            .unwrap();
        assert_eq!(names, vec!["r2_score", "mean_absolute_error"]);
    }

    #[test]
    fn test_metric_names_rejects_blank_entry() {
        let err = eval_config("r2_score,,mean_absolute_error")
            .metric_names()
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyMetricName(_)));
    }

    #[test]
    fn test_metric_names_rejects_empty_list() {
        let err = eval_config("  ").metric_names().unwrap_err();
        assert!(matches!(err, ConfigError::NoMetrics));
    }

    #[test]
    fn test_selection_metric_must_be_evaluated() {
        let yaml = SAMPLE.replace(
            "eval_metric_selection: r2_score",
            "eval_metric_selection: max_error",
        );
        let err = PipelineConfig::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::SelectionMetricNotEvaluated(ref m) if m == "max_error"));
    }

    // ==========================================================================
    // Tracking URI
    // ==========================================================================

    #[test]
    fn test_uri_prefers_config() {
        let tracking = TrackingConfig {
            mlflow_uri: Some("http://tracker:5000".to_string()),
            ..TrackingConfig::default()
        };
        assert_eq!(
            tracking.resolve_uri_with(Some("file:/env".to_string())),
            "http://tracker:5000"
        );
    }

    #[test]
    fn test_uri_falls_back_to_env_then_default() {
        let tracking = TrackingConfig::default();
        assert_eq!(
            tracking.resolve_uri_with(Some("file:/env".to_string())),
            "file:/env"
        );
        assert_eq!(tracking.resolve_uri_with(None), DEFAULT_TRACKING_URI);
        assert_eq!(
            tracking.resolve_uri_with(Some("  ".to_string())),
            DEFAULT_TRACKING_URI
        );
    }
}
