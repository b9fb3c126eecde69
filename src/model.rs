//! Trained model artifacts and the model store.
//!
//! Candidate models arrive as JSON artifacts tagged with their model type.
//! The type name doubles as the model identifier used in score tables, so a
//! `Ridge` artifact is reported as `Ridge` regardless of its file name.

use crate::data::FeatureMatrix;
use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from loading, saving or running a model
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read model {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write model {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode model {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode model: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Model directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Invalid candidate pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Failed to list candidate: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("{model_type} expects {expected} features, got {got}")]
    FeatureMismatch {
        model_type: String,
        expected: usize,
        got: usize,
    },

    #[error("Invalid decision tree: {0}")]
    InvalidTree(String),
}

impl ModelError {
    /// Error classification
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Read { .. }
            | Self::Write { .. }
            | Self::Decode { .. }
            | Self::Encode(_)
            | Self::DirectoryNotFound(_)
            | Self::Glob(_) => ErrorKind::Io,
            Self::Pattern(_) => ErrorKind::Configuration,
            Self::FeatureMismatch { .. } | Self::InvalidTree(_) => ErrorKind::Computation,
        }
    }
}

/// Inference capability of a trained regression model
pub trait Regressor {
    /// Concrete model type name, used as the model identifier
    fn model_type(&self) -> &str;

    /// Predict one value per row
    ///
    /// # Errors
    ///
    /// Returns an error if the input does not fit the model.
    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>, ModelError>;

    /// Hyperparameters, string-encoded for experiment tracking
    fn params(&self) -> BTreeMap<String, String>;
}

/// Ordinary least squares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
    #[serde(default = "default_true")]
    pub fit_intercept: bool,
}

/// L2-regularized linear model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ridge {
    pub alpha: f64,
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
}

/// L1-regularized linear model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lasso {
    pub alpha: f64,
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,
}

/// Constant predictor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DummyRegressor {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    pub constant: f64,
}

/// Node of a fitted regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    /// Go left when `x[feature] <= threshold`
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Terminal prediction
    Leaf { value: f64 },
}

/// Regression tree stored as a flat node array rooted at index 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeRegressor {
    #[serde(default)]
    pub max_depth: Option<u32>,
    pub n_features: usize,
    pub nodes: Vec<TreeNode>,
}

const fn default_true() -> bool {
    true
}

const fn default_max_iter() -> u32 {
    1000
}

fn default_strategy() -> String {
    "constant".to_string()
}

fn linear_predict(
    model_type: &str,
    coefficients: &[f64],
    intercept: f64,
    x: &FeatureMatrix,
) -> Result<Vec<f64>, ModelError> {
    if x.n_features() != coefficients.len() {
        return Err(ModelError::FeatureMismatch {
            model_type: model_type.to_string(),
            expected: coefficients.len(),
            got: x.n_features(),
        });
    }
    Ok(x.rows()
        .iter()
        .map(|row| {
            row.iter()
                .zip(coefficients)
                .fold(intercept, |acc, (v, c)| v.mul_add(*c, acc))
        })
        .collect())
}

impl DecisionTreeRegressor {
    fn predict_row(&self, row: &[f64]) -> Result<f64, ModelError> {
        let mut idx = 0;
        // A well-formed tree visits each node at most once per row
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(idx) {
                Some(TreeNode::Leaf { value }) => return Ok(*value),
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = row.get(*feature).ok_or_else(|| {
                        ModelError::InvalidTree(format!("node {idx} splits on missing feature {feature}"))
                    })?;
                    idx = if value <= threshold { *left } else { *right };
                }
                None => {
                    return Err(ModelError::InvalidTree(format!("node {idx} does not exist")));
                }
            }
        }
        Err(ModelError::InvalidTree("cycle detected".to_string()))
    }
}

/// A trained model artifact, tagged by model type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_type")]
pub enum ModelArtifact {
    LinearRegression(LinearRegression),
    Ridge(Ridge),
    Lasso(Lasso),
    DummyRegressor(DummyRegressor),
    DecisionTreeRegressor(DecisionTreeRegressor),
}

impl Regressor for ModelArtifact {
    fn model_type(&self) -> &str {
        match self {
            Self::LinearRegression(_) => "LinearRegression",
            Self::Ridge(_) => "Ridge",
            Self::Lasso(_) => "Lasso",
            Self::DummyRegressor(_) => "DummyRegressor",
            Self::DecisionTreeRegressor(_) => "DecisionTreeRegressor",
        }
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>, ModelError> {
        let model_type = self.model_type();
        match self {
            Self::LinearRegression(m) => {
                let intercept = if m.fit_intercept { m.intercept } else { 0.0 };
                linear_predict(model_type, &m.coefficients, intercept, x)
            }
            Self::Ridge(m) => linear_predict(model_type, &m.coefficients, m.intercept, x),
            Self::Lasso(m) => linear_predict(model_type, &m.coefficients, m.intercept, x),
            Self::DummyRegressor(m) => Ok(vec![m.constant; x.n_rows()]),
            Self::DecisionTreeRegressor(m) => {
                if x.n_features() != m.n_features {
                    return Err(ModelError::FeatureMismatch {
                        model_type: model_type.to_string(),
                        expected: m.n_features,
                        got: x.n_features(),
                    });
                }
                x.rows().iter().map(|row| m.predict_row(row)).collect()
            }
        }
    }

    fn params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        match self {
            Self::LinearRegression(m) => {
                params.insert("fit_intercept".to_string(), m.fit_intercept.to_string());
            }
            Self::Ridge(m) => {
                params.insert("alpha".to_string(), m.alpha.to_string());
            }
            Self::Lasso(m) => {
                params.insert("alpha".to_string(), m.alpha.to_string());
                params.insert("max_iter".to_string(), m.max_iter.to_string());
            }
            Self::DummyRegressor(m) => {
                params.insert("strategy".to_string(), m.strategy.clone());
                params.insert("constant".to_string(), m.constant.to_string());
            }
            Self::DecisionTreeRegressor(m) => {
                let depth = m.max_depth.map_or_else(|| "None".to_string(), |d| d.to_string());
                params.insert("max_depth".to_string(), depth);
            }
        }
        params
    }
}

/// Loads and saves trained model artifacts
pub trait ModelStore {
    /// Model type handled by this store
    type Model: Regressor;

    /// Deserialize a model from a file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    fn load(&self, path: &Path) -> Result<Self::Model, ModelError>;

    /// Serialize a model to a file, overwriting it
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be encoded or written.
    fn save(&self, model: &Self::Model, path: &Path) -> Result<(), ModelError>;

    /// Serialize a model to bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be encoded.
    fn to_bytes(&self, model: &Self::Model) -> Result<Vec<u8>, ModelError>;
}

/// Store for JSON-encoded [`ModelArtifact`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonModelStore;

impl JsonModelStore {
    /// Create a new JSON model store
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ModelStore for JsonModelStore {
    type Model = ModelArtifact;

    fn load(&self, path: &Path) -> Result<ModelArtifact, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ModelError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    fn save(&self, model: &ModelArtifact, path: &Path) -> Result<(), ModelError> {
        let bytes = self.to_bytes(model)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ModelError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, bytes).map_err(|source| ModelError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn to_bytes(&self, model: &ModelArtifact) -> Result<Vec<u8>, ModelError> {
        Ok(serde_json::to_vec_pretty(model)?)
    }
}

/// List candidate model artifacts in a directory
///
/// Returns regular, non-hidden files sorted by file name.
///
/// # Errors
///
/// Returns an error if the directory does not exist or an entry cannot be read.
pub fn discover_candidates<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, ModelError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(ModelError::DirectoryNotFound(dir.to_path_buf()));
    }

    let pattern = format!("{}/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let options = glob::MatchOptions {
        require_literal_leading_dot: true,
        ..glob::MatchOptions::new()
    };

    let mut paths = Vec::new();
    for entry in glob::glob_with(&pattern, options)? {
        let path = entry?;
        if path.is_file() {
            paths.push(path);
        }
    }
    Ok(paths)
}
