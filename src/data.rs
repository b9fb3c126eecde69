//! Test split loading and feature transformation.
//!
//! The test split is a CSV file with a header row. The target column is
//! split off as the ground-truth vector and every other column becomes a
//! numeric feature. Cells holding `?` or nothing are treated as missing and
//! filled in by the pre-fitted [`FeatureTransformer`].

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors from the data access layer
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to parse transformer: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Column not found: {0}")]
    MissingColumn(String),

    #[error("Row {row}, column {column}: not a number: {value:?}")]
    NonNumeric {
        row: usize,
        column: String,
        value: String,
    },

    #[error("Row {row}: missing target value")]
    MissingTarget { row: usize },

    #[error("Test split has no rows: {0}")]
    Empty(String),

    #[error("Invalid transformer: {0}")]
    InvalidTransformer(String),

    #[error("Row {row} has {got} features, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        got: usize,
    },
}

impl DataError {
    /// Error classification
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::Csv(_) => ErrorKind::Io,
            Self::Json(_) | Self::MissingColumn(_) | Self::InvalidTransformer(_) => {
                ErrorKind::Configuration
            }
            Self::NonNumeric { .. }
            | Self::MissingTarget { .. }
            | Self::Empty(_)
            | Self::RowWidth { .. } => ErrorKind::Computation,
        }
    }
}

/// Dense row-major feature matrix with named columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Build a matrix, checking every row has one value per column
    ///
    /// # Errors
    ///
    /// Returns [`DataError::RowWidth`] for the first ragged row.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self, DataError> {
        if let Some((row, values)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != columns.len())
        {
            return Err(DataError::RowWidth {
                row,
                expected: columns.len(),
                got: values.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    /// Column names
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows of feature values
    #[must_use]
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Number of rows
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of feature columns
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    /// Index of a column by name
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

fn is_missing(cell: &str) -> bool {
    cell.is_empty() || cell == "?"
}

/// Load a test split from CSV, separating features and target
///
/// # Errors
///
/// Returns an error if the file cannot be read, the target column is absent,
/// the split is empty, or a cell is not numeric.
pub fn load_test_split<P: AsRef<Path>>(
    path: P,
    target_column: &str,
) -> Result<(FeatureMatrix, Vec<f64>), DataError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| DataError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let (x, y) = read_test_split(file, target_column)?;
    if y.is_empty() {
        return Err(DataError::Empty(path.display().to_string()));
    }
    tracing::info!(
        path = %path.display(),
        rows = x.n_rows(),
        features = x.n_features(),
        "Loaded test split"
    );
    Ok((x, y))
}

/// Read a test split from any CSV source
///
/// # Errors
///
/// Same as [`load_test_split`], except that an empty split is allowed.
pub fn read_test_split<R: std::io::Read>(
    reader: R,
    target_column: &str,
) -> Result<(FeatureMatrix, Vec<f64>), DataError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let target_idx = headers
        .iter()
        .position(|h| h == target_column)
        .ok_or_else(|| DataError::MissingColumn(target_column.to_string()))?;

    let columns: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != target_idx)
        .map(|(_, h)| h.to_string())
        .collect();

    let mut rows = Vec::new();
    let mut target = Vec::new();

    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        let mut values = Vec::with_capacity(columns.len());

        for (i, cell) in record.iter().enumerate() {
            if i == target_idx {
                if is_missing(cell) {
                    return Err(DataError::MissingTarget { row });
                }
                let value = cell.parse::<f64>().map_err(|_| DataError::NonNumeric {
                    row,
                    column: target_column.to_string(),
                    value: cell.to_string(),
                })?;
                target.push(value);
            } else if is_missing(cell) {
                values.push(f64::NAN);
            } else {
                let value = cell.parse::<f64>().map_err(|_| DataError::NonNumeric {
                    row,
                    column: headers.get(i).unwrap_or_default().to_string(),
                    value: cell.to_string(),
                })?;
                values.push(value);
            }
        }
        rows.push(values);
    }

    Ok((FeatureMatrix::new(columns, rows)?, target))
}

/// Pre-fitted standard scaler with mean imputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTransformer {
    /// Columns in the order the models expect them
    pub columns: Vec<String>,
    /// Per-column mean, also used to fill missing values
    pub means: Vec<f64>,
    /// Per-column standard deviation
    pub scales: Vec<f64>,
}

impl FeatureTransformer {
    /// Load a transformer from a JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or is inconsistent.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DataError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let transformer: Self = serde_json::from_str(&content)?;
        transformer.validate()?;
        Ok(transformer)
    }

    /// Save the transformer as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DataError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| DataError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Fit means and standard deviations, ignoring missing values
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(x: &FeatureMatrix) -> Self {
        let mut means = Vec::with_capacity(x.n_features());
        let mut scales = Vec::with_capacity(x.n_features());

        for col in 0..x.n_features() {
            let present: Vec<f64> = x
                .rows()
                .iter()
                .map(|r| r[col])
                .filter(|v| !v.is_nan())
                .collect();
            if present.is_empty() {
                means.push(0.0);
                scales.push(1.0);
                continue;
            }
            let n = present.len() as f64;
            let mean = present.iter().sum::<f64>() / n;
            let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            means.push(mean);
            scales.push(variance.sqrt());
        }

        Self {
            columns: x.columns().to_vec(),
            means,
            scales,
        }
    }

    fn validate(&self) -> Result<(), DataError> {
        if self.means.len() != self.columns.len() || self.scales.len() != self.columns.len() {
            return Err(DataError::InvalidTransformer(format!(
                "{} columns, {} means, {} scales",
                self.columns.len(),
                self.means.len(),
                self.scales.len()
            )));
        }
        Ok(())
    }

    /// Select, impute and scale the transformer's columns
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MissingColumn`] if the input lacks a fitted column.
    pub fn transform(&self, x: &FeatureMatrix) -> Result<FeatureMatrix, DataError> {
        self.validate()?;

        let indices = self
            .columns
            .iter()
            .map(|c| {
                x.column_index(c)
                    .ok_or_else(|| DataError::MissingColumn(c.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let rows = x
            .rows()
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .enumerate()
                    .map(|(j, &src)| {
                        let value = if row[src].is_nan() { self.means[j] } else { row[src] };
                        let scale = if self.scales[j] == 0.0 { 1.0 } else { self.scales[j] };
                        (value - self.means[j]) / scale
                    })
                    .collect()
            })
            .collect();

        FeatureMatrix::new(self.columns.clone(), rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CSV: &str = "age,premium,claim\n30,1000,500\n40,?,700\n50,1400,900\n";

    #[test]
    fn test_read_test_split_separates_target() {
        let (x, y) = read_test_split(CSV.as_bytes(), "claim").unwrap();
        assert_eq!(x.columns(), &["age".to_string(), "premium".to_string()]);
        assert_eq!(x.n_rows(), 3);
        assert_eq!(y, vec![500.0, 700.0, 900.0]);
        assert!(x.rows()[1][1].is_nan());
    }

    #[test]
    fn test_read_test_split_missing_target_column() {
        let err = read_test_split(CSV.as_bytes(), "total").unwrap_err();
        assert!(matches!(err, DataError::MissingColumn(ref c) if c == "total"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_read_test_split_missing_target_value() {
        let csv = "a,y\n1,2\n3,?\n";
        let err = read_test_split(csv.as_bytes(), "y").unwrap_err();
        assert!(matches!(err, DataError::MissingTarget { row: 1 }));
    }

    #[test]
    fn test_read_test_split_non_numeric_feature() {
        let csv = "a,y\nhigh,2\n";
        let err = read_test_split(csv.as_bytes(), "y").unwrap_err();
        match err {
            DataError::NonNumeric { row, column, value } => {
                assert_eq!(row, 0);
                assert_eq!(column, "a");
                assert_eq!(value, "high");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_test_split_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.csv");
        std::fs::write(&path, "a,y\n").unwrap();
        assert!(matches!(
            load_test_split(&path, "y").unwrap_err(),
            DataError::Empty(_)
        ));
    }

    #[test]
    fn test_load_test_split_missing_file() {
        let err = load_test_split("/nonexistent/test.csv", "y").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_transformer_fit_ignores_missing() {
        let (x, _) = read_test_split(CSV.as_bytes(), "claim").unwrap();
        let t = FeatureTransformer::fit(&x);
        assert!((t.means[0] - 40.0).abs() < 1e-12);
        assert!((t.means[1] - 1200.0).abs() < 1e-12);
        assert!((t.scales[1] - 200.0).abs() < 1e-12);
    }

    #[test]
    fn test_transformer_imputes_and_scales() {
        let (x, _) = read_test_split(CSV.as_bytes(), "claim").unwrap();
        let t = FeatureTransformer::fit(&x);
        let out = t.transform(&x).unwrap();

        // Imputed cell lands exactly on the mean
        assert!(out.rows()[1][1].abs() < 1e-12);
        assert!((out.rows()[0][1] + 1.0).abs() < 1e-12);
        assert!(out.rows().iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_transformer_reorders_columns() {
        let (x, _) = read_test_split(CSV.as_bytes(), "claim").unwrap();
        let t = FeatureTransformer {
            columns: vec!["premium".to_string(), "age".to_string()],
            means: vec![0.0, 0.0],
            scales: vec![1.0, 0.0],
        };
        let out = t.transform(&x).unwrap();
        assert_eq!(out.columns()[0], "premium");
        assert!((out.rows()[0][0] - 1000.0).abs() < 1e-12);
        assert!((out.rows()[0][1] - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_transformer_missing_column() {
        let (x, _) = read_test_split(CSV.as_bytes(), "claim").unwrap();
        let t = FeatureTransformer {
            columns: vec!["income".to_string()],
            means: vec![0.0],
            scales: vec![1.0],
        };
        assert!(matches!(
            t.transform(&x).unwrap_err(),
            DataError::MissingColumn(ref c) if c == "income"
        ));
    }

    #[test]
    fn test_transformer_inconsistent_lengths() {
        let t = FeatureTransformer {
            columns: vec!["a".to_string(), "b".to_string()],
            means: vec![0.0],
            scales: vec![1.0, 1.0],
        };
        let x = FeatureMatrix::new(vec!["a".into(), "b".into()], vec![vec![1.0, 2.0]]).unwrap();
        assert!(matches!(
            t.transform(&x).unwrap_err(),
            DataError::InvalidTransformer(_)
        ));
    }

    #[test]
    fn test_transformer_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transformer.json");
        let t = FeatureTransformer {
            columns: vec!["a".to_string()],
            means: vec![1.5],
            scales: vec![0.5],
        };
        t.save(&path).unwrap();
        assert_eq!(FeatureTransformer::load(&path).unwrap(), t);
    }

    #[test]
    fn test_feature_matrix_rejects_ragged_rows() {
        let err = FeatureMatrix::new(vec!["a".into()], vec![vec![1.0], vec![1.0, 2.0]]).unwrap_err();
        assert!(matches!(
            err,
            DataError::RowWidth {
                row: 1,
                expected: 1,
                got: 2
            }
        ));
    }
}
