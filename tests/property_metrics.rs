//! Property tests for metrics and best-model selection
//!
//! Ensures metric and selection invariants hold for arbitrary inputs:
//! - Perfect predictions score perfectly
//! - Error metrics are finite and non-negative
//! - Selection is deterministic and keeps the first of tied models

#![allow(clippy::unwrap_used)]

use model_select_eval::metrics::{mean_absolute_error, r2_score, root_mean_squared_error};
use model_select_eval::{
    select_best, MetricError, MetricRegistry, MetricScores, ScoreTable, MEAN_ABSOLUTE_ERROR,
    MEAN_SQUARED_ERROR, R2_SCORE,
};
use proptest::collection::vec;
use proptest::prelude::*;

// =============================================================================
// Strategy Helpers
// =============================================================================

/// Finite values in a range that cannot overflow when squared and summed
fn series(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<f64>> {
    vec(-1.0e3f64..1.0e3, len)
}

/// Pair of equal-length series
fn series_pair(len: std::ops::Range<usize>) -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    len.prop_flat_map(|l| (vec(-1.0e3f64..1.0e3, l), vec(-1.0e3f64..1.0e3, l)))
}

fn table_for(metric: &str, scores: &[u8]) -> ScoreTable {
    let mut table = ScoreTable::new();
    for (i, score) in scores.iter().enumerate() {
        table.insert(
            format!("model-{i}"),
            [(metric, f64::from(*score))].into_iter().collect::<MetricScores>(),
        );
    }
    table
}

// =============================================================================
// Metric Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn prop_perfect_predictions_score_perfectly(actual in series(2..64)) {
        let registry = MetricRegistry::new();
        prop_assert_eq!(registry.compute(R2_SCORE, &actual, &actual).unwrap(), 1.0);
        prop_assert_eq!(registry.compute(MEAN_SQUARED_ERROR, &actual, &actual).unwrap(), 0.0);
        prop_assert_eq!(registry.compute(MEAN_ABSOLUTE_ERROR, &actual, &actual).unwrap(), 0.0);
    }

    #[test]
    fn prop_error_metrics_finite_and_non_negative((actual, predicted) in series_pair(1..64)) {
        let rmse = root_mean_squared_error(&actual, &predicted).unwrap();
        let mae = mean_absolute_error(&actual, &predicted).unwrap();

        prop_assert!(rmse.is_finite() && rmse >= 0.0, "rmse {}", rmse);
        prop_assert!(mae.is_finite() && mae >= 0.0, "mae {}", mae);
        // Quadratic mean bounds the arithmetic mean of absolute errors
        prop_assert!(rmse + 1e-9 * (1.0 + rmse) >= mae, "rmse {} < mae {}", rmse, mae);
    }

    #[test]
    fn prop_r2_at_most_one((actual, predicted) in series_pair(2..64)) {
        let r2 = r2_score(&actual, &predicted).unwrap();
        prop_assert!(!r2.is_nan());
        prop_assert!(r2 <= 1.0 + 1e-12, "r2 {}", r2);
    }

    #[test]
    fn prop_length_mismatch_is_computation_error(
        actual in series(1..32),
        extra in series(1..8),
    ) {
        let mut predicted = actual.clone();
        predicted.extend(extra);
        let err = MetricRegistry::new()
            .compute(MEAN_ABSOLUTE_ERROR, &actual, &predicted)
            .unwrap_err();
        let is_mismatch = matches!(err, MetricError::LengthMismatch { .. });
        prop_assert!(is_mismatch);
    }
}

// =============================================================================
// Selection Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn prop_r2_selection_picks_first_maximum(scores in vec(0u8..5, 1..20)) {
        let table = table_for(R2_SCORE, &scores);
        let best = select_best(&table, R2_SCORE, &MetricRegistry::new()).unwrap();

        let max = scores.iter().copied().max().unwrap();
        let first = scores.iter().position(|s| *s == max).unwrap();
        prop_assert_eq!(best.model_id, format!("model-{first}"));
    }

    #[test]
    fn prop_error_selection_picks_first_minimum(scores in vec(0u8..5, 1..20)) {
        let table = table_for(MEAN_SQUARED_ERROR, &scores);
        let best = select_best(&table, MEAN_SQUARED_ERROR, &MetricRegistry::new()).unwrap();

        let min = scores.iter().copied().min().unwrap();
        let first = scores.iter().position(|s| *s == min).unwrap();
        prop_assert_eq!(best.model_id, format!("model-{first}"));
    }

    #[test]
    fn prop_selection_is_deterministic(scores in vec(0u8..255, 1..20)) {
        let table = table_for(MEAN_ABSOLUTE_ERROR, &scores);
        let registry = MetricRegistry::new();
        let first = select_best(&table, MEAN_ABSOLUTE_ERROR, &registry).unwrap();
        let second = select_best(&table, MEAN_ABSOLUTE_ERROR, &registry).unwrap();
        prop_assert_eq!(first, second);
    }
}
