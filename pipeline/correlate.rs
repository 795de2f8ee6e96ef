//! # Global Interpretation
//!
//! Pearson correlation between each feature column and the label across the
//! training set, ranked by absolute magnitude. Purely descriptive: the
//! fitted model is never consulted.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

/// One feature's linear association with the label.
#[derive(Debug, Clone)]
pub struct CorrelationEntry {
    pub feature: String,
    pub r: f64,
}

/// All features ranked by `|r|`, strongest first.
#[derive(Debug, Clone)]
pub struct CorrelationTable {
    pub entries: Vec<CorrelationEntry>,
}

#[derive(Error, Debug)]
pub enum CorrelateError {
    #[error("Correlation requires at least two rows; got {0}.")]
    TooFewRows(usize),
    #[error("Expected {expected} feature names for {expected} columns, got {found}.")]
    NameCountMismatch { expected: usize, found: usize },
    #[error(
        "Column '{0}' has zero variance; its correlation with the label is undefined."
    )]
    ZeroVariance(String),
}

/// Pearson correlation coefficient of two equal-length vectors. Returns
/// `None` when either vector has zero variance.
pub fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Option<f64> {
    let n = a.len() as f64;
    let mean_a = a.sum() / n;
    let mean_b = b.sum() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Correlates every feature column of `x` against `y` and ranks the result
/// by absolute magnitude. A zero-variance feature (or label) is a hard
/// error: a silent NaN here would corrupt the ranking downstream.
pub fn correlate_features(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    feature_names: &[&str],
) -> Result<CorrelationTable, CorrelateError> {
    if x.nrows() < 2 {
        return Err(CorrelateError::TooFewRows(x.nrows()));
    }
    if feature_names.len() != x.ncols() {
        return Err(CorrelateError::NameCountMismatch {
            expected: x.ncols(),
            found: feature_names.len(),
        });
    }

    let mut entries = Vec::with_capacity(x.ncols());
    for (j, column) in x.axis_iter(Axis(1)).enumerate() {
        let r = pearson(column, y).ok_or_else(|| {
            // Distinguish a flat label from a flat feature in the message.
            let label_var = y.iter().all(|&v| v == y[0]);
            if label_var {
                CorrelateError::ZeroVariance("label".to_string())
            } else {
                CorrelateError::ZeroVariance(feature_names[j].to_string())
            }
        })?;
        entries.push(CorrelationEntry {
            feature: feature_names[j].to_string(),
            r,
        });
    }

    entries.sort_by(|a, b| b.r.abs().total_cmp(&a.r.abs()));
    Ok(CorrelationTable { entries })
}

/// Convenience over owned matrices, used by the CLI.
pub fn correlate_training_set(
    x_train: &Array2<f64>,
    y_train: ArrayView1<f64>,
    feature_names: &[&str],
) -> Result<CorrelationTable, CorrelateError> {
    correlate_features(x_train.view(), y_train, feature_names)
}
