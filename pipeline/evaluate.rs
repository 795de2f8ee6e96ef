//! # Model Evaluation
//!
//! Pure, deterministic metrics over a fitted model's test-set probabilities:
//! the ROC curve swept over every distinct probability, trapezoidal AUC, and
//! a confusion matrix with derived rates at the fixed 0.5 threshold.

use itertools::Itertools;
use ndarray::ArrayView1;
use thiserror::Error;

/// One point of the ROC curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RocPoint {
    pub fpr: f64,
    pub tpr: f64,
}

/// Counts at a single decision threshold.
#[derive(Debug, Clone, Copy)]
pub struct ConfusionMatrix {
    pub threshold: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    pub fn accuracy(&self) -> f64 {
        let correct = self.true_positives + self.true_negatives;
        let total = correct + self.false_positives + self.false_negatives;
        correct as f64 / total as f64
    }

    /// True-positive rate among actual positives.
    pub fn sensitivity(&self) -> f64 {
        let positives = self.true_positives + self.false_negatives;
        self.true_positives as f64 / positives as f64
    }

    /// True-negative rate among actual negatives.
    pub fn specificity(&self) -> f64 {
        let negatives = self.true_negatives + self.false_positives;
        self.true_negatives as f64 / negatives as f64
    }
}

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Evaluation requires at least one example; got none.")]
    EmptyInput,
    #[error("Got {labels} labels but {probs} probabilities.")]
    LengthMismatch { labels: usize, probs: usize },
    #[error("Labels must be 0 or 1; found {0}.")]
    NonBinaryLabel(f64),
    #[error("Probabilities must lie in [0, 1]; found {0}.")]
    ProbabilityOutOfRange(f64),
    #[error(
        "ROC analysis needs both classes present in the labels, but only class {0} was found."
    )]
    SingleClass(u8),
}

fn validate(labels: ArrayView1<f64>, probs: ArrayView1<f64>) -> Result<(usize, usize), EvalError> {
    if labels.is_empty() {
        return Err(EvalError::EmptyInput);
    }
    if labels.len() != probs.len() {
        return Err(EvalError::LengthMismatch {
            labels: labels.len(),
            probs: probs.len(),
        });
    }
    for &label in labels {
        if label != 0.0 && label != 1.0 {
            return Err(EvalError::NonBinaryLabel(label));
        }
    }
    for &p in probs {
        if !(0.0..=1.0).contains(&p) {
            return Err(EvalError::ProbabilityOutOfRange(p));
        }
    }
    let positives = labels.iter().filter(|&&l| l == 1.0).count();
    let negatives = labels.len() - positives;
    Ok((positives, negatives))
}

/// Sweeps the decision threshold over every distinct probability and records
/// the (false-positive rate, true-positive rate) trajectory. The first point
/// is exactly (0, 0) and the last exactly (1, 1), regardless of model
/// quality.
pub fn roc_curve(
    labels: ArrayView1<f64>,
    probs: ArrayView1<f64>,
) -> Result<Vec<RocPoint>, EvalError> {
    let (positives, negatives) = validate(labels, probs)?;
    if positives == 0 {
        return Err(EvalError::SingleClass(0));
    }
    if negatives == 0 {
        return Err(EvalError::SingleClass(1));
    }

    // Descending by probability; ties are collapsed into a single threshold
    // step so the curve is a function of the threshold, not of row order.
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut points = vec![RocPoint { fpr: 0.0, tpr: 0.0 }];
    let mut tp = 0usize;
    let mut fp = 0usize;

    for (_, group) in &order
        .iter()
        .chunk_by(|&&i| probs[i].to_bits())
    {
        for &i in group {
            if labels[i] == 1.0 {
                tp += 1;
            } else {
                fp += 1;
            }
        }
        points.push(RocPoint {
            fpr: fp as f64 / negatives as f64,
            tpr: tp as f64 / positives as f64,
        });
    }

    // The final threshold admits everything, landing exactly at (1, 1).
    debug_assert_eq!(points.last(), Some(&RocPoint { fpr: 1.0, tpr: 1.0 }));
    Ok(points)
}

/// Area under an ROC curve by trapezoidal integration over its points.
pub fn auc(points: &[RocPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| (w[1].fpr - w[0].fpr) * (w[1].tpr + w[0].tpr) / 2.0)
        .sum()
}

/// Confusion matrix at a fixed threshold: predictions with probability at or
/// above `threshold` count as positive.
pub fn confusion_at(
    labels: ArrayView1<f64>,
    probs: ArrayView1<f64>,
    threshold: f64,
) -> Result<ConfusionMatrix, EvalError> {
    validate(labels, probs)?;

    let mut matrix = ConfusionMatrix {
        threshold,
        true_positives: 0,
        false_positives: 0,
        true_negatives: 0,
        false_negatives: 0,
    };
    for (&label, &p) in labels.iter().zip(probs.iter()) {
        let predicted_positive = p >= threshold;
        match (label == 1.0, predicted_positive) {
            (true, true) => matrix.true_positives += 1,
            (true, false) => matrix.false_negatives += 1,
            (false, true) => matrix.false_positives += 1,
            (false, false) => matrix.true_negatives += 1,
        }
    }
    Ok(matrix)
}
