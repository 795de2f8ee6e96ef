//! # Data Preparation
//!
//! Turns a validated [`ClinicalData`] table into the four matrices the rest
//! of the pipeline trains and evaluates on: a stratified train/test split,
//! majority-class downsampling of the training partition, and per-column
//! min-max scaling into [0, 1].
//!
//! Every stochastic step draws from an explicitly threaded `StdRng`, so a
//! caller that fixes the seed gets bit-identical partitions.
//!
//! Scaling statistics are computed per matrix: the test matrix is scaled by
//! its own column min/max rather than the training parameters. This mirrors
//! the reference analysis, which adopts the simplification deliberately;
//! changing it would change the documented reference outputs.

use crate::data::{ClinicalData, FEATURE_NAMES};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

/// Tunable knobs for the preparation stage.
#[derive(Debug, Clone, Copy)]
pub struct PrepareConfig {
    /// Fraction of records held out as the test partition.
    pub test_fraction: f64,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self { test_fraction: 0.2 }
    }
}

/// The four matrices produced by the preparation stage. The training side is
/// class-balanced and shuffled; both sides are min-max scaled.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
}

#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("The input table has no rows; nothing to prepare.")]
    EmptyInput,
    #[error("test_fraction must lie strictly between 0 and 1, got {0}.")]
    InvalidTestFraction(f64),
    #[error(
        "Class balancing produced an empty class: the {0} partition contains no records with label {1}."
    )]
    EmptyClass(&'static str, u8),
    #[error(
        "Feature column '{column}' is constant within this matrix; min-max scaling would divide by zero. Remove or perturb the column."
    )]
    ConstantColumn { column: String },
}

/// A disjoint train/test split of row indices into the source table.
#[derive(Debug, Clone)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Splits row indices into disjoint train/test sets, stratified by label so
/// both partitions keep the source class proportions.
pub fn split_stratified(
    data: &ClinicalData,
    test_fraction: f64,
    rng: &mut StdRng,
) -> Result<SplitIndices, PrepareError> {
    if data.num_records() == 0 {
        return Err(PrepareError::EmptyInput);
    }
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PrepareError::InvalidTestFraction(test_fraction));
    }

    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [0.0, 1.0] {
        let mut members: Vec<usize> = (0..data.num_records())
            .filter(|&i| data.y[i] == class)
            .collect();
        members.shuffle(rng);
        let n_test = ((members.len() as f64) * test_fraction).round() as usize;
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    if train.is_empty() {
        return Err(PrepareError::EmptyClass("training", 0));
    }
    log::info!(
        "Split {} records into {} train / {} test (stratified, test_fraction={:.2})",
        data.num_records(),
        train.len(),
        test.len(),
        test_fraction
    );
    Ok(SplitIndices { train, test })
}

/// Truncates the majority class among `indices` so both labels are
/// equinumerous, then re-shuffles. The grouping step orders rows by class,
/// so the shuffle is required, not cosmetic.
pub fn downsample_majority(
    data: &ClinicalData,
    indices: &[usize],
    rng: &mut StdRng,
) -> Result<Vec<usize>, PrepareError> {
    let mut negatives: Vec<usize> = indices.iter().copied().filter(|&i| data.y[i] == 0.0).collect();
    let mut positives: Vec<usize> = indices.iter().copied().filter(|&i| data.y[i] == 1.0).collect();

    if negatives.is_empty() {
        return Err(PrepareError::EmptyClass("training", 0));
    }
    if positives.is_empty() {
        return Err(PrepareError::EmptyClass("training", 1));
    }

    negatives.shuffle(rng);
    positives.shuffle(rng);
    let keep = negatives.len().min(positives.len());
    negatives.truncate(keep);
    positives.truncate(keep);

    let mut balanced = negatives;
    balanced.append(&mut positives);
    balanced.shuffle(rng);

    log::info!(
        "Downsampled training partition to {} records per class ({} total)",
        keep,
        balanced.len()
    );
    Ok(balanced)
}

/// Scales every column of `x` independently into [0, 1] using that matrix's
/// own min/max. A constant column is a hard error rather than a silent NaN.
pub fn scale_min_max(x: &mut Array2<f64>) -> Result<(), PrepareError> {
    for (j, mut column) in x.axis_iter_mut(Axis(1)).enumerate() {
        let min = column.iter().copied().fold(f64::INFINITY, f64::min);
        let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        if range == 0.0 {
            return Err(PrepareError::ConstantColumn {
                column: FEATURE_NAMES
                    .get(j)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("column {j}")),
            });
        }
        column.mapv_inplace(|v| (v - min) / range);
    }
    Ok(())
}

fn gather_rows(data: &ClinicalData, indices: &[usize]) -> (Array2<f64>, Array1<f64>) {
    let mut x = Array2::zeros((indices.len(), data.num_features()));
    let mut y = Array1::zeros(indices.len());
    for (row, &i) in indices.iter().enumerate() {
        x.row_mut(row).assign(&data.x.row(i));
        y[row] = data.y[i];
    }
    (x, y)
}

/// The full preparation stage: stratified split, training-side class
/// balancing, and per-matrix min-max scaling.
pub fn prepare(
    data: &ClinicalData,
    config: &PrepareConfig,
    rng: &mut StdRng,
) -> Result<PreparedData, PrepareError> {
    let split = split_stratified(data, config.test_fraction, rng)?;
    let balanced_train = downsample_majority(data, &split.train, rng)?;

    let (mut x_train, y_train) = gather_rows(data, &balanced_train);
    let (mut x_test, y_test) = gather_rows(data, &split.test);

    scale_min_max(&mut x_train)?;
    scale_min_max(&mut x_test)?;

    Ok(PreparedData {
        x_train,
        y_train,
        x_test,
        y_test,
    })
}
