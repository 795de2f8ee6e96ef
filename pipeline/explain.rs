//! # Local Interpretation (LIME)
//!
//! A perturbation-based surrogate explainer for individual predictions. For
//! one record it resamples a synthetic neighborhood from the training bin
//! distribution, queries the fitted model on that neighborhood (only ever
//! through [`RiskModel`]), weights the samples by proximity, and fits a
//! sparse weighted linear surrogate on binned feature indicators. The top-K
//! surrogate coefficients are the explanation.
//!
//! Batch mode runs the same procedure independently per instance; instances
//! share no mutable state, so the map is parallelized with rayon. Each
//! instance derives its own child RNG from the batch seed, which keeps
//! results independent of scheduling order.

use crate::network::{ProblemKind, RiskModel};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Explainer configuration.
#[derive(Debug, Clone, Copy)]
pub struct LimeConfig {
    /// Size of the perturbed neighborhood per instance.
    pub num_samples: usize,
    /// Maximum number of features reported per explanation.
    pub top_k: usize,
    /// Equal-width bins per feature, computed from the training matrix.
    pub bins: usize,
    /// RBF proximity kernel width; `None` uses `0.75 * sqrt(n_features)`.
    pub kernel_width: Option<f64>,
    /// Ridge penalty on the surrogate's non-intercept coefficients.
    pub ridge: f64,
}

impl Default for LimeConfig {
    fn default() -> Self {
        Self {
            num_samples: 5000,
            top_k: 3,
            bins: 2,
            kernel_width: None,
            ridge: 1e-3,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("The explainer only supports binary classifiers.")]
    UnsupportedProblemKind,
    #[error("The explainer needs at least 2 bins per feature, got {0}.")]
    TooFewBins(usize),
    #[error("The explainer needs at least 10 neighborhood samples, got {0}.")]
    TooFewSamples(usize),
    #[error("top_k must be at least 1.")]
    TopKZero,
    #[error("Cannot fit bins on an empty training matrix.")]
    EmptyTraining,
    #[error(
        "Feature column '{column}' is constant in the training matrix; equal-width bins are undefined."
    )]
    ConstantColumn { column: String },
    #[error("Instance has {found} features but the binner was fitted on {expected}.")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error(
        "Feature '{feature}' of the instance ({value}) lies outside the training distribution; the explanation would extrapolate."
    )]
    OutOfRange { feature: String, value: f64 },
    #[error(
        "The surrogate regression system is singular; try more neighborhood samples or a larger ridge penalty."
    )]
    SingularSystem,
}

/// Equal-width discretization of each feature, fitted on the training
/// matrix, together with each bin's empirical frequency. The explainer
/// resamples neighborhoods from these frequencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binner {
    /// Per feature: `bins + 1` ascending edges spanning the training range.
    pub edges: Vec<Vec<f64>>,
    /// Per feature: empirical probability of each bin in the training set.
    pub frequencies: Vec<Vec<f64>>,
}

impl Binner {
    /// Fits equal-width bins per feature from the training matrix.
    pub fn fit(
        x_train: ArrayView2<f64>,
        bins: usize,
        feature_names: &[&str],
    ) -> Result<Binner, ExplainError> {
        if bins < 2 {
            return Err(ExplainError::TooFewBins(bins));
        }
        if x_train.nrows() == 0 {
            return Err(ExplainError::EmptyTraining);
        }

        let mut edges = Vec::with_capacity(x_train.ncols());
        let mut frequencies = Vec::with_capacity(x_train.ncols());

        for (j, column) in x_train.axis_iter(Axis(1)).enumerate() {
            let min = column.iter().copied().fold(f64::INFINITY, f64::min);
            let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if max == min {
                return Err(ExplainError::ConstantColumn {
                    column: feature_names
                        .get(j)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("column {j}")),
                });
            }

            let width = (max - min) / bins as f64;
            let feature_edges: Vec<f64> =
                (0..=bins).map(|k| min + width * k as f64).collect();

            let mut counts = vec![0usize; bins];
            for &value in column {
                counts[bin_index(&feature_edges, value)] += 1;
            }
            let n = column.len() as f64;
            frequencies.push(counts.iter().map(|&c| c as f64 / n).collect());
            edges.push(feature_edges);
        }

        Ok(Binner { edges, frequencies })
    }

    pub fn num_features(&self) -> usize {
        self.edges.len()
    }

    pub fn num_bins(&self) -> usize {
        self.frequencies.first().map_or(0, |f| f.len())
    }

    /// Assigns `value` to a bin of `feature`, failing when the value falls
    /// outside the training range (beyond a small tolerance).
    pub fn assign(
        &self,
        feature: usize,
        value: f64,
        feature_name: &str,
    ) -> Result<usize, ExplainError> {
        let edges = &self.edges[feature];
        let span = edges[edges.len() - 1] - edges[0];
        let tolerance = span * 1e-9;
        if value < edges[0] - tolerance || value > edges[edges.len() - 1] + tolerance {
            return Err(ExplainError::OutOfRange {
                feature: feature_name.to_string(),
                value,
            });
        }
        Ok(bin_index(edges, value))
    }

    /// Human-readable range of one bin, e.g. `sbp > 0.50`.
    fn describe(&self, feature: usize, name: &str, bin: usize) -> String {
        let edges = &self.edges[feature];
        let last = edges.len() - 2;
        if bin == 0 {
            format!("{name} <= {:.2}", edges[1])
        } else if bin == last {
            format!("{name} > {:.2}", edges[bin])
        } else {
            format!("{:.2} < {name} <= {:.2}", edges[bin], edges[bin + 1])
        }
    }
}

fn bin_index(edges: &[f64], value: f64) -> usize {
    let bins = edges.len() - 1;
    let width = (edges[bins] - edges[0]) / bins as f64;
    let idx = ((value - edges[0]) / width).floor() as isize;
    idx.clamp(0, bins as isize - 1) as usize
}

/// One selected feature of an explanation: its signed local weight and the
/// bin it occupies for this instance.
#[derive(Debug, Clone)]
pub struct FeatureWeight {
    pub feature: String,
    /// Range description of the instance's bin, e.g. `sbp > 0.50`.
    pub descriptor: String,
    pub weight: f64,
}

/// The explanation of a single prediction: at most `top_k` features ranked
/// by absolute local weight, plus the surrogate's fit quality.
#[derive(Debug, Clone)]
pub struct Explanation {
    /// Row index of the explained record in its source matrix.
    pub row: usize,
    /// The model's probability for the record itself.
    pub prediction: f64,
    /// Weighted R² of the local surrogate on the neighborhood.
    pub r2: f64,
    pub features: Vec<FeatureWeight>,
}

/// Explains one record. `instance` must be in the same (scaled) feature
/// space the binner was fitted on.
pub fn explain_instance(
    model: &dyn RiskModel,
    binner: &Binner,
    feature_names: &[&str],
    instance: ArrayView1<f64>,
    row: usize,
    config: &LimeConfig,
    rng: &mut StdRng,
) -> Result<Explanation, ExplainError> {
    if model.problem_kind() != ProblemKind::BinaryClassification {
        return Err(ExplainError::UnsupportedProblemKind);
    }
    if config.top_k == 0 {
        return Err(ExplainError::TopKZero);
    }
    if config.num_samples < 10 {
        return Err(ExplainError::TooFewSamples(config.num_samples));
    }
    let d = instance.len();
    if d != binner.num_features() {
        return Err(ExplainError::FeatureCountMismatch {
            expected: binner.num_features(),
            found: d,
        });
    }

    let instance_bins: Vec<usize> = (0..d)
        .map(|j| binner.assign(j, instance[j], feature_names[j]))
        .collect::<Result<_, _>>()?;

    // Neighborhood: sample 0 is the record itself; the rest resample each
    // feature's bin from the training distribution, freezing a random subset
    // of features at the instance's own bin to keep the sample local.
    let n = config.num_samples;
    let mut perturbed = Array2::zeros((n, d));
    let mut indicators = Array2::zeros((n, d));
    perturbed.row_mut(0).assign(&instance);
    indicators.row_mut(0).fill(1.0);

    for s in 1..n {
        for j in 0..d {
            let bin = if rng.gen_bool(0.5) {
                instance_bins[j]
            } else {
                sample_bin(&binner.frequencies[j], rng)
            };
            let lo = binner.edges[j][bin];
            let hi = binner.edges[j][bin + 1];
            perturbed[[s, j]] = rng.gen_range(lo..hi);
            indicators[[s, j]] = if bin == instance_bins[j] { 1.0 } else { 0.0 };
        }
    }

    // The single contact point with the black box.
    let probs = model.predict_probabilities(perturbed.view());

    let width = config
        .kernel_width
        .unwrap_or_else(|| 0.75 * (d as f64).sqrt());
    let kernel_weights = Array1::from_shape_fn(n, |s| {
        let distance_sq: f64 = (0..d)
            .map(|j| {
                let diff = perturbed[[s, j]] - instance[j];
                diff * diff
            })
            .sum();
        (-distance_sq / (width * width)).exp()
    });

    // Full weighted ridge fit on all indicators, then keep the top-K
    // coefficients and refit on just those columns.
    let all_columns: Vec<usize> = (0..d).collect();
    let full_beta = weighted_ridge(
        &indicators,
        &probs,
        &kernel_weights,
        &all_columns,
        config.ridge,
    )?;

    let mut ranked: Vec<usize> = (0..d).collect();
    ranked.sort_by(|&a, &b| full_beta[b + 1].abs().total_cmp(&full_beta[a + 1].abs()));
    let mut selected: Vec<usize> = ranked.into_iter().take(config.top_k.min(d)).collect();
    selected.sort_unstable();

    let beta = weighted_ridge(&indicators, &probs, &kernel_weights, &selected, config.ridge)?;
    let r2 = weighted_r2(&indicators, &probs, &kernel_weights, &selected, &beta);

    let mut features: Vec<FeatureWeight> = selected
        .iter()
        .enumerate()
        .map(|(k, &j)| FeatureWeight {
            feature: feature_names[j].to_string(),
            descriptor: binner.describe(j, feature_names[j], instance_bins[j]),
            weight: beta[k + 1],
        })
        .collect();
    features.sort_by(|a, b| b.weight.abs().total_cmp(&a.weight.abs()));

    Ok(Explanation {
        row,
        prediction: probs[0],
        r2,
        features,
    })
}

/// Explains a set of records independently and in parallel. Each instance
/// gets a child RNG derived from `seed` and its row index, so the output is
/// deterministic regardless of how rayon schedules the map.
pub fn explain_batch(
    model: &dyn RiskModel,
    binner: &Binner,
    x: ArrayView2<f64>,
    rows: &[usize],
    feature_names: &[&str],
    config: &LimeConfig,
    seed: u64,
) -> Result<Vec<Explanation>, ExplainError> {
    rows.par_iter()
        .map(|&row| {
            let child_seed = seed ^ (row as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            let mut rng = StdRng::seed_from_u64(child_seed);
            explain_instance(
                model,
                binner,
                feature_names,
                x.row(row),
                row,
                config,
                &mut rng,
            )
        })
        .collect()
}

/// Features × instances matrix of signed local weights; `NaN` marks cells
/// where a feature was not selected for that instance.
#[derive(Debug, Clone)]
pub struct ExplanationHeatmap {
    pub features: Vec<String>,
    pub rows: Vec<usize>,
    pub weights: Array2<f64>,
}

pub fn heatmap(explanations: &[Explanation], feature_names: &[&str]) -> ExplanationHeatmap {
    let mut weights = Array2::from_elem((feature_names.len(), explanations.len()), f64::NAN);
    for (col, explanation) in explanations.iter().enumerate() {
        for fw in &explanation.features {
            if let Some(fidx) = feature_names.iter().position(|&n| n == fw.feature) {
                weights[[fidx, col]] = fw.weight;
            }
        }
    }
    ExplanationHeatmap {
        features: feature_names.iter().map(|s| s.to_string()).collect(),
        rows: explanations.iter().map(|e| e.row).collect(),
        weights,
    }
}

fn sample_bin(frequencies: &[f64], rng: &mut StdRng) -> usize {
    let draw: f64 = rng.gen_range(0.0..1.0);
    let mut cumulative = 0.0;
    for (bin, &p) in frequencies.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            return bin;
        }
    }
    frequencies.len() - 1
}

/// Weighted ridge regression of `targets` on the chosen indicator columns
/// plus an unpenalized intercept. Returns `[intercept, beta_0, ...]` in the
/// order of `columns`.
fn weighted_ridge(
    indicators: &Array2<f64>,
    targets: &Array1<f64>,
    weights: &Array1<f64>,
    columns: &[usize],
    ridge: f64,
) -> Result<Array1<f64>, ExplainError> {
    let n = indicators.nrows();
    let p = columns.len() + 1;

    // Normal equations: (XᵀWX + λD) β = XᵀWy with D zero on the intercept.
    let mut normal = Array2::zeros((p, p));
    let mut rhs = Array1::zeros(p);

    for s in 0..n {
        let w = weights[s];
        let mut x_row = Vec::with_capacity(p);
        x_row.push(1.0);
        for &j in columns {
            x_row.push(indicators[[s, j]]);
        }
        for a in 0..p {
            rhs[a] += w * x_row[a] * targets[s];
            for b in a..p {
                normal[[a, b]] += w * x_row[a] * x_row[b];
            }
        }
    }
    for a in 0..p {
        for b in 0..a {
            normal[[a, b]] = normal[[b, a]];
        }
    }
    for a in 1..p {
        normal[[a, a]] += ridge;
    }

    solve_spd(normal, rhs)
}

/// Weighted R² of the selected-columns surrogate against the model output.
fn weighted_r2(
    indicators: &Array2<f64>,
    targets: &Array1<f64>,
    weights: &Array1<f64>,
    columns: &[usize],
    beta: &Array1<f64>,
) -> f64 {
    let n = indicators.nrows();
    let total_weight: f64 = weights.sum();
    let weighted_mean: f64 = weights
        .iter()
        .zip(targets.iter())
        .map(|(&w, &t)| w * t)
        .sum::<f64>()
        / total_weight;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for s in 0..n {
        let mut prediction = beta[0];
        for (k, &j) in columns.iter().enumerate() {
            prediction += beta[k + 1] * indicators[[s, j]];
        }
        ss_res += weights[s] * (targets[s] - prediction).powi(2);
        ss_tot += weights[s] * (targets[s] - weighted_mean).powi(2);
    }
    if ss_tot == 0.0 {
        return 0.0;
    }
    1.0 - ss_res / ss_tot
}

/// Cholesky solve of a small symmetric positive-definite system. The ridge
/// term keeps the normal matrix positive definite for any sane neighborhood.
fn solve_spd(mut a: Array2<f64>, b: Array1<f64>) -> Result<Array1<f64>, ExplainError> {
    let p = b.len();

    // In-place lower-triangular factorization.
    for j in 0..p {
        for k in 0..j {
            let l_jk = a[[j, k]];
            for i in j..p {
                a[[i, j]] -= a[[i, k]] * l_jk;
            }
        }
        let pivot = a[[j, j]];
        if pivot <= 0.0 || !pivot.is_finite() {
            return Err(ExplainError::SingularSystem);
        }
        let root = pivot.sqrt();
        for i in j..p {
            a[[i, j]] /= root;
        }
    }

    // Forward then backward substitution.
    let mut y = b;
    for i in 0..p {
        for k in 0..i {
            let partial = a[[i, k]] * y[k];
            y[i] -= partial;
        }
        y[i] /= a[[i, i]];
    }
    for i in (0..p).rev() {
        for k in (i + 1)..p {
            let partial = a[[k, i]] * y[k];
            y[i] -= partial;
        }
        y[i] /= a[[i, i]];
    }
    Ok(y)
}
