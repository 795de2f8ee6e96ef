//! # Model Training
//!
//! Fits a [`Network`] by mini-batch stochastic gradient descent with
//! Nesterov momentum on mean binary cross-entropy. The trailing fraction of
//! the (already shuffled) training rows is reserved as a validation split
//! that is scored once per epoch and never contributes to a weight update.
//!
//! All stochasticity (batch shuffling, dropout masks) draws from the
//! caller's `StdRng`; a fixed seed reproduces the fit bit for bit.

use crate::network::{Network, RiskModel};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

/// Hyperparameters for a single fit. The RNG seed lives with the caller,
/// which threads a seeded `StdRng` through every stochastic stage.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub momentum: f64,
    /// Trailing fraction of the training rows held out for monitoring.
    pub validation_split: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            learning_rate: 0.01,
            momentum: 0.9,
            validation_split: 0.2,
        }
    }
}

/// Loss trajectory of one fit, one entry per epoch.
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochStats>,
}

#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    pub loss: f64,
    pub val_loss: f64,
}

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("batch_size must be at least 1.")]
    ZeroBatchSize,
    #[error("epochs must be at least 1.")]
    ZeroEpochs,
    #[error("validation_split must lie in [0, 1), got {0}.")]
    InvalidValidationSplit(f64),
    #[error(
        "After reserving {reserved} validation rows from {total}, no rows remain to train on."
    )]
    EmptyTrainingSlice { total: usize, reserved: usize },
    #[error("Training data has {rows} rows but {labels} labels.")]
    LengthMismatch { rows: usize, labels: usize },
    #[error(
        "Training diverged: loss became non-finite at epoch {epoch}. Lower the learning rate."
    )]
    DivergedLoss { epoch: usize },
}

/// Mean binary cross-entropy of predicted probabilities against 0/1 labels.
/// Probabilities are clamped away from the endpoints so the log stays finite.
pub fn binary_cross_entropy(probs: ArrayView1<f64>, labels: ArrayView1<f64>) -> f64 {
    const EPS: f64 = 1e-7;
    let n = labels.len() as f64;
    -probs
        .iter()
        .zip(labels.iter())
        .map(|(&p, &t)| {
            let p = p.clamp(EPS, 1.0 - EPS);
            t * p.ln() + (1.0 - t) * (1.0 - p).ln()
        })
        .sum::<f64>()
        / n
}

/// Per-parameter velocity buffers for Nesterov momentum.
struct Velocity {
    weights: Vec<Array2<f64>>,
    bias: Vec<Array1<f64>>,
}

impl Velocity {
    fn zeros_like(network: &Network) -> Self {
        Velocity {
            weights: network
                .layers
                .iter()
                .map(|l| Array2::zeros(l.weights.raw_dim()))
                .collect(),
            bias: network
                .layers
                .iter()
                .map(|l| Array1::zeros(l.bias.raw_dim()))
                .collect(),
        }
    }
}

/// Fits `network` in place and returns the per-epoch loss history.
pub fn train(
    network: &mut Network,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    config: &TrainConfig,
    rng: &mut StdRng,
) -> Result<TrainingHistory, TrainError> {
    if config.batch_size == 0 {
        return Err(TrainError::ZeroBatchSize);
    }
    if config.epochs == 0 {
        return Err(TrainError::ZeroEpochs);
    }
    if !(0.0..1.0).contains(&config.validation_split) {
        return Err(TrainError::InvalidValidationSplit(config.validation_split));
    }
    if x.nrows() != y.len() {
        return Err(TrainError::LengthMismatch {
            rows: x.nrows(),
            labels: y.len(),
        });
    }

    let total = x.nrows();
    let n_val = ((total as f64) * config.validation_split).round() as usize;
    let n_train = total - n_val;
    if n_train == 0 {
        return Err(TrainError::EmptyTrainingSlice {
            total,
            reserved: n_val,
        });
    }

    // The preparation stage already shuffled rows, so a trailing slice is an
    // unbiased holdout.
    let x_fit = x.slice(s![..n_train, ..]);
    let y_fit = y.slice(s![..n_train]);
    let x_val = x.slice(s![n_train.., ..]);
    let y_val = y.slice(s![n_train..]);

    log::info!(
        "Training on {} rows, monitoring {} validation rows, {} epochs, batch size {}",
        n_train,
        n_val,
        config.epochs,
        config.batch_size
    );

    let mut velocity = Velocity::zeros_like(network);
    let mut history = TrainingHistory::default();
    let mut order: Vec<usize> = (0..n_train).collect();

    let progress = ProgressBar::new(config.epochs as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} epoch {pos}/{len} {msg}")
            .expect("valid progress template"),
    );

    for epoch in 0..config.epochs {
        order.shuffle(rng);

        let mut epoch_loss = 0.0;
        let mut seen = 0usize;

        for batch_indices in order.chunks(config.batch_size) {
            let mut batch_x = Array2::zeros((batch_indices.len(), x.ncols()));
            let mut batch_y = Array1::zeros(batch_indices.len());
            for (row, &i) in batch_indices.iter().enumerate() {
                batch_x.row_mut(row).assign(&x_fit.row(i));
                batch_y[row] = y_fit[i];
            }

            let cache = network.forward_train(batch_x.view(), rng);
            let batch_probs = cache.outputs[network.layers.len()].index_axis(Axis(1), 0);
            let batch_loss = binary_cross_entropy(batch_probs, batch_y.view());
            epoch_loss += batch_loss * batch_indices.len() as f64;
            seen += batch_indices.len();

            let grads = network.backward(&cache, &batch_y);
            apply_nesterov_update(network, &mut velocity, &grads, config);
        }

        let loss = epoch_loss / seen as f64;
        let val_loss = if n_val > 0 {
            let val_probs = network.predict_probabilities(x_val);
            binary_cross_entropy(val_probs.view(), y_val)
        } else {
            f64::NAN
        };

        if !loss.is_finite() {
            progress.abandon();
            return Err(TrainError::DivergedLoss { epoch: epoch + 1 });
        }

        log::debug!(
            "epoch {:>4}: loss {:.6}, val_loss {:.6}",
            epoch + 1,
            loss,
            val_loss
        );
        progress.set_message(format!("loss {loss:.4} val {val_loss:.4}"));
        progress.inc(1);

        history.epochs.push(EpochStats { loss, val_loss });
    }

    progress.finish_and_clear();
    if let Some(last) = history.epochs.last() {
        log::info!(
            "Training finished: final loss {:.6}, val_loss {:.6}",
            last.loss,
            last.val_loss
        );
    }
    Ok(history)
}

/// Nesterov momentum in its lookahead-folded form: the velocity is updated
/// with the plain momentum rule and the parameter step re-applies the
/// momentum term, which is algebraically the update evaluated at the
/// lookahead point.
fn apply_nesterov_update(
    network: &mut Network,
    velocity: &mut Velocity,
    grads: &crate::network::Gradients,
    config: &TrainConfig,
) {
    let lr = config.learning_rate;
    let mu = config.momentum;

    for (l, layer) in network.layers.iter_mut().enumerate() {
        velocity.weights[l] = &velocity.weights[l] * mu - &grads.weights[l] * lr;
        velocity.bias[l] = &velocity.bias[l] * mu - &grads.bias[l] * lr;

        layer.weights += &(&velocity.weights[l] * mu - &grads.weights[l] * lr);
        layer.bias += &(&velocity.bias[l] * mu - &grads.bias[l] * lr);
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;

    fn separable_problem(n: usize) -> (Array2<f64>, Array1<f64>) {
        // Feature 0 fully determines the label; the rest is noise-like
        // deterministic filler.
        let mut x = Array2::zeros((n, 4));
        let mut y = Array1::zeros(n);
        for i in 0..n {
            let positive = i % 2 == 0;
            x[[i, 0]] = if positive { 0.9 } else { 0.1 };
            x[[i, 1]] = (i as f64 * 0.37) % 1.0;
            x[[i, 2]] = (i as f64 * 0.53) % 1.0;
            x[[i, 3]] = (i as f64 * 0.71) % 1.0;
            y[i] = if positive { 1.0 } else { 0.0 };
        }
        (x, y)
    }

    #[test]
    fn bce_matches_hand_computation() {
        let probs = array![0.9, 0.1];
        let labels = array![1.0, 0.0];
        let expected = -((0.9f64).ln() + (0.9f64).ln()) / 2.0;
        assert_abs_diff_eq!(
            binary_cross_entropy(probs.view(), labels.view()),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn rejects_zero_batch_size() {
        let (x, y) = separable_problem(20);
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = Network::classifier(4, &mut rng);
        let config = TrainConfig {
            batch_size: 0,
            ..TrainConfig::default()
        };
        let err = train(&mut net, x.view(), y.view(), &config, &mut rng).unwrap_err();
        assert!(matches!(err, TrainError::ZeroBatchSize));
    }

    #[test]
    fn rejects_length_mismatch() {
        let (x, _) = separable_problem(20);
        let y = Array1::zeros(10);
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = Network::classifier(4, &mut rng);
        let err = train(&mut net, x.view(), y.view(), &TrainConfig::default(), &mut rng)
            .unwrap_err();
        assert!(matches!(err, TrainError::LengthMismatch { .. }));
    }

    #[test]
    fn loss_decreases_on_separable_data() {
        let (x, y) = separable_problem(128);
        let mut rng = StdRng::seed_from_u64(5);
        let mut net = Network::classifier(4, &mut rng);
        let config = TrainConfig {
            epochs: 40,
            batch_size: 16,
            ..TrainConfig::default()
        };
        let history = train(&mut net, x.view(), y.view(), &config, &mut rng).unwrap();

        let first = history.epochs.first().unwrap().loss;
        let last = history.epochs.last().unwrap().loss;
        assert!(
            last < first,
            "loss should fall on separable data: {first} -> {last}"
        );
    }

    #[test]
    fn fixed_seed_reproduces_history() {
        let (x, y) = separable_problem(64);
        let config = TrainConfig {
            epochs: 10,
            batch_size: 8,
            ..TrainConfig::default()
        };

        let run = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut net = Network::classifier(4, &mut rng);
            let history = train(&mut net, x.view(), y.view(), &config, &mut rng).unwrap();
            (net, history)
        };

        let (net_a, hist_a) = run(123);
        let (net_b, hist_b) = run(123);

        for (a, b) in hist_a.epochs.iter().zip(hist_b.epochs.iter()) {
            assert_eq!(a.loss.to_bits(), b.loss.to_bits());
            assert_eq!(a.val_loss.to_bits(), b.val_loss.to_bits());
        }
        for (la, lb) in net_a.layers.iter().zip(net_b.layers.iter()) {
            assert_eq!(la.weights, lb.weights);
        }
    }

    #[test]
    fn validation_rows_never_update_weights() {
        // With validation_split = 0.5 only the leading half may influence the
        // fit: poisoning the trailing half's labels must not change weights.
        let (x, y) = separable_problem(64);
        let mut y_poisoned = y.clone();
        for i in 32..64 {
            y_poisoned[i] = 1.0 - y_poisoned[i];
        }
        let config = TrainConfig {
            epochs: 5,
            batch_size: 8,
            validation_split: 0.5,
            ..TrainConfig::default()
        };

        let run = |labels: &Array1<f64>| {
            let mut rng = StdRng::seed_from_u64(77);
            let mut net = Network::classifier(4, &mut rng);
            train(&mut net, x.view(), labels.view(), &config, &mut rng).unwrap();
            net
        };

        let net_clean = run(&y);
        let net_poisoned = run(&y_poisoned);
        for (a, b) in net_clean.layers.iter().zip(net_poisoned.layers.iter()) {
            assert_eq!(a.weights, b.weights);
            assert_eq!(a.bias, b.bias);
        }
    }
}
