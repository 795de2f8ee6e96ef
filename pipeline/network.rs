//! # Model Definition
//!
//! A small fully-connected binary classifier with a deterministic shape:
//! two rectified-linear hidden layers (100 and 50 units), inverted dropout
//! after each, and a single sigmoid output unit. Weights are initialized
//! from a caller-supplied RNG so a fixed seed reproduces a fit exactly.
//!
//! Downstream consumers (evaluation, the explainer) never look inside the
//! network; they see it only through the [`RiskModel`] trait as an opaque
//! `feature vector -> probability` function.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

/// What kind of prediction problem a model answers. The explainer checks
/// this before trusting the probability interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemKind {
    BinaryClassification,
}

/// The seam between the pipeline and any fitted model: an opaque function
/// from feature rows to probabilities, plus a self-description.
pub trait RiskModel: Sync {
    fn problem_kind(&self) -> ProblemKind;
    /// Probability of the positive class for each row of `x`.
    fn predict_probabilities(&self, x: ArrayView2<f64>) -> Array1<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Sigmoid => z.mapv(|v| 1.0 / (1.0 + (-v).exp())),
        }
    }

    /// Derivative with respect to the pre-activation, expressed in terms of
    /// the activation output `a`.
    fn derivative_from_output(&self, a: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => a.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Sigmoid => a.mapv(|v| v * (1.0 - v)),
        }
    }
}

/// One dense layer: `a = act(x . w + b)`, with an optional inverted-dropout
/// mask applied to the output during training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    /// Shape `[fan_in, fan_out]`.
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
    pub activation: Activation,
    /// Drop probability applied to this layer's output while training.
    pub dropout: Option<f64>,
}

impl DenseLayer {
    fn new(
        fan_in: usize,
        fan_out: usize,
        activation: Activation,
        dropout: Option<f64>,
        rng: &mut StdRng,
    ) -> Self {
        // He initialization for ReLU layers, Xavier for the sigmoid head.
        let std_dev = match activation {
            Activation::Relu => (2.0 / fan_in as f64).sqrt(),
            Activation::Sigmoid => (1.0 / fan_in as f64).sqrt(),
        };
        let normal = Normal::new(0.0, std_dev).expect("finite std dev");
        let weights =
            Array2::from_shape_fn((fan_in, fan_out), |_| rng.sample(normal));
        DenseLayer {
            weights,
            bias: Array1::zeros(fan_out),
            activation,
            dropout,
        }
    }
}

/// The feed-forward classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub layers: Vec<DenseLayer>,
}

/// Per-layer intermediates retained by a training-mode forward pass, in the
/// form backpropagation consumes: the (post-dropout) output of every layer
/// and the dropout mask that produced it.
pub(crate) struct ForwardCache {
    /// `outputs[l]` is the input to layer `l`; `outputs[layers.len()]` is the
    /// final prediction. All post-dropout.
    pub outputs: Vec<Array2<f64>>,
    /// `masks[l]` is the inverted-dropout multiplier applied to layer `l`'s
    /// activation, if that layer has dropout.
    pub masks: Vec<Option<Array2<f64>>>,
}

/// Gradients of the loss with respect to every layer's parameters.
pub(crate) struct Gradients {
    pub weights: Vec<Array2<f64>>,
    pub bias: Vec<Array1<f64>>,
}

impl Network {
    /// The fixed architecture used throughout: 100-ReLU + dropout(0.5),
    /// 50-ReLU + dropout(0.5), 1-sigmoid.
    pub fn classifier(n_features: usize, rng: &mut StdRng) -> Network {
        Network {
            layers: vec![
                DenseLayer::new(n_features, 100, Activation::Relu, Some(0.5), rng),
                DenseLayer::new(100, 50, Activation::Relu, Some(0.5), rng),
                DenseLayer::new(50, 1, Activation::Sigmoid, None, rng),
            ],
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.layers[0].weights.nrows()
    }

    /// Inference-mode forward pass: dropout disabled, inverted scaling makes
    /// no correction necessary.
    fn forward(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut a = x.to_owned();
        for layer in &self.layers {
            let z = a.dot(&layer.weights) + &layer.bias;
            a = layer.activation.apply(&z);
        }
        a
    }

    /// Training-mode forward pass: draws a fresh inverted-dropout mask per
    /// layer from `rng` and keeps everything backprop needs.
    pub(crate) fn forward_train(&self, x: ArrayView2<f64>, rng: &mut StdRng) -> ForwardCache {
        let mut outputs = Vec::with_capacity(self.layers.len() + 1);
        let mut masks = Vec::with_capacity(self.layers.len());
        outputs.push(x.to_owned());

        for layer in &self.layers {
            let input = outputs.last().expect("outputs is never empty");
            let z = input.dot(&layer.weights) + &layer.bias;
            let mut a = layer.activation.apply(&z);

            let mask = layer.dropout.map(|rate| {
                let keep = 1.0 - rate;
                Array2::from_shape_fn(a.raw_dim(), |_| {
                    if rng.gen_bool(keep) { 1.0 / keep } else { 0.0 }
                })
            });
            if let Some(mask) = &mask {
                a *= mask;
            }

            masks.push(mask);
            outputs.push(a);
        }

        ForwardCache { outputs, masks }
    }

    /// Backpropagation of mean binary cross-entropy through the cached
    /// forward pass. Relies on the sigmoid/BCE cancellation at the head:
    /// `dL/dz_out = (p - y) / m`.
    pub(crate) fn backward(&self, cache: &ForwardCache, y: &Array1<f64>) -> Gradients {
        let m = y.len() as f64;
        let predictions = &cache.outputs[self.layers.len()];
        let targets = y.view().insert_axis(Axis(1));
        let mut delta = (predictions - &targets) / m;

        let mut weight_grads = vec![Array2::zeros((0, 0)); self.layers.len()];
        let mut bias_grads = vec![Array1::zeros(0); self.layers.len()];

        for l in (0..self.layers.len()).rev() {
            let input = &cache.outputs[l];
            weight_grads[l] = input.t().dot(&delta);
            bias_grads[l] = delta.sum_axis(Axis(0));

            if l > 0 {
                let mut upstream = delta.dot(&self.layers[l].weights.t());
                // The dropout mask and the activation derivative of the
                // previous layer both gate the upstream gradient.
                if let Some(mask) = &cache.masks[l - 1] {
                    upstream *= mask;
                }
                let prev_output = &cache.outputs[l];
                // outputs[l] is post-dropout; for ReLU the zero pattern is
                // identical pre- and post-mask, so the derivative is valid.
                upstream *= &self.layers[l - 1]
                    .activation
                    .derivative_from_output(prev_output);
                delta = upstream;
            }
        }

        Gradients {
            weights: weight_grads,
            bias: bias_grads,
        }
    }
}

impl RiskModel for Network {
    fn problem_kind(&self) -> ProblemKind {
        ProblemKind::BinaryClassification
    }

    fn predict_probabilities(&self, x: ArrayView2<f64>) -> Array1<f64> {
        self.forward(x).index_axis(Axis(1), 0).to_owned()
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn classifier_has_fixed_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = Network::classifier(9, &mut rng);
        assert_eq!(net.layers.len(), 3);
        assert_eq!(net.layers[0].weights.shape(), &[9, 100]);
        assert_eq!(net.layers[1].weights.shape(), &[100, 50]);
        assert_eq!(net.layers[2].weights.shape(), &[50, 1]);
        assert_eq!(net.layers[0].dropout, Some(0.5));
        assert_eq!(net.layers[1].dropout, Some(0.5));
        assert_eq!(net.layers[2].dropout, None);
    }

    #[test]
    fn probabilities_are_valid() {
        let mut rng = StdRng::seed_from_u64(2);
        let net = Network::classifier(9, &mut rng);
        let x = Array2::from_shape_fn((16, 9), |(i, j)| ((i + j) as f64 * 0.13) % 1.0);
        let probs = net.predict_probabilities(x.view());
        assert_eq!(probs.len(), 16);
        assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn inference_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(3);
        let net = Network::classifier(9, &mut rng);
        let x = Array2::from_elem((4, 9), 0.5);
        let a = net.predict_probabilities(x.view());
        let b = net.predict_probabilities(x.view());
        assert_eq!(a, b);
    }

    /// Finite-difference check of the analytic gradient on a tiny dropout-free
    /// network.
    #[test]
    fn backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut net = Network {
            layers: vec![
                DenseLayer::new(3, 4, Activation::Relu, None, &mut rng),
                DenseLayer::new(4, 1, Activation::Sigmoid, None, &mut rng),
            ],
        };
        let x = array![[0.2, 0.7, 0.1], [0.9, 0.3, 0.5], [0.4, 0.4, 0.8]];
        let y = array![1.0, 0.0, 1.0];

        let bce = |net: &Network| -> f64 {
            let p = net.predict_probabilities(x.view());
            let eps = 1e-12;
            -(p.iter()
                .zip(y.iter())
                .map(|(&p, &t)| t * (p + eps).ln() + (1.0 - t) * (1.0 - p + eps).ln())
                .sum::<f64>())
                / y.len() as f64
        };

        let mut dropout_free_rng = StdRng::seed_from_u64(0);
        let cache = net.forward_train(x.view(), &mut dropout_free_rng);
        let grads = net.backward(&cache, &y);

        let h = 1e-6;
        for (l, w_idx) in [(0usize, (1usize, 2usize)), (1usize, (3usize, 0usize))] {
            let original = net.layers[l].weights[[w_idx.0, w_idx.1]];
            net.layers[l].weights[[w_idx.0, w_idx.1]] = original + h;
            let loss_plus = bce(&net);
            net.layers[l].weights[[w_idx.0, w_idx.1]] = original - h;
            let loss_minus = bce(&net);
            net.layers[l].weights[[w_idx.0, w_idx.1]] = original;

            let numeric = (loss_plus - loss_minus) / (2.0 * h);
            assert_abs_diff_eq!(grads.weights[l][[w_idx.0, w_idx.1]], numeric, epsilon = 1e-5);
        }
    }
}
