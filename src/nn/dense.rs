//! Dense (fully connected) layer with a manual backward pass.

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{outer, Activation, Module};

/// Forward-pass cache needed by [`Dense::backward`].
///
/// Kept outside the layer so the same layer can be applied repeatedly
/// (per sample, per time step) before gradients are pulled back.
#[derive(Debug, Clone)]
pub struct DenseCache {
    /// Layer input
    pub input: Array1<f64>,
    /// Pre-activation output
    pub z: Array1<f64>,
}

/// Dense layer: `output = activation(W · input + b)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    /// Weight matrix (output_dim × input_dim)
    pub weights: Array2<f64>,
    /// Bias vector (output_dim)
    pub bias: Array1<f64>,
    /// Activation function
    pub activation: Activation,

    // Accumulated gradients (not serialized; reset by zero_grad)
    #[serde(skip)]
    grad_weights: Array2<f64>,
    #[serde(skip)]
    grad_bias: Array1<f64>,
}

impl Dense {
    /// Create a new layer with Xavier/Glorot uniform initialization.
    pub fn new<R: Rng>(
        input_dim: usize,
        output_dim: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let limit = (6.0 / (input_dim + output_dim) as f64).sqrt();
        let weights =
            Array2::random_using((output_dim, input_dim), Uniform::new(-limit, limit), rng);
        let bias = Array1::zeros(output_dim);

        Self {
            grad_weights: Array2::zeros((output_dim, input_dim)),
            grad_bias: Array1::zeros(output_dim),
            weights,
            bias,
            activation,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weights.nrows()
    }

    /// Forward pass without caching (inference-only paths).
    pub fn forward(&self, input: &Array1<f64>) -> Array1<f64> {
        let z = self.weights.dot(input) + &self.bias;
        self.activation.apply(&z)
    }

    /// Forward pass returning the cache for a later backward pass.
    pub fn forward_cached(&self, input: &Array1<f64>) -> (Array1<f64>, DenseCache) {
        let z = self.weights.dot(input) + &self.bias;
        let out = self.activation.apply(&z);
        (
            out,
            DenseCache {
                input: input.clone(),
                z,
            },
        )
    }

    /// Backward pass: accumulate weight/bias gradients, return the
    /// gradient with respect to the input.
    pub fn backward(&mut self, cache: &DenseCache, grad_output: &Array1<f64>) -> Array1<f64> {
        let delta = grad_output * &self.activation.derivative(&cache.z);

        self.grad_weights += &outer(&delta, &cache.input);
        self.grad_bias += &delta;

        self.weights.t().dot(&delta)
    }
}

impl Module for Dense {
    fn num_params(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    fn write_params(&self, out: &mut Vec<f64>) {
        out.extend(self.weights.iter());
        out.extend(self.bias.iter());
    }

    fn read_params(&mut self, src: &[f64], offset: &mut usize) {
        for w in self.weights.iter_mut() {
            *w = src[*offset];
            *offset += 1;
        }
        for b in self.bias.iter_mut() {
            *b = src[*offset];
            *offset += 1;
        }
    }

    fn write_grads(&self, out: &mut Vec<f64>) {
        out.extend(self.grad_weights.iter());
        out.extend(self.grad_bias.iter());
    }

    fn zero_grad(&mut self) {
        // Reallocation also restores the correct shape after deserialization.
        self.grad_weights = Array2::zeros(self.weights.dim());
        self.grad_bias = Array1::zeros(self.bias.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn forward_shapes() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let layer = Dense::new(4, 3, Activation::Relu, &mut rng);
        let x = Array1::ones(4);
        assert_eq!(layer.forward(&x).len(), 3);
        assert_eq!(layer.num_params(), 4 * 3 + 3);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut layer = Dense::new(3, 2, Activation::Tanh, &mut rng);
        let x = Array1::from_vec(vec![0.5, -0.2, 0.8]);

        // Scalar loss: sum of outputs.
        let (_, cache) = layer.forward_cached(&x);
        layer.zero_grad();
        let grad_in = layer.backward(&cache, &Array1::ones(2));

        let mut grads = Vec::new();
        layer.write_grads(&mut grads);

        let eps = 1e-6;
        // Check every weight gradient against a central difference.
        let mut params = Vec::new();
        layer.write_params(&mut params);
        for k in 0..params.len() {
            let mut plus = params.clone();
            let mut minus = params.clone();
            plus[k] += eps;
            minus[k] -= eps;

            let mut off = 0;
            layer.read_params(&plus, &mut off);
            let lp = layer.forward(&x).sum();
            let mut off = 0;
            layer.read_params(&minus, &mut off);
            let lm = layer.forward(&x).sum();
            let mut off = 0;
            layer.read_params(&params, &mut off);

            let fd = (lp - lm) / (2.0 * eps);
            assert!((grads[k] - fd).abs() < 1e-6, "param {k}: {} vs {}", grads[k], fd);
        }

        // Input gradient too.
        for i in 0..x.len() {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[i] += eps;
            xm[i] -= eps;
            let fd = (layer.forward(&xp).sum() - layer.forward(&xm).sum()) / (2.0 * eps);
            assert!((grad_in[i] - fd).abs() < 1e-6);
        }
    }

    #[test]
    fn params_roundtrip() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut layer = Dense::new(5, 4, Activation::Identity, &mut rng);
        let mut params = Vec::new();
        layer.write_params(&mut params);

        let replaced: Vec<f64> = (0..params.len()).map(|i| i as f64).collect();
        let mut off = 0;
        layer.read_params(&replaced, &mut off);
        assert_eq!(off, params.len());

        let mut back = Vec::new();
        layer.write_params(&mut back);
        assert_eq!(back, replaced);
    }
}
