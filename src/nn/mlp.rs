//! Multi-layer perceptron built from [`Dense`] layers.

use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Activation, Dense, DenseCache, Module};

/// Forward-pass cache for [`Mlp::backward`]: one entry per layer.
#[derive(Debug, Clone)]
pub struct MlpCache {
    pub layers: Vec<DenseCache>,
}

/// A stack of dense layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mlp {
    pub layers: Vec<Dense>,
}

impl Mlp {
    /// Create an MLP from a dimension chain `[input, hidden.., output]`.
    ///
    /// Hidden layers use `hidden_activation`, the last layer
    /// `output_activation`.
    pub fn new<R: Rng>(
        dims: &[usize],
        hidden_activation: Activation,
        output_activation: Activation,
        rng: &mut R,
    ) -> Self {
        assert!(dims.len() >= 2, "need at least input and output dimensions");

        let mut layers = Vec::with_capacity(dims.len() - 1);
        for i in 0..dims.len() - 1 {
            let activation = if i == dims.len() - 2 {
                output_activation
            } else {
                hidden_activation
            };
            layers.push(Dense::new(dims[i], dims[i + 1], activation, rng));
        }

        Self { layers }
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map(|l| l.input_dim()).unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(|l| l.output_dim()).unwrap_or(0)
    }

    /// Forward pass without caching.
    pub fn forward(&self, input: &Array1<f64>) -> Array1<f64> {
        let mut x = input.clone();
        for layer in &self.layers {
            x = layer.forward(&x);
        }
        x
    }

    /// Forward pass returning per-layer caches.
    pub fn forward_cached(&self, input: &Array1<f64>) -> (Array1<f64>, MlpCache) {
        let mut x = input.clone();
        let mut caches = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (out, cache) = layer.forward_cached(&x);
            caches.push(cache);
            x = out;
        }
        (x, MlpCache { layers: caches })
    }

    /// Backward pass through all layers; returns the input gradient.
    pub fn backward(&mut self, cache: &MlpCache, grad_output: &Array1<f64>) -> Array1<f64> {
        let mut grad = grad_output.clone();
        for (layer, layer_cache) in self.layers.iter_mut().zip(cache.layers.iter()).rev() {
            grad = layer.backward(layer_cache, &grad);
        }
        grad
    }
}

impl Module for Mlp {
    fn num_params(&self) -> usize {
        self.layers.iter().map(|l| l.num_params()).sum()
    }

    fn write_params(&self, out: &mut Vec<f64>) {
        for layer in &self.layers {
            layer.write_params(out);
        }
    }

    fn read_params(&mut self, src: &[f64], offset: &mut usize) {
        for layer in &mut self.layers {
            layer.read_params(src, offset);
        }
    }

    fn write_grads(&self, out: &mut Vec<f64>) {
        for layer in &self.layers {
            layer.write_grads(out);
        }
    }

    fn zero_grad(&mut self) {
        for layer in &mut self.layers {
            layer.zero_grad();
        }
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
        let mlp = Mlp::new(&[4, 8, 2], Activation::Tanh, Activation::Identity, &mut rng);
        assert_eq!(mlp.input_dim(), 4);
        assert_eq!(mlp.output_dim(), 2);
        assert_eq!(mlp.forward(&Array1::ones(4)).len(), 2);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut mlp = Mlp::new(&[3, 5, 2], Activation::Tanh, Activation::Identity, &mut rng);
        let x = Array1::from_vec(vec![0.3, -0.1, 0.7]);

        let (_, cache) = mlp.forward_cached(&x);
        mlp.zero_grad();
        mlp.backward(&cache, &Array1::ones(2));

        let mut grads = Vec::new();
        mlp.write_grads(&mut grads);
        let mut params = Vec::new();
        mlp.write_params(&mut params);

        let eps = 1e-6;
        // Spot-check a spread of parameters.
        for k in (0..params.len()).step_by(7) {
            let mut plus = params.clone();
            let mut minus = params.clone();
            plus[k] += eps;
            minus[k] -= eps;

            let mut off = 0;
            mlp.read_params(&plus, &mut off);
            let lp = mlp.forward(&x).sum();
            let mut off = 0;
            mlp.read_params(&minus, &mut off);
            let lm = mlp.forward(&x).sum();
            let mut off = 0;
            mlp.read_params(&params, &mut off);

            let fd = (lp - lm) / (2.0 * eps);
            assert!((grads[k] - fd).abs() < 1e-6, "param {k}: {} vs {}", grads[k], fd);
        }
    }
}
