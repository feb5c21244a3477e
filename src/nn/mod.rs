//! # Neural Network Primitives
//!
//! Differentiable building blocks for the encoder/decoder networks in pure
//! Rust: dense layers, MLP stacks and a simple recurrent cell, each with a
//! manual backward pass. Layers own their parameters and accumulate their
//! gradients; forward passes hand back explicit caches so one layer can be
//! applied at every time step of a sequence before a single backward pass.

mod activation;
mod dense;
mod mlp;
mod rnn;

pub use activation::Activation;
pub use dense::{Dense, DenseCache};
pub use mlp::{Mlp, MlpCache};
pub use rnn::{Rnn, RnnCache};

use ndarray::{Array1, Array2};

/// Capability shared by every differentiable transform in the pipeline:
/// flat read/write access to parameters and accumulated gradients.
///
/// The optimizer operates on one flat parameter vector for the whole
/// model; components serialize their parameters into it in a fixed order.
pub trait Module {
    /// Total number of learnable scalars.
    fn num_params(&self) -> usize;

    /// Append all parameters to `out` in this module's canonical order.
    fn write_params(&self, out: &mut Vec<f64>);

    /// Read parameters back from `src` starting at `offset`, advancing it.
    fn read_params(&mut self, src: &[f64], offset: &mut usize);

    /// Append all accumulated gradients to `out`, in the same order as
    /// [`Module::write_params`].
    fn write_grads(&self, out: &mut Vec<f64>);

    /// Reset accumulated gradients to zero.
    fn zero_grad(&mut self);
}

/// Outer product of two vectors (rows from `a`, columns from `b`).
pub(crate) fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((a.len(), b.len()), |(i, j)| a[i] * b[j])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outer_product_shape_and_values() {
        let a = Array1::from_vec(vec![1.0, 2.0]);
        let b = Array1::from_vec(vec![3.0, 4.0, 5.0]);
        let o = outer(&a, &b);
        assert_eq!(o.dim(), (2, 3));
        assert_eq!(o[[1, 2]], 10.0);
    }
}
