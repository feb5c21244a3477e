//! Activation functions.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Element-wise activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// Rectified Linear Unit: max(0, x)
    Relu,
    /// Hyperbolic tangent
    Tanh,
    /// Logistic sigmoid
    Sigmoid,
    /// No activation
    Identity,
}

impl Activation {
    /// Apply the activation element-wise.
    pub fn apply(&self, x: &Array1<f64>) -> Array1<f64> {
        match self {
            Activation::Relu => x.mapv(|v| v.max(0.0)),
            Activation::Tanh => x.mapv(f64::tanh),
            Activation::Sigmoid => x.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Identity => x.clone(),
        }
    }

    /// Derivative evaluated at the pre-activation input.
    pub fn derivative(&self, x: &Array1<f64>) -> Array1<f64> {
        match self {
            Activation::Relu => x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Tanh => x.mapv(|v| 1.0 - v.tanh().powi(2)),
            Activation::Sigmoid => x.mapv(|v| {
                let s = 1.0 / (1.0 + (-v).exp());
                s * (1.0 - s)
            }),
            Activation::Identity => Array1::ones(x.len()),
        }
    }
}
