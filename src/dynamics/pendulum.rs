//! Frictionless pendulum.

use ndarray::{array, Array1};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::DynamicalSystem;

const GRAVITY: f64 = 9.81;

/// Pendulum with state `[angle, angular velocity]` and a single learnable
/// parameter, the rod length:
///
/// ```text
/// dθ/dt = ω
/// dω/dt = -(g / l) · sin(θ)
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Pendulum;

impl DynamicalSystem for Pendulum {
    fn name(&self) -> &'static str {
        "pendulum"
    }

    fn state_dim(&self) -> usize {
        2
    }

    fn param_dim(&self) -> usize {
        1
    }

    fn dynamics(&self, z: &Array1<f64>, theta: &Array1<f64>, _t: f64) -> Array1<f64> {
        let angle = z[0];
        let velocity = z[1];
        // Guard against non-physical lengths from early latent samples.
        let length = theta[0].max(0.1);
        array![velocity, -(GRAVITY / length) * angle.sin()]
    }

    fn sample_initial_state<R: Rng>(&self, rng: &mut R) -> Array1<f64> {
        let angle = rng.gen_range(-std::f64::consts::FRAC_PI_2..std::f64::consts::FRAC_PI_2);
        let velocity = rng.gen_range(-1.0..1.0);
        array![angle, velocity]
    }

    fn sample_params<R: Rng>(&self, rng: &mut R) -> Array1<f64> {
        array![rng.gen_range(1.0..2.5)]
    }
}
