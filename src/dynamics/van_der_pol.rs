//! Van der Pol oscillator.

use ndarray::{array, Array1};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::DynamicalSystem;

/// Van der Pol oscillator with state `[x, v]` and damping strength `μ`:
///
/// ```text
/// dx/dt = v
/// dv/dt = μ · (1 - x²) · v - x
/// ```
///
/// For μ > 0 all trajectories converge to a limit cycle, which makes the
/// oscillator a good stress test for long-horizon reconstruction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VanDerPol;

impl DynamicalSystem for VanDerPol {
    fn name(&self) -> &'static str {
        "van_der_pol"
    }

    fn state_dim(&self) -> usize {
        2
    }

    fn param_dim(&self) -> usize {
        1
    }

    fn dynamics(&self, z: &Array1<f64>, theta: &Array1<f64>, _t: f64) -> Array1<f64> {
        let x = z[0];
        let v = z[1];
        let mu = theta[0];
        array![v, mu * (1.0 - x * x) * v - x]
    }

    fn sample_initial_state<R: Rng>(&self, rng: &mut R) -> Array1<f64> {
        array![rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0)]
    }

    fn sample_params<R: Rng>(&self, rng: &mut R) -> Array1<f64> {
        array![rng.gen_range(0.5..3.0)]
    }
}
