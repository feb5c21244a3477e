//! # Dynamical Systems
//!
//! The physics side of the model: each system declares its native state
//! and parameter dimensions and exposes its vector field. The decoder
//! integrates these equations with latent initial conditions and latent
//! parameters inferred by the encoder.

mod pendulum;
mod van_der_pol;

pub use pendulum::Pendulum;
pub use van_der_pol::VanDerPol;

use ndarray::{Array1, Array2};
use rand::Rng;

use crate::ode::{OdeMethod, Sensitivity, SolverOptions};

/// A first-order ODE system `dz/dt = f(z, θ, t)`.
///
/// Implementations must be pure functions of their arguments: the solver
/// and the sensitivity strategies both re-evaluate the vector field at
/// perturbed inputs and rely on getting consistent answers.
pub trait DynamicalSystem: Send + Sync {
    /// Short identifier used in logs and checkpoints.
    fn name(&self) -> &'static str;

    /// Native state dimension.
    fn state_dim(&self) -> usize;

    /// Native parameter dimension.
    fn param_dim(&self) -> usize;

    /// Evaluate the vector field at state `z`, parameters `theta`, time `t`.
    fn dynamics(&self, z: &Array1<f64>, theta: &Array1<f64>, t: f64) -> Array1<f64>;

    /// Preferred integration scheme for this system.
    fn method(&self) -> OdeMethod {
        OdeMethod::Rk4
    }

    /// Solver tolerances and limits.
    fn solver_options(&self) -> SolverOptions {
        SolverOptions::default()
    }

    /// How gradients are propagated through the solve.
    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::default()
    }

    /// Map a solved trajectory (state_dim × time) into the space the
    /// reconstruction network consumes. Identity unless the system's raw
    /// coordinates are unsuitable for decoding.
    fn transform_trajectory(&self, trajectory: Array2<f64>) -> Array2<f64> {
        trajectory
    }

    /// Draw a physically plausible initial state for data generation.
    fn sample_initial_state<R: Rng>(&self, rng: &mut R) -> Array1<f64>
    where
        Self: Sized;

    /// Draw plausible parameters for data generation.
    fn sample_params<R: Rng>(&self, rng: &mut R) -> Array1<f64>
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_dims_match_vector_field() {
        let systems: [&dyn DynamicalSystem; 2] = [&Pendulum::default(), &VanDerPol::default()];
        for sys in systems {
            let z = Array1::zeros(sys.state_dim());
            let theta = Array1::ones(sys.param_dim());
            assert_eq!(sys.dynamics(&z, &theta, 0.0).len(), sys.state_dim());
        }
    }
}
