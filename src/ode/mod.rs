//! # ODE Integration
//!
//! Grid-based solvers for the generative half of the model. The decoder
//! hands each latent sample to [`ensemble::solve_ensemble`], which
//! integrates every trajectory independently (in parallel) and isolates
//! failures so one divergent sample cannot poison a batch.

mod ensemble;
mod sensitivity;
mod solve;

pub use ensemble::{solve_ensemble, EnsembleSolution};
pub use sensitivity::Sensitivity;
pub use solve::integrate;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Integration scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OdeMethod {
    /// Explicit Euler, one step per grid interval
    Euler,
    /// Classic fourth-order Runge-Kutta, one step per grid interval
    Rk4,
    /// Dormand-Prince 5(4) with adaptive sub-stepping between grid points
    Dopri5,
}

/// Solver tolerances and limits. Only [`OdeMethod::Dopri5`] reads the
/// adaptive fields; the fixed-step methods use the grid spacing directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Relative tolerance
    pub rtol: f64,
    /// Absolute tolerance
    pub atol: f64,
    /// Maximum internal steps per grid interval
    pub max_steps: usize,
    /// Smallest permitted internal step
    pub min_step: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-8,
            max_steps: 10_000,
            min_step: 1e-10,
        }
    }
}

/// Why a single trajectory solve gave up.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SolveError {
    #[error("state became non-finite at t = {t}")]
    NonFinite { t: f64 },
    #[error("step size underflow at t = {t}")]
    StepUnderflow { t: f64 },
    #[error("exceeded {max_steps} internal steps in one grid interval")]
    StepLimit { max_steps: usize },
    #[error("time grid must be strictly increasing with at least two points")]
    BadTimeGrid,
}

impl From<SolveError> for crate::Error {
    fn from(e: SolveError) -> Self {
        crate::Error::Solve(e.to_string())
    }
}
