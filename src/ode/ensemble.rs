//! Batched trajectory solving with failure isolation.

use ndarray::{Array1, Array2, Array3};
use rayon::prelude::*;
use tracing::debug;

use crate::dynamics::DynamicalSystem;

use super::{integrate, OdeMethod, SolveError, SolverOptions};

/// Result of solving a batch of latent initial conditions.
///
/// `states` has shape `(state_dim, batch, time)`. Columns belonging to a
/// failed solve are filled with NaN and their batch indices are listed in
/// `failures`; downstream code must skip those samples when accumulating
/// gradients.
#[derive(Debug, Clone)]
pub struct EnsembleSolution {
    pub states: Array3<f64>,
    pub failures: Vec<usize>,
}

impl EnsembleSolution {
    pub fn is_failure(&self, sample: usize) -> bool {
        self.failures.contains(&sample)
    }
}

/// Solve one trajectory per batch column of `z0` / `theta`.
///
/// `z0` is `(state_dim × batch)`, `theta` is `(param_dim × batch)`. Each
/// sample is independent, so the batch is mapped in parallel. Successful
/// trajectories are passed through the system's trajectory transform;
/// failed ones become NaN blocks instead of aborting the whole batch.
pub fn solve_ensemble<S: DynamicalSystem + ?Sized>(
    system: &S,
    z0: &Array2<f64>,
    theta: &Array2<f64>,
    times: &[f64],
    method: OdeMethod,
    options: &SolverOptions,
) -> EnsembleSolution {
    let state_dim = z0.nrows();
    let batch = z0.ncols();
    let steps = times.len();

    let solved: Vec<Result<Array2<f64>, SolveError>> = (0..batch)
        .into_par_iter()
        .map(|b| {
            let y0: Array1<f64> = z0.column(b).to_owned();
            let params: Array1<f64> = theta.column(b).to_owned();
            let field = |y: &Array1<f64>, t: f64| system.dynamics(y, &params, t);
            integrate(&field, &y0, times, method, options)
                .map(|traj| system.transform_trajectory(traj))
        })
        .collect();

    let mut states = Array3::from_elem((state_dim, batch, steps), f64::NAN);
    let mut failures = Vec::new();
    for (b, result) in solved.into_iter().enumerate() {
        match result {
            Ok(traj) => {
                for i in 0..state_dim {
                    for t in 0..steps {
                        states[[i, b, t]] = traj[[i, t]];
                    }
                }
            }
            Err(e) => {
                debug!(sample = b, error = %e, "trajectory solve failed");
                failures.push(b);
            }
        }
    }

    EnsembleSolution { states, failures }
}
