//! Gradient strategies for the ODE solve.
//!
//! The decoder needs `∂L/∂z0` and `∂L/∂θ` given the gradient of the loss
//! with respect to every point of the solved trajectory. Two
//! interchangeable strategies are provided:
//!
//! * [`Sensitivity::ForwardDiff`] bumps each input dimension and re-solves.
//!   Exact through the trajectory transform, cost scales with
//!   `state_dim + param_dim` extra solves.
//! * [`Sensitivity::Adjoint`] integrates the continuous adjoint system
//!   backwards in time with jump updates at observation points. One
//!   backward pass regardless of dimension, but it differentiates the raw
//!   trajectory and therefore requires the identity trajectory transform.

use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::dynamics::DynamicalSystem;

use super::{integrate, OdeMethod, SolveError, SolverOptions};

const JACOBIAN_EPS: f64 = 1e-6;

/// How trajectory gradients are pulled back to `z0` and `θ`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Sensitivity {
    /// Central finite differences over the solver inputs.
    ForwardDiff { epsilon: f64 },
    /// Continuous adjoint, integrated backwards with `substeps` RK4
    /// sub-steps per grid interval.
    Adjoint { substeps: usize },
}

impl Default for Sensitivity {
    fn default() -> Self {
        Sensitivity::ForwardDiff { epsilon: 1e-5 }
    }
}

impl Sensitivity {
    /// Pull a trajectory gradient back to the solver inputs.
    ///
    /// `grad_trajectory` has the trajectory's shape `(state_dim × T)` and
    /// holds `∂L/∂x[i][t]` for the (transformed) trajectory `x`. Returns
    /// `(∂L/∂z0, ∂L/∂θ)`.
    pub fn pullback<S: DynamicalSystem + ?Sized>(
        &self,
        system: &S,
        z0: &Array1<f64>,
        theta: &Array1<f64>,
        times: &[f64],
        method: OdeMethod,
        options: &SolverOptions,
        grad_trajectory: &Array2<f64>,
    ) -> Result<(Array1<f64>, Array1<f64>), SolveError> {
        match *self {
            Sensitivity::ForwardDiff { epsilon } => forward_diff(
                system,
                z0,
                theta,
                times,
                method,
                options,
                grad_trajectory,
                epsilon,
            ),
            Sensitivity::Adjoint { substeps } => adjoint(
                system,
                z0,
                theta,
                times,
                method,
                options,
                grad_trajectory,
                substeps.max(1),
            ),
        }
    }
}

fn solve_transformed<S: DynamicalSystem + ?Sized>(
    system: &S,
    z0: &Array1<f64>,
    theta: &Array1<f64>,
    times: &[f64],
    method: OdeMethod,
    options: &SolverOptions,
) -> Result<Array2<f64>, SolveError> {
    let params = theta.clone();
    let field = |y: &Array1<f64>, t: f64| system.dynamics(y, &params, t);
    integrate(&field, z0, times, method, options).map(|traj| system.transform_trajectory(traj))
}

#[allow(clippy::too_many_arguments)]
fn forward_diff<S: DynamicalSystem + ?Sized>(
    system: &S,
    z0: &Array1<f64>,
    theta: &Array1<f64>,
    times: &[f64],
    method: OdeMethod,
    options: &SolverOptions,
    grad_trajectory: &Array2<f64>,
    epsilon: f64,
) -> Result<(Array1<f64>, Array1<f64>), SolveError> {
    let contract = |plus: &Array2<f64>, minus: &Array2<f64>| -> f64 {
        let diff = (plus - minus) / (2.0 * epsilon);
        (&diff * grad_trajectory).sum()
    };

    let mut grad_z0 = Array1::zeros(z0.len());
    for k in 0..z0.len() {
        let mut zp = z0.clone();
        let mut zm = z0.clone();
        zp[k] += epsilon;
        zm[k] -= epsilon;
        let plus = solve_transformed(system, &zp, theta, times, method, options)?;
        let minus = solve_transformed(system, &zm, theta, times, method, options)?;
        grad_z0[k] = contract(&plus, &minus);
    }

    let mut grad_theta = Array1::zeros(theta.len());
    for k in 0..theta.len() {
        let mut tp = theta.clone();
        let mut tm = theta.clone();
        tp[k] += epsilon;
        tm[k] -= epsilon;
        let plus = solve_transformed(system, z0, &tp, times, method, options)?;
        let minus = solve_transformed(system, z0, &tm, times, method, options)?;
        grad_theta[k] = contract(&plus, &minus);
    }

    Ok((grad_z0, grad_theta))
}

/// Jacobian of the vector field with respect to the state.
fn jacobian_state<S: DynamicalSystem + ?Sized>(
    system: &S,
    z: &Array1<f64>,
    theta: &Array1<f64>,
    t: f64,
) -> Array2<f64> {
    let n = z.len();
    let mut jac = Array2::zeros((n, n));
    for j in 0..n {
        let mut zp = z.clone();
        let mut zm = z.clone();
        zp[j] += JACOBIAN_EPS;
        zm[j] -= JACOBIAN_EPS;
        let col = (system.dynamics(&zp, theta, t) - system.dynamics(&zm, theta, t))
            / (2.0 * JACOBIAN_EPS);
        jac.column_mut(j).assign(&col);
    }
    jac
}

/// Jacobian of the vector field with respect to the parameters.
fn jacobian_params<S: DynamicalSystem + ?Sized>(
    system: &S,
    z: &Array1<f64>,
    theta: &Array1<f64>,
    t: f64,
) -> Array2<f64> {
    let n = z.len();
    let p = theta.len();
    let mut jac = Array2::zeros((n, p));
    for j in 0..p {
        let mut tp = theta.clone();
        let mut tm = theta.clone();
        tp[j] += JACOBIAN_EPS;
        tm[j] -= JACOBIAN_EPS;
        let col =
            (system.dynamics(z, &tp, t) - system.dynamics(z, &tm, t)) / (2.0 * JACOBIAN_EPS);
        jac.column_mut(j).assign(&col);
    }
    jac
}

/// Continuous adjoint: integrate the augmented system
///
/// ```text
/// dz/dt = f(z, θ, t)
/// dλ/dt = -(∂f/∂z)ᵀ λ
/// dq/dt = -(∂f/∂θ)ᵀ λ
/// ```
///
/// backwards from the final time, adding the trajectory gradient to λ at
/// every observation point. At t = t0, λ is `∂L/∂z0` and q is `∂L/∂θ`.
#[allow(clippy::too_many_arguments)]
fn adjoint<S: DynamicalSystem + ?Sized>(
    system: &S,
    z0: &Array1<f64>,
    theta: &Array1<f64>,
    times: &[f64],
    method: OdeMethod,
    options: &SolverOptions,
    grad_trajectory: &Array2<f64>,
    substeps: usize,
) -> Result<(Array1<f64>, Array1<f64>), SolveError> {
    let n = z0.len();
    let p = theta.len();
    let steps = times.len();

    // Forward pass, used to re-anchor the state at every grid point so
    // backward drift cannot compound across the whole horizon.
    let params = theta.clone();
    let field = |y: &Array1<f64>, t: f64| system.dynamics(y, &params, t);
    let forward = integrate(&field, z0, times, method, options)?;

    let mut lambda: Array1<f64> = grad_trajectory.column(steps - 1).to_owned();
    let mut q: Array1<f64> = Array1::zeros(p);

    for i in (1..steps).rev() {
        let mut z: Array1<f64> = forward.column(i).to_owned();
        let h = (times[i - 1] - times[i]) / substeps as f64;
        let mut t = times[i];

        for _ in 0..substeps {
            let aug = |z: &Array1<f64>, lambda: &Array1<f64>, t: f64| {
                let jz = jacobian_state(system, z, theta, t);
                let jt = jacobian_params(system, z, theta, t);
                (
                    system.dynamics(z, theta, t),
                    -jz.t().dot(lambda),
                    -jt.t().dot(lambda),
                )
            };

            // RK4 on the augmented state, written out over its parts.
            let (dz1, dl1, dq1) = aug(&z, &lambda, t);
            let (dz2, dl2, dq2) = aug(
                &(&z + &(&dz1 * (h / 2.0))),
                &(&lambda + &(&dl1 * (h / 2.0))),
                t + h / 2.0,
            );
            let (dz3, dl3, dq3) = aug(
                &(&z + &(&dz2 * (h / 2.0))),
                &(&lambda + &(&dl2 * (h / 2.0))),
                t + h / 2.0,
            );
            let (dz4, dl4, dq4) = aug(&(&z + &(&dz3 * h)), &(&lambda + &(&dl3 * h)), t + h);

            z = &z + &((dz1 + dz2 * 2.0 + dz3 * 2.0 + dz4) * (h / 6.0));
            lambda = &lambda + &((dl1 + dl2 * 2.0 + dl3 * 2.0 + dl4) * (h / 6.0));
            q = &q + &((dq1 + dq2 * 2.0 + dq3 * 2.0 + dq4) * (h / 6.0));
            t += h;
        }

        if !lambda.iter().chain(q.iter()).all(|v| v.is_finite()) {
            return Err(SolveError::NonFinite { t: times[i - 1] });
        }

        // Jump condition at the observation point.
        lambda = lambda + grad_trajectory.slice(s![.., i - 1]);
    }

    Ok((lambda, q))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::Pendulum;
    use ndarray::array;

    /// Linear decay dy/dt = -θy has y(T) = z0·e^{-θT}, so the gradients
    /// of y(T) are known in closed form.
    struct Decay;

    impl DynamicalSystem for Decay {
        fn name(&self) -> &'static str {
            "decay"
        }
        fn state_dim(&self) -> usize {
            1
        }
        fn param_dim(&self) -> usize {
            1
        }
        fn dynamics(&self, z: &Array1<f64>, theta: &Array1<f64>, _t: f64) -> Array1<f64> {
            array![-theta[0] * z[0]]
        }
        fn sample_initial_state<R: rand::Rng>(&self, _rng: &mut R) -> Array1<f64> {
            array![1.0]
        }
        fn sample_params<R: rand::Rng>(&self, _rng: &mut R) -> Array1<f64> {
            array![0.5]
        }
    }

    fn grid(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dt).collect()
    }

    fn last_point_grad(times: &[f64]) -> Array2<f64> {
        let mut g = Array2::zeros((1, times.len()));
        g[[0, times.len() - 1]] = 1.0;
        g
    }

    #[test]
    fn forward_diff_matches_closed_form() {
        let times = grid(21, 0.05);
        let big_t = *times.last().unwrap();
        let (z0, theta) = (array![1.3], array![0.7]);
        let grad = last_point_grad(&times);

        let (gz, gt) = Sensitivity::ForwardDiff { epsilon: 1e-5 }
            .pullback(
                &Decay,
                &z0,
                &theta,
                &times,
                OdeMethod::Dopri5,
                &SolverOptions::default(),
                &grad,
            )
            .unwrap();

        let expect_z = (-theta[0] * big_t).exp();
        let expect_t = -big_t * z0[0] * (-theta[0] * big_t).exp();
        assert!((gz[0] - expect_z).abs() < 1e-4, "{} vs {expect_z}", gz[0]);
        assert!((gt[0] - expect_t).abs() < 1e-4, "{} vs {expect_t}", gt[0]);
    }

    #[test]
    fn adjoint_matches_closed_form() {
        let times = grid(21, 0.05);
        let big_t = *times.last().unwrap();
        let (z0, theta) = (array![1.3], array![0.7]);
        let grad = last_point_grad(&times);

        let (gz, gt) = Sensitivity::Adjoint { substeps: 4 }
            .pullback(
                &Decay,
                &z0,
                &theta,
                &times,
                OdeMethod::Dopri5,
                &SolverOptions::default(),
                &grad,
            )
            .unwrap();

        let expect_z = (-theta[0] * big_t).exp();
        let expect_t = -big_t * z0[0] * (-theta[0] * big_t).exp();
        assert!((gz[0] - expect_z).abs() < 1e-3, "{} vs {expect_z}", gz[0]);
        assert!((gt[0] - expect_t).abs() < 1e-3, "{} vs {expect_t}", gt[0]);
    }

    #[test]
    fn strategies_agree_on_pendulum() {
        let times = grid(16, 0.05);
        let z0 = array![0.4, -0.2];
        let theta = array![1.5];
        // Gradient spread over the whole trajectory.
        let grad = Array2::from_elem((2, times.len()), 0.1);

        let opts = SolverOptions::default();
        let (fz, ft) = Sensitivity::ForwardDiff { epsilon: 1e-5 }
            .pullback(&Pendulum, &z0, &theta, &times, OdeMethod::Rk4, &opts, &grad)
            .unwrap();
        let (az, at) = Sensitivity::Adjoint { substeps: 8 }
            .pullback(&Pendulum, &z0, &theta, &times, OdeMethod::Rk4, &opts, &grad)
            .unwrap();

        for i in 0..2 {
            assert!((fz[i] - az[i]).abs() < 1e-2, "z0[{i}]: {} vs {}", fz[i], az[i]);
        }
        assert!((ft[0] - at[0]).abs() < 1e-2, "θ: {} vs {}", ft[0], at[0]);
    }
}
