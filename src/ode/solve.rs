//! Single-trajectory integration on an explicit time grid.

use ndarray::{Array1, Array2};

use super::{OdeMethod, SolveError, SolverOptions};

// Dormand-Prince 5(4) coefficients.
const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
const A: [[f64; 6]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
        0.0,
    ],
    [
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
];
// 5th-order solution weights (same as the last A row; FSAL scheme).
const B5: [f64; 7] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
    0.0,
];
// 4th-order embedded weights.
const B4: [f64; 7] = [
    5179.0 / 57600.0,
    0.0,
    7571.0 / 16695.0,
    393.0 / 640.0,
    -92097.0 / 339200.0,
    187.0 / 2100.0,
    1.0 / 40.0,
];

/// Integrate `dy/dt = f(y, t)` and report the state at every grid point.
///
/// Returns a `(state_dim × times.len())` matrix whose first column is
/// `y0`. Any non-finite state aborts the solve.
pub fn integrate<F>(
    f: &F,
    y0: &Array1<f64>,
    times: &[f64],
    method: OdeMethod,
    options: &SolverOptions,
) -> Result<Array2<f64>, SolveError>
where
    F: Fn(&Array1<f64>, f64) -> Array1<f64>,
{
    if times.len() < 2 || times.windows(2).any(|w| w[1] <= w[0]) {
        return Err(SolveError::BadTimeGrid);
    }

    let dim = y0.len();
    let mut states = Array2::zeros((dim, times.len()));
    states.column_mut(0).assign(y0);

    let mut y = y0.clone();
    for i in 1..times.len() {
        let (t0, t1) = (times[i - 1], times[i]);
        y = match method {
            OdeMethod::Euler => euler_step(f, &y, t0, t1 - t0),
            OdeMethod::Rk4 => rk4_step(f, &y, t0, t1 - t0),
            OdeMethod::Dopri5 => dopri5_span(f, y, t0, t1, options)?,
        };
        if !y.iter().all(|v| v.is_finite()) {
            return Err(SolveError::NonFinite { t: t1 });
        }
        states.column_mut(i).assign(&y);
    }

    Ok(states)
}

fn euler_step<F>(f: &F, y: &Array1<f64>, t: f64, h: f64) -> Array1<f64>
where
    F: Fn(&Array1<f64>, f64) -> Array1<f64>,
{
    y + &(f(y, t) * h)
}

fn rk4_step<F>(f: &F, y: &Array1<f64>, t: f64, h: f64) -> Array1<f64>
where
    F: Fn(&Array1<f64>, f64) -> Array1<f64>,
{
    let k1 = f(y, t);
    let k2 = f(&(y + &(&k1 * (h / 2.0))), t + h / 2.0);
    let k3 = f(&(y + &(&k2 * (h / 2.0))), t + h / 2.0);
    let k4 = f(&(y + &(&k3 * h)), t + h);
    y + &((k1 + k2 * 2.0 + k3 * 2.0 + k4) * (h / 6.0))
}

/// Adaptively integrate across one grid interval `[t0, t1]`.
fn dopri5_span<F>(
    f: &F,
    mut y: Array1<f64>,
    t0: f64,
    t1: f64,
    options: &SolverOptions,
) -> Result<Array1<f64>, SolveError>
where
    F: Fn(&Array1<f64>, f64) -> Array1<f64>,
{
    let mut t = t0;
    let mut h = t1 - t0;
    let mut steps = 0;

    // Tolerate rounding drift when the last step lands on t1.
    let done = |t: f64| (t1 - t) <= f64::EPSILON * (1.0 + t1.abs());

    while !done(t) {
        if steps >= options.max_steps {
            return Err(SolveError::StepLimit {
                max_steps: options.max_steps,
            });
        }
        steps += 1;
        h = h.min(t1 - t);

        let (y5, err) = dopri5_step(f, &y, t, h);
        if !y5.iter().all(|v| v.is_finite()) {
            return Err(SolveError::NonFinite { t });
        }

        let norm = error_norm(&y, &y5, &err, options);
        if norm <= 1.0 {
            t += h;
            y = y5;
        }

        // Standard 5th-order controller with growth/shrink limits.
        let factor = if norm > 0.0 {
            (0.9 * norm.powf(-0.2)).clamp(0.2, 5.0)
        } else {
            5.0
        };
        h *= factor;
        if h < options.min_step && !done(t) {
            return Err(SolveError::StepUnderflow { t });
        }
    }

    Ok(y)
}

/// One Dormand-Prince step: returns the 5th-order solution and the
/// difference against the embedded 4th-order one.
fn dopri5_step<F>(f: &F, y: &Array1<f64>, t: f64, h: f64) -> (Array1<f64>, Array1<f64>)
where
    F: Fn(&Array1<f64>, f64) -> Array1<f64>,
{
    let mut k: Vec<Array1<f64>> = Vec::with_capacity(7);
    for s in 0..7 {
        let mut ys = y.clone();
        for (j, kj) in k.iter().enumerate() {
            if A[s][j] != 0.0 {
                ys = ys + kj * (h * A[s][j]);
            }
        }
        k.push(f(&ys, t + C[s] * h));
    }

    let mut y5 = y.clone();
    let mut err = Array1::zeros(y.len());
    for s in 0..7 {
        if B5[s] != 0.0 {
            y5 = y5 + &k[s] * (h * B5[s]);
        }
        err = err + &k[s] * (h * (B5[s] - B4[s]));
    }
    (y5, err)
}

fn error_norm(
    y: &Array1<f64>,
    y_new: &Array1<f64>,
    err: &Array1<f64>,
    options: &SolverOptions,
) -> f64 {
    let mut sum = 0.0;
    for i in 0..y.len() {
        let scale = options.atol + options.rtol * y[i].abs().max(y_new[i].abs());
        let r = err[i] / scale;
        sum += r * r;
    }
    (sum / y.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn grid(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dt).collect()
    }

    /// dy/dt = -y has the exact solution e^{-t}.
    #[test]
    fn exponential_decay_accuracy() {
        let f = |y: &Array1<f64>, _t: f64| -y.clone();
        let times = grid(101, 0.01);
        let opts = SolverOptions::default();

        for (method, tol) in [
            (OdeMethod::Euler, 1e-2),
            (OdeMethod::Rk4, 1e-8),
            (OdeMethod::Dopri5, 1e-5),
        ] {
            let states = integrate(&f, &array![1.0], &times, method, &opts).unwrap();
            let got = states[[0, 100]];
            let exact = (-1.0f64).exp();
            assert!((got - exact).abs() < tol, "{method:?}: {got} vs {exact}");
        }
    }

    /// Harmonic oscillator conserves x² + v².
    #[test]
    fn rk4_conserves_oscillator_energy() {
        let f = |y: &Array1<f64>, _t: f64| array![y[1], -y[0]];
        let times = grid(201, 0.05);
        let states = integrate(&f, &array![1.0, 0.0], &times, OdeMethod::Rk4, &SolverOptions::default())
            .unwrap();
        for i in 0..times.len() {
            let e = states[[0, i]].powi(2) + states[[1, i]].powi(2);
            assert!((e - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn divergence_is_reported() {
        // dy/dt = y² blows up in finite time from y(0) = 1 at t = 1.
        let f = |y: &Array1<f64>, _t: f64| array![y[0] * y[0]];
        let times = grid(40, 0.05);
        let res = integrate(&f, &array![1.0], &times, OdeMethod::Dopri5, &SolverOptions::default());
        assert!(res.is_err());
    }

    #[test]
    fn bad_grid_rejected() {
        let f = |y: &Array1<f64>, _t: f64| y.clone();
        let err = integrate(
            &f,
            &array![1.0],
            &[0.0, 0.5, 0.5],
            OdeMethod::Euler,
            &SolverOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, SolveError::BadTimeGrid);
    }

    #[test]
    fn first_column_is_initial_state() {
        let f = |y: &Array1<f64>, _t: f64| -y.clone();
        let states = integrate(
            &f,
            &array![2.0, -1.0],
            &grid(10, 0.1),
            OdeMethod::Rk4,
            &SolverOptions::default(),
        )
        .unwrap();
        assert_eq!(states.column(0).to_owned(), array![2.0, -1.0]);
    }
}
