//! Loss terms: per-sample reconstruction MSE and closed-form KL.

use ndarray::{Array2, Array3};

use crate::model::ForwardOutput;

/// One evaluated loss, split into its terms.
///
/// `total = reconstruction + beta · (kl_z0 + kl_theta)`. A failed
/// trajectory leaves NaN in `reconstruction` (and so in `total`) on
/// purpose; the degradation is visible in the logs rather than masked.
#[derive(Debug, Clone, Copy)]
pub struct LossBreakdown {
    pub total: f64,
    pub reconstruction: f64,
    pub kl_z0: f64,
    pub kl_theta: f64,
    pub beta: f64,
}

/// Squared reconstruction error, averaged per sample over all
/// observation elements and time steps, summed over the batch.
pub fn reconstruction_loss(prediction: &Array3<f64>, target: &Array3<f64>) -> f64 {
    let (obs_dim, batch, steps) = target.dim();
    let per_elem = (obs_dim * steps) as f64;

    let mut total = 0.0;
    for b in 0..batch {
        let mut acc = 0.0;
        for i in 0..obs_dim {
            for t in 0..steps {
                let d = prediction[[i, b, t]] - target[[i, b, t]];
                acc += d * d;
            }
        }
        total += acc / per_elem;
    }
    total
}

/// KL divergence of a diagonal Gaussian posterior against the standard
/// normal prior, in closed form:
///
/// ```text
/// KL = 0.5 · Σ (exp(logσ²) + μ² − 1 − logσ²)
/// ```
///
/// averaged per sample over the latent dimensions and summed over the
/// batch. Zero exactly when μ = 0 and logσ² = 0.
pub fn kl_divergence(mu: &Array2<f64>, logvar: &Array2<f64>) -> f64 {
    let (dim, batch) = mu.dim();
    let mut total = 0.0;
    for b in 0..batch {
        let mut acc = 0.0;
        for i in 0..dim {
            let (m, lv) = (mu[[i, b]], logvar[[i, b]]);
            acc += 0.5 * (lv.exp() + m * m - 1.0 - lv);
        }
        total += acc / dim as f64;
    }
    total
}

/// Evaluate the full training objective for one forward pass.
pub fn evaluate_loss(output: &ForwardOutput, target: &Array3<f64>, beta: f64) -> LossBreakdown {
    let reconstruction = reconstruction_loss(&output.reconstruction, target);
    let kl_z0 = kl_divergence(&output.mu.z0, &output.logvar.z0);
    let kl_theta = kl_divergence(&output.mu.theta, &output.logvar.theta);
    LossBreakdown {
        total: reconstruction + beta * (kl_z0 + kl_theta),
        reconstruction,
        kl_z0,
        kl_theta,
        beta,
    }
}

/// Gradient of [`reconstruction_loss`] with respect to the prediction:
/// `2 · (prediction − target) / (obs_dim · time)` per element, with the
/// columns of failed samples zeroed so no NaN enters the backward pass.
pub fn reconstruction_grad(
    prediction: &Array3<f64>,
    target: &Array3<f64>,
    failures: &[usize],
) -> Array3<f64> {
    let (obs_dim, batch, steps) = target.dim();
    let scale = 2.0 / (obs_dim * steps) as f64;

    let mut grad = Array3::zeros(target.dim());
    for b in 0..batch {
        if failures.contains(&b) {
            continue;
        }
        for i in 0..obs_dim {
            for t in 0..steps {
                grad[[i, b, t]] = scale * (prediction[[i, b, t]] - target[[i, b, t]]);
            }
        }
    }
    grad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kl_is_zero_at_standard_normal_moments() {
        let mu = Array2::zeros((4, 3));
        let logvar = Array2::zeros((4, 3));
        assert_eq!(kl_divergence(&mu, &logvar), 0.0);
    }

    #[test]
    fn kl_is_positive_away_from_prior() {
        let mu = Array2::from_elem((4, 3), 0.7);
        let logvar = Array2::from_elem((4, 3), -0.3);
        assert!(kl_divergence(&mu, &logvar) > 0.0);
    }

    #[test]
    fn reconstruction_loss_is_per_sample_mean() {
        // One sample, uniform error of 2 everywhere: mean squared = 4.
        let pred = Array3::from_elem((3, 1, 5), 2.0);
        let target = Array3::zeros((3, 1, 5));
        assert!((reconstruction_loss(&pred, &target) - 4.0).abs() < 1e-12);

        // Two identical samples: summed over the batch.
        let pred = Array3::from_elem((3, 2, 5), 2.0);
        let target = Array3::zeros((3, 2, 5));
        assert!((reconstruction_loss(&pred, &target) - 8.0).abs() < 1e-12);
    }

    #[test]
    fn nan_prediction_stays_visible() {
        let mut pred = Array3::zeros((2, 2, 3));
        pred[[0, 1, 0]] = f64::NAN;
        let target = Array3::zeros((2, 2, 3));
        assert!(reconstruction_loss(&pred, &target).is_nan());
    }

    #[test]
    fn grad_matches_finite_differences_and_skips_failures() {
        let pred = Array3::from_shape_fn((2, 3, 4), |(i, b, t)| (i + b + t) as f64 * 0.1);
        let target = Array3::from_elem((2, 3, 4), 0.2);
        let grad = reconstruction_grad(&pred, &target, &[1]);

        // Failed column zeroed.
        assert!(grad.slice(ndarray::s![.., 1, ..]).iter().all(|g| *g == 0.0));

        let eps = 1e-6;
        for i in 0..2 {
            for t in 0..4 {
                let mut p = pred.clone();
                p[[i, 0, t]] += eps;
                let lp = reconstruction_loss(&p, &target);
                p[[i, 0, t]] -= 2.0 * eps;
                let lm = reconstruction_loss(&p, &target);
                let fd = (lp - lm) / (2.0 * eps);
                assert!((grad[[i, 0, t]] - fd).abs() < 1e-6);
            }
        }
    }
}
