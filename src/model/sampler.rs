//! Reparameterized latent sampling.
//!
//! `z = μ + ε · exp(log σ² / 2)` with ε drawn fresh from a standard
//! normal on every call. The ε draw is returned alongside the sample so
//! the backward pass can route trajectory gradients to both moments.

use ndarray::Array2;
use rand::Rng;
use rand_distr::StandardNormal;

/// Draw one reparameterized sample per matrix element.
///
/// Returns `(value, noise)`; `value = mu + noise ⊙ exp(logvar / 2)`.
pub fn sample<R: Rng>(
    mu: &Array2<f64>,
    logvar: &Array2<f64>,
    rng: &mut R,
) -> (Array2<f64>, Array2<f64>) {
    let noise = Array2::from_shape_fn(mu.dim(), |_| rng.sample(StandardNormal));
    let value = mu + &(&noise * &logvar.mapv(|v| (0.5 * v).exp()));
    (value, noise)
}

/// Pull a gradient on the sampled value back to the moments.
///
/// `∂z/∂μ = 1` and `∂z/∂(log σ²) = ε · exp(log σ² / 2) / 2`.
pub fn backward(
    grad_value: &Array2<f64>,
    logvar: &Array2<f64>,
    noise: &Array2<f64>,
) -> (Array2<f64>, Array2<f64>) {
    let grad_mu = grad_value.clone();
    let grad_logvar = grad_value * noise * &logvar.mapv(|v| 0.5 * (0.5 * v).exp());
    (grad_mu, grad_logvar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn seeded_draws_are_reproducible() {
        let mu = Array2::from_elem((3, 4), 0.5);
        let logvar = Array2::from_elem((3, 4), -1.0);

        let (a, _) = sample(&mu, &logvar, &mut ChaCha8Rng::seed_from_u64(9));
        let (b, _) = sample(&mu, &logvar, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a, b);

        let (c, _) = sample(&mu, &logvar, &mut ChaCha8Rng::seed_from_u64(10));
        assert_ne!(a, c);
    }

    #[test]
    fn sample_mean_approaches_mu() {
        let mu = Array2::from_elem((2, 2), 1.5);
        let logvar = Array2::from_elem((2, 2), -2.0);
        let mut rng = ChaCha8Rng::seed_from_u64(20);

        let n = 20_000;
        let mut acc = Array2::zeros((2, 2));
        for _ in 0..n {
            let (v, _) = sample(&mu, &logvar, &mut rng);
            acc += &v;
        }
        acc /= n as f64;
        for v in acc.iter() {
            // σ = e^{-1} ≈ 0.37, so the mean of 20k draws sits well
            // within 0.02 of μ.
            assert!((v - 1.5).abs() < 0.02, "{v}");
        }
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mu = Array2::from_elem((2, 3), 0.3);
        let logvar = Array2::from_elem((2, 3), -0.5);
        let (_, noise) = sample(&mu, &logvar, &mut ChaCha8Rng::seed_from_u64(21));

        let grad = Array2::ones((2, 3));
        let (gm, gv) = backward(&grad, &logvar, &noise);

        let eps = 1e-6;
        let value =
            |mu: &Array2<f64>, lv: &Array2<f64>| (mu + &(&noise * &lv.mapv(|v| (0.5 * v).exp()))).sum();

        for i in 0..2 {
            for j in 0..3 {
                let mut mp = mu.clone();
                let mut mm = mu.clone();
                mp[[i, j]] += eps;
                mm[[i, j]] -= eps;
                let fd = (value(&mp, &logvar) - value(&mm, &logvar)) / (2.0 * eps);
                assert!((gm[[i, j]] - fd).abs() < 1e-6);

                let mut lp = logvar.clone();
                let mut lm = logvar.clone();
                lp[[i, j]] += eps;
                lm[[i, j]] -= eps;
                let fd = (value(&mu, &lp) - value(&mu, &lm)) / (2.0 * eps);
                assert!((gv[[i, j]] - fd).abs() < 1e-6);
            }
        }
    }
}
