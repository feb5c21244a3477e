//! Adam with decoupled weight decay, over one flat parameter vector.

use ndarray::Array1;

/// AdamW optimizer state.
///
/// Operates on the model's flat parameter vector (see
/// [`crate::nn::Module`]); moment estimates are kept per scalar. Weight
/// decay is applied directly to the parameters, outside the adaptive
/// update.
#[derive(Debug, Clone)]
pub struct AdamW {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    weight_decay: f64,
    m: Array1<f64>,
    v: Array1<f64>,
    t: usize,
}

impl AdamW {
    pub fn new(num_params: usize, learning_rate: f64, weight_decay: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay,
            m: Array1::zeros(num_params),
            v: Array1::zeros(num_params),
            t: 0,
        }
    }

    /// One update step: decay, then bias-corrected Adam.
    pub fn step(&mut self, params: &mut Array1<f64>, grads: &Array1<f64>) {
        self.t += 1;

        if self.weight_decay > 0.0 {
            *params *= 1.0 - self.learning_rate * self.weight_decay;
        }

        self.m = &self.m * self.beta1 + grads * (1.0 - self.beta1);
        self.v = &self.v * self.beta2 + &grads.mapv(|g| g * g) * (1.0 - self.beta2);

        let m_hat = &self.m / (1.0 - self.beta1.powi(self.t as i32));
        let v_hat = &self.v / (1.0 - self.beta2.powi(self.t as i32));

        for i in 0..params.len() {
            params[i] -= self.learning_rate * m_hat[i] / (v_hat[i].sqrt() + self.epsilon);
        }
    }
}

/// Scale `grads` in place so its L2 norm does not exceed `max_norm`.
/// A non-positive `max_norm` disables clipping. Returns the pre-clip norm.
pub fn clip_grad_norm(grads: &mut Array1<f64>, max_norm: f64) -> f64 {
    let norm = grads.mapv(|g| g * g).sum().sqrt();
    if max_norm > 0.0 && norm > max_norm {
        *grads *= max_norm / norm;
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn step_moves_against_gradient() {
        let mut opt = AdamW::new(2, 0.1, 0.0);
        let mut params = array![1.0, -1.0];
        let grads = array![0.5, -0.5];

        opt.step(&mut params, &grads);
        assert!(params[0] < 1.0);
        assert!(params[1] > -1.0);
    }

    #[test]
    fn converges_on_quadratic() {
        // Minimize Σ (p - 3)².
        let mut opt = AdamW::new(3, 0.05, 0.0);
        let mut params = array![0.0, 5.0, -2.0];
        for _ in 0..2000 {
            let grads = params.mapv(|p| 2.0 * (p - 3.0));
            opt.step(&mut params, &grads);
        }
        for p in params.iter() {
            assert!((p - 3.0).abs() < 1e-2, "{p}");
        }
    }

    #[test]
    fn weight_decay_shrinks_params_with_zero_grads() {
        let mut opt = AdamW::new(1, 0.1, 0.5);
        let mut params = array![2.0];
        opt.step(&mut params, &array![0.0]);
        assert!(params[0] < 2.0);
        assert!(params[0] > 1.5);
    }

    #[test]
    fn clip_caps_norm_and_reports_original() {
        let mut grads = array![3.0, 4.0];
        let norm = clip_grad_norm(&mut grads, 1.0);
        assert!((norm - 5.0).abs() < 1e-12);
        let new_norm = grads.mapv(|g| g * g).sum().sqrt();
        assert!((new_norm - 1.0).abs() < 1e-9);

        // Disabled clipping leaves gradients alone.
        let mut grads = array![3.0, 4.0];
        clip_grad_norm(&mut grads, 0.0);
        assert_eq!(grads, array![3.0, 4.0]);
    }
}
