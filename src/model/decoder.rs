//! Latent decoder: native projection → ODE solve → reconstruction.

use ndarray::{s, Array1, Array2, Array3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ModelConfig;
use crate::dynamics::DynamicalSystem;
use crate::nn::{Activation, Dense, DenseCache, Mlp, MlpCache, Module};
use crate::ode::solve_ensemble;

/// What one decode pass produced.
#[derive(Debug, Clone)]
pub struct DecodeOutput {
    /// Native initial states `(state_dim × batch)`
    pub z0_hat: Array2<f64>,
    /// Native parameters `(param_dim × batch)`
    pub theta_hat: Array2<f64>,
    /// Solved latent trajectories `(state_dim, batch, time)`; failed
    /// samples are NaN slices
    pub trajectory: Array3<f64>,
    /// Reconstructed observations `(obs_dim, batch, time)`; NaN slices
    /// mirror trajectory failures
    pub reconstruction: Array3<f64>,
    /// Batch indices whose integration failed
    pub failures: Vec<usize>,
}

/// Forward record for [`Decoder::backward`].
#[derive(Debug, Clone)]
pub struct DecoderCache {
    proj_z0: Vec<DenseCache>,
    proj_theta: Vec<DenseCache>,
    /// Per sample, per time step; empty for failed samples
    recon: Vec<Vec<MlpCache>>,
    z0_hat: Array2<f64>,
    theta_hat: Array2<f64>,
    failures: Vec<usize>,
}

/// Decoder: two dense projections into the dynamical system's native
/// spaces, the ensemble ODE solve, and a per-time-step reconstruction
/// network mapping latent states back to observation space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decoder {
    proj_z0: Dense,
    proj_theta: Dense,
    reconstructor: Mlp,
}

impl Decoder {
    pub fn new<R: Rng>(config: &ModelConfig, rng: &mut R) -> Self {
        let mut recon_dims = vec![config.state_dim];
        recon_dims.extend_from_slice(&config.recon_hidden);
        recon_dims.push(config.obs_dim);

        Self {
            proj_z0: Dense::new(
                config.latent_z0_dim,
                config.state_dim,
                Activation::Identity,
                rng,
            ),
            proj_theta: Dense::new(
                config.latent_theta_dim,
                config.param_dim,
                Activation::Identity,
                rng,
            ),
            reconstructor: Mlp::new(&recon_dims, Activation::Relu, Activation::Identity, rng),
        }
    }

    /// Decode sampled latents into reconstructed observations.
    ///
    /// `z0_latent` is `(latent_z0_dim × batch)`, `theta_latent` is
    /// `(latent_theta_dim × batch)`. A failed per-sample integration
    /// yields NaN trajectory and reconstruction slices; everything else
    /// proceeds normally.
    pub fn decode<S: DynamicalSystem + ?Sized>(
        &self,
        system: &S,
        z0_latent: &Array2<f64>,
        theta_latent: &Array2<f64>,
        times: &[f64],
    ) -> (DecodeOutput, DecoderCache) {
        let batch = z0_latent.ncols();
        let steps = times.len();
        let obs_dim = self.reconstructor.output_dim();

        let mut z0_hat = Array2::zeros((self.proj_z0.output_dim(), batch));
        let mut theta_hat = Array2::zeros((self.proj_theta.output_dim(), batch));
        let mut proj_z0_caches = Vec::with_capacity(batch);
        let mut proj_theta_caches = Vec::with_capacity(batch);
        for b in 0..batch {
            let (z, cz) = self
                .proj_z0
                .forward_cached(&z0_latent.column(b).to_owned());
            let (t, ct) = self
                .proj_theta
                .forward_cached(&theta_latent.column(b).to_owned());
            z0_hat.column_mut(b).assign(&z);
            theta_hat.column_mut(b).assign(&t);
            proj_z0_caches.push(cz);
            proj_theta_caches.push(ct);
        }

        let solution = solve_ensemble(
            system,
            &z0_hat,
            &theta_hat,
            times,
            system.method(),
            &system.solver_options(),
        );

        let mut reconstruction = Array3::from_elem((obs_dim, batch, steps), f64::NAN);
        let mut recon_caches = Vec::with_capacity(batch);
        for b in 0..batch {
            if solution.is_failure(b) {
                recon_caches.push(Vec::new());
                continue;
            }
            let mut caches = Vec::with_capacity(steps);
            for t in 0..steps {
                let state: Array1<f64> = solution.states.slice(s![.., b, t]).to_owned();
                let (out, cache) = self.reconstructor.forward_cached(&state);
                reconstruction.slice_mut(s![.., b, t]).assign(&out);
                caches.push(cache);
            }
            recon_caches.push(caches);
        }

        let failures = solution.failures.clone();
        (
            DecodeOutput {
                z0_hat: z0_hat.clone(),
                theta_hat: theta_hat.clone(),
                trajectory: solution.states,
                reconstruction,
                failures: failures.clone(),
            },
            DecoderCache {
                proj_z0: proj_z0_caches,
                proj_theta: proj_theta_caches,
                recon: recon_caches,
                z0_hat,
                theta_hat,
                failures,
            },
        )
    }

    /// Backpropagate a reconstruction gradient `(obs_dim, batch, time)`
    /// to the sampled latents. Failed samples (and samples whose
    /// sensitivity re-solve fails) contribute nothing; their latent
    /// gradient columns stay zero.
    pub fn backward<S: DynamicalSystem + ?Sized>(
        &mut self,
        system: &S,
        cache: &DecoderCache,
        times: &[f64],
        grad_recon: &Array3<f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        let batch = cache.z0_hat.ncols();
        let steps = times.len();
        let state_dim = cache.z0_hat.nrows();
        let sensitivity = system.sensitivity();

        let mut grad_z0_latent = Array2::zeros((self.proj_z0.input_dim(), batch));
        let mut grad_theta_latent = Array2::zeros((self.proj_theta.input_dim(), batch));

        for b in 0..batch {
            if cache.failures.contains(&b) {
                continue;
            }

            let mut grad_traj = Array2::zeros((state_dim, steps));
            for t in 0..steps {
                let g_out: Array1<f64> = grad_recon.slice(s![.., b, t]).to_owned();
                let g_state = self.reconstructor.backward(&cache.recon[b][t], &g_out);
                grad_traj.column_mut(t).assign(&g_state);
            }

            let pulled = sensitivity.pullback(
                system,
                &cache.z0_hat.column(b).to_owned(),
                &cache.theta_hat.column(b).to_owned(),
                times,
                system.method(),
                &system.solver_options(),
                &grad_traj,
            );
            let (g_z0_hat, g_theta_hat) = match pulled {
                Ok(g) => g,
                Err(e) => {
                    warn!(sample = b, error = %e, "sensitivity pullback failed; skipping sample");
                    continue;
                }
            };

            let g_z0 = self.proj_z0.backward(&cache.proj_z0[b], &g_z0_hat);
            let g_theta = self.proj_theta.backward(&cache.proj_theta[b], &g_theta_hat);
            grad_z0_latent.column_mut(b).assign(&g_z0);
            grad_theta_latent.column_mut(b).assign(&g_theta);
        }

        (grad_z0_latent, grad_theta_latent)
    }
}

impl Module for Decoder {
    fn num_params(&self) -> usize {
        self.proj_z0.num_params() + self.proj_theta.num_params() + self.reconstructor.num_params()
    }

    fn write_params(&self, out: &mut Vec<f64>) {
        self.proj_z0.write_params(out);
        self.proj_theta.write_params(out);
        self.reconstructor.write_params(out);
    }

    fn read_params(&mut self, src: &[f64], offset: &mut usize) {
        self.proj_z0.read_params(src, offset);
        self.proj_theta.read_params(src, offset);
        self.reconstructor.read_params(src, offset);
    }

    fn write_grads(&self, out: &mut Vec<f64>) {
        self.proj_z0.write_grads(out);
        self.proj_theta.write_grads(out);
        self.reconstructor.write_grads(out);
    }

    fn zero_grad(&mut self) {
        self.proj_z0.zero_grad();
        self.proj_theta.zero_grad();
        self.reconstructor.zero_grad();
    }
}
