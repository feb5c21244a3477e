//! # Latent Model
//!
//! The composed generative model: [`Encoder`] infers posterior moments,
//! [`sampler`] draws reparameterized latents, [`Decoder`] projects them
//! into the dynamical system's native spaces, integrates the system and
//! reconstructs observations.

mod decoder;
mod encoder;
pub mod sampler;

pub use decoder::{DecodeOutput, Decoder, DecoderCache};
pub use encoder::{Encoder, EncoderCache};

use ndarray::{Array1, Array2, Array3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::dynamics::DynamicalSystem;
use crate::nn::Module;
use crate::{Error, Result};

/// One matrix per latent group, each `(latent_dim × batch)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatentPair {
    pub z0: Array2<f64>,
    pub theta: Array2<f64>,
}

/// Everything one forward pass produces.
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    /// Reconstructed observations `(obs_dim, batch, time)`
    pub reconstruction: Array3<f64>,
    /// Solved latent trajectories `(state_dim, batch, time)`
    pub trajectory: Array3<f64>,
    /// Native initial states `(state_dim × batch)`
    pub z0_hat: Array2<f64>,
    /// Native parameters `(param_dim × batch)`
    pub theta_hat: Array2<f64>,
    /// Posterior means
    pub mu: LatentPair,
    /// Posterior log variances
    pub logvar: LatentPair,
    /// Batch indices whose trajectory solve failed
    pub failures: Vec<usize>,
}

/// Forward record consumed by [`GokuModel::backward`].
pub struct ForwardCache {
    encoder: EncoderCache,
    decoder: DecoderCache,
    mu: LatentPair,
    logvar: LatentPair,
    /// ε draws of the reparameterization; `None` for deterministic passes
    noise: Option<LatentPair>,
    failures: Vec<usize>,
    times: Vec<f64>,
}

/// The composed GOKU model over a concrete dynamical system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GokuModel<S> {
    pub system: S,
    encoder: Encoder,
    decoder: Decoder,
    config: ModelConfig,
}

impl<S: DynamicalSystem> GokuModel<S> {
    /// Build the model, failing fast when the configured native
    /// dimensions disagree with what the system declares.
    pub fn new<R: Rng>(config: ModelConfig, system: S, rng: &mut R) -> Result<Self> {
        config.validate()?;
        if config.state_dim != system.state_dim() {
            return Err(Error::DimensionMismatch {
                context: "system state dimension",
                expected: config.state_dim,
                got: system.state_dim(),
            });
        }
        if config.param_dim != system.param_dim() {
            return Err(Error::DimensionMismatch {
                context: "system parameter dimension",
                expected: config.param_dim,
                got: system.param_dim(),
            });
        }

        Ok(Self {
            encoder: Encoder::new(&config, rng),
            decoder: Decoder::new(&config, rng),
            system,
            config,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Full forward pass: encode → sample → solve → reconstruct.
    ///
    /// With `variational = false` the posterior means are decoded
    /// directly and the RNG is untouched, so the pass is deterministic.
    pub fn forward<R: Rng>(
        &mut self,
        observations: &Array3<f64>,
        times: &[f64],
        variational: bool,
        rng: &mut R,
    ) -> Result<(ForwardOutput, ForwardCache)> {
        let (obs_dim, _, steps) = observations.dim();
        if obs_dim != self.config.obs_dim {
            return Err(Error::DimensionMismatch {
                context: "observation dimension",
                expected: self.config.obs_dim,
                got: obs_dim,
            });
        }
        if steps != times.len() {
            return Err(Error::DimensionMismatch {
                context: "time grid length",
                expected: steps,
                got: times.len(),
            });
        }

        let (mu, logvar, encoder_cache) = self.encoder.encode(observations);

        let (latent, noise) = if variational {
            let (z0, z0_noise) = sampler::sample(&mu.z0, &logvar.z0, rng);
            let (theta, theta_noise) = sampler::sample(&mu.theta, &logvar.theta, rng);
            (
                LatentPair { z0, theta },
                Some(LatentPair {
                    z0: z0_noise,
                    theta: theta_noise,
                }),
            )
        } else {
            (mu.clone(), None)
        };

        let (decoded, decoder_cache) =
            self.decoder
                .decode(&self.system, &latent.z0, &latent.theta, times);

        let failures = decoded.failures.clone();
        Ok((
            ForwardOutput {
                reconstruction: decoded.reconstruction,
                trajectory: decoded.trajectory,
                z0_hat: decoded.z0_hat,
                theta_hat: decoded.theta_hat,
                mu: mu.clone(),
                logvar: logvar.clone(),
                failures: failures.clone(),
            },
            ForwardCache {
                encoder: encoder_cache,
                decoder: decoder_cache,
                mu,
                logvar,
                noise,
                failures,
                times: times.to_vec(),
            },
        ))
    }

    /// Full backward pass from a reconstruction gradient, adding the
    /// β-scaled closed-form KL gradients on the posterior moments.
    ///
    /// Failed samples are excluded throughout: their reconstruction
    /// gradient columns are ignored by the decoder and their KL terms
    /// are not accumulated, so a bad trajectory cannot poison the step.
    pub fn backward(&mut self, cache: &ForwardCache, grad_recon: &Array3<f64>, beta: f64) {
        let (grad_z0_value, grad_theta_value) =
            self.decoder
                .backward(&self.system, &cache.decoder, &cache.times, grad_recon);

        let (mut gm_z0, mut glv_z0, mut gm_theta, mut glv_theta) = match &cache.noise {
            Some(noise) => {
                let (gm_z0, glv_z0) = sampler::backward(&grad_z0_value, &cache.logvar.z0, &noise.z0);
                let (gm_theta, glv_theta) =
                    sampler::backward(&grad_theta_value, &cache.logvar.theta, &noise.theta);
                (gm_z0, glv_z0, gm_theta, glv_theta)
            }
            // Deterministic decode: the value IS the mean, log σ² unused.
            None => {
                let glv_z0 = Array2::zeros(grad_z0_value.dim());
                let glv_theta = Array2::zeros(grad_theta_value.dim());
                (grad_z0_value, glv_z0, grad_theta_value, glv_theta)
            }
        };

        if beta != 0.0 {
            let batch = cache.mu.z0.ncols();
            let dz = cache.mu.z0.nrows() as f64;
            let dt = cache.mu.theta.nrows() as f64;
            for b in 0..batch {
                if cache.failures.contains(&b) {
                    continue;
                }
                for i in 0..cache.mu.z0.nrows() {
                    gm_z0[[i, b]] += beta * cache.mu.z0[[i, b]] / dz;
                    glv_z0[[i, b]] += beta * 0.5 * (cache.logvar.z0[[i, b]].exp() - 1.0) / dz;
                }
                for i in 0..cache.mu.theta.nrows() {
                    gm_theta[[i, b]] += beta * cache.mu.theta[[i, b]] / dt;
                    glv_theta[[i, b]] += beta * 0.5 * (cache.logvar.theta[[i, b]].exp() - 1.0) / dt;
                }
            }
        }

        let grad_mu = LatentPair {
            z0: gm_z0,
            theta: gm_theta,
        };
        let grad_logvar = LatentPair {
            z0: glv_z0,
            theta: glv_theta,
        };
        self.encoder.backward(&cache.encoder, &grad_mu, &grad_logvar);
    }

    /// Snapshot all parameters as one flat vector (encoder first).
    pub fn params(&self) -> Array1<f64> {
        let mut out = Vec::with_capacity(self.num_params());
        self.write_params(&mut out);
        Array1::from_vec(out)
    }

    /// Restore parameters from a flat vector produced by [`Self::params`].
    pub fn set_params(&mut self, params: &Array1<f64>) -> Result<()> {
        if params.len() != self.num_params() {
            return Err(Error::DimensionMismatch {
                context: "flat parameter vector",
                expected: self.num_params(),
                got: params.len(),
            });
        }
        let slice = params.as_slice().map(|s| s.to_vec()).unwrap_or_else(|| params.to_vec());
        let mut offset = 0;
        self.read_params(&slice, &mut offset);
        Ok(())
    }

    /// Snapshot all accumulated gradients as one flat vector, aligned
    /// with [`Self::params`].
    pub fn grads(&self) -> Array1<f64> {
        let mut out = Vec::with_capacity(self.num_params());
        self.write_grads(&mut out);
        Array1::from_vec(out)
    }
}

impl<S: DynamicalSystem> Module for GokuModel<S> {
    fn num_params(&self) -> usize {
        self.encoder.num_params() + self.decoder.num_params()
    }

    fn write_params(&self, out: &mut Vec<f64>) {
        self.encoder.write_params(out);
        self.decoder.write_params(out);
    }

    fn read_params(&mut self, src: &[f64], offset: &mut usize) {
        self.encoder.read_params(src, offset);
        self.decoder.read_params(src, offset);
    }

    fn write_grads(&self, out: &mut Vec<f64>) {
        self.encoder.write_grads(out);
        self.decoder.write_grads(out);
    }

    fn zero_grad(&mut self) {
        self.encoder.zero_grad();
        self.decoder.zero_grad();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::{Pendulum, VanDerPol};
    use ndarray_rand::rand_distr::StandardNormal;
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn small_config() -> ModelConfig {
        ModelConfig {
            obs_dim: 6,
            feature_dim: 4,
            rnn_hidden: 5,
            latent_z0_dim: 3,
            latent_theta_dim: 2,
            state_dim: 2,
            param_dim: 1,
            recon_hidden: vec![8],
            ..ModelConfig::default()
        }
    }

    #[test]
    fn dimension_mismatch_fails_at_construction() {
        let mut rng = ChaCha8Rng::seed_from_u64(40);
        let cfg = ModelConfig {
            state_dim: 3,
            ..small_config()
        };
        let err = GokuModel::new(cfg, Pendulum, &mut rng).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn forward_output_shapes() {
        let mut rng = ChaCha8Rng::seed_from_u64(41);
        let mut model = GokuModel::new(small_config(), VanDerPol, &mut rng).unwrap();
        let obs = Array3::random_using((6, 3, 8), StandardNormal, &mut rng);
        let times: Vec<f64> = (0..8).map(|i| i as f64 * 0.05).collect();

        let (out, _) = model.forward(&obs, &times, true, &mut rng).unwrap();
        assert_eq!(out.reconstruction.dim(), (6, 3, 8));
        assert_eq!(out.trajectory.dim(), (2, 3, 8));
        assert_eq!(out.z0_hat.dim(), (2, 3));
        assert_eq!(out.theta_hat.dim(), (1, 3));
        assert_eq!(out.mu.z0.dim(), (3, 3));
        assert_eq!(out.logvar.theta.dim(), (2, 3));
    }

    #[test]
    fn deterministic_passes_are_bit_identical() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut model = GokuModel::new(small_config(), Pendulum, &mut rng).unwrap();
        let obs = Array3::random_using((6, 2, 6), StandardNormal, &mut rng);
        let times: Vec<f64> = (0..6).map(|i| i as f64 * 0.05).collect();

        let (a, _) = model
            .forward(&obs, &times, false, &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        let (b, _) = model
            .forward(&obs, &times, false, &mut ChaCha8Rng::seed_from_u64(99))
            .unwrap();
        assert_eq!(a.reconstruction, b.reconstruction);

        // Variational passes with different RNG states differ.
        let (c, _) = model
            .forward(&obs, &times, true, &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        let (d, _) = model
            .forward(&obs, &times, true, &mut ChaCha8Rng::seed_from_u64(99))
            .unwrap();
        assert_ne!(c.reconstruction, d.reconstruction);
    }

    #[test]
    fn time_grid_mismatch_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(43);
        let mut model = GokuModel::new(small_config(), Pendulum, &mut rng).unwrap();
        let obs = Array3::random_using((6, 2, 6), StandardNormal, &mut rng);
        let times: Vec<f64> = (0..5).map(|i| i as f64 * 0.05).collect();
        assert!(model.forward(&obs, &times, false, &mut rng).is_err());
    }

    #[test]
    fn params_roundtrip_through_flat_vector() {
        let mut rng = ChaCha8Rng::seed_from_u64(44);
        let mut model = GokuModel::new(small_config(), Pendulum, &mut rng).unwrap();
        let params = model.params();
        assert_eq!(params.len(), model.num_params());

        let zeros = Array1::zeros(params.len());
        model.set_params(&zeros).unwrap();
        assert_eq!(model.params(), zeros);

        model.set_params(&params).unwrap();
        assert_eq!(model.params(), params);
    }

    #[test]
    fn backward_accumulates_finite_gradients() {
        let mut rng = ChaCha8Rng::seed_from_u64(45);
        let mut model = GokuModel::new(small_config(), Pendulum, &mut rng).unwrap();
        let obs = Array3::random_using((6, 2, 5), StandardNormal, &mut rng);
        let times: Vec<f64> = (0..5).map(|i| i as f64 * 0.05).collect();

        let (out, cache) = model.forward(&obs, &times, true, &mut rng).unwrap();
        model.zero_grad();
        let grad_recon = Array3::ones(out.reconstruction.dim());
        model.backward(&cache, &grad_recon, 0.5);

        let grads = model.grads();
        assert_eq!(grads.len(), model.num_params());
        assert!(grads.iter().all(|g| g.is_finite()));
        assert!(grads.iter().any(|g| g.abs() > 0.0));
    }
}
