//! Observation encoder.
//!
//! Turns an observation batch into posterior moments for the two latent
//! groups. Per time step a feature MLP compresses the raw observation
//! (no temporal mixing); recurrent passes then summarize the feature
//! sequence: a reversed pass for the initial-state group (so the summary
//! ends nearest to t = 0) and a forward + backward pair, concatenated,
//! for the time-invariant parameter group. Four independent dense heads
//! produce μ and log σ² for each group.

use ndarray::{concatenate, s, Array1, Array2, Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::nn::{Activation, Dense, DenseCache, Mlp, MlpCache, Module, Rnn, RnnCache};

use super::LatentPair;

/// Per-sample forward record for [`Encoder::backward`].
#[derive(Debug, Clone)]
struct SampleCache {
    features: Vec<MlpCache>,
    rnn_z0: RnnCache,
    rnn_theta_fwd: RnnCache,
    rnn_theta_bwd: RnnCache,
    z0_mu: DenseCache,
    z0_logvar: DenseCache,
    theta_mu: DenseCache,
    theta_logvar: DenseCache,
}

#[derive(Debug, Clone)]
pub struct EncoderCache {
    samples: Vec<SampleCache>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoder {
    features: Mlp,
    rnn_z0: Rnn,
    rnn_theta_fwd: Rnn,
    rnn_theta_bwd: Rnn,
    z0_mu: Dense,
    z0_logvar: Dense,
    theta_mu: Dense,
    theta_logvar: Dense,
}

impl Encoder {
    pub fn new<R: Rng>(config: &ModelConfig, rng: &mut R) -> Self {
        let h = config.rnn_hidden;
        Self {
            features: Mlp::new(
                &[config.obs_dim, config.feature_dim],
                Activation::Tanh,
                Activation::Tanh,
                rng,
            ),
            rnn_z0: Rnn::new(config.feature_dim, h, rng),
            rnn_theta_fwd: Rnn::new(config.feature_dim, h, rng),
            rnn_theta_bwd: Rnn::new(config.feature_dim, h, rng),
            z0_mu: Dense::new(h, config.latent_z0_dim, Activation::Identity, rng),
            z0_logvar: Dense::new(h, config.latent_z0_dim, Activation::Identity, rng),
            theta_mu: Dense::new(2 * h, config.latent_theta_dim, Activation::Identity, rng),
            theta_logvar: Dense::new(2 * h, config.latent_theta_dim, Activation::Identity, rng),
        }
    }

    /// Encode a `(obs_dim, batch, time)` batch into posterior moments,
    /// each `(latent_dim × batch)`.
    ///
    /// Recurrent state is reset around every pass, so repeated calls with
    /// the same input give the same moments.
    pub fn encode(&mut self, observations: &Array3<f64>) -> (LatentPair, LatentPair, EncoderCache) {
        let (_, batch, steps) = observations.dim();
        let z0_dim = self.z0_mu.output_dim();
        let theta_dim = self.theta_mu.output_dim();

        let mut mu = LatentPair {
            z0: Array2::zeros((z0_dim, batch)),
            theta: Array2::zeros((theta_dim, batch)),
        };
        let mut logvar = LatentPair {
            z0: Array2::zeros((z0_dim, batch)),
            theta: Array2::zeros((theta_dim, batch)),
        };
        let mut samples = Vec::with_capacity(batch);

        for b in 0..batch {
            let mut feats = Vec::with_capacity(steps);
            let mut feat_caches = Vec::with_capacity(steps);
            for t in 0..steps {
                let x: Array1<f64> = observations.slice(s![.., b, t]).to_owned();
                let (f, cache) = self.features.forward_cached(&x);
                feats.push(f);
                feat_caches.push(cache);
            }
            let reversed: Vec<Array1<f64>> = feats.iter().rev().cloned().collect();

            self.rnn_z0.reset();
            let (h_z0, cache_z0) = self.rnn_z0.run(&reversed);

            self.rnn_theta_fwd.reset();
            let (h_fwd, cache_fwd) = self.rnn_theta_fwd.run(&feats);
            self.rnn_theta_bwd.reset();
            let (h_bwd, cache_bwd) = self.rnn_theta_bwd.run(&reversed);
            let h_theta = concatenate![Axis(0), h_fwd, h_bwd];

            let (m, c_zm) = self.z0_mu.forward_cached(&h_z0);
            let (v, c_zv) = self.z0_logvar.forward_cached(&h_z0);
            mu.z0.column_mut(b).assign(&m);
            logvar.z0.column_mut(b).assign(&v);

            let (m, c_tm) = self.theta_mu.forward_cached(&h_theta);
            let (v, c_tv) = self.theta_logvar.forward_cached(&h_theta);
            mu.theta.column_mut(b).assign(&m);
            logvar.theta.column_mut(b).assign(&v);

            samples.push(SampleCache {
                features: feat_caches,
                rnn_z0: cache_z0,
                rnn_theta_fwd: cache_fwd,
                rnn_theta_bwd: cache_bwd,
                z0_mu: c_zm,
                z0_logvar: c_zv,
                theta_mu: c_tm,
                theta_logvar: c_tv,
            });
        }

        self.reset();
        (mu, logvar, EncoderCache { samples })
    }

    /// Backpropagate gradients on the four moment matrices into the
    /// encoder's parameters. Gradients do not flow past the observations.
    pub fn backward(&mut self, cache: &EncoderCache, grad_mu: &LatentPair, grad_logvar: &LatentPair) {
        let h = self.rnn_z0.hidden_size();

        for (b, sample) in cache.samples.iter().enumerate() {
            let steps = sample.features.len();

            let g_h_z0 = self
                .z0_mu
                .backward(&sample.z0_mu, &grad_mu.z0.column(b).to_owned())
                + self
                    .z0_logvar
                    .backward(&sample.z0_logvar, &grad_logvar.z0.column(b).to_owned());

            let g_h_theta = self
                .theta_mu
                .backward(&sample.theta_mu, &grad_mu.theta.column(b).to_owned())
                + self
                    .theta_logvar
                    .backward(&sample.theta_logvar, &grad_logvar.theta.column(b).to_owned());
            let g_h_fwd: Array1<f64> = g_h_theta.slice(s![..h]).to_owned();
            let g_h_bwd: Array1<f64> = g_h_theta.slice(s![h..]).to_owned();

            // Per-pass input gradients, mapped back to time order (the
            // reversed passes saw inputs back to front).
            let g_rev_z0 = self.rnn_z0.backward_from_last(&sample.rnn_z0, &g_h_z0);
            let g_fwd = self
                .rnn_theta_fwd
                .backward_from_last(&sample.rnn_theta_fwd, &g_h_fwd);
            let g_rev_bwd = self
                .rnn_theta_bwd
                .backward_from_last(&sample.rnn_theta_bwd, &g_h_bwd);

            for t in 0..steps {
                let rev = steps - 1 - t;
                let g_feat = &g_rev_z0[rev] + &g_fwd[t] + &g_rev_bwd[rev];
                self.features.backward(&sample.features[t], &g_feat);
            }
        }
    }

    fn reset(&mut self) {
        self.rnn_z0.reset();
        self.rnn_theta_fwd.reset();
        self.rnn_theta_bwd.reset();
    }
}

impl Module for Encoder {
    fn num_params(&self) -> usize {
        self.parts().iter().map(|p| p.num_params()).sum()
    }

    fn write_params(&self, out: &mut Vec<f64>) {
        for p in self.parts() {
            p.write_params(out);
        }
    }

    fn read_params(&mut self, src: &[f64], offset: &mut usize) {
        for p in self.parts_mut() {
            p.read_params(src, offset);
        }
    }

    fn write_grads(&self, out: &mut Vec<f64>) {
        for p in self.parts() {
            p.write_grads(out);
        }
    }

    fn zero_grad(&mut self) {
        for p in self.parts_mut() {
            p.zero_grad();
        }
    }
}

impl Encoder {
    fn parts(&self) -> [&dyn Module; 8] {
        [
            &self.features,
            &self.rnn_z0,
            &self.rnn_theta_fwd,
            &self.rnn_theta_bwd,
            &self.z0_mu,
            &self.z0_logvar,
            &self.theta_mu,
            &self.theta_logvar,
        ]
    }

    fn parts_mut(&mut self) -> [&mut dyn Module; 8] {
        [
            &mut self.features,
            &mut self.rnn_z0,
            &mut self.rnn_theta_fwd,
            &mut self.rnn_theta_bwd,
            &mut self.z0_mu,
            &mut self.z0_logvar,
            &mut self.theta_mu,
            &mut self.theta_logvar,
        ]
    }
}
