//! Epoch/minibatch training loop.

use ndarray::Array3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::TrainingConfig;
use crate::data::TrajectoryDataset;
use crate::dynamics::DynamicalSystem;
use crate::model::GokuModel;
use crate::nn::Module;
use crate::{Error, Result};

use super::{
    clip_grad_norm, cyclical_annealing, evaluate_loss, progressive_seq_len, reconstruction_grad,
    reconstruction_loss, AdamW, Checkpoint,
};

/// Per-epoch metrics, as logged.
#[derive(Debug, Clone, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    /// KL weight used this epoch
    pub beta: f64,
    /// Curriculum sequence length used this epoch
    pub seq_len: usize,
    /// Mean minibatch objective; NaN when a trajectory failed
    pub train_loss: f64,
    pub reconstruction: f64,
    pub kl: f64,
    /// Validation loss after the epoch's last minibatch
    pub validation_loss: f64,
    /// Trajectory solves that failed across the epoch
    pub failed_samples: usize,
}

/// Deterministic rollout dump for offline inspection (truth vs.
/// reconstruction for one held-out sample).
#[derive(Debug, Clone, Serialize)]
pub struct Rollout {
    pub times: Vec<f64>,
    /// `(obs_dim, time)` row-major nested vecs
    pub truth: Vec<Vec<f64>>,
    pub reconstruction: Vec<Vec<f64>>,
}

/// Drives training of one [`GokuModel`]: cyclical KL annealing, the
/// optional sequence-length curriculum, per-minibatch windowed forward /
/// backward / AdamW step, and a deterministic validation pass after every
/// minibatch with best-checkpoint persistence (strict improvement only).
pub struct Trainer<S: DynamicalSystem> {
    model: GokuModel<S>,
    optimizer: AdamW,
    config: TrainingConfig,
    best_validation: f64,
    rng: ChaCha8Rng,
}

impl<S: DynamicalSystem> Trainer<S> {
    pub fn new(model: GokuModel<S>, config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        let optimizer = AdamW::new(model.num_params(), config.learning_rate, config.weight_decay);
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Ok(Self {
            model,
            optimizer,
            config,
            best_validation: f64::INFINITY,
            rng,
        })
    }

    pub fn model(&self) -> &GokuModel<S> {
        &self.model
    }

    pub fn into_model(self) -> GokuModel<S> {
        self.model
    }

    pub fn best_validation(&self) -> f64 {
        self.best_validation
    }

    /// Run the full training loop over `dataset`.
    pub fn train(&mut self, dataset: &TrajectoryDataset) -> Result<Vec<EpochStats>> {
        if self.config.seq_len > dataset.num_steps() {
            return Err(Error::InvalidConfig(format!(
                "seq_len {} exceeds dataset length {}",
                self.config.seq_len,
                dataset.num_steps()
            )));
        }
        let (train_set, val_set) = dataset.split(self.config.validation_samples)?;
        let schedule = cyclical_annealing(
            self.config.anneal_start,
            self.config.anneal_end,
            self.config.epochs,
            self.config.anneal_cycles,
            self.config.anneal_ratio,
        );

        info!(
            epochs = self.config.epochs,
            train_samples = train_set.num_samples(),
            validation_samples = val_set.num_samples(),
            params = self.model.num_params(),
            "training started"
        );

        let mut history = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            let beta = schedule[epoch - 1];
            let seq_len = if self.config.progressive {
                progressive_seq_len(
                    self.config.start_seq_len,
                    self.config.seq_len,
                    self.config.progressive_duration,
                    epoch,
                )
            } else {
                self.config.seq_len
            };

            let mut loss_sum = 0.0;
            let mut recon_sum = 0.0;
            let mut kl_sum = 0.0;
            let mut failed = 0usize;
            let mut last_validation = f64::NAN;

            let batches = train_set.batches(self.config.batch_size, &mut self.rng);
            let n_batches = batches.len();
            for indices in batches {
                let start = self.rng.gen_range(0..=train_set.num_steps() - seq_len);
                let (obs, times) = train_set.window(&indices, start, seq_len);

                let (output, cache) =
                    self.model
                        .forward(&obs, &times, self.config.variational, &mut self.rng)?;
                let loss = evaluate_loss(&output, &obs, beta);
                failed += output.failures.len();

                self.model.zero_grad();
                let grad_recon =
                    reconstruction_grad(&output.reconstruction, &obs, &output.failures);
                self.model.backward(&cache, &grad_recon, beta);

                let mut grads = self.model.grads();
                if grads.iter().any(|g| !g.is_finite()) {
                    warn!(epoch, "non-finite gradients; skipping optimizer step");
                } else {
                    clip_grad_norm(&mut grads, self.config.grad_clip);
                    let mut params = self.model.params();
                    self.optimizer.step(&mut params, &grads);
                    self.model.set_params(&params)?;
                }

                loss_sum += loss.total;
                recon_sum += loss.reconstruction;
                kl_sum += loss.kl_z0 + loss.kl_theta;

                last_validation = self.validate(&val_set)?;
                if last_validation < self.best_validation {
                    self.best_validation = last_validation;
                    let ckpt = Checkpoint::new(
                        epoch,
                        last_validation,
                        self.model.params().to_vec(),
                        self.model.system.name(),
                        self.model.config().clone(),
                        self.config.clone(),
                    );
                    ckpt.save(&self.config.checkpoint_path)?;
                }
            }

            let n = n_batches.max(1) as f64;
            let stats = EpochStats {
                epoch,
                beta,
                seq_len,
                train_loss: loss_sum / n,
                reconstruction: recon_sum / n,
                kl: kl_sum / n,
                validation_loss: last_validation,
                failed_samples: failed,
            };
            info!(
                epoch,
                beta,
                seq_len,
                train_loss = stats.train_loss,
                validation_loss = stats.validation_loss,
                failed = stats.failed_samples,
                "epoch finished"
            );
            history.push(stats);
        }

        Ok(history)
    }

    /// Deterministic (mean-decoding) reconstruction loss over the whole
    /// held-out set at full length. Failed solves make it NaN, which
    /// never beats a finite best.
    fn validate(&mut self, val_set: &TrajectoryDataset) -> Result<f64> {
        let indices: Vec<usize> = (0..val_set.num_samples()).collect();
        let (obs, times) = val_set.window(&indices, 0, val_set.num_steps());
        let (output, _) = self.model.forward(&obs, &times, false, &mut self.rng)?;
        Ok(reconstruction_loss(&output.reconstruction, &obs))
    }

    /// Deterministic rollout of the first sample of `dataset` over
    /// `viz_len` steps, for dumping alongside the ground truth.
    pub fn rollout(&mut self, dataset: &TrajectoryDataset, viz_len: usize) -> Result<Rollout> {
        let len = viz_len.min(dataset.num_steps());
        let (obs, times) = dataset.window(&[0], 0, len);
        let (output, _) = self.model.forward(&obs, &times, false, &mut self.rng)?;

        let obs_dim = obs.dim().0;
        let unpack = |a: &Array3<f64>| -> Vec<Vec<f64>> {
            (0..obs_dim)
                .map(|i| (0..len).map(|t| a[[i, 0, t]]).collect())
                .collect()
        };
        Ok(Rollout {
            times,
            truth: unpack(&obs),
            reconstruction: unpack(&output.reconstruction),
        })
    }
}
