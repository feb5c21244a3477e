//! Configuration records.
//!
//! All configuration is gathered into immutable records constructed once at
//! run start and passed by reference into every component that needs them.
//! Nothing in the pipeline mutates a config after construction.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Tensor placement for model construction.
///
/// The numeric backend of this crate is host-only (`ndarray`), so `Cpu` is
/// the only variant; keeping placement as an explicit value (rather than
/// ambient state) means every tensor-producing component states where its
/// data lives, and an accelerator backend can be added without changing
/// call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
}

impl Device {
    /// Resolve the `--gpu` style toggle. Requesting an accelerator on a
    /// host-only build logs a warning and falls back to the CPU.
    pub fn from_accelerator_flag(accelerated: bool) -> Self {
        if accelerated {
            warn!("accelerator requested but this build is host-only; using CPU");
        }
        Device::Cpu
    }
}

/// Model architecture configuration.
///
/// `state_dim` and `param_dim` are the *expected* native dimensions of the
/// dynamical system; [`crate::model::GokuModel::new`] fails fast when they
/// disagree with the system's declared dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Observation feature dimension (e.g. flattened frame size)
    pub obs_dim: usize,
    /// Per-time-step feature dimension produced by the encoder's
    /// feature extractor
    pub feature_dim: usize,
    /// Hidden size of the recurrent pattern extractors
    pub rnn_hidden: usize,
    /// Latent dimension of the initial-state group
    pub latent_z0_dim: usize,
    /// Latent dimension of the parameter group
    pub latent_theta_dim: usize,
    /// Native state dimension of the dynamical system
    pub state_dim: usize,
    /// Native parameter dimension of the dynamical system
    pub param_dim: usize,
    /// Hidden sizes of the reconstruction network
    pub recon_hidden: Vec<usize>,
    /// Tensor placement
    pub device: Device,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            obs_dim: 64,
            feature_dim: 16,
            rnn_hidden: 32,
            latent_z0_dim: 4,
            latent_theta_dim: 4,
            state_dim: 2,
            param_dim: 1,
            recon_hidden: vec![32],
            device: Device::Cpu,
        }
    }
}

impl ModelConfig {
    /// Validate ranges that would otherwise produce degenerate layers.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("obs_dim", self.obs_dim),
            ("feature_dim", self.feature_dim),
            ("rnn_hidden", self.rnn_hidden),
            ("latent_z0_dim", self.latent_z0_dim),
            ("latent_theta_dim", self.latent_theta_dim),
            ("state_dim", self.state_dim),
            ("param_dim", self.param_dim),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be >= 1")));
            }
        }
        Ok(())
    }
}

/// Training loop configuration.
///
/// Every option is defaulted; the CLI maps its flags onto this record and
/// the trainer never reads options from anywhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Learning rate
    pub learning_rate: f64,
    /// Decoupled weight decay applied at each optimizer step
    pub weight_decay: f64,
    /// Minibatch size
    pub batch_size: usize,
    /// Target training sequence length (window length in time steps)
    pub seq_len: usize,
    /// Number of epochs
    pub epochs: usize,
    /// RNG seed for sampling, windowing and weight init
    pub seed: u64,
    /// Draw latents stochastically during training
    pub variational: bool,
    /// Global gradient-norm clip (0 disables)
    pub grad_clip: f64,
    /// KL annealing start weight
    pub anneal_start: f64,
    /// KL annealing end weight
    pub anneal_end: f64,
    /// Number of annealing cycles over the full run
    pub anneal_cycles: usize,
    /// Fraction of each cycle spent ramping (the rest holds at the end value)
    pub anneal_ratio: f64,
    /// Enable the progressive sequence-length curriculum
    pub progressive: bool,
    /// Epochs over which the curriculum ramps from `start_seq_len` to `seq_len`
    pub progressive_duration: usize,
    /// Curriculum starting sequence length
    pub start_seq_len: usize,
    /// Samples held out for validation
    pub validation_samples: usize,
    /// Rollout length for the post-training visualization dump
    pub viz_len: usize,
    /// Write the visualization rollout to disk after training
    pub viz_output: bool,
    /// Checkpoint path (written whenever validation improves)
    pub checkpoint_path: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            weight_decay: 1e-5,
            batch_size: 16,
            seq_len: 50,
            epochs: 100,
            seed: 42,
            variational: true,
            grad_clip: 5.0,
            anneal_start: 0.0,
            anneal_end: 1.0,
            anneal_cycles: 4,
            anneal_ratio: 0.9,
            progressive: false,
            progressive_duration: 200,
            start_seq_len: 10,
            validation_samples: 8,
            viz_len: 100,
            viz_output: false,
            checkpoint_path: "checkpoints/goku_best.json".to_string(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) || !self.learning_rate.is_finite() {
            return Err(Error::InvalidConfig(
                "learning_rate must be positive and finite".into(),
            ));
        }
        if self.batch_size == 0 || self.epochs == 0 || self.seq_len < 2 {
            return Err(Error::InvalidConfig(
                "batch_size and epochs must be >= 1, seq_len >= 2".into(),
            ));
        }
        if self.anneal_cycles == 0 {
            return Err(Error::InvalidConfig("anneal_cycles must be >= 1".into()));
        }
        if !(self.anneal_ratio > 0.0 && self.anneal_ratio <= 1.0) {
            return Err(Error::InvalidConfig(
                "anneal_ratio must be in (0, 1]".into(),
            ));
        }
        if self.progressive && (self.start_seq_len < 2 || self.start_seq_len > self.seq_len) {
            return Err(Error::InvalidConfig(
                "start_seq_len must be in [2, seq_len] when progressive training is on".into(),
            ));
        }
        Ok(())
    }
}

/// Dataset generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateConfig {
    /// Number of trajectories
    pub samples: usize,
    /// Time steps per trajectory
    pub time_steps: usize,
    /// Grid spacing
    pub dt: f64,
    /// Observation dimension the latent states are lifted to
    pub obs_dim: usize,
    /// Observation noise standard deviation
    pub noise_std: f64,
    /// RNG seed
    pub seed: u64,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            samples: 128,
            time_steps: 200,
            dt: 0.05,
            obs_dim: 64,
            noise_std: 0.01,
            seed: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_validate() {
        ModelConfig::default().validate().unwrap();
        TrainingConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_latent_dim_rejected() {
        let cfg = ModelConfig {
            latent_z0_dim: 0,
            ..ModelConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_anneal_ratio_rejected() {
        let cfg = TrainingConfig {
            anneal_ratio: 0.0,
            ..TrainingConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accelerator_flag_falls_back_to_cpu() {
        assert_eq!(Device::from_accelerator_flag(true), Device::Cpu);
        assert_eq!(Device::from_accelerator_flag(false), Device::Cpu);
    }
}
