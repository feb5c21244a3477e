//! # GOKU-net: generative latent-ODE modeling
//!
//! This crate trains a generative latent-variable model that maps
//! high-dimensional sequential observations (e.g. flattened video frames)
//! into a compact latent state governed by an ordinary differential
//! equation, then reconstructs the observations from the simulated latent
//! trajectory. The inferred ODE parameters are interpretable quantities of
//! the underlying system (a pendulum length, a van der Pol damping
//! coefficient).
//!
//! ## Pipeline
//!
//! ```text
//! observations ──► Encoder ──► (μ, logσ²) ──► sample ──► Decoder
//!                                                          │
//!                             latent_out ─ ensemble ODE solve ─ reconstructor
//! ```
//!
//! Training minimizes reconstruction error plus a KL term against a
//! standard-normal prior, with the KL weight following a cyclical
//! annealing schedule and an optional progressive sequence-length
//! curriculum.
//!
//! ## Modules
//!
//! - [`config`]: immutable configuration records and device placement
//! - [`nn`]: dense / MLP / recurrent building blocks with manual backprop
//! - [`dynamics`]: the [`dynamics::DynamicalSystem`] contract plus reference systems
//! - [`ode`]: grid solvers, the batched ensemble solve, sensitivity strategies
//! - [`model`]: encoder, sampler, decoder and the composed [`model::GokuModel`]
//! - [`training`]: loss, schedules, optimizer, checkpointing, trainer
//! - [`data`]: dataset generation, persistence and batching

pub mod config;
pub mod data;
pub mod dynamics;
pub mod model;
pub mod nn;
pub mod ode;
pub mod training;

/// Crate error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A dynamical system's declared dimensionality disagrees with the
    /// configured model dimensions. Raised at construction time, before
    /// any training starts.
    #[error("dimension mismatch: {context} (expected {expected}, got {got})")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// A configuration value is out of its valid range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A whole-batch solve request that cannot even be attempted
    /// (empty or non-increasing time grid). Per-trajectory failures are
    /// NOT errors; they surface as NaN-filled trajectory slices.
    #[error("solve error: {0}")]
    Solve(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{Device, GenerateConfig, ModelConfig, TrainingConfig};
    pub use crate::data::TrajectoryDataset;
    pub use crate::dynamics::{DynamicalSystem, Pendulum, VanDerPol};
    pub use crate::model::{ForwardOutput, GokuModel, LatentPair};
    pub use crate::ode::{OdeMethod, Sensitivity, SolverOptions};
    pub use crate::training::{Checkpoint, Trainer};
    pub use crate::{Error, Result};
}
