//! # Training
//!
//! Loss terms, annealing/curriculum schedules, the flat-vector AdamW
//! optimizer, checkpoint persistence and the epoch/minibatch trainer.

mod checkpoint;
mod loss;
mod optimizer;
mod schedule;
mod trainer;

pub use checkpoint::Checkpoint;
pub use loss::{evaluate_loss, kl_divergence, reconstruction_grad, reconstruction_loss, LossBreakdown};
pub use optimizer::{clip_grad_norm, AdamW};
pub use schedule::{cyclical_annealing, progressive_seq_len};
pub use trainer::{EpochStats, Rollout, Trainer};
