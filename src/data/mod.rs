//! # Data
//!
//! Synthetic trajectory datasets: simulate a dynamical system from
//! sampled initial conditions and parameters, lift the states into a
//! high-dimensional observation space, persist/reload as JSON and serve
//! shuffled minibatches to the trainer.

mod dataset;

pub use dataset::TrajectoryDataset;
