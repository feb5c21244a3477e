//! Trajectory dataset: generation, persistence and batching.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{s, Array1, Array2, Array3};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GenerateConfig;
use crate::dynamics::DynamicalSystem;
use crate::ode::integrate;
use crate::{Error, Result};

const MAX_DRAW_ATTEMPTS: usize = 100;

/// A set of simulated trajectories with their lifted observations.
///
/// Axis convention matches the model: `latents` is
/// `(state_dim, samples, time)` and `observations` is
/// `(obs_dim, samples, time)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryDataset {
    pub times: Vec<f64>,
    pub latents: Array3<f64>,
    pub initial_states: Array2<f64>,
    pub params: Array2<f64>,
    pub observations: Array3<f64>,
}

impl TrajectoryDataset {
    /// Simulate `config.samples` trajectories of the system and lift the
    /// states to observation space through a fixed random two-layer
    /// projection with additive Gaussian noise.
    ///
    /// Draws that fail to integrate are discarded and redrawn; after
    /// [`MAX_DRAW_ATTEMPTS`] consecutive failures generation gives up.
    pub fn generate<S: DynamicalSystem>(system: &S, config: &GenerateConfig) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let times: Vec<f64> = (0..config.time_steps).map(|i| i as f64 * config.dt).collect();
        let (n, steps) = (config.samples, config.time_steps);
        let state_dim = system.state_dim();
        let param_dim = system.param_dim();
        let obs_dim = config.obs_dim;

        // Fixed random lift, shared by every sample.
        let w1: Array2<f64> = Array2::random_using((obs_dim, state_dim), StandardNormal, &mut rng)
            / (state_dim as f64).sqrt();
        let b1: Array1<f64> = Array1::random_using(obs_dim, StandardNormal, &mut rng) * 0.1;
        let w2: Array2<f64> = Array2::random_using((obs_dim, obs_dim), StandardNormal, &mut rng)
            / (obs_dim as f64).sqrt();
        let noise = Normal::new(0.0, config.noise_std.max(f64::MIN_POSITIVE))
            .map_err(|e| Error::InvalidConfig(format!("noise_std: {e}")))?;

        let mut latents = Array3::zeros((state_dim, n, steps));
        let mut initial_states = Array2::zeros((state_dim, n));
        let mut params = Array2::zeros((param_dim, n));
        let mut observations = Array3::zeros((obs_dim, n, steps));

        for sample in 0..n {
            let mut attempts = 0;
            let trajectory = loop {
                let z0 = system.sample_initial_state(&mut rng);
                let theta = system.sample_params(&mut rng);
                let field = |y: &Array1<f64>, t: f64| system.dynamics(y, &theta, t);
                match integrate(&field, &z0, &times, system.method(), &system.solver_options()) {
                    Ok(traj) => {
                        initial_states.column_mut(sample).assign(&z0);
                        params.column_mut(sample).assign(&theta);
                        break traj;
                    }
                    Err(e) => {
                        attempts += 1;
                        debug!(sample, attempt = attempts, error = %e, "discarding draw");
                        if attempts >= MAX_DRAW_ATTEMPTS {
                            return Err(Error::Solve(format!(
                                "could not draw an integrable trajectory after {MAX_DRAW_ATTEMPTS} attempts: {e}"
                            )));
                        }
                    }
                }
            };

            for t in 0..steps {
                let state: Array1<f64> = trajectory.column(t).to_owned();
                latents.slice_mut(s![.., sample, t]).assign(&state);

                let hidden = (w1.dot(&state) + &b1).mapv(f64::tanh);
                let mut obs = w2.dot(&hidden);
                if config.noise_std > 0.0 {
                    obs.mapv_inplace(|v| v + rng.sample(noise));
                }
                observations.slice_mut(s![.., sample, t]).assign(&obs);
            }
        }

        info!(
            system = system.name(),
            samples = n,
            time_steps = steps,
            obs_dim,
            "dataset generated"
        );
        Ok(Self {
            times,
            latents,
            initial_states,
            params,
            observations,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.observations.dim().1
    }

    pub fn num_steps(&self) -> usize {
        self.times.len()
    }

    pub fn obs_dim(&self) -> usize {
        self.observations.dim().0
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        info!(path = %path.display(), "dataset saved");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Load the dataset at `path`, regenerating (and saving) it when the
    /// file is missing or cannot be parsed.
    pub fn load_or_generate<S: DynamicalSystem, P: AsRef<Path>>(
        path: P,
        system: &S,
        config: &GenerateConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(dataset) => Ok(dataset),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "dataset unavailable; regenerating");
                let dataset = Self::generate(system, config)?;
                dataset.save(path)?;
                Ok(dataset)
            }
        }
    }

    /// Split off the last `validation` samples as a held-out set.
    pub fn split(&self, validation: usize) -> Result<(Self, Self)> {
        let n = self.num_samples();
        if validation == 0 || validation >= n {
            return Err(Error::InvalidConfig(format!(
                "validation split of {validation} out of {n} samples"
            )));
        }
        let cut = n - validation;
        let carve = |range: std::ops::Range<usize>| Self {
            times: self.times.clone(),
            latents: self.latents.slice(s![.., range.clone(), ..]).to_owned(),
            initial_states: self.initial_states.slice(s![.., range.clone()]).to_owned(),
            params: self.params.slice(s![.., range.clone()]).to_owned(),
            observations: self.observations.slice(s![.., range, ..]).to_owned(),
        };
        Ok((carve(0..cut), carve(cut..n)))
    }

    /// Shuffled minibatch index blocks for one epoch.
    pub fn batches<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.num_samples()).collect();
        indices.shuffle(rng);
        indices
            .chunks(batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// A contiguous time window of the observations for the given
    /// samples: `(obs_dim, indices.len(), len)` plus the matching slice
    /// of the time grid.
    pub fn window(&self, indices: &[usize], start: usize, len: usize) -> (Array3<f64>, Vec<f64>) {
        let obs_dim = self.obs_dim();
        let mut obs = Array3::zeros((obs_dim, indices.len(), len));
        for (col, &sample) in indices.iter().enumerate() {
            obs.slice_mut(s![.., col, ..])
                .assign(&self.observations.slice(s![.., sample, start..start + len]));
        }
        (obs, self.times[start..start + len].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::Pendulum;

    fn small_gen() -> GenerateConfig {
        GenerateConfig {
            samples: 6,
            time_steps: 20,
            dt: 0.05,
            obs_dim: 8,
            noise_std: 0.01,
            seed: 7,
        }
    }

    #[test]
    fn generation_shapes_and_consistency() {
        let ds = TrajectoryDataset::generate(&Pendulum, &small_gen()).unwrap();
        assert_eq!(ds.times.len(), 20);
        assert_eq!(ds.latents.dim(), (2, 6, 20));
        assert_eq!(ds.initial_states.dim(), (2, 6));
        assert_eq!(ds.params.dim(), (1, 6));
        assert_eq!(ds.observations.dim(), (8, 6, 20));

        // First latent slice equals the recorded initial state.
        for b in 0..6 {
            assert_eq!(ds.latents[[0, b, 0]], ds.initial_states[[0, b]]);
            assert_eq!(ds.latents[[1, b, 0]], ds.initial_states[[1, b]]);
        }
    }

    #[test]
    fn generation_is_seed_deterministic() {
        let a = TrajectoryDataset::generate(&Pendulum, &small_gen()).unwrap();
        let b = TrajectoryDataset::generate(&Pendulum, &small_gen()).unwrap();
        assert_eq!(a.observations, b.observations);

        let c = TrajectoryDataset::generate(
            &Pendulum,
            &GenerateConfig {
                seed: 8,
                ..small_gen()
            },
        )
        .unwrap();
        assert_ne!(a.observations, c.observations);
    }

    #[test]
    fn load_or_generate_recovers_from_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "not json at all").unwrap();

        let ds = TrajectoryDataset::load_or_generate(&path, &Pendulum, &small_gen()).unwrap();
        assert_eq!(ds.num_samples(), 6);

        // The regenerated dataset was persisted and now loads cleanly.
        let reloaded = TrajectoryDataset::load(&path).unwrap();
        assert_eq!(reloaded.observations, ds.observations);
    }

    #[test]
    fn split_and_windowing() {
        let ds = TrajectoryDataset::generate(&Pendulum, &small_gen()).unwrap();
        let (train, val) = ds.split(2).unwrap();
        assert_eq!(train.num_samples(), 4);
        assert_eq!(val.num_samples(), 2);
        assert!(ds.split(6).is_err());

        let (obs, times) = train.window(&[1, 3], 5, 10);
        assert_eq!(obs.dim(), (8, 2, 10));
        assert_eq!(times.len(), 10);
        assert_eq!(times[0], ds.times[5]);
        assert_eq!(obs[[0, 0, 0]], train.observations[[0, 1, 5]]);
    }

    #[test]
    fn batches_cover_every_sample_once() {
        let ds = TrajectoryDataset::generate(&Pendulum, &small_gen()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let batches = ds.batches(4, &mut rng);

        let mut seen: Vec<usize> = batches.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }
}
