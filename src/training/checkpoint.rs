//! Checkpoint persistence.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ModelConfig, TrainingConfig};
use crate::Result;

/// JSON snapshot of the best model seen so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Epoch (1-based) at which this snapshot was taken
    pub epoch: usize,
    /// Validation loss that earned the snapshot
    pub validation_loss: f64,
    /// Flat parameter vector (see [`crate::nn::Module`] ordering)
    pub params: Vec<f64>,
    /// Dynamical system identifier
    pub system: String,
    pub model_config: ModelConfig,
    pub training_config: TrainingConfig,
    /// RFC 3339 creation timestamp
    pub created_at: String,
}

impl Checkpoint {
    pub fn new(
        epoch: usize,
        validation_loss: f64,
        params: Vec<f64>,
        system: &str,
        model_config: ModelConfig,
        training_config: TrainingConfig,
    ) -> Self {
        Self {
            epoch,
            validation_loss,
            params,
            system: system.to_string(),
            model_config,
            training_config,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// Write the checkpoint as pretty JSON, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        info!(
            path = %path.display(),
            epoch = self.epoch,
            validation_loss = self.validation_loss,
            "checkpoint saved"
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ckpt.json");

        let ckpt = Checkpoint::new(
            7,
            0.125,
            vec![1.0, -2.0, 3.5],
            "pendulum",
            ModelConfig::default(),
            TrainingConfig::default(),
        );
        ckpt.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.epoch, 7);
        assert_eq!(loaded.validation_loss, 0.125);
        assert_eq!(loaded.params, vec![1.0, -2.0, 3.5]);
        assert_eq!(loaded.system, "pendulum");
        assert!(!loaded.created_at.is_empty());
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = Checkpoint::load("/nonexistent/ckpt.json").unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
