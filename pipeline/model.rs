//! # Trained Model Persistence
//!
//! The self-contained, human-readable artifact of one fit, saved as TOML:
//! the hyperparameters and seed that produced it, the fitted layer weights,
//! and the explainer's bin statistics. An explanation is only valid against
//! the artifact that produced it; the recorded seed and hyperparameters let
//! two fits be told apart, though no explicit version token exists.

use crate::explain::Binner;
use crate::network::Network;
use crate::train::TrainConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

/// Everything the `explain` command needs to reproduce a fit's context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub seed: u64,
    pub test_fraction: f64,
    pub train: TrainConfig,
}

/// The top-level trained artifact saved to and loaded from a TOML file.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainedArtifact {
    pub config: RunConfig,
    /// Canonical feature order the network and binner were fitted on.
    pub feature_names: Vec<String>,
    pub network: Network,
    /// Bin edges and frequencies fitted on the scaled training matrix.
    pub binner: Binner,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(
        "The model was fitted on {expected} features but the current schema has {found}; the artifact is from an incompatible version of the data."
    )]
    MismatchedFeatureCount { expected: usize, found: usize },
}

impl TrainedArtifact {
    /// Saves the artifact as human-readable TOML.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let file = fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(toml_string.as_bytes())?;
        writer.flush()?;
        log::info!("Model saved to '{path}'");
        Ok(())
    }

    /// Loads an artifact and checks it against the current feature schema.
    pub fn load(path: &str, expected_features: &[&str]) -> Result<TrainedArtifact, ModelError> {
        let content = fs::read_to_string(path)?;
        let artifact: TrainedArtifact = toml::from_str(&content)?;
        if artifact.feature_names.len() != expected_features.len() {
            return Err(ModelError::MismatchedFeatureCount {
                expected: artifact.feature_names.len(),
                found: expected_features.len(),
            });
        }
        log::info!(
            "Loaded model from '{path}' (seed {}, {} epochs)",
            artifact.config.seed,
            artifact.config.train.epochs
        );
        Ok(artifact)
    }
}
