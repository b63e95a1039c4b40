//! Model artifact persistence
//!
//! Every artifact is a JSON file in the model directory. Writes go to a
//! temporary file in the same directory which is synced and renamed into
//! place, so readers see either the previous artifact or the new one.
//! Writers hold `.training.lock` for the duration of a run.

use crate::error::{PipelineError, Result};
use crate::feature_extractor::FEATURE_COUNT;
use crate::models::autoencoder::Autoencoder;
use crate::models::ensemble::EnsembleWeights;
use crate::models::isolation_forest::IsolationForest;
use crate::models::normalizer::MinMaxNormalizer;
use crate::models::scaler::FeatureScaler;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const AUTOENCODER_FILE: &str = "autoencoder.json";
pub const ISOLATION_FOREST_FILE: &str = "isolation_forest.json";
pub const FEATURE_SCALER_FILE: &str = "feature_scaler.json";
pub const AE_NORMALIZER_FILE: &str = "ae_score_normalizer.json";
pub const IF_NORMALIZER_FILE: &str = "if_score_normalizer.json";
pub const THRESHOLD_FILE: &str = "alert_threshold.json";
pub const GNN_FILE: &str = "gnn.json";

const LOCK_FILE: &str = ".training.lock";

/// Alert threshold together with the weights and percentile it came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdArtifact {
    pub threshold: f64,
    pub weights: EnsembleWeights,
    pub percentile: f64,
}

/// Everything the scoring service needs
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub autoencoder: Autoencoder,
    pub isolation_forest: IsolationForest,
    pub scaler: FeatureScaler,
    pub ae_normalizer: MinMaxNormalizer,
    pub if_normalizer: MinMaxNormalizer,
    pub threshold: ThresholdArtifact,
}

impl ModelArtifacts {
    /// Acquire the training lock and write every artifact
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let lock = TrainingLock::acquire(dir)?;
        self.save_locked(&lock)
    }

    /// Write every artifact under an already held lock
    pub fn save_locked(&self, lock: &TrainingLock) -> Result<()> {
        let dir = lock.dir();
        self.validate()?;

        write_json_atomic(dir, FEATURE_SCALER_FILE, &self.scaler)?;
        write_json_atomic(dir, AUTOENCODER_FILE, &self.autoencoder)?;
        write_json_atomic(dir, ISOLATION_FOREST_FILE, &self.isolation_forest)?;
        write_json_atomic(dir, AE_NORMALIZER_FILE, &self.ae_normalizer)?;
        write_json_atomic(dir, IF_NORMALIZER_FILE, &self.if_normalizer)?;
        // Written last so a complete threshold implies a complete set
        write_json_atomic(dir, THRESHOLD_FILE, &self.threshold)?;

        info!(dir = %dir.display(), "Model artifacts saved");
        Ok(())
    }

    /// Load every artifact, failing on the first missing or invalid one
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        let artifacts = Self {
            scaler: read_json(dir, FEATURE_SCALER_FILE)?,
            autoencoder: read_json(dir, AUTOENCODER_FILE)?,
            isolation_forest: read_json(dir, ISOLATION_FOREST_FILE)?,
            ae_normalizer: read_json(dir, AE_NORMALIZER_FILE)?,
            if_normalizer: read_json(dir, IF_NORMALIZER_FILE)?,
            threshold: read_json(dir, THRESHOLD_FILE)?,
        };
        artifacts.validate()?;

        info!(
            dir = %dir.display(),
            threshold = artifacts.threshold.threshold,
            "Model artifacts loaded"
        );
        Ok(artifacts)
    }

    /// Cross-check artifact shapes and parameters
    pub fn validate(&self) -> Result<()> {
        let features = self.scaler.n_features();
        if features != FEATURE_COUNT {
            return Err(artifact_error(
                FEATURE_SCALER_FILE,
                format!("expects {} features, extractor produces {}", features, FEATURE_COUNT),
            ));
        }
        if self.autoencoder.input_dim() != features {
            return Err(artifact_error(
                AUTOENCODER_FILE,
                format!("input width {} does not match scaler width {}", self.autoencoder.input_dim(), features),
            ));
        }
        if !self.isolation_forest.is_fitted() {
            return Err(artifact_error(ISOLATION_FOREST_FILE, "forest has no trees"));
        }
        if self.isolation_forest.n_features() != features {
            return Err(artifact_error(
                ISOLATION_FOREST_FILE,
                format!("input width {} does not match scaler width {}", self.isolation_forest.n_features(), features),
            ));
        }
        for (name, normalizer) in [
            (AE_NORMALIZER_FILE, &self.ae_normalizer),
            (IF_NORMALIZER_FILE, &self.if_normalizer),
        ] {
            if !normalizer.min.is_finite() || !normalizer.max.is_finite() || normalizer.max < normalizer.min {
                return Err(artifact_error(name, "normalizer range is invalid"));
            }
        }
        if !self.threshold.threshold.is_finite() {
            return Err(artifact_error(THRESHOLD_FILE, "threshold is not finite"));
        }
        self.threshold
            .weights
            .validate()
            .map_err(|e| artifact_error(THRESHOLD_FILE, e.to_string()))
    }
}

/// Exclusive lock on a model directory, released on drop
#[derive(Debug)]
pub struct TrainingLock {
    dir: PathBuf,
    path: PathBuf,
}

impl TrainingLock {
    /// Create the model directory if needed and take the lock.
    ///
    /// Fails when another run already holds it.
    pub fn acquire(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let path = dir.join(LOCK_FILE);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Self { dir, path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(PipelineError::TrainingError(format!(
                "model directory {} is locked by another training run ({})",
                dir.display(),
                path.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for TrainingLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release training lock");
        }
    }
}

/// Serialize `value` to `dir/name` via temp file, fsync and rename
pub fn write_json_atomic<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<()> {
    let target = dir.join(name);
    let tmp = dir.join(format!(".{}.tmp", name));

    let file = File::create(&tmp)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)
        .map_err(|e| artifact_error(name, format!("serialization failed: {}", e)))?;
    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| PipelineError::Io(e.into_error()))?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, &target)?;
    Ok(())
}

/// Read and deserialize `dir/name`, naming the artifact in any error
pub fn read_json<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    let file = File::open(&path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => artifact_error(name, format!("not found at {}", path.display())),
        _ => artifact_error(name, format!("unreadable: {}", e)),
    })?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| artifact_error(name, format!("invalid contents: {}", e)))
}

fn artifact_error(name: &str, reason: impl Into<String>) -> PipelineError {
    PipelineError::Artifact {
        name: name.to_string(),
        reason: reason.into(),
    }
}
