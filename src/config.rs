//! Configuration management for the anomaly scoring pipeline
//!
//! Values come from `config/config.toml`, overridden by environment
//! variables prefixed `FRAUD__` (e.g. `FRAUD__NATS__URL`,
//! `FRAUD__DETECTION__THRESHOLD_OVERRIDE`).

use crate::graph::GraphTrainingConfig;
use crate::models::training::TrainingConfig;
use crate::types::alert::RiskLevelThresholds;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const ENV_PREFIX: &str = "FRAUD";
const ENV_SEPARATOR: &str = "__";

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub models: ModelsConfig,
    pub detection: DetectionConfig,
    pub pipeline: PipelineConfig,
    pub explanation: ExplanationConfig,
    pub training: TrainingConfig,
    pub graph: GraphTrainingConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming transactions
    pub transaction_subject: String,
    /// Subject for outgoing fraud alerts
    pub alert_subject: String,
    /// Subject for alert explanations
    pub explanation_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            transaction_subject: "transactions".to_string(),
            alert_subject: "fraud.alerts".to_string(),
            explanation_subject: "fraud.explanations".to_string(),
        }
    }
}

/// Model artifact location
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory holding the JSON model artifacts
    pub models_dir: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            models_dir: "models".to_string(),
        }
    }
}

/// Detection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Replaces the trained alert threshold when set
    pub threshold_override: Option<f64>,
    /// Risk level classification thresholds
    pub risk_levels: RiskLevelThresholds,
    /// Scaled magnitude at which a feature is reported as triggered
    pub trigger_z_score: f64,
    /// Publish alerts for passing transactions too
    pub publish_passes: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold_override: None,
            risk_levels: RiskLevelThresholds::default(),
            trigger_z_score: 3.0,
            publish_passes: false,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum transactions scored concurrently
    pub max_concurrent: usize,
    /// Seconds between metrics summaries
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 64,
            metrics_interval_secs: 10,
        }
    }
}

/// Text-generation backend for alert explanations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExplanationConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ExplanationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "llama3".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/config.toml` and the environment
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path plus `FRAUD__` overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map instead of the process env
    pub fn load_with_env<P: AsRef<Path>>(
        path: P,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| format!("Failed to build configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.nats.explanation_subject, "fraud.explanations");
        assert_eq!(config.detection.threshold_override, None);
        assert_eq!(config.training.threshold_percentile, 99.9);
        assert_eq!(config.training.weights.autoencoder, 0.6);
        assert_eq!(config.explanation.timeout_secs, 10);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config(
            r#"
            [nats]
            url = "nats://bus:4222"

            [detection]
            threshold_override = 0.35

            [training.autoencoder]
            max_epochs = 10
            "#,
        );
        let config = AppConfig::load_with_env(file.path(), Some(HashMap::new())).unwrap();

        assert_eq!(config.nats.url, "nats://bus:4222");
        assert_eq!(config.nats.transaction_subject, "transactions");
        assert_eq!(config.detection.threshold_override, Some(0.35));
        assert_eq!(config.training.autoencoder.max_epochs, 10);
        assert_eq!(config.training.autoencoder.patience, 5);
        assert_eq!(config.pipeline.max_concurrent, 64);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config("[pipeline]\nmax_concurrent = 8\n");
        let env = HashMap::from([
            ("FRAUD__PIPELINE__MAX_CONCURRENT".to_string(), "16".to_string()),
            ("FRAUD__EXPLANATION__MODEL".to_string(), "mistral".to_string()),
        ]);
        let config = AppConfig::load_with_env(file.path(), Some(env)).unwrap();

        assert_eq!(config.pipeline.max_concurrent, 16);
        assert_eq!(config.explanation.model, "mistral");
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/config.toml");
        let config = AppConfig::load_with_env(path, Some(HashMap::new())).unwrap();

        assert_eq!(config.training, TrainingConfig::default());
        assert_eq!(config.graph, GraphTrainingConfig::default());
        assert_eq!(config.detection.risk_levels.critical, 0.8);
        assert_eq!(config.models.models_dir, "models");
    }

    #[test]
    fn test_shipped_config_trains_models() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/config.toml");
        let config = AppConfig::load_with_env(path, Some(HashMap::new())).unwrap();

        let data = crate::synthetic::TransactionGenerator::new(5).labeled_dataset(300, 0.05);
        let (artifacts, report) = crate::models::train_pipeline(&data, &config.training).unwrap();
        assert_eq!(
            artifacts.autoencoder.config().hidden_dim,
            config.training.autoencoder.hidden_dim
        );
        assert!(report.threshold.is_finite());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load_from_path("does/not/exist.toml").is_err());
    }
}
