//! Per-transaction anomaly models, training and scoring

pub mod artifacts;
pub mod autoencoder;
pub mod ensemble;
pub mod evaluation;
pub mod inference;
pub mod isolation_forest;
pub mod normalizer;
pub mod optim;
pub mod scaler;
pub mod training;

pub use artifacts::{ModelArtifacts, ThresholdArtifact, TrainingLock};
pub use autoencoder::{Autoencoder, AutoencoderConfig, TrainingHistory};
pub use ensemble::{EnsembleCombiner, EnsembleWeights};
pub use inference::{PredictionResult, ScoringService};
pub use isolation_forest::{IsolationForest, IsolationForestConfig, MaxSamples};
pub use normalizer::MinMaxNormalizer;
pub use scaler::FeatureScaler;
pub use training::{train_pipeline, TrainingConfig, TrainingReport};
