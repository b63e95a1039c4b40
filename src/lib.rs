//! Fraud Anomaly Scoring Pipeline Library
//!
//! Real-time transaction scoring with an autoencoder and isolation forest
//! ensemble, an offline graph scorer over account interactions, and
//! best-effort natural-language alert explanations.

pub mod config;
pub mod consumer;
pub mod error;
pub mod explain;
pub mod feature_extractor;
pub mod graph;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod synthetic;
pub mod types;

pub use config::AppConfig;
pub use consumer::TransactionConsumer;
pub use error::{PipelineError, Result};
pub use explain::{ExplanationContext, ExplanationGenerator};
pub use feature_extractor::FeatureExtractor;
pub use models::inference::{PredictionResult, ScoringService};
pub use producer::AlertProducer;
pub use types::{
    alert::{Decision, FraudAlert},
    transaction::{RawTransaction, TransactionRecord},
};
