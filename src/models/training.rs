//! Offline training of the per-transaction models
//!
//! Legitimate records are split into train and validation sets. The
//! autoencoder and isolation forest learn from the train split only; the
//! alert threshold is the configured percentile of ensemble scores over
//! the held-out legitimate validation split.

use crate::error::{PipelineError, Result};
use crate::feature_extractor::{FeatureExtractor, FEATURE_COUNT};
use crate::models::artifacts::{ModelArtifacts, ThresholdArtifact};
use crate::models::autoencoder::{Autoencoder, AutoencoderConfig, TrainingHistory};
use crate::models::ensemble::{percentile, EnsembleWeights};
use crate::models::evaluation::roc_auc;
use crate::models::isolation_forest::{IsolationForest, IsolationForestConfig};
use crate::models::normalizer::MinMaxNormalizer;
use crate::models::scaler::FeatureScaler;
use crate::types::transaction::LabeledTransaction;
use ndarray::{Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Share of legitimate records held out for validation
    pub validation_fraction: f64,
    /// Percentile of validation ensemble scores used as the alert threshold
    pub threshold_percentile: f64,
    pub weights: EnsembleWeights,
    /// Seed for the train/validation split
    pub seed: u64,
    pub autoencoder: AutoencoderConfig,
    pub isolation_forest: IsolationForestConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
            threshold_percentile: 99.9,
            weights: EnsembleWeights::default(),
            seed: 42,
            autoencoder: AutoencoderConfig::default(),
            isolation_forest: IsolationForestConfig::default(),
        }
    }
}

/// Summary of a training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub n_records: usize,
    pub n_fraud: usize,
    pub n_train: usize,
    pub n_validation: usize,
    pub autoencoder: TrainingHistory,
    pub threshold: f64,
    /// Ensemble ROC-AUC over every record
    pub roc_auc: f64,
    /// Share of fraudulent records at or above the threshold
    pub fraud_recall: f64,
    /// Share of validation records at or above the threshold
    pub validation_flag_rate: f64,
}

/// Fit scaler, autoencoder, forest, normalizers and threshold
pub fn train_pipeline(
    data: &[LabeledTransaction],
    config: &TrainingConfig,
) -> Result<(ModelArtifacts, TrainingReport)> {
    config.weights.validate()?;
    if !(config.validation_fraction > 0.0 && config.validation_fraction < 1.0) {
        return Err(PipelineError::InvalidParameter {
            name: "validation_fraction".to_string(),
            value: config.validation_fraction.to_string(),
            reason: "must be in (0, 1)".to_string(),
        });
    }

    let labels: Vec<bool> = data.iter().map(|t| t.is_fraud).collect();
    let n_fraud = labels.iter().filter(|&&l| l).count();
    if n_fraud == 0 || n_fraud == data.len() {
        return Err(PipelineError::TrainingError(format!(
            "training data needs both classes ({} records, {} fraudulent)",
            data.len(),
            n_fraud
        )));
    }

    let x = feature_matrix(data)?;
    let scaler = FeatureScaler::fit(&x)?;
    let scaled = scaler.transform(&x)?;

    let (train_idx, val_idx) = split_legitimate(&labels, config)?;
    let train = scaled.select(Axis(0), &train_idx);
    let val = scaled.select(Axis(0), &val_idx);
    info!(
        records = data.len(),
        fraud = n_fraud,
        train = train_idx.len(),
        validation = val_idx.len(),
        "Training split prepared"
    );

    let mut autoencoder = Autoencoder::new(FEATURE_COUNT, config.autoencoder.clone())?;
    let history = autoencoder.fit(&train, &val)?;

    let mut isolation_forest = IsolationForest::new(config.isolation_forest.clone());
    isolation_forest.fit(&train)?;

    let ae_raw = autoencoder.reconstruction_errors(&scaled)?.to_vec();
    let if_raw = isolation_forest.raw_scores(&scaled)?.to_vec();
    let ae_normalizer = MinMaxNormalizer::fit(&ae_raw)?;
    let if_normalizer = MinMaxNormalizer::fit(&if_raw)?;

    let scores = config.weights.combine_all(
        &ae_normalizer.transform_all(&ae_raw),
        &if_normalizer.transform_all(&if_raw),
    )?;
    let val_scores: Vec<f64> = val_idx.iter().map(|&i| scores[i]).collect();
    let threshold = percentile(&val_scores, config.threshold_percentile)?;

    let auc = roc_auc(&labels, &scores)?;
    let flagged_fraud = scores
        .iter()
        .zip(&labels)
        .filter(|(&s, &fraud)| fraud && s >= threshold)
        .count();
    let flagged_val = val_scores.iter().filter(|&&s| s >= threshold).count();

    let report = TrainingReport {
        n_records: data.len(),
        n_fraud,
        n_train: train_idx.len(),
        n_validation: val_idx.len(),
        autoencoder: history,
        threshold,
        roc_auc: auc,
        fraud_recall: flagged_fraud as f64 / n_fraud as f64,
        validation_flag_rate: flagged_val as f64 / val_idx.len() as f64,
    };

    info!(
        threshold,
        roc_auc = auc,
        fraud_recall = report.fraud_recall,
        "Ensemble calibrated"
    );

    let artifacts = ModelArtifacts {
        autoencoder,
        isolation_forest,
        scaler,
        ae_normalizer,
        if_normalizer,
        threshold: ThresholdArtifact {
            threshold,
            weights: config.weights,
            percentile: config.threshold_percentile,
        },
    };

    Ok((artifacts, report))
}

fn feature_matrix(data: &[LabeledTransaction]) -> Result<Array2<f64>> {
    let extractor = FeatureExtractor::new();
    let flat: Vec<f64> = data
        .iter()
        .flat_map(|t| extractor.extract(&t.record))
        .collect();
    Array2::from_shape_vec((data.len(), FEATURE_COUNT), flat)
        .map_err(|e| PipelineError::TrainingError(format!("feature matrix: {}", e)))
}

/// Shuffle legitimate row indices and split off the validation share
fn split_legitimate(labels: &[bool], config: &TrainingConfig) -> Result<(Vec<usize>, Vec<usize>)> {
    let mut legit: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, &fraud)| !fraud)
        .map(|(i, _)| i)
        .collect();
    if legit.len() < 2 {
        return Err(PipelineError::TrainingError(
            "need at least two legitimate records to split".to_string(),
        ));
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);
    legit.shuffle(&mut rng);

    let n_val = ((legit.len() as f64) * config.validation_fraction).round() as usize;
    let n_val = n_val.clamp(1, legit.len() - 1);
    let val = legit.split_off(legit.len() - n_val);
    Ok((legit, val))
}
