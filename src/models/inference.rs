//! Per-transaction scoring service
//!
//! Holds the loaded artifacts behind an immutable API so a single instance
//! can be shared by `Arc` across every worker task.

use crate::config::AppConfig;
use crate::error::{PipelineError, Result};
use crate::feature_extractor::{FeatureExtractor, FEATURE_NAMES};
use crate::models::artifacts::ModelArtifacts;
use crate::models::ensemble::EnsembleCombiner;
use crate::types::alert::{Decision, FraudAlert, RiskLevel, RiskLevelThresholds};
use crate::types::transaction::{RawTransaction, TransactionRecord};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

pub const AUTOENCODER_SCORE: &str = "autoencoder";
pub const ISOLATION_FOREST_SCORE: &str = "isolation_forest";

/// Outcome of scoring one transaction
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    pub transaction_id: String,
    /// Unscaled feature vector
    pub features: Vec<f64>,
    /// Reconstruction error before normalization
    pub ae_raw: f64,
    /// Isolation forest score before normalization
    pub if_raw: f64,
    pub ae_score: f64,
    pub if_score: f64,
    pub ensemble_score: f64,
    pub threshold: f64,
    pub decision: Decision,
    /// Features whose scaled magnitude reached the trigger z-score
    pub triggered_features: Vec<String>,
}

impl PredictionResult {
    /// Normalized component scores keyed by model name
    pub fn model_scores(&self) -> HashMap<String, f64> {
        HashMap::from([
            (AUTOENCODER_SCORE.to_string(), self.ae_score),
            (ISOLATION_FOREST_SCORE.to_string(), self.if_score),
        ])
    }

    /// Convert prediction result to a fraud alert
    pub fn to_alert(
        &self,
        transaction: &TransactionRecord,
        risk_thresholds: &RiskLevelThresholds,
    ) -> FraudAlert {
        let risk_level = RiskLevel::from_score(self.ensemble_score, risk_thresholds);

        FraudAlert::new(
            self.transaction_id.clone(),
            self.ensemble_score,
            self.threshold,
            self.decision,
            risk_level,
            self.model_scores(),
        )
        .with_context(transaction.account_id.clone(), transaction.merchant.clone())
        .with_triggered_features(self.triggered_features.clone())
    }
}

/// Immutable scoring service over a loaded artifact set
#[derive(Debug)]
pub struct ScoringService {
    extractor: FeatureExtractor,
    artifacts: ModelArtifacts,
    combiner: EnsembleCombiner,
    risk_thresholds: RiskLevelThresholds,
    trigger_z_score: f64,
}

impl ScoringService {
    /// Build a service from artifacts; `threshold_override` replaces the
    /// trained alert threshold.
    pub fn new(
        artifacts: ModelArtifacts,
        threshold_override: Option<f64>,
        risk_thresholds: RiskLevelThresholds,
    ) -> Result<Self> {
        artifacts.validate()?;
        let threshold = threshold_override.unwrap_or(artifacts.threshold.threshold);
        let combiner = EnsembleCombiner::new(artifacts.threshold.weights, threshold)?;

        Ok(Self {
            extractor: FeatureExtractor::new(),
            artifacts,
            combiner,
            risk_thresholds,
            trigger_z_score: 3.0,
        })
    }

    /// Scaled magnitude at which a feature is reported as triggered
    pub fn with_trigger_z_score(mut self, z: f64) -> Self {
        self.trigger_z_score = z;
        self
    }

    /// Load artifacts from the configured model directory
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let artifacts = ModelArtifacts::load(&config.models.models_dir)?;
        let service = Self::new(
            artifacts,
            config.detection.threshold_override,
            config.detection.risk_levels.clone(),
        )?
        .with_trigger_z_score(config.detection.trigger_z_score);

        info!(
            models_dir = %config.models.models_dir,
            threshold = service.threshold(),
            overridden = config.detection.threshold_override.is_some(),
            "Scoring service initialized"
        );
        Ok(service)
    }

    pub fn threshold(&self) -> f64 {
        self.combiner.threshold()
    }

    pub fn risk_thresholds(&self) -> &RiskLevelThresholds {
        &self.risk_thresholds
    }

    /// Score a validated transaction
    pub fn score(&self, tx: &TransactionRecord) -> Result<PredictionResult> {
        let features = self.extractor.extract(tx);
        let scaled = self.artifacts.scaler.transform_row(&features)?;

        let ae_raw = self.artifacts.autoencoder.score(&scaled)?;
        if !ae_raw.is_finite() {
            return Err(PipelineError::invalid_score("autoencoder raw", ae_raw));
        }
        let if_raw = self.artifacts.isolation_forest.raw_score(&scaled)?;

        let ae_score = self.artifacts.ae_normalizer.transform(ae_raw);
        let if_score = self.artifacts.if_normalizer.transform(if_raw);
        let (ensemble_score, decision) = self.combiner.evaluate(ae_score, if_score)?;

        let triggered_features = FEATURE_NAMES
            .iter()
            .zip(scaled.iter())
            .filter(|(_, z)| z.abs() >= self.trigger_z_score)
            .map(|(name, _)| name.to_string())
            .collect();

        debug!(
            transaction_id = %tx.transaction_id,
            ae_score,
            if_score,
            ensemble_score,
            decision = decision.as_str(),
            "Transaction scored"
        );

        Ok(PredictionResult {
            transaction_id: tx.transaction_id.clone(),
            features,
            ae_raw,
            if_raw,
            ae_score,
            if_score,
            ensemble_score,
            threshold: self.threshold(),
            decision,
            triggered_features,
        })
    }

    /// Validate an unchecked payload, then score it
    pub fn score_raw(&self, raw: RawTransaction) -> Result<PredictionResult> {
        let tx = TransactionRecord::try_from(raw)?;
        self.score(&tx)
    }

    /// Score a batch; each transaction succeeds or fails on its own
    pub fn score_batch(&self, txs: &[TransactionRecord]) -> Vec<Result<PredictionResult>> {
        txs.iter().map(|tx| self.score(tx)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::autoencoder::AutoencoderConfig;
    use crate::models::isolation_forest::IsolationForestConfig;
    use crate::models::training::{train_pipeline, TrainingConfig};
    use crate::synthetic::TransactionGenerator;
    use crate::types::transaction::parse_timestamp;

    fn trained_artifacts() -> ModelArtifacts {
        let data = TransactionGenerator::new(31).labeled_dataset(600, 0.02);
        let config = TrainingConfig {
            autoencoder: AutoencoderConfig {
                max_epochs: 15,
                learning_rate: 5e-3,
                ..Default::default()
            },
            isolation_forest: IsolationForestConfig {
                n_estimators: 50,
                ..Default::default()
            },
            ..Default::default()
        };
        train_pipeline(&data, &config).unwrap().0
    }

    fn night_transfer() -> TransactionRecord {
        let mut tx = TransactionRecord::new(
            "tx_night".to_string(),
            5000.0,
            parse_timestamp("2024-01-01T03:00:00").unwrap(),
        );
        tx.tx_count_24h = 1;
        tx.avg_amount_7d = 50.0;
        tx.merchant_risk_score = 0.1;
        tx.device_changed = true;
        tx.account_id = Some("acct_1".to_string());
        tx
    }

    #[test]
    fn test_scores_are_consistent() {
        let service = ScoringService::new(trained_artifacts(), None, RiskLevelThresholds::default()).unwrap();
        let result = service.score(&night_transfer()).unwrap();

        let expected = 0.6 * result.ae_score + 0.4 * result.if_score;
        assert!((result.ensemble_score - expected).abs() < 1e-12);
        assert_eq!(result.decision.is_flagged(), result.ensemble_score >= result.threshold);
        assert_eq!(result.features[0], 5000.0);
        assert!(result.triggered_features.contains(&"amount".to_string()));
    }

    #[test]
    fn test_large_night_amount_is_flagged() {
        let service = ScoringService::new(trained_artifacts(), None, RiskLevelThresholds::default()).unwrap();
        let result = service.score(&night_transfer()).unwrap();
        assert_eq!(result.decision, Decision::Flag);

        let alert = result.to_alert(&night_transfer(), service.risk_thresholds());
        assert_eq!(alert.transaction_id, "tx_night");
        assert_eq!(alert.account_id.as_deref(), Some("acct_1"));
        assert_eq!(alert.model_scores.len(), 2);
    }

    #[test]
    fn test_threshold_override() {
        let service = ScoringService::new(trained_artifacts(), Some(1e9), RiskLevelThresholds::default()).unwrap();
        assert_eq!(service.threshold(), 1e9);
        assert_eq!(service.score(&night_transfer()).unwrap().decision, Decision::Pass);

        assert!(ScoringService::new(trained_artifacts(), Some(f64::NAN), RiskLevelThresholds::default()).is_err());
    }

    #[test]
    fn test_malformed_raw_rejected() {
        let service = ScoringService::new(trained_artifacts(), None, RiskLevelThresholds::default()).unwrap();
        let raw = RawTransaction {
            amount: Some(10.0),
            ..Default::default()
        };
        assert!(matches!(
            service.score_raw(raw),
            Err(PipelineError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_batch_matches_single() {
        let service = ScoringService::new(trained_artifacts(), None, RiskLevelThresholds::default()).unwrap();
        let mut gen = TransactionGenerator::new(32);
        let txs: Vec<_> = (0..5).map(|_| gen.legitimate()).collect();

        let batch = service.score_batch(&txs);
        for (tx, result) in txs.iter().zip(batch) {
            let single = service.score(tx).unwrap();
            assert_eq!(result.unwrap().ensemble_score, single.ensemble_score);
        }
    }
}
