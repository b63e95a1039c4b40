//! Feature extraction for per-transaction anomaly scoring.
//!
//! Produces the fixed-order vector both models were trained on. The order
//! here is part of the model artifact contract: changing it invalidates
//! every trained autoencoder, forest and scaler.

use crate::error::Result;
use crate::types::transaction::{RawTransaction, TransactionRecord};
use chrono::{Datelike, Timelike};
use ndarray::Array2;

/// Number of features in the per-transaction vector
pub const FEATURE_COUNT: usize = 8;

/// Feature names in vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "amount",
    "hour_of_day",
    "day_of_week",
    "tx_count_1h",
    "tx_count_24h",
    "avg_amount_7d",
    "merchant_risk_score",
    "device_changed",
];

/// Feature extractor that transforms transactions into model input features.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Create a new feature extractor.
    pub fn new() -> Self {
        Self
    }

    /// Extract features from a validated transaction.
    ///
    /// Day of week counts from Monday = 0.
    pub fn extract(&self, tx: &TransactionRecord) -> Vec<f64> {
        vec![
            tx.amount,
            tx.timestamp.hour() as f64,
            tx.timestamp.weekday().num_days_from_monday() as f64,
            tx.tx_count_1h as f64,
            tx.tx_count_24h as f64,
            tx.avg_amount_7d,
            tx.merchant_risk_score,
            if tx.device_changed { 1.0 } else { 0.0 },
        ]
    }

    /// Validate an unchecked payload, then extract.
    ///
    /// Fails with `MalformedInput` when a required field is absent or the
    /// timestamp cannot be parsed.
    pub fn extract_raw(&self, raw: &RawTransaction) -> Result<Vec<f64>> {
        let tx = TransactionRecord::try_from(raw.clone())?;
        Ok(self.extract(&tx))
    }

    /// Extract a batch into a row-per-transaction matrix.
    pub fn extract_batch(&self, txs: &[TransactionRecord]) -> Array2<f64> {
        let mut data = Vec::with_capacity(txs.len() * FEATURE_COUNT);
        for tx in txs {
            data.extend(self.extract(tx));
        }
        Array2::from_shape_vec((txs.len(), FEATURE_COUNT), data)
            .unwrap_or_else(|_| Array2::zeros((0, FEATURE_COUNT)))
    }

    /// Get the number of features produced.
    pub fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    /// Get feature names in vector order.
    pub fn feature_names(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::types::transaction::parse_timestamp;

    fn raw_sample() -> RawTransaction {
        RawTransaction {
            amount: Some(5000.0),
            timestamp: Some("2024-01-01T03:00:00".to_string()),
            tx_count_1h: Some(0),
            tx_count_24h: Some(1),
            avg_amount_7d: Some(50.0),
            merchant_risk_score: Some(0.1),
            device_changed: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn test_feature_extraction() {
        let extractor = FeatureExtractor::new();
        let features = extractor.extract_raw(&raw_sample()).unwrap();

        assert_eq!(features.len(), extractor.feature_count());
        // 2024-01-01 was a Monday
        assert_eq!(features, vec![5000.0, 3.0, 0.0, 0.0, 1.0, 50.0, 0.1, 1.0]);
    }

    #[test]
    fn test_first_feature_is_exact_amount() {
        let extractor = FeatureExtractor::new();
        for amount in [0.01, 1.0, 123.456789, 98765.4321] {
            let tx = TransactionRecord::new(
                "tx".to_string(),
                amount,
                parse_timestamp("2024-06-15T23:59:59").unwrap(),
            );
            let features = extractor.extract(&tx);
            assert_eq!(features.len(), FEATURE_COUNT);
            assert_eq!(features[0], amount);
            assert_eq!(features[1], 23.0);
            // Saturday
            assert_eq!(features[2], 5.0);
        }
    }

    #[test]
    fn test_missing_field_fails() {
        let extractor = FeatureExtractor::new();
        let mut raw = raw_sample();
        raw.merchant_risk_score = None;

        assert!(matches!(
            extractor.extract_raw(&raw),
            Err(PipelineError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_bad_timestamp_fails() {
        let extractor = FeatureExtractor::new();
        let mut raw = raw_sample();
        raw.timestamp = Some("01/01/2024 3am".to_string());

        assert!(matches!(
            extractor.extract_raw(&raw),
            Err(PipelineError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = FeatureExtractor::new();
        let raw = raw_sample();
        assert_eq!(
            extractor.extract_raw(&raw).unwrap(),
            extractor.extract_raw(&raw).unwrap()
        );
    }

    #[test]
    fn test_extract_batch_shape() {
        let extractor = FeatureExtractor::new();
        let tx = TransactionRecord::try_from(raw_sample()).unwrap();
        let batch = extractor.extract_batch(&[tx.clone(), tx]);
        assert_eq!(batch.dim(), (2, FEATURE_COUNT));
        assert_eq!(batch[[1, 0]], 5000.0);
        assert_eq!(extractor.feature_names().len(), FEATURE_COUNT);
    }
}
