//! Sanitized facts handed to the text-generation backend
//!
//! Only amount, merchant, location, timestamp, spend behaviour and the
//! model outcome are exposed. IP addresses and device identifiers never
//! leave the pipeline.

use crate::models::inference::PredictionResult;
use crate::types::alert::Decision;
use crate::types::transaction::TransactionRecord;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionFacts {
    pub amount: f64,
    pub merchant: Option<String>,
    pub location: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehavioralFacts {
    pub average_user_spend: f64,
    /// amount / average spend, two decimals; null without a positive average
    pub amount_deviation_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelOutputs {
    pub risk_score: f64,
    pub decision: Decision,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplanationContext {
    pub transaction_features: TransactionFacts,
    pub behavioral_features: BehavioralFacts,
    pub model_outputs: ModelOutputs,
}

impl ExplanationContext {
    pub fn new(tx: &TransactionRecord, risk_score: f64, decision: Decision) -> Self {
        let average = tx.avg_amount_7d;
        let amount_deviation_ratio = if average > 0.0 {
            Some((tx.amount / average * 100.0).round() / 100.0)
        } else {
            None
        };

        Self {
            transaction_features: TransactionFacts {
                amount: tx.amount,
                merchant: tx.merchant.clone(),
                location: tx.location.clone(),
                timestamp: tx.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
            },
            behavioral_features: BehavioralFacts {
                average_user_spend: average,
                amount_deviation_ratio,
            },
            model_outputs: ModelOutputs {
                risk_score,
                decision,
            },
        }
    }

    pub fn from_prediction(tx: &TransactionRecord, prediction: &PredictionResult) -> Self {
        Self::new(tx, prediction.ensemble_score, prediction.decision)
    }
}
