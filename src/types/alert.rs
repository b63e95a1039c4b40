//! Scoring decisions and fraud alert messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of comparing an ensemble score against the alert threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pass,
    Flag,
}

impl Decision {
    pub fn is_flagged(self) -> bool {
        self == Decision::Flag
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Pass => "pass",
            Decision::Flag => "flag",
        }
    }
}

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Determine risk level from an ensemble score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Configurable risk level thresholds on the ensemble score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            medium: 0.3,
            high: 0.5,
            critical: 0.8,
        }
    }
}

/// Fraud alert published for every flagged transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAlert {
    /// Unique alert identifier
    pub alert_id: String,

    /// Associated transaction ID
    pub transaction_id: String,

    /// Weighted ensemble score
    pub ensemble_score: f64,

    /// Threshold the score was compared against
    pub threshold: f64,

    pub decision: Decision,

    pub risk_level: RiskLevel,

    /// Normalized per-model scores keyed by model name
    pub model_scores: HashMap<String, f64>,

    /// Features whose scaled value deviates strongly from training data
    pub triggered_features: Vec<String>,

    /// Alert generation timestamp
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
}

impl FraudAlert {
    /// Create a new fraud alert
    pub fn new(
        transaction_id: String,
        ensemble_score: f64,
        threshold: f64,
        decision: Decision,
        risk_level: RiskLevel,
        model_scores: HashMap<String, f64>,
    ) -> Self {
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            transaction_id,
            ensemble_score,
            threshold,
            decision,
            risk_level,
            model_scores,
            triggered_features: Vec::new(),
            timestamp: Utc::now(),
            account_id: None,
            merchant: None,
        }
    }

    /// Attach account and merchant context
    pub fn with_context(mut self, account_id: Option<String>, merchant: Option<String>) -> Self {
        self.account_id = account_id;
        self.merchant = merchant;
        self
    }

    /// Add triggered features to the alert
    pub fn with_triggered_features(mut self, features: Vec<String>) -> Self {
        self.triggered_features = features;
        self
    }
}

/// Explanation published after the alert it belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertExplanation {
    pub alert_id: String,
    pub transaction_id: String,
    pub explanation: String,
    /// False when the fixed fallback text was used
    pub generated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_from_score() {
        let thresholds = RiskLevelThresholds::default();

        assert_eq!(RiskLevel::from_score(0.1, &thresholds), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.3, &thresholds), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.65, &thresholds), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(1.4, &thresholds), RiskLevel::Critical);
    }

    #[test]
    fn test_decision_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Decision::Flag).unwrap(), "\"flag\"");
        assert!(Decision::Flag.is_flagged());
        assert!(!Decision::Pass.is_flagged());
    }

    #[test]
    fn test_fraud_alert_serialization() {
        let mut model_scores = HashMap::new();
        model_scores.insert("autoencoder".to_string(), 0.9);
        model_scores.insert("isolation_forest".to_string(), 0.7);

        let alert = FraudAlert::new(
            "tx_123".to_string(),
            0.82,
            0.4,
            Decision::Flag,
            RiskLevel::Critical,
            model_scores,
        )
        .with_context(Some("acct_9".to_string()), None);

        let json = serde_json::to_string(&alert).unwrap();
        assert!(!json.contains("merchant"));
        let deserialized: FraudAlert = serde_json::from_str(&json).unwrap();

        assert_eq!(alert.transaction_id, deserialized.transaction_id);
        assert_eq!(alert.ensemble_score, deserialized.ensemble_score);
        assert_eq!(alert.risk_level, deserialized.risk_level);
        assert_eq!(deserialized.account_id.as_deref(), Some("acct_9"));
    }
}
