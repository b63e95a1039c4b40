//! Transaction records for anomaly scoring
//!
//! Upstream payloads arrive as [`RawTransaction`], where every field is
//! optional. They are validated exactly once into a [`TransactionRecord`];
//! nothing past that boundary has to deal with missing or unparseable data.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Transaction as received on the wire, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransaction {
    pub transaction_id: Option<String>,
    pub amount: Option<f64>,
    /// ISO-8601 timestamp
    pub timestamp: Option<String>,
    pub tx_count_1h: Option<u32>,
    pub tx_count_24h: Option<u32>,
    pub avg_amount_7d: Option<f64>,
    pub merchant_risk_score: Option<f64>,
    pub device_changed: Option<bool>,

    // Context-only fields, never fed to the models
    pub account_id: Option<String>,
    pub merchant: Option<String>,
    pub location: Option<String>,
    pub device_id: Option<String>,
    pub ip_address: Option<String>,
}

/// Validated transaction, immutable once scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTransaction")]
pub struct TransactionRecord {
    /// Unique transaction identifier (generated when upstream omits it)
    pub transaction_id: String,

    /// Transaction amount, strictly positive
    pub amount: f64,

    /// Local wall-clock time of the transaction
    pub timestamp: NaiveDateTime,

    /// Prior transactions by the same account in the last hour
    pub tx_count_1h: u32,

    /// Prior transactions by the same account in the last 24 hours
    pub tx_count_24h: u32,

    /// Rolling 7-day average amount for the account
    pub avg_amount_7d: f64,

    /// Merchant risk score, typically in [0, 1]
    pub merchant_risk_score: f64,

    /// Whether the device differs from the account's last known device
    pub device_changed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl TransactionRecord {
    /// Create a record with neutral behavioural fields.
    pub fn new(transaction_id: String, amount: f64, timestamp: NaiveDateTime) -> Self {
        Self {
            transaction_id,
            amount,
            timestamp,
            tx_count_1h: 0,
            tx_count_24h: 0,
            avg_amount_7d: amount,
            merchant_risk_score: 0.0,
            device_changed: false,
            account_id: None,
            merchant: None,
            location: None,
            device_id: None,
            ip_address: None,
        }
    }
}

impl TryFrom<RawTransaction> for TransactionRecord {
    type Error = PipelineError;

    fn try_from(raw: RawTransaction) -> Result<Self> {
        let amount = finite(required(raw.amount, "amount")?, "amount")?;
        if amount <= 0.0 {
            return Err(PipelineError::MalformedInput(format!(
                "amount must be positive, got {}",
                amount
            )));
        }

        let timestamp = parse_timestamp(&required(raw.timestamp, "timestamp")?)?;

        Ok(Self {
            transaction_id: raw
                .transaction_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            amount,
            timestamp,
            tx_count_1h: required(raw.tx_count_1h, "tx_count_1h")?,
            tx_count_24h: required(raw.tx_count_24h, "tx_count_24h")?,
            avg_amount_7d: finite(required(raw.avg_amount_7d, "avg_amount_7d")?, "avg_amount_7d")?,
            merchant_risk_score: finite(
                required(raw.merchant_risk_score, "merchant_risk_score")?,
                "merchant_risk_score",
            )?,
            device_changed: required(raw.device_changed, "device_changed")?,
            account_id: raw.account_id,
            merchant: raw.merchant,
            location: raw.location,
            device_id: raw.device_id,
            ip_address: raw.ip_address,
        })
    }
}

/// Transaction with its ground-truth label, as used for offline training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledTransaction {
    #[serde(flatten)]
    pub record: TransactionRecord,
    #[serde(default)]
    pub is_fraud: bool,
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts naive date-times (`T` or space separated, optional fraction),
/// bare dates (midnight), and RFC 3339 with an offset. Offset timestamps
/// keep their local wall-clock time, so hour-of-day reflects the offset
/// the upstream system reported.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.naive_local());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt);
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| {
            PipelineError::MalformedInput(format!("unparseable timestamp '{}'", value))
        })
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| PipelineError::MalformedInput(format!("missing required field '{}'", field)))
}

fn finite(value: f64, field: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PipelineError::MalformedInput(format!(
            "field '{}' is not a finite number",
            field
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "transaction_id": "tx_001",
            "amount": 120.5,
            "timestamp": "2024-01-01T03:00:00",
            "tx_count_1h": 1,
            "tx_count_24h": 4,
            "avg_amount_7d": 80.0,
            "merchant_risk_score": 0.2,
            "device_changed": false,
            "ip_address": "10.0.0.1"
        })
    }

    #[test]
    fn test_record_deserializes_through_validation() {
        let tx: TransactionRecord = serde_json::from_value(sample_json()).unwrap();
        assert_eq!(tx.transaction_id, "tx_001");
        assert_eq!(tx.amount, 120.5);
        assert_eq!(tx.timestamp.hour(), 3);
        assert_eq!(tx.ip_address.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let mut value = sample_json();
        value.as_object_mut().unwrap().remove("tx_count_24h");
        let raw: RawTransaction = serde_json::from_value(value).unwrap();

        let err = TransactionRecord::try_from(raw).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput(ref m) if m.contains("tx_count_24h")));
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let mut value = sample_json();
        value["amount"] = serde_json::json!(0.0);
        assert!(serde_json::from_value::<TransactionRecord>(value).is_err());
    }

    #[test]
    fn test_missing_id_is_generated() {
        let mut value = sample_json();
        value.as_object_mut().unwrap().remove("transaction_id");
        let tx: TransactionRecord = serde_json::from_value(value).unwrap();
        assert!(!tx.transaction_id.is_empty());
    }

    #[test]
    fn test_timestamp_formats() {
        assert_eq!(parse_timestamp("2024-01-01T03:00:00").unwrap().hour(), 3);
        assert_eq!(parse_timestamp("2024-01-01 17:45:10.250").unwrap().hour(), 17);
        assert_eq!(parse_timestamp("2024-01-01").unwrap().hour(), 0);
        // Wall-clock hour is kept in the reported offset
        assert_eq!(parse_timestamp("2024-01-01T03:00:00+05:00").unwrap().hour(), 3);
        assert_eq!(parse_timestamp("2024-01-01T03:00:00Z").unwrap().hour(), 3);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_record_serialization_round_trip() {
        let tx: TransactionRecord = serde_json::from_value(sample_json()).unwrap();
        let json = serde_json::to_string(&tx).unwrap();
        let back: TransactionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, back);
    }

    #[test]
    fn test_labeled_transaction_flattens() {
        let mut value = sample_json();
        value["is_fraud"] = serde_json::json!(true);
        let labeled: LabeledTransaction = serde_json::from_value(value).unwrap();
        assert!(labeled.is_fraud);
        assert_eq!(labeled.record.amount, 120.5);
    }
}
