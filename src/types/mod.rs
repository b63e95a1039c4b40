//! Type definitions for the scoring pipeline

pub mod alert;
pub mod transaction;

pub use alert::{AlertExplanation, Decision, FraudAlert, RiskLevel, RiskLevelThresholds};
pub use transaction::{LabeledTransaction, RawTransaction, TransactionRecord};
