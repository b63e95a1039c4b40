//! NATS message consumer for incoming transactions

use crate::error::{PipelineError, Result};
use crate::types::transaction::{RawTransaction, TransactionRecord};
use async_nats::{Client, Subscriber};
use tracing::info;

/// Consumer for receiving transactions from NATS
pub struct TransactionConsumer {
    client: Client,
    subject: String,
}

impl TransactionConsumer {
    /// Create a new transaction consumer
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the transaction subject
    pub async fn subscribe(&self) -> anyhow::Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to transaction subject");
        Ok(subscriber)
    }
}

/// Decode and validate one message payload.
///
/// Invalid JSON and missing or unparseable fields both surface as
/// `MalformedInput`.
pub fn decode(payload: &[u8]) -> Result<TransactionRecord> {
    let raw: RawTransaction = serde_json::from_slice(payload)
        .map_err(|e| PipelineError::MalformedInput(format!("invalid JSON payload: {}", e)))?;
    TransactionRecord::try_from(raw)
}
