//! NATS message producer for fraud alerts and their explanations

use crate::types::alert::{AlertExplanation, FraudAlert};
use anyhow::Result;
use async_nats::Client;
use serde::Serialize;
use tracing::debug;

/// Producer for publishing fraud alerts to NATS
#[derive(Clone)]
pub struct AlertProducer {
    client: Client,
    alert_subject: String,
    explanation_subject: String,
}

impl AlertProducer {
    pub fn new(client: Client, alert_subject: &str, explanation_subject: &str) -> Self {
        Self {
            client,
            alert_subject: alert_subject.to_string(),
            explanation_subject: explanation_subject.to_string(),
        }
    }

    /// Publish a fraud alert
    pub async fn publish(&self, alert: &FraudAlert) -> Result<()> {
        self.publish_json(&self.alert_subject, alert).await?;

        debug!(
            alert_id = %alert.alert_id,
            transaction_id = %alert.transaction_id,
            ensemble_score = alert.ensemble_score,
            "Published fraud alert"
        );
        Ok(())
    }

    /// Publish an explanation for an already published alert
    pub async fn publish_explanation(&self, explanation: &AlertExplanation) -> Result<()> {
        self.publish_json(&self.explanation_subject, explanation).await?;

        debug!(
            alert_id = %explanation.alert_id,
            generated = explanation.generated,
            "Published alert explanation"
        );
        Ok(())
    }

    async fn publish_json<T: Serialize>(&self, subject: &str, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.client
            .publish(subject.to_string(), payload.into())
            .await?;
        Ok(())
    }
}
