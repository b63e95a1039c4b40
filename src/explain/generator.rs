//! Natural-language alert explanations from a local text-generation endpoint
//!
//! Best effort: every failure is logged and replaced by a fixed fallback
//! text, so callers never see an error and never retry.

use crate::config::ExplanationConfig;
use crate::error::{PipelineError, Result};
use crate::explain::context::ExplanationContext;
use crate::types::alert::{AlertExplanation, FraudAlert};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const FALLBACK_EXPLANATION: &str =
    "Explanation unavailable. Please review transaction details manually.";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

#[derive(Error, Debug)]
enum GenerationFailure {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned {0}")]
    Status(reqwest::StatusCode),
    #[error("response body is not valid JSON: {0}")]
    Body(#[from] serde_json::Error),
    #[error("response has no text")]
    Empty,
}

pub struct ExplanationGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl ExplanationGenerator {
    pub fn new(config: &ExplanationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::InvalidParameter {
                name: "explanation.timeout_secs".to_string(),
                value: config.timeout_secs.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        })
    }

    /// Prompt embedding the pretty-printed context
    pub fn build_prompt(context: &ExplanationContext) -> Result<String> {
        let facts = serde_json::to_string_pretty(context)?;
        Ok(format!(
            "You are a fraud risk analyst assistant.\n\n\
             Explain in simple, professional language why the following\n\
             transaction received this risk assessment.\n\n\
             Rules:\n\
             - Do NOT mention IP addresses or device IDs\n\
             - Do NOT invent new facts\n\
             - Use only the provided context\n\
             - Keep explanation under 4 sentences\n\n\
             Context:\n{}\n",
            facts
        ))
    }

    /// Explanation text, or the fallback on any failure
    pub async fn explain(&self, context: &ExplanationContext) -> String {
        self.explain_or_fallback(context).await.0
    }

    /// Explanation message for an alert
    pub async fn explain_alert(&self, alert: &FraudAlert, context: &ExplanationContext) -> AlertExplanation {
        let (explanation, generated) = self.explain_or_fallback(context).await;
        AlertExplanation {
            alert_id: alert.alert_id.clone(),
            transaction_id: alert.transaction_id.clone(),
            explanation,
            generated,
        }
    }

    async fn explain_or_fallback(&self, context: &ExplanationContext) -> (String, bool) {
        let prompt = match Self::build_prompt(context) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "Failed to build explanation prompt");
                return (FALLBACK_EXPLANATION.to_string(), false);
            }
        };

        match self.generate(&prompt).await {
            Ok(text) => {
                debug!(chars = text.len(), "Explanation generated");
                (text, true)
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Explanation backend failed, using fallback");
                (FALLBACK_EXPLANATION.to_string(), false)
            }
        }
    }

    async fn generate(&self, prompt: &str) -> std::result::Result<String, GenerationFailure> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerationFailure::Status(status));
        }

        let body = response.bytes().await?;
        let parsed: GenerateResponse = serde_json::from_slice(&body)?;
        match parsed.response {
            Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            _ => Err(GenerationFailure::Empty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::alert::Decision;
    use crate::types::transaction::{parse_timestamp, TransactionRecord};
    use httpmock::{Method, MockServer};
    use serde_json::json;

    fn context() -> ExplanationContext {
        let mut tx = TransactionRecord::new(
            "tx_1".to_string(),
            5000.0,
            parse_timestamp("2024-01-01T03:00:00").unwrap(),
        );
        tx.avg_amount_7d = 50.0;
        tx.ip_address = Some("198.51.100.23".to_string());
        tx.device_id = Some("dev_0xfeed".to_string());
        ExplanationContext::new(&tx, 0.93, Decision::Flag)
    }

    fn generator(endpoint: String, timeout_secs: u64) -> ExplanationGenerator {
        ExplanationGenerator::new(&ExplanationConfig {
            enabled: true,
            endpoint,
            model: "llama3".to_string(),
            timeout_secs,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_returns_backend_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(Method::POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"model": "llama3", "stream": false}"#);
                then.status(200)
                    .json_body(json!({"response": " Amount is 100x the usual spend. "}));
            })
            .await;

        let text = generator(server.url("/api/generate"), 5).explain(&context()).await;

        mock.assert_async().await;
        assert_eq!(text, "Amount is 100x the usual spend.");
    }

    #[tokio::test]
    async fn test_malformed_json_falls_back() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::POST);
                then.status(200).body("{not json");
            })
            .await;

        let text = generator(server.url("/api/generate"), 5).explain(&context()).await;
        assert_eq!(text, FALLBACK_EXPLANATION);
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::POST);
                then.status(200)
                    .delay(Duration::from_secs(3))
                    .json_body(json!({"response": "too late"}));
            })
            .await;

        let text = generator(server.url("/api/generate"), 1).explain(&context()).await;
        assert_eq!(text, FALLBACK_EXPLANATION);
    }

    #[tokio::test]
    async fn test_error_status_and_empty_text_fall_back() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::POST).path("/down");
                then.status(503);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(Method::POST).path("/empty");
                then.status(200).json_body(json!({"done": true}));
            })
            .await;

        assert_eq!(
            generator(server.url("/down"), 5).explain(&context()).await,
            FALLBACK_EXPLANATION
        );
        assert_eq!(
            generator(server.url("/empty"), 5).explain(&context()).await,
            FALLBACK_EXPLANATION
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_falls_back() {
        let text = generator("http://127.0.0.1:9/api/generate".to_string(), 2)
            .explain(&context())
            .await;
        assert_eq!(text, FALLBACK_EXPLANATION);
    }

    #[tokio::test]
    async fn test_alert_explanation_marks_fallback() {
        let alert = FraudAlert::new(
            "tx_1".to_string(),
            0.93,
            0.5,
            Decision::Flag,
            crate::types::alert::RiskLevel::Critical,
            Default::default(),
        );
        let explanation = generator("http://127.0.0.1:9/api/generate".to_string(), 2)
            .explain_alert(&alert, &context())
            .await;
        assert_eq!(explanation.alert_id, alert.alert_id);
        assert!(!explanation.generated);
    }

    #[test]
    fn test_prompt_excludes_sensitive_fields() {
        let prompt = ExplanationGenerator::build_prompt(&context()).unwrap();
        assert!(prompt.contains("under 4 sentences"));
        assert!(prompt.contains("\"amount\": 5000.0"));
        assert!(!prompt.contains("198.51.100.23"));
        assert!(!prompt.contains("dev_0xfeed"));
    }
}
