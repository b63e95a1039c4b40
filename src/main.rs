//! Fraud Anomaly Pipeline - Main Entry Point
//!
//! Consumes transactions from NATS, scores them with the trained ensemble,
//! publishes fraud alerts and, when enabled, a follow-up explanation.

use anyhow::{Context, Result};
use fraud_anomaly_pipeline::{
    config::AppConfig,
    consumer::{decode, TransactionConsumer},
    explain::{ExplanationContext, ExplanationGenerator},
    logging,
    metrics::{MetricsReporter, PipelineMetrics},
    models::inference::ScoringService,
    producer::AlertProducer,
};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/config.toml"));
    let config = AppConfig::load_from_path(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    logging::init_tracing(&config.logging);
    info!(config = %config_path.display(), "Starting Fraud Anomaly Pipeline");
    info!(
        medium = config.detection.risk_levels.medium,
        high = config.detection.risk_levels.high,
        critical = config.detection.risk_levels.critical,
        "Risk level thresholds"
    );

    // Every artifact must load before the first message is consumed
    let scoring = Arc::new(
        ScoringService::from_config(&config).context("failed to load model artifacts")?,
    );

    let explainer = if config.explanation.enabled {
        let generator = ExplanationGenerator::new(&config.explanation)?;
        info!(
            endpoint = %config.explanation.endpoint,
            model = %config.explanation.model,
            "Alert explanations enabled"
        );
        Some(Arc::new(generator))
    } else {
        info!("Alert explanations disabled");
        None
    };

    let metrics = Arc::new(PipelineMetrics::new());

    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("connecting to NATS at {}", config.nats.url))?;
    info!(url = %config.nats.url, "Connected to NATS");

    let consumer = TransactionConsumer::new(client.clone(), &config.nats.transaction_subject);
    let producer = Arc::new(AlertProducer::new(
        client.clone(),
        &config.nats.alert_subject,
        &config.nats.explanation_subject,
    ));

    let max_concurrent = config.pipeline.max_concurrent.max(1);
    info!(
        max_concurrent,
        transactions = %config.nats.transaction_subject,
        alerts = %config.nats.alert_subject,
        explanations = %config.nats.explanation_subject,
        "Starting transaction processing loop"
    );

    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let processed_count = Arc::new(AtomicU64::new(0));
    let config = Arc::new(config);

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
    tokio::spawn(reporter.start());

    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("worker semaphore closed")?;

        let scoring = scoring.clone();
        let explainer = explainer.clone();
        let producer = producer.clone();
        let metrics = metrics.clone();
        let config = config.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            let start_time = Instant::now();

            let transaction = match decode(&message.payload) {
                Ok(tx) => tx,
                Err(e) => {
                    metrics.record_rejected();
                    warn!(error = %e, "Rejected transaction message");
                    return;
                }
            };

            let prediction = match scoring.score(&transaction) {
                Ok(prediction) => prediction,
                Err(e) => {
                    metrics.record_rejected();
                    error!(
                        transaction_id = %transaction.transaction_id,
                        error = %e,
                        "Scoring failed"
                    );
                    return;
                }
            };

            let processing_time = start_time.elapsed();
            let flagged = prediction.decision.is_flagged();
            metrics.record_transaction(
                processing_time,
                prediction.ensemble_score,
                prediction.ae_score,
                prediction.if_score,
                flagged,
            );
            if flagged || config.detection.publish_passes {
                let alert = prediction.to_alert(&transaction, scoring.risk_thresholds());

                match producer.publish(&alert).await {
                    Ok(()) => {
                        metrics.record_alert(alert.risk_level);
                        info!(
                            transaction_id = %alert.transaction_id,
                            alert_id = %alert.alert_id,
                            ensemble_score = alert.ensemble_score,
                            decision = alert.decision.as_str(),
                            risk_level = alert.risk_level.as_str(),
                            processing_time_us = processing_time.as_micros() as u64,
                            "Fraud alert published"
                        );

                        // Explanations must not hold a worker slot
                        drop(permit);
                        if let (true, Some(explainer)) = (flagged, explainer) {
                            let context = ExplanationContext::from_prediction(&transaction, &prediction);
                            let explanation = explainer.explain_alert(&alert, &context).await;
                            let published = producer.publish_explanation(&explanation).await;
                            if let Err(e) = &published {
                                error!(
                                    alert_id = %alert.alert_id,
                                    error = %e,
                                    "Failed to publish explanation"
                                );
                            }
                            metrics.record_explanation(explanation.generated, published.is_ok());
                        }
                    }
                    Err(e) => {
                        error!(
                            transaction_id = %alert.transaction_id,
                            error = %e,
                            "Failed to publish fraud alert"
                        );
                    }
                }
            } else {
                debug!(
                    transaction_id = %prediction.transaction_id,
                    ensemble_score = prediction.ensemble_score,
                    processing_time_us = processing_time.as_micros() as u64,
                    "Transaction passed"
                );
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 0 {
                let stats = metrics.get_processing_stats();
                info!(
                    processed = count,
                    throughput = format!("{:.1} tx/s", metrics.get_throughput()),
                    mean_latency_us = stats.mean_us,
                    "Processing milestone"
                );
            }
        });
    }

    info!("Subscription closed, shutting down");
    metrics.print_summary();

    Ok(())
}
