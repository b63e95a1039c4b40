//! Test Transaction Producer
//!
//! Generates synthetic transactions and publishes them to NATS for pipeline
//! testing. Falls back to a dry run that logs samples when NATS is down.

use clap::Parser;
use fraud_anomaly_pipeline::config::LoggingConfig;
use fraud_anomaly_pipeline::logging;
use fraud_anomaly_pipeline::synthetic::TransactionGenerator;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "test_producer")]
#[command(about = "Publish synthetic transactions to the pipeline's NATS subject")]
struct Args {
    /// NATS server URL
    #[arg(long, default_value = "nats://localhost:4222")]
    nats_url: String,

    /// Subject to publish on
    #[arg(long, default_value = "transactions")]
    subject: String,

    /// Number of transactions to publish
    #[arg(short, long, default_value_t = 100)]
    count: u64,

    /// Share of suspicious transactions
    #[arg(long, default_value_t = 0.1)]
    fraud_rate: f64,

    /// Pause between messages in milliseconds
    #[arg(long, default_value_t = 100)]
    delay_ms: u64,

    /// Seed for a reproducible stream
    #[arg(long)]
    seed: Option<u64>,

    /// Print samples instead of publishing
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing(&LoggingConfig {
        level: "info".to_string(),
        format: "pretty".to_string(),
    });

    if !(0.0..=1.0).contains(&args.fraud_rate) {
        anyhow::bail!("--fraud-rate must be within [0, 1], got {}", args.fraud_rate);
    }

    info!(
        nats_url = %args.nats_url,
        subject = %args.subject,
        count = args.count,
        fraud_rate = args.fraud_rate,
        delay_ms = args.delay_ms,
        "Starting test transaction producer"
    );

    let mut generator = match args.seed {
        Some(seed) => TransactionGenerator::new(seed),
        None => TransactionGenerator::from_entropy(),
    };

    if args.dry_run {
        return run_dry_mode(&mut generator, &args).await;
    }

    let client = match async_nats::connect(&args.nats_url).await {
        Ok(client) => {
            info!("Connected to NATS");
            client
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS, running in dry-run mode");
            return run_dry_mode(&mut generator, &args).await;
        }
    };

    let mut legitimate_count = 0u64;
    let mut suspicious_count = 0u64;

    for i in 0..args.count {
        let labeled = generator.next_labeled(args.fraud_rate);
        if labeled.is_fraud {
            suspicious_count += 1;
        } else {
            legitimate_count += 1;
        }

        let payload = serde_json::to_vec(&labeled.record)?;
        client.publish(args.subject.clone(), payload.into()).await?;

        if (i + 1) % 10 == 0 {
            info!(
                published = i + 1,
                total = args.count,
                legitimate = legitimate_count,
                suspicious = suspicious_count,
                "Publishing"
            );
        }

        tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
    }
    client.flush().await?;

    info!(
        published = args.count,
        legitimate = legitimate_count,
        suspicious = suspicious_count,
        "Completed"
    );
    Ok(())
}

async fn run_dry_mode(generator: &mut TransactionGenerator, args: &Args) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    for i in 0..args.count {
        let labeled = generator.next_labeled(args.fraud_rate);

        if i == 0 || (i + 1) % 10 == 0 {
            let json = serde_json::to_string_pretty(&labeled.record)?;
            info!(suspicious = labeled.is_fraud, "Sample transaction {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
    }

    Ok(())
}
