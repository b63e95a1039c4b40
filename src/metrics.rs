//! In-process statistics for the scoring service.

use crate::types::alert::RiskLevel;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::info;

const LATENCY_WINDOW: usize = 10_000;
const SCORE_BUCKETS: usize = 10;

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Transactions scored successfully
    pub transactions_processed: AtomicU64,
    /// Transactions whose decision was flag
    pub transactions_flagged: AtomicU64,
    /// Messages dropped as malformed or unscorable
    pub transactions_rejected: AtomicU64,
    pub alerts_published: AtomicU64,
    pub explanations_published: AtomicU64,
    /// Explanations that fell back to the fixed text
    pub explanation_fallbacks: AtomicU64,
    pub explanation_publish_failures: AtomicU64,
    alerts_by_level: RwLock<HashMap<RiskLevel, u64>>,
    /// Scoring latencies in microseconds, most recent window only
    processing_times: RwLock<Vec<u64>>,
    /// Ensemble score histogram; the last bucket absorbs scores >= 0.9
    score_buckets: RwLock<[u64; SCORE_BUCKETS]>,
    /// |ae - if| per scored transaction
    model_disagreements: RwLock<Vec<f64>>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            transactions_processed: AtomicU64::new(0),
            transactions_flagged: AtomicU64::new(0),
            transactions_rejected: AtomicU64::new(0),
            alerts_published: AtomicU64::new(0),
            explanations_published: AtomicU64::new(0),
            explanation_fallbacks: AtomicU64::new(0),
            explanation_publish_failures: AtomicU64::new(0),
            alerts_by_level: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; SCORE_BUCKETS]),
            model_disagreements: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a scored transaction
    pub fn record_transaction(
        &self,
        processing_time: Duration,
        ensemble_score: f64,
        ae_score: f64,
        if_score: f64,
        flagged: bool,
    ) {
        self.transactions_processed.fetch_add(1, Ordering::Relaxed);
        if flagged {
            self.transactions_flagged.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut times = write(&self.processing_times);
            times.push(processing_time.as_micros() as u64);
            if times.len() > LATENCY_WINDOW {
                times.drain(0..LATENCY_WINDOW / 2);
            }
        }

        write(&self.score_buckets)[score_bucket(ensemble_score)] += 1;

        let mut disagreements = write(&self.model_disagreements);
        disagreements.push((ae_score - if_score).abs());
        if disagreements.len() > LATENCY_WINDOW {
            disagreements.drain(0..LATENCY_WINDOW / 2);
        }
    }

    pub fn record_rejected(&self) {
        self.transactions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self, risk_level: RiskLevel) {
        self.alerts_published.fetch_add(1, Ordering::Relaxed);
        *write(&self.alerts_by_level).entry(risk_level).or_insert(0) += 1;
    }

    /// Count an explanation once its publish attempt has finished.
    ///
    /// Only published explanations count towards the published and fallback totals.
    pub fn record_explanation(&self, generated: bool, published: bool) {
        if !published {
            self.explanation_publish_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.explanations_published.fetch_add(1, Ordering::Relaxed);
        if !generated {
            self.explanation_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_processing_stats(&self) -> ProcessingStats {
        let mut sorted = read(&self.processing_times).clone();
        if sorted.is_empty() {
            return ProcessingStats::default();
        }
        sorted.sort_unstable();

        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];
        ProcessingStats {
            count: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: at(0.50),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Mean absolute gap between the two normalized model scores
    pub fn get_avg_disagreement(&self) -> f64 {
        let values = read(&self.model_disagreements);
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    /// Transactions per second since startup
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transactions_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; SCORE_BUCKETS] {
        *read(&self.score_buckets)
    }

    pub fn get_alerts_by_level(&self) -> HashMap<RiskLevel, u64> {
        read(&self.alerts_by_level).clone()
    }

    /// Log a summary of everything recorded so far
    pub fn print_summary(&self) {
        let processed = self.transactions_processed.load(Ordering::Relaxed);
        let flagged = self.transactions_flagged.load(Ordering::Relaxed);
        let flag_rate = if processed > 0 {
            flagged as f64 / processed as f64 * 100.0
        } else {
            0.0
        };
        let latency = self.get_processing_stats();

        info!(
            processed,
            flagged,
            rejected = self.transactions_rejected.load(Ordering::Relaxed),
            alerts = self.alerts_published.load(Ordering::Relaxed),
            explanations = self.explanations_published.load(Ordering::Relaxed),
            explanation_fallbacks = self.explanation_fallbacks.load(Ordering::Relaxed),
            explanation_publish_failures = self.explanation_publish_failures.load(Ordering::Relaxed),
            flag_rate_pct = format!("{:.2}", flag_rate),
            throughput = format!("{:.1} tx/s", self.get_throughput()),
            mean_us = latency.mean_us,
            p50_us = latency.p50_us,
            p95_us = latency.p95_us,
            p99_us = latency.p99_us,
            max_us = latency.max_us,
            model_disagreement = format!("{:.3}", self.get_avg_disagreement()),
            "Pipeline metrics"
        );

        let by_level = self.get_alerts_by_level();
        if !by_level.is_empty() {
            let level = |l: RiskLevel| by_level.get(&l).copied().unwrap_or(0);
            info!(
                low = level(RiskLevel::Low),
                medium = level(RiskLevel::Medium),
                high = level(RiskLevel::High),
                critical = level(RiskLevel::Critical),
                "Alerts by risk level"
            );
        }

        let distribution = self
            .get_score_distribution()
            .iter()
            .enumerate()
            .map(|(i, count)| format!("{:.1}:{}", i as f64 / SCORE_BUCKETS as f64, count))
            .collect::<Vec<_>>()
            .join(" ");
        info!(distribution = %distribution, "Ensemble score distribution");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Periodically logs the metrics summary
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Run forever; spawn this on its own task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

fn score_bucket(score: f64) -> usize {
    if score.is_nan() || score <= 0.0 {
        return 0;
    }
    ((score * SCORE_BUCKETS as f64) as usize).min(SCORE_BUCKETS - 1)
}

// A poisoned lock only means another task panicked mid-update; the
// counters are still usable.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
