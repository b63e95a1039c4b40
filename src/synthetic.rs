//! Synthetic transaction generator for training data and load testing

use crate::types::transaction::{LabeledTransaction, TransactionRecord};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::prelude::*;
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;

const LOCATIONS: [&str; 6] = ["New York", "London", "Toronto", "Berlin", "Paris", "Austin"];
const RISKY_LOCATIONS: [&str; 3] = ["Unknown", "Lagos", "Bucharest"];

/// Seeded generator of legitimate and suspicious transactions
pub struct TransactionGenerator {
    rng: Xoshiro256PlusPlus,
    transaction_counter: u64,
    epoch: NaiveDateTime,
}

impl TransactionGenerator {
    pub fn new(seed: u64) -> Self {
        Self::with_rng(Xoshiro256PlusPlus::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::with_rng(Xoshiro256PlusPlus::from_entropy())
    }

    fn with_rng(rng: Xoshiro256PlusPlus) -> Self {
        Self {
            rng,
            transaction_counter: 0,
            epoch: NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
        }
    }

    /// Everyday spend: daytime, low velocity, amounts around 50
    pub fn legitimate(&mut self) -> TransactionRecord {
        let z: f64 = self.rng.sample(StandardNormal);
        let amount = round_cents((45f64.ln() + 0.4 * z).exp().max(1.0));
        let hour = self.rng.gen_range(8..22);
        let avg_amount_7d = round_cents(self.rng.gen_range(35.0..65.0));

        let mut tx = self.record(amount, hour);
        tx.tx_count_1h = self.rng.gen_range(0..3);
        tx.tx_count_24h = tx.tx_count_1h + self.rng.gen_range(0..8);
        tx.avg_amount_7d = avg_amount_7d;
        tx.merchant_risk_score = self.rng.gen_range(0.0..0.3);
        tx.device_changed = self.rng.gen_bool(0.05);
        tx.location = Some(self.choose(&LOCATIONS).to_string());
        tx
    }

    /// High amount at night, bursty, risky merchant, new device
    pub fn suspicious(&mut self) -> TransactionRecord {
        let amount = round_cents(self.rng.gen_range(1000.0..10000.0));
        let hour = self.rng.gen_range(0..6);
        let avg_amount_7d = round_cents(self.rng.gen_range(30.0..80.0));

        let mut tx = self.record(amount, hour);
        tx.tx_count_1h = self.rng.gen_range(5..15);
        tx.tx_count_24h = tx.tx_count_1h + self.rng.gen_range(10..40);
        tx.avg_amount_7d = avg_amount_7d;
        tx.merchant_risk_score = self.rng.gen_range(0.6..1.0);
        tx.device_changed = true;
        tx.location = Some(self.choose(&RISKY_LOCATIONS).to_string());
        tx
    }

    /// One labeled transaction, fraudulent with probability `fraud_rate`
    pub fn next_labeled(&mut self, fraud_rate: f64) -> LabeledTransaction {
        let is_fraud = self.rng.gen_bool(fraud_rate.clamp(0.0, 1.0));
        let record = if is_fraud {
            self.suspicious()
        } else {
            self.legitimate()
        };
        LabeledTransaction { record, is_fraud }
    }

    /// `n` shuffled transactions containing exactly `round(n * fraud_rate)` frauds
    pub fn labeled_dataset(&mut self, n: usize, fraud_rate: f64) -> Vec<LabeledTransaction> {
        let n_fraud = ((n as f64) * fraud_rate.clamp(0.0, 1.0)).round() as usize;
        let mut data: Vec<LabeledTransaction> = (0..n)
            .map(|i| {
                let is_fraud = i < n_fraud;
                let record = if is_fraud {
                    self.suspicious()
                } else {
                    self.legitimate()
                };
                LabeledTransaction { record, is_fraud }
            })
            .collect();
        data.shuffle(&mut self.rng);
        data
    }

    fn record(&mut self, amount: f64, hour: i64) -> TransactionRecord {
        self.transaction_counter += 1;
        let timestamp = self.epoch
            + Duration::days(self.rng.gen_range(0..28))
            + Duration::hours(hour)
            + Duration::minutes(self.rng.gen_range(0..60))
            + Duration::seconds(self.rng.gen_range(0..60));

        let mut tx = TransactionRecord::new(
            format!("tx_{:012}", self.transaction_counter),
            amount,
            timestamp,
        );
        tx.account_id = Some(format!("acct_{:05}", self.rng.gen_range(0..5000)));
        tx.merchant = Some(format!("merchant_{}", self.rng.gen_range(1..1000)));
        tx.device_id = Some(format!("dev_{:016x}", self.rng.gen::<u64>()));
        tx.ip_address = Some(format!(
            "{}.{}.{}.{}",
            self.rng.gen_range(1..255),
            self.rng.gen_range(0..255),
            self.rng.gen_range(0..255),
            self.rng.gen_range(1..255)
        ));
        tx
    }

    fn choose<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
