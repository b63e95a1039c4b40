//! Synthetic account graph with an embedded fraud ring

use crate::error::{PipelineError, Result};
use crate::graph::builder::{AccountGraph, AccountProfile};
use rand::prelude::*;
use rand::seq::index;
use rand_distr::{Distribution, Normal, Poisson};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticGraphConfig {
    pub num_accounts: usize,
    pub fraud_ratio: f64,
    /// Random edges drawn per account
    pub interactions_per_account: usize,
    /// Probability that two fraudulent accounts are linked
    pub ring_edge_probability: f64,
    pub seed: u64,
}

impl Default for SyntheticGraphConfig {
    fn default() -> Self {
        Self {
            num_accounts: 1000,
            fraud_ratio: 0.05,
            interactions_per_account: 2,
            ring_edge_probability: 0.4,
            seed: 42,
        }
    }
}

struct ProfileSampler {
    amount_legit: Normal<f64>,
    amount_fraud: Normal<f64>,
    count_legit: Poisson<f64>,
    count_fraud: Poisson<f64>,
}

impl ProfileSampler {
    fn new() -> Result<Self> {
        let bad = |e: &dyn std::fmt::Display| PipelineError::InvalidParameter {
            name: "distribution".to_string(),
            value: String::new(),
            reason: e.to_string(),
        };
        Ok(Self {
            amount_legit: Normal::new(600.0, 80.0).map_err(|e| bad(&e))?,
            amount_fraud: Normal::new(1800.0, 300.0).map_err(|e| bad(&e))?,
            count_legit: Poisson::new(6.0).map_err(|e| bad(&e))?,
            count_fraud: Poisson::new(18.0).map_err(|e| bad(&e))?,
        })
    }

    /// Fraud and legitimate distributions overlap on the score summaries
    fn sample(&self, fraud: bool, rng: &mut impl Rng) -> AccountProfile {
        let (amount, count) = if fraud {
            (&self.amount_fraud, &self.count_fraud)
        } else {
            (&self.amount_legit, &self.count_legit)
        };
        let tx_count_24h = count.sample(rng);
        let (merchants, devices, scores) = if fraud {
            (6..12, 2..5, 0.20..0.40)
        } else {
            (2..6, 1..3, 0.05..0.15)
        };
        let ae_mean = rng.gen_range(scores.clone());
        let if_mean = rng.gen_range(scores);

        AccountProfile {
            avg_tx_amount: amount.sample(rng),
            tx_count_24h,
            tx_count_7d: tx_count_24h * rng.gen_range(4..7) as f64,
            unique_merchants: rng.gen_range(merchants) as f64,
            unique_devices: rng.gen_range(devices) as f64,
            ae_mean,
            ae_max: ae_mean * rng.gen_range(1.1..1.4),
            if_mean,
            if_max: if_mean * rng.gen_range(1.1..1.4),
        }
    }
}

/// Labelled account graph: random interactions plus a dense fraud ring
pub fn generate_synthetic_graph(config: &SyntheticGraphConfig) -> Result<AccountGraph> {
    let n = config.num_accounts;
    if n < 2 {
        return Err(PipelineError::InvalidParameter {
            name: "num_accounts".to_string(),
            value: n.to_string(),
            reason: "need at least two accounts".to_string(),
        });
    }
    if !(0.0..=1.0).contains(&config.fraud_ratio) || !(0.0..=1.0).contains(&config.ring_edge_probability) {
        return Err(PipelineError::InvalidParameter {
            name: "fraud_ratio / ring_edge_probability".to_string(),
            value: format!("{} / {}", config.fraud_ratio, config.ring_edge_probability),
            reason: "probabilities must be within [0, 1]".to_string(),
        });
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);
    let num_fraud = ((n as f64) * config.fraud_ratio) as usize;
    let fraud: HashSet<usize> = index::sample(&mut rng, n, num_fraud).into_iter().collect();

    let sampler = ProfileSampler::new()?;
    let labels: Vec<bool> = (0..n).map(|i| fraud.contains(&i)).collect();
    let profiles: Vec<AccountProfile> = labels.iter().map(|&f| sampler.sample(f, &mut rng)).collect();

    let mut edges = Vec::with_capacity(n * config.interactions_per_account);
    for _ in 0..n * config.interactions_per_account {
        let pair = index::sample(&mut rng, n, 2);
        edges.push((pair.index(0), pair.index(1)));
    }

    let mut ring: Vec<usize> = fraud.into_iter().collect();
    ring.sort_unstable();
    for (k, &a) in ring.iter().enumerate() {
        for &b in &ring[k + 1..] {
            if rng.gen_bool(config.ring_edge_probability) {
                edges.push((a, b));
            }
        }
    }

    AccountGraph::from_profiles(&profiles, &edges, Some(labels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_graph_shape() {
        let graph = generate_synthetic_graph(&SyntheticGraphConfig::default()).unwrap();
        assert_eq!(graph.n_nodes(), 1000);
        let labels = graph.labels().unwrap();
        assert_eq!(labels.iter().filter(|&&l| l).count(), 50);
        // 2000 random edges, minus rare duplicates, plus ~490 ring edges
        assert!(graph.n_edges() > 2200 && graph.n_edges() < 2800, "{}", graph.n_edges());
    }

    #[test]
    fn test_ring_is_dense() {
        let graph = generate_synthetic_graph(&SyntheticGraphConfig::default()).unwrap();
        let labels = graph.labels().unwrap();
        let mean_fraud_links = (0..graph.n_nodes())
            .filter(|&i| labels[i])
            .map(|i| graph.neighbors(i).iter().filter(|&&j| labels[j]).count())
            .sum::<usize>() as f64
            / 50.0;
        assert!(mean_fraud_links > 15.0, "{}", mean_fraud_links);
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let config = SyntheticGraphConfig {
            num_accounts: 100,
            ..Default::default()
        };
        assert_eq!(
            generate_synthetic_graph(&config).unwrap(),
            generate_synthetic_graph(&config).unwrap()
        );
    }

    #[test]
    fn test_fraud_profiles_are_heavier() {
        let graph = generate_synthetic_graph(&SyntheticGraphConfig::default()).unwrap();
        let labels = graph.labels().unwrap();
        let x = graph.features();
        let mean_amount = |fraud: bool| {
            let rows: Vec<f64> = (0..graph.n_nodes()).filter(|&i| labels[i] == fraud).map(|i| x[[i, 0]]).collect();
            rows.iter().sum::<f64>() / rows.len() as f64
        };
        assert!(mean_amount(true) > 2.0 * mean_amount(false));
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let config = SyntheticGraphConfig {
            fraud_ratio: 1.5,
            ..Default::default()
        };
        assert!(generate_synthetic_graph(&config).is_err());
        let config = SyntheticGraphConfig {
            num_accounts: 1,
            ..Default::default()
        };
        assert!(generate_synthetic_graph(&config).is_err());
    }
}
