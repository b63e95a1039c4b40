//! Account interaction graph
//!
//! Nodes are accounts carrying nine behavioural features; edges are
//! undirected, deduplicated and never self loops. Message passing uses
//! the mean over each node's neighbours.

use crate::error::{PipelineError, Result};
use crate::types::transaction::TransactionRecord;
use chrono::Duration;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

pub const NODE_FEATURE_COUNT: usize = 9;

pub const NODE_FEATURE_NAMES: [&str; NODE_FEATURE_COUNT] = [
    "avg_tx_amount",
    "tx_count_24h",
    "tx_count_7d",
    "unique_merchants",
    "unique_devices",
    "ae_mean",
    "ae_max",
    "if_mean",
    "if_max",
];

/// Behavioural summary of one account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub avg_tx_amount: f64,
    pub tx_count_24h: f64,
    pub tx_count_7d: f64,
    pub unique_merchants: f64,
    pub unique_devices: f64,
    pub ae_mean: f64,
    pub ae_max: f64,
    pub if_mean: f64,
    pub if_max: f64,
}

impl AccountProfile {
    pub fn to_features(&self) -> [f64; NODE_FEATURE_COUNT] {
        [
            self.avg_tx_amount,
            self.tx_count_24h,
            self.tx_count_7d,
            self.unique_merchants,
            self.unique_devices,
            self.ae_mean,
            self.ae_max,
            self.if_mean,
            self.if_max,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountGraph {
    features: Array2<f64>,
    neighbors: Vec<Vec<usize>>,
    labels: Option<Vec<bool>>,
}

impl AccountGraph {
    /// Build from a node feature matrix and an edge list.
    ///
    /// Edges are symmetrised; duplicates and self loops are dropped.
    pub fn new(
        features: Array2<f64>,
        edges: &[(usize, usize)],
        labels: Option<Vec<bool>>,
    ) -> Result<Self> {
        let n = features.nrows();
        if let Some(labels) = &labels {
            if labels.len() != n {
                return Err(PipelineError::shape(
                    format!("{} labels", n),
                    format!("{} labels", labels.len()),
                ));
            }
        }

        let mut adjacency: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for &(a, b) in edges {
            if a >= n || b >= n {
                return Err(PipelineError::InvalidParameter {
                    name: "edge".to_string(),
                    value: format!("({}, {})", a, b),
                    reason: format!("graph has {} nodes", n),
                });
            }
            if a != b {
                adjacency[a].insert(b);
                adjacency[b].insert(a);
            }
        }

        Ok(Self {
            features,
            neighbors: adjacency.into_iter().map(|s| s.into_iter().collect()).collect(),
            labels,
        })
    }

    pub fn from_profiles(
        profiles: &[AccountProfile],
        edges: &[(usize, usize)],
        labels: Option<Vec<bool>>,
    ) -> Result<Self> {
        let flat: Vec<f64> = profiles.iter().flat_map(|p| p.to_features()).collect();
        let features = Array2::from_shape_vec((profiles.len(), NODE_FEATURE_COUNT), flat)
            .map_err(|e| PipelineError::shape(NODE_FEATURE_COUNT, e))?;
        Self::new(features, edges, labels)
    }

    pub fn n_nodes(&self) -> usize {
        self.features.nrows()
    }

    /// Number of undirected edges
    pub fn n_edges(&self) -> usize {
        self.neighbors.iter().map(Vec::len).sum::<usize>() / 2
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn neighbors(&self, node: usize) -> &[usize] {
        &self.neighbors[node]
    }

    pub fn labels(&self) -> Option<&[bool]> {
        self.labels.as_deref()
    }

    /// Row i is the mean of `h` over i's neighbours; isolated nodes get zeros
    pub fn neighbor_mean(&self, h: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros(h.raw_dim());
        for (i, neighbors) in self.neighbors.iter().enumerate() {
            if neighbors.is_empty() {
                continue;
            }
            let mut row = out.row_mut(i);
            for &j in neighbors {
                row += &h.row(j);
            }
            row /= neighbors.len() as f64;
        }
        out
    }

    /// Transpose of [`neighbor_mean`](Self::neighbor_mean), used to route gradients back
    pub fn neighbor_mean_transpose(&self, g: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros(g.raw_dim());
        for (i, neighbors) in self.neighbors.iter().enumerate() {
            if neighbors.is_empty() {
                continue;
            }
            let share = &g.row(i) / neighbors.len() as f64;
            for &j in neighbors {
                let mut row = out.row_mut(j);
                row += &share;
            }
        }
        out
    }
}

/// Column z-scoring with sample standard deviation: (x - mean) / (std + 1e-6)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStandardizer {
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl NodeStandardizer {
    const EPSILON: f64 = 1e-6;

    pub fn fit(x: &Array2<f64>) -> Result<Self> {
        if x.nrows() < 2 {
            return Err(PipelineError::TrainingError(
                "node standardisation needs at least two nodes".to_string(),
            ));
        }
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::TrainingError("empty node features".to_string()))?;
        let std = x.std_axis(Axis(0), 1.0);
        Ok(Self { mean, std })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features() {
            return Err(PipelineError::shape(self.n_features(), x.ncols()));
        }
        Ok((x - &self.mean) / &(&self.std + Self::EPSILON))
    }
}

#[derive(Debug, Default)]
struct AccountActivity {
    events: Vec<(chrono::NaiveDateTime, f64)>,
    merchants: BTreeSet<String>,
    devices: BTreeSet<String>,
    ae_scores: Vec<f64>,
    if_scores: Vec<f64>,
    fraud: Option<bool>,
}

/// Aggregates scored transactions into an [`AccountGraph`].
///
/// Accounts that used the same device are linked. Transactions without an
/// account id are skipped.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    accounts: BTreeMap<String, AccountActivity>,
    labelled: bool,
    unlabelled: bool,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one transaction with its component scores and optional label
    pub fn add(&mut self, tx: &TransactionRecord, ae_score: f64, if_score: f64, is_fraud: Option<bool>) {
        let Some(account_id) = tx.account_id.as_ref() else {
            debug!(transaction_id = %tx.transaction_id, "Skipping transaction without account");
            return;
        };

        let activity = self.accounts.entry(account_id.clone()).or_default();
        activity.events.push((tx.timestamp, tx.amount));
        if let Some(merchant) = &tx.merchant {
            activity.merchants.insert(merchant.clone());
        }
        if let Some(device) = &tx.device_id {
            activity.devices.insert(device.clone());
        }
        activity.ae_scores.push(ae_score);
        activity.if_scores.push(if_score);

        match is_fraud {
            Some(fraud) => {
                self.labelled = true;
                activity.fraud = Some(activity.fraud.unwrap_or(false) || fraud);
            }
            None => self.unlabelled = true,
        }
    }

    /// Account ids in node order
    pub fn account_ids(&self) -> Vec<String> {
        self.accounts.keys().cloned().collect()
    }

    pub fn build(&self) -> Result<AccountGraph> {
        let mut profiles = Vec::with_capacity(self.accounts.len());
        let mut device_owners: HashMap<&str, Vec<usize>> = HashMap::new();

        for (node, activity) in self.accounts.values().enumerate() {
            profiles.push(profile(activity));
            for device in &activity.devices {
                device_owners.entry(device.as_str()).or_default().push(node);
            }
        }

        let mut edges = Vec::new();
        for owners in device_owners.values() {
            for (k, &a) in owners.iter().enumerate() {
                for &b in &owners[k + 1..] {
                    edges.push((a, b));
                }
            }
        }

        let labels = if self.labelled && !self.unlabelled {
            Some(
                self.accounts
                    .values()
                    .map(|a| a.fraud.unwrap_or(false))
                    .collect(),
            )
        } else {
            None
        };

        AccountGraph::from_profiles(&profiles, &edges, labels)
    }
}

fn profile(activity: &AccountActivity) -> AccountProfile {
    let n = activity.events.len().max(1) as f64;
    let latest = activity.events.iter().map(|(ts, _)| *ts).max();
    let within = |window: Duration| -> f64 {
        latest
            .map(|latest| {
                activity
                    .events
                    .iter()
                    .filter(|(ts, _)| latest - *ts <= window)
                    .count() as f64
            })
            .unwrap_or(0.0)
    };
    let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len().max(1) as f64;
    let max = |v: &[f64]| v.iter().copied().fold(0.0, f64::max);

    AccountProfile {
        avg_tx_amount: activity.events.iter().map(|(_, a)| a).sum::<f64>() / n,
        tx_count_24h: within(Duration::hours(24)),
        tx_count_7d: within(Duration::days(7)),
        unique_merchants: activity.merchants.len() as f64,
        unique_devices: activity.devices.len() as f64,
        ae_mean: mean(&activity.ae_scores),
        ae_max: max(&activity.ae_scores),
        if_mean: mean(&activity.if_scores),
        if_max: max(&activity.if_scores),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::transaction::parse_timestamp;
    use ndarray::array;

    fn path_graph() -> AccountGraph {
        let x = array![[1.0, 0.0], [2.0, 1.0], [3.0, 4.0], [9.0, 9.0]];
        // 3 is isolated; duplicate and self loop are dropped
        AccountGraph::new(x, &[(0, 1), (1, 2), (1, 0), (2, 2)], None).unwrap()
    }

    #[test]
    fn test_edges_symmetric_and_deduplicated() {
        let g = path_graph();
        assert_eq!(g.n_nodes(), 4);
        assert_eq!(g.n_edges(), 2);
        assert_eq!(g.neighbors(1), &[0, 2]);
        assert_eq!(g.neighbors(0), &[1]);
        assert!(g.neighbors(3).is_empty());
    }

    #[test]
    fn test_invalid_edges_and_labels() {
        let x = Array2::zeros((2, 2));
        assert!(AccountGraph::new(x.clone(), &[(0, 5)], None).is_err());
        assert!(AccountGraph::new(x, &[], Some(vec![true])).is_err());
    }

    #[test]
    fn test_neighbor_mean() {
        let g = path_graph();
        let agg = g.neighbor_mean(g.features());
        assert_eq!(agg.row(0), array![2.0, 1.0]);
        assert_eq!(agg.row(1), array![2.0, 2.0]);
        assert_eq!(agg.row(3), array![0.0, 0.0]);
    }

    #[test]
    fn test_transpose_is_adjoint() {
        // <A h, g> == <h, A^T g>
        let g = path_graph();
        let h = array![[0.5, -1.0], [2.0, 0.3], [1.5, 1.0], [4.0, -2.0]];
        let u = array![[1.0, 2.0], [-0.5, 0.7], [0.2, 0.1], [3.0, 3.0]];
        let lhs = (&g.neighbor_mean(&h) * &u).sum();
        let rhs = (&h * &g.neighbor_mean_transpose(&u)).sum();
        assert!((lhs - rhs).abs() < 1e-12);
    }

    #[test]
    fn test_standardizer_uses_sample_std() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let s = NodeStandardizer::fit(&x).unwrap();
        let z = s.transform(&x).unwrap();
        // sample std of [1, 3] is sqrt(2)
        assert!((z[[1, 0]] - 1.0 / (2f64.sqrt() + 1e-6)).abs() < 1e-9);
        assert_eq!(z[[0, 1]], 0.0);
        assert!(NodeStandardizer::fit(&array![[1.0, 2.0]]).is_err());
    }

    #[test]
    fn test_builder_links_shared_devices() {
        let ts = parse_timestamp("2024-03-01T12:00:00").unwrap();
        let tx = |id: &str, account: &str, device: &str, hours_ago: i64, amount: f64| {
            let mut t = TransactionRecord::new(id.to_string(), amount, ts - Duration::hours(hours_ago));
            t.account_id = Some(account.to_string());
            t.device_id = Some(device.to_string());
            t.merchant = Some(format!("m_{}", id));
            t
        };

        let mut builder = GraphBuilder::new();
        builder.add(&tx("1", "a", "dev_shared", 0, 100.0), 0.2, 0.4, Some(false));
        builder.add(&tx("2", "a", "dev_a", 48, 300.0), 0.6, 0.2, Some(false));
        builder.add(&tx("3", "b", "dev_shared", 1, 50.0), 0.1, 0.1, Some(true));
        builder.add(&tx("4", "c", "dev_c", 2, 70.0), 0.1, 0.1, Some(false));

        let graph = builder.build().unwrap();
        assert_eq!(builder.account_ids(), vec!["a", "b", "c"]);
        assert_eq!(graph.n_edges(), 1);
        assert_eq!(graph.neighbors(0), &[1]);
        assert_eq!(graph.labels(), Some(&[false, true, false][..]));

        let a = graph.features().row(0);
        assert_eq!(a[0], 200.0);
        assert_eq!(a[1], 1.0);
        assert_eq!(a[2], 2.0);
        assert_eq!(a[3], 2.0);
        assert_eq!(a[4], 2.0);
        assert!((a[5] - 0.4).abs() < 1e-12);
        assert_eq!(a[6], 0.6);
    }
}
