//! Two-layer mean-aggregation message passing network for node fraud scores
//!
//! Each layer computes `mean_{j in N(i)} h_j * W_neigh + h_i * W_self + b`.
//! Layer one maps the nine node features to 64 hidden units with ReLU;
//! layer two maps to a single logit. Probabilities are the sigmoid of the
//! logit and the loss is class-weighted BCE on the logit.

use crate::error::{PipelineError, Result};
use crate::graph::builder::{AccountGraph, NodeStandardizer, NODE_FEATURE_COUNT};
use crate::models::artifacts::{read_json, write_json_atomic, TrainingLock, GNN_FILE};
use crate::models::evaluation::roc_auc;
use crate::models::optim::Adam;
use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GnnConfig {
    pub hidden_dim: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    /// Log loss and ROC-AUC every this many epochs
    pub log_every: usize,
    pub seed: Option<u64>,
}

impl Default for GnnConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 64,
            learning_rate: 1e-3,
            epochs: 100,
            log_every: 10,
            seed: Some(42),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SageLayer {
    w_neigh: Array2<f64>,
    w_self: Array2<f64>,
    bias: Array1<f64>,
}

impl SageLayer {
    fn init(n_in: usize, n_out: usize, rng: &mut impl Rng) -> Self {
        let bound = 1.0 / (n_in as f64).sqrt();
        Self {
            w_neigh: Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-bound..bound)),
            w_self: Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-bound..bound)),
            bias: Array1::from_shape_fn(n_out, |_| rng.gen_range(-bound..bound)),
        }
    }

    /// Returns (neighbour mean of the input, layer output)
    fn forward(&self, graph: &AccountGraph, h: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let agg = graph.neighbor_mean(h);
        let out = agg.dot(&self.w_neigh) + h.dot(&self.w_self) + &self.bias;
        (agg, out)
    }
}

struct ForwardCache {
    x: Array2<f64>,
    agg1: Array2<f64>,
    z1: Array2<f64>,
    h1: Array2<f64>,
    agg2: Array2<f64>,
    logits: Array1<f64>,
}

#[derive(Debug, Clone)]
struct LayerGradients {
    w_neigh: Array2<f64>,
    w_self: Array2<f64>,
    bias: Array1<f64>,
}

/// Per-epoch progress from [`FraudGnn::fit`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GnnTrainingHistory {
    pub losses: Vec<f64>,
    /// (epoch, ROC-AUC) at each logging epoch
    pub roc_auc: Vec<(usize, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudGnn {
    standardizer: Option<NodeStandardizer>,
    layer1: SageLayer,
    layer2: SageLayer,
}

impl FraudGnn {
    pub fn new(config: &GnnConfig) -> Result<Self> {
        if config.hidden_dim == 0 {
            return Err(PipelineError::InvalidParameter {
                name: "hidden_dim".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        let mut rng = match config.seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        Ok(Self {
            standardizer: None,
            layer1: SageLayer::init(NODE_FEATURE_COUNT, config.hidden_dim, &mut rng),
            layer2: SageLayer::init(config.hidden_dim, 1, &mut rng),
        })
    }

    /// Standardise node features, then train on the graph's labels for
    /// `config.epochs` full-graph steps.
    pub fn fit(&mut self, graph: &AccountGraph, config: &GnnConfig) -> Result<GnnTrainingHistory> {
        let labels = graph.labels().ok_or_else(|| {
            PipelineError::TrainingError("graph has no node labels".to_string())
        })?;
        let positives = labels.iter().filter(|&&l| l).count();
        if positives == 0 || positives == labels.len() {
            return Err(PipelineError::TrainingError(format!(
                "graph labels need both classes ({} nodes, {} fraudulent)",
                labels.len(),
                positives
            )));
        }
        self.check_width(graph.features().ncols())?;

        let standardizer = NodeStandardizer::fit(graph.features())?;
        let x = standardizer.transform(graph.features())?;
        self.standardizer = Some(standardizer);

        let targets: Array1<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();
        let pos_weight = labels.len() as f64 / positives as f64;
        let mut optimizer = Adam::new(config.learning_rate);
        let mut history = GnnTrainingHistory::default();
        let log_every = config.log_every.max(1);

        for epoch in 0..config.epochs {
            let cache = self.forward(graph, &x);
            let loss = weighted_bce_with_logits(&cache.logits, &targets, pos_weight);
            if !loss.is_finite() {
                return Err(PipelineError::TrainingError(format!(
                    "graph loss diverged at epoch {}",
                    epoch
                )));
            }
            let (g1, g2) = self.gradients(graph, &cache, &targets, pos_weight);

            optimizer.begin_step();
            for (slot, (layer, grads)) in [(&mut self.layer1, g1), (&mut self.layer2, g2)]
                .into_iter()
                .enumerate()
            {
                optimizer.update(3 * slot, &mut layer.w_neigh, &grads.w_neigh);
                optimizer.update(3 * slot + 1, &mut layer.w_self, &grads.w_self);
                optimizer.update(3 * slot + 2, &mut layer.bias, &grads.bias);
            }

            history.losses.push(loss);
            if epoch % log_every == 0 {
                let probabilities = cache.logits.mapv(sigmoid);
                let auc = roc_auc(labels, &probabilities.to_vec())?;
                history.roc_auc.push((epoch, auc));
                info!(epoch, loss, roc_auc = auc, "Graph training progress");
            }
        }

        Ok(history)
    }

    /// Fraud probability per node
    pub fn predict(&self, graph: &AccountGraph) -> Result<Array1<f64>> {
        let standardizer = self.standardizer.as_ref().ok_or(PipelineError::ModelNotFitted)?;
        self.check_width(graph.features().ncols())?;
        let x = standardizer.transform(graph.features())?;
        Ok(self.forward(graph, &x).logits.mapv(sigmoid))
    }

    /// Write `gnn.json` under an already held training lock
    pub fn save(&self, lock: &TrainingLock) -> Result<()> {
        write_json_atomic(lock.dir(), GNN_FILE, self)
    }

    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let gnn: Self = read_json(dir.as_ref(), GNN_FILE)?;
        if gnn.standardizer.is_none() {
            return Err(PipelineError::Artifact {
                name: GNN_FILE.to_string(),
                reason: "model was saved before training".to_string(),
            });
        }
        Ok(gnn)
    }

    fn check_width(&self, width: usize) -> Result<()> {
        if width == self.layer1.w_self.nrows() {
            Ok(())
        } else {
            Err(PipelineError::shape(
                format!("{} node features", self.layer1.w_self.nrows()),
                format!("{} node features", width),
            ))
        }
    }

    fn forward(&self, graph: &AccountGraph, x: &Array2<f64>) -> ForwardCache {
        let (agg1, z1) = self.layer1.forward(graph, x);
        let h1 = z1.mapv(|v| v.max(0.0));
        let (agg2, out) = self.layer2.forward(graph, &h1);
        let logits = out.index_axis_move(Axis(1), 0);
        ForwardCache {
            x: x.clone(),
            agg1,
            z1,
            h1,
            agg2,
            logits,
        }
    }

    fn gradients(
        &self,
        graph: &AccountGraph,
        cache: &ForwardCache,
        targets: &Array1<f64>,
        pos_weight: f64,
    ) -> (LayerGradients, LayerGradients) {
        let n = targets.len() as f64;
        let d_logits: Array1<f64> = cache
            .logits
            .iter()
            .zip(targets.iter())
            .map(|(&z, &y)| {
                let p = sigmoid(z);
                (-pos_weight * y * (1.0 - p) + (1.0 - y) * p) / n
            })
            .collect();
        let d_out = d_logits.insert_axis(Axis(1));

        let g2 = LayerGradients {
            w_neigh: cache.agg2.t().dot(&d_out),
            w_self: cache.h1.t().dot(&d_out),
            bias: d_out.sum_axis(Axis(0)),
        };

        let d_h1 = graph.neighbor_mean_transpose(&d_out.dot(&self.layer2.w_neigh.t()))
            + d_out.dot(&self.layer2.w_self.t());
        let mut d_z1 = d_h1;
        d_z1.zip_mut_with(&cache.z1, |d, &z| {
            if z <= 0.0 {
                *d = 0.0;
            }
        });

        let g1 = LayerGradients {
            w_neigh: cache.agg1.t().dot(&d_z1),
            w_self: cache.x.t().dot(&d_z1),
            bias: d_z1.sum_axis(Axis(0)),
        };

        (g1, g2)
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Mean of `-[w * y * log s(z) + (1 - y) * log(1 - s(z))]`
fn weighted_bce_with_logits(logits: &Array1<f64>, targets: &Array1<f64>, pos_weight: f64) -> f64 {
    let total: f64 = logits
        .iter()
        .zip(targets.iter())
        .map(|(&z, &y)| pos_weight * y * softplus(-z) + (1.0 - y) * softplus(z))
        .sum();
    total / targets.len().max(1) as f64
}
