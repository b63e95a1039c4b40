//! Offline graph relational scoring over account interaction graphs

pub mod builder;
pub mod gnn;
pub mod synthetic;

pub use builder::{AccountGraph, AccountProfile, GraphBuilder, NodeStandardizer, NODE_FEATURE_COUNT, NODE_FEATURE_NAMES};
pub use gnn::{FraudGnn, GnnConfig, GnnTrainingHistory};
pub use synthetic::{generate_synthetic_graph, SyntheticGraphConfig};

use serde::{Deserialize, Serialize};

/// Graph trainer settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphTrainingConfig {
    pub synthetic: SyntheticGraphConfig,
    pub gnn: GnnConfig,
}
