//! Density scorer: isolation forest over scaled feature vectors
//!
//! Anomalous rows are isolated by fewer random splits, so a short average
//! path maps to a raw score close to 1.

use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand::seq::index;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::normalizer::batch_min_max;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Rows drawn per tree
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxSamples {
    /// min(256, n)
    Auto,
    Count(usize),
    /// Fraction of the training rows, in (0, 1]
    Fraction(f64),
}

impl MaxSamples {
    fn resolve(&self, n_rows: usize) -> Result<usize> {
        let size = match *self {
            MaxSamples::Auto => n_rows.min(256),
            MaxSamples::Count(count) => count.min(n_rows),
            MaxSamples::Fraction(f) => {
                if !(f > 0.0 && f <= 1.0) {
                    return Err(PipelineError::InvalidParameter {
                        name: "max_samples".to_string(),
                        value: f.to_string(),
                        reason: "fraction must be in (0, 1]".to_string(),
                    });
                }
                ((n_rows as f64) * f).floor() as usize
            }
        };
        Ok(size.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationForestConfig {
    pub n_estimators: usize,
    pub max_samples: MaxSamples,
    /// Expected outlier share; sets the `predict` threshold
    pub contamination: f64,
    pub seed: Option<u64>,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_samples: MaxSamples::Auto,
            contamination: 0.01,
            seed: Some(42),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum IsolationNode {
    Split {
        feature: usize,
        value: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

impl IsolationNode {
    fn grow(
        x: &Array2<f64>,
        rows: &[usize],
        depth: usize,
        height_limit: usize,
        rng: &mut impl Rng,
    ) -> Self {
        if depth >= height_limit || rows.len() <= 1 {
            return IsolationNode::Leaf { size: rows.len() };
        }

        let feature = rng.gen_range(0..x.ncols());
        let (lo, hi) = rows
            .iter()
            .map(|&r| x[[r, feature]])
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });

        if hi - lo <= f64::EPSILON {
            return IsolationNode::Leaf { size: rows.len() };
        }

        let value = rng.gen_range(lo..hi);
        let (left, right): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&r| x[[r, feature]] < value);

        if left.is_empty() || right.is_empty() {
            return IsolationNode::Leaf { size: rows.len() };
        }

        IsolationNode::Split {
            feature,
            value,
            left: Box::new(Self::grow(x, &left, depth + 1, height_limit, rng)),
            right: Box::new(Self::grow(x, &right, depth + 1, height_limit, rng)),
        }
    }

    fn path_length(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = self;
        let mut depth = 0.0;
        loop {
            match node {
                IsolationNode::Leaf { size } => return depth + average_path_length(*size),
                IsolationNode::Split {
                    feature,
                    value,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *value { &**left } else { &**right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    config: IsolationForestConfig,
    n_features: usize,
    sample_size: usize,
    trees: Vec<IsolationNode>,
    threshold: Option<f64>,
}

impl IsolationForest {
    pub fn new(config: IsolationForestConfig) -> Self {
        Self {
            config,
            n_features: 0,
            sample_size: 0,
            trees: Vec::new(),
            threshold: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        let n_rows = x.nrows();
        if n_rows == 0 || x.ncols() == 0 {
            return Err(PipelineError::TrainingError(
                "isolation forest needs a non-empty training matrix".to_string(),
            ));
        }
        if self.config.n_estimators == 0 {
            return Err(PipelineError::InvalidParameter {
                name: "n_estimators".to_string(),
                value: "0".to_string(),
                reason: "need at least one tree".to_string(),
            });
        }
        if !(0.0..0.5).contains(&self.config.contamination) {
            return Err(PipelineError::InvalidParameter {
                name: "contamination".to_string(),
                value: self.config.contamination.to_string(),
                reason: "must be in [0, 0.5)".to_string(),
            });
        }

        let sample_size = self.config.max_samples.resolve(n_rows)?;
        let height_limit = (sample_size as f64).log2().ceil().max(0.0) as usize;
        let mut rng = match self.config.seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        self.trees = (0..self.config.n_estimators)
            .map(|_| {
                let rows = index::sample(&mut rng, n_rows, sample_size).into_vec();
                IsolationNode::grow(x, &rows, 0, height_limit, &mut rng)
            })
            .collect();
        self.n_features = x.ncols();
        self.sample_size = sample_size;

        let mut raw: Vec<f64> = self.raw_scores(x)?.to_vec();
        raw.sort_by(|a, b| b.total_cmp(a));
        let cut = ((self.config.contamination * n_rows as f64) as usize).min(n_rows - 1);
        self.threshold = Some(raw[cut]);

        info!(
            trees = self.trees.len(),
            sample_size,
            height_limit,
            "Isolation forest fitted"
        );
        Ok(())
    }

    /// Raw anomaly scores in (0, 1]; higher is more anomalous
    pub fn raw_scores(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.check_ready(x.ncols())?;
        let c = average_path_length(self.sample_size).max(f64::EPSILON);
        let n_trees = self.trees.len() as f64;

        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let mean_path =
                    self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / n_trees;
                2f64.powf(-mean_path / c)
            })
            .collect())
    }

    /// Raw anomaly score for a single feature vector
    pub fn raw_score(&self, features: &Array1<f64>) -> Result<f64> {
        let batch = features.clone().insert_axis(ndarray::Axis(0));
        Ok(self.raw_scores(&batch)?[0])
    }

    /// Batch scores rescaled into [0, 1] by the batch's own min and max
    pub fn score(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.nrows() == 0 {
            return Ok(Array1::zeros(0));
        }
        Ok(batch_min_max(&self.raw_scores(x)?))
    }

    /// Raw-score cut-off derived from the contamination rate
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// `true` for rows whose raw score reaches the contamination threshold
    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<bool>> {
        let threshold = self.threshold.ok_or(PipelineError::ModelNotFitted)?;
        Ok(self.raw_scores(x)?.iter().map(|&s| s >= threshold).collect())
    }

    fn check_ready(&self, width: usize) -> Result<()> {
        if !self.is_fitted() {
            return Err(PipelineError::ModelNotFitted);
        }
        if width != self.n_features {
            return Err(PipelineError::shape(
                format!("{} features", self.n_features),
                format!("{} features", width),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::StandardNormal;

    fn gaussian(n: usize, d: usize, seed: u64) -> Array2<f64> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        Array2::from_shape_fn((n, d), |_| rng.sample::<f64, _>(StandardNormal))
    }

    fn fitted(n: usize) -> IsolationForest {
        let mut forest = IsolationForest::new(IsolationForestConfig {
            n_estimators: 100,
            ..Default::default()
        });
        forest.fit(&gaussian(n, 4, 11)).unwrap();
        forest
    }

    #[test]
    fn test_outlier_scores_higher() {
        let forest = fitted(500);
        let points = ndarray::array![[0.0, 0.0, 0.0, 0.0], [6.0, -6.0, 6.0, -6.0]];
        let raw = forest.raw_scores(&points).unwrap();

        assert!(raw.iter().all(|&s| s > 0.0 && s <= 1.0));
        assert!(raw[1] > raw[0]);
        assert!(raw[1] > 0.55);
    }

    #[test]
    fn test_batch_score_range() {
        let forest = fitted(300);
        let scores = forest.score(&gaussian(50, 4, 12)).unwrap();
        assert_eq!(scores.len(), 50);
        assert!(scores.iter().all(|&s| (0.0..=1.0).contains(&s)));
        assert_eq!(scores.iter().copied().fold(f64::INFINITY, f64::min), 0.0);
    }

    #[test]
    fn test_single_and_empty_batches() {
        let forest = fitted(200);
        let single = forest.score(&gaussian(1, 4, 13)).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0], 0.0);

        assert!(forest.score(&Array2::zeros((0, 4))).unwrap().is_empty());
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let a = fitted(200);
        let b = fitted(200);
        let points = gaussian(20, 4, 14);
        assert_eq!(a.raw_scores(&points).unwrap(), b.raw_scores(&points).unwrap());
    }

    #[test]
    fn test_predict_flags_contamination_share() {
        let mut data = gaussian(400, 4, 15);
        for i in 0..4 {
            data.row_mut(i).fill(10.0);
        }
        let mut forest = IsolationForest::new(IsolationForestConfig::default());
        forest.fit(&data).unwrap();

        let labels = forest.predict(&data).unwrap();
        assert!(labels[..4].iter().all(|&l| l));
        assert!(labels.iter().filter(|&&l| l).count() <= 10);
    }

    #[test]
    fn test_unfitted_and_width_errors() {
        let forest = IsolationForest::new(IsolationForestConfig::default());
        assert!(matches!(
            forest.raw_scores(&gaussian(2, 4, 16)),
            Err(PipelineError::ModelNotFitted)
        ));

        let forest = fitted(100);
        assert!(matches!(
            forest.raw_scores(&gaussian(2, 3, 17)),
            Err(PipelineError::ShapeError { .. })
        ));
    }

    #[test]
    fn test_sample_size_resolution() {
        assert_eq!(MaxSamples::Auto.resolve(1000).unwrap(), 256);
        assert_eq!(MaxSamples::Auto.resolve(100).unwrap(), 100);
        assert_eq!(MaxSamples::Fraction(0.5).resolve(100).unwrap(), 50);
        assert_eq!(MaxSamples::Count(500).resolve(100).unwrap(), 100);
        assert!(MaxSamples::Fraction(1.5).resolve(100).is_err());
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.244).abs() < 1e-2);
    }
}
