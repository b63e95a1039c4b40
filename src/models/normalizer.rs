//! Score normalization
//!
//! Two flavours: a min-max normalizer fitted on training scores and
//! persisted as an artifact, and per-batch min-max rescaling used by the
//! density scorer's batch `score`.

use crate::error::{PipelineError, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Epsilon added to the batch range so equal scores do not divide by zero
pub const BATCH_RANGE_EPSILON: f64 = 1e-6;

/// Min-max normalizer fitted on the training score distribution.
///
/// Scores outside the training range map outside [0, 1]; they are not
/// clipped, so an unusually large reconstruction error keeps its weight in
/// the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxNormalizer {
    pub min: f64,
    pub max: f64,
}

impl MinMaxNormalizer {
    pub fn fit(scores: &[f64]) -> Result<Self> {
        if scores.is_empty() {
            return Err(PipelineError::TrainingError(
                "cannot fit normalizer on an empty score set".to_string(),
            ));
        }
        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            return Err(PipelineError::invalid_score("normalizer input", *bad));
        }

        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(Self { min, max })
    }

    /// Map a raw score onto the training range.
    pub fn transform(&self, score: f64) -> f64 {
        let range = self.max - self.min;
        if range > 0.0 {
            (score - self.min) / range
        } else {
            score - self.min
        }
    }

    pub fn transform_all(&self, scores: &[f64]) -> Vec<f64> {
        scores.iter().map(|&s| self.transform(s)).collect()
    }
}

/// Rescale a batch into [0, 1] by its own min and max.
///
/// A single-element batch maps to 0; an empty batch stays empty.
pub fn batch_min_max(scores: &Array1<f64>) -> Array1<f64> {
    if scores.is_empty() {
        return Array1::zeros(0);
    }
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    scores.mapv(|s| (s - min) / (max - min + BATCH_RANGE_EPSILON))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_min_max_fit_and_transform() {
        let normalizer = MinMaxNormalizer::fit(&[2.0, 4.0, 6.0]).unwrap();
        assert_eq!(normalizer.transform(2.0), 0.0);
        assert_eq!(normalizer.transform(6.0), 1.0);
        assert_eq!(normalizer.transform(4.0), 0.5);
        // Out-of-range scores are not clipped
        assert_eq!(normalizer.transform(10.0), 2.0);
    }

    #[test]
    fn test_degenerate_range() {
        let normalizer = MinMaxNormalizer::fit(&[3.0, 3.0]).unwrap();
        assert_eq!(normalizer.transform(3.0), 0.0);
        assert_eq!(normalizer.transform(4.0), 1.0);
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        assert!(MinMaxNormalizer::fit(&[]).is_err());
        assert!(matches!(
            MinMaxNormalizer::fit(&[1.0, f64::NAN]),
            Err(PipelineError::InvalidScore { .. })
        ));
    }

    #[test]
    fn test_batch_min_max() {
        let scaled = batch_min_max(&array![0.2, 0.4, 0.6]);
        assert!(scaled.iter().all(|&s| (0.0..=1.0).contains(&s)));
        assert_eq!(scaled[0], 0.0);
        assert!((scaled[2] - 1.0).abs() < 1e-4);

        assert_eq!(batch_min_max(&array![0.7]), array![0.0]);
        assert!(batch_min_max(&Array1::zeros(0)).is_empty());
    }
}
