//! Weighted ensemble of the normalized component scores

use crate::error::{PipelineError, Result};
use crate::types::alert::Decision;
use serde::{Deserialize, Serialize};

/// Component weights; must be finite and non-negative
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleWeights {
    pub autoencoder: f64,
    pub isolation_forest: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            autoencoder: 0.6,
            isolation_forest: 0.4,
        }
    }
}

impl EnsembleWeights {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("autoencoder", self.autoencoder),
            ("isolation_forest", self.isolation_forest),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PipelineError::InvalidParameter {
                    name: format!("weights.{}", name),
                    value: value.to_string(),
                    reason: "weights must be finite and non-negative".to_string(),
                });
            }
        }
        Ok(())
    }

    /// `w_ae * ae + w_if * if`, rejecting non-finite inputs and outputs
    pub fn combine(&self, ae_score: f64, if_score: f64) -> Result<f64> {
        if !ae_score.is_finite() {
            return Err(PipelineError::invalid_score("autoencoder", ae_score));
        }
        if !if_score.is_finite() {
            return Err(PipelineError::invalid_score("isolation_forest", if_score));
        }

        let score = self.autoencoder * ae_score + self.isolation_forest * if_score;
        if !score.is_finite() {
            return Err(PipelineError::invalid_score("ensemble", score));
        }
        Ok(score)
    }

    /// Combine paired score slices
    pub fn combine_all(&self, ae_scores: &[f64], if_scores: &[f64]) -> Result<Vec<f64>> {
        if ae_scores.len() != if_scores.len() {
            return Err(PipelineError::shape(ae_scores.len(), if_scores.len()));
        }
        ae_scores
            .iter()
            .zip(if_scores)
            .map(|(&ae, &iso)| self.combine(ae, iso))
            .collect()
    }
}

/// Weights plus the alert threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleCombiner {
    weights: EnsembleWeights,
    threshold: f64,
}

impl EnsembleCombiner {
    pub fn new(weights: EnsembleWeights, threshold: f64) -> Result<Self> {
        weights.validate()?;
        if !threshold.is_finite() {
            return Err(PipelineError::InvalidParameter {
                name: "threshold".to_string(),
                value: threshold.to_string(),
                reason: "threshold must be finite".to_string(),
            });
        }
        Ok(Self { weights, threshold })
    }

    pub fn weights(&self) -> EnsembleWeights {
        self.weights
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn combine(&self, ae_score: f64, if_score: f64) -> Result<f64> {
        self.weights.combine(ae_score, if_score)
    }

    /// Flag at or above the threshold
    pub fn decide(&self, score: f64) -> Decision {
        if score >= self.threshold {
            Decision::Flag
        } else {
            Decision::Pass
        }
    }

    pub fn evaluate(&self, ae_score: f64, if_score: f64) -> Result<(f64, Decision)> {
        let score = self.combine(ae_score, if_score)?;
        Ok((score, self.decide(score)))
    }
}

/// `q`-th percentile (0..=100) with linear interpolation between ranks
pub fn percentile(values: &[f64], q: f64) -> Result<f64> {
    if values.is_empty() {
        return Err(PipelineError::TrainingError(
            "percentile of an empty score set".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&q) {
        return Err(PipelineError::InvalidParameter {
            name: "percentile".to_string(),
            value: q.to_string(),
            reason: "must be within [0, 100]".to_string(),
        });
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(PipelineError::invalid_score("percentile input", *bad));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combiner(threshold: f64) -> EnsembleCombiner {
        EnsembleCombiner::new(EnsembleWeights::default(), threshold).unwrap()
    }

    #[test]
    fn test_reference_weights() {
        let score = combiner(0.5).combine(1.0, 0.5).unwrap();
        assert!((score - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_flag_at_threshold() {
        let c = combiner(0.5);
        assert_eq!(c.decide(0.5), Decision::Flag);
        assert_eq!(c.decide(0.499_999), Decision::Pass);
        assert_eq!(c.decide(0.9), Decision::Flag);
    }

    #[test]
    fn test_monotone_in_each_input() {
        let c = combiner(0.5);
        let steps: Vec<f64> = (0..=10).map(|i| i as f64 / 10.0).collect();
        for &fixed in &steps {
            for pair in steps.windows(2) {
                assert!(c.combine(pair[1], fixed).unwrap() >= c.combine(pair[0], fixed).unwrap());
                assert!(c.combine(fixed, pair[1]).unwrap() >= c.combine(fixed, pair[0]).unwrap());
            }
        }
    }

    #[test]
    fn test_rejects_non_finite() {
        let c = combiner(0.5);
        assert!(matches!(
            c.combine(f64::NAN, 0.1),
            Err(PipelineError::InvalidScore { .. })
        ));
        assert!(matches!(
            c.evaluate(0.1, f64::INFINITY),
            Err(PipelineError::InvalidScore { .. })
        ));
        // Finite inputs that overflow
        let huge = EnsembleWeights {
            autoencoder: f64::MAX,
            isolation_forest: f64::MAX,
        };
        assert!(huge.combine(f64::MAX, f64::MAX).is_err());
    }

    #[test]
    fn test_rejects_bad_weights_and_threshold() {
        let negative = EnsembleWeights {
            autoencoder: -0.1,
            isolation_forest: 0.4,
        };
        assert!(EnsembleCombiner::new(negative, 0.5).is_err());
        assert!(EnsembleCombiner::new(EnsembleWeights::default(), f64::NAN).is_err());
    }

    #[test]
    fn test_combine_all_length_mismatch() {
        let weights = EnsembleWeights::default();
        assert_eq!(weights.combine_all(&[0.0, 1.0], &[0.0, 1.0]).unwrap(), vec![0.0, 1.0]);
        assert!(weights.combine_all(&[0.0], &[]).is_err());
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 0.0).unwrap(), 1.0);
        assert_eq!(percentile(&values, 100.0).unwrap(), 4.0);
        assert!((percentile(&values, 50.0).unwrap() - 2.5).abs() < 1e-12);

        let range: Vec<f64> = (0..1000).map(f64::from).collect();
        assert!((percentile(&range, 99.9).unwrap() - 998.001).abs() < 1e-9);

        assert!(percentile(&[], 50.0).is_err());
        assert!(percentile(&values, 101.0).is_err());
    }
}
