//! Standard (z-score) feature scaling applied ahead of both scorers

use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Per-feature standardisation: (x - mean) / std
///
/// Uses the population standard deviation. Constant features get a scale
/// of 1 so they pass through centred instead of dividing by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl FeatureScaler {
    /// Fit on a row-per-sample matrix
    pub fn fit(x: &Array2<f64>) -> Result<Self> {
        if x.nrows() == 0 {
            return Err(PipelineError::TrainingError(
                "cannot fit feature scaler on an empty batch".to_string(),
            ));
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::TrainingError("empty feature matrix".to_string()))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });

        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Scale a batch
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features() {
            return Err(PipelineError::shape(
                format!("{} features", self.n_features()),
                format!("{} features", x.ncols()),
            ));
        }
        Ok((x - &self.mean) / &self.scale)
    }

    /// Scale a single feature vector
    pub fn transform_row(&self, row: &[f64]) -> Result<Array1<f64>> {
        if row.len() != self.n_features() {
            return Err(PipelineError::shape(
                format!("{} features", self.n_features()),
                format!("{} features", row.len()),
            ));
        }
        let row = ArrayView1::from(row);
        Ok((&row - &self.mean) / &self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standardizes_columns() {
        let x = array![[1.0, 10.0], [3.0, 10.0], [5.0, 10.0]];
        let scaler = FeatureScaler::fit(&x).unwrap();
        let scaled = scaler.transform(&x).unwrap();

        assert!((scaled[[0, 0]] + 1.224744871).abs() < 1e-6);
        assert!(scaled[[1, 0]].abs() < 1e-12);
        // Constant column is centred, not divided by zero
        assert_eq!(scaled[[2, 1]], 0.0);
    }

    #[test]
    fn test_row_matches_batch() {
        let x = array![[1.0, 2.0], [4.0, 8.0], [7.0, 5.0]];
        let scaler = FeatureScaler::fit(&x).unwrap();
        let batch = scaler.transform(&x).unwrap();
        let row = scaler.transform_row(&[4.0, 8.0]).unwrap();
        assert_eq!(row, batch.row(1));
    }

    #[test]
    fn test_width_mismatch() {
        let scaler = FeatureScaler::fit(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert!(matches!(
            scaler.transform_row(&[1.0]),
            Err(PipelineError::ShapeError { .. })
        ));
        assert!(FeatureScaler::fit(&Array2::zeros((0, 2))).is_err());
    }
}
