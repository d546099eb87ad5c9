//! Goodness-of-fit metrics for regression pipelines

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Regression metrics computed from actual and predicted target values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Mean Squared Error
    pub mse: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Error
    pub mae: f64,
    /// Coefficient of determination
    pub r2: f64,
    /// Number of rows compared
    pub n_samples: usize,
}

impl RegressionMetrics {
    /// Compute regression metrics.
    ///
    /// R² is reported as 0 when the target is constant, since the total sum
    /// of squares is zero.
    pub fn compute(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        let n_samples = y_true.len().min(y_pred.len());
        if n_samples == 0 {
            return Self::default();
        }
        let n = n_samples as f64;

        let errors: Vec<f64> = y_true.iter().zip(y_pred.iter()).map(|(t, p)| t - p).collect();

        let ss_res: f64 = errors.iter().map(|e| e * e).sum();
        let mse = ss_res / n;
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;

        let y_mean = y_true.iter().take(n_samples).sum::<f64>() / n;
        let ss_tot: f64 = y_true.iter().take(n_samples).map(|y| (y - y_mean).powi(2)).sum();
        let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

        Self {
            mse,
            rmse: mse.sqrt(),
            mae,
            r2,
            n_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_perfect_fit() {
        let y = array![1.0, 2.0, 3.0];
        let metrics = RegressionMetrics::compute(&y, &y);
        assert_eq!(metrics.r2, 1.0);
        assert_eq!(metrics.mse, 0.0);
        assert_eq!(metrics.n_samples, 3);
    }

    #[test]
    fn test_mean_predictor_scores_zero() {
        let y = array![1.0, 2.0, 3.0];
        let pred = array![2.0, 2.0, 2.0];
        let metrics = RegressionMetrics::compute(&y, &pred);
        assert!(metrics.r2.abs() < 1e-12);
        assert!((metrics.mae - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_target() {
        let y = array![5.0, 5.0];
        let pred = array![4.0, 6.0];
        let metrics = RegressionMetrics::compute(&y, &pred);
        assert_eq!(metrics.r2, 0.0);
        assert_eq!(metrics.rmse, 1.0);
    }

    #[test]
    fn test_empty() {
        let y: Array1<f64> = Array1::zeros(0);
        assert_eq!(RegressionMetrics::compute(&y, &y), RegressionMetrics::default());
    }
}
