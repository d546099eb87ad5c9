//! Gradient boosted regression trees
//!
//! Squared-error boosting: each round fits a regression tree to the current
//! residuals and adds its shrunken output to the running prediction.

use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::decision_tree::DecisionTree;
use crate::error::{DeployError, Result};

/// Gradient boosting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientBoostingConfig {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Learning rate (shrinkage)
    pub learning_rate: f64,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Minimum samples per leaf
    pub min_samples_leaf: usize,
    /// Row subsample ratio for each tree
    pub subsample: f64,
    /// Column subsample ratio for each tree
    pub colsample_bytree: f64,
    /// Random seed
    pub random_state: Option<u64>,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 20,
            learning_rate: 0.1,
            max_depth: 5,
            min_samples_leaf: 1,
            subsample: 1.0,
            colsample_bytree: 1.0,
            random_state: Some(42),
        }
    }
}

impl GradientBoostingConfig {
    /// Reject settings the booster cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(DeployError::ConfigError("n_estimators must be at least 1".to_string()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(DeployError::ConfigError(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        for (name, ratio) in [("subsample", self.subsample), ("colsample_bytree", self.colsample_bytree)] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(DeployError::ConfigError(format!("{} must be in (0, 1], got {}", name, ratio)));
            }
        }
        Ok(())
    }
}

/// Gradient Boosting Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    config: GradientBoostingConfig,
    trees: Vec<DecisionTree>,
    col_indices_per_tree: Vec<Vec<usize>>,
    initial_prediction: f64,
    n_features: usize,
    feature_importances: Vec<f64>,
}

impl GradientBoostingRegressor {
    pub fn new(config: GradientBoostingConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            col_indices_per_tree: Vec::new(),
            initial_prediction: 0.0,
            n_features: 0,
            feature_importances: Vec::new(),
        }
    }

    /// Fit the gradient boosting model
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.config.validate()?;
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(DeployError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 || n_features == 0 {
            return Err(DeployError::TrainingError(format!(
                "Need at least one row and one feature, got {} x {}",
                n_samples, n_features
            )));
        }

        self.trees.clear();
        self.col_indices_per_tree.clear();
        self.n_features = n_features;
        self.initial_prediction = y.mean().unwrap_or(0.0);
        let mut predictions = Array1::from_elem(n_samples, self.initial_prediction);

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        self.feature_importances = vec![0.0; n_features];

        for round in 0..self.config.n_estimators {
            let residuals: Array1<f64> = if n_samples > 10_000 {
                let preds = &predictions;
                let res: Vec<f64> = (0..n_samples).into_par_iter().map(|i| y[i] - preds[i]).collect();
                Array1::from_vec(res)
            } else {
                y.iter().zip(predictions.iter()).map(|(yi, pi)| yi - pi).collect()
            };

            let row_indices = subsample(n_samples, self.config.subsample, &mut rng);
            let col_indices = subsample(n_features, self.config.colsample_bytree, &mut rng);

            let x_cols = x.select(Axis(1), &col_indices);
            let x_sub = x_cols.select(Axis(0), &row_indices);
            let y_sub: Array1<f64> = row_indices.iter().map(|&i| residuals[i]).collect();

            let mut tree = DecisionTree::new()
                .with_max_depth(self.config.max_depth)
                .with_min_samples_leaf(self.config.min_samples_leaf);
            tree.fit(&x_sub, &y_sub)?;

            // Every row moves, not only the sampled ones
            let tree_pred = tree.predict(&x_cols)?;
            predictions.scaled_add(self.config.learning_rate, &tree_pred);

            for (j, &col_idx) in col_indices.iter().enumerate() {
                if let Some(imp) = tree.feature_importances().get(j) {
                    self.feature_importances[col_idx] += imp;
                }
            }

            debug!(round, depth = tree.depth(), "Fitted boosting round");
            self.trees.push(tree);
            self.col_indices_per_tree.push(col_indices);
        }

        let total: f64 = self.feature_importances.iter().sum();
        if total > 0.0 {
            for imp in &mut self.feature_importances {
                *imp /= total;
            }
        }

        Ok(())
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(DeployError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(DeployError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        let mut predictions = Array1::from_elem(x.nrows(), self.initial_prediction);
        for (tree, col_indices) in self.trees.iter().zip(self.col_indices_per_tree.iter()) {
            let x_sub = x.select(Axis(1), col_indices);
            let tree_pred = tree.predict(&x_sub)?;
            predictions.scaled_add(self.config.learning_rate, &tree_pred);
        }

        Ok(predictions)
    }

    /// Booster settings
    pub fn config(&self) -> &GradientBoostingConfig {
        &self.config
    }

    /// Number of fitted trees
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Get feature importances
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }
}

/// Sorted random subset of `0..n` of size `ceil(n * ratio)`
fn subsample(n: usize, ratio: f64, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    if ratio >= 1.0 {
        return indices;
    }
    let sample_size = (((n as f64) * ratio).ceil() as usize).clamp(1, n);
    indices.shuffle(rng);
    indices.truncate(sample_size);
    indices.sort_unstable();
    indices
}
