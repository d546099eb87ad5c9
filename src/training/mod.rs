//! Model training module
//!
//! Provides the regression pipeline that gets deployed:
//! - R-style formulas with one-hot encoding of string columns
//! - Gradient boosted regression trees
//! - Regression metrics (R², RMSE, MAE)

pub mod decision_tree;
pub mod formula;
pub mod gradient_boosting;
mod metrics;
mod pipeline;

pub use decision_tree::{DecisionTree, TreeNode};
pub use formula::{FeatureTerm, FittedFormula, FormulaSpec, InputColumn, InputKind, Term};
pub use gradient_boosting::{GradientBoostingConfig, GradientBoostingRegressor};
pub use metrics::RegressionMetrics;
pub use pipeline::{
    evaluate, GbtPipelineEstimator, PipelineEstimator, PipelineSpec, Predictor, TrainedPipeline, PREDICTION_COLUMN,
};
