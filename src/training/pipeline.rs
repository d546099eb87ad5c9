//! Formula + gradient boosted trees regression pipeline

use chrono::{DateTime, Utc};
use ndarray::Array1;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

use super::formula::{label_values, FittedFormula, FormulaSpec, InputColumn};
use super::gradient_boosting::{GradientBoostingConfig, GradientBoostingRegressor};
use super::metrics::RegressionMetrics;
use crate::error::Result;

/// Name of the column appended by [`TrainedPipeline::transform_frame`]
pub const PREDICTION_COLUMN: &str = "prediction";

/// What to fit: a formula string and booster settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub formula: String,
    #[serde(default)]
    pub booster: GradientBoostingConfig,
}

impl PipelineSpec {
    pub fn new(formula: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            booster: GradientBoostingConfig::default(),
        }
    }

    /// `target ~ .` with default booster settings
    pub fn for_target(target: &str) -> Self {
        Self::new(format!("{} ~ .", target))
    }

    pub fn with_booster(mut self, booster: GradientBoostingConfig) -> Self {
        self.booster = booster;
        self
    }
}

/// Anything that can produce predictions for a table
pub trait Predictor: Send + Sync {
    fn predict(&self, df: &DataFrame) -> Result<Array1<f64>>;

    /// Columns a request table must carry
    fn input_columns(&self) -> Vec<String>;
}

/// Fits a pipeline on a table
pub trait PipelineEstimator: Send + Sync {
    fn fit(&self, df: &DataFrame) -> Result<TrainedPipeline>;
}

/// Estimator for [`PipelineSpec`] using [`GradientBoostingRegressor`]
#[derive(Debug, Clone)]
pub struct GbtPipelineEstimator {
    spec: PipelineSpec,
}

impl GbtPipelineEstimator {
    pub fn new(spec: PipelineSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }
}

impl PipelineEstimator for GbtPipelineEstimator {
    fn fit(&self, df: &DataFrame) -> Result<TrainedPipeline> {
        let start = Instant::now();
        self.spec.booster.validate()?;

        let formula_spec = FormulaSpec::parse(&self.spec.formula)?;
        let formula = FittedFormula::fit(&formula_spec, df)?;
        let x = formula.design_matrix(df)?;
        let y = label_values(df, formula.label())?;

        let mut regressor = GradientBoostingRegressor::new(self.spec.booster.clone());
        regressor.fit(&x, &y)?;

        info!(
            formula = %formula_spec,
            rows = x.nrows(),
            features = x.ncols(),
            trees = regressor.n_trees(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pipeline fitted"
        );

        Ok(TrainedPipeline {
            formula,
            regressor,
            fitted_at: Utc::now(),
            n_training_rows: df.height(),
        })
    }
}

/// A fitted pipeline: formula encoding plus booster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedPipeline {
    formula: FittedFormula,
    regressor: GradientBoostingRegressor,
    fitted_at: DateTime<Utc>,
    n_training_rows: usize,
}

impl TrainedPipeline {
    pub fn label(&self) -> &str {
        self.formula.label()
    }

    pub fn formula(&self) -> &FittedFormula {
        &self.formula
    }

    pub fn inputs(&self) -> &[InputColumn] {
        self.formula.inputs()
    }

    pub fn regressor(&self) -> &GradientBoostingRegressor {
        &self.regressor
    }

    pub fn fitted_at(&self) -> DateTime<Utc> {
        self.fitted_at
    }

    pub fn n_training_rows(&self) -> usize {
        self.n_training_rows
    }

    /// Predictions for every row of `df`
    pub fn transform(&self, df: &DataFrame) -> Result<Array1<f64>> {
        let x = self.formula.design_matrix(df)?;
        self.regressor.predict(&x)
    }

    /// `df` with a `prediction` column appended
    pub fn transform_frame(&self, df: &DataFrame) -> Result<DataFrame> {
        let predictions = self.transform(df)?;
        let mut out = df.clone();
        out.with_column(Column::new(PREDICTION_COLUMN.into(), predictions.to_vec()))?;
        Ok(out)
    }

    /// Feature name and importance, most important first
    pub fn feature_importances(&self) -> Vec<(String, f64)> {
        let mut pairs: Vec<(String, f64)> = self
            .formula
            .feature_names()
            .into_iter()
            .zip(self.regressor.feature_importances().iter().copied())
            .collect();
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        pairs
    }
}

impl Predictor for TrainedPipeline {
    fn predict(&self, df: &DataFrame) -> Result<Array1<f64>> {
        self.transform(df)
    }

    fn input_columns(&self) -> Vec<String> {
        self.inputs().iter().map(|i| i.name.clone()).collect()
    }
}

/// Score `predictor` against the `label` column of `df`
pub fn evaluate(predictor: &dyn Predictor, df: &DataFrame, label: &str) -> Result<RegressionMetrics> {
    let y_true = label_values(df, label)?;
    let y_pred = predictor.predict(df)?;
    Ok(RegressionMetrics::compute(&y_true, &y_pred))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeployError;

    fn training_frame() -> DataFrame {
        let x1: Vec<f64> = (0..60).map(|i| i as f64).collect();
        let x2: Vec<f64> = (0..60).map(|i| ((i * 7) % 11) as f64).collect();
        let group: Vec<&str> = (0..60).map(|i| if i % 3 == 0 { "a" } else { "b" }).collect();
        let y: Vec<f64> = x1
            .iter()
            .zip(&x2)
            .zip(&group)
            .map(|((a, b), g)| 2.0 * a + b + if *g == "a" { 5.0 } else { 0.0 })
            .collect();
        df!("x1" => x1, "x2" => x2, "group" => group, "y" => y).unwrap()
    }

    #[test]
    fn test_fit_and_evaluate() {
        let df = training_frame();
        let pipeline = GbtPipelineEstimator::new(PipelineSpec::for_target("y")).fit(&df).unwrap();

        assert_eq!(pipeline.label(), "y");
        assert_eq!(pipeline.n_training_rows(), 60);
        assert_eq!(pipeline.input_columns(), vec!["x1", "x2", "group"]);

        let metrics = evaluate(&pipeline, &df, "y").unwrap();
        assert_eq!(metrics.n_samples, 60);
        assert!(metrics.r2 > 0.8, "r2 = {}", metrics.r2);
    }

    #[test]
    fn test_transform_frame_appends_prediction() {
        let df = training_frame();
        let pipeline = GbtPipelineEstimator::new(PipelineSpec::for_target("y")).fit(&df).unwrap();

        let out = pipeline.transform_frame(&df).unwrap();
        assert_eq!(out.width(), df.width() + 1);
        assert!(out.column(PREDICTION_COLUMN).is_ok());
    }

    #[test]
    fn test_predict_without_label_column() {
        let df = training_frame();
        let pipeline = GbtPipelineEstimator::new(PipelineSpec::for_target("y")).fit(&df).unwrap();

        let request = df.drop("y").unwrap().head(Some(3));
        assert_eq!(pipeline.predict(&request).unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_target() {
        let df = training_frame();
        let result = GbtPipelineEstimator::new(PipelineSpec::for_target("missing")).fit(&df);
        assert!(matches!(result, Err(DeployError::FeatureNotFound(_))));
    }

    #[test]
    fn test_feature_importances_sorted() {
        let df = training_frame();
        let pipeline = GbtPipelineEstimator::new(PipelineSpec::for_target("y")).fit(&df).unwrap();
        let importances = pipeline.feature_importances();
        assert_eq!(importances[0].0, "x1");
        assert!(importances.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_nan_label_rejected_at_fit() {
        let mut df = training_frame();
        let mut y: Vec<f64> = df.column("y").unwrap().f64().unwrap().into_no_null_iter().collect();
        y[4] = f64::NAN;
        df.with_column(Column::new("y".into(), y)).unwrap();

        let result = GbtPipelineEstimator::new(PipelineSpec::for_target("y")).fit(&df);
        assert!(matches!(result, Err(DeployError::InvalidInput(_))));
    }

    #[test]
    fn test_infinite_feature_rejected_at_predict() {
        let df = training_frame();
        let pipeline = GbtPipelineEstimator::new(PipelineSpec::for_target("y")).fit(&df).unwrap();

        let request = df!("x1" => &[f64::INFINITY], "x2" => &[1.0], "group" => &["a"]).unwrap();
        assert!(matches!(pipeline.predict(&request), Err(DeployError::InvalidInput(_))));
    }

    #[test]
    fn test_predict_zero_rows() {
        let df = training_frame();
        let pipeline = GbtPipelineEstimator::new(PipelineSpec::for_target("y")).fit(&df).unwrap();

        let request = df.drop("y").unwrap().head(Some(0));
        assert_eq!(pipeline.predict(&request).unwrap().len(), 0);
    }
}
