//! End-to-end deployment workflow
//!
//! Runs the stages in order: ingest, fit and evaluate, persist, initialize
//! scoring and score a sample, write the schema, deploy. Every stage error
//! propagates unchanged except scoring, whose outcome is reported as data.

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::data::{sample_input, CsvTableSource, TableSource};
use crate::deploy::{CliDeployer, DeploymentRequest, ScoringEntry, ServiceDeployer, ServiceId};
use crate::error::{DeployError, Result};
use crate::persistence::{DirectoryStore, PipelineStore};
use crate::schema::{generate_schema, SchemaDocument};
use crate::scoring::{ScoreOutcome, ScoringContext};
use crate::training::{evaluate, GbtPipelineEstimator, PipelineEstimator, PipelineSpec, RegressionMetrics, TrainedPipeline};

fn default_model_dir() -> PathBuf {
    PathBuf::from("./model")
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("./schema.json")
}

fn default_input_param() -> String {
    "input_df".to_string()
}

fn default_sample_rows() -> usize {
    3
}

fn default_runtime() -> String {
    "rust".to_string()
}

fn default_scoring_entry() -> PathBuf {
    PathBuf::from("./score.json")
}

/// Settings for the final hand-off to the deployment CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploySettings {
    pub service_name: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default = "default_scoring_entry")]
    pub scoring_entry: PathBuf,
    /// Deployment CLI executable; `None` uses the default
    #[serde(default)]
    pub program: Option<String>,
}

impl DeploySettings {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            runtime: default_runtime(),
            scoring_entry: default_scoring_entry(),
            program: None,
        }
    }
}

/// Workflow configuration, loadable from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub data_path: PathBuf,
    #[serde(default)]
    pub delimiter: Option<char>,
    pub pipeline: PipelineSpec,
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    #[serde(default = "default_schema_path")]
    pub schema_path: PathBuf,
    #[serde(default = "default_input_param")]
    pub input_param: String,
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    #[serde(default)]
    pub deployment: Option<DeploySettings>,
}

impl WorkflowConfig {
    /// Defaults for predicting `target` from every other column of `data_path`
    pub fn new(data_path: impl Into<PathBuf>, target: &str) -> Self {
        Self {
            data_path: data_path.into(),
            delimiter: None,
            pipeline: PipelineSpec::for_target(target),
            model_dir: default_model_dir(),
            schema_path: default_schema_path(),
            input_param: default_input_param(),
            sample_rows: default_sample_rows(),
            deployment: None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| DeployError::ConfigError(format!("Cannot read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| DeployError::ConfigError(format!("Invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rows == 0 {
            return Err(DeployError::ConfigError("sample_rows must be at least 1".to_string()));
        }
        if self.input_param.trim().is_empty() {
            return Err(DeployError::ConfigError("input_param must not be empty".to_string()));
        }
        if let Some(d) = self.delimiter {
            if !d.is_ascii() {
                return Err(DeployError::ConfigError(format!("Delimiter '{}' is not ASCII", d)));
            }
        }
        self.pipeline.booster.validate()
    }
}

/// What a workflow run produced
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub rows: usize,
    pub columns: usize,
    pub metrics: RegressionMetrics,
    pub model_dir: PathBuf,
    pub schema_path: PathBuf,
    /// Handler output for the sample rows
    pub sample_response: String,
    pub sample_failed: bool,
    pub service_id: Option<ServiceId>,
}

/// The workflow with its pluggable collaborators
pub struct Workflow {
    config: WorkflowConfig,
    source: Box<dyn TableSource>,
    estimator: Box<dyn PipelineEstimator>,
    store: Box<dyn PipelineStore>,
    deployer: Option<Box<dyn ServiceDeployer>>,
}

impl Workflow {
    /// Native collaborators: CSV source, boosted-tree estimator, directory store,
    /// and the deployment CLI when `config.deployment` is set
    pub fn new(config: WorkflowConfig) -> Self {
        let mut source = CsvTableSource::new();
        if let Some(d) = config.delimiter.filter(char::is_ascii) {
            source = source.with_delimiter(d as u8);
        }
        let deployer: Option<Box<dyn ServiceDeployer>> = config.deployment.as_ref().map(|d| {
            let cli = match &d.program {
                Some(program) => CliDeployer::new().with_program(program.clone()),
                None => CliDeployer::new(),
            };
            Box::new(cli) as Box<dyn ServiceDeployer>
        });

        Self {
            estimator: Box::new(GbtPipelineEstimator::new(config.pipeline.clone())),
            source: Box::new(source),
            store: Box::new(DirectoryStore::new()),
            deployer,
            config,
        }
    }

    pub fn with_source(mut self, source: Box<dyn TableSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_estimator(mut self, estimator: Box<dyn PipelineEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_store(mut self, store: Box<dyn PipelineStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_deployer(mut self, deployer: Box<dyn ServiceDeployer>) -> Self {
        self.deployer = Some(deployer);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run every stage
    pub fn run(&self) -> Result<WorkflowReport> {
        let start = Instant::now();
        self.config.validate()?;

        let df = self.ingest()?;
        let (pipeline, metrics) = self.train(&df)?;
        self.persist(&pipeline)?;

        let sample = sample_input(&df, pipeline.label(), self.config.sample_rows)?;
        let outcome = self.score_sample(&sample)?;
        self.write_schema(&sample)?;
        let service_id = self.deploy()?;

        info!(
            rows = df.height(),
            r2 = metrics.r2,
            service_id = ?service_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Workflow finished"
        );

        Ok(WorkflowReport {
            rows: df.height(),
            columns: df.width(),
            metrics,
            model_dir: self.config.model_dir.clone(),
            schema_path: self.config.schema_path.clone(),
            sample_failed: outcome.is_failure(),
            sample_response: outcome.into_string(),
            service_id,
        })
    }

    pub fn ingest(&self) -> Result<DataFrame> {
        self.source.load_table(&self.config.data_path)
    }

    /// Fit the pipeline and score it against the same table
    pub fn train(&self, df: &DataFrame) -> Result<(TrainedPipeline, RegressionMetrics)> {
        let pipeline = self.estimator.fit(df)?;
        let metrics = evaluate(&pipeline, df, pipeline.label())?;
        info!(r2 = metrics.r2, rmse = metrics.rmse, "Pipeline evaluated on training data");
        Ok((pipeline, metrics))
    }

    pub fn persist(&self, pipeline: &TrainedPipeline) -> Result<()> {
        self.store.save(pipeline, &self.config.model_dir)
    }

    /// Run the initializer against the saved model and the handler on `sample`
    pub fn score_sample(&self, sample: &DataFrame) -> Result<ScoreOutcome> {
        let context = ScoringContext::init(self.store.as_ref(), &self.config.model_dir)?;
        let outcome = context.run(sample);
        if let ScoreOutcome::Failed(e) = &outcome {
            warn!(error = %e, "Sample scoring failed");
        }
        Ok(outcome)
    }

    pub fn write_schema(&self, sample: &DataFrame) -> Result<SchemaDocument> {
        let schema = generate_schema(&self.config.input_param, sample)?;
        schema.write(&self.config.schema_path)?;
        Ok(schema)
    }

    /// Hand the model, scoring entry and schema to the deployer; a no-op when
    /// deployment is not configured
    pub fn deploy(&self) -> Result<Option<ServiceId>> {
        let (Some(settings), Some(deployer)) = (&self.config.deployment, &self.deployer) else {
            return Ok(None);
        };

        ScoringEntry::new(&self.config.model_dir, &self.config.schema_path, &self.config.input_param)
            .write(&settings.scoring_entry)?;

        let request = DeploymentRequest {
            service_name: settings.service_name.clone(),
            model_path: self.config.model_dir.clone(),
            scoring_entry: settings.scoring_entry.clone(),
            schema_path: self.config.schema_path.clone(),
            runtime: settings.runtime.clone(),
        };
        deployer.deploy(&request).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_json() {
        let config: WorkflowConfig =
            serde_json::from_str(r#"{"data_path": "housing.csv", "pipeline": {"formula": "price ~ ."}}"#).unwrap();
        assert_eq!(config.sample_rows, 3);
        assert_eq!(config.input_param, "input_df");
        assert_eq!(config.pipeline.booster.n_estimators, 20);
        assert!(config.deployment.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = WorkflowConfig::new("housing.csv", "price");
        assert!(config.validate().is_ok());
        config.sample_rows = 0;
        assert!(matches!(config.validate(), Err(DeployError::ConfigError(_))));
    }

    #[test]
    fn test_deploy_without_settings_is_noop() {
        let workflow = Workflow::new(WorkflowConfig::new("housing.csv", "price"));
        assert_eq!(workflow.deploy().unwrap(), None);
    }

    #[test]
    fn test_missing_data_file() {
        let workflow = Workflow::new(WorkflowConfig::new("/nonexistent/housing.csv", "price"));
        assert!(matches!(workflow.run(), Err(DeployError::DataError(_))));
    }
}
