//! Kolosal Deploy - train, package and deploy a regression scoring service
//!
//! This crate automates an end-to-end model deployment workflow:
//! - Load a delimited dataset with inferred column types
//! - Fit a formula + gradient boosted trees regression pipeline and report R²
//! - Persist the pipeline to a directory, replacing any previous fit
//! - Wrap it in a scoring context (initializer + request handler)
//! - Generate the service input schema from sample rows
//! - Hand model, scoring entry and schema to the deployment CLI
//!
//! # Modules
//!
//! ## Workflow stages
//! - [`data`] - Table ingestion and JSON row conversion
//! - [`training`] - Formulas, boosted trees, metrics, pipeline
//! - [`persistence`] - Directory-backed pipeline store
//! - [`scoring`] - Initializer and request handler
//! - [`schema`] - Input schema generation
//! - [`deploy`] - Deployment CLI adapter
//! - [`workflow`] - Stage orchestration
//!
//! ## Services
//! - [`server`] - HTTP scoring service
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Workflow stages
pub mod data;
pub mod training;
pub mod persistence;
pub mod scoring;
pub mod schema;
pub mod deploy;
pub mod workflow;

// Services
pub mod server;
pub mod cli;

pub use error::{DeployError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{DeployError, Result};

    // Ingestion
    pub use crate::data::{CsvTableSource, TableSource};

    // Training
    pub use crate::training::{
        GbtPipelineEstimator, GradientBoostingConfig, PipelineEstimator, PipelineSpec, Predictor, RegressionMetrics,
        TrainedPipeline,
    };

    // Persistence
    pub use crate::persistence::{DirectoryStore, PipelineStore};

    // Scoring
    pub use crate::scoring::{ResponseMode, ScoreOutcome, ScoreResponse, ScoringContext};

    // Schema
    pub use crate::schema::{generate_schema, SchemaDocument};

    // Deployment
    pub use crate::deploy::{CliDeployer, DeploymentRequest, ServiceDeployer, ServiceId};

    // Workflow
    pub use crate::workflow::{Workflow, WorkflowConfig, WorkflowReport};
}
