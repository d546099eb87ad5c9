//! Scoring entry point
//!
//! [`ScoringContext::init`] is the initializer: it loads a persisted pipeline
//! once. [`ScoringContext::run`] is the request handler: it never fails and
//! turns errors into strings so the hosting service always has something to
//! send back.

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{DeployError, Result};
use crate::persistence::PipelineStore;
use crate::training::Predictor;

/// Result of one scoring request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreOutcome {
    /// Comma-joined predictions, one per input row
    Predictions(String),
    /// Stringified error
    Failed(String),
}

impl ScoreOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ScoreOutcome::Failed(_))
    }

    /// The payload string regardless of variant
    pub fn into_string(self) -> String {
        match self {
            ScoreOutcome::Predictions(s) | ScoreOutcome::Failed(s) => s,
        }
    }
}

/// Loaded model shared by every request
#[derive(Clone)]
pub struct ScoringContext {
    predictor: Arc<dyn Predictor>,
}

impl fmt::Debug for ScoringContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoringContext")
            .field("input_columns", &self.predictor.input_columns())
            .finish()
    }
}

impl ScoringContext {
    /// Load the pipeline stored at `location`
    pub fn init(store: &dyn PipelineStore, location: &Path) -> Result<Self> {
        let pipeline = store.load(location)?;
        debug!(path = %location.display(), "Scoring context initialized");
        Ok(Self {
            predictor: Arc::new(pipeline),
        })
    }

    pub fn from_predictor(predictor: Arc<dyn Predictor>) -> Self {
        Self { predictor }
    }

    pub fn input_columns(&self) -> Vec<String> {
        self.predictor.input_columns()
    }

    /// Predictions in row order
    pub fn score(&self, df: &DataFrame) -> Result<Vec<f64>> {
        Ok(self.predictor.predict(df)?.to_vec())
    }

    /// Score `df`, rendering either the predictions or the error as text
    pub fn run(&self, df: &DataFrame) -> ScoreOutcome {
        match self.score(df) {
            Ok(predictions) => ScoreOutcome::Predictions(render_predictions(&predictions)),
            Err(e) => {
                warn!(error = %e, "Scoring request failed");
                ScoreOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Join predictions with commas; whole numbers keep one decimal (`3.0`)
pub fn render_predictions(predictions: &[f64]) -> String {
    predictions
        .iter()
        .map(|p| format!("{:?}", p))
        .collect::<Vec<_>>()
        .join(",")
}

/// How failures appear in the response body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Errors are returned as the `result` string, indistinguishable by shape
    #[default]
    Compatible,
    /// Errors go in a separate `error` field with a null `result`
    Discriminated,
}

impl FromStr for ResponseMode {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "compatible" => Ok(ResponseMode::Compatible),
            "discriminated" => Ok(ResponseMode::Discriminated),
            other => Err(DeployError::ConfigError(format!("Unknown response mode '{}'", other))),
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::Compatible => write!(f, "compatible"),
            ResponseMode::Discriminated => write!(f, "discriminated"),
        }
    }
}

/// JSON body returned for a scoring request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl ScoreResponse {
    pub fn from_outcome(outcome: ScoreOutcome, mode: ResponseMode) -> Self {
        match (outcome, mode) {
            (ScoreOutcome::Predictions(s), _) | (ScoreOutcome::Failed(s), ResponseMode::Compatible) => Self {
                result: Some(s),
                error: None,
            },
            (ScoreOutcome::Failed(e), ResponseMode::Discriminated) => Self {
                result: None,
                error: Some(e),
            },
        }
    }
}
