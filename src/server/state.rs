//! Application state management

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::persistence::DirectoryStore;
use crate::schema::SchemaDocument;
use crate::scoring::{ScoreOutcome, ScoringContext};

use super::ServiceConfig;

/// Application state shared across handlers
pub struct AppState {
    pub config: ServiceConfig,
    pub scoring: ScoringContext,
    pub schema: Option<SchemaDocument>,
    pub started_at: DateTime<Utc>,
    requests_served: AtomicU64,
    requests_failed: AtomicU64,
}

impl AppState {
    pub fn new(config: ServiceConfig, scoring: ScoringContext, schema: Option<SchemaDocument>) -> Self {
        Self {
            config,
            scoring,
            schema,
            started_at: Utc::now(),
            requests_served: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    /// Run the initializer against `config.model_dir` and pick up the schema file if present
    pub fn load(config: ServiceConfig) -> Result<Self> {
        let scoring = ScoringContext::init(&DirectoryStore::new(), &config.model_dir)?;
        let schema = match &config.schema_path {
            Some(path) if path.is_file() => Some(SchemaDocument::read(path)?),
            Some(path) => {
                tracing::warn!(path = %path.display(), "Schema file not found, /swagger.json will be unavailable");
                None
            }
            None => None,
        };
        Ok(Self::new(config, scoring, schema))
    }

    pub fn record(&self, outcome: &ScoreOutcome) {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
        if outcome.is_failure() {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }
}
