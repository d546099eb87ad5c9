//! Pipeline persistence
//!
//! A saved pipeline is a directory holding `manifest.json` and
//! `pipeline.json`. Saving to an existing location replaces it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{DeployError, Result};
use crate::training::TrainedPipeline;

/// Current on-disk layout version
pub const FORMAT_VERSION: u32 = 1;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const PIPELINE_FILE: &str = "pipeline.json";

/// Saves and restores trained pipelines
pub trait PipelineStore: Send + Sync {
    fn save(&self, pipeline: &TrainedPipeline, location: &Path) -> Result<()>;
    fn load(&self, location: &Path) -> Result<TrainedPipeline>;
}

/// Summary written next to the serialized pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub label: String,
    pub input_columns: Vec<String>,
    pub saved_at: DateTime<Utc>,
    pub crate_version: String,
}

impl Manifest {
    fn for_pipeline(pipeline: &TrainedPipeline) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            label: pipeline.label().to_string(),
            input_columns: pipeline.inputs().iter().map(|i| i.name.clone()).collect(),
            saved_at: Utc::now(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Stores each pipeline in its own directory
#[derive(Debug, Clone, Default)]
pub struct DirectoryStore;

impl DirectoryStore {
    pub fn new() -> Self {
        Self
    }

    /// Read only the manifest of a saved pipeline
    pub fn read_manifest(&self, location: &Path) -> Result<Manifest> {
        let path = location.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(DeployError::PersistenceError(format!(
                "No saved pipeline at {} (missing {})",
                location.display(),
                MANIFEST_FILE
            )));
        }
        let manifest: Manifest = serde_json::from_str(&fs::read_to_string(&path)?)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(DeployError::PersistenceError(format!(
                "Unsupported format version {} (expected {})",
                manifest.format_version, FORMAT_VERSION
            )));
        }
        Ok(manifest)
    }
}

impl PipelineStore for DirectoryStore {
    fn save(&self, pipeline: &TrainedPipeline, location: &Path) -> Result<()> {
        if location.exists() {
            debug!(path = %location.display(), "Removing previous pipeline");
            if location.is_dir() {
                fs::remove_dir_all(location)?;
            } else {
                fs::remove_file(location)?;
            }
        }
        fs::create_dir_all(location)?;

        let manifest = Manifest::for_pipeline(pipeline);
        fs::write(location.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;
        fs::write(location.join(PIPELINE_FILE), serde_json::to_string(pipeline)?)?;

        info!(path = %location.display(), label = %manifest.label, "Pipeline saved");
        Ok(())
    }

    fn load(&self, location: &Path) -> Result<TrainedPipeline> {
        let manifest = self.read_manifest(location)?;

        let path = location.join(PIPELINE_FILE);
        if !path.is_file() {
            return Err(DeployError::PersistenceError(format!(
                "Missing {} in {}",
                PIPELINE_FILE,
                location.display()
            )));
        }
        let pipeline: TrainedPipeline = serde_json::from_str(&fs::read_to_string(&path)?)
            .map_err(|e| DeployError::PersistenceError(format!("Corrupt {}: {}", PIPELINE_FILE, e)))?;

        if pipeline.label() != manifest.label {
            return Err(DeployError::PersistenceError(format!(
                "Manifest label '{}' does not match pipeline label '{}'",
                manifest.label,
                pipeline.label()
            )));
        }

        info!(path = %location.display(), saved_at = %manifest.saved_at, "Pipeline loaded");
        Ok(pipeline)
    }
}
