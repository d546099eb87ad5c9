//! Error types for the deployment workflow

use thiserror::Error;

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, DeployError>;

/// Main error type for the workflow stages
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Formula error: {0}")]
    FormulaError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Deployment error: {0}")]
    DeploymentError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<polars::error::PolarsError> for DeployError {
    fn from(err: polars::error::PolarsError) -> Self {
        DeployError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for DeployError {
    fn from(err: serde_json::Error) -> Self {
        DeployError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for DeployError {
    fn from(err: ndarray::ShapeError) -> Self {
        DeployError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeployError::FeatureNotFound("bedrooms".to_string());
        assert_eq!(err.to_string(), "Feature not found: bedrooms");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DeployError = io_err.into();
        assert!(matches!(err, DeployError::IoError(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: DeployError = json_err.into();
        assert!(matches!(err, DeployError::SerializationError(_)));
    }
}
