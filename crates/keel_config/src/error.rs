//! Error types for configuration handling.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment table is incomplete: missing stage {0}")]
    MissingStage(String),

    #[error("Environment table violates tier policy for {stage}: {message}")]
    TierViolation { stage: String, message: String },

    #[error("Invalid deployment manifest: {0}")]
    InvalidManifest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
