//! Error types for orchestration.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while composing, synthesizing or provisioning a stage.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] keel_config::ConfigError),

    #[error("Construct error: {0}")]
    Construct(#[from] keel_constructs::ConstructError),

    #[error("Dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Unknown stack: {0}")]
    UnknownStack(String),

    #[error("Duplicate stack: {0}")]
    DuplicateStack(String),

    #[error("Stack {consumer} consumes outputs of {producer} without declaring a dependency on it")]
    UndeclaredDependency { consumer: String, producer: String },

    #[error("Stack {consumer} imports {export}, which no stack of its stage exports")]
    UnknownImport { consumer: String, export: String },

    #[error("Stack {consumer} references {producer} from another stage")]
    CrossStageReference { consumer: String, producer: String },

    #[error("Workload is bound to undeclared database: {0}")]
    UnknownDatabase(String),

    #[error("Duplicate export name: {0}")]
    DuplicateExport(String),

    #[error("Duplicate stage: {0}")]
    DuplicateStage(String),

    #[error("Provisioning failed for stack {stack}: {message}")]
    Provisioning { stack: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
