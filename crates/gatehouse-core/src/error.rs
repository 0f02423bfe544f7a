// Gatehouse Error Types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatehouseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Denied(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Event bus closed")]
    BusClosed,

    #[error("Read-only schedule entry: {0}")]
    ReadOnlyEntry(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Step failed: {0}")]
    StepFailed(String),
}

pub type Result<T> = std::result::Result<T, GatehouseError>;
