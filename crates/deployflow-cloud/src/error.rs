//! Cloud resource lifecycle error types

use thiserror::Error;

/// Errors raised by resource lifecycle operations
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Template validation failed for {template}: {reason}")]
    TemplateInvalid { template: String, reason: String },

    #[error("Operation on {name} reached terminal failure status {status}")]
    OperationFailed { name: String, status: String },

    #[error("Operation on {name} did not reach a terminal state within {attempts} attempts")]
    OperationTimedOut { name: String, attempts: u32 },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Cloud API error: {0}")]
    Api(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
