//! Error types for the authorization core

use thiserror::Error;

use crate::backend::BackendError;

/// Authorization core errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Policy document failed to load or validate
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Configuration is missing or inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Credential/policy backend failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
