//! Error types for rust-lwm2m

use thiserror::Error;

/// Main error type for LwM2M device-management operations
#[derive(Debug, Error)]
pub enum Lwm2mError {
    /// Validation failure (maps to BAD_REQUEST)
    #[error("{0}")]
    BadRequest(String),

    /// Addressed node is absent from the client's tree (maps to NOT_FOUND)
    #[error("{0}")]
    NotFound(String),

    /// Operation forbidden by the resource access mode (maps to METHOD_NOT_ALLOWED)
    #[error("{0}")]
    MethodNotAllowed(String),

    /// Unexpected failure, including unsupported device features
    /// (maps to INTERNAL_SERVER_ERROR)
    #[error("{0}")]
    Internal(String),

    /// IO error (profile file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for LwM2M operations
pub type Result<T> = std::result::Result<T, Lwm2mError>;
