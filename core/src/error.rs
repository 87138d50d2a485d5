//! Shared error type for the Vigil workspace.
use serde::Serialize;

/// Top-level error type for the engine and its collaborators.
///
/// Transport code maps these variants onto HTTP status codes at the
/// boundary; inside the engine they are ordinary `Result` values.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VigilError {
    /// Stable machine-readable tag, used in structured logs and JSON
    /// error bodies.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VigilError::Unauthorized(_) => ErrorKind::Unauthorized,
            VigilError::Conflict(_) => ErrorKind::Conflict,
            VigilError::NotFound(_) => ErrorKind::NotFound,
            VigilError::Invalid(_) => ErrorKind::Invalid,
            VigilError::InsufficientData(_) => ErrorKind::InsufficientData,
            VigilError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            VigilError::Timeout(_) => ErrorKind::Timeout,
            VigilError::Storage(_) | VigilError::Io(_) | VigilError::Serialization(_) => {
                ErrorKind::Storage
            }
            VigilError::Config(_) | VigilError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Coarse error classification carried across the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Conflict,
    NotFound,
    Invalid,
    InsufficientData,
    ModelUnavailable,
    Timeout,
    Storage,
    Internal,
}

pub type Result<T> = std::result::Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            VigilError::Unauthorized("bad token".into()).kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            VigilError::Conflict("username taken".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            VigilError::Storage("db locked".into()).kind(),
            ErrorKind::Storage
        );
        assert_eq!(
            VigilError::Io(std::io::Error::other("disk")).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn test_error_display() {
        let err = VigilError::NotFound("session 42".into());
        assert_eq!(err.to_string(), "not found: session 42");
    }
}
