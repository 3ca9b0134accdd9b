use std::path::PathBuf;

use thiserror::Error;

use crate::enums::RunStatus;

/// Top-level error type for Discovery.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Image \"{0}\" is not allowed")]
    ImageNotAllowed(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Workspace error at {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Security error: {0}")]
    Security(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl DiscoveryError {
    /// Wrap an I/O error with the workspace path it happened on.
    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }
}

/// Convenience type alias.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DiscoveryError::Config("missing key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing key");
    }

    #[test]
    fn image_not_allowed_display() {
        let err = DiscoveryError::ImageNotAllowed("invalid_image".to_string());
        assert_eq!(err.to_string(), "Image \"invalid_image\" is not allowed");
    }

    #[test]
    fn workspace_error_names_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = DiscoveryError::workspace("/tmp/ws/results.json", io_err);
        let msg = err.to_string();
        assert!(msg.contains("/tmp/ws/results.json"));
        assert!(msg.contains("file not found"));
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DiscoveryError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn invalid_transition_display() {
        let err = DiscoveryError::InvalidTransition {
            from: RunStatus::Success,
            to: RunStatus::Failed,
        };
        assert_eq!(err.to_string(), "Invalid status transition: SUCCESS -> FAILED");
    }
}
