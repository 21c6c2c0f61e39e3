//! Error types for soak.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort the orchestrator.
///
/// Everything else (unit failures, best-effort probes, notification
/// delivery) is absorbed into run artifacts and the exit code.
#[derive(Debug, Error)]
pub enum SoakError {
    /// A results directory could not be created.
    #[error("cannot create results directory {path}: {source}")]
    ResultsDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The test-unit executable could not be launched.
    #[error("cannot launch test unit '{unit}': {source}")]
    Spawn {
        unit: String,
        source: std::io::Error,
    },

    /// Invalid configuration or invocation.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error on the critical path.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file parse error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for soak operations.
pub type Result<T> = std::result::Result<T, SoakError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_dir_error_names_the_path() {
        let err = SoakError::ResultsDir {
            path: PathBuf::from("/nope/results"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/nope/results"));
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SoakError = io_err.into();
        assert!(matches!(err, SoakError::Io(_)));
    }
}
