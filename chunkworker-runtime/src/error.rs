//! Runtime error types

use chunkworker_ipc::WorkerError;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Fetching or instantiating an executable module failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModuleLoadError {
    #[error("Failed to fetch {locator}: {reason}")]
    Fetch { locator: String, reason: String },

    #[error("Unsupported module locator: {0}")]
    UnsupportedLocator(String),

    #[error("Invalid module manifest at {locator}: {reason}")]
    Manifest { locator: String, reason: String },

    #[error("Invalid module resource: {0}")]
    Resource(String),

    #[error("Resource checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Module entry '{0}' is not registered")]
    UnknownEntry(String),

    #[error("Module '{module}' failed to start: {reason}")]
    Start { module: String, reason: String },
}

impl ModuleLoadError {
    /// Only fetch failures can succeed on a fresh attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModuleLoadError::Fetch { .. })
    }
}

impl From<ModuleLoadError> for WorkerError {
    fn from(err: ModuleLoadError) -> Self {
        WorkerError::LoadFailed {
            retryable: err.is_retryable(),
            error: err.to_string(),
        }
    }
}

/// The configuration payload could not build an executor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Invalid configuration payload: {0}")]
    InvalidPayload(String),

    #[error("Configuration rejected: {0}")]
    Rejected(String),
}

/// A single job failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("Invalid job input: {0}")]
    InvalidInput(String),

    #[error("{message}")]
    Failed {
        message: String,
        details: Option<JsonValue>,
    },

    #[error("Job output could not be serialized: {0}")]
    Output(String),

    #[error("Executor panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed {
            message: message.into(),
            details: None,
        }
    }

    pub fn failed_with(message: impl Into<String>, details: JsonValue) -> Self {
        JobError::Failed {
            message: message.into(),
            details: Some(details),
        }
    }

    /// Structured details sent back alongside the error message
    pub fn details(&self) -> JsonValue {
        let kind = match self {
            JobError::InvalidInput(_) => "invalid_input",
            JobError::Failed { .. } => "failed",
            JobError::Output(_) => "output",
            JobError::Panicked(_) => "panicked",
        };

        match self {
            JobError::Failed {
                details: Some(details),
                ..
            } => serde_json::json!({ "error_type": kind, "details": details }),
            _ => serde_json::json!({ "error_type": kind }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_into_worker_error() {
        let err = ModuleLoadError::Fetch {
            locator: "https://cdn.example.com/terrain.json".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(err.is_retryable());

        match WorkerError::from(err) {
            WorkerError::LoadFailed { error, retryable } => {
                assert!(retryable);
                assert!(error.contains("connection refused"));
            }
            other => panic!("unexpected worker error: {:?}", other),
        }

        assert!(!ModuleLoadError::UnknownEntry("voxel".to_string()).is_retryable());
    }

    #[test]
    fn test_job_error_details() {
        let err = JobError::failed_with("out of bounds", serde_json::json!({"x": 1}));
        assert_eq!(err.to_string(), "out of bounds");
        assert_eq!(err.details()["error_type"], "failed");
        assert_eq!(err.details()["details"]["x"], 1);

        assert_eq!(JobError::Panicked("boom".into()).details()["error_type"], "panicked");
    }
}
