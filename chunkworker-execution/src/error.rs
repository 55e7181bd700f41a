//! Error types for the controller side

use chunkworker_ipc::{IpcError, WorkerError};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

/// Controller errors
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("Failed to start background context: {0}")]
    Spawn(String),

    #[error("Module load failed: {message}")]
    ModuleLoad { message: String, retryable: bool },

    #[error("Worker did not become ready within {0:?}")]
    ReadyTimeout(Duration),

    #[error("Worker is already configured")]
    AlreadyConfigured,

    #[error("Worker is not configured")]
    NotConfigured,

    #[error("Executor configuration failed: {0}")]
    Configuration(String),

    #[error("Job failed: {message}")]
    JobFailed {
        message: String,
        details: Option<JsonValue>,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Channel to worker lost: {0}")]
    ChannelLost(String),

    #[error("Worker handle has been disposed")]
    Disposed,

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Worker error: {0}")]
    Worker(WorkerError),

    #[error("Unexpected message from worker: {0}")]
    UnexpectedMessage(String),
}

impl ExecutionError {
    /// Whether the same request may succeed when sent again
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::ModuleLoad { retryable, .. } => *retryable,
            ExecutionError::ReadyTimeout(_)
            | ExecutionError::Timeout(_)
            | ExecutionError::Spawn(_) => true,
            _ => false,
        }
    }

    /// Whether the handle is unusable and a new worker must be spawned
    pub fn requires_respawn(&self) -> bool {
        matches!(
            self,
            ExecutionError::ModuleLoad { .. }
                | ExecutionError::ChannelLost(_)
                | ExecutionError::Disposed
        )
    }
}

impl From<IpcError> for ExecutionError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::ConnectionClosed => ExecutionError::ChannelLost(err.to_string()),
            IpcError::WorkerError(e) => ExecutionError::Worker(e),
            other => ExecutionError::Ipc(other.to_string()),
        }
    }
}

impl From<WorkerError> for ExecutionError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::LoadFailed { error, retryable } => ExecutionError::ModuleLoad {
                message: error,
                retryable,
            },
            WorkerError::AlreadyConfigured => ExecutionError::AlreadyConfigured,
            WorkerError::NotConfigured => ExecutionError::NotConfigured,
            WorkerError::ConfigurationFailed { error } => ExecutionError::Configuration(error),
            other => ExecutionError::Worker(other),
        }
    }
}
