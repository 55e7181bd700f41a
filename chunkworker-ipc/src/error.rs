//! IPC error types

use crate::protocol::WorkerError;
use thiserror::Error;

/// IPC error types
#[derive(Debug, Error)]
pub enum IpcError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// The other end closed the channel
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    /// Timeout waiting for a message
    #[error("Timeout waiting for message")]
    Timeout,

    /// Error reported by the worker
    #[error("Worker error: {0}")]
    WorkerError(WorkerError),

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

impl IpcError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, IpcError::IoError(_) | IpcError::Timeout)
    }

    /// Check if this error ends the channel
    pub fn is_fatal(&self) -> bool {
        matches!(self, IpcError::ConnectionClosed | IpcError::IoError(_))
    }

    /// Check if the line was received but could not be understood
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            IpcError::DeserializationError(_)
                | IpcError::ProtocolVersionMismatch { .. }
                | IpcError::InvalidMessage(_)
        )
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof => {
                IpcError::ConnectionClosed
            }
            _ => IpcError::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else if err.is_data() || err.is_syntax() || err.is_eof() {
            IpcError::DeserializationError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}

impl From<WorkerError> for IpcError {
    fn from(err: WorkerError) -> Self {
        IpcError::WorkerError(err)
    }
}
