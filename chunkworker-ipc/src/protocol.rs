//! Protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

/// Protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Messages sent from the controller to a background worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// One-time executor configuration
    Configure { payload: JsonValue },

    /// Run one job against the configured executor
    Job {
        correlation_id: Uuid,
        payload: JsonValue,
    },

    /// Health check ping
    Ping { correlation_id: Uuid },

    /// Shutdown signal
    Shutdown,
}

impl WorkerMessage {
    /// Short name of the message variant, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Configure { .. } => "configure",
            WorkerMessage::Job { .. } => "job",
            WorkerMessage::Ping { .. } => "ping",
            WorkerMessage::Shutdown => "shutdown",
        }
    }
}

/// Messages sent from a background worker to its controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    /// Module loaded; the worker now accepts its configuration
    Ready { worker_id: String, module: ModuleInfo },

    /// Module loading failed; the worker exits without becoming ready
    LoadFailed { error: WorkerError },

    /// Executor constructed from the configuration payload
    Configured,

    /// Configuration payload was rejected; the worker is still unconfigured
    ConfigureFailed { error: WorkerError },

    /// Result of one job
    JobResult {
        correlation_id: Uuid,
        result: JobExecutionResult,
    },

    /// Health check response
    Pong {
        correlation_id: Uuid,
        status: WorkerStatus,
    },

    /// Protocol-level error
    Error {
        correlation_id: Option<Uuid>,
        error: WorkerError,
    },
}

/// Description of the module a worker has loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub version: String,
    pub entry: String,
    /// `self_initializing` or `externally_linked`
    pub variant: String,
    pub resource_bytes: usize,
}

/// Job execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionResult {
    pub success: bool,
    pub output: Option<JsonValue>,
    pub error_message: Option<String>,
    pub error_details: Option<JsonValue>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl JobExecutionResult {
    /// Create a successful result
    pub fn success(
        output: JsonValue,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: true,
            output: Some(output),
            error_message: None,
            error_details: None,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
        }
    }

    /// Create a failed result
    pub fn failure(
        error: impl Into<String>,
        details: Option<JsonValue>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: false,
            output: None,
            error_message: Some(error.into()),
            error_details: details,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
        }
    }
}

/// Lifecycle of a background worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Spawned,
    Loading,
    Ready,
    Configured,
    Executing,
    Idle,
    Terminated,
}

impl WorkerState {
    /// Whether an executor exists in this state
    pub fn is_configured(&self) -> bool {
        matches!(
            self,
            WorkerState::Configured | WorkerState::Executing | WorkerState::Idle
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Spawned => "spawned",
            WorkerState::Loading => "loading",
            WorkerState::Ready => "ready",
            WorkerState::Configured => "configured",
            WorkerState::Executing => "executing",
            WorkerState::Idle => "idle",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Worker status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub pid: u32,
    pub state: WorkerState,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub jobs_executed: u64,
    pub jobs_failed: u64,
}

impl WorkerStatus {
    /// Create a new worker status
    pub fn new(worker_id: String, pid: u32) -> Self {
        let now = Utc::now();
        Self {
            worker_id,
            pid,
            state: WorkerState::Spawned,
            started_at: now,
            last_activity: now,
            jobs_executed: 0,
            jobs_failed: 0,
        }
    }

    /// Update activity timestamp
    pub fn update_activity(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Record a finished job
    pub fn record_job(&mut self, success: bool) {
        self.jobs_executed += 1;
        if !success {
            self.jobs_failed += 1;
        }
        self.update_activity();
    }
}

/// Worker error types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "error_type", rename_all = "snake_case")]
pub enum WorkerError {
    /// Module could not be fetched or instantiated
    LoadFailed { error: String, retryable: bool },

    /// A second configuration payload arrived
    AlreadyConfigured,

    /// A job arrived before the executor was configured
    NotConfigured,

    /// The executor rejected its configuration payload
    ConfigurationFailed { error: String },

    /// Communication error
    CommunicationError { error: String },

    /// Message parse error
    MessageParseError { error: String },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::LoadFailed { error, .. } => write!(f, "Module load failed: {}", error),
            WorkerError::AlreadyConfigured => write!(f, "Worker is already configured"),
            WorkerError::NotConfigured => write!(f, "Worker not configured"),
            WorkerError::ConfigurationFailed { error } => {
                write!(f, "Executor configuration failed: {}", error)
            }
            WorkerError::CommunicationError { error } => {
                write!(f, "Communication error: {}", error)
            }
            WorkerError::MessageParseError { error } => {
                write!(f, "Message parse error: {}", error)
            }
        }
    }
}

impl std::error::Error for WorkerError {}

/// Message envelope for all communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
