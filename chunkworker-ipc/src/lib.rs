//! Inter-context communication for chunkworker
//!
//! This crate provides the message protocol and transport abstractions used
//! between a controller and the background context that hosts a chunk
//! executor. Every message travels as one JSON document per line inside a
//! versioned [`MessageEnvelope`].

pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{
    ControllerMessage, JobExecutionResult, MessageEnvelope, ModuleInfo, WorkerError,
    WorkerMessage, WorkerState, WorkerStatus, IPC_PROTOCOL_VERSION,
};
pub use transport::{
    memory_pair, ChildProcessTransport, IpcTransport, MemoryTransport, MessageReader,
    MessageWriter, StdioTransport, StreamTransport,
};
