//! Foreground side of chunkworker
//!
//! This crate provides the [`Controller`], which starts background contexts
//! (a dedicated thread or a child process), performs the configure-once
//! handshake and submits jobs over the message channel.

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;

// Re-export main types
pub use backend::Backend;
pub use config::ControllerConfig;
pub use controller::{Controller, HandleState, WorkerHandle};
pub use error::ExecutionError;
