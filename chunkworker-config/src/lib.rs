//! Domain-driven configuration for chunkworker
//!
//! Configuration is split by domain (worker lifecycle, module source,
//! logging), loaded from YAML, overridden from `CHUNKWORKER_*` environment
//! variables and validated per domain.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

// Re-export domain configurations
pub use domains::{
    logging::{LogFormat, LogLevel, LoggingConfig},
    module::ModuleConfig,
    worker::{BackendKind, WorkerConfig},
    ChunkWorkerConfig,
};

// Re-export utilities
pub use domains::utils::serde_duration;
