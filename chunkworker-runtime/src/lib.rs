//! Background side of chunkworker
//!
//! A background context loads one executable module, waits for a single
//! configuration payload, builds a chunk executor from it and then answers
//! job requests until its controller shuts it down.

pub mod error;
pub mod executor;
pub mod loader;
pub mod registry;
pub mod terrain;
pub mod worker;

// Re-export commonly used types
pub use error::{ConfigurationError, JobError, ModuleLoadError};
pub use executor::{
    run_job, ChunkExecutor, DynExecutor, ExecutorFactory, ModuleContext, TypedExecutorFactory,
};
pub use loader::{LinkVariant, ModuleHandle, ModuleLoader, ModuleLocator, ModuleManifest, ModuleSource};
pub use registry::ModuleRegistry;
pub use terrain::{TerrainExecutor, TERRAIN_ENTRY};
pub use worker::{worker_main, Worker};
