//! Chunk executor contract
//!
//! Executors are written against typed configuration, input and output.
//! The worker loop only ever sees the JSON-in/JSON-out [`DynExecutor`], so
//! payloads are validated at the boundary by deserialising them into the
//! executor's own types.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;

use crate::error::{ConfigurationError, JobError};

/// What a loaded module hands to its executors
#[derive(Debug, Clone)]
pub struct ModuleContext {
    name: String,
    version: String,
    resource: Option<Bytes>,
}

impl ModuleContext {
    pub fn new(name: impl Into<String>, version: impl Into<String>, resource: Option<Bytes>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            resource,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Binary resource bound to the module, if any
    pub fn resource(&self) -> Option<&Bytes> {
        self.resource.as_ref()
    }
}

/// A stateful executor built once per background context
pub trait ChunkExecutor: Sized + Send + 'static {
    type Config: DeserializeOwned;
    type Job: DeserializeOwned;
    type Output: Serialize;

    /// Module start routine, run once when the module is loaded
    fn start(module: &ModuleContext) -> Result<(), String> {
        let _ = module;
        Ok(())
    }

    /// Build the executor from its one-time configuration. No I/O.
    fn new(config: Self::Config, module: &ModuleContext) -> Result<Self, ConfigurationError>;

    /// Run one job. Must not block on external I/O.
    fn job(&mut self, input: Self::Job) -> Result<Self::Output, JobError>;
}

/// Type-erased executor held by the worker loop
pub trait DynExecutor: Send {
    fn job(&mut self, input: JsonValue) -> Result<JsonValue, JobError>;
}

struct JsonExecutor<E>(E);

impl<E: ChunkExecutor> DynExecutor for JsonExecutor<E> {
    fn job(&mut self, input: JsonValue) -> Result<JsonValue, JobError> {
        let job: E::Job =
            serde_json::from_value(input).map_err(|e| JobError::InvalidInput(e.to_string()))?;
        let output = self.0.job(job)?;
        serde_json::to_value(output).map_err(|e| JobError::Output(e.to_string()))
    }
}

/// Constructor exported by a module, looked up by entry name
pub trait ExecutorFactory: Send + Sync {
    fn entry(&self) -> &str;

    fn start(&self, module: &ModuleContext) -> Result<(), String>;

    fn create(
        &self,
        config: JsonValue,
        module: &ModuleContext,
    ) -> Result<Box<dyn DynExecutor>, ConfigurationError>;
}

/// Factory for any [`ChunkExecutor`] type
pub struct TypedExecutorFactory<E> {
    entry: String,
    _executor: PhantomData<fn() -> E>,
}

impl<E: ChunkExecutor> TypedExecutorFactory<E> {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            _executor: PhantomData,
        }
    }
}

impl<E: ChunkExecutor> ExecutorFactory for TypedExecutorFactory<E> {
    fn entry(&self) -> &str {
        &self.entry
    }

    fn start(&self, module: &ModuleContext) -> Result<(), String> {
        E::start(module)
    }

    fn create(
        &self,
        config: JsonValue,
        module: &ModuleContext,
    ) -> Result<Box<dyn DynExecutor>, ConfigurationError> {
        let config: E::Config = serde_json::from_value(config)
            .map_err(|e| ConfigurationError::InvalidPayload(e.to_string()))?;
        let executor = E::new(config, module)?;
        Ok(Box::new(JsonExecutor(executor)))
    }
}

/// Run one job, turning a panic into [`JobError::Panicked`]
pub fn run_job(executor: &mut dyn DynExecutor, input: JsonValue) -> Result<JsonValue, JobError> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| executor.job(input))) {
        Ok(result) => result,
        Err(panic) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
