//! Controller settings and their construction from the configuration domains

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chunkworker_config::{BackendKind, ChunkWorkerConfig};
use chunkworker_runtime::{ModuleLoader, ModuleRegistry, ModuleSource};

use crate::backend::Backend;
use crate::error::ExecutionError;

/// Settings for one controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Module every spawned worker loads
    pub module: ModuleSource,
    pub ready_timeout: Duration,
    pub configure_timeout: Duration,
    pub job_timeout: Option<Duration>,
    /// Jobs allowed in flight per worker; further submits wait for a slot
    pub max_in_flight: Option<usize>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            module: ModuleSource::self_initializing("builtin:terrain"),
            ready_timeout: Duration::from_secs(30),
            configure_timeout: Duration::from_secs(30),
            job_timeout: None,
            max_in_flight: None,
        }
    }
}

impl ControllerConfig {
    pub fn new(module: ModuleSource) -> Self {
        Self {
            module,
            ..Default::default()
        }
    }

    pub fn from_config(config: &ChunkWorkerConfig) -> Self {
        Self {
            module: ModuleSource::from_locators(
                config.module.code.clone(),
                config.module.binary.clone(),
            ),
            ready_timeout: config.worker.ready_timeout,
            configure_timeout: config.worker.configure_timeout,
            job_timeout: config.worker.job_timeout,
            max_in_flight: config.worker.max_in_flight,
        }
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }
}

impl Backend {
    /// Build the configured backend. The thread backend instantiates modules
    /// from `registry`; the process backend defaults to the current executable
    /// and passes the worker log level on its command line.
    pub fn from_config(
        config: &ChunkWorkerConfig,
        registry: Arc<ModuleRegistry>,
    ) -> Result<Self, ExecutionError> {
        match config.worker.backend {
            BackendKind::Thread => Ok(Backend::Thread {
                loader: Arc::new(ModuleLoader::new(registry)),
                channel_buffer_bytes: config.worker.channel_buffer_bytes,
            }),
            BackendKind::Process => {
                let program = match config.worker.program {
                    Some(ref program) => PathBuf::from(program),
                    None => std::env::current_exe().map_err(|e| {
                        ExecutionError::Spawn(format!("cannot locate worker executable: {}", e))
                    })?,
                };

                let mut args = config.worker.program_args.clone();
                args.push("--log-level".to_string());
                args.push(config.logging.effective_worker_level().to_string());

                Ok(Backend::Process { program, args })
            }
        }
    }
}
