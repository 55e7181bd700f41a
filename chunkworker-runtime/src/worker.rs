//! Background worker implementation
//!
//! The worker owns one side of a channel. It loads its module, announces
//! readiness, accepts exactly one configuration payload and then runs jobs
//! strictly in arrival order until it is shut down or the channel closes.

use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use chunkworker_ipc::{
    ControllerMessage, IpcError, IpcTransport, JobExecutionResult, MessageEnvelope, WorkerError,
    WorkerMessage, WorkerState, WorkerStatus,
};

use crate::executor::{run_job, DynExecutor};
use crate::loader::{ModuleHandle, ModuleLoader, ModuleSource};

/// Worker entry point: load the module, then serve the channel until shutdown
pub async fn worker_main<T: IpcTransport>(
    worker_id: String,
    transport: T,
    loader: Arc<ModuleLoader>,
    source: ModuleSource,
) -> Result<(), WorkerError> {
    info!("Starting worker {} with module {}", worker_id, source);

    let mut worker = Worker::new(worker_id.clone(), transport);
    worker.load_module(&loader, &source).await?;
    worker.run().await?;

    info!("Worker {} shutting down", worker_id);
    Ok(())
}

pub struct Worker<T> {
    worker_id: String,
    transport: T,
    state: WorkerState,
    module: Option<ModuleHandle>,
    executor: Option<Box<dyn DynExecutor>>,
    status: WorkerStatus,
}

impl<T: IpcTransport> Worker<T> {
    pub fn new(worker_id: String, transport: T) -> Self {
        let status = WorkerStatus::new(worker_id.clone(), std::process::id());
        Self {
            worker_id,
            transport,
            state: WorkerState::Spawned,
            module: None,
            executor: None,
            status,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn status(&self) -> &WorkerStatus {
        &self.status
    }

    fn transition(&mut self, next: WorkerState) {
        if self.state != next {
            debug!("Worker {}: {} -> {}", self.worker_id, self.state, next);
        }
        self.state = next;
        self.status.state = next;
    }

    /// Load the module and announce readiness, or report the failure and close
    pub async fn load_module(
        &mut self,
        loader: &ModuleLoader,
        source: &ModuleSource,
    ) -> Result<(), WorkerError> {
        self.transition(WorkerState::Loading);

        match loader.load(source).await {
            Ok(module) => {
                let ready = ControllerMessage::Ready {
                    worker_id: self.worker_id.clone(),
                    module: module.info(),
                };
                self.module = Some(module);
                self.transition(WorkerState::Ready);
                self.send(ready).await.map_err(communication_error)
            }
            Err(e) => {
                error!("Worker {} failed to load module {}: {}", self.worker_id, source, e);
                let error = WorkerError::from(e);

                self.transition(WorkerState::Terminated);
                let _ = self
                    .send(ControllerMessage::LoadFailed {
                        error: error.clone(),
                    })
                    .await;
                let _ = self.transport.close().await;
                Err(error)
            }
        }
    }

    /// Serve messages until shutdown or channel close
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        while self.state != WorkerState::Terminated {
            match self.transport.receive::<WorkerMessage>().await {
                Ok(envelope) => {
                    self.status.update_activity();
                    debug!("Worker {} received {}", self.worker_id, envelope.message.kind());

                    if let Some(reply) = self.handle_message(envelope.message) {
                        if let Err(e) = self.send(reply).await {
                            error!("Worker {} failed to send reply: {}", self.worker_id, e);
                            if e.is_fatal() {
                                break;
                            }
                        }
                    }
                }
                Err(e) if e.is_decode_error() => {
                    warn!("Worker {} received an invalid message: {}", self.worker_id, e);
                    let reply = ControllerMessage::Error {
                        correlation_id: None,
                        error: WorkerError::MessageParseError {
                            error: e.to_string(),
                        },
                    };
                    if let Err(e) = self.send(reply).await {
                        if e.is_fatal() {
                            break;
                        }
                    }
                }
                Err(IpcError::ConnectionClosed) => {
                    info!("Worker {} channel closed", self.worker_id);
                    break;
                }
                Err(e) => {
                    error!("Worker {} failed to receive message: {}", self.worker_id, e);
                    break;
                }
            }
        }

        self.transition(WorkerState::Terminated);
        self.executor = None;
        let _ = self.transport.close().await;
        Ok(())
    }

    /// Dispatch one message; the reply, if any, is sent by the caller
    fn handle_message(&mut self, message: WorkerMessage) -> Option<ControllerMessage> {
        match message {
            WorkerMessage::Configure { payload } => Some(self.configure(payload)),

            WorkerMessage::Job {
                correlation_id,
                payload,
            } => Some(ControllerMessage::JobResult {
                correlation_id,
                result: self.execute_job(payload),
            }),

            WorkerMessage::Ping { correlation_id } => Some(ControllerMessage::Pong {
                correlation_id,
                status: self.status.clone(),
            }),

            WorkerMessage::Shutdown => {
                info!("Worker {} received shutdown signal", self.worker_id);
                self.transition(WorkerState::Terminated);
                None
            }
        }
    }

    fn configure(&mut self, payload: JsonValue) -> ControllerMessage {
        if self.executor.is_some() {
            warn!("Worker {} ignoring a second configuration", self.worker_id);
            return ControllerMessage::Error {
                correlation_id: None,
                error: WorkerError::AlreadyConfigured,
            };
        }

        let Some(module) = self.module.as_ref() else {
            return ControllerMessage::ConfigureFailed {
                error: WorkerError::ConfigurationFailed {
                    error: "no module loaded".to_string(),
                },
            };
        };

        match module.instantiate(payload) {
            Ok(executor) => {
                info!("Worker {} configured {} executor", self.worker_id, module.entry());
                self.executor = Some(executor);
                self.transition(WorkerState::Configured);
                ControllerMessage::Configured
            }
            Err(e) => {
                warn!("Worker {} rejected configuration: {}", self.worker_id, e);
                ControllerMessage::ConfigureFailed {
                    error: WorkerError::ConfigurationFailed {
                        error: e.to_string(),
                    },
                }
            }
        }
    }

    fn execute_job(&mut self, payload: JsonValue) -> JobExecutionResult {
        let started_at = Utc::now();

        let Some(mut executor) = self.executor.take() else {
            self.status.record_job(false);
            return JobExecutionResult::failure(
                WorkerError::NotConfigured.to_string(),
                Some(serde_json::json!({ "error_type": "not_configured" })),
                started_at,
                Utc::now(),
            );
        };

        self.transition(WorkerState::Executing);
        let outcome = run_job(executor.as_mut(), payload);
        self.executor = Some(executor);
        self.transition(WorkerState::Idle);

        let completed_at = Utc::now();
        let result = match outcome {
            Ok(output) => JobExecutionResult::success(output, started_at, completed_at),
            Err(e) => {
                debug!("Worker {} job failed: {}", self.worker_id, e);
                JobExecutionResult::failure(e.to_string(), Some(e.details()), started_at, completed_at)
            }
        };

        self.status.record_job(result.success);
        result
    }

    async fn send(&mut self, message: ControllerMessage) -> Result<(), IpcError> {
        self.transport.send(&MessageEnvelope::new(message)).await
    }
}

fn communication_error(e: IpcError) -> WorkerError {
    WorkerError::CommunicationError {
        error: e.to_string(),
    }
}
