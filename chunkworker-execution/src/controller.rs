//! Controller and worker handles
//!
//! A [`Controller`] spawns background contexts; each one is owned by a
//! [`WorkerHandle`]. The handle runs a reader task that routes every inbound
//! message to the request waiting for it, keyed by correlation id, so any
//! number of jobs may be in flight on one channel.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chunkworker_ipc::{
    ControllerMessage, IpcError, JobExecutionResult, MessageEnvelope, ModuleInfo, WorkerError,
    WorkerMessage, WorkerStatus,
};

use crate::backend::{Backend, BackgroundContext, BoxedReader, BoxedWriter, Launched};
use crate::config::ControllerConfig;
use crate::error::ExecutionError;

const SHUTDOWN_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Controller's view of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Module loaded, waiting for the configuration payload
    Ready,
    /// Configuration sent, acknowledgement pending
    Configuring,
    Configured,
    Terminated,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleState::Ready => "ready",
            HandleState::Configuring => "configuring",
            HandleState::Configured => "configured",
            HandleState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

enum Reply {
    Job(JobExecutionResult),
    Pong(WorkerStatus),
}

type PendingMap = HashMap<Uuid, oneshot::Sender<Result<Reply, ExecutionError>>>;

/// State shared between a handle and its reader task
struct Shared {
    state: HandleState,
    cause: Option<ExecutionError>,
    pending: PendingMap,
    configure_waiter: Option<oneshot::Sender<Result<(), ExecutionError>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: HandleState::Ready,
            cause: None,
            pending: HashMap::new(),
            configure_waiter: None,
        }
    }

    fn check_live(&self) -> Result<(), ExecutionError> {
        if self.state == HandleState::Terminated {
            Err(self.cause.clone().unwrap_or(ExecutionError::Disposed))
        } else {
            Ok(())
        }
    }

    /// Mark terminated and fail every waiting request with `cause`
    fn terminate(&mut self, cause: ExecutionError) {
        self.state = HandleState::Terminated;
        self.cause = Some(cause.clone());

        for (_, waiter) in self.pending.drain() {
            let _ = waiter.send(Err(cause.clone()));
        }
        if let Some(waiter) = self.configure_waiter.take() {
            let _ = waiter.send(Err(cause));
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawns workers with one configuration and backend
#[derive(Debug, Clone)]
pub struct Controller {
    config: ControllerConfig,
    backend: Backend,
}

impl Controller {
    pub fn new(config: ControllerConfig, backend: Backend) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Start a background context and wait until its module is loaded
    pub async fn spawn(&self) -> Result<WorkerHandle, ExecutionError> {
        let worker_id = format!("worker-{}", Uuid::new_v4().simple());
        info!(
            "Spawning {} worker {} for {}",
            self.backend.name(),
            worker_id,
            self.config.module
        );

        let Launched {
            mut reader,
            writer,
            mut context,
        } = self.backend.launch(&worker_id, &self.config.module)?;

        let outcome = tokio::time::timeout(self.config.ready_timeout, wait_ready(&mut reader)).await;
        let module = match outcome {
            Ok(Ok(module)) => module,
            Ok(Err(e)) => {
                warn!("Worker {} failed to start: {}", worker_id, e);
                drop((reader, writer));
                context.terminate().await;
                return Err(e);
            }
            Err(_) => {
                warn!("Worker {} not ready after {:?}", worker_id, self.config.ready_timeout);
                drop((reader, writer));
                context.terminate().await;
                return Err(ExecutionError::ReadyTimeout(self.config.ready_timeout));
            }
        };

        info!(
            "Worker {} ready with module {} v{} ({})",
            worker_id, module.name, module.version, module.variant
        );
        Ok(WorkerHandle::start(
            worker_id,
            module,
            self.config.clone(),
            reader,
            writer,
            context,
        ))
    }
}

async fn wait_ready(reader: &mut BoxedReader) -> Result<ModuleInfo, ExecutionError> {
    loop {
        match reader.receive::<ControllerMessage>().await {
            Ok(envelope) => {
                return match envelope.message {
                    ControllerMessage::Ready { module, .. } => Ok(module),
                    ControllerMessage::LoadFailed { error } => Err(error.into()),
                    other => Err(ExecutionError::UnexpectedMessage(format!(
                        "{:?} before readiness",
                        other
                    ))),
                };
            }
            Err(e) if e.is_decode_error() => {
                warn!("Ignoring invalid message before readiness: {}", e);
            }
            Err(IpcError::ConnectionClosed) => {
                return Err(ExecutionError::ModuleLoad {
                    message: "worker exited before signalling readiness".to_string(),
                    retryable: false,
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Owner of one background context
pub struct WorkerHandle {
    id: String,
    module: ModuleInfo,
    pid: Option<u32>,
    config: ControllerConfig,
    shared: Arc<Mutex<Shared>>,
    writer: AsyncMutex<BoxedWriter>,
    slots: Option<Semaphore>,
    reader_task: JoinHandle<()>,
    context: AsyncMutex<BackgroundContext>,
    disposed: AtomicBool,
}

impl WorkerHandle {
    fn start(
        id: String,
        module: ModuleInfo,
        config: ControllerConfig,
        reader: BoxedReader,
        writer: BoxedWriter,
        context: BackgroundContext,
    ) -> Self {
        let shared = Arc::new(Mutex::new(Shared::new()));
        let reader_task = tokio::spawn(read_loop(id.clone(), reader, shared.clone()));

        Self {
            pid: context.pid(),
            slots: config.max_in_flight.map(Semaphore::new),
            id,
            module,
            config,
            shared,
            writer: AsyncMutex::new(writer),
            reader_task,
            context: AsyncMutex::new(context),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Module the worker reported in its readiness signal
    pub fn module(&self) -> &ModuleInfo {
        &self.module
    }

    /// Worker process id, process backend only
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> HandleState {
        lock(&self.shared).state
    }

    /// Requests sent and not yet answered
    pub fn in_flight(&self) -> usize {
        lock(&self.shared).pending.len()
    }

    /// Send the one-time configuration payload and wait for the acknowledgement
    pub async fn configure(&self, payload: JsonValue) -> Result<(), ExecutionError> {
        let waiter = {
            let mut shared = lock(&self.shared);
            shared.check_live()?;
            if shared.state != HandleState::Ready {
                return Err(ExecutionError::AlreadyConfigured);
            }

            let (tx, rx) = oneshot::channel();
            shared.configure_waiter = Some(tx);
            shared.state = HandleState::Configuring;
            rx
        };

        if let Err(e) = self.send(WorkerMessage::Configure { payload }).await {
            let mut shared = lock(&self.shared);
            if shared.state == HandleState::Configuring {
                shared.state = HandleState::Ready;
                shared.configure_waiter = None;
            }
            return Err(e);
        }

        match tokio::time::timeout(self.config.configure_timeout, waiter).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.termination_error()),
            // The worker may still acknowledge; the handle stays Configuring
            Err(_) => Err(ExecutionError::Timeout(self.config.configure_timeout)),
        }
    }

    pub async fn configure_with<C: Serialize>(&self, config: &C) -> Result<(), ExecutionError> {
        let payload = serde_json::to_value(config)
            .map_err(|e| ExecutionError::Ipc(format!("invalid configuration payload: {}", e)))?;
        self.configure(payload).await
    }

    /// Run one job and return its output
    pub async fn submit(&self, payload: JsonValue) -> Result<JsonValue, ExecutionError> {
        self.ensure_configured()?;

        let _permit = match self.slots {
            Some(ref slots) => Some(
                slots
                    .acquire()
                    .await
                    .map_err(|_| self.termination_error())?,
            ),
            None => None,
        };

        let correlation_id = Uuid::new_v4();
        let message = WorkerMessage::Job {
            correlation_id,
            payload,
        };

        match self
            .request(correlation_id, message, true, self.config.job_timeout)
            .await?
        {
            Reply::Job(result) => job_output(result),
            Reply::Pong(_) => Err(ExecutionError::UnexpectedMessage(
                "pong in reply to a job".to_string(),
            )),
        }
    }

    /// Typed variant of [`submit`](Self::submit)
    pub async fn submit_job<J, O>(&self, job: &J) -> Result<O, ExecutionError>
    where
        J: Serialize,
        O: DeserializeOwned,
    {
        let payload = serde_json::to_value(job)
            .map_err(|e| ExecutionError::Ipc(format!("invalid job payload: {}", e)))?;
        let output = self.submit(payload).await?;
        serde_json::from_value(output).map_err(|e| {
            ExecutionError::UnexpectedMessage(format!("job output has an unexpected shape: {}", e))
        })
    }

    pub async fn ping(&self) -> Result<WorkerStatus, ExecutionError> {
        let correlation_id = Uuid::new_v4();
        let message = WorkerMessage::Ping { correlation_id };

        match self
            .request(correlation_id, message, false, Some(self.config.ready_timeout))
            .await?
        {
            Reply::Pong(status) => Ok(status),
            Reply::Job(_) => Err(ExecutionError::UnexpectedMessage(
                "job result in reply to a ping".to_string(),
            )),
        }
    }

    /// Shut the worker down. Every waiting request fails with `Disposed`, as
    /// does every later call. Calling it again does nothing.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Disposing worker {}", self.id);
        lock(&self.shared).terminate(ExecutionError::Disposed);
        if let Some(ref slots) = self.slots {
            slots.close();
        }

        // A submit stuck on a full channel holds the writer; don't wait on it
        match tokio::time::timeout(SHUTDOWN_SEND_TIMEOUT, self.writer.lock()).await {
            Ok(mut writer) => {
                let shutdown = MessageEnvelope::new(WorkerMessage::Shutdown);
                match tokio::time::timeout(SHUTDOWN_SEND_TIMEOUT, writer.send(&shutdown)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("Worker {} shutdown not delivered: {}", self.id, e),
                    Err(_) => debug!("Worker {} shutdown send timed out", self.id),
                }
                let _ = tokio::time::timeout(SHUTDOWN_SEND_TIMEOUT, writer.close()).await;
            }
            Err(_) => debug!("Worker {} writer busy, skipping shutdown message", self.id),
        }

        self.reader_task.abort();
        self.context.lock().await.terminate().await;
        debug!("Worker {} disposed", self.id);
    }

    fn ensure_configured(&self) -> Result<(), ExecutionError> {
        let shared = lock(&self.shared);
        shared.check_live()?;
        if shared.state == HandleState::Configured {
            Ok(())
        } else {
            Err(ExecutionError::NotConfigured)
        }
    }

    fn termination_error(&self) -> ExecutionError {
        lock(&self.shared)
            .cause
            .clone()
            .unwrap_or_else(|| ExecutionError::ChannelLost("reply channel dropped".to_string()))
    }

    async fn request(
        &self,
        correlation_id: Uuid,
        message: WorkerMessage,
        require_configured: bool,
        timeout: Option<Duration>,
    ) -> Result<Reply, ExecutionError> {
        let rx = {
            let mut shared = lock(&self.shared);
            shared.check_live()?;
            if require_configured && shared.state != HandleState::Configured {
                return Err(ExecutionError::NotConfigured);
            }

            let (tx, rx) = oneshot::channel();
            shared.pending.insert(correlation_id, tx);
            rx
        };

        if let Err(e) = self.send(message).await {
            lock(&self.shared).pending.remove(&correlation_id);
            return Err(e);
        }

        let reply = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    lock(&self.shared).pending.remove(&correlation_id);
                    warn!(
                        "Request {} to worker {} timed out after {:?}",
                        correlation_id, self.id, limit
                    );
                    return Err(ExecutionError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        match reply {
            Ok(reply) => reply,
            Err(_) => Err(self.termination_error()),
        }
    }

    async fn send(&self, message: WorkerMessage) -> Result<(), ExecutionError> {
        let mut writer = self.writer.lock().await;
        writer
            .send(&MessageEnvelope::new(message))
            .await
            .map_err(ExecutionError::from)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("Worker handle {} dropped without dispose", self.id);
        lock(&self.shared).terminate(ExecutionError::Disposed);
        if let Some(ref slots) = self.slots {
            slots.close();
        }
        self.reader_task.abort();
        self.context.get_mut().kill_now();
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("module", &self.module.name)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

fn job_output(result: JobExecutionResult) -> Result<JsonValue, ExecutionError> {
    if result.success {
        Ok(result.output.unwrap_or(JsonValue::Null))
    } else {
        Err(ExecutionError::JobFailed {
            message: result
                .error_message
                .unwrap_or_else(|| "job failed".to_string()),
            details: result.error_details,
        })
    }
}

/// Route inbound messages until the channel ends
async fn read_loop(worker_id: String, mut reader: BoxedReader, shared: Arc<Mutex<Shared>>) {
    let cause = loop {
        match reader.receive::<ControllerMessage>().await {
            Ok(envelope) => route(&worker_id, &shared, envelope.message),
            Err(e) if e.is_decode_error() => {
                warn!("Worker {} sent an invalid message: {}", worker_id, e);
            }
            Err(e) => break e,
        }
    };

    let mut shared = lock(&shared);
    if shared.state != HandleState::Terminated {
        warn!("Lost channel to worker {}: {}", worker_id, cause);
        shared.terminate(ExecutionError::ChannelLost(cause.to_string()));
    }
}

fn route(worker_id: &str, shared: &Mutex<Shared>, message: ControllerMessage) {
    let mut shared = lock(shared);

    match message {
        ControllerMessage::JobResult {
            correlation_id,
            result,
        } => deliver(worker_id, &mut shared, correlation_id, Ok(Reply::Job(result))),

        ControllerMessage::Pong {
            correlation_id,
            status,
        } => deliver(worker_id, &mut shared, correlation_id, Ok(Reply::Pong(status))),

        ControllerMessage::Error {
            correlation_id: Some(correlation_id),
            error,
        } => deliver(worker_id, &mut shared, correlation_id, Err(error.into())),

        ControllerMessage::Configured => {
            if shared.state != HandleState::Terminated {
                shared.state = HandleState::Configured;
            }
            if let Some(waiter) = shared.configure_waiter.take() {
                let _ = waiter.send(Ok(()));
            }
        }

        ControllerMessage::ConfigureFailed { error } => {
            if shared.state == HandleState::Configuring {
                shared.state = HandleState::Ready;
            }
            if let Some(waiter) = shared.configure_waiter.take() {
                let _ = waiter.send(Err(error.into()));
            }
        }

        ControllerMessage::Error {
            correlation_id: None,
            error: WorkerError::AlreadyConfigured,
        } => {
            warn!("Worker {} was already configured", worker_id);
            if shared.state != HandleState::Terminated {
                shared.state = HandleState::Configured;
            }
            if let Some(waiter) = shared.configure_waiter.take() {
                let _ = waiter.send(Err(ExecutionError::AlreadyConfigured));
            }
        }

        ControllerMessage::Error {
            correlation_id: None,
            error,
        } => warn!("Worker {} reported: {}", worker_id, error),

        other @ (ControllerMessage::Ready { .. } | ControllerMessage::LoadFailed { .. }) => {
            warn!("Worker {} sent unexpected {:?}", worker_id, other)
        }
    }
}

fn deliver(
    worker_id: &str,
    shared: &mut Shared,
    correlation_id: Uuid,
    reply: Result<Reply, ExecutionError>,
) {
    match shared.pending.remove(&correlation_id) {
        Some(waiter) => {
            let _ = waiter.send(reply);
        }
        None => debug!(
            "Discarding late reply {} from worker {}",
            correlation_id, worker_id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkworker_ipc::{MessageReader, MessageWriter};
    use chunkworker_runtime::{
        ChunkExecutor, ConfigurationError, JobError, ModuleContext, ModuleLoader, ModuleRegistry,
        ModuleSource,
    };
    use futures::future::join_all;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct EchoConfig {
        tag: String,
    }

    #[derive(Deserialize)]
    struct EchoJob {
        n: i64,
        #[serde(default)]
        sleep_ms: u64,
    }

    /// Echoes its input, tagged with its configuration
    struct EchoExecutor {
        tag: String,
    }

    impl ChunkExecutor for EchoExecutor {
        type Config = EchoConfig;
        type Job = EchoJob;
        type Output = JsonValue;

        fn new(config: EchoConfig, _module: &ModuleContext) -> Result<Self, ConfigurationError> {
            if config.tag.is_empty() {
                return Err(ConfigurationError::Rejected("tag must not be empty".into()));
            }
            Ok(Self { tag: config.tag })
        }

        fn job(&mut self, input: EchoJob) -> Result<JsonValue, JobError> {
            if input.sleep_ms > 0 {
                std::thread::sleep(Duration::from_millis(input.sleep_ms));
            }
            if input.n < 0 {
                return Err(JobError::failed_with("negative input", json!({"n": input.n})));
            }
            Ok(json!({"n": input.n, "tag": self.tag}))
        }
    }

    fn controller(config: ControllerConfig) -> Controller {
        let mut registry = ModuleRegistry::with_builtin_modules();
        registry.register_executor::<EchoExecutor>("echo");
        let loader = Arc::new(ModuleLoader::new(Arc::new(registry)));
        Controller::new(config, Backend::thread(loader))
    }

    fn echo_config() -> ControllerConfig {
        ControllerConfig::new(ModuleSource::self_initializing("builtin:echo"))
    }

    async fn configured_echo(tag: &str) -> WorkerHandle {
        let handle = controller(echo_config()).spawn().await.unwrap();
        handle.configure(json!({ "tag": tag })).await.unwrap();
        handle
    }

    #[tokio::test]
    async fn test_terrain_end_to_end() {
        let handle = controller(ControllerConfig::default()).spawn().await.unwrap();
        assert_eq!(handle.module().entry, "terrain");
        assert_eq!(handle.state(), HandleState::Ready);

        handle.configure(json!({"seed": 42})).await.unwrap();
        assert_eq!(handle.state(), HandleState::Configured);

        let chunk = handle.submit(json!({"x": 0, "y": 0})).await.unwrap();
        assert_eq!(chunk["heights"].as_array().unwrap().len(), 256);
        assert_eq!(chunk["cached"], false);

        handle.dispose().await;
    }

    #[tokio::test]
    async fn test_configure_once() {
        let handle = controller(echo_config()).spawn().await.unwrap();

        let err = handle.submit(json!({"n": 1})).await.unwrap_err();
        assert!(matches!(err, ExecutionError::NotConfigured));

        handle.configure(json!({"tag": "first"})).await.unwrap();
        let err = handle.configure(json!({"tag": "second"})).await.unwrap_err();
        assert!(matches!(err, ExecutionError::AlreadyConfigured));

        let output = handle.submit(json!({"n": 1})).await.unwrap();
        assert_eq!(output["tag"], "first");
        handle.dispose().await;
    }

    #[tokio::test]
    async fn test_rejected_configuration_can_be_retried() {
        let handle = controller(echo_config()).spawn().await.unwrap();

        let err = handle.configure(json!({"tag": ""})).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Configuration(_)));
        assert_eq!(handle.state(), HandleState::Ready);

        let err = handle.configure(json!({"label": "x"})).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Configuration(_)));

        handle.configure(json!({"tag": "fixed"})).await.unwrap();
        assert_eq!(handle.state(), HandleState::Configured);
        handle.dispose().await;
    }

    #[tokio::test]
    async fn test_pipelined_submits_keep_their_results() {
        let handle = configured_echo("pipe").await;

        let submits = (0..32).map(|n| handle.submit(json!({ "n": n })));
        let results = join_all(submits).await;

        for (n, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap()["n"], n as i64);
        }
        assert_eq!(handle.in_flight(), 0);
        handle.dispose().await;
    }

    #[tokio::test]
    async fn test_max_in_flight_queues_submits() {
        let config = echo_config().with_max_in_flight(1);
        let handle = controller(config).spawn().await.unwrap();
        handle.configure(json!({"tag": "queued"})).await.unwrap();

        let results = join_all((0..8).map(|n| handle.submit(json!({ "n": n })))).await;
        assert!(results.iter().all(|r| r.is_ok()));
        handle.dispose().await;
    }

    #[tokio::test]
    async fn test_workers_do_not_share_results() {
        let left = configured_echo("left").await;
        let right = configured_echo("right").await;

        let (a, b) = tokio::join!(left.submit(json!({"n": 1})), right.submit(json!({"n": 2})));
        assert_eq!(a.unwrap(), json!({"n": 1, "tag": "left"}));
        assert_eq!(b.unwrap(), json!({"n": 2, "tag": "right"}));

        left.dispose().await;
        right.dispose().await;
    }

    #[tokio::test]
    async fn test_job_failure_is_not_fatal() {
        let handle = configured_echo("fail").await;

        match handle.submit(json!({"n": -5})).await.unwrap_err() {
            ExecutionError::JobFailed { message, details } => {
                assert_eq!(message, "negative input");
                assert_eq!(details.unwrap()["details"]["n"], -5);
            }
            other => panic!("expected job failure, got {:?}", other),
        }

        assert!(handle.submit(json!({"n": 5})).await.is_ok());

        let status = handle.ping().await.unwrap();
        assert_eq!(status.jobs_executed, 2);
        assert_eq!(status.jobs_failed, 1);
        handle.dispose().await;
    }

    #[tokio::test]
    async fn test_job_timeout_discards_late_result() {
        let config = echo_config().with_job_timeout(Duration::from_millis(50));
        let handle = controller(config).spawn().await.unwrap();
        handle.configure(json!({"tag": "slow"})).await.unwrap();

        let err = handle.submit(json!({"n": 1, "sleep_ms": 300})).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout(_)));
        assert_eq!(handle.in_flight(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(handle.submit(json!({"n": 2})).await.unwrap()["n"], 2);
        handle.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_fails_pending_and_later_calls() {
        let handle = Arc::new(configured_echo("dispose").await);

        let pending = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.submit(json!({"n": 1, "sleep_ms": 300})).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.dispose().await;
        assert!(matches!(pending.await.unwrap(), Err(ExecutionError::Disposed)));

        assert!(matches!(
            handle.submit(json!({"n": 2})).await,
            Err(ExecutionError::Disposed)
        ));
        assert!(matches!(handle.ping().await, Err(ExecutionError::Disposed)));
        assert_eq!(handle.state(), HandleState::Terminated);

        // Idempotent
        handle.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_finishes_while_submit_blocked_on_full_channel() {
        let mut registry = ModuleRegistry::with_builtin_modules();
        registry.register_executor::<EchoExecutor>("echo");
        let backend = Backend::Thread {
            loader: Arc::new(ModuleLoader::new(Arc::new(registry))),
            channel_buffer_bytes: 1024,
        };
        let handle = Controller::new(echo_config(), backend).spawn().await.unwrap();
        handle.configure(json!({"tag": "full"})).await.unwrap();
        let handle = Arc::new(handle);

        let busy = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.submit(json!({"n": 1, "sleep_ms": 4000})).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Worker is busy, so this write fills the channel and keeps the writer
        let blocked = {
            let handle = handle.clone();
            let pad = "x".repeat(64 * 1024);
            tokio::spawn(async move { handle.submit(json!({"n": 2, "pad": pad})).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let disposed = tokio::time::timeout(Duration::from_secs(3), handle.dispose()).await;
        assert!(disposed.is_ok(), "dispose hung behind a blocked submit");
        assert_eq!(handle.state(), HandleState::Terminated);

        busy.abort();
        blocked.abort();
    }

    #[tokio::test]
    async fn test_invalid_module_fails_spawn() {
        let config = ControllerConfig::new(ModuleSource::self_initializing("builtin:unknown"));
        let err = controller(config).spawn().await.unwrap_err();
        assert!(matches!(err, ExecutionError::ModuleLoad { .. }));
        assert!(err.requires_respawn());

        let config = ControllerConfig::new(ModuleSource::self_initializing("ftp://example.com/m.json"));
        let err = controller(config).spawn().await.unwrap_err();
        assert!(matches!(err, ExecutionError::ModuleLoad { .. }));
    }

    #[tokio::test]
    async fn test_channel_loss_fails_pending_requests() {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (their_read, their_write) = tokio::io::split(theirs);

        let module = ModuleInfo {
            name: "fake".to_string(),
            version: "0.0.0".to_string(),
            entry: "fake".to_string(),
            variant: "self_initializing".to_string(),
            resource_bytes: 0,
        };
        let handle = WorkerHandle::start(
            "worker-fake".to_string(),
            module,
            ControllerConfig::default(),
            MessageReader::new(Box::new(our_read)),
            MessageWriter::new(Box::new(our_write)),
            BackgroundContext::Thread(None),
        );

        // Stand-in worker: acknowledge configuration, accept one job, then die
        let peer = tokio::spawn(async move {
            let mut reader = MessageReader::new(their_read);
            let mut writer = MessageWriter::new(their_write);

            let configure = reader.receive::<WorkerMessage>().await.unwrap();
            assert_eq!(configure.message.kind(), "configure");
            writer
                .send(&MessageEnvelope::new(ControllerMessage::Configured))
                .await
                .unwrap();

            let job = reader.receive::<WorkerMessage>().await.unwrap();
            assert_eq!(job.message.kind(), "job");
        });

        handle.configure(json!({})).await.unwrap();
        let err = handle.submit(json!({"n": 1})).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ChannelLost(_)));
        assert!(err.requires_respawn());
        assert_eq!(handle.state(), HandleState::Terminated);

        peer.await.unwrap();
        assert!(matches!(
            handle.submit(json!({"n": 2})).await,
            Err(ExecutionError::ChannelLost(_))
        ));

        handle.dispose().await;
        assert!(matches!(
            handle.submit(json!({"n": 3})).await,
            Err(ExecutionError::Disposed)
        ));
    }
}
