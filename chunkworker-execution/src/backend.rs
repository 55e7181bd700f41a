//! Background context backends
//!
//! A backend starts a background context running the worker loop and hands
//! back the controller's end of the channel. Nothing but serialised messages
//! crosses the channel, whichever backend is used.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use chunkworker_ipc::{MessageReader, MessageWriter, StreamTransport};
use chunkworker_runtime::{worker_main, ModuleLoader, ModuleSource};

use crate::error::ExecutionError;

pub(crate) type BoxedReader = MessageReader<Box<dyn AsyncRead + Send + Unpin>>;
pub(crate) type BoxedWriter = MessageWriter<Box<dyn AsyncWrite + Send + Unpin>>;

const DEFAULT_CHANNEL_BUFFER_BYTES: usize = 256 * 1024;
const EXIT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Where background contexts run
#[derive(Debug, Clone)]
pub enum Backend {
    /// Dedicated OS thread with its own single-threaded runtime, connected
    /// through an in-memory pipe
    Thread {
        loader: Arc<ModuleLoader>,
        channel_buffer_bytes: usize,
    },
    /// Child process running `program args... --worker-id <id> --module-code <locator>`
    Process { program: PathBuf, args: Vec<String> },
}

impl Backend {
    pub fn thread(loader: Arc<ModuleLoader>) -> Self {
        Backend::Thread {
            loader,
            channel_buffer_bytes: DEFAULT_CHANNEL_BUFFER_BYTES,
        }
    }

    pub fn process(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Backend::Process {
            program: program.into(),
            args,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Thread { .. } => "thread",
            Backend::Process { .. } => "process",
        }
    }

    pub(crate) fn launch(
        &self,
        worker_id: &str,
        source: &ModuleSource,
    ) -> Result<Launched, ExecutionError> {
        match self {
            Backend::Thread {
                loader,
                channel_buffer_bytes,
            } => launch_thread(worker_id, source, loader.clone(), *channel_buffer_bytes),
            Backend::Process { program, args } => launch_process(worker_id, source, program, args),
        }
    }
}

/// Controller end of a freshly started background context
pub(crate) struct Launched {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub context: BackgroundContext,
}

fn launch_thread(
    worker_id: &str,
    source: &ModuleSource,
    loader: Arc<ModuleLoader>,
    buffer: usize,
) -> Result<Launched, ExecutionError> {
    let (ours, theirs) = tokio::io::duplex(buffer);
    let (our_read, our_write) = tokio::io::split(ours);
    let (their_read, their_write) = tokio::io::split(theirs);

    let id = worker_id.to_string();
    let source = source.clone();
    let thread = std::thread::Builder::new()
        .name(format!("chunkworker-{}", worker_id))
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Worker {} could not build its runtime: {}", id, e);
                    return;
                }
            };

            let transport = StreamTransport::new(their_read, their_write);
            if let Err(e) = runtime.block_on(worker_main(id.clone(), transport, loader, source)) {
                warn!("Worker {} exited with error: {}", id, e);
            }
        })
        .map_err(|e| ExecutionError::Spawn(e.to_string()))?;

    debug!("Started worker thread for {}", worker_id);

    Ok(Launched {
        reader: MessageReader::new(Box::new(our_read)),
        writer: MessageWriter::new(Box::new(our_write)),
        context: BackgroundContext::Thread(Some(thread)),
    })
}

fn launch_process(
    worker_id: &str,
    source: &ModuleSource,
    program: &Path,
    args: &[String],
) -> Result<Launched, ExecutionError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .arg("--worker-id")
        .arg(worker_id)
        .arg("--module-code")
        .arg(source.code_locator());
    if let Some(binary) = source.binary_locator() {
        command.arg("--module-binary").arg(binary);
    }

    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecutionError::Spawn(format!("{}: {}", program.display(), e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ExecutionError::Spawn("worker stdin unavailable".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecutionError::Spawn("worker stdout unavailable".to_string()))?;

    info!(
        "Started worker process {} (pid {:?}) for {}",
        program.display(),
        child.id(),
        worker_id
    );

    Ok(Launched {
        reader: MessageReader::new(Box::new(stdout)),
        writer: MessageWriter::new(Box::new(stdin)),
        context: BackgroundContext::Process(child),
    })
}

/// What keeps a background context alive
pub(crate) enum BackgroundContext {
    Thread(Option<std::thread::JoinHandle<()>>),
    Process(Child),
}

impl BackgroundContext {
    pub fn pid(&self) -> Option<u32> {
        match self {
            BackgroundContext::Thread(_) => None,
            BackgroundContext::Process(child) => child.id(),
        }
    }

    /// Wait briefly for the context to exit on its own, then force it.
    /// The channel must already be closed.
    pub async fn terminate(&mut self) {
        match self {
            BackgroundContext::Thread(thread) => {
                let Some(thread) = thread.take() else {
                    return;
                };

                // A thread cannot be killed; it exits once its current job
                // finishes and it reads end of stream
                let join = tokio::task::spawn_blocking(move || thread.join());
                if tokio::time::timeout(EXIT_GRACE_PERIOD, join).await.is_err() {
                    debug!("Worker thread still busy; detaching");
                }
            }
            BackgroundContext::Process(child) => {
                if let Ok(Ok(status)) = tokio::time::timeout(EXIT_GRACE_PERIOD, child.wait()).await {
                    debug!("Worker process exited with {}", status);
                    return;
                }

                if let Err(e) = child.start_kill() {
                    debug!("Worker process already gone: {}", e);
                }
                if let Err(e) = child.wait().await {
                    warn!("Failed to reap worker process: {}", e);
                }
            }
        }
    }

    /// Synchronous teardown used when a handle is dropped without `dispose`
    pub fn kill_now(&mut self) {
        match self {
            // Dropping the channel ends the thread
            BackgroundContext::Thread(thread) => {
                thread.take();
            }
            BackgroundContext::Process(child) => {
                let _ = child.start_kill();
            }
        }
    }
}
