//! Transport implementations
//!
//! All transports share one framing: a [`MessageEnvelope`] serialised as a
//! single JSON line. A transport is a reader half plus a writer half over any
//! async byte stream, so the same code carries messages over a child
//! process's pipes, the process's own stdio, or an in-memory duplex pipe to a
//! worker thread.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadHalf,
    WriteHalf,
};
use tokio::process::{ChildStdin, ChildStdout};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Transport trait for full-duplex message exchange
#[async_trait]
pub trait IpcTransport: Send {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError>;

    /// Receive a message from the other end
    async fn receive<T: DeserializeOwned + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), IpcError>;
}

/// Writing half: one envelope per line
pub struct MessageWriter<W> {
    inner: Option<W>,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(inner: W) -> Self {
        Self { inner: Some(inner) }
    }

    /// Serialise and flush one envelope
    pub async fn send<T: Serialize + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        let writer = self.inner.as_mut().ok_or(IpcError::ConnectionClosed)?;

        let mut line = serde_json::to_vec(message)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;
        line.push(b'\n');

        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut the stream down; the reader on the other end sees end-of-stream
    pub async fn close(&mut self) -> Result<(), IpcError> {
        let Some(mut writer) = self.inner.take() else {
            return Ok(());
        };

        match writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

/// Reading half: one envelope per line
pub struct MessageReader<R> {
    inner: BufReader<R>,
    line: String,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: String::new(),
        }
    }

    /// Read the next envelope, skipping blank lines
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<MessageEnvelope<T>, IpcError> {
        loop {
            self.line.clear();
            let read = self.inner.read_line(&mut self.line).await?;
            if read == 0 {
                return Err(IpcError::ConnectionClosed);
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return decode_line(trimmed);
        }
    }
}

/// Decode one line, checking the protocol version before the message body
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<MessageEnvelope<T>, IpcError> {
    let raw: MessageEnvelope<JsonValue> =
        serde_json::from_str(line).map_err(|e| IpcError::DeserializationError(e.to_string()))?;

    if raw.protocol_version != IPC_PROTOCOL_VERSION {
        return Err(IpcError::ProtocolVersionMismatch {
            expected: IPC_PROTOCOL_VERSION,
            actual: raw.protocol_version,
        });
    }

    let message = serde_json::from_value(raw.message)
        .map_err(|e| IpcError::InvalidMessage(e.to_string()))?;

    Ok(MessageEnvelope {
        protocol_version: raw.protocol_version,
        timestamp: raw.timestamp,
        message,
    })
}

/// Full-duplex transport over a pair of byte streams
pub struct StreamTransport<R, W> {
    reader: MessageReader<R>,
    writer: MessageWriter<W>,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: MessageReader::new(reader),
            writer: MessageWriter::new(writer),
        }
    }

    /// Split into halves so reading and writing can live in different tasks
    pub fn into_split(self) -> (MessageReader<R>, MessageWriter<W>) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl<R, W> IpcTransport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        self.writer.send(message).await
    }

    async fn receive<T: DeserializeOwned + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        self.reader.receive().await
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        self.writer.close().await
    }
}

/// Stdin/stdout transport used inside a worker process
pub type StdioTransport = StreamTransport<tokio::io::Stdin, tokio::io::Stdout>;

impl StreamTransport<tokio::io::Stdin, tokio::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

/// Controller side of a worker process's pipes
pub type ChildProcessTransport = StreamTransport<ChildStdout, ChildStdin>;

impl StreamTransport<ChildStdout, ChildStdin> {
    pub fn child(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self::new(stdout, stdin)
    }
}

/// In-memory transport used between a controller and a worker thread
pub type MemoryTransport = StreamTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Create two connected in-memory transports
pub fn memory_pair(max_buf_size: usize) -> (MemoryTransport, MemoryTransport) {
    let (left, right) = tokio::io::duplex(max_buf_size);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);

    (
        StreamTransport::new(left_read, left_write),
        StreamTransport::new(right_read, right_write),
    )
}
