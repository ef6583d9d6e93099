//! Dedicated writer task for outbound control messages.
//!
//! The session read loop never writes to the socket directly. Outbound
//! frames go through an mpsc channel to a task that owns the write half,
//! batches whatever is queued into a single vectored write, and emits keep
//! alives while the connection is otherwise idle.
//!
//! # Architecture
//!
//! ```text
//! Session ─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► TCP write half
//!                                               ▲
//!                               idle timer ─────┘ (KeepAlive once live)
//! ```
//!
//! Dropping every [`WriterHandle`] closes the channel and ends the task.

use std::io::IoSlice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::{Nt3Error, Result};
use crate::protocol::{CLIENT_HELLO, CLIENT_HELLO_COMPLETE, KEEP_ALIVE};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default idle time before a keep alive is sent.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Encoded bytes ready to be written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Complete message, type byte included.
    pub bytes: Bytes,
}

impl OutboundFrame {
    /// Wrap an encoded message.
    #[inline]
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// Wrap a constant control sequence.
    #[inline]
    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(bytes))
    }

    /// ClientHello for protocol revision 3.0.
    pub fn client_hello() -> Self {
        Self::from_static(&CLIENT_HELLO)
    }

    /// ClientHelloComplete.
    pub fn client_hello_complete() -> Self {
        Self::from_static(&CLIENT_HELLO_COMPLETE)
    }

    /// KeepAlive.
    pub fn keep_alive() -> Self {
        Self::from_static(&KEEP_ALIVE)
    }

    /// Frame size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// Idle time before a keep alive is written, once enabled.
    pub keep_alive_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    /// Channel sender for frames.
    tx: mpsc::Sender<OutboundFrame>,
    /// Whether idle keep alives are sent.
    keep_alive: Arc<AtomicBool>,
}

impl WriterHandle {
    /// Queue a frame, waiting for channel capacity.
    ///
    /// Fails with [`Nt3Error::ConnectionClosed`] once the task has exited;
    /// the task's own result says why.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| Nt3Error::ConnectionClosed)
    }

    /// Start sending keep alives while idle.
    pub fn enable_keep_alive(&self) {
        self.keep_alive.store(true, Ordering::Release);
    }

    /// Whether keep alives are being sent.
    #[inline]
    pub fn keep_alive_enabled(&self) -> bool {
        self.keep_alive.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The JoinHandle resolves when every handle is dropped (`Ok`) or a write
/// fails (`Err`).
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let keep_alive = Arc::new(AtomicBool::new(false));

    let handle = WriterHandle {
        tx,
        keep_alive: keep_alive.clone(),
    };
    let task = tokio::spawn(writer_loop(
        rx,
        writer,
        keep_alive,
        config.keep_alive_interval,
    ));

    (handle, task)
}

/// Main writer loop - receives frames and writes them to the socket.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    keep_alive: Arc<AtomicBool>,
    keep_alive_interval: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        // Wait for the first frame; an idle interval with keep alive enabled
        // produces one.
        let first = match tokio::time::timeout(keep_alive_interval, rx.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                // Channel closed, clean shutdown
                let _ = writer.shutdown().await;
                return Ok(());
            }
            Err(_) => {
                if keep_alive.load(Ordering::Acquire) {
                    trace!("Sending keep alive");
                    write_batch(&mut writer, &[OutboundFrame::keep_alive()]).await?;
                }
                continue;
            }
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    if total_size == 0 {
        return Ok(());
    }

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(Nt3Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.size();
        if skip_bytes < end && !frame.bytes.is_empty() {
            let start_in_frame = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.bytes[start_in_frame..]));
        }
        offset = end;
    }

    slices
}
