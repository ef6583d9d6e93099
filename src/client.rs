//! Session state machine and its async driver.
//!
//! [`ProtocolClient`] is the handshake state machine with no I/O of its own:
//! it is told when the transport is ready and handed received bytes, and
//! answers with frames to send and [`SessionEvent`]s. [`run_session`] drives
//! it over a TCP connection:
//! 1. Connect with a bounded timeout
//! 2. Send ClientHello
//! 3. Read, parse and forward messages until the connection fails
//!
//! ```text
//! Disconnected ─► Connecting ─► AwaitingServerHello ─► Syncing ─► Live
//!      ▲                                                            │
//!      └──────────────────── any failure / close() ─────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, trace};

use crate::error::{Nt3Error, Result};
use crate::protocol::{FrameParser, Message};
use crate::transport::{connect, Target};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// No session. Initial state, and the state after any failure.
    #[default]
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// ClientHello sent.
    AwaitingServerHello,
    /// Server is announcing its entries.
    Syncing,
    /// Sync complete.
    Live,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Something the entry table or its observers must react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// ServerHello received; entry assignments follow.
    SyncStarted {
        /// ServerHello flags.
        flags: u8,
        /// Server identity.
        identity: String,
    },
    /// ServerHelloComplete received; the session is live.
    SyncCompleted,
    /// An entry table message.
    Entry(Message),
}

/// Result of feeding the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Write this frame to the socket.
    Send(OutboundFrame),
    /// Deliver this event.
    Event(SessionEvent),
}

/// NT3 client handshake state machine.
#[derive(Debug, Default)]
pub struct ProtocolClient {
    state: ConnectionState,
    parser: FrameParser,
}

impl ProtocolClient {
    /// Create a disconnected client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the server hello has been received on the current session.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Syncing | ConnectionState::Live
        )
    }

    fn transition(&mut self, to: ConnectionState) {
        debug!(from = %self.state(), to = %to, "Connection state");
        self.state = to;
    }

    /// Start a new session attempt.
    pub fn begin_connect(&mut self) {
        self.parser.clear();
        self.transition(ConnectionState::Connecting);
    }

    /// The socket is connected: returns the ClientHello to send.
    pub fn on_transport_ready(&mut self) -> OutboundFrame {
        self.transition(ConnectionState::AwaitingServerHello);
        OutboundFrame::client_hello()
    }

    /// Feed received bytes, appending what they produce to `outputs`.
    ///
    /// Messages are handled one at a time, so everything completed ahead of
    /// a bad byte is already in `outputs` when the error is returned, however
    /// the stream was split into reads.
    ///
    /// # Errors
    ///
    /// Any parse error, or a message that is not valid in the current state.
    /// The session must then be closed.
    pub fn on_bytes(&mut self, data: &[u8], outputs: &mut Vec<Output>) -> Result<()> {
        let mut input = data;
        while let Some(message) = self.parser.next_message(&mut input)? {
            self.handle_message(message, outputs)?;
        }
        Ok(())
    }

    fn handle_message(&mut self, message: Message, outputs: &mut Vec<Output>) -> Result<()> {
        trace!(message_type = message.message_type(), "Received message");

        match (self.state(), message) {
            (_, Message::KeepAlive) => {}
            (ConnectionState::AwaitingServerHello, Message::ServerHello { flags, identity }) => {
                debug!(identity = %identity, flags, "Server hello");
                self.transition(ConnectionState::Syncing);
                outputs.push(Output::Event(SessionEvent::SyncStarted { flags, identity }));
            }
            (ConnectionState::Syncing, Message::ServerHelloComplete) => {
                self.transition(ConnectionState::Live);
                outputs.push(Output::Send(OutboundFrame::client_hello_complete()));
                outputs.push(Output::Event(SessionEvent::SyncCompleted));
            }
            (ConnectionState::Syncing | ConnectionState::Live, message)
                if message.is_entry_message() =>
            {
                outputs.push(Output::Event(SessionEvent::Entry(message)));
            }
            (_, message) => return Err(Nt3Error::UnexpectedMessage(message.message_type())),
        }
        Ok(())
    }

    /// End the session.
    ///
    /// Returns the state that was left, or `None` if already disconnected, so
    /// concurrent close signals produce a single disconnect.
    pub fn close(&mut self) -> Option<ConnectionState> {
        let previous = self.state();
        if previous == ConnectionState::Disconnected {
            return None;
        }
        self.parser.clear();
        self.transition(ConnectionState::Disconnected);
        Some(previous)
    }
}

/// Receiver of session events.
pub trait SessionSink {
    /// Handle one event. An error ends the session.
    fn on_event(&mut self, event: SessionEvent) -> Result<()>;

    /// Called once every event from a socket read has been handled.
    fn on_read_processed(&mut self, _client: &ProtocolClient) {}
}

/// Socket parameters for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Socket read buffer size.
    pub read_buffer_size: usize,
    /// Writer task configuration.
    pub writer: WriterConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            writer: WriterConfig::default(),
        }
    }
}

/// Aborts the writer task when the session ends or is cancelled.
struct WriterTask(JoinHandle<Result<()>>);

impl Drop for WriterTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl WriterTask {
    /// Wait for the task and return why it ended.
    async fn failure(&mut self) -> Nt3Error {
        writer_exit((&mut self.0).await)
    }
}

fn writer_exit(finished: std::result::Result<Result<()>, JoinError>) -> Nt3Error {
    match finished {
        Ok(Err(e)) => e,
        Ok(Ok(())) => Nt3Error::ConnectionClosed,
        Err(e) => Nt3Error::Task(e),
    }
}

/// Connect to `target` and run one session.
///
/// Never returns `Ok`: a session ends when the connection fails or the peer
/// misbehaves. The caller closes `client` afterwards; dropping this future
/// cancels the connect or read in progress.
pub async fn run_session<S: SessionSink>(
    client: &mut ProtocolClient,
    target: &Target,
    config: &SessionConfig,
    sink: &mut S,
) -> Result<()> {
    client.begin_connect();
    sink.on_read_processed(client);

    let stream = connect(target, config.connect_timeout).await?;
    drive(client, stream, config, sink).await
}

/// Run the handshake and read loop over an established stream.
pub async fn drive<T, S>(
    client: &mut ProtocolClient,
    stream: T,
    config: &SessionConfig,
    sink: &mut S,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    S: SessionSink,
{
    let (mut reader, write_half) = tokio::io::split(stream);
    let (writer, task) = spawn_writer_task(write_half, config.writer.clone());
    let mut task = WriterTask(task);

    if writer.send(client.on_transport_ready()).await.is_err() {
        return Err(task.failure().await);
    }
    sink.on_read_processed(client);

    let mut buf = vec![0u8; config.read_buffer_size.max(1)];
    let mut outputs = Vec::new();

    loop {
        // A failed write ends the writer task; that ends the session too.
        let n = tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => return Err(Nt3Error::ConnectionClosed),
                Ok(n) => n,
                Err(e) => return Err(Nt3Error::Io(e)),
            },
            finished = &mut task.0 => return Err(writer_exit(finished)),
        };

        let parsed = client.on_bytes(&buf[..n], &mut outputs);
        for output in outputs.drain(..) {
            match output {
                Output::Send(frame) => {
                    if writer.send(frame).await.is_err() {
                        return Err(task.failure().await);
                    }
                }
                Output::Event(event) => {
                    if event == SessionEvent::SyncCompleted {
                        writer.enable_keep_alive();
                    }
                    sink.on_event(event)?;
                }
            }
        }

        sink.on_read_processed(client);
        parsed?;
    }
}
