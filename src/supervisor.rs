//! Reconnect supervisor and builder.
//!
//! The [`SupervisorBuilder`] provides a fluent API for configuring the
//! connection. The [`ReconnectSupervisor`] owns one background task that:
//! 1. Connects to the current target
//! 2. Runs the session, applying every message to the entry store
//! 3. On any failure, closes the session and reconnects
//!
//! Observers read [`TableSnapshot`]s from a watch channel; control goes
//! through `set_target`, `stop` and `restart`.
//!
//! # Example
//!
//! ```ignore
//! use nt3_client::ReconnectSupervisor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let supervisor = ReconnectSupervisor::builder()
//!         .host("1234")
//!         .start()?;
//!
//!     let mut snapshots = supervisor.subscribe();
//!     while snapshots.changed().await.is_ok() {
//!         let snapshot = snapshots.borrow().clone();
//!         println!("{} entries, connected: {}", snapshot.entry_count, snapshot.connected);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{
    run_session, ConnectionState, ProtocolClient, SessionConfig, SessionEvent, SessionSink,
};
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::error::{Nt3Error, Result};
use crate::store::{EntryStore, EntryTree};
use crate::transport::Target;

/// Command queue capacity.
const COMMAND_CAPACITY: usize = 16;

/// Read-only view of the table for presentation.
#[derive(Debug, Clone, Serialize)]
pub struct TableSnapshot {
    /// Session state.
    pub state: ConnectionState,
    /// Whether the server hello has been received.
    pub connected: bool,
    /// Target of the current or next attempt.
    pub target: Target,
    /// Number of live entries.
    pub entry_count: usize,
    /// Path tree.
    pub tree: Arc<EntryTree>,
}

impl TableSnapshot {
    fn disconnected(target: Target) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            connected: false,
            target,
            entry_count: 0,
            tree: Arc::new(EntryTree::new()),
        }
    }
}

#[derive(Debug)]
enum Command {
    SetTarget(Target),
    Stop,
    Restart,
    Shutdown,
}

/// Builder for configuring and starting a [`ReconnectSupervisor`].
#[derive(Debug, Clone, Default)]
pub struct SupervisorBuilder {
    config: ClientConfig,
}

impl SupervisorBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the server host, address, or team number.
    ///
    /// Default: "localhost"
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the server port.
    ///
    /// Default: 1735
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the TCP connect timeout.
    ///
    /// Default: 2 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the idle time before a keep alive is sent.
    ///
    /// Default: 1 second
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.config.keep_alive_interval_ms = duration_ms(interval);
        self
    }

    /// Set the socket read buffer size.
    ///
    /// Default: 64 KiB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 64
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer_channel_capacity = capacity;
        self
    }

    /// Set the reconnect delays.
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Validate the configuration and spawn the supervisor task.
    ///
    /// # Panics
    ///
    /// Outside a tokio runtime.
    pub fn start(self) -> Result<ReconnectSupervisor> {
        ReconnectSupervisor::start(self.config)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Handle to the background connection task.
///
/// Dropping the handle stops the task once its current await completes;
/// [`ReconnectSupervisor::shutdown`] also waits for it.
pub struct ReconnectSupervisor {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<TableSnapshot>,
    task: JoinHandle<()>,
}

impl ReconnectSupervisor {
    /// Create a new supervisor builder.
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    /// Validate `config` and spawn the supervisor task.
    pub fn start(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let target = config.target();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (snapshot_tx, snapshot_rx) =
            watch::channel(TableSnapshot::disconnected(target.clone()));

        let runner = Runner {
            client: ProtocolClient::new(),
            store: EntryStore::new(),
            target,
            session: config.session(),
            policy: config.reconnect,
            commands: command_rx,
            snapshots: snapshot_tx,
            running: true,
            failures: 0,
        };
        let task = tokio::spawn(runner.run());

        Ok(Self {
            commands: command_tx,
            snapshots: snapshot_rx,
            task,
        })
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Nt3Error::ConnectionClosed)
    }

    /// Switch to a new server.
    ///
    /// Cancels the current session; the next attempt uses the new target.
    /// While stopped, the target is only recorded.
    pub async fn set_target(&self, host: impl Into<String>, port: u16) -> Result<()> {
        self.send(Command::SetTarget(Target::new(host, port))).await
    }

    /// Cancel the current session and stay disconnected until restarted.
    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    /// Cancel the current session, if any, and reconnect immediately.
    pub async fn restart(&self) -> Result<()> {
        self.send(Command::Restart).await
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<TableSnapshot> {
        self.snapshots.clone()
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> TableSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Whether the current session is past the server hello.
    pub fn is_connected(&self) -> bool {
        self.snapshots.borrow().connected
    }

    /// End the session and wait for the task to finish.
    pub async fn shutdown(self) -> Result<()> {
        // A closed queue means the task is already gone.
        let _ = self.commands.send(Command::Shutdown).await;
        self.task.await.map_err(Nt3Error::from)
    }
}

/// Applies session events to the store and publishes snapshots.
struct StoreSink<'a> {
    store: &'a mut EntryStore,
    snapshots: &'a watch::Sender<TableSnapshot>,
    target: &'a Target,
    went_live: bool,
}

impl SessionSink for StoreSink<'_> {
    fn on_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::SyncStarted { .. } => self.store.on_connected(),
            SessionEvent::SyncCompleted => {
                self.store.on_sync_complete();
                self.went_live = true;
                info!(server = %self.target, entries = self.store.len(), "Connection live");
            }
            SessionEvent::Entry(message) => self.store.apply(&message)?,
        }
        Ok(())
    }

    fn on_read_processed(&mut self, client: &ProtocolClient) {
        publish(self.snapshots, client.state(), self.store, self.target);
    }
}

fn publish(
    snapshots: &watch::Sender<TableSnapshot>,
    state: ConnectionState,
    store: &EntryStore,
    target: &Target,
) {
    snapshots.send_replace(TableSnapshot {
        state,
        connected: store.is_connected(),
        target: target.clone(),
        entry_count: store.len(),
        tree: store.tree(),
    });
}

/// How a session or wait was interrupted.
enum Outcome {
    Ended(Result<()>),
    Command(Option<Command>),
}

/// State owned by the supervisor task.
struct Runner {
    client: ProtocolClient,
    store: EntryStore,
    target: Target,
    session: SessionConfig,
    policy: ReconnectPolicy,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<TableSnapshot>,
    /// False after `stop` until `restart`.
    running: bool,
    /// Consecutive attempts that never went live.
    failures: u32,
}

impl Runner {
    async fn run(mut self) {
        loop {
            if !self.running {
                let command = self.commands.recv().await;
                if !self.handle_command(command) {
                    break;
                }
                continue;
            }

            let delay = self.policy.delay(self.failures);
            if !delay.is_zero() {
                debug!(?delay, failures = self.failures, "Waiting before reconnect");
                let command = tokio::select! {
                    _ = tokio::time::sleep(delay) => None,
                    command = self.commands.recv() => Some(command),
                };
                if let Some(command) = command {
                    if !self.handle_command(command) {
                        break;
                    }
                    continue;
                }
            }

            let (outcome, went_live) = {
                let mut sink = StoreSink {
                    store: &mut self.store,
                    snapshots: &self.snapshots,
                    target: &self.target,
                    went_live: false,
                };
                let outcome = tokio::select! {
                    result = run_session(&mut self.client, &self.target, &self.session, &mut sink) => {
                        Outcome::Ended(result)
                    }
                    command = self.commands.recv() => Outcome::Command(command),
                };
                (outcome, sink.went_live)
            };

            // Every way out of a session passes here exactly once.
            self.end_session();
            self.failures = if went_live {
                0
            } else {
                self.failures.saturating_add(1)
            };

            match outcome {
                Outcome::Ended(Err(e)) => {
                    warn!(server = %self.target, class = ?e.class(), "Session ended: {}", e);
                }
                Outcome::Ended(Ok(())) => {}
                Outcome::Command(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
            }
        }

        self.end_session();
        debug!("Supervisor stopped");
    }

    /// Close the session and move the table to the backup.
    fn end_session(&mut self) {
        if self.client.close().is_some() {
            if self.store.is_connected() {
                self.store.on_disconnected();
            }
            publish(
                &self.snapshots,
                self.client.state(),
                &self.store,
                &self.target,
            );
        }
    }

    /// Apply a control command. Returns false when the task must exit.
    fn handle_command(&mut self, command: Option<Command>) -> bool {
        match command {
            Some(Command::SetTarget(target)) => {
                info!(server = %target, "Target changed");
                self.target = target;
                self.failures = 0;
                publish(&self.snapshots, self.client.state(), &self.store, &self.target);
            }
            Some(Command::Stop) => {
                info!("Stopped");
                self.running = false;
            }
            Some(Command::Restart) => {
                info!("Restarting");
                self.running = true;
                self.failures = 0;
            }
            Some(Command::Shutdown) | None => return false,
        }
        true
    }
}
