//! # nt3-client
//!
//! Async client for the NetworkTables 3 (NT3) protocol.
//!
//! NT3 is a binary publish/subscribe key-value table protocol: a server holds
//! named, typed entries and streams every assignment, update and delete to
//! its clients over one TCP connection (default port 1735).
//!
//! ## Architecture
//!
//! ```text
//! socket ─► FrameParser ─► ProtocolClient ─► EntryStore ─► TableSnapshot (watch)
//!                               ▲
//!            ReconnectSupervisor ┘ (set_target / stop / restart)
//! ```
//!
//! - **Protocol** ([`protocol`]): primitive codecs, resumable field decoders
//!   and an incremental message parser
//! - **Session** ([`client`]): handshake state machine and read loop
//! - **Store** ([`store`]): id/name indexed table, path tree, and identity
//!   preservation across reconnects
//! - **Supervisor** ([`supervisor`]): reconnect loop and control surface
//!
//! ## Example
//!
//! ```ignore
//! use nt3_client::ReconnectSupervisor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let supervisor = ReconnectSupervisor::builder()
//!         .host("1234") // team number, resolves to roborio-1234-frc.local
//!         .start()?;
//!
//!     let mut snapshots = supervisor.subscribe();
//!     snapshots.wait_for(|s| s.connected).await?;
//!     println!("{}", serde_json::to_string_pretty(&*supervisor.snapshot().tree)?);
//!
//!     supervisor.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod store;
pub mod supervisor;
pub mod transport;
pub mod writer;

pub use client::{ConnectionState, ProtocolClient, SessionEvent};
pub use config::{ClientConfig, ReconnectPolicy};
pub use error::{ErrorClass, Nt3Error, Result};
pub use store::{Entry, EntryKey, EntryStore, EntryTree, TreeNode};
pub use supervisor::{ReconnectSupervisor, SupervisorBuilder, TableSnapshot};
pub use transport::{resolve_host, Target};
