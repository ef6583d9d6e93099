//! Configuration for the client.
//!
//! # Example
//!
//! ```
//! use nt3_client::ClientConfig;
//!
//! // Minimal config (uses defaults)
//! let config = ClientConfig::default();
//! assert_eq!(config.port, 1735);
//!
//! // From a JSON document; missing fields take their defaults
//! let config = ClientConfig::from_json(r#"{ "host": "1234", "connect_timeout_ms": 500 }"#).unwrap();
//! assert_eq!(config.target().resolved_host(), "roborio-1234-frc.local");
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::client::SessionConfig;
use crate::error::{Nt3Error, Result};
use crate::protocol::DEFAULT_PORT;
use crate::transport::Target;
use crate::writer::WriterConfig;

/// Client configuration.
///
/// All fields have defaults suitable for a robot on the local network.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    /// Server host, address, or team number (default: "localhost")
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (default: 1735)
    #[serde(default = "default_port")]
    pub port: u16,

    /// TCP connect timeout (default: 2 s)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle time before the client sends a keep alive (default: 1 s)
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,

    /// Socket read buffer size (default: 64 KiB)
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Outbound frame queue capacity (default: 64)
    #[serde(default = "default_writer_channel_capacity")]
    pub writer_channel_capacity: usize,

    /// Reconnect delays
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_host() -> String { "localhost".into() }
fn default_port() -> u16 { DEFAULT_PORT }
fn default_connect_timeout_ms() -> u64 { 2000 }
fn default_keep_alive_interval_ms() -> u64 { 1000 }
fn default_read_buffer_size() -> usize { 64 * 1024 }
fn default_writer_channel_capacity() -> usize { 64 }

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            read_buffer_size: default_read_buffer_size(),
            writer_channel_capacity: default_writer_channel_capacity(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no session could run with.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Nt3Error::InvalidConfig("port must be non-zero".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Nt3Error::InvalidConfig("connect_timeout_ms must be non-zero".into()));
        }
        if self.keep_alive_interval_ms == 0 {
            return Err(Nt3Error::InvalidConfig(
                "keep_alive_interval_ms must be non-zero".into(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(Nt3Error::InvalidConfig("read_buffer_size must be non-zero".into()));
        }
        if self.writer_channel_capacity == 0 {
            return Err(Nt3Error::InvalidConfig(
                "writer_channel_capacity must be non-zero".into(),
            ));
        }
        self.reconnect.validate()
    }

    /// Host and port to connect to.
    pub fn target(&self) -> Target {
        Target::new(self.host.clone(), self.port)
    }

    /// Socket parameters for each session.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_buffer_size: self.read_buffer_size,
            writer: WriterConfig {
                channel_capacity: self.writer_channel_capacity,
                keep_alive_interval: Duration::from_millis(self.keep_alive_interval_ms),
            },
        }
    }
}

/// Delay before each reconnect attempt.
///
/// The first attempt after a session ends waits `initial_delay_ms` (default
/// 0: reconnect immediately). Each further attempt that fails before the
/// session goes live waits `backoff_base_ms` doubled per failure, capped at
/// `max_delay_ms`. Reaching `Live` resets the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt (default: 0)
    #[serde(default)]
    pub initial_delay_ms: u64,

    /// Delay after the first failed attempt (default: 100 ms)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on any delay (default: 2 s)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_backoff_base_ms() -> u64 { 100 }
fn default_max_delay_ms() -> u64 { 2000 }

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 0,
            backoff_base_ms: default_backoff_base_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Reconnect immediately, always.
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            backoff_base_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before the next attempt after `failures` consecutive attempts
    /// that never went live.
    pub fn delay(&self, failures: u32) -> Duration {
        let ms = match failures {
            0 => self.initial_delay_ms,
            n => {
                let shift = (n - 1).min(32);
                self.backoff_base_ms.saturating_mul(1u64 << shift)
            }
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    fn validate(&self) -> Result<()> {
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(Nt3Error::InvalidConfig(
                "reconnect.initial_delay_ms exceeds max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}
