//! TCP transport to an NT3 server.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use nt3_client::transport::{connect, Target};
//!
//! let target = Target::new("1234", 1735);
//! let stream = connect(&target, Duration::from_secs(2)).await?;
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Nt3Error, Result};
use crate::protocol::DEFAULT_PORT;

/// Host and port of the NT3 server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Host name, address, or team number.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Target {
    /// Create a target.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host after team number expansion.
    pub fn resolved_host(&self) -> String {
        resolve_host(&self.host)
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resolved_host(), self.port)
    }
}

/// Expand a team number into the robot controller's mDNS name.
///
/// Input made only of ASCII digits (after trimming) becomes
/// `roborio-<N>-frc.local`; anything else is returned trimmed.
pub fn resolve_host(input: &str) -> String {
    let input = input.trim();
    if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
        format!("roborio-{}-frc.local", input)
    } else {
        input.to_string()
    }
}

/// Open a TCP connection to `target`, failing after `timeout`.
///
/// Nagle is disabled: control messages are one to four bytes.
pub async fn connect(target: &Target, timeout: Duration) -> Result<TcpStream> {
    let host = target.resolved_host();
    debug!(host = %host, port = target.port, "Connecting");

    let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), target.port)))
        .await
        .map_err(|_| Nt3Error::ConnectTimeout(timeout))??;
    stream.set_nodelay(true)?;

    Ok(stream)
}
