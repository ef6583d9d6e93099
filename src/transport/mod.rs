//! Transport module - TCP connection handling.
//!
//! Provides:
//! - Connect with a bounded timeout
//! - Team number host resolution

mod tcp;

pub use tcp::{connect, resolve_host, Target};
