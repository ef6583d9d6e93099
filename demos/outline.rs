//! Outline - print the server's entry tree.
//!
//! Connects to an NT3 server, waits for the initial sync and prints the entry
//! tree as JSON. Then prints one line per connection change until Ctrl-C.
//!
//! ```text
//! cargo run --example outline -- 1234        # team number
//! cargo run --example outline -- 10.0.0.2 1735
//! RUST_LOG=nt3_client=debug cargo run --example outline -- localhost
//! ```

use nt3_client::{ConnectionState, ReconnectSupervisor};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .compact()
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".into());
    let port = match args.next() {
        Some(port) => port.parse()?,
        None => nt3_client::protocol::DEFAULT_PORT,
    };

    let supervisor = ReconnectSupervisor::builder().host(host).port(port).start()?;
    let mut snapshots = supervisor.subscribe();

    let live = snapshots
        .wait_for(|s| s.state == ConnectionState::Live)
        .await?
        .clone();
    println!("{}", serde_json::to_string_pretty(&*live.tree)?);
    println!("{} entries from {}", live.entry_count, live.target);

    let mut connected = live.connected;
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.connected != connected {
                    connected = snapshot.connected;
                    println!("{}: {} ({} entries)", snapshot.target, snapshot.state, snapshot.entry_count);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    supervisor.shutdown().await?;
    Ok(())
}
