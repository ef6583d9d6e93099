//! Integration tests for nt3-client.
//!
//! Each test runs the supervisor against an in-process fake NT3 server on a
//! loopback TcpListener.

use std::time::Duration;

use nt3_client::protocol::{
    EntryAssignment, EntryUpdate, EntryValue, Message, CLIENT_HELLO, CLIENT_HELLO_COMPLETE,
    KEEP_ALIVE,
};
use nt3_client::{ConnectionState, ReconnectPolicy, ReconnectSupervisor, TableSnapshot};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(5);

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn supervisor(port: u16) -> ReconnectSupervisor {
    ReconnectSupervisor::builder()
        .host("127.0.0.1")
        .port(port)
        .connect_timeout(Duration::from_millis(500))
        .reconnect(ReconnectPolicy::immediate())
        .start()
        .unwrap()
}

/// Accept a connection and consume the ClientHello.
async fn accept(listener: &TcpListener) -> TcpStream {
    let (mut socket, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("no connection attempt")
        .unwrap();
    let mut hello = [0u8; 4];
    socket.read_exact(&mut hello).await.unwrap();
    assert_eq!(hello, CLIENT_HELLO);
    socket
}

/// Send ServerHello, `entries`, ServerHelloComplete; expect ClientHelloComplete.
async fn sync(socket: &mut TcpStream, entries: &[Message]) {
    let mut stream = Message::ServerHello {
        flags: 0,
        identity: "fake".into(),
    }
    .to_bytes();
    for message in entries {
        message.encode(&mut stream);
    }
    Message::ServerHelloComplete.encode(&mut stream);
    socket.write_all(&stream).await.unwrap();

    let mut complete = [0u8; 1];
    socket.read_exact(&mut complete).await.unwrap();
    assert_eq!(complete, CLIENT_HELLO_COMPLETE);
}

fn assign(name: &str, id: u16, value: EntryValue) -> Message {
    Message::EntryAssignment(EntryAssignment {
        name: name.into(),
        id,
        seq: 1,
        flags: 0,
        value,
    })
}

async fn wait_for(
    snapshots: &mut watch::Receiver<TableSnapshot>,
    predicate: impl FnMut(&TableSnapshot) -> bool,
) -> TableSnapshot {
    let snapshot = tokio::time::timeout(WAIT, snapshots.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .unwrap()
        .clone();
    snapshot
}

fn value_at(snapshot: &TableSnapshot, path: &str) -> Option<EntryValue> {
    snapshot
        .tree
        .get(path)
        .and_then(|node| node.entry())
        .map(|entry| entry.value().clone())
}

/// Handshake, sync, then a live update.
#[tokio::test]
async fn test_sync_builds_tree() {
    let (listener, port) = listener().await;
    let supervisor = supervisor(port);
    let mut snapshots = supervisor.subscribe();

    let mut socket = accept(&listener).await;
    sync(
        &mut socket,
        &[
            assign("/a/b", 1, EntryValue::Bool(true)),
            assign("/a/c", 2, EntryValue::Double(1.5)),
            assign("/x", 3, EntryValue::StringArray(vec!["s".into()])),
        ],
    )
    .await;

    let snapshot = wait_for(&mut snapshots, |s| {
        s.state == ConnectionState::Live && s.entry_count == 3
    })
    .await;
    assert!(snapshot.connected);
    let top: Vec<_> = snapshot.tree.root().children().map(|n| n.segment()).collect();
    assert_eq!(top, ["a", "x"]);
    assert!(snapshot.tree.get("a").unwrap().is_placeholder());
    assert_eq!(value_at(&snapshot, "a/c"), Some(EntryValue::Double(1.5)));

    let update = Message::EntryUpdate(EntryUpdate {
        id: 2,
        seq: 2,
        value: EntryValue::Double(2.5),
    });
    socket.write_all(&update.to_bytes()).await.unwrap();

    wait_for(&mut snapshots, |s| {
        value_at(s, "a/c") == Some(EntryValue::Double(2.5))
    })
    .await;

    supervisor.shutdown().await.unwrap();
}

/// An entry re-announced after a reconnect keeps its identity.
#[tokio::test]
async fn test_reconnect_reclaims_entries() {
    let (listener, port) = listener().await;
    let supervisor = supervisor(port);
    let mut snapshots = supervisor.subscribe();

    let mut socket = accept(&listener).await;
    sync(
        &mut socket,
        &[
            assign("/a/b", 1, EntryValue::Double(1.0)),
            assign("/stale", 2, EntryValue::Double(2.0)),
        ],
    )
    .await;
    let before = wait_for(&mut snapshots, |s| s.entry_count == 2).await;
    let key = before.tree.get("a/b").unwrap().entry().unwrap().key();

    // Server drops the connection.
    drop(socket);
    wait_for(&mut snapshots, |s| !s.connected).await;

    let mut socket = accept(&listener).await;
    sync(&mut socket, &[assign("/a/b", 9, EntryValue::Double(3.0))]).await;

    let after = wait_for(&mut snapshots, |s| {
        s.state == ConnectionState::Live && s.entry_count == 1
    })
    .await;
    let entry = after.tree.get("a/b").unwrap().entry().unwrap();
    assert_eq!(entry.key(), key);
    assert_eq!(entry.id(), 9);
    assert_eq!(entry.value(), &EntryValue::Double(3.0));
    assert!(after.tree.get("stale").is_none());

    supervisor.shutdown().await.unwrap();
}

/// Garbage from the server ends the session and triggers a reconnect.
#[tokio::test]
async fn test_protocol_error_reconnects() {
    let (listener, port) = listener().await;
    let supervisor = supervisor(port);
    let mut snapshots = supervisor.subscribe();

    let mut socket = accept(&listener).await;
    sync(&mut socket, &[assign("/v", 1, EntryValue::Bool(true))]).await;
    wait_for(&mut snapshots, |s| s.entry_count == 1).await;

    socket.write_all(&[0x7e]).await.unwrap();

    let mut socket = accept(&listener).await;
    sync(&mut socket, &[]).await;
    let snapshot = wait_for(&mut snapshots, |s| s.state == ConnectionState::Live).await;
    assert_eq!(snapshot.entry_count, 0);

    supervisor.shutdown().await.unwrap();
}

/// ClearAllEntries requires the magic.
#[tokio::test]
async fn test_clear_all_over_session() {
    let (listener, port) = listener().await;
    let supervisor = supervisor(port);
    let mut snapshots = supervisor.subscribe();

    let mut socket = accept(&listener).await;
    sync(
        &mut socket,
        &[
            assign("/a", 1, EntryValue::Bool(true)),
            assign("/b", 2, EntryValue::Bool(false)),
        ],
    )
    .await;
    wait_for(&mut snapshots, |s| s.entry_count == 2).await;

    // Bad magic followed by a marker update, so the ignored clear is observable.
    let mut stream = Message::ClearAllEntries { magic: 0xAABB_CCDD }.to_bytes();
    Message::EntryUpdate(EntryUpdate {
        id: 1,
        seq: 2,
        value: EntryValue::Bool(false),
    })
    .encode(&mut stream);
    socket.write_all(&stream).await.unwrap();

    let snapshot = wait_for(&mut snapshots, |s| {
        value_at(s, "a") == Some(EntryValue::Bool(false))
    })
    .await;
    assert_eq!(snapshot.entry_count, 2);

    socket.write_all(&Message::clear_all().to_bytes()).await.unwrap();
    let snapshot = wait_for(&mut snapshots, |s| s.entry_count == 0).await;
    assert!(snapshot.tree.is_empty());
    assert!(snapshot.connected);

    supervisor.shutdown().await.unwrap();
}

/// An idle live session sends keep alives.
#[tokio::test]
async fn test_keep_alive_when_idle() {
    let (listener, port) = listener().await;
    let supervisor = ReconnectSupervisor::builder()
        .host("127.0.0.1")
        .port(port)
        .keep_alive_interval(Duration::from_millis(50))
        .start()
        .unwrap();

    let mut socket = accept(&listener).await;
    sync(&mut socket, &[]).await;

    let mut byte = [0xffu8; 1];
    tokio::time::timeout(WAIT, socket.read_exact(&mut byte))
        .await
        .expect("no keep alive")
        .unwrap();
    assert_eq!(byte, KEEP_ALIVE);

    supervisor.shutdown().await.unwrap();
}

/// set_target moves a live session to another server.
#[tokio::test]
async fn test_set_target_switches_server() {
    let (first, first_port) = listener().await;
    let (second, second_port) = listener().await;
    let supervisor = supervisor(first_port);
    let mut snapshots = supervisor.subscribe();

    let mut socket = accept(&first).await;
    sync(&mut socket, &[assign("/first", 1, EntryValue::Bool(true))]).await;
    wait_for(&mut snapshots, |s| s.entry_count == 1).await;

    supervisor.set_target("127.0.0.1", second_port).await.unwrap();

    // The old connection is closed by the client.
    let mut rest = Vec::new();
    tokio::time::timeout(WAIT, socket.read_to_end(&mut rest))
        .await
        .expect("old session not closed")
        .unwrap();

    let mut socket = accept(&second).await;
    sync(&mut socket, &[assign("/second", 1, EntryValue::Bool(true))]).await;

    let snapshot = wait_for(&mut snapshots, |s| {
        s.state == ConnectionState::Live && s.tree.get("second").is_some()
    })
    .await;
    assert_eq!(snapshot.target.port, second_port);
    assert!(snapshot.tree.get("first").is_none());

    supervisor.shutdown().await.unwrap();
}

/// While stopped, set_target only records the target.
#[tokio::test]
async fn test_set_target_while_stopped() {
    let (first, first_port) = listener().await;
    let (second, second_port) = listener().await;
    let supervisor = supervisor(first_port);
    let mut snapshots = supervisor.subscribe();

    let mut socket = accept(&first).await;
    sync(&mut socket, &[]).await;
    wait_for(&mut snapshots, |s| s.state == ConnectionState::Live).await;

    supervisor.stop().await.unwrap();
    wait_for(&mut snapshots, |s| s.state == ConnectionState::Disconnected).await;

    supervisor.set_target("127.0.0.1", second_port).await.unwrap();
    wait_for(&mut snapshots, |s| s.target.port == second_port).await;

    let attempt = tokio::time::timeout(Duration::from_millis(200), second.accept()).await;
    assert!(attempt.is_err(), "connected while stopped");

    supervisor.restart().await.unwrap();
    let mut socket = accept(&second).await;
    sync(&mut socket, &[]).await;
    wait_for(&mut snapshots, |s| s.state == ConnectionState::Live).await;

    supervisor.shutdown().await.unwrap();
}

/// Restart tears down a live session and resyncs.
#[tokio::test]
async fn test_restart_while_live() {
    let (listener, port) = listener().await;
    let supervisor = supervisor(port);
    let mut snapshots = supervisor.subscribe();

    let mut socket = accept(&listener).await;
    sync(&mut socket, &[assign("/keep", 4, EntryValue::Bool(true))]).await;
    let before = wait_for(&mut snapshots, |s| s.entry_count == 1).await;
    let key = before.tree.get("keep").unwrap().entry().unwrap().key();

    supervisor.restart().await.unwrap();

    let mut socket = accept(&listener).await;
    sync(&mut socket, &[assign("/keep", 5, EntryValue::Bool(true))]).await;
    let after = wait_for(&mut snapshots, |s| {
        s.state == ConnectionState::Live
            && s.tree.get("keep").and_then(|n| n.entry()).map(|e| e.id()) == Some(5)
    })
    .await;
    assert_eq!(after.tree.get("keep").unwrap().entry().unwrap().key(), key);

    supervisor.shutdown().await.unwrap();
}
