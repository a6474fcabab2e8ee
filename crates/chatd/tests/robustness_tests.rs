//! Robustness tests for the chat server.
//!
//! These tests verify the server handles hostile or unusual clients without
//! affecting anyone else:
//! - Invalid UTF-8 (relayed lossily) and oversized lines
//! - Idle clients
//! - Rapid connect/disconnect
//! - High-frequency chat
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use chatd::config::Config;
use chatd::registry::{spawn_registry, RegistryHandle};
use chatd::server::{Server, ServerHandle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const RECV_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const PROMPT: &str = "Please enter a nickname: ";

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    addr: SocketAddr,
    handle: ServerHandle,
    registry: RegistryHandle,
}

impl TestServer {
    async fn spawn_with(config: Config) -> Self {
        let config = Config {
            bind: "127.0.0.1".parse().unwrap(),
            port: 0,
            ..config
        };

        let registry = spawn_registry(config.max_sessions);
        let server = Server::bind(&config, registry.clone(), CancellationToken::new())
            .await
            .expect("bind test server");

        let addr = server.local_addr();
        let handle = server.handle();
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            addr,
            handle,
            registry,
        }
    }

    async fn spawn() -> Self {
        Self::spawn_with(Config::default()).await
    }

    async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    async fn join(&self, nickname: &str) -> TestClient {
        let mut client = self.connect().await;
        assert_eq!(client.recv().await, PROMPT);
        client.send(nickname).await;
        assert_eq!(client.recv().await, format!("{nickname} joined the chat."));
        client
    }

    async fn wait_for_count(&self, expected: usize) {
        let start = tokio::time::Instant::now();
        loop {
            let count = self.registry.count().await;
            if count == expected {
                return;
            }
            assert!(
                start.elapsed() < RECV_TIMEOUT,
                "registry held {count} sessions, expected {expected}"
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    async fn recv(&mut self) -> String {
        let mut line = String::new();
        let n = tokio::time::timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        assert!(n > 0, "connection closed while waiting for a line");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    /// Returns once the server has closed (or reset) the connection.
    async fn expect_closed(&mut self) {
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
                .await
                .expect("connection was not closed");
            if matches!(read, Ok(0) | Err(_)) {
                return;
            }
        }
    }
}

// ============================================================================
// Malformed Input Tests
// ============================================================================

#[tokio::test]
async fn test_invalid_utf8_is_relayed_with_replacement() {
    let server = TestServer::spawn().await;

    let mut bob = server.join("bob").await;
    let mut carol = server.join("carol").await;
    assert_eq!(bob.recv().await, "carol joined the chat.");

    // Latin-1 "café"
    carol.send_raw(b"caf\xe9\n").await;
    assert_eq!(bob.recv().await, "carol: caf\u{FFFD}");
    assert_eq!(carol.recv().await, "carol: caf\u{FFFD}");

    // Carol stays connected
    assert_eq!(server.registry.count().await, 2);
    carol.send("still here").await;
    assert_eq!(bob.recv().await, "carol: still here");
}

#[tokio::test]
async fn test_oversized_line_disconnects() {
    let server = TestServer::spawn_with(Config {
        max_line_length: 16,
        ..Config::default()
    })
    .await;

    let mut bob = server.join("bob").await;

    bob.send("short enough").await;
    assert_eq!(bob.recv().await, "bob: short enough");

    bob.send(&"x".repeat(100)).await;
    bob.expect_closed().await;
    server.wait_for_count(0).await;
}

#[tokio::test]
async fn test_empty_and_whitespace_lines_are_relayed() {
    let server = TestServer::spawn().await;
    let mut bob = server.join("bob").await;

    bob.send("").await;
    assert_eq!(bob.recv().await, "bob: ");

    bob.send("   ").await;
    assert_eq!(bob.recv().await, "bob:    ");
}

#[tokio::test]
async fn test_crlf_clients() {
    let server = TestServer::spawn().await;

    let mut bob = server.connect().await;
    assert_eq!(bob.recv().await, PROMPT);
    bob.send_raw(b"bob\r\n").await;
    assert_eq!(bob.recv().await, "bob joined the chat.");

    bob.send_raw(b"/nick dave\r\n").await;
    assert_eq!(bob.recv().await, "bobrenamed themselves to dave");
    assert_eq!(bob.recv().await, "Successfully changed nickname to dave");
}

// ============================================================================
// Idle and Disconnect Tests
// ============================================================================

#[tokio::test]
async fn test_idle_client_disconnected() {
    let server = TestServer::spawn_with(Config {
        idle_timeout_secs: Some(1),
        ..Config::default()
    })
    .await;

    let mut bob = server.join("bob").await;
    bob.expect_closed().await;
    server.wait_for_count(0).await;
}

#[tokio::test]
async fn test_disconnect_during_handshake() {
    let server = TestServer::spawn().await;
    let mut bob = server.join("bob").await;

    let mut ghost = server.connect().await;
    assert_eq!(ghost.recv().await, PROMPT);
    server.wait_for_count(2).await;

    drop(ghost);
    server.wait_for_count(1).await;

    // Nothing was announced for the ghost
    bob.send("hello").await;
    assert_eq!(bob.recv().await, "bob: hello");
}

#[tokio::test]
async fn test_rapid_connect_disconnect() {
    let server = TestServer::spawn().await;

    for _ in 0..50 {
        let client = server.connect().await;
        drop(client);
    }

    server.wait_for_count(0).await;

    // Server still accepts and serves clients
    let mut bob = server.join("bob").await;
    bob.send("after the storm").await;
    assert_eq!(bob.recv().await, "bob: after the storm");

    // Every dropped connection is eventually cleaned up
    server.wait_for_count(1).await;
}

// ============================================================================
// High-Frequency Tests
// ============================================================================

#[tokio::test]
async fn test_rapid_messages_arrive_in_order() {
    let server = TestServer::spawn().await;

    let mut bob = server.join("bob").await;
    let mut carol = server.join("carol").await;
    assert_eq!(bob.recv().await, "carol joined the chat.");

    for i in 0..100 {
        bob.send(&format!("message {i}")).await;
    }

    for i in 0..100 {
        assert_eq!(carol.recv().await, format!("bob: message {i}"));
    }
    for i in 0..100 {
        assert_eq!(bob.recv().await, format!("bob: message {i}"));
    }
}

#[tokio::test]
async fn test_interleaved_senders_never_split_lines() {
    let server = TestServer::spawn().await;

    let mut bob = server.join("bob").await;
    let mut carol = server.join("carol").await;
    let mut watcher = server.join("watcher").await;
    assert_eq!(bob.recv().await, "carol joined the chat.");
    assert_eq!(bob.recv().await, "watcher joined the chat.");
    assert_eq!(carol.recv().await, "watcher joined the chat.");

    let long = "y".repeat(1000);
    for _ in 0..20 {
        tokio::join!(bob.send(&long), carol.send(&long));
    }

    let mut from_bob = 0;
    let mut from_carol = 0;
    for _ in 0..40 {
        let line = watcher.recv().await;
        if line == format!("bob: {long}") {
            from_bob += 1;
        } else if line == format!("carol: {long}") {
            from_carol += 1;
        } else {
            panic!("corrupted line of {} bytes", line.len());
        }
    }
    assert_eq!(from_bob, 20);
    assert_eq!(from_carol, 20);
}
