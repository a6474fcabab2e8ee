//! Outbound side of a session and the handle others use to reach it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_core::SessionId;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::SessionError;
use crate::registry::{RegistryHandle, RemovalReason};

/// Type-erased write half of a client stream
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write half plus whether it has been shut down.
struct WriterState {
    writer: BufWriter<BoxedWriter>,
    shut_down: bool,
}

/// Serialized, timeout-bounded writer for one client stream.
///
/// The session's own replies and every broadcaster go through the same
/// mutex, so lines from different writers never interleave.
#[derive(Clone)]
pub struct Outbound {
    state: Arc<Mutex<WriterState>>,
    closed: Arc<AtomicBool>,
    write_timeout: Duration,
}

impl Outbound {
    pub fn new<W>(writer: W, write_timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: BoxedWriter = Box::new(writer);
        Self {
            state: Arc::new(Mutex::new(WriterState {
                writer: BufWriter::new(boxed),
                shut_down: false,
            })),
            closed: Arc::new(AtomicBool::new(false)),
            write_timeout,
        }
    }

    /// Writes `text` followed by `\n` and flushes.
    ///
    /// # Errors
    ///
    /// - `SessionError::Closed` once writes have been rejected
    /// - `SessionError::WriteTimeout` if the peer stops draining its socket
    /// - `SessionError::Io` on any write failure
    pub async fn send_line(&self, text: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;

        // Checked under the lock: nothing is written once close has begun
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }

        let writer = &mut state.writer;
        match timeout(self.write_timeout, async {
            writer.write_all(text.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Io(e.to_string())),
            Err(_) => Err(SessionError::WriteTimeout),
        }
    }

    /// Refuses all further writes without touching the stream.
    pub fn reject_writes(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Refuses further writes and shuts the write side down.
    ///
    /// Safe to call repeatedly; only the first call touches the stream.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.reject_writes();

        let mut state = self.state.lock().await;
        if state.shut_down {
            return Ok(());
        }
        state.shut_down = true;

        match timeout(self.write_timeout, state.writer.shutdown()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Io(e.to_string())),
            Err(_) => Err(SessionError::WriteTimeout),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Non-owning reference to a live session.
///
/// Held by the registry and by broadcasters. Through it a session can be
/// written to, or torn down from outside its own task.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    outbound: Outbound,
    cancel: CancellationToken,
    torn_down: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Creates a handle. `cancel` stops the session's read loop.
    pub fn new(id: SessionId, outbound: Outbound, cancel: CancellationToken) -> Self {
        Self {
            id,
            outbound,
            cancel,
            torn_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Writes one line to the client.
    pub async fn send_line(&self, text: &str) -> Result<(), SessionError> {
        self.outbound.send_line(text).await
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Stops the session: rejects further output, removes it from the
    /// registry, wakes its read loop, and shuts its stream down.
    ///
    /// Idempotent and safe to race. Returns `true` only for the call that
    /// actually performed the teardown.
    pub async fn teardown(&self, registry: &RegistryHandle, reason: RemovalReason) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.outbound.reject_writes();
        self.cancel.cancel();

        if let Err(e) = registry.unregister(self.id, reason).await {
            debug!(session_id = %self.id, error = %e, "Unregister during teardown failed");
        }

        if let Err(e) = self.outbound.close().await {
            debug!(session_id = %self.id, error = %e, "Stream shutdown failed");
        }

        debug!(session_id = %self.id, reason = %reason, "Session torn down");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

    use crate::registry::spawn_registry;

    const WRITE_TIMEOUT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_send_line_appends_terminator() {
        let (server_side, client_side) = tokio::io::duplex(64);
        let outbound = Outbound::new(server_side, WRITE_TIMEOUT);

        outbound.send_line("hello").await.unwrap();
        outbound.send_line("").await.unwrap();

        let mut reader = BufReader::new(client_side);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "hello\n");
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "\n");
    }

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let (server_side, mut client_side) = tokio::io::duplex(64);
        let outbound = Outbound::new(server_side, WRITE_TIMEOUT);

        outbound.close().await.unwrap();
        assert!(outbound.is_closed());
        assert_eq!(outbound.send_line("late").await, Err(SessionError::Closed));

        // Peer sees EOF and nothing else
        let mut buf = Vec::new();
        client_side.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_close_twice_is_harmless() {
        let (server_side, _client_side) = tokio::io::duplex(64);
        let outbound = Outbound::new(server_side, WRITE_TIMEOUT);

        assert!(outbound.close().await.is_ok());
        assert!(outbound.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_write_to_dropped_peer_fails() {
        let (server_side, client_side) = tokio::io::duplex(64);
        let outbound = Outbound::new(server_side, WRITE_TIMEOUT);
        drop(client_side);

        assert!(matches!(
            outbound.send_line("anyone?").await,
            Err(SessionError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_write_timeout() {
        let (server_side, _client_side) = tokio::io::duplex(4);
        let outbound = Outbound::new(server_side, WRITE_TIMEOUT);

        assert_eq!(
            outbound.send_line("too long for the pipe").await,
            Err(SessionError::WriteTimeout)
        );
    }

    #[tokio::test]
    async fn test_concurrent_teardown_runs_once() {
        let registry = spawn_registry(10);
        let mut events = registry.subscribe();

        let (server_side, _client_side) = tokio::io::duplex(64);
        let id = SessionId::new(1);
        let handle = SessionHandle::new(
            id,
            Outbound::new(server_side, WRITE_TIMEOUT),
            CancellationToken::new(),
        );
        registry
            .register(crate::registry::SessionEntry::new(
                handle.clone(),
                chat_core::SessionView::connecting(id, None),
            ))
            .await
            .unwrap();
        let _ = events.recv().await.unwrap(); // Registered

        let (first, second) = tokio::join!(
            handle.teardown(&registry, RemovalReason::Disconnected),
            handle.teardown(&registry, RemovalReason::Shutdown),
        );

        assert!(first ^ second, "exactly one teardown should win");
        assert!(handle.is_torn_down());
        assert!(handle.cancel_token().is_cancelled());
        assert_eq!(registry.count().await, 0);

        assert!(matches!(
            events.recv().await.unwrap(),
            crate::registry::RegistryEvent::Removed { .. }
        ));
        assert!(events.try_recv().is_err());
    }
}
