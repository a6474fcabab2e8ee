//! Per-connection session state machine.
//!
//! Each accepted client gets one `Session`, run on its own task:
//!
//! ```text
//!  Connecting ──nickname──▶ Active ──/quit, EOF, error──▶ Closed
//!      │                                                    ▲
//!      └────────────────EOF / error / shutdown──────────────┘
//! ```
//!
//! - **Connecting**: registered, prompted for a nickname, waiting for one line
//! - **Active**: relays chat lines and executes `/nick` and `/quit`
//! - **Closed**: torn down through [`SessionHandle::teardown`]; never reused
//!
//! The session is generic over its byte stream, so TCP sockets and in-memory
//! duplex pipes run the same code.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in teardown of this session only

mod handle;

pub use handle::{BoxedWriter, Outbound, SessionHandle};

use std::time::Duration;

use chat_core::{SessionId, SessionState, SessionView};
use chat_protocol::{strip_line_terminator, Command, Notice, Reply};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader, ReadHalf};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, QuitPolicy};
use crate::registry::{RegistryError, RegistryHandle, RemovalReason, SessionEntry};

/// Per-session behavior derived from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub write_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_line_length: usize,
    pub quit_policy: QuitPolicy,
    pub echo_to_sender: bool,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            write_timeout: config.write_timeout(),
            idle_timeout: config.idle_timeout(),
            max_line_length: config.max_line_length,
            quit_policy: config.quit_policy,
            echo_to_sender: config.echo_to_sender,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// One client's lifecycle: handshake, command loop, relay, teardown.
pub struct Session<R> {
    /// Buffered read half, owned exclusively by this session's task
    reader: BufReader<R>,

    /// Shared write side and teardown switch
    handle: SessionHandle,

    /// Back-reference used to broadcast and deregister
    registry: RegistryHandle,

    /// Server-wide shutdown, triggered by `/quit` under `QuitPolicy::Server`
    server_shutdown: CancellationToken,

    settings: SessionSettings,
    view: SessionView,
}

impl<S> Session<ReadHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Creates a session for a freshly accepted stream.
    ///
    /// The session's cancellation token is a child of `server_shutdown`, so
    /// shutting the server down also stops every session's read loop.
    pub fn new(
        id: SessionId,
        stream: S,
        peer_addr: Option<String>,
        registry: RegistryHandle,
        server_shutdown: CancellationToken,
        settings: SessionSettings,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let outbound = Outbound::new(writer, settings.write_timeout);
        let handle = SessionHandle::new(id, outbound, server_shutdown.child_token());

        Self {
            reader: BufReader::new(reader),
            handle,
            registry,
            server_shutdown,
            settings,
            view: SessionView::connecting(id, peer_addr),
        }
    }
}

impl<R> Session<R>
where
    R: AsyncRead + Send + Unpin,
{
    pub fn id(&self) -> SessionId {
        self.view.id
    }

    /// Runs the session to completion.
    ///
    /// Returns why the session ended. Fails only when the registry refuses
    /// the registration, in which case the client was told and disconnected.
    pub async fn run(mut self) -> Result<RemovalReason, SessionError> {
        let id = self.id();
        debug!(session_id = %id, peer = ?self.view.peer_addr, "New client connected");

        if let Err(e) = self.register().await {
            warn!(session_id = %id, error = %e, "Registration refused");
            let _ = self.send_reply(Reply::ServerFull).await;
            self.handle
                .teardown(&self.registry, RemovalReason::Disconnected)
                .await;
            self.view.state = SessionState::Closed;
            return Err(e);
        }

        let reason = match self.handshake().await {
            Ok(()) => self.process_lines().await,
            Err(e) => {
                debug!(session_id = %id, error = %e, "Client left before choosing a nickname");
                reason_for(&e)
            }
        };

        self.close(reason).await;
        Ok(reason)
    }

    /// Adds this session to the registry in the `Connecting` state.
    async fn register(&mut self) -> Result<(), SessionError> {
        let entry = SessionEntry::new(self.handle.clone(), self.view.clone());
        self.registry.register(entry).await?;
        Ok(())
    }

    /// Prompts for a nickname and waits for it.
    ///
    /// Whatever the first line holds, including nothing, becomes the nickname.
    async fn handshake(&mut self) -> Result<(), SessionError> {
        self.send_reply(Reply::NicknamePrompt).await?;

        let line = self.next_line().await?;
        let nickname = strip_line_terminator(&line).to_string();

        self.view.state = self.view.state.transition(self.id(), SessionState::Active)?;
        self.view.nickname = Some(nickname.clone());
        self.registry.activate(self.id(), nickname.as_str()).await?;

        info!(session_id = %self.id(), nickname = %nickname, "Client joined");
        self.broadcast(Notice::Joined {
            nickname: &nickname,
        })
        .await;

        Ok(())
    }

    /// Reads and executes lines until the session ends.
    async fn process_lines(&mut self) -> RemovalReason {
        loop {
            let line = match self.next_line().await {
                Ok(line) => line,
                Err(e) => {
                    debug!(session_id = %self.id(), error = %e, "Connection closed");
                    return reason_for(&e);
                }
            };

            match self.handle_line(strip_line_terminator(&line)).await {
                Ok(Some(reason)) => return reason,
                Ok(None) => {}
                Err(e) => {
                    debug!(session_id = %self.id(), error = %e, "Failed to reply to client");
                    return reason_for(&e);
                }
            }

            // Our own broadcast may have failed to reach us
            if self.handle.is_torn_down() {
                return RemovalReason::DeliveryFailed;
            }
        }
    }

    /// Executes one line. Returns `Some(reason)` when the session should end.
    async fn handle_line(&mut self, line: &str) -> Result<Option<RemovalReason>, SessionError> {
        let nickname = self.nickname().to_string();

        match Command::parse(line) {
            Command::Nick(new) => {
                let notice = Notice::Renamed {
                    old: &nickname,
                    new,
                };
                info!(session_id = %self.id(), "{notice}");
                self.broadcast(notice).await;

                self.view.nickname = Some(new.to_string());
                if let Err(e) = self.registry.rename(self.id(), new).await {
                    debug!(session_id = %self.id(), error = %e, "Rename not recorded");
                }
                self.send_reply(Reply::NicknameChanged { nickname: new })
                    .await?;
            }

            Command::NickMissing => {
                self.send_reply(Reply::NicknameMissing).await?;
            }

            Command::Quit => {
                info!(session_id = %self.id(), nickname = %nickname, "Client quit");
                self.broadcast(Notice::Left {
                    nickname: &nickname,
                })
                .await;

                if self.settings.quit_policy == QuitPolicy::Server {
                    info!(session_id = %self.id(), "Quit requests server shutdown");
                    self.server_shutdown.cancel();
                }
                return Ok(Some(RemovalReason::Quit));
            }

            Command::Chat(text) => {
                debug!(session_id = %self.id(), nickname = %nickname, text = %text, "Chat message");
                self.broadcast(Notice::Chat {
                    nickname: &nickname,
                    text,
                })
                .await;
            }
        }

        Ok(None)
    }

    /// Reads one line, honoring cancellation, the idle timeout, and the
    /// line length limit.
    async fn next_line(&mut self) -> Result<String, SessionError> {
        let cancel = self.handle.cancel_token().clone();
        let idle_timeout = self.settings.idle_timeout;
        let max_line_length = self.settings.max_line_length;

        let read = async {
            let read = read_bounded_line(&mut self.reader, max_line_length);
            match idle_timeout {
                Some(limit) => timeout(limit, read)
                    .await
                    .unwrap_or(Err(SessionError::IdleTimeout)),
                None => read.await,
            }
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            result = read => result,
        }
    }

    async fn send_reply(&self, reply: Reply<'_>) -> Result<(), SessionError> {
        self.handle.send_line(&reply.to_string()).await
    }

    async fn broadcast(&self, notice: Notice<'_>) {
        let exclude = if self.settings.echo_to_sender {
            None
        } else {
            Some(self.id())
        };

        let report = self.registry.broadcast(&notice.to_string(), exclude).await;
        if !report.failed.is_empty() {
            debug!(
                session_id = %self.id(),
                failed = report.failed.len(),
                "Broadcast dropped unreachable sessions"
            );
        }
    }

    fn nickname(&self) -> &str {
        self.view.nickname.as_deref().unwrap_or_default()
    }

    /// Final teardown. A no-op if someone else already tore us down.
    async fn close(&mut self, reason: RemovalReason) {
        if self.handle.teardown(&self.registry, reason).await {
            info!(
                session_id = %self.id(),
                name = %self.view.display_name(),
                connected_secs = self.view.connected_secs(),
                reason = %reason,
                "Client disconnected"
            );
        }
        self.view.state = SessionState::Closed;
    }
}

/// Reads up to `max` bytes of line content plus its terminator.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD rather than
/// failing the read.
async fn read_bounded_line<R>(
    reader: &mut BufReader<R>,
    max: usize,
) -> Result<String, SessionError>
where
    R: AsyncRead + Unpin,
{
    // Room for the content plus "\r\n"
    let limit = (max as u64).saturating_add(2);
    let mut buf = Vec::new();

    let bytes_read = reader
        .take(limit)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| SessionError::Io(e.to_string()))?;

    if bytes_read == 0 {
        return Err(SessionError::Eof);
    }

    let terminated = buf.ends_with(b"\n");
    let content_len = if buf.ends_with(b"\r\n") {
        buf.len() - 2
    } else if terminated {
        buf.len() - 1
    } else {
        buf.len()
    };

    if content_len > max || (!terminated && bytes_read as u64 == limit) {
        return Err(SessionError::LineTooLong { max });
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Maps the error that ended a session to the reason recorded for it.
fn reason_for(error: &SessionError) -> RemovalReason {
    match error {
        SessionError::IdleTimeout => RemovalReason::IdleTimeout,
        SessionError::Cancelled => RemovalReason::Shutdown,
        _ => RemovalReason::Disconnected,
    }
}

/// Errors that can occur during a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Idle timeout")]
    IdleTimeout,

    #[error("Line too long (max: {max} bytes)")]
    LineTooLong { max: usize },

    #[error("Session is closed")]
    Closed,

    #[error("Session cancelled")]
    Cancelled,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Invalid state: {0}")]
    State(#[from] chat_core::DomainError),
}
