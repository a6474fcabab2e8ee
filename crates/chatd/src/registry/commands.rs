//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RegistryEvent`: Events published by the registry for subscribers

use chat_core::{SessionId, SessionView};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::session::SessionHandle;

// ============================================================================
// Session Entry
// ============================================================================

/// What the registry stores per session: a non-owning handle used to reach
/// the session, plus the view reported by snapshots.
///
/// Cloning is cheap; the handle only holds shared pointers.
#[derive(Clone)]
pub struct SessionEntry {
    pub handle: SessionHandle,
    pub view: SessionView,
}

impl SessionEntry {
    pub fn new(handle: SessionHandle, view: SessionView) -> Self {
        Self { handle, view }
    }

    pub fn id(&self) -> SessionId {
        self.view.id
    }
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a new session in the `Connecting` state.
    ///
    /// # Errors
    /// - `RegistryError::DuplicateSession` if the id is already registered
    /// - `RegistryError::RegistryFull` if at maximum capacity
    Register {
        /// Entry to insert (boxed for size optimization)
        entry: Box<SessionEntry>,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Record the first nickname and move the session to `Active`.
    ///
    /// # Errors
    /// - `RegistryError::SessionNotFound` if the session was already removed
    Activate {
        session_id: SessionId,
        nickname: String,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Record a new nickname for an active session.
    ///
    /// # Errors
    /// - `RegistryError::SessionNotFound` if the session was already removed
    Rename {
        session_id: SessionId,
        nickname: String,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a session. Replies `true` if it was present; absence is not an error.
    Unregister {
        session_id: SessionId,
        reason: RemovalReason,
        respond_to: oneshot::Sender<bool>,
    },

    /// Get one session's view.
    Get {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionView>>,
    },

    /// Copy every entry, ordered by session id.
    Snapshot {
        respond_to: oneshot::Sender<Vec<SessionEntry>>,
    },

    /// Number of registered sessions.
    Count { respond_to: oneshot::Sender<usize> },

    /// Remove and return every entry in one step (server shutdown).
    Drain {
        respond_to: oneshot::Sender<Vec<SessionEntry>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry has reached its maximum session capacity.
    #[error("registry is full (max: {max} sessions)")]
    RegistryFull {
        /// Maximum number of sessions allowed
        max: usize,
    },

    /// A session with this id is already registered.
    ///
    /// Ids come from a monotonic counter, so this indicates a bug in the caller.
    #[error("duplicate session: {0}")]
    DuplicateSession(SessionId),

    /// The session is not (or no longer) registered.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Registry Events
// ============================================================================

/// Events published by the registry to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A connection was registered (still choosing a nickname).
    Registered { session_id: SessionId },

    /// A session chose its first nickname.
    Activated {
        session_id: SessionId,
        nickname: String,
    },

    /// A session changed nickname.
    Renamed {
        session_id: SessionId,
        old: Option<String>,
        new: String,
    },

    /// A session left the registry.
    Removed {
        session_id: SessionId,
        reason: RemovalReason,
    },
}

/// Reason why a session was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The peer closed the stream or a read failed.
    Disconnected,

    /// The client sent `/quit`.
    Quit,

    /// Writing a broadcast to the session failed or timed out.
    DeliveryFailed,

    /// Nothing was received within the idle timeout.
    IdleTimeout,

    /// The server is shutting down.
    Shutdown,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Quit => write!(f, "quit"),
            Self::DeliveryFailed => write!(f, "delivery failed"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::Shutdown => write!(f, "server shutdown"),
        }
    }
}
