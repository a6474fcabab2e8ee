//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor, fanning messages out to registered sessions, and
//! subscribing to membership events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use chat_core::{SessionId, SessionView};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use super::commands::{RegistryCommand, RegistryError, RegistryEvent, RemovalReason, SessionEntry};
use crate::session::SessionError;

// ============================================================================
// Broadcast Report
// ============================================================================

/// Outcome of one [`RegistryHandle::broadcast`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the message was written to
    pub delivered: usize,

    /// Sessions whose write failed; each was torn down
    pub failed: Vec<SessionId>,

    /// Sessions already closing when their turn came
    pub skipped: usize,
}

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// Sessions hold one as their back-reference to the registry; it never owns
/// a session.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Register a session.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateSession` if the id is already registered
    /// - `RegistryError::RegistryFull` if the registry is at maximum capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, entry: SessionEntry) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                entry: Box::new(entry),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Record a session's first nickname and mark it active.
    pub async fn activate(
        &self,
        session_id: SessionId,
        nickname: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Activate {
                session_id,
                nickname: nickname.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Record a session's new nickname.
    pub async fn rename(
        &self,
        session_id: SessionId,
        nickname: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Rename {
                session_id,
                nickname: nickname.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Remove a session.
    ///
    /// Returns `Ok(true)` if the session was registered, `Ok(false)` if it
    /// was already gone. Removing twice is harmless.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn unregister(
        &self,
        session_id: SessionId,
        reason: RemovalReason,
    ) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Unregister {
                session_id,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Get a single session's view.
    ///
    /// Returns `None` if the session doesn't exist or the actor is gone.
    pub async fn get(&self, session_id: SessionId) -> Option<SessionView> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Get {
                session_id,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Point-in-time copy of every registered session, oldest first.
    ///
    /// Returns an empty vector if the actor is gone.
    pub async fn snapshot(&self) -> Vec<SessionEntry> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Snapshot { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Views of every registered session, oldest first.
    pub async fn views(&self) -> Vec<SessionView> {
        self.snapshot().await.into_iter().map(|e| e.view).collect()
    }

    /// Number of registered sessions (0 if the actor is gone).
    pub async fn count(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Count { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or_default()
    }

    /// Remove every session at once and return them.
    pub async fn drain(&self) -> Vec<SessionEntry> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Drain { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Deliver `message` to every registered session except `exclude`.
    ///
    /// Works on a snapshot, so no registry state is locked while writing.
    /// Each write is bounded by the session's write timeout. A session whose
    /// write fails is torn down and the remaining sessions still receive the
    /// message.
    pub async fn broadcast(&self, message: &str, exclude: Option<SessionId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for entry in self.snapshot().await {
            let session_id = entry.id();
            if exclude == Some(session_id) {
                continue;
            }

            match entry.handle.send_line(message).await {
                Ok(()) => report.delivered += 1,
                Err(SessionError::Closed) => report.skipped += 1,
                Err(e) => {
                    debug!(
                        session_id = %session_id,
                        error = %e,
                        "Failed to deliver broadcast, tearing session down"
                    );
                    entry
                        .handle
                        .teardown(self, RemovalReason::DeliveryFailed)
                        .await;
                    report.failed.push(session_id);
                }
            }
        }

        report
    }

    /// Subscribe to membership events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
