//! Registry actor - owns all membership state and processes commands.
//!
//! The RegistryActor is the single owner of the session map. It receives
//! commands via an mpsc channel and publishes events via broadcast.

use std::collections::BTreeMap;

use chat_core::{SessionId, SessionState};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::commands::{RegistryCommand, RegistryError, RegistryEvent, RemovalReason, SessionEntry};

/// The registry actor - owns all session state.
///
/// Implements the actor pattern: receives commands via mpsc channel,
/// processes them sequentially, and publishes events to subscribers.
///
/// # Ordering
///
/// Sessions are kept in a `BTreeMap` keyed by id. Ids are handed out in
/// accept order, so snapshots list sessions oldest first.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Registered sessions
    sessions: BTreeMap<SessionId, SessionEntry>,

    /// Capacity limit
    max_sessions: usize,

    /// Event publisher
    event_publisher: broadcast::Sender<RegistryEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RegistryEvent>,
        max_sessions: usize,
    ) -> Self {
        Self {
            receiver,
            sessions: BTreeMap::new(),
            max_sessions,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped).
    pub async fn run(mut self) {
        info!(max_sessions = self.max_sessions, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(sessions = self.sessions.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register { entry, respond_to } => {
                let result = self.handle_register(*entry);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Activate {
                session_id,
                nickname,
                respond_to,
            } => {
                let result = self.handle_activate(session_id, nickname);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Rename {
                session_id,
                nickname,
                respond_to,
            } => {
                let result = self.handle_rename(session_id, nickname);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unregister {
                session_id,
                reason,
                respond_to,
            } => {
                let removed = self.handle_unregister(session_id, reason);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Get {
                session_id,
                respond_to,
            } => {
                let view = self.sessions.get(&session_id).map(|e| e.view.clone());
                let _ = respond_to.send(view);
            }
            RegistryCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.sessions.values().cloned().collect());
            }
            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.sessions.len());
            }
            RegistryCommand::Drain { respond_to } => {
                let drained = self.handle_drain();
                let _ = respond_to.send(drained);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(&mut self, entry: SessionEntry) -> Result<(), RegistryError> {
        let session_id = entry.id();

        if self.sessions.contains_key(&session_id) {
            error!(session_id = %session_id, "Duplicate session id registered, this is a bug");
            return Err(RegistryError::DuplicateSession(session_id));
        }

        if self.sessions.len() >= self.max_sessions {
            warn!(
                session_id = %session_id,
                current = self.sessions.len(),
                max = self.max_sessions,
                "Registry is full, rejecting registration"
            );
            return Err(RegistryError::RegistryFull {
                max: self.max_sessions,
            });
        }

        self.sessions.insert(session_id, entry);
        debug!(session_id = %session_id, total = self.sessions.len(), "Session registered");
        self.publish(RegistryEvent::Registered { session_id });

        Ok(())
    }

    fn handle_activate(
        &mut self,
        session_id: SessionId,
        nickname: String,
    ) -> Result<(), RegistryError> {
        let entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(RegistryError::SessionNotFound(session_id))?;

        entry.view.state = SessionState::Active;
        entry.view.nickname = Some(nickname.clone());

        self.publish(RegistryEvent::Activated {
            session_id,
            nickname,
        });
        Ok(())
    }

    fn handle_rename(
        &mut self,
        session_id: SessionId,
        nickname: String,
    ) -> Result<(), RegistryError> {
        let entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(RegistryError::SessionNotFound(session_id))?;

        let old = entry.view.nickname.replace(nickname.clone());

        self.publish(RegistryEvent::Renamed {
            session_id,
            old,
            new: nickname,
        });
        Ok(())
    }

    fn handle_unregister(&mut self, session_id: SessionId, reason: RemovalReason) -> bool {
        if self.sessions.remove(&session_id).is_none() {
            debug!(session_id = %session_id, "Unregister of absent session ignored");
            return false;
        }

        debug!(
            session_id = %session_id,
            reason = %reason,
            total = self.sessions.len(),
            "Session unregistered"
        );
        self.publish(RegistryEvent::Removed { session_id, reason });
        true
    }

    fn handle_drain(&mut self) -> Vec<SessionEntry> {
        let drained: Vec<SessionEntry> = std::mem::take(&mut self.sessions).into_values().collect();

        for entry in &drained {
            self.publish(RegistryEvent::Removed {
                session_id: entry.id(),
                reason: RemovalReason::Shutdown,
            });
        }

        debug!(drained = drained.len(), "Registry drained");
        drained
    }

    /// Publishes an event; having no subscribers is normal.
    fn publish(&self, event: RegistryEvent) {
        let _ = self.event_publisher.send(event);
    }
}
