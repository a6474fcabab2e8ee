//! Session identity, lifecycle state, and diagnostic views.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for one client connection.
///
/// Assigned by the server from a monotonically increasing counter, so ids
/// are never reused within a server's lifetime and sort in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a new SessionId from a raw connection number.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw connection number.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle state of a session.
///
/// `Connecting -> Active -> Closed`, with `Connecting -> Closed` allowed when
/// the peer goes away before choosing a nickname. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Stream open, no nickname yet.
    #[default]
    Connecting,

    /// Nickname set, relaying messages.
    Active,

    /// Torn down. Never reused.
    Closed,
}

impl SessionState {
    /// Returns the display label for this state.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    /// Returns true if the session has not been torn down yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Active)
                | (Self::Connecting, Self::Closed)
                | (Self::Active, Self::Closed)
        )
    }

    /// Validates and returns the next state.
    pub fn transition(self, session_id: SessionId, next: SessionState) -> DomainResult<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidTransition {
                session_id,
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Session View
// ============================================================================

/// Point-in-time, read-only description of a registered session.
///
/// Returned by registry snapshots for diagnostics; holds no reference to the
/// live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// Session identifier
    pub id: SessionId,

    /// Current nickname (`None` while still connecting)
    pub nickname: Option<String>,

    /// Lifecycle state at snapshot time
    pub state: SessionState,

    /// Remote address, when the transport has one
    pub peer_addr: Option<String>,

    /// When the connection was accepted
    pub connected_at: DateTime<Utc>,
}

impl SessionView {
    /// Creates a view for a freshly accepted connection.
    pub fn connecting(id: SessionId, peer_addr: Option<String>) -> Self {
        Self {
            id,
            nickname: None,
            state: SessionState::Connecting,
            peer_addr,
            connected_at: Utc::now(),
        }
    }

    /// Name used in logs: the nickname if set, otherwise the id.
    pub fn display_name(&self) -> String {
        match &self.nickname {
            Some(nick) => nick.clone(),
            None => self.id.to_string(),
        }
    }

    /// Seconds since the connection was accepted.
    pub fn connected_secs(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.connected_at)
            .num_seconds()
    }
}
