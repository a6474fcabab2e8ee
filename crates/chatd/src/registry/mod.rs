//! Session registry using Actor pattern.
//!
//! The registry is the single owner of chat membership. It receives commands
//! via a tokio mpsc channel and processes them one at a time, which makes
//! register, unregister and snapshot atomic with respect to each other.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │     Session     │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   RegistryEvent       │
//!         │   (mpsc channel)      │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!    Register/Remove        BTreeMap<SessionId,      Diagnostics and
//!    sessions               SessionEntry>            tests
//! ```
//!
//! Message fan-out never runs inside the actor. [`RegistryHandle::broadcast`]
//! takes a snapshot and writes to each session from the caller's task, so a
//! slow socket can't hold up membership changes.
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError, RegistryEvent, RemovalReason, SessionEntry};
pub use handle::{BroadcastReport, RegistryHandle};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// Spawn the registry actor and return a handle for interaction.
///
/// `max_sessions` caps concurrent registrations; further attempts fail with
/// [`RegistryError::RegistryFull`].
///
/// # Example
///
/// ```no_run
/// use chatd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(100);
///
///     let sessions = handle.views().await;
///     assert!(sessions.is_empty());
/// }
/// ```
pub fn spawn_registry(max_sessions: usize) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), max_sessions);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
