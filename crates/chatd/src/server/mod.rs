//! TCP server for the chat daemon.
//!
//! The server:
//! - Listens on a TCP port for client connections
//! - Spawns a `Session` task for each client
//! - Exposes broadcast and shutdown through a cloneable `ServerHandle`
//! - Shuts down via CancellationToken, tearing down every session
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │     Server      │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │     Session     │────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Shutdown
//!
//! Cancelling the token (from a signal, `/quit` under the server quit policy,
//! or an accept failure) stops the accept loop, closes the listener, drains
//! the registry, tears each session down, and waits for all session tasks.

mod handle;

pub use handle::ServerHandle;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chat_core::SessionId;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::registry::{RegistryEvent, RegistryHandle, RemovalReason};
use crate::session::{Session, SessionSettings};

/// TCP chat server.
pub struct Server {
    /// Bound listener
    listener: TcpListener,

    /// Address the listener is bound to
    local_addr: SocketAddr,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Cancellation token for shutdown
    shutdown: CancellationToken,

    /// Settings handed to each session
    settings: SessionSettings,

    /// Tracks session tasks so shutdown can wait for them
    tracker: TaskTracker,

    /// Connection counter for generating session ids
    connection_counter: AtomicU64,
}

impl Server {
    /// Binds the listening socket described by `config`.
    ///
    /// # Errors
    ///
    /// - `ServerError::Bind` if the address cannot be bound
    pub async fn bind(
        config: &Config,
        registry: RegistryHandle,
        shutdown: CancellationToken,
    ) -> Result<Self, ServerError> {
        let addr = config.listen_addr();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr,
            error: e.to_string(),
        })?;

        Ok(Self {
            listener,
            local_addr,
            registry,
            shutdown,
            settings: SessionSettings::from(config),
            tracker: TaskTracker::new(),
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Returns the bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a handle for broadcasting and shutting down from elsewhere.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle::new(self.registry.clone(), self.shutdown.clone())
    }

    /// Runs the server.
    ///
    /// Accepts connections until shutdown is requested, then tears every
    /// session down and waits for their tasks. Does not return before that.
    ///
    /// # Errors
    ///
    /// - `ServerError::Accept` if accepting failed; shutdown has still
    ///   completed by the time this is returned
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "Chat server listening");

        self.spawn_event_logger();

        let mut accept_error = None;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.handle_connection(stream, peer_addr),
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection, shutting down");
                            accept_error = Some(ServerError::Accept(e.to_string()));
                            self.shutdown.cancel();
                            break;
                        }
                    }
                }
            }
        }

        let Server {
            listener,
            registry,
            tracker,
            ..
        } = self;

        // Stop accepting before tearing sessions down
        drop(listener);

        let sessions = registry.drain().await;
        let count = sessions.len();
        for entry in sessions {
            entry.handle.teardown(&registry, RemovalReason::Shutdown).await;
        }
        debug!(sessions = count, "Sessions torn down");

        tracker.close();
        tracker.wait().await;

        info!("Server stopped");
        match accept_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Spawns a session task for an accepted connection.
    fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let id = SessionId::new(self.connection_counter.fetch_add(1, Ordering::Relaxed));

        if let Err(e) = stream.set_nodelay(true) {
            debug!(session_id = %id, error = %e, "Failed to set TCP_NODELAY");
        }

        let session = Session::new(
            id,
            stream,
            Some(peer_addr.to_string()),
            self.registry.clone(),
            self.shutdown.clone(),
            self.settings.clone(),
        );

        self.tracker.spawn(async move {
            match session.run().await {
                Ok(reason) => debug!(session_id = %id, reason = %reason, "Session task finished"),
                Err(e) => debug!(session_id = %id, error = %e, "Session rejected"),
            }
        });
    }

    /// Spawns a task that logs membership changes until shutdown.
    fn spawn_event_logger(&self) {
        let mut event_rx = self.registry.subscribe();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Event logger shutting down");
                        break;
                    }

                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => log_event(&event),
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Event logger lagged, skipped events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }
}

fn log_event(event: &RegistryEvent) {
    match event {
        RegistryEvent::Registered { session_id } => {
            debug!(session_id = %session_id, "Registered");
        }
        RegistryEvent::Activated {
            session_id,
            nickname,
        } => {
            debug!(session_id = %session_id, nickname = %nickname, "Activated");
        }
        RegistryEvent::Renamed {
            session_id,
            old,
            new,
        } => {
            debug!(session_id = %session_id, old = ?old, new = %new, "Renamed");
        }
        RegistryEvent::Removed { session_id, reason } => {
            debug!(session_id = %session_id, reason = %reason, "Removed");
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Failed to accept connection: {0}")]
    Accept(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;

    fn local_config() -> Config {
        Config {
            bind: "127.0.0.1".parse().unwrap(),
            port: 0,
            ..Config::default()
        }
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:9999".parse().unwrap(),
            error: "address in use".to_string(),
        };
        assert!(err.to_string().contains("127.0.0.1:9999"));
        assert!(err.to_string().contains("address in use"));
    }

    #[tokio::test]
    async fn test_bind_port_zero_picks_a_port() {
        let server = Server::bind(&local_config(), spawn_registry(10), CancellationToken::new())
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = Server::bind(&local_config(), spawn_registry(10), CancellationToken::new())
            .await
            .unwrap();

        let config = Config {
            port: first.local_addr().port(),
            ..local_config()
        };
        let err = Server::bind(&config, spawn_registry(10), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_run_returns_after_shutdown() {
        let shutdown = CancellationToken::new();
        let server = Server::bind(&local_config(), spawn_registry(10), shutdown.clone())
            .await
            .unwrap();
        let handle = server.handle();

        let task = tokio::spawn(server.run());
        handle.shutdown();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(shutdown.is_cancelled());
    }
}
