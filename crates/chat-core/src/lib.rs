//! Chat Core - Shared domain types for the chat server
//!
//! This crate provides the session identity and lifecycle types shared
//! between the line protocol (`chat-protocol`) and the daemon (`chatd`).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod session;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use session::{SessionId, SessionState, SessionView};
