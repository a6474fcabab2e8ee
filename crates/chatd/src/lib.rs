//! chatd - Session registry and broadcast server
//!
//! This crate provides the core infrastructure for the chat daemon:
//! - `config` - Server settings loaded from TOML
//! - `registry` - Session registry actor tracking every connected client
//! - `session` - Per-connection state machine and serialized outbound writer
//! - `server` - TCP accept loop, session dispatch, and global shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           chatd                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐      ┌─────────────────────────────┐   │
//! │  │     Server      │─────▶│        RegistryActor        │   │
//! │  │  (TcpListener)  │      │  (membership state owner)   │   │
//! │  └────────┬────────┘      └──────────────┬──────────────┘   │
//! │           │                              │ snapshot         │
//! │           │ one task per client          ▼                  │
//! │           ▼                 ┌───────────────────────────┐   │
//! │  ┌─────────────────┐        │ broadcast (caller task)   │   │
//! │  │     Session     │───────▶│ Outbound per session      │   │
//! │  │  (per client)   │        └───────────────────────────┘   │
//! │  └─────────────────┘                                        │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod registry;
pub mod server;
pub mod session;
