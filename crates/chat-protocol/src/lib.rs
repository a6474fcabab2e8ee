//! Chat Protocol - Line protocol spoken between chat clients and the server
//!
//! Every message in either direction is one line of UTF-8 text terminated by
//! `\n`. Clients send a nickname first, then chat lines or slash commands;
//! the server answers with private replies and broadcast notices.

pub mod command;
pub mod notice;

pub use command::{strip_line_terminator, Command};
pub use notice::{Notice, Reply};
