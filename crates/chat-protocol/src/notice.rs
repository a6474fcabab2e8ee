//! Outbound text: broadcast notices and private replies.
//!
//! The wording here is part of the wire contract and existing clients match
//! on it, including the missing space in the rename notice.

use std::fmt;

/// Text broadcast to every registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice<'a> {
    /// `"<nickname> joined the chat."`
    Joined { nickname: &'a str },

    /// `"<old>renamed themselves to <new>"`
    Renamed { old: &'a str, new: &'a str },

    /// `"<nickname> left."`
    Left { nickname: &'a str },

    /// `"<nickname>: <text>"`
    Chat { nickname: &'a str, text: &'a str },
}

impl fmt::Display for Notice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joined { nickname } => write!(f, "{nickname} joined the chat."),
            Self::Renamed { old, new } => write!(f, "{old}renamed themselves to {new}"),
            Self::Left { nickname } => write!(f, "{nickname} left."),
            Self::Chat { nickname, text } => write!(f, "{nickname}: {text}"),
        }
    }
}

/// Text sent only to the session it concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    /// Sent once, right after the connection is accepted.
    NicknamePrompt,

    /// Acknowledges a successful `/nick`.
    NicknameChanged { nickname: &'a str },

    /// `/nick` without an argument.
    NicknameMissing,

    /// The registry refused the connection.
    ServerFull,
}

impl fmt::Display for Reply<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NicknamePrompt => f.write_str("Please enter a nickname: "),
            Self::NicknameChanged { nickname } => {
                write!(f, "Successfully changed nickname to {nickname}")
            }
            Self::NicknameMissing => f.write_str("No nickname provided, so no change is done."),
            Self::ServerFull => f.write_str("Server is full, try again later."),
        }
    }
}
