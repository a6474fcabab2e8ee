//! Interpretation of inbound client lines.
//!
//! Commands are matched by case-sensitive prefix:
//!
//! | Input line        | Command               |
//! |-------------------|-----------------------|
//! | `/nick <newname>` | [`Command::Nick`]     |
//! | `/nick`           | [`Command::NickMissing`] |
//! | `/quit...`        | [`Command::Quit`]     |
//! | anything else     | [`Command::Chat`]     |

/// Prefix of the rename command, including its separating space.
const NICK_PREFIX: &str = "/nick ";

/// The rename command without an argument.
const NICK_BARE: &str = "/nick";

/// Prefix of the quit command. Anything may follow it.
const QUIT_PREFIX: &str = "/quit";

/// What a single inbound line asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Rename to the given nickname (everything after `/nick `).
    Nick(&'a str),

    /// `/nick` with nothing (or only whitespace) after it.
    NickMissing,

    /// Leave the chat.
    Quit,

    /// Relay the line to everyone.
    Chat(&'a str),
}

impl<'a> Command<'a> {
    /// Parses one line with its terminator already removed.
    pub fn parse(line: &'a str) -> Self {
        if let Some(name) = line.strip_prefix(NICK_PREFIX) {
            if name.trim().is_empty() {
                return Self::NickMissing;
            }
            return Self::Nick(name);
        }

        if line == NICK_BARE {
            return Self::NickMissing;
        }

        if line.starts_with(QUIT_PREFIX) {
            return Self::Quit;
        }

        Self::Chat(line)
    }

    /// Returns true for lines that are relayed verbatim.
    #[must_use]
    pub fn is_chat(&self) -> bool {
        matches!(self, Self::Chat(_))
    }
}

/// Removes one trailing `\n` or `\r\n` from a line read off the wire.
///
/// A lone `\r` is not a line end and stays in the text.
pub fn strip_line_terminator(line: &str) -> &str {
    match line.strip_suffix('\n') {
        Some(line) => line.strip_suffix('\r').unwrap_or(line),
        None => line,
    }
}
