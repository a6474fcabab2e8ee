//! Server configuration.
//!
//! Settings come from an optional TOML file; every field has a default so an
//! empty file (or no file at all) yields a working server on port 9999.
//!
//! ```toml
//! bind = "127.0.0.1"
//! port = 9999
//! max_sessions = 100
//! write_timeout_ms = 5000
//! idle_timeout_secs = 600
//! max_line_length = 4096
//! quit_policy = "session"
//! echo_to_sender = true
//! ```

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Default listening port
pub const DEFAULT_PORT: u16 = 9999;

/// Default cap on concurrently registered sessions
pub const DEFAULT_MAX_SESSIONS: usize = 100;

/// Default bound on a single outbound write (5 seconds)
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;

/// Default maximum inbound line length in bytes, terminator excluded
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4_096;

/// What `/quit` tears down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuitPolicy {
    /// Only the quitting session closes.
    #[default]
    Session,

    /// The whole server shuts down, disconnecting everyone.
    Server,
}

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address to listen on
    pub bind: IpAddr,

    /// TCP port to listen on (0 picks a free port)
    pub port: u16,

    /// Registrations beyond this are refused
    pub max_sessions: usize,

    /// Upper bound on one outbound line write, in milliseconds
    pub write_timeout_ms: u64,

    /// Sessions silent for this long are disconnected (unset = never)
    pub idle_timeout_secs: Option<u64>,

    /// Longest accepted inbound line, in bytes
    pub max_line_length: usize,

    /// Effect of `/quit`
    pub quit_policy: QuitPolicy,

    /// Whether senders receive their own broadcasts
    pub echo_to_sender: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_sessions: DEFAULT_MAX_SESSIONS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            idle_timeout_secs: None,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            quit_policy: QuitPolicy::default(),
            echo_to_sender: true,
        }
    }
}

impl Config {
    /// Loads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid {
                field: "max_sessions",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "write_timeout_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::Invalid {
                field: "max_line_length",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.idle_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "idle_timeout_secs",
                reason: "must be greater than 0 when set".to_string(),
            });
        }
        Ok(())
    }

    /// Socket address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// Returns the default config file location (`<config dir>/tcpchat/chatd.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tcpchat").join("chatd.toml"))
}

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {error}", .path.display())]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 9999);
        assert_eq!(config.listen_addr().to_string(), "0.0.0.0:9999");
        assert_eq!(config.quit_policy, QuitPolicy::Session);
        assert!(config.echo_to_sender);
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.write_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(
            r#"
            bind = "127.0.0.1"
            port = 4000
            max_sessions = 3
            write_timeout_ms = 250
            idle_timeout_secs = 60
            max_line_length = 128
            quit_policy = "server"
            echo_to_sender = false
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:4000");
        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.write_timeout(), Duration::from_millis(250));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.max_line_length, 128);
        assert_eq!(config.quit_policy, QuitPolicy::Server);
        assert!(!config.echo_to_sender);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = Config::from_toml_str("prot = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_quit_policy_rejected() {
        let err = Config::from_toml_str(r#"quit_policy = "everyone""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_errors() {
        let err = Config::from_toml_str("max_sessions = 0").unwrap_err();
        assert!(err.to_string().contains("max_sessions"));

        let err = Config::from_toml_str("write_timeout_ms = 0").unwrap_err();
        assert!(err.to_string().contains("write_timeout_ms"));

        let err = Config::from_toml_str("max_line_length = 0").unwrap_err();
        assert!(err.to_string().contains("max_line_length"));

        let err = Config::from_toml_str("idle_timeout_secs = 0").unwrap_err();
        assert!(err.to_string().contains("idle_timeout_secs"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 1234").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.port, 1234);
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn test_default_config_path_file_name() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("tcpchat/chatd.toml"));
        }
    }
}
