//! Server configuration management.
//!
//! Configuration is read from CLI arguments, falling back to `SWITCHBOARD_*`
//! environment variables and then to defaults.
//!
//! # Example
//!
//! ```no_run
//! use switchboard_server::ServerConfig;
//!
//! let config = ServerConfig::from_args();
//! config.validate().expect("Invalid configuration");
//!
//! println!("Listening on {} with {} workers", config.bind, config.workers);
//! ```

use crate::error::ConfigError;
use crate::session::SessionLimits;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use switchboard_proto::{MAX_PACKET_SIZE, PacketType};

/// Server configuration loaded from CLI args and environment variables.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "switchboard",
    about = "Multi-client TCP chat server",
    version
)]
pub struct ServerConfig {
    /// TCP bind address
    #[arg(long, env = "SWITCHBOARD_BIND", default_value = "0.0.0.0:11021")]
    pub bind: SocketAddr,

    /// Path to the users JSON file
    #[arg(long, env = "SWITCHBOARD_USERS", default_value = "./users.json")]
    pub users: PathBuf,

    /// Maximum concurrent connections (session pool size)
    #[arg(long, env = "SWITCHBOARD_MAX_SESSIONS", default_value_t = 100)]
    pub max_sessions: usize,

    /// Worker threads draining the completion queue
    #[arg(long, env = "SWITCHBOARD_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Threads driving socket I/O
    #[arg(long, env = "SWITCHBOARD_IO_THREADS", default_value_t = 1)]
    pub io_threads: usize,

    /// Per-session receive buffer capacity in bytes
    #[arg(long, env = "SWITCHBOARD_RECV_BUFFER_SIZE", default_value_t = 4096)]
    pub recv_buffer_size: usize,

    /// Largest single read in bytes
    #[arg(long, env = "SWITCHBOARD_READ_CHUNK", default_value_t = 2048)]
    pub read_chunk: usize,

    /// Largest outbound packet in bytes
    #[arg(long, env = "SWITCHBOARD_SEND_SLOT_SIZE", default_value_t = 2048)]
    pub send_slot_size: usize,

    /// Most packets queued per session before new ones are dropped
    #[arg(long, env = "SWITCHBOARD_MAX_SEND_BACKLOG", default_value_t = 256)]
    pub max_send_backlog: usize,

    /// Completion queue capacity
    #[arg(long, env = "SWITCHBOARD_COMPLETION_QUEUE_DEPTH", default_value_t = 4096)]
    pub completion_queue_depth: usize,

    /// Session token lifetime in seconds
    #[arg(long, env = "SWITCHBOARD_TOKEN_TTL_SECS", default_value_t = 1800)]
    pub token_ttl_secs: u64,

    /// Disconnect sessions silent for this many seconds (0 disables)
    #[arg(long, env = "SWITCHBOARD_IDLE_TIMEOUT_SECS", default_value_t = 0)]
    pub idle_timeout_secs: u64,
}

impl ServerConfig {
    /// Parse configuration from command-line arguments.
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Defaults with the given bind address and users file.
    #[must_use]
    pub fn with_defaults(bind: SocketAddr, users: PathBuf) -> Self {
        let limits = SessionLimits::default();
        Self {
            bind,
            users,
            max_sessions: 100,
            workers: 4,
            io_threads: 1,
            recv_buffer_size: limits.recv_buffer_size,
            read_chunk: limits.read_chunk,
            send_slot_size: limits.send_slot_size,
            max_send_backlog: limits.max_send_backlog,
            completion_queue_depth: 4096,
            token_ttl_secs: 1800,
            idle_timeout_secs: 0,
        }
    }

    /// Per-session limits derived from this configuration.
    #[must_use]
    pub const fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            recv_buffer_size: self.recv_buffer_size,
            read_chunk: self.read_chunk,
            send_slot_size: self.send_slot_size,
            max_send_backlog: self.max_send_backlog,
        }
    }

    /// Session token lifetime.
    #[must_use]
    pub const fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Idle timeout, if enabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Users file doesn't exist
    /// - A pool, thread or queue size is zero
    /// - The receive buffer cannot hold two maximum-size packets
    /// - The send slot cannot hold the largest packet
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.users.exists() {
            return Err(ConfigError::MissingRequired(format!(
                "users file not found: {}",
                self.users.display()
            )));
        }

        for (field, value) in [
            ("max_sessions", self.max_sessions),
            ("workers", self.workers),
            ("io_threads", self.io_threads),
            ("read_chunk", self.read_chunk),
            ("max_send_backlog", self.max_send_backlog),
            ("completion_queue_depth", self.completion_queue_depth),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.max_sessions > u32::MAX as usize {
            return Err(ConfigError::InvalidValue {
                field: "max_sessions",
                reason: format!("must not exceed {}", u32::MAX),
            });
        }

        let min_recv = MAX_PACKET_SIZE * 2;
        if self.recv_buffer_size < min_recv {
            return Err(ConfigError::InvalidValue {
                field: "recv_buffer_size",
                reason: format!("must be at least {min_recv} bytes"),
            });
        }

        let largest = PacketType::ALL
            .iter()
            .map(|kind| kind.wire_size())
            .max()
            .unwrap_or(MAX_PACKET_SIZE);
        if self.send_slot_size < largest {
            return Err(ConfigError::InvalidValue {
                field: "send_slot_size",
                reason: format!("must be at least {largest} bytes"),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn valid_config(users: &NamedTempFile) -> ServerConfig {
        ServerConfig::with_defaults("127.0.0.1:0".parse().unwrap(), users.path().to_path_buf())
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::parse_from(["switchboard"]);
        assert_eq!(config.bind.port(), 11021);
        assert_eq!(config.max_sessions, 100);
        assert_eq!(config.workers, 4);
        assert_eq!(config.recv_buffer_size, 4096);
        assert_eq!(config.send_slot_size, MAX_PACKET_SIZE);
        assert_eq!(config.token_ttl(), Duration::from_secs(1800));
        assert_eq!(config.idle_timeout(), None);
    }

    #[test]
    fn test_cli_overrides() {
        let config = ServerConfig::parse_from([
            "switchboard",
            "--bind",
            "127.0.0.1:9000",
            "--workers",
            "8",
            "--idle-timeout-secs",
            "30",
        ]);
        assert_eq!(config.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.workers, 8);
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let users = NamedTempFile::new().unwrap();
        assert!(valid_config(&users).validate().is_ok());
    }

    #[test]
    fn test_validate_missing_users_file() {
        let config = ServerConfig::with_defaults(
            "127.0.0.1:0".parse().unwrap(),
            PathBuf::from("/nonexistent/users.json"),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let users = NamedTempFile::new().unwrap();
        let mut config = valid_config(&users);
        config.workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "workers",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_buffer_sizes() {
        let users = NamedTempFile::new().unwrap();

        let mut config = valid_config(&users);
        config.recv_buffer_size = MAX_PACKET_SIZE;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "recv_buffer_size",
                ..
            })
        ));

        let mut config = valid_config(&users);
        config.send_slot_size = 1000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "send_slot_size",
                ..
            })
        ));
    }

    #[test]
    fn test_session_limits() {
        let users = NamedTempFile::new().unwrap();
        let limits = valid_config(&users).session_limits();
        assert_eq!(limits, SessionLimits::default());
    }
}
