//! Error types for the chat server.
//!
//! All errors use thiserror for consistent error handling across the codebase.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Credential store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to read the users file
    #[error("Failed to load users from {path}: {source}")]
    LoadFailed {
        /// Path to the users file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Invalid JSON format in users file
    #[error("Invalid JSON in users file: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Users file holds no accounts
    #[error("Users file is empty: no accounts loaded")]
    Empty,

    /// A user record failed validation
    #[error("Invalid {field} for user '{user_id}': {reason}")]
    InvalidRecord {
        /// Field name that failed validation
        field: &'static str,
        /// User the record belongs to
        user_id: String,
        /// Reason for validation failure
        reason: String,
    },

    /// Same user id appears twice
    #[error("Duplicate user id: {0}")]
    DuplicateUser(String),

    /// Backend could not serve the request
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of its allowed range
    #[error("Invalid {field}: {reason}")]
    InvalidValue {
        /// Flag name
        field: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Missing required configuration value
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Server runtime errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listening socket
    #[error("Failed to bind TCP listener to {addr}: {source}")]
    BindFailed {
        /// Address that failed to bind
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Failed to start the I/O runtime or a thread
    #[error("Failed to start {what}: {source}")]
    StartFailed {
        /// Component that failed to start
        what: &'static str,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Credential store error
    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Server shutdown error
    #[error("Server shutdown error: {0}")]
    Shutdown(String),
}

/// Per-session failures reported to the engine, which owns teardown.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation refers to a previous occupant of the slot
    #[error("Stale completion for session {expected}, slot now holds {current}")]
    Stale {
        /// Session id carried by the operation
        expected: u32,
        /// Session id currently in the slot
        current: u32,
    },

    /// Session has no live connection
    #[error("Session is closed")]
    Closed,

    /// Received bytes do not fit into the receive buffer
    #[error("Receive buffer overflow: {incoming} bytes, {free} free")]
    RecvOverflow {
        /// Bytes delivered by the completion
        incoming: usize,
        /// Free space in the ring
        free: usize,
    },

    /// Posting an asynchronous operation failed
    #[error("Link error: {0}")]
    Link(#[from] std::io::Error),
}

/// Registry bookkeeping errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Another authenticated session already owns the username
    #[error("Username already registered: {0}")]
    NameTaken(String),

    /// Session is not live and cannot be registered
    #[error("Session {0} is not valid")]
    InvalidSession(u32),
}

/// Stream framing violations. Each one is fatal for the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// Declared size exceeds the hard packet limit
    #[error("Declared packet size {size} exceeds limit of {limit}")]
    Oversized {
        /// Declared size
        size: usize,
        /// Hard limit
        limit: usize,
    },

    /// Declared size is smaller than the header itself
    #[error("Declared packet size {size} is smaller than the header")]
    Undersized {
        /// Declared size
        size: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_messages() {
        let err = StoreError::DuplicateUser("alice".to_string());
        assert_eq!(err.to_string(), "Duplicate user id: alice");

        let err = StoreError::InvalidRecord {
            field: "password_sha256",
            user_id: "bob".to_string(),
            reason: "expected 64 hex characters".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid password_sha256 for user 'bob': expected 64 hex characters"
        );
    }

    #[test]
    fn test_server_error_conversion() {
        let store_err = StoreError::Empty;
        let server_err: ServerError = store_err.into();
        assert!(server_err.to_string().contains("no accounts loaded"));
    }

    #[test]
    fn test_framing_error_messages() {
        let err = FramingError::Oversized {
            size: 4096,
            limit: 2048,
        };
        assert_eq!(
            err.to_string(),
            "Declared packet size 4096 exceeds limit of 2048"
        );
    }
}
