//! Server orchestration.
//!
//! Loads the users file, starts the I/O engine and keeps it running until
//! the process is interrupted.

use crate::config::ServerConfig;
use crate::engine::IoEngine;
use crate::error::ServerError;
use crate::store::MemoryStore;
use std::sync::Arc;

/// Chat server.
pub struct Server {
    /// Accounts, tokens and presence
    store: Arc<MemoryStore>,
    /// Server configuration
    config: ServerConfig,
}

impl Server {
    /// Create new server with configuration.
    ///
    /// Loads the users file into an in-process credential store.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the users file cannot be loaded.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        tracing::info!("Loading users from {:?}", config.users);

        let store = MemoryStore::from_file(&config.users)?;

        tracing::info!("Loaded {} user accounts", store.user_count());

        Ok(Self {
            store: Arc::new(store),
            config,
        })
    }

    /// Credential store backing this server.
    #[must_use]
    pub const fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Server configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the listener and start the engine without waiting for a signal.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the engine fails to start.
    pub fn start(&self) -> Result<IoEngine, ServerError> {
        IoEngine::start(&self.config, self.store.clone())
    }

    /// Run the server until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the shutdown signal cannot
    /// be installed.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Starting switchboard chat server");
        tracing::info!("TCP server binding to: {}", self.config.bind);

        let engine = self.start()?;
        tracing::info!(
            "Listening on {} ({} sessions, {} workers)",
            engine.local_addr(),
            self.config.max_sessions,
            self.config.workers
        );

        let signal = tokio::signal::ctrl_c().await.map_err(|e| {
            ServerError::Shutdown(format!("Failed to listen for shutdown signal: {e}"))
        });

        tracing::info!("Shutdown signal received, stopping server");

        // Joining worker threads blocks
        tokio::task::spawn_blocking(move || engine.shutdown())
            .await
            .map_err(|e| ServerError::Shutdown(format!("Engine shutdown failed: {e}")))?;

        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CredentialStore, UserRecord};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn users_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let records = vec![
            UserRecord::new("alice", "wonderland"),
            UserRecord::new("bob", "builder"),
        ];
        file.write_all(serde_json::to_string(&records).unwrap().as_bytes())
            .unwrap();
        file
    }

    #[test]
    fn test_server_loads_users() {
        let file = users_file();
        let config =
            ServerConfig::with_defaults("127.0.0.1:0".parse().unwrap(), file.path().to_path_buf());

        let server = Server::new(config).unwrap();
        assert_eq!(server.store().user_count(), 2);
        assert!(server.store().password_hash("bob").unwrap().is_some());
    }

    #[test]
    fn test_server_rejects_missing_users_file() {
        let config = ServerConfig::with_defaults(
            "127.0.0.1:0".parse().unwrap(),
            "/nonexistent/users.json".into(),
        );
        assert!(matches!(Server::new(config), Err(ServerError::Store(_))));
    }

    #[test]
    fn test_start_binds_ephemeral_port() {
        let file = users_file();
        let mut config =
            ServerConfig::with_defaults("127.0.0.1:0".parse().unwrap(), file.path().to_path_buf());
        config.workers = 2;
        config.max_sessions = 8;

        let server = Server::new(config).unwrap();
        let engine = server.start().unwrap();
        assert_ne!(engine.local_addr().port(), 0);
        assert!(engine.is_running());
        assert_eq!(engine.registry().capacity(), 8);
        engine.shutdown();
    }

    #[test]
    fn test_start_reports_bind_failure() {
        let file = users_file();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config =
            ServerConfig::with_defaults(taken.local_addr().unwrap(), file.path().to_path_buf());

        let server = Server::new(config).unwrap();
        assert!(matches!(
            server.start(),
            Err(ServerError::BindFailed { .. })
        ));
    }
}
