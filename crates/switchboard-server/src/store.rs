//! Credential, token and presence store.
//!
//! The server needs a handful of operations from its backing store, all of
//! which may fail. [`MemoryStore`] keeps everything in concurrent maps and
//! loads accounts from a JSON users file.

use crate::error::StoreError;
use dashmap::DashMap;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::{Duration, Instant};
use switchboard_proto::MAX_NAME_LEN;

/// Backing store for credentials, session tokens and online presence.
pub trait CredentialStore: Send + Sync {
    /// Stored password hash for `user_id`, or `None` if the account is unknown.
    fn password_hash(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    /// Record `token` as belonging to `user_id` for `ttl`.
    fn create_session_token(
        &self,
        token: &str,
        user_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Forget `token`. Returns whether it existed.
    fn delete_session_token(&self, token: &str) -> Result<bool, StoreError>;

    /// Mark `username` online on `session_id`.
    fn set_online_presence(&self, username: &str, session_id: u32) -> Result<(), StoreError>;

    /// Mark `username` offline. Returns whether it was online.
    fn clear_online_presence(&self, username: &str) -> Result<bool, StoreError>;

    /// Drop expired session tokens. Returns how many were removed.
    ///
    /// Stores that expire tokens on their own keep the default.
    fn purge_expired_tokens(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// Lowercase hex SHA-256 of `password`, the format stored in the users file.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Random 128-bit session token as 32 hex characters.
pub fn generate_token() -> String {
    let value: u128 = rand::rng().random();
    format!("{value:032x}")
}

/// One account in the users file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserRecord {
    /// Login identifier
    pub user_id: String,

    /// Lowercase hex SHA-256 of the password (64 characters)
    pub password_sha256: String,
}

impl UserRecord {
    /// Build a record from a plain-text password.
    pub fn new(user_id: impl Into<String>, password: &str) -> Self {
        Self {
            user_id: user_id.into(),
            password_sha256: hash_password(password),
        }
    }

    /// Validate the record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidRecord` if the user id is empty or too
    /// long for the wire, or the hash is not 64 lowercase hex characters.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.user_id.is_empty() || self.user_id.len() > MAX_NAME_LEN {
            return Err(StoreError::InvalidRecord {
                field: "user_id",
                user_id: self.user_id.clone(),
                reason: format!("must be 1 to {MAX_NAME_LEN} bytes"),
            });
        }

        if self.password_sha256.len() != 64 {
            return Err(StoreError::InvalidRecord {
                field: "password_sha256",
                user_id: self.user_id.clone(),
                reason: format!(
                    "expected 64 hex characters, got {} characters",
                    self.password_sha256.len()
                ),
            });
        }

        if !self
            .password_sha256
            .chars()
            .all(|c| matches!(c, '0'..='9' | 'a'..='f'))
        {
            return Err(StoreError::InvalidRecord {
                field: "password_sha256",
                user_id: self.user_id.clone(),
                reason: "contains characters other than lowercase hex".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
struct TokenEntry {
    user_id: String,
    expires_at: Instant,
}

/// In-process [`CredentialStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<String, String>,
    tokens: DashMap<String, TokenEntry>,
    presence: DashMap<String, u32>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `records`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if a record is invalid or a user id repeats.
    pub fn from_records(records: impl IntoIterator<Item = UserRecord>) -> Result<Self, StoreError> {
        let store = Self::new();
        for record in records {
            record.validate()?;
            if store.users.contains_key(&record.user_id) {
                return Err(StoreError::DuplicateUser(record.user_id));
            }
            store.users.insert(record.user_id, record.password_sha256);
        }
        Ok(store)
    }

    /// Load accounts from a JSON array of [`UserRecord`]s.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if:
    /// - File cannot be read
    /// - JSON is malformed
    /// - File holds no accounts
    /// - Any record fails validation
    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path).map_err(|source| StoreError::LoadFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let records: Vec<UserRecord> = serde_json::from_reader(BufReader::new(file))?;
        if records.is_empty() {
            return Err(StoreError::Empty);
        }

        Self::from_records(records)
    }

    /// Add or replace an account.
    pub fn insert_user(&self, user_id: &str, password: &str) {
        self.users
            .insert(user_id.to_string(), hash_password(password));
    }

    /// Number of accounts.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Session id `username` is online on.
    pub fn presence(&self, username: &str) -> Option<u32> {
        self.presence.get(username).map(|entry| *entry)
    }

    /// Number of live (unexpired) tokens.
    pub fn active_tokens(&self) -> usize {
        let now = Instant::now();
        self.tokens
            .iter()
            .filter(|entry| entry.expires_at > now)
            .count()
    }
}

impl CredentialStore for MemoryStore {
    fn password_hash(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.users.get(user_id).map(|hash| hash.clone()))
    }

    fn create_session_token(
        &self,
        token: &str,
        user_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.tokens.insert(
            token.to_string(),
            TokenEntry {
                user_id: user_id.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn delete_session_token(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.tokens.remove(token).is_some())
    }

    fn set_online_presence(&self, username: &str, session_id: u32) -> Result<(), StoreError> {
        self.presence.insert(username.to_string(), session_id);
        Ok(())
    }

    fn clear_online_presence(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.presence.remove(username).is_some())
    }

    fn purge_expired_tokens(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut purged = 0;
        self.tokens.retain(|_, entry| {
            let live = entry.expires_at > now;
            if !live {
                tracing::debug!(user_id = %entry.user_id, "Session token expired");
                purged += 1;
            }
            live
        });
        Ok(purged)
    }
}
