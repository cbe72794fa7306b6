//! Credential and cache storage for zonegate.
//!
//! Backend-agnostic storage layer holding user accounts, sessions, the
//! audit log, settings (including the session signing secret) and the
//! zone/record read cache. Store trait implementations for SQLite and
//! memory.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::dns::{RecordSet, Zone};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Application role. Closed set; only the presentation layer ever needs
/// the freeform string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which authentication path most recently provisioned or updated a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthSource {
    Local,
    Ldap,
}

impl AuthSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthSource::Local => "local",
            AuthSource::Ldap => "ldap",
        }
    }
}

impl FromStr for AuthSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(AuthSource::Local),
            "ldap" => Ok(AuthSource::Ldap),
            other => Err(format!("unknown auth source: {}", other)),
        }
    }
}

/// User account for authentication.
///
/// An empty `password_hash` means the account has no local password and is
/// directory-managed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
    pub auth_source: AuthSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Session row keyed by the signed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token: String,
    pub csrf_token: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// One audit log entry. `zone_id`, `record_name`, `record_type` and
/// `detail` are empty for actions they do not apply to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub username: String,
    pub action: String,
    pub zone_id: String,
    pub record_name: String,
    pub record_type: String,
    pub detail: String,
    pub ip_address: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const SESSION_SECRET_KEY: &str = "session_secret";

/// Backend-agnostic storage interface.
///
/// All methods are async for compatibility with pooled backends; the
/// memory backend is lock-based and effectively synchronous. Concurrent
/// session writes are serialized by primary-key uniqueness on the signed
/// token; no application-level locking is layered on top.
#[async_trait]
pub trait Store: Send + Sync {
    // === User Operations ===

    /// True once at least one user exists (first-run setup is complete).
    async fn has_users(&self) -> Result<bool>;

    /// Get user by username
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// List all users, oldest first
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Create a local user. The password is already hashed by the caller.
    async fn create_user(&self, username: &str, password_hash: &str, role: Role) -> Result<()>;

    /// Replace a user's password hash
    async fn update_user_password(&self, username: &str, password_hash: &str) -> Result<()>;

    /// Toggle a user's active flag
    async fn set_user_active(&self, username: &str, active: bool) -> Result<()>;

    /// Delete a user
    async fn delete_user(&self, username: &str) -> Result<()>;

    /// Provision or update a directory-authenticated user.
    ///
    /// Inserts with an empty password hash when absent; on conflict
    /// overwrites role and auth source unconditionally (the directory is
    /// the source of truth on every login) while preserving any existing
    /// local password hash.
    async fn upsert_directory_user(&self, username: &str, role: Role) -> Result<()>;

    // === Session Operations ===

    /// Persist a session keyed by the signed token
    async fn create_session(
        &self,
        token: &str,
        csrf_token: &str,
        username: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Look up a session by signed token. Expiry is not evaluated here.
    async fn get_session(&self, token: &str) -> Result<Option<SessionRecord>>;

    /// Delete a session by signed token. Deleting an unknown token is not
    /// an error.
    async fn delete_session(&self, token: &str) -> Result<()>;

    /// Delete all sessions whose expiry has passed; returns the count.
    async fn purge_expired_sessions(&self) -> Result<u64>;

    // === Settings Operations ===

    /// Get a setting value by key
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Store a setting
    async fn put_setting(&self, key: &str, value: &str) -> Result<()>;

    /// Load the session signing secret, generating and persisting it on
    /// first call. Idempotent; the secret lives for the deployment's
    /// lifetime unless the store is wiped.
    async fn ensure_session_secret(&self) -> Result<String> {
        if let Some(secret) = self.get_setting(SESSION_SECRET_KEY).await? {
            if !secret.is_empty() {
                return Ok(secret);
            }
        }
        let mut buf = [0u8; 64];
        OsRng.fill_bytes(&mut buf);
        let secret = hex::encode(buf);
        self.put_setting(SESSION_SECRET_KEY, &secret).await?;
        info!("Generated new session signing secret");
        Ok(secret)
    }

    // === Audit Operations ===

    /// Append an audit entry. `id` and `created_at` are assigned by the
    /// store.
    async fn log_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// Page through the audit log, newest first. Returns the page and the
    /// total entry count.
    async fn list_audit(&self, limit: i64, offset: i64) -> Result<(Vec<AuditEntry>, i64)>;

    // === Zone/Record Cache Operations ===

    /// Replace the cached zone listing
    async fn cache_zones(&self, zones: &[Zone]) -> Result<()>;

    /// Get the cached zone listing with its cache timestamp, if any.
    /// Freshness is the caller's concern.
    async fn cached_zones(&self) -> Result<Option<(Vec<Zone>, DateTime<Utc>)>>;

    /// Replace the cached record listing for one zone
    async fn cache_records(&self, zone_id: &str, records: &[RecordSet]) -> Result<()>;

    /// Get the cached record listing for one zone with its cache timestamp
    async fn cached_records(&self, zone_id: &str)
        -> Result<Option<(Vec<RecordSet>, DateTime<Utc>)>>;

    /// Drop the cached records for one zone
    async fn invalidate_record_cache(&self, zone_id: &str) -> Result<()>;

    /// Drop every cached zone and record listing
    async fn invalidate_all_cache(&self) -> Result<()>;
}

/// Storage configuration
#[derive(Debug, Clone, Default)]
pub enum StoreConfig {
    /// In-memory storage (for testing and demo mode)
    #[default]
    Memory,

    /// SQLite database file
    Sqlite { path: String },
}

/// Create a store from configuration
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Sqlite { path } => {
            let store = SqliteStore::open(path).await?;
            Ok(Arc::new(store))
        }
    }
}
