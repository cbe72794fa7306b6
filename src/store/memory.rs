//! In-memory storage backend.
//!
//! Simple storage for testing and demo deployments.
//! Uses RwLock for thread-safe access with minimal contention.

use super::{AuditEntry, AuthSource, Result, Role, SessionRecord, Store, StoreError, User};
use crate::dns::{RecordSet, Zone};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory storage backend.
///
/// Users are keyed by username, sessions by signed token, matching the
/// uniqueness constraints of the SQLite schema.
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
    settings: RwLock<HashMap<String, String>>,
    audit: RwLock<Vec<AuditEntry>>,
    zones_cache: RwLock<Option<(Vec<Zone>, DateTime<Utc>)>>,
    records_cache: RwLock<HashMap<String, (Vec<RecordSet>, DateTime<Utc>)>>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            settings: RwLock::new(HashMap::new()),
            audit: RwLock::new(Vec::new()),
            zones_cache: RwLock::new(None),
            records_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Helper to acquire write lock with error conversion
    fn write_lock<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockWriteGuard<'_, T>> {
        lock.write()
            .map_err(|e| StoreError::Lock(format!("write lock poisoned: {}", e)))
    }

    /// Helper to acquire read lock with error conversion
    fn read_lock<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockReadGuard<'_, T>> {
        lock.read()
            .map_err(|e| StoreError::Lock(format!("read lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // === User Operations ===

    async fn has_users(&self) -> Result<bool> {
        let guard = Self::read_lock(&self.users)?;
        Ok(!guard.is_empty())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let guard = Self::read_lock(&self.users)?;
        Ok(guard.get(username).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let guard = Self::read_lock(&self.users)?;
        let mut users: Vec<User> = guard.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn create_user(&self, username: &str, password_hash: &str, role: Role) -> Result<()> {
        let mut guard = Self::write_lock(&self.users)?;
        if guard.contains_key(username) {
            return Err(StoreError::AlreadyExists(username.to_string()));
        }
        let now = Utc::now();
        guard.insert(
            username.to_string(),
            User {
                id: Uuid::now_v7(),
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                role,
                active: true,
                auth_source: AuthSource::Local,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn update_user_password(&self, username: &str, password_hash: &str) -> Result<()> {
        let mut guard = Self::write_lock(&self.users)?;
        let user = guard
            .get_mut(username)
            .ok_or_else(|| StoreError::NotFound(username.to_string()))?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_user_active(&self, username: &str, active: bool) -> Result<()> {
        let mut guard = Self::write_lock(&self.users)?;
        let user = guard
            .get_mut(username)
            .ok_or_else(|| StoreError::NotFound(username.to_string()))?;
        user.active = active;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> Result<()> {
        let mut guard = Self::write_lock(&self.users)?;
        guard.remove(username);
        Ok(())
    }

    async fn upsert_directory_user(&self, username: &str, role: Role) -> Result<()> {
        let mut guard = Self::write_lock(&self.users)?;
        let now = Utc::now();
        match guard.get_mut(username) {
            Some(user) => {
                user.role = role;
                user.auth_source = AuthSource::Ldap;
                user.updated_at = now;
            }
            None => {
                guard.insert(
                    username.to_string(),
                    User {
                        id: Uuid::now_v7(),
                        username: username.to_string(),
                        password_hash: String::new(),
                        role,
                        active: true,
                        auth_source: AuthSource::Ldap,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    // === Session Operations ===

    async fn create_session(
        &self,
        token: &str,
        csrf_token: &str,
        username: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut guard = Self::write_lock(&self.sessions)?;
        if guard.contains_key(token) {
            return Err(StoreError::AlreadyExists("session token".to_string()));
        }
        guard.insert(
            token.to_string(),
            SessionRecord {
                token: token.to_string(),
                csrf_token: csrf_token.to_string(),
                username: username.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        let guard = Self::read_lock(&self.sessions)?;
        Ok(guard.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        let mut guard = Self::write_lock(&self.sessions)?;
        guard.remove(token);
        Ok(())
    }

    async fn purge_expired_sessions(&self) -> Result<u64> {
        let now = Utc::now();
        let mut guard = Self::write_lock(&self.sessions)?;
        let before = guard.len();
        guard.retain(|_, s| s.expires_at > now);
        Ok((before - guard.len()) as u64)
    }

    // === Settings Operations ===

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let guard = Self::read_lock(&self.settings)?;
        Ok(guard.get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = Self::write_lock(&self.settings)?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    // === Audit Operations ===

    async fn log_audit(&self, entry: &AuditEntry) -> Result<()> {
        let mut guard = Self::write_lock(&self.audit)?;
        let mut entry = entry.clone();
        entry.id = guard.len() as i64 + 1;
        entry.created_at = Some(Utc::now());
        guard.push(entry);
        Ok(())
    }

    async fn list_audit(&self, limit: i64, offset: i64) -> Result<(Vec<AuditEntry>, i64)> {
        let guard = Self::read_lock(&self.audit)?;
        let total = guard.len() as i64;
        let page = guard
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    // === Zone/Record Cache Operations ===

    async fn cache_zones(&self, zones: &[Zone]) -> Result<()> {
        let mut guard = Self::write_lock(&self.zones_cache)?;
        *guard = Some((zones.to_vec(), Utc::now()));
        Ok(())
    }

    async fn cached_zones(&self) -> Result<Option<(Vec<Zone>, DateTime<Utc>)>> {
        let guard = Self::read_lock(&self.zones_cache)?;
        Ok(guard.clone())
    }

    async fn cache_records(&self, zone_id: &str, records: &[RecordSet]) -> Result<()> {
        let mut guard = Self::write_lock(&self.records_cache)?;
        guard.insert(zone_id.to_string(), (records.to_vec(), Utc::now()));
        Ok(())
    }

    async fn cached_records(
        &self,
        zone_id: &str,
    ) -> Result<Option<(Vec<RecordSet>, DateTime<Utc>)>> {
        let guard = Self::read_lock(&self.records_cache)?;
        Ok(guard.get(zone_id).cloned())
    }

    async fn invalidate_record_cache(&self, zone_id: &str) -> Result<()> {
        let mut guard = Self::write_lock(&self.records_cache)?;
        guard.remove(zone_id);
        Ok(())
    }

    async fn invalidate_all_cache(&self) -> Result<()> {
        {
            let mut guard = Self::write_lock(&self.zones_cache)?;
            *guard = None;
        }
        let mut guard = Self::write_lock(&self.records_cache)?;
        guard.clear();
        Ok(())
    }
}
