//! SQLite storage backend.
//!
//! Persistent storage using SQLite with WAL mode for concurrent reads
//! and fast serialized writes. Cached zone and record listings are stored
//! as JSON blobs with indexed lookup columns.

use super::{AuditEntry, Result, Role, SessionRecord, Store, StoreError, User};
use crate::dns::{RecordSet, Zone};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

/// SQLite storage backend.
///
/// Uses WAL journal mode for concurrent reads with fast serialized writes.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Database(e.to_string())
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let id: String = row.try_get("id").map_err(db_err)?;
    let role: String = row.try_get("role").map_err(db_err)?;
    let auth_source: String = row.try_get("auth_source").map_err(db_err)?;
    Ok(User {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::InvalidData(e.to_string()))?,
        username: row.try_get("username").map_err(db_err)?,
        password_hash: row.try_get("password_hash").map_err(db_err)?,
        role: role.parse().map_err(StoreError::InvalidData)?,
        active: row.try_get::<i64, _>("active").map_err(db_err)? != 0,
        auth_source: auth_source.parse().map_err(StoreError::InvalidData)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(db_err)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.create_tables().await?;
        info!("SQLite store opened at {}", path_str);
        Ok(store)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                auth_source TEXT NOT NULL DEFAULT 'local',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                csrf_token TEXT NOT NULL,
                username TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                action TEXT NOT NULL,
                zone_id TEXT NOT NULL DEFAULT '',
                record_name TEXT NOT NULL DEFAULT '',
                record_type TEXT NOT NULL DEFAULT '',
                detail TEXT NOT NULL DEFAULT '',
                ip_address TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_log(created_at)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS zones_cache (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                data TEXT NOT NULL,
                cached_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records_cache (
                zone_id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                cached_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    // === User Operations ===

    async fn has_users(&self) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS c FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        let count: i64 = row.try_get("c").map_err(db_err)?;
        Ok(count > 0)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at, username")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_user).collect()
    }

    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, role, active, auth_source, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 1, 'local', ?5, ?5)
            "#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(username)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(now)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AlreadyExists(username.to_string()))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn update_user_password(&self, username: &str, password_hash: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE username = ?3",
        )
        .bind(password_hash)
        .bind(Utc::now())
        .bind(username)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(username.to_string()));
        }
        Ok(())
    }

    async fn set_user_active(&self, username: &str, active: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE users SET active = ?1, updated_at = ?2 WHERE username = ?3")
                .bind(active as i64)
                .bind(Utc::now())
                .bind(username)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(username.to_string()));
        }
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE username = ?1")
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_directory_user(&self, username: &str, role: Role) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, role, active, auth_source, created_at, updated_at)
            VALUES (?1, ?2, '', ?3, 1, 'ldap', ?4, ?4)
            ON CONFLICT(username) DO UPDATE SET
              role = excluded.role, auth_source = 'ldap', updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(username)
        .bind(role.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
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
        sqlx::query(
            "INSERT INTO sessions (token, csrf_token, username, expires_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(token)
        .bind(csrf_token)
        .bind(username)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT token, csrf_token, username, expires_at FROM sessions WHERE token = ?1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|row| {
            Ok(SessionRecord {
                token: row.try_get("token").map_err(db_err)?,
                csrf_token: row.try_get("csrf_token").map_err(db_err)?,
                username: row.try_get("username").map_err(db_err)?,
                expires_at: row.try_get("expires_at").map_err(db_err)?,
            })
        })
        .transpose()
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = ?1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn purge_expired_sessions(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    // === Settings Operations ===

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|row| row.try_get("value").map_err(db_err)).transpose()
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    // === Audit Operations ===

    async fn log_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (username, action, zone_id, record_name, record_type, detail, ip_address, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.username)
        .bind(&entry.action)
        .bind(&entry.zone_id)
        .bind(&entry.record_name)
        .bind(&entry.record_type)
        .bind(&entry.detail)
        .bind(&entry.ip_address)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_audit(&self, limit: i64, offset: i64) -> Result<(Vec<AuditEntry>, i64)> {
        let row = sqlx::query("SELECT COUNT(*) AS c FROM audit_log")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        let total: i64 = row.try_get("c").map_err(db_err)?;

        let rows = sqlx::query(
            "SELECT * FROM audit_log ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let entries = rows
            .iter()
            .map(|row| {
                Ok(AuditEntry {
                    id: row.try_get("id").map_err(db_err)?,
                    username: row.try_get("username").map_err(db_err)?,
                    action: row.try_get("action").map_err(db_err)?,
                    zone_id: row.try_get("zone_id").map_err(db_err)?,
                    record_name: row.try_get("record_name").map_err(db_err)?,
                    record_type: row.try_get("record_type").map_err(db_err)?,
                    detail: row.try_get("detail").map_err(db_err)?,
                    ip_address: row.try_get("ip_address").map_err(db_err)?,
                    created_at: Some(row.try_get("created_at").map_err(db_err)?),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((entries, total))
    }

    // === Zone/Record Cache Operations ===

    async fn cache_zones(&self, zones: &[Zone]) -> Result<()> {
        let data = serde_json::to_string(zones)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO zones_cache (id, data, cached_at) VALUES (0, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET data = excluded.data, cached_at = excluded.cached_at
            "#,
        )
        .bind(data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn cached_zones(&self) -> Result<Option<(Vec<Zone>, DateTime<Utc>)>> {
        let row = sqlx::query("SELECT data, cached_at FROM zones_cache WHERE id = 0")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|row| {
            let data: String = row.try_get("data").map_err(db_err)?;
            let cached_at: DateTime<Utc> = row.try_get("cached_at").map_err(db_err)?;
            let zones = serde_json::from_str(&data)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            Ok((zones, cached_at))
        })
        .transpose()
    }

    async fn cache_records(&self, zone_id: &str, records: &[RecordSet]) -> Result<()> {
        let data = serde_json::to_string(records)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO records_cache (zone_id, data, cached_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(zone_id) DO UPDATE SET data = excluded.data, cached_at = excluded.cached_at
            "#,
        )
        .bind(zone_id)
        .bind(data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn cached_records(
        &self,
        zone_id: &str,
    ) -> Result<Option<(Vec<RecordSet>, DateTime<Utc>)>> {
        let row = sqlx::query("SELECT data, cached_at FROM records_cache WHERE zone_id = ?1")
            .bind(zone_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|row| {
            let data: String = row.try_get("data").map_err(db_err)?;
            let cached_at: DateTime<Utc> = row.try_get("cached_at").map_err(db_err)?;
            let records = serde_json::from_str(&data)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            Ok((records, cached_at))
        })
        .transpose()
    }

    async fn invalidate_record_cache(&self, zone_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM records_cache WHERE zone_id = ?1")
            .bind(zone_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn invalidate_all_cache(&self) -> Result<()> {
        sqlx::query("DELETE FROM records_cache")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM zones_cache")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
