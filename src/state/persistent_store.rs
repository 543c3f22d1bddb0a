//! SQLite-backed mirror of verification state.
//!
//! The in-memory registry decides; this store records what it decided so the
//! outcome survives a restart. A single connection guarded by a mutex gives
//! serialized single-writer access, with WAL journaling for crash safety.

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::group_config::GroupConfig;
use crate::error::{BotError, Result};
use crate::verification::types::{ChatId, UserId, VerificationStatus};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS user_verifications (
        user_id INTEGER PRIMARY KEY,
        username TEXT,
        status TEXT NOT NULL,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS group_configs (
        chat_id INTEGER PRIMARY KEY,
        require_followup_message INTEGER NOT NULL DEFAULT 0,
        verification_timeout_seconds INTEGER NOT NULL DEFAULT 360,
        failure_ban_cooldown_seconds INTEGER NOT NULL DEFAULT 600,
        kick_grace_period_seconds INTEGER NOT NULL DEFAULT 600,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS pending_groups (
        user_id INTEGER NOT NULL,
        chat_id INTEGER NOT NULL,
        requested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (user_id, chat_id)
    );",
];

/// Durable row of `user_verifications`
#[derive(Debug, Clone, PartialEq)]
pub struct UserVerificationRecord {
    pub user_id: UserId,
    pub username: String,
    pub status: VerificationStatus,
    pub updated_at: DateTime<Utc>,
}

/// A join request in `chat_id` still waiting on the user's verification
#[derive(Debug, Clone, PartialEq)]
pub struct PendingGroupLink {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub requested_at: DateTime<Utc>,
}

pub struct PersistentStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl PersistentStore {
    /// Open or create the store at `path` and make sure the schema exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| BotError::StoreOpen {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory store for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn initialize_connection(conn: &Connection) -> Result<()> {
        // journal_mode answers with the resulting mode, so it has to be read as a row
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL;", [], |row| row.get(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        for stmt in SCHEMA {
            conn.execute_batch(stmt)?;
        }
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current journal mode, "wal" for file-backed stores
    pub fn journal_mode(&self) -> Result<String> {
        let conn = self.conn.lock();
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode)
    }

    pub fn upsert_user_verification(
        &self,
        user_id: UserId,
        username: &str,
        status: VerificationStatus,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user_verifications (user_id, username, status, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
             ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![user_id, username, status.as_str()],
        )?;
        Ok(())
    }

    pub fn get_user_verification(&self, user_id: UserId) -> Result<Option<UserVerificationRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT user_id, username, status, updated_at FROM user_verifications WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, NaiveDateTime>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((user_id, username, status, updated_at)) = row else {
            return Ok(None);
        };
        let status = VerificationStatus::parse(&status).ok_or_else(|| BotError::Internal {
            message: format!("unknown verification status '{}' for user {}", status, user_id),
        })?;

        Ok(Some(UserVerificationRecord {
            user_id,
            username: username.unwrap_or_default(),
            status,
            updated_at: updated_at.and_utc(),
        }))
    }

    pub fn upsert_group_config(&self, cfg: &GroupConfig) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO group_configs (chat_id, require_followup_message, verification_timeout_seconds,
                failure_ban_cooldown_seconds, kick_grace_period_seconds, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
             ON CONFLICT(chat_id) DO UPDATE SET
                require_followup_message = excluded.require_followup_message,
                verification_timeout_seconds = excluded.verification_timeout_seconds,
                failure_ban_cooldown_seconds = excluded.failure_ban_cooldown_seconds,
                kick_grace_period_seconds = excluded.kick_grace_period_seconds,
                updated_at = excluded.updated_at",
            params![
                cfg.chat_id,
                cfg.require_followup_message,
                cfg.verification_timeout_seconds,
                cfg.failure_ban_cooldown_seconds,
                cfg.kick_grace_period_seconds,
            ],
        )?;
        Ok(())
    }

    /// Read the room's config, inserting the default row on first access
    pub fn get_or_create_group_config(&self, chat_id: ChatId) -> Result<GroupConfig> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO group_configs (chat_id) VALUES (?1) ON CONFLICT(chat_id) DO NOTHING",
            params![chat_id],
        )?;

        let cfg = conn
            .query_row(
                "SELECT chat_id, require_followup_message, verification_timeout_seconds,
                    failure_ban_cooldown_seconds, kick_grace_period_seconds, updated_at
                 FROM group_configs WHERE chat_id = ?1",
                params![chat_id],
                |row| {
                    Ok(GroupConfig {
                        chat_id: row.get(0)?,
                        require_followup_message: row.get::<_, i64>(1)? != 0,
                        verification_timeout_seconds: row.get(2)?,
                        failure_ban_cooldown_seconds: row.get(3)?,
                        kick_grace_period_seconds: row.get(4)?,
                        updated_at: Some(row.get::<_, NaiveDateTime>(5)?.and_utc()),
                    })
                },
            )
            .optional()?;

        Ok(cfg.unwrap_or_else(|| GroupConfig::with_defaults(chat_id)))
    }

    pub fn add_pending_group(&self, user_id: UserId, chat_id: ChatId) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pending_groups (user_id, chat_id) VALUES (?1, ?2)
             ON CONFLICT(user_id, chat_id) DO UPDATE SET requested_at = CURRENT_TIMESTAMP",
            params![user_id, chat_id],
        )?;
        Ok(())
    }

    /// Returns the number of links removed
    pub fn delete_pending_groups_by_user(&self, user_id: UserId) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM pending_groups WHERE user_id = ?1", params![user_id])?;
        Ok(removed)
    }

    pub fn list_pending_groups(&self, user_id: UserId) -> Result<Vec<PendingGroupLink>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, chat_id, requested_at FROM pending_groups
             WHERE user_id = ?1 ORDER BY chat_id ASC",
        )?;
        let links = stmt
            .query_map(params![user_id], |row| {
                Ok(PendingGroupLink {
                    user_id: row.get(0)?,
                    chat_id: row.get(1)?,
                    requested_at: row.get::<_, NaiveDateTime>(2)?.and_utc(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(links)
    }

    #[cfg(test)]
    fn count_rows(&self, table: &str) -> i64 {
        let conn = self.conn.lock();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }
}

/// Shared store type
pub type SharedStore = Arc<PersistentStore>;

pub fn create_shared_store(store: PersistentStore) -> SharedStore {
    Arc::new(store)
}
