use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::storage::models::{Setting, KEY_API_BASE, KEY_AUTH_TOKEN, KEY_LAST_ORDER_NO};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("local store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("local store error: {0}")]
    Io(#[from] std::io::Error),
    #[error("local store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persisted client state.
///
/// A single `settings` table of opaque strings. Writers are rare (login,
/// payment create, base override) so one connection behind a mutex is enough;
/// the store is shared through `Arc` by every component that reads it.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open (or create) the store at `db_path`
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// Throwaway store for tests
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Read a value; empty strings count as absent
    pub fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value.filter(|v| !v.is_empty()))
    }

    pub fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let setting = Setting::new(key.to_string(), value.to_string());
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![setting.key, setting.value, setting.updated_at],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(())
    }

    pub fn all(&self) -> StoreResult<Vec<Setting>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value, updated_at FROM settings ORDER BY key")?;
        let settings = stmt
            .query_map([], |row| Setting::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(settings)
    }

    // --- well-known keys ---

    pub fn auth_token(&self) -> StoreResult<Option<String>> {
        self.get(KEY_AUTH_TOKEN)
    }

    pub fn set_auth_token(&self, token: &str) -> StoreResult<()> {
        self.set(KEY_AUTH_TOKEN, token)
    }

    pub fn clear_auth_token(&self) -> StoreResult<()> {
        self.remove(KEY_AUTH_TOKEN)
    }

    pub fn api_base_override(&self) -> StoreResult<Option<String>> {
        self.get(KEY_API_BASE)
    }

    pub fn set_api_base_override(&self, base: &str) -> StoreResult<()> {
        self.set(KEY_API_BASE, base)
    }

    pub fn clear_api_base_override(&self) -> StoreResult<()> {
        self.remove(KEY_API_BASE)
    }

    pub fn last_order_no(&self) -> StoreResult<Option<String>> {
        self.get(KEY_LAST_ORDER_NO)
    }

    pub fn set_last_order_no(&self, order_no: &str) -> StoreResult<()> {
        self.set(KEY_LAST_ORDER_NO, order_no)
    }

    pub fn clear_last_order_no(&self) -> StoreResult<()> {
        self.remove(KEY_LAST_ORDER_NO)
    }
}
