// SQLite-backed credential and result store

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::{CredentialStore, ResultHistory, ResultSink};
use crate::models::benchmark::{Credential, ResultRecord, StoredResult};

/// Key name every provider key is stored under
const API_KEY_NAME: &str = "API_KEY";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS api_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    key_name TEXT NOT NULL,
    key_value TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
    UNIQUE (provider, key_name)
);

CREATE TABLE IF NOT EXISTS test_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    prompt TEXT NOT NULL,
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    response_time INTEGER NOT NULL,
    response_text TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_test_results_created_at ON test_results (created_at);
";

/// Credential and result store in one SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        tracing::info!("Opening SQLite database: {}", path.display());
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::init(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("SQLite connection lock poisoned"))?;
        f(&conn)
    }
}

impl CredentialStore for SqliteStore {
    fn get_credential(&self, provider: &str) -> Result<Option<Credential>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT key_value, updated_at FROM api_keys WHERE provider = ? AND key_name = ?",
                    params![provider, API_KEY_NAME],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .context("Failed to load API key from SQLite")?;

            Ok(row.map(|(value, updated_at)| Credential {
                provider: provider.to_string(),
                value,
                obtained_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
            }))
        })
    }

    fn put_credential(&self, provider: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO api_keys (provider, key_name, key_value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (provider, key_name) DO UPDATE SET
                    key_value = excluded.key_value,
                    updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')",
                params![provider, API_KEY_NAME, value],
            )
            .context("Failed to store API key in SQLite")?;
            Ok(())
        })
    }
}

impl ResultSink for SqliteStore {
    fn record(&self, record: &ResultRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO test_results (prompt, provider, model, response_time, response_text, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.prompt,
                    record.provider,
                    record.model,
                    record.response_time_ms as i64,
                    record.response_text,
                    record.status,
                ],
            )
            .context("Failed to insert test result")?;
            Ok(())
        })
    }
}

impl ResultHistory for SqliteStore {
    fn recent(&self, limit: usize) -> Result<Vec<StoredResult>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, prompt, provider, model, response_time, response_text, status, created_at
                 FROM test_results ORDER BY created_at DESC, id DESC LIMIT ?",
            )?;

            let rows = stmt.query_map(params![limit as i64], |row| {
                let created_at: String = row.get(7)?;
                Ok(StoredResult {
                    id: row.get(0)?,
                    prompt: row.get(1)?,
                    provider: row.get(2)?,
                    model: row.get(3)?,
                    response_time: row.get::<_, i64>(4)?.max(0) as u64,
                    response_text: row.get(5)?,
                    status: row.get(6)?,
                    created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
                })
            })?;

            let results = rows
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read test results")?;
            Ok(results)
        })
    }
}

/// Parse SQLite `strftime` output (UTC, no offset)
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
