//! Durable last-event-id storage, keyed by tenant.
//!
//! The client only ever reads and writes one entry per tenant. Writes are
//! last-write-wins; a tenant is expected to have a single active client.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

const LAST_EVENT_ID_KEY: &str = "last_event_id";

/// Key-value store the client persists its resume point in.
pub trait LastEventIdStore: Send + Sync {
    fn get(&self, tenant: &str) -> Result<Option<String>>;
    fn set(&self, tenant: &str, last_event_id: &str) -> Result<()>;
}

/// Process-local store. Survives reconnects, not restarts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LastEventIdStore for MemoryStore {
    fn get(&self, tenant: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(tenant).cloned())
    }

    fn set(&self, tenant: &str, last_event_id: &str) -> Result<()> {
        self.entries
            .lock()
            .insert(tenant.to_string(), last_event_id.to_string());
        Ok(())
    }
}

/// SQLite-backed store; survives client restarts.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a cursor database.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path)
            .with_context(|| format!("failed to open cursor database {}", path.display()))?;
        db.execute_batch(
            "PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS stream_cursor (
                tenant TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tenant, key)
            );",
        )
        .context("failed to initialise cursor schema")?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }
}

impl LastEventIdStore for SqliteStore {
    fn get(&self, tenant: &str) -> Result<Option<String>> {
        let db = self.db.lock();
        let value = db
            .query_row(
                "SELECT value FROM stream_cursor WHERE tenant = ?1 AND key = ?2",
                params![tenant, LAST_EVENT_ID_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, tenant: &str, last_event_id: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO stream_cursor (tenant, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (tenant, key) DO UPDATE
             SET value = excluded.value, updated_at = excluded.updated_at",
            params![tenant, LAST_EVENT_ID_KEY, last_event_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
