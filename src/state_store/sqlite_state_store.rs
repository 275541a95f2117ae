use super::schema::STATE_VERSIONED_SCHEMAS;
use super::StateStore;
use crate::clock::{chrono_duration, Clock};
use crate::sqlite_persistence;
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const UPSERT_SQL: &str = "INSERT INTO state_entries (key, value, expires_at, updated_at)
     VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        expires_at = excluded.expires_at,
        updated_at = excluded.updated_at";

const SELECT_LIVE_SQL: &str = "SELECT value FROM state_entries
     WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)";

pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteStateStore {
    pub fn new<P: AsRef<Path>>(db_path: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = sqlite_persistence::open_versioned(db_path, STATE_VERSIONED_SCHEMAS, "state")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = sqlite_persistence::open_in_memory(STATE_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    /// Physically remove expired entries. Reads already ignore them.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.now_millis();
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM state_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        Ok(deleted)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("state store connection mutex poisoned"))
    }

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn expires_at(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|ttl| (self.clock.now() + chrono_duration(ttl)).timestamp_millis())
    }
}

impl StateStore for SqliteStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.now_millis();
        let conn = self.conn()?;
        let value = conn
            .query_row(SELECT_LIVE_SQL, params![key, now], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let now = self.now_millis();
        let expires_at = self.expires_at(ttl);
        let conn = self.conn()?;
        conn.execute(UPSERT_SQL, params![key, value, expires_at, now])?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM state_entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: &mut dyn FnMut(Option<&str>) -> Option<String>,
    ) -> Result<bool> {
        let now = self.now_millis();
        let expires_at = self.expires_at(ttl);
        let mut conn = self.conn()?;

        // IMMEDIATE takes the write lock up front so concurrent processes
        // sharing the file serialize their read-modify-write cycles.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<String> = tx
            .query_row(SELECT_LIVE_SQL, params![key, now], |row| row.get(0))
            .optional()?;

        let written = match f(current.as_deref()) {
            Some(value) => {
                tx.execute(UPSERT_SQL, params![key, value, expires_at, now])?;
                true
            }
            None => false,
        };
        tx.commit()?;
        Ok(written)
    }
}
