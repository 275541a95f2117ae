use super::StateStore;
use crate::clock::{chrono_duration, Clock};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Process-local [`StateStore`], used as a fake in tests and for dry runs.
pub struct InMemoryStateStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStateStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("in-memory state store mutex poisoned"))
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.map(|ttl| self.clock.now() + chrono_duration(ttl))
    }

    fn live<'a>(&self, entries: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
        let now = self.clock.now();
        entries
            .get(key)
            .filter(|entry| entry.expires_at.map_or(true, |at| at > now))
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries()?;
        Ok(self.live(&entries, key).map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = self.expiry(ttl);
        self.entries()?.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: &mut dyn FnMut(Option<&str>) -> Option<String>,
    ) -> Result<bool> {
        let mut entries = self.entries()?;
        let current = self.live(&entries, key).map(|entry| entry.value.clone());
        match f(current.as_deref()) {
            Some(value) => {
                let expires_at = self.expiry(ttl);
                entries.insert(key.to_string(), Entry { value, expires_at });
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
