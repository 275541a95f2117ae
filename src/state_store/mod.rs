//! Key-value persistence with optional per-key expiry.
//!
//! This is the only persistence primitive the job engine relies on: cursors,
//! locks, pending wake-ups and the mail queue all live here as JSON values.

mod memory;
mod schema;
mod sqlite_state_store;

pub use memory::InMemoryStateStore;
pub use schema::STATE_VERSIONED_SCHEMAS;
pub use sqlite_state_store::SqliteStateStore;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub trait StateStore: Send + Sync {
    /// Live value for `key`, or `None` if absent or expired.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value`, replacing any previous value and expiry.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Atomic read-modify-write over the live value of `key`.
    ///
    /// `f` receives the current live value; returning `Some` writes the new
    /// value with `ttl`, returning `None` leaves the entry untouched.
    /// Returns whether a write happened.
    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: &mut dyn FnMut(Option<&str>) -> Option<String>,
    ) -> Result<bool>;

    /// Write `value` only if no live entry exists for `key`.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut pending = Some(value.to_string());
        self.update(key, ttl, &mut |current| match current {
            Some(_) => None,
            None => pending.take(),
        })
    }
}

pub fn get_json<T: DeserializeOwned>(store: &dyn StateStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    store.set(key, &serde_json::to_string(value)?, ttl)
}

/// Typed wrapper around [`StateStore::update`].
pub fn update_json<T, F>(
    store: &dyn StateStore,
    key: &str,
    ttl: Option<Duration>,
    mut f: F,
) -> Result<bool>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(Option<T>) -> Option<T>,
{
    let mut failure: Option<anyhow::Error> = None;
    let written = store.update(key, ttl, &mut |current| {
        let parsed = match current.map(serde_json::from_str::<T>).transpose() {
            Ok(parsed) => parsed,
            Err(e) => {
                failure = Some(e.into());
                return None;
            }
        };
        let next = f(parsed)?;
        match serde_json::to_string(&next) {
            Ok(raw) => Some(raw),
            Err(e) => {
                failure = Some(e.into());
                None
            }
        }
    })?;

    match failure {
        Some(e) => Err(e),
        None => Ok(written),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_update_json_round_trips_typed_values() {
        let store = InMemoryStateStore::new(Arc::new(ManualClock::at_epoch()));

        update_json::<Vec<u32>, _>(&store, "numbers", None, |current| {
            let mut numbers = current.unwrap_or_default();
            numbers.push(7);
            Some(numbers)
        })
        .unwrap();
        update_json::<Vec<u32>, _>(&store, "numbers", None, |current| {
            let mut numbers = current.unwrap_or_default();
            numbers.push(9);
            Some(numbers)
        })
        .unwrap();

        let numbers: Vec<u32> = get_json(&store, "numbers").unwrap().unwrap();
        assert_eq!(numbers, vec![7, 9]);
    }

    #[test]
    fn test_update_json_reports_corrupt_values() {
        let store = InMemoryStateStore::new(Arc::new(ManualClock::at_epoch()));
        store.set("numbers", "not json", None).unwrap();

        let result = update_json::<Vec<u32>, _>(&store, "numbers", None, |current| current);

        assert!(result.is_err());
        assert_eq!(store.get("numbers").unwrap().as_deref(), Some("not json"));
    }
}
