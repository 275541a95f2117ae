use super::{Cadence, Scheduler, Wakeup, WakeupKind};
use crate::state_store::{get_json, update_json, StateStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const WAKEUPS_KEY: &str = "scheduler/wakeups";

/// [`Scheduler`] that keeps pending wake-ups in the state store, so they
/// survive restarts and are visible to every host sharing the store.
#[derive(Clone)]
pub struct StoreScheduler {
    store: Arc<dyn StateStore>,
}

impl StoreScheduler {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// All pending wake-ups, earliest first.
    pub fn pending(&self) -> Result<Vec<Wakeup>> {
        let mut wakeups: Vec<Wakeup> =
            get_json(self.store.as_ref(), WAKEUPS_KEY)?.unwrap_or_default();
        wakeups.sort_by_key(|w| w.fire_at);
        Ok(wakeups)
    }

    pub fn next_fire_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.pending()?.first().map(|w| w.fire_at))
    }

    /// Claim every wake-up due at `now`.
    ///
    /// One-shots are removed; recurring entries are moved to their next fire
    /// time. The returned copies carry the fire time they were due at.
    pub fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<Wakeup>> {
        let mut due: Vec<Wakeup> = Vec::new();
        update_json::<Vec<Wakeup>, _>(self.store.as_ref(), WAKEUPS_KEY, None, |current| {
            due.clear();
            let wakeups = current?;
            let mut remaining = Vec::with_capacity(wakeups.len());
            for mut wakeup in wakeups {
                if wakeup.fire_at > now {
                    remaining.push(wakeup);
                    continue;
                }
                due.push(wakeup.clone());
                let next = match &wakeup.kind {
                    WakeupKind::Recurring { cadence } => Some(cadence.next_after(now)),
                    WakeupKind::Once => None,
                };
                match next {
                    Some(Some(next)) => {
                        wakeup.fire_at = next;
                        remaining.push(wakeup);
                    }
                    Some(None) => warn!(
                        "Dropping recurring wake-up for {}: cadence has no next fire time",
                        wakeup.job_name
                    ),
                    None => {}
                }
            }
            if due.is_empty() {
                return None;
            }
            Some(remaining)
        })?;
        due.sort_by_key(|w| w.fire_at);
        Ok(due)
    }

    fn push(&self, wakeup: Wakeup) -> Result<()> {
        let mut pending = Some(wakeup);
        update_json::<Vec<Wakeup>, _>(self.store.as_ref(), WAKEUPS_KEY, None, |current| {
            let mut wakeups = current.unwrap_or_default();
            wakeups.extend(pending.take());
            Some(wakeups)
        })?;
        Ok(())
    }
}

impl Scheduler for StoreScheduler {
    fn schedule_recurring(
        &self,
        job_name: &str,
        cadence: Cadence,
        first_fire_at: DateTime<Utc>,
    ) -> Result<()> {
        let kind = WakeupKind::Recurring {
            cadence: cadence.clone(),
        };
        let mut replaced = false;
        let written =
            update_json::<Vec<Wakeup>, _>(self.store.as_ref(), WAKEUPS_KEY, None, |current| {
                let mut wakeups = current.unwrap_or_default();
                if wakeups
                    .iter()
                    .any(|w| w.job_name == job_name && w.kind == kind)
                {
                    return None;
                }
                let before = wakeups.len();
                wakeups.retain(|w| w.job_name != job_name || w.is_once());
                replaced = wakeups.len() != before;
                wakeups.push(Wakeup {
                    id: Uuid::new_v4(),
                    job_name: job_name.to_string(),
                    fire_at: first_fire_at,
                    kind: kind.clone(),
                    args: None,
                });
                Some(wakeups)
            })?;

        if written {
            info!(
                "Scheduled {} {}, first at {}{}",
                job_name,
                cadence,
                first_fire_at,
                if replaced { " (replacing previous cadence)" } else { "" }
            );
        } else {
            debug!("Recurring wake-up for {} already registered", job_name);
        }
        Ok(())
    }

    fn schedule_once(
        &self,
        job_name: &str,
        fire_at: DateTime<Utc>,
        args: Option<JsonValue>,
    ) -> Result<()> {
        debug!("Scheduling one-shot wake-up for {} at {}", job_name, fire_at);
        self.push(Wakeup {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            fire_at,
            kind: WakeupKind::Once,
            args,
        })
    }

    fn cancel_all(&self, job_name: &str) -> Result<usize> {
        let mut removed = 0;
        update_json::<Vec<Wakeup>, _>(self.store.as_ref(), WAKEUPS_KEY, None, |current| {
            let mut wakeups = current?;
            let before = wakeups.len();
            wakeups.retain(|w| w.job_name != job_name);
            removed = before - wakeups.len();
            if removed == 0 {
                return None;
            }
            Some(wakeups)
        })?;
        if removed > 0 {
            info!("Cancelled {} wake-ups for {}", removed, job_name);
        }
        Ok(removed)
    }

    fn has_pending_once(&self, job_name: &str) -> Result<bool> {
        Ok(self
            .pending()?
            .iter()
            .any(|w| w.job_name == job_name && w.is_once()))
    }
}
