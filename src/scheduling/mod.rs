//! Wall-clock wake-ups for jobs.
//!
//! Jobs never sleep or loop on their own. They ask a [`Scheduler`] to wake
//! them later, and a host ([`WakeupLoop`] in this crate) fires due wake-ups
//! into the matching [`WakeupHandler`].

mod store_scheduler;
mod wakeup_loop;

pub use store_scheduler::StoreScheduler;
pub use wakeup_loop::WakeupLoop;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// How often a recurring wake-up fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cadence {
    /// Once a day at `hour:minute` UTC.
    Daily { hour: u32, minute: u32 },
    /// Fixed interval, at least one second.
    Every { interval_secs: u64 },
}

impl Cadence {
    /// First fire time strictly after `now`. `None` for an impossible time of day.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Cadence::Daily { hour, minute } => {
                let today = now
                    .date_naive()
                    .and_hms_opt(*hour, *minute, 0)?
                    .and_utc();
                if today > now {
                    Some(today)
                } else {
                    Some(today + ChronoDuration::days(1))
                }
            }
            Cadence::Every { interval_secs } => {
                Some(now + ChronoDuration::seconds((*interval_secs).max(1) as i64))
            }
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cadence::Daily { hour, minute } => write!(f, "daily at {:02}:{:02} UTC", hour, minute),
            Cadence::Every { interval_secs } => write!(f, "every {}s", interval_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WakeupKind {
    Recurring { cadence: Cadence },
    Once,
}

/// A pending wake-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wakeup {
    pub id: Uuid,
    pub job_name: String,
    pub fire_at: DateTime<Utc>,
    pub kind: WakeupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<JsonValue>,
}

impl Wakeup {
    pub fn is_once(&self) -> bool {
        matches!(self.kind, WakeupKind::Once)
    }
}

/// Host scheduler port.
pub trait Scheduler: Send + Sync {
    /// Register a recurring wake-up for `job_name`, first firing at
    /// `first_fire_at`. Re-registering the same cadence is a no-op.
    fn schedule_recurring(
        &self,
        job_name: &str,
        cadence: Cadence,
        first_fire_at: DateTime<Utc>,
    ) -> Result<()>;

    fn schedule_once(
        &self,
        job_name: &str,
        fire_at: DateTime<Utc>,
        args: Option<JsonValue>,
    ) -> Result<()>;

    /// Drop every wake-up for `job_name`. Returns how many were removed.
    fn cancel_all(&self, job_name: &str) -> Result<usize>;

    fn has_pending_once(&self, job_name: &str) -> Result<bool>;
}

/// Something that reacts when a wake-up for its job fires.
///
/// Called from a blocking worker thread.
pub trait WakeupHandler: Send + Sync {
    fn job_name(&self) -> &str;

    fn handle(&self, wakeup: &Wakeup) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_daily_later_today() {
        let cadence = Cadence::Daily { hour: 3, minute: 20 };
        assert_eq!(
            cadence.next_after(at("2024-01-01T01:00:00Z")),
            Some(at("2024-01-01T03:20:00Z"))
        );
    }

    #[test]
    fn test_daily_rolls_to_tomorrow() {
        let cadence = Cadence::Daily { hour: 3, minute: 20 };
        assert_eq!(
            cadence.next_after(at("2024-01-01T03:20:00Z")),
            Some(at("2024-01-02T03:20:00Z"))
        );
        assert_eq!(
            cadence.next_after(at("2024-01-31T23:59:00Z")),
            Some(at("2024-02-01T03:20:00Z"))
        );
    }

    #[test]
    fn test_daily_rejects_impossible_time() {
        let cadence = Cadence::Daily { hour: 24, minute: 0 };
        assert_eq!(cadence.next_after(at("2024-01-01T00:00:00Z")), None);
    }

    #[test]
    fn test_every_has_one_second_floor() {
        let now = at("2024-01-01T00:00:00Z");
        assert_eq!(
            Cadence::Every { interval_secs: 300 }.next_after(now),
            Some(at("2024-01-01T00:05:00Z"))
        );
        assert_eq!(
            Cadence::Every { interval_secs: 0 }.next_after(now),
            Some(at("2024-01-01T00:00:01Z"))
        );
    }

    #[test]
    fn test_wakeup_serialization() {
        let wakeup = Wakeup {
            id: Uuid::nil(),
            job_name: "story_status".to_string(),
            fire_at: at("2024-01-01T03:20:00Z"),
            kind: WakeupKind::Recurring {
                cadence: Cadence::Daily { hour: 3, minute: 20 },
            },
            args: None,
        };

        let json = serde_json::to_value(&wakeup).unwrap();
        assert_eq!(json["kind"]["type"], "recurring");
        assert_eq!(json["kind"]["cadence"]["type"], "daily");
        assert!(json.get("args").is_none());

        let back: Wakeup = serde_json::from_value(json).unwrap();
        assert_eq!(back, wakeup);
    }
}
