use super::models::{DeliveryState, FailedDelivery, MailPayload, QueueEntry, Recipient};
use super::retry_policy::{FailureDisposition, RetryPolicy};
use super::transport::{DeliveryError, MailTransport};
use crate::clock::{chrono_duration, Clock};
use crate::engine::{LockManager, TimeBudget};
use crate::state_store::{get_json, update_json, StateStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const QUEUE_KEY: &str = "mail/queue";
const FAILED_KEY: &str = "mail/failed";

/// Abandoned deliveries kept for inspection; older ones are dropped.
pub const FAILED_LOG_LIMIT: usize = 500;

/// Lock held by a sweep while it delivers.
pub const SWEEP_LOCK: &str = "mail_sweep";

/// Limits of one sweep invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    /// Entries claimed per round.
    pub batch_size: usize,
    pub budget: TimeBudget,
    /// Must outlive the budget plus one send. Claims older than this are
    /// considered abandoned by their sweep.
    pub lock_ttl: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Entries attempted.
    pub due: usize,
    pub sent: usize,
    pub retried: usize,
    pub abandoned: usize,
    pub remaining: usize,
    /// The budget ran out with due entries left for the next sweep.
    pub has_more: bool,
    pub skipped_locked: bool,
}

/// Pending deliveries with per-entry attempt counts, persisted in the state
/// store. Entries leave the queue when sent or abandoned.
pub struct EmailQueue {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl EmailQueue {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Queue a delivery, eligible immediately.
    pub fn enqueue(&self, recipient: Recipient, payload: MailPayload) -> Result<Uuid> {
        let now = self.clock.now();
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            recipient,
            payload,
            attempts: 0,
            enqueued_at: now,
            next_attempt_at: now,
            state: DeliveryState::Queued,
            claimed_at: None,
            last_error: None,
        };
        let id = entry.id;
        self.push(entry)?;
        Ok(id)
    }

    /// Record a first-attempt failure from a fan-out dispatch.
    pub fn record_failure(
        &self,
        recipient: Recipient,
        payload: MailPayload,
        error: &DeliveryError,
    ) -> Result<DeliveryState> {
        let now = self.clock.now();
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            recipient,
            payload,
            attempts: 0,
            enqueued_at: now,
            next_attempt_at: now,
            state: DeliveryState::Queued,
            claimed_at: None,
            last_error: None,
        };
        match self.fail(entry, error, now) {
            Ok(retry) => {
                let state = retry.state;
                self.push(retry)?;
                Ok(state)
            }
            Err(abandoned) => {
                self.append_failed(abandoned)?;
                Ok(DeliveryState::Abandoned)
            }
        }
    }

    pub fn entries(&self) -> Result<Vec<QueueEntry>> {
        Ok(get_json(self.store.as_ref(), QUEUE_KEY)?.unwrap_or_default())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Abandoned deliveries, oldest first.
    pub fn failed(&self) -> Result<Vec<FailedDelivery>> {
        Ok(get_json(self.store.as_ref(), FAILED_KEY)?.unwrap_or_default())
    }

    /// Deliver entries whose `next_attempt_at` has passed, in rounds of
    /// `batch_size`, until none are due or the budget runs out.
    ///
    /// Holds the [`SWEEP_LOCK`] for the duration, so concurrent sweeps skip
    /// instead of double-sending. Entries left `Scheduled` by a sweep that
    /// died are picked up again once their claim is older than the lock TTL.
    pub fn sweep(
        &self,
        transport: &dyn MailTransport,
        locks: &LockManager,
        settings: &SweepSettings,
    ) -> Result<SweepSummary> {
        if !locks.acquire(SWEEP_LOCK, settings.lock_ttl)? {
            return Ok(SweepSummary {
                skipped_locked: true,
                ..Default::default()
            });
        }

        let result = self.sweep_locked(transport, settings);

        if let Err(e) = locks.release(SWEEP_LOCK) {
            warn!("Failed to release mail sweep lock: {:#}", e);
        }
        result
    }

    fn sweep_locked(
        &self,
        transport: &dyn MailTransport,
        settings: &SweepSettings,
    ) -> Result<SweepSummary> {
        let window = settings.budget.window(self.clock.now());
        let mut summary = SweepSummary::default();

        'rounds: loop {
            let claimed = self.claim_due(
                self.clock.now(),
                settings.batch_size.max(1),
                settings.lock_ttl,
            )?;
            if claimed.is_empty() {
                break;
            }

            let mut claimed = claimed.into_iter();
            while let Some(entry) = claimed.next() {
                if window.is_expired(self.clock.now()) {
                    let unsent: Vec<Uuid> = std::iter::once(entry.id)
                        .chain(claimed.by_ref().map(|e| e.id))
                        .collect();
                    self.unclaim(&unsent)?;
                    summary.has_more = true;
                    break 'rounds;
                }
                summary.due += 1;
                self.attempt(transport, entry, &mut summary)?;
            }

            if window.is_expired(self.clock.now()) {
                summary.has_more = self.has_due(self.clock.now())?;
                break;
            }
        }

        summary.remaining = self.len()?;
        if summary.due > 0 {
            info!(
                "Mail sweep: {} due, {} sent, {} retrying, {} abandoned, {} still queued",
                summary.due, summary.sent, summary.retried, summary.abandoned, summary.remaining
            );
        }
        if summary.has_more {
            info!("Mail sweep out of budget, the rest waits for the next sweep");
        }
        Ok(summary)
    }

    fn attempt(
        &self,
        transport: &dyn MailTransport,
        entry: QueueEntry,
        summary: &mut SweepSummary,
    ) -> Result<()> {
        let result = transport.send(
            &entry.recipient.address,
            &entry.payload.subject,
            &entry.payload.body,
        );
        match result {
            Ok(()) => {
                debug!("Delivered queued mail {} to {}", entry.id, entry.recipient.address);
                self.remove(entry.id)?;
                summary.sent += 1;
            }
            Err(e) => {
                let id = entry.id;
                match self.fail(entry, &e, self.clock.now()) {
                    Ok(retry) => {
                        self.replace(retry)?;
                        summary.retried += 1;
                    }
                    Err(abandoned) => {
                        self.remove(id)?;
                        self.append_failed(abandoned)?;
                        summary.abandoned += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply a failed attempt. `Ok` carries the entry to re-queue, `Err` the
    /// terminal record.
    fn fail(
        &self,
        mut entry: QueueEntry,
        error: &DeliveryError,
        now: DateTime<Utc>,
    ) -> std::result::Result<QueueEntry, FailedDelivery> {
        entry.attempts += 1;
        match self.policy.on_failure(error, entry.attempts, now) {
            FailureDisposition::Retry { next_attempt_at } => {
                warn!(
                    "Delivery to {} failed (attempt {}/{}), retrying at {}: {}",
                    entry.recipient.address,
                    entry.attempts,
                    self.policy.max_attempts,
                    next_attempt_at,
                    error
                );
                entry.next_attempt_at = next_attempt_at;
                entry.state = DeliveryState::Queued;
                entry.claimed_at = None;
                entry.last_error = Some(error.to_string());
                Ok(entry)
            }
            FailureDisposition::Abandon => {
                error!(
                    "Abandoning delivery of \"{}\" to {} after {} attempts: {}",
                    entry.payload.subject, entry.recipient.address, entry.attempts, error
                );
                Err(FailedDelivery {
                    entry_id: entry.id,
                    address: entry.recipient.address,
                    subject: entry.payload.subject,
                    attempts: entry.attempts,
                    abandoned_at: now,
                    reason: error.to_string(),
                })
            }
        }
    }

    /// Claim up to `limit` due entries, earliest first. A `Scheduled` entry
    /// is only taken over once its claim is older than `claim_ttl`.
    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        claim_ttl: Duration,
    ) -> Result<Vec<QueueEntry>> {
        let stale_before = now - chrono_duration(claim_ttl);
        let mut claimed = Vec::new();
        update_json::<Vec<QueueEntry>, _>(self.store.as_ref(), QUEUE_KEY, None, |current| {
            claimed.clear();
            let mut entries = current?;
            let mut due: Vec<usize> = entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.next_attempt_at <= now && is_claimable(e, stale_before))
                .map(|(i, _)| i)
                .collect();
            if due.is_empty() {
                return None;
            }
            due.sort_by_key(|i| entries[*i].next_attempt_at);
            due.truncate(limit);
            for i in due {
                let entry = &mut entries[i];
                if entry.state == DeliveryState::Scheduled {
                    warn!(
                        "Reclaiming mail {} to {}, claimed at {:?} by a sweep that never finished",
                        entry.id, entry.recipient.address, entry.claimed_at
                    );
                }
                entry.state = DeliveryState::Scheduled;
                entry.claimed_at = Some(now);
                claimed.push(entry.clone());
            }
            Some(entries)
        })?;
        Ok(claimed)
    }

    /// Hand claimed entries back without an attempt.
    fn unclaim(&self, ids: &[Uuid]) -> Result<()> {
        update_json::<Vec<QueueEntry>, _>(self.store.as_ref(), QUEUE_KEY, None, |current| {
            let mut entries = current?;
            for entry in entries.iter_mut().filter(|e| ids.contains(&e.id)) {
                entry.state = DeliveryState::Queued;
                entry.claimed_at = None;
            }
            Some(entries)
        })?;
        Ok(())
    }

    fn has_due(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.entries()?.iter().any(|e| {
            e.next_attempt_at <= now && e.state == DeliveryState::Queued
        }))
    }

    fn push(&self, entry: QueueEntry) -> Result<()> {
        let mut pending = Some(entry);
        update_json::<Vec<QueueEntry>, _>(self.store.as_ref(), QUEUE_KEY, None, |current| {
            let mut entries = current.unwrap_or_default();
            entries.extend(pending.take());
            Some(entries)
        })?;
        Ok(())
    }

    fn replace(&self, entry: QueueEntry) -> Result<()> {
        update_json::<Vec<QueueEntry>, _>(self.store.as_ref(), QUEUE_KEY, None, |current| {
            let mut entries = current.unwrap_or_default();
            match entries.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry.clone(),
                None => entries.push(entry.clone()),
            }
            Some(entries)
        })?;
        Ok(())
    }

    fn remove(&self, id: Uuid) -> Result<()> {
        update_json::<Vec<QueueEntry>, _>(self.store.as_ref(), QUEUE_KEY, None, |current| {
            let mut entries = current?;
            let before = entries.len();
            entries.retain(|e| e.id != id);
            if entries.len() == before {
                return None;
            }
            Some(entries)
        })?;
        Ok(())
    }

    fn append_failed(&self, failed: FailedDelivery) -> Result<()> {
        let mut pending = Some(failed);
        update_json::<Vec<FailedDelivery>, _>(self.store.as_ref(), FAILED_KEY, None, |current| {
            let mut log = current.unwrap_or_default();
            log.extend(pending.take());
            if log.len() > FAILED_LOG_LIMIT {
                let excess = log.len() - FAILED_LOG_LIMIT;
                log.drain(..excess);
            }
            Some(log)
        })?;
        Ok(())
    }
}

fn is_claimable(entry: &QueueEntry, stale_before: DateTime<Utc>) -> bool {
    match entry.state {
        DeliveryState::Queued => true,
        DeliveryState::Scheduled => entry.claimed_at.map_or(true, |at| at <= stale_before),
        DeliveryState::Sent | DeliveryState::Abandoned => false,
    }
}
