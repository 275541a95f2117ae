use super::models::{DeliveryBatch, DeliveryState, MailPayload, Recipient, RecipientSet};
use super::queue::EmailQueue;
use super::transport::MailTransport;
use crate::clock::{chrono_duration, Clock};
use crate::scheduling::{Scheduler, Wakeup, WakeupHandler};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Wake-up name under which delivery chunks are scheduled.
pub const DISPATCH_JOB: &str = "mail_dispatch";

/// A list of recipients interested in an event.
pub trait RecipientSource<E>: Send + Sync {
    fn name(&self) -> &str;

    fn recipients(&self, event: &E) -> Result<Vec<Recipient>>;
}

/// Collect recipients from every source, de-duplicated by address.
///
/// A failing source is logged and skipped; the others still contribute.
pub fn resolve_recipients<E>(sources: &[Arc<dyn RecipientSource<E>>], event: &E) -> RecipientSet {
    let mut set = RecipientSet::new();
    for source in sources {
        match source.recipients(event) {
            Ok(recipients) => {
                let offered = recipients.len();
                let added = set.extend(recipients);
                debug!(
                    "Recipient source {}: {} offered, {} new",
                    source.name(),
                    offered,
                    added
                );
            }
            Err(e) => {
                warn!("Recipient source {} failed, skipping: {:#}", source.name(), e);
            }
        }
    }
    set
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutSettings {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanOutSummary {
    pub recipients: usize,
    pub chunks: usize,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySummary {
    pub attempted: usize,
    pub sent: usize,
    pub queued_for_retry: usize,
    pub abandoned: usize,
}

/// Splits a recipient set into chunks scheduled at increasing offsets, and
/// delivers each chunk when its wake-up fires.
pub struct BatchDispatcher {
    settings: FanOutSettings,
    scheduler: Arc<dyn Scheduler>,
    queue: Arc<EmailQueue>,
    transport: Arc<dyn MailTransport>,
    clock: Arc<dyn Clock>,
}

impl BatchDispatcher {
    pub fn new(
        settings: FanOutSettings,
        scheduler: Arc<dyn Scheduler>,
        queue: Arc<EmailQueue>,
        transport: Arc<dyn MailTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            scheduler,
            queue,
            transport,
            clock,
        }
    }

    /// Schedule chunk `i` at `now + i * chunk_delay`.
    pub fn fan_out(&self, recipients: RecipientSet, payload: MailPayload) -> Result<FanOutSummary> {
        let now = self.clock.now();
        let recipients = recipients.into_vec();
        let chunk_size = self.settings.chunk_size.max(1);
        let chunk_count = recipients.len().div_ceil(chunk_size);
        let mut summary = FanOutSummary {
            recipients: recipients.len(),
            chunks: chunk_count,
            ..Default::default()
        };

        for (chunk_index, chunk) in recipients.chunks(chunk_size).enumerate() {
            let fire_at = now + chrono_duration(self.settings.chunk_delay * chunk_index as u32);
            let batch = DeliveryBatch {
                chunk_index,
                chunk_count,
                payload: payload.clone(),
                recipients: chunk.to_vec(),
            };
            self.scheduler.schedule_once(
                DISPATCH_JOB,
                fire_at,
                Some(serde_json::to_value(&batch)?),
            )?;
            summary.first_at.get_or_insert(fire_at);
            summary.last_at = Some(fire_at);
        }

        info!(
            "Fanned out \"{}\" to {} recipients in {} chunks",
            payload.subject, summary.recipients, summary.chunks
        );
        Ok(summary)
    }

    /// Attempt every recipient in the chunk independently. Failures go to the
    /// retry queue.
    pub fn deliver(&self, batch: &DeliveryBatch) -> Result<DeliverySummary> {
        let mut summary = DeliverySummary::default();
        for recipient in &batch.recipients {
            summary.attempted += 1;
            let result = self.transport.send(
                &recipient.address,
                &batch.payload.subject,
                &batch.payload.body,
            );
            let error = match result {
                Ok(()) => {
                    summary.sent += 1;
                    continue;
                }
                Err(e) => e,
            };

            match self
                .queue
                .record_failure(recipient.clone(), batch.payload.clone(), &error)
            {
                Ok(DeliveryState::Abandoned) => summary.abandoned += 1,
                Ok(_) => summary.queued_for_retry += 1,
                Err(e) => {
                    error!(
                        "Could not queue retry for {}: {:#} (delivery error: {})",
                        recipient.address, e, error
                    );
                    summary.abandoned += 1;
                }
            }
        }

        info!(
            "Delivered chunk {}/{}: {} sent, {} queued for retry, {} abandoned",
            batch.chunk_index + 1,
            batch.chunk_count,
            summary.sent,
            summary.queued_for_retry,
            summary.abandoned
        );
        Ok(summary)
    }
}

impl WakeupHandler for BatchDispatcher {
    fn job_name(&self) -> &str {
        DISPATCH_JOB
    }

    fn handle(&self, wakeup: &Wakeup) -> Result<()> {
        let args = wakeup
            .args
            .clone()
            .with_context(|| format!("Dispatch wake-up {} has no batch", wakeup.id))?;
        let batch: DeliveryBatch =
            serde_json::from_value(args).context("Malformed delivery batch")?;
        self.deliver(&batch)?;
        Ok(())
    }
}
