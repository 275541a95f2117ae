//! Recurring retry sweep over the mail queue.

use crate::engine::LockManager;
use crate::mail::{EmailQueue, MailTransport, SweepSettings, SweepSummary, SWEEP_LOCK};
use crate::scheduling::{Wakeup, WakeupHandler};
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

pub const JOB_ID: &str = SWEEP_LOCK;

pub struct MailSweep {
    queue: Arc<EmailQueue>,
    transport: Arc<dyn MailTransport>,
    locks: LockManager,
    settings: SweepSettings,
}

impl MailSweep {
    pub fn new(
        queue: Arc<EmailQueue>,
        transport: Arc<dyn MailTransport>,
        locks: LockManager,
        settings: SweepSettings,
    ) -> Self {
        Self {
            queue,
            transport,
            locks,
            settings,
        }
    }

    pub fn run(&self) -> Result<SweepSummary> {
        let summary = self
            .queue
            .sweep(self.transport.as_ref(), &self.locks, &self.settings)?;
        if summary.skipped_locked {
            debug!("Mail sweep already running elsewhere");
        }
        Ok(summary)
    }
}

impl WakeupHandler for MailSweep {
    fn job_name(&self) -> &str {
        JOB_ID
    }

    fn handle(&self, _wakeup: &Wakeup) -> Result<()> {
        self.run()?;
        Ok(())
    }
}
