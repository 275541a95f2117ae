use crate::clock::Clock;
use crate::scheduling::Scheduler;
use crate::state_store::StateStore;
use std::sync::Arc;

/// Shared collaborators handed to every job.
#[derive(Clone)]
pub struct JobContext {
    /// Cursors, locks, wake-ups and the mail queue.
    pub state_store: Arc<dyn StateStore>,

    /// Where continuations and delivery batches get registered.
    pub scheduler: Arc<dyn Scheduler>,

    pub clock: Arc<dyn Clock>,
}

impl JobContext {
    pub fn new(
        state_store: Arc<dyn StateStore>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state_store,
            scheduler,
            clock,
        }
    }
}
