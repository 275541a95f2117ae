//! Notification fan-out and the retrying delivery queue.

mod dispatcher;
mod models;
mod queue;
mod retry_policy;
mod transport;

pub use dispatcher::{
    resolve_recipients, BatchDispatcher, DeliverySummary, FanOutSettings, FanOutSummary,
    RecipientSource, DISPATCH_JOB,
};
pub use models::{
    DeliveryBatch, DeliveryState, FailedDelivery, MailPayload, QueueEntry, Recipient,
    RecipientKind, RecipientSet,
};
pub use queue::{EmailQueue, SweepSettings, SweepSummary, FAILED_LOG_LIMIT, SWEEP_LOCK};
pub use retry_policy::{FailureDisposition, RetryPolicy};
pub use transport::{DeliveryError, HttpMailTransport, LogMailTransport, MailTransport};
