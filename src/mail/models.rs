use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Why a recipient is getting a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    /// Follows the author.
    Follower,
    /// Subscribed to the story.
    Subscriber,
    /// Addressed explicitly.
    Direct,
}

impl RecipientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientKind::Follower => "follower",
            RecipientKind::Subscriber => "subscriber",
            RecipientKind::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    pub kind: RecipientKind,
}

impl Recipient {
    pub fn new(address: impl Into<String>, kind: RecipientKind) -> Self {
        Self {
            address: address.into(),
            kind,
        }
    }

    /// Address form used for de-duplication.
    pub fn normalized_address(&self) -> String {
        self.address.trim().to_lowercase()
    }
}

/// Recipients for one event, unique by normalized address.
///
/// When the same address arrives from several sources the first occurrence
/// wins, so source order decides the recorded [`RecipientKind`].
#[derive(Debug, Clone, Default)]
pub struct RecipientSet {
    recipients: Vec<Recipient>,
    seen: HashSet<String>,
}

impl RecipientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add recipients, skipping blanks and duplicates. Returns how many were new.
    pub fn extend<I: IntoIterator<Item = Recipient>>(&mut self, recipients: I) -> usize {
        let mut added = 0;
        for recipient in recipients {
            let normalized = recipient.normalized_address();
            if normalized.is_empty() || !self.seen.insert(normalized) {
                continue;
            }
            self.recipients.push(recipient);
            added += 1;
        }
        added
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipient> {
        self.recipients.iter()
    }

    pub fn into_vec(self) -> Vec<Recipient> {
        self.recipients
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailPayload {
    pub subject: String,
    pub body: String,
}

/// Where a queue entry is in its delivery lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Waiting for `next_attempt_at`.
    Queued,
    /// Claimed by a sweep that is delivering it right now.
    Scheduled,
    Sent,
    Abandoned,
}

/// A pending delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub recipient: Recipient,
    pub payload: MailPayload,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub state: DeliveryState,
    /// When the sweep currently delivering the entry claimed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Record of a delivery given up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDelivery {
    pub entry_id: Uuid,
    pub address: String,
    pub subject: String,
    pub attempts: u32,
    pub abandoned_at: DateTime<Utc>,
    pub reason: String,
}

/// One fan-out chunk, carried as the args of a dispatch wake-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryBatch {
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub payload: MailPayload,
    pub recipients: Vec<Recipient>,
}
