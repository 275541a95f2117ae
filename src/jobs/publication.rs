//! Publication notifications: resolve who cares about a story update and
//! fan one message out to all of them.

use crate::content::ContentStore;
use crate::mail::{
    resolve_recipients, BatchDispatcher, FanOutSummary, MailPayload, Recipient, RecipientKind,
    RecipientSource,
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationEvent {
    pub story_id: i64,
    pub story_title: String,
    pub author_id: i64,
    pub author_handle: String,
    /// Set when a new chapter was released, absent for a new story.
    pub chapter: Option<u32>,
}

impl PublicationEvent {
    /// Build the event for a published story from the content store.
    pub fn for_story(store: &dyn ContentStore, story_id: i64, chapter: Option<u32>) -> Result<Self> {
        let story = store
            .story(story_id)?
            .with_context(|| format!("Story {} not found", story_id))?;
        if !story.published {
            bail!("Story {} is not published", story_id);
        }
        let author = store
            .account(story.author_id)?
            .with_context(|| format!("Author {} of story {} not found", story.author_id, story_id))?;
        Ok(Self {
            story_id,
            story_title: story.title,
            author_id: author.id,
            author_handle: author.handle,
            chapter,
        })
    }
}

pub struct AuthorFollowers {
    store: Arc<dyn ContentStore>,
}

impl AuthorFollowers {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }
}

impl RecipientSource<PublicationEvent> for AuthorFollowers {
    fn name(&self) -> &str {
        "author_followers"
    }

    fn recipients(&self, event: &PublicationEvent) -> Result<Vec<Recipient>> {
        Ok(self
            .store
            .author_followers(event.author_id)?
            .into_iter()
            .map(|address| Recipient::new(address, RecipientKind::Follower))
            .collect())
    }
}

pub struct StorySubscribers {
    store: Arc<dyn ContentStore>,
}

impl StorySubscribers {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }
}

impl RecipientSource<PublicationEvent> for StorySubscribers {
    fn name(&self) -> &str {
        "story_subscribers"
    }

    fn recipients(&self, event: &PublicationEvent) -> Result<Vec<Recipient>> {
        Ok(self
            .store
            .story_subscribers(event.story_id)?
            .into_iter()
            .map(|address| Recipient::new(address, RecipientKind::Subscriber))
            .collect())
    }
}

pub fn compose_payload(event: &PublicationEvent) -> MailPayload {
    match event.chapter {
        Some(chapter) => MailPayload {
            subject: format!("\"{}\": chapter {} is out", event.story_title, chapter),
            body: format!(
                "{} just released chapter {} of \"{}\".",
                event.author_handle, chapter, event.story_title
            ),
        },
        None => MailPayload {
            subject: format!("New story from {}: \"{}\"", event.author_handle, event.story_title),
            body: format!(
                "{} just published a new story, \"{}\".",
                event.author_handle, event.story_title
            ),
        },
    }
}

/// Resolves recipients for a publication and hands them to the dispatcher.
pub struct PublicationNotifier {
    sources: Vec<Arc<dyn RecipientSource<PublicationEvent>>>,
    dispatcher: Arc<BatchDispatcher>,
}

impl PublicationNotifier {
    /// Subscribers come first, so someone who both follows and subscribes is
    /// recorded as a subscriber.
    pub fn new(store: Arc<dyn ContentStore>, dispatcher: Arc<BatchDispatcher>) -> Self {
        let subscribers: Arc<dyn RecipientSource<PublicationEvent>> =
            Arc::new(StorySubscribers::new(store.clone()));
        let followers: Arc<dyn RecipientSource<PublicationEvent>> =
            Arc::new(AuthorFollowers::new(store));
        Self::with_sources(vec![subscribers, followers], dispatcher)
    }

    pub fn with_sources(
        sources: Vec<Arc<dyn RecipientSource<PublicationEvent>>>,
        dispatcher: Arc<BatchDispatcher>,
    ) -> Self {
        Self {
            sources,
            dispatcher,
        }
    }

    pub fn notify(&self, event: &PublicationEvent) -> Result<FanOutSummary> {
        let recipients = resolve_recipients(&self.sources, event);
        if recipients.is_empty() {
            info!("No recipients for story {}, nothing to send", event.story_id);
            return Ok(FanOutSummary::default());
        }
        self.dispatcher.fan_out(recipients, compose_payload(event))
    }
}
