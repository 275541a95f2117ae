#![allow(dead_code)]

use anyhow::Result;
use archive_jobs::clock::ManualClock;
use archive_jobs::content::{AccountRole, NewStory, SqliteContentStore};
use archive_jobs::engine::{ItemOutcome, ItemProcessor};
use std::sync::Arc;
use std::time::Duration;

/// Authors with nothing published, all candidates for demotion.
pub fn seed_idle_authors(store: &SqliteContentStore, count: usize) -> Vec<i64> {
    (0..count)
        .map(|i| {
            store
                .insert_account(&format!("author{}", i), None, AccountRole::Author)
                .unwrap()
        })
        .collect()
}

/// A published story with `count` subscribers at `reader{i}@example.com`.
pub fn seed_story_with_subscribers(store: &SqliteContentStore, count: usize) -> i64 {
    let author = store
        .insert_account("storyteller", Some("storyteller@example.com"), AccountRole::Author)
        .unwrap();
    let story = store
        .insert_story(&NewStory::published(author, "The Long Tide"))
        .unwrap();
    for i in 0..count {
        let reader = store
            .insert_account(
                &format!("reader{}", i),
                Some(&format!("reader{}@example.com", i)),
                AccountRole::Reader,
            )
            .unwrap();
        store.add_subscription(reader, story).unwrap();
    }
    story
}

/// Wraps a processor so every item costs `per_item` of manual-clock time.
pub struct TickingProcessor<T> {
    inner: Arc<dyn ItemProcessor<T>>,
    clock: Arc<ManualClock>,
    per_item: Duration,
}

impl<T> TickingProcessor<T> {
    pub fn new(inner: Arc<dyn ItemProcessor<T>>, clock: Arc<ManualClock>, per_item: Duration) -> Self {
        Self {
            inner,
            clock,
            per_item,
        }
    }
}

impl<T> ItemProcessor<T> for TickingProcessor<T> {
    fn process(&self, item: &T) -> Result<ItemOutcome> {
        self.clock.advance(self.per_item);
        self.inner.process(item)
    }
}
