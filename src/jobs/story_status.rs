//! Moves ongoing stories without recent chapters to hiatus.

use crate::clock::Clock;
use crate::config::StoryStatusSettings;
use crate::content::{ContentStore, Story, StoryStatus};
use crate::engine::{CandidateSource, ItemOutcome, ItemProcessor, JobContext, ResumableJob};
use anyhow::Result;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tracing::debug;

pub const JOB_ID: &str = "story_status";

pub struct StoryHiatus {
    store: Arc<dyn ContentStore>,
    clock: Arc<dyn Clock>,
    hiatus_after: ChronoDuration,
}

impl StoryHiatus {
    pub fn new(store: Arc<dyn ContentStore>, clock: Arc<dyn Clock>, hiatus_after_days: u32) -> Self {
        Self {
            store,
            clock,
            hiatus_after: ChronoDuration::days(hiatus_after_days as i64),
        }
    }
}

impl CandidateSource<Story> for StoryHiatus {
    fn fetch_after(&self, after_key: i64, limit: usize) -> Result<Vec<Story>> {
        self.store
            .stories_after(after_key, limit, Some(StoryStatus::Ongoing))
    }
}

impl ItemProcessor<Story> for StoryHiatus {
    fn process(&self, story: &Story) -> Result<ItemOutcome> {
        if story.status != StoryStatus::Ongoing {
            return Ok(ItemOutcome::Unchanged);
        }
        // No chapter yet, nothing to measure inactivity from.
        let Some(last_chapter_at) = story.last_chapter_at else {
            return Ok(ItemOutcome::Unchanged);
        };
        if self.clock.now() - last_chapter_at < self.hiatus_after {
            return Ok(ItemOutcome::Unchanged);
        }
        if self.store.set_story_status(story.id, StoryStatus::Hiatus)? {
            debug!(
                "Story {} put on hiatus, last chapter {}",
                story.id, last_chapter_at
            );
            Ok(ItemOutcome::Transitioned)
        } else {
            Ok(ItemOutcome::Unchanged)
        }
    }
}

pub fn build(
    settings: &StoryStatusSettings,
    store: Arc<dyn ContentStore>,
    ctx: JobContext,
) -> ResumableJob<Story> {
    let job = Arc::new(StoryHiatus::new(
        store,
        ctx.clock.clone(),
        settings.hiatus_after_days,
    ));
    ResumableJob::new(
        JOB_ID,
        settings.job.scan_settings(),
        job.clone(),
        job,
        ctx,
    )
}
