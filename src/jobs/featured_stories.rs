//! Keeps the featured flag in line with each story's engagement score.

use crate::config::FeaturedStoriesSettings;
use crate::content::{ContentStore, Story};
use crate::engine::{CandidateSource, ItemOutcome, ItemProcessor, JobContext, ResumableJob};
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

pub const JOB_ID: &str = "featured_stories";

/// Turns a story into a comparable score.
pub trait Scorer: Send + Sync {
    fn score(&self, story: &Story) -> f64;
}

/// Weighted sum of engagement counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedEngagementScorer {
    pub views_weight: f64,
    pub likes_weight: f64,
    pub comments_weight: f64,
}

impl Default for WeightedEngagementScorer {
    fn default() -> Self {
        Self {
            views_weight: 0.01,
            likes_weight: 1.0,
            comments_weight: 2.0,
        }
    }
}

impl Scorer for WeightedEngagementScorer {
    fn score(&self, story: &Story) -> f64 {
        let e = &story.engagement;
        e.views as f64 * self.views_weight
            + e.likes as f64 * self.likes_weight
            + e.comments as f64 * self.comments_weight
    }
}

pub struct FeaturedStories {
    store: Arc<dyn ContentStore>,
    scorer: Arc<dyn Scorer>,
    threshold: f64,
}

impl FeaturedStories {
    pub fn new(store: Arc<dyn ContentStore>, scorer: Arc<dyn Scorer>, threshold: f64) -> Self {
        Self {
            store,
            scorer,
            threshold,
        }
    }
}

impl CandidateSource<Story> for FeaturedStories {
    fn fetch_after(&self, after_key: i64, limit: usize) -> Result<Vec<Story>> {
        self.store.all_stories_after(after_key, limit)
    }
}

impl ItemProcessor<Story> for FeaturedStories {
    fn process(&self, story: &Story) -> Result<ItemOutcome> {
        let score = self.scorer.score(story);
        // Unpublished stories are never featured.
        let featured = story.published && score >= self.threshold;
        if featured == story.featured {
            return Ok(ItemOutcome::Unchanged);
        }
        if self.store.set_story_featured(story.id, featured)? {
            debug!(
                "Story {} featured={} (score {:.2}, threshold {:.2})",
                story.id, featured, score, self.threshold
            );
            Ok(ItemOutcome::Transitioned)
        } else {
            Ok(ItemOutcome::Unchanged)
        }
    }
}

pub fn build(
    settings: &FeaturedStoriesSettings,
    store: Arc<dyn ContentStore>,
    scorer: Arc<dyn Scorer>,
    ctx: JobContext,
) -> ResumableJob<Story> {
    let job = Arc::new(FeaturedStories::new(store, scorer, settings.threshold));
    ResumableJob::new(
        JOB_ID,
        settings.job.scan_settings(),
        job.clone(),
        job,
        ctx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{AccountRole, Engagement, NewStory, SqliteContentStore};

    fn story_with(store: &SqliteContentStore, author: i64, likes: u64) -> i64 {
        let mut story = NewStory::published(author, "s");
        story.engagement = Engagement {
            views: 0,
            likes,
            comments: 0,
        };
        store.insert_story(&story).unwrap()
    }

    #[test]
    fn test_default_scorer_weights() {
        let scorer = WeightedEngagementScorer::default();
        let mut story = Story {
            id: 1,
            author_id: 1,
            title: "s".to_string(),
            status: crate::content::StoryStatus::Ongoing,
            published: true,
            last_chapter_at: None,
            engagement: Engagement {
                views: 1000,
                likes: 5,
                comments: 2,
            },
            featured: false,
        };
        assert!((scorer.score(&story) - 19.0).abs() < 1e-9);
        story.engagement = Engagement::default();
        assert_eq!(scorer.score(&story), 0.0);
    }

    #[test]
    fn test_flag_only_written_on_change() {
        let store = Arc::new(SqliteContentStore::in_memory().unwrap());
        let author = store.insert_account("a", None, AccountRole::Author).unwrap();
        let popular = story_with(&store, author, 80);
        let quiet = story_with(&store, author, 3);

        let job = FeaturedStories::new(
            store.clone(),
            Arc::new(WeightedEngagementScorer::default()),
            50.0,
        );

        let first: Vec<ItemOutcome> = job
            .fetch_after(0, 10)
            .unwrap()
            .iter()
            .map(|s| job.process(s).unwrap())
            .collect();
        assert_eq!(first, vec![ItemOutcome::Transitioned, ItemOutcome::Unchanged]);
        assert!(store.story(popular).unwrap().unwrap().featured);
        assert!(!store.story(quiet).unwrap().unwrap().featured);

        let second: Vec<ItemOutcome> = job
            .fetch_after(0, 10)
            .unwrap()
            .iter()
            .map(|s| job.process(s).unwrap())
            .collect();
        assert_eq!(second, vec![ItemOutcome::Unchanged, ItemOutcome::Unchanged]);
    }

    #[test]
    fn test_unfeatures_when_score_drops() {
        struct Fixed(f64);
        impl Scorer for Fixed {
            fn score(&self, _story: &Story) -> f64 {
                self.0
            }
        }

        let store = Arc::new(SqliteContentStore::in_memory().unwrap());
        let author = store.insert_account("a", None, AccountRole::Author).unwrap();
        let id = story_with(&store, author, 0);
        store.set_story_featured(id, true).unwrap();

        let job = FeaturedStories::new(store.clone(), Arc::new(Fixed(1.0)), 10.0);
        let story = store.story(id).unwrap().unwrap();

        assert_eq!(job.process(&story).unwrap(), ItemOutcome::Transitioned);
        assert!(!store.story(id).unwrap().unwrap().featured);
    }

    #[test]
    fn test_unpublished_story_loses_featured_flag() {
        let store = Arc::new(SqliteContentStore::in_memory().unwrap());
        let author = store.insert_account("a", None, AccountRole::Author).unwrap();
        let mut withdrawn = NewStory::published(author, "withdrawn");
        withdrawn.published = false;
        withdrawn.engagement = Engagement {
            views: 0,
            likes: 500,
            comments: 0,
        };
        let id = store.insert_story(&withdrawn).unwrap();
        store.set_story_featured(id, true).unwrap();

        let job = FeaturedStories::new(
            store.clone(),
            Arc::new(WeightedEngagementScorer::default()),
            50.0,
        );
        let candidates = job.fetch_after(0, 10).unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(job.process(&candidates[0]).unwrap(), ItemOutcome::Transitioned);
        assert!(!store.story(id).unwrap().unwrap().featured);
    }
}
