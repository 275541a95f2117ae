//! Minimal content store queried by the reference jobs.

mod models;
mod schema;
mod sqlite_content_store;

pub use models::*;
pub use schema::CONTENT_VERSIONED_SCHEMAS;
pub use sqlite_content_store::SqliteContentStore;

use anyhow::Result;

pub trait ContentStore: Send + Sync {
    // Candidate queries, keyset-paginated by id
    fn authors_after(&self, after_id: i64, limit: usize) -> Result<Vec<Account>>;
    /// Published stories with id > `after_id`, optionally restricted to one status.
    fn stories_after(
        &self,
        after_id: i64,
        limit: usize,
        status: Option<StoryStatus>,
    ) -> Result<Vec<Story>>;
    /// Every story with id > `after_id`, drafts and unpublished ones included.
    fn all_stories_after(&self, after_id: i64, limit: usize) -> Result<Vec<Story>>;

    fn account(&self, id: i64) -> Result<Option<Account>>;
    fn story(&self, id: i64) -> Result<Option<Story>>;
    fn published_story_count(&self, author_id: i64) -> Result<usize>;

    // Setters return true only when a row actually changed.
    fn set_account_role(&self, id: i64, role: AccountRole) -> Result<bool>;
    fn set_story_status(&self, id: i64, status: StoryStatus) -> Result<bool>;
    fn set_story_featured(&self, id: i64, featured: bool) -> Result<bool>;

    // Recipient lookups; accounts without an email are left out
    fn author_followers(&self, author_id: i64) -> Result<Vec<String>>;
    fn story_subscribers(&self, story_id: i64) -> Result<Vec<String>>;
}
