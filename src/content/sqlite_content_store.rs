use super::schema::CONTENT_VERSIONED_SCHEMAS;
use super::{Account, AccountRole, ContentStore, Engagement, NewStory, Story, StoryStatus};
use crate::sqlite_persistence;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const STORY_COLUMNS: &str =
    "id, author_id, title, status, published, last_chapter_at, views, likes, comments, featured";

pub struct SqliteContentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteContentStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn =
            sqlite_persistence::open_versioned(db_path, CONTENT_VERSIONED_SCHEMAS, "content")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = sqlite_persistence::open_in_memory(CONTENT_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("content store connection mutex poisoned"))
    }

    // Fixture helpers

    pub fn insert_account(&self, handle: &str, email: Option<&str>, role: AccountRole) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (handle, email, role) VALUES (?1, ?2, ?3)",
            params![handle, email, role.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_story(&self, story: &NewStory) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO stories (author_id, title, status, published, last_chapter_at, views, likes, comments)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                story.author_id,
                story.title,
                story.status.as_str(),
                story.published,
                story.last_chapter_at.map(|t| t.timestamp()),
                story.engagement.views as i64,
                story.engagement.likes as i64,
                story.engagement.comments as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_follow(&self, follower_id: i64, author_id: i64) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO follows (follower_id, author_id) VALUES (?1, ?2)",
            params![follower_id, author_id],
        )?;
        Ok(())
    }

    pub fn add_subscription(&self, account_id: i64, story_id: i64) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO subscriptions (account_id, story_id) VALUES (?1, ?2)",
            params![account_id, story_id],
        )?;
        Ok(())
    }
}

fn role_from_sql(value: String) -> rusqlite::Result<AccountRole> {
    AccountRole::parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown account role: {}", value).into(),
        )
    })
}

fn status_from_sql(value: String) -> rusqlite::Result<StoryStatus> {
    StoryStatus::parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown story status: {}", value).into(),
        )
    })
}

fn row_to_account(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        handle: row.get(1)?,
        email: row.get(2)?,
        role: role_from_sql(row.get(3)?)?,
    })
}

fn row_to_story(row: &Row) -> rusqlite::Result<Story> {
    let last_chapter_at: Option<i64> = row.get(5)?;
    Ok(Story {
        id: row.get(0)?,
        author_id: row.get(1)?,
        title: row.get(2)?,
        status: status_from_sql(row.get(3)?)?,
        published: row.get(4)?,
        last_chapter_at: last_chapter_at.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        engagement: Engagement {
            views: row.get::<_, i64>(6)?.max(0) as u64,
            likes: row.get::<_, i64>(7)?.max(0) as u64,
            comments: row.get::<_, i64>(8)?.max(0) as u64,
        },
        featured: row.get(9)?,
    })
}

impl ContentStore for SqliteContentStore {
    fn authors_after(&self, after_id: i64, limit: usize) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, handle, email, role FROM accounts
             WHERE role = 'author' AND id > ?1
             ORDER BY id ASC LIMIT ?2",
        )?;
        let accounts = stmt
            .query_map(params![after_id, limit as i64], row_to_account)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    fn stories_after(
        &self,
        after_id: i64,
        limit: usize,
        status: Option<StoryStatus>,
    ) -> Result<Vec<Story>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM stories
             WHERE published = 1 AND id > ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY id ASC LIMIT ?3",
            STORY_COLUMNS
        ))?;
        let stories = stmt
            .query_map(
                params![after_id, status.map(|s| s.as_str()), limit as i64],
                row_to_story,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stories)
    }

    fn all_stories_after(&self, after_id: i64, limit: usize) -> Result<Vec<Story>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM stories WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            STORY_COLUMNS
        ))?;
        let stories = stmt
            .query_map(params![after_id, limit as i64], row_to_story)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stories)
    }

    fn account(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                "SELECT id, handle, email, role FROM accounts WHERE id = ?1",
                params![id],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    fn story(&self, id: i64) -> Result<Option<Story>> {
        let conn = self.conn()?;
        let story = conn
            .query_row(
                &format!("SELECT {} FROM stories WHERE id = ?1", STORY_COLUMNS),
                params![id],
                row_to_story,
            )
            .optional()?;
        Ok(story)
    }

    fn published_story_count(&self, author_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM stories WHERE author_id = ?1 AND published = 1",
            params![author_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn set_account_role(&self, id: i64, role: AccountRole) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE accounts SET role = ?2 WHERE id = ?1 AND role != ?2",
            params![id, role.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn set_story_status(&self, id: i64, status: StoryStatus) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE stories SET status = ?2 WHERE id = ?1 AND status != ?2",
            params![id, status.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn set_story_featured(&self, id: i64, featured: bool) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE stories SET featured = ?2 WHERE id = ?1 AND featured != ?2",
            params![id, featured],
        )?;
        Ok(changed > 0)
    }

    fn author_followers(&self, author_id: i64) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.email FROM follows f
             JOIN accounts a ON a.id = f.follower_id
             WHERE f.author_id = ?1 AND a.email IS NOT NULL
             ORDER BY f.id ASC",
        )?;
        let emails = stmt
            .query_map(params![author_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(emails)
    }

    fn story_subscribers(&self, story_id: i64) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.email FROM subscriptions s
             JOIN accounts a ON a.id = s.account_id
             WHERE s.story_id = ?1 AND a.email IS NOT NULL
             ORDER BY s.id ASC",
        )?;
        let emails = stmt
            .query_map(params![story_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(emails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store() -> SqliteContentStore {
        SqliteContentStore::in_memory().unwrap()
    }

    #[test]
    fn test_authors_after_pages_by_id() {
        let store = store();
        let mut author_ids = Vec::new();
        for i in 0..5 {
            author_ids.push(
                store
                    .insert_account(&format!("author{}", i), None, AccountRole::Author)
                    .unwrap(),
            );
            store
                .insert_account(&format!("reader{}", i), None, AccountRole::Reader)
                .unwrap();
        }

        let first = store.authors_after(0, 3).unwrap();
        let ids: Vec<i64> = first.iter().map(|a| a.id).collect();
        assert_eq!(ids, author_ids[..3]);

        let rest = store.authors_after(ids[2], 3).unwrap();
        let ids: Vec<i64> = rest.iter().map(|a| a.id).collect();
        assert_eq!(ids, author_ids[3..]);

        assert!(store.authors_after(author_ids[4], 3).unwrap().is_empty());
    }

    #[test]
    fn test_stories_after_filters_status_and_unpublished() {
        let store = store();
        let author = store.insert_account("a", None, AccountRole::Author).unwrap();
        let ongoing = store.insert_story(&NewStory::published(author, "one")).unwrap();
        let mut completed = NewStory::published(author, "two");
        completed.status = StoryStatus::Completed;
        let completed = store.insert_story(&completed).unwrap();
        let mut draft = NewStory::published(author, "draft");
        draft.published = false;
        store.insert_story(&draft).unwrap();

        let all: Vec<i64> = store
            .stories_after(0, 10, None)
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(all, vec![ongoing, completed]);

        let only_ongoing: Vec<i64> = store
            .stories_after(0, 10, Some(StoryStatus::Ongoing))
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(only_ongoing, vec![ongoing]);

        let everything = store.all_stories_after(0, 10).unwrap();
        assert_eq!(everything.len(), 3);
        assert!(!everything[2].published);
    }

    #[test]
    fn test_story_round_trips_fields() {
        let store = store();
        let author = store.insert_account("a", None, AccountRole::Author).unwrap();
        let last_chapter = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut new_story = NewStory::published(author, "Title");
        new_story.last_chapter_at = Some(last_chapter);
        new_story.engagement = Engagement {
            views: 100,
            likes: 10,
            comments: 3,
        };
        let id = store.insert_story(&new_story).unwrap();

        let story = store.story(id).unwrap().unwrap();
        assert_eq!(story.title, "Title");
        assert_eq!(story.last_chapter_at, Some(last_chapter));
        assert_eq!(story.engagement.likes, 10);
        assert!(!story.featured);
        assert!(store.story(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_setters_report_changes_only() {
        let store = store();
        let author = store.insert_account("a", None, AccountRole::Author).unwrap();
        let story = store.insert_story(&NewStory::published(author, "s")).unwrap();

        assert!(store.set_account_role(author, AccountRole::Reader).unwrap());
        assert!(!store.set_account_role(author, AccountRole::Reader).unwrap());
        assert_eq!(
            store.account(author).unwrap().unwrap().role,
            AccountRole::Reader
        );

        assert!(store.set_story_status(story, StoryStatus::Hiatus).unwrap());
        assert!(!store.set_story_status(story, StoryStatus::Hiatus).unwrap());

        assert!(store.set_story_featured(story, true).unwrap());
        assert!(!store.set_story_featured(story, true).unwrap());
        assert!(store.set_story_featured(story, false).unwrap());

        assert!(!store.set_story_status(9999, StoryStatus::Hiatus).unwrap());
    }

    #[test]
    fn test_published_story_count() {
        let store = store();
        let author = store.insert_account("a", None, AccountRole::Author).unwrap();
        assert_eq!(store.published_story_count(author).unwrap(), 0);

        let mut draft = NewStory::published(author, "draft");
        draft.published = false;
        store.insert_story(&draft).unwrap();
        assert_eq!(store.published_story_count(author).unwrap(), 0);

        store.insert_story(&NewStory::published(author, "live")).unwrap();
        assert_eq!(store.published_story_count(author).unwrap(), 1);
    }

    #[test]
    fn test_recipient_lookups_skip_missing_email() {
        let store = store();
        let author = store.insert_account("a", None, AccountRole::Author).unwrap();
        let story = store.insert_story(&NewStory::published(author, "s")).unwrap();
        let alice = store
            .insert_account("alice", Some("alice@example.com"), AccountRole::Reader)
            .unwrap();
        let bob = store
            .insert_account("bob", Some("bob@example.com"), AccountRole::Reader)
            .unwrap();
        let ghost = store.insert_account("ghost", None, AccountRole::Reader).unwrap();

        store.add_follow(alice, author).unwrap();
        store.add_follow(ghost, author).unwrap();
        store.add_subscription(bob, story).unwrap();
        store.add_subscription(alice, story).unwrap();

        assert_eq!(
            store.author_followers(author).unwrap(),
            vec!["alice@example.com".to_string()]
        );
        assert_eq!(
            store.story_subscribers(story).unwrap(),
            vec!["bob@example.com".to_string(), "alice@example.com".to_string()]
        );
    }

    #[test]
    fn test_reopen_validates_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.db");
        {
            let store = SqliteContentStore::new(&path).unwrap();
            store.insert_account("a", None, AccountRole::Author).unwrap();
        }
        let store = SqliteContentStore::new(&path).unwrap();
        assert_eq!(store.authors_after(0, 10).unwrap().len(), 1);
    }
}
