use crate::engine::Candidate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Reader,
    Author,
    Admin,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Reader => "reader",
            AccountRole::Author => "author",
            AccountRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reader" => Some(AccountRole::Reader),
            "author" => Some(AccountRole::Author),
            "admin" => Some(AccountRole::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Ongoing,
    Hiatus,
    Completed,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Ongoing => "ongoing",
            StoryStatus::Hiatus => "hiatus",
            StoryStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ongoing" => Some(StoryStatus::Ongoing),
            "hiatus" => Some(StoryStatus::Hiatus),
            "completed" => Some(StoryStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: i64,
    pub handle: String,
    pub email: Option<String>,
    pub role: AccountRole,
}

impl Candidate for Account {
    fn scan_key(&self) -> i64 {
        self.id
    }
}

/// Engagement counters used for featured scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Engagement {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Story {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub status: StoryStatus,
    pub published: bool,
    pub last_chapter_at: Option<DateTime<Utc>>,
    pub engagement: Engagement,
    pub featured: bool,
}

impl Candidate for Story {
    fn scan_key(&self) -> i64 {
        self.id
    }
}

/// Fixture input for [`super::SqliteContentStore::insert_story`].
#[derive(Debug, Clone)]
pub struct NewStory {
    pub author_id: i64,
    pub title: String,
    pub status: StoryStatus,
    pub published: bool,
    pub last_chapter_at: Option<DateTime<Utc>>,
    pub engagement: Engagement,
}

impl NewStory {
    pub fn published(author_id: i64, title: &str) -> Self {
        Self {
            author_id,
            title: title.to_string(),
            status: StoryStatus::Ongoing,
            published: true,
            last_chapter_at: None,
            engagement: Engagement::default(),
        }
    }
}
