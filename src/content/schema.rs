//! SQLite schema for the content database.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};

const ACCOUNTS_TABLE_V1: Table = Table {
    name: "accounts",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("handle", &SqlType::Text, non_null = true),
        sqlite_column!("email", &SqlType::Text),
        sqlite_column!("role", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_accounts_role", "role, id")],
};

/// `last_chapter_at` is unix seconds.
const STORIES_TABLE_V1: Table = Table {
    name: "stories",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("author_id", &SqlType::Integer, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "published",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("last_chapter_at", &SqlType::Integer),
        sqlite_column!(
            "views",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "likes",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "comments",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "featured",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[
        ("idx_stories_author", "author_id"),
        ("idx_stories_status", "status, id"),
    ],
};

const FOLLOWS_TABLE_V1: Table = Table {
    name: "follows",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("follower_id", &SqlType::Integer, non_null = true),
        sqlite_column!("author_id", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_follows_author", "author_id")],
};

const SUBSCRIPTIONS_TABLE_V1: Table = Table {
    name: "subscriptions",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("account_id", &SqlType::Integer, non_null = true),
        sqlite_column!("story_id", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_subscriptions_story", "story_id")],
};

pub const CONTENT_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        ACCOUNTS_TABLE_V1,
        STORIES_TABLE_V1,
        FOLLOWS_TABLE_V1,
        SUBSCRIPTIONS_TABLE_V1,
    ],
    migration: None,
}];
