//! SQLite schema for the state database.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};

/// Key-value entries; `expires_at` is unix millis, NULL for no expiry.
const STATE_ENTRIES_TABLE_V1: Table = Table {
    name: "state_entries",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
        sqlite_column!("expires_at", &SqlType::Integer),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_state_entries_expires_at", "expires_at")],
};

pub const STATE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[STATE_ENTRIES_TABLE_V1],
    migration: None,
}];
