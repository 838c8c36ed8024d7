//! Database connection management and schema.

use crate::error::Result;

use anyhow::Context as _;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite pool for the voice profile store.
pub struct Db {
    pub sqlite: SqlitePool,
}

impl Db {
    /// Connect to (or create) the database file and apply the schema.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create data directory: {}", parent.display())
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .with_context(|| format!("invalid database path: {}", path.display()))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true)
            .create_if_missing(true);

        let sqlite = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to SQLite at {}", path.display()))?;

        sqlx::raw_sql(SCHEMA_V1)
            .execute(&sqlite)
            .await
            .context("failed to apply voice schema")?;

        Ok(Self { sqlite })
    }
}

/// Embedded schema. Every statement is `IF NOT EXISTS`, so re-running is safe.
const SCHEMA_V1: &str = r#"
-- One row per edited unit (a whole post or one thread tweet).
CREATE TABLE IF NOT EXISTS edit_records (
    id TEXT PRIMARY KEY,
    seq INTEGER NOT NULL,
    user_id TEXT NOT NULL,
    content_id TEXT NOT NULL,
    position INTEGER,
    original_text TEXT NOT NULL,
    edited_text TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_edit_records_user ON edit_records(user_id, seq);
CREATE INDEX IF NOT EXISTS idx_edit_records_status ON edit_records(status, user_id);

-- Lifetime counters (survive FIFO pruning of edit_records).
CREATE TABLE IF NOT EXISTS user_counters (
    user_id TEXT PRIMARY KEY,
    edit_count INTEGER NOT NULL DEFAULT 0,
    edit_seq INTEGER NOT NULL DEFAULT 0
);

-- Exactly one style profile per user. `document` is the public profile,
-- `ledger` the private threshold bookkeeping.
CREATE TABLE IF NOT EXISTS style_profiles (
    user_id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    document TEXT NOT NULL,
    ledger TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Immutable profile snapshots for the timeline and rollback.
CREATE TABLE IF NOT EXISTS profile_versions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    document TEXT NOT NULL,
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_profile_versions_user ON profile_versions(user_id, version);

-- Starter profiles.
CREATE TABLE IF NOT EXISTS archetypes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    category TEXT NOT NULL,
    defaults TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Learning jobs that exhausted their retries.
CREATE TABLE IF NOT EXISTS learning_dead_letters (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    edit_ids TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    last_error TEXT NOT NULL,
    created_at TEXT NOT NULL,
    replayed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_dead_letters_open ON learning_dead_letters(replayed_at, created_at);

-- Learning audit trail.
CREATE TABLE IF NOT EXISTS learning_events (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    summary TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_learning_events_user ON learning_events(user_id, created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_creates_schema_and_is_reentrant() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("voiceprint.db");

        let db = Db::connect(&path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('edit_records', 'style_profiles', 'profile_versions', 'archetypes', \
              'learning_dead_letters', 'learning_events', 'user_counters')",
        )
        .fetch_one(&db.sqlite)
        .await
        .unwrap();
        assert_eq!(count, 7);
        db.sqlite.close().await;

        // Second connect re-applies the schema without error.
        let db = Db::connect(&path).await.unwrap();
        db.sqlite.close().await;
    }
}
