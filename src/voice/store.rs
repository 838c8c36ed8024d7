//! VoiceStore: persistence for edits, profiles, snapshots, archetypes and the
//! learning queue's dead letters.

use super::ledger::LearningLedger;
use super::types::{
    Archetype, EditRecord, EditStatus, LearningJob, ProfileVersionSnapshot, StyleProfile,
    StyleTemplate,
};
use crate::db::Db;
use crate::error::{Error, Result};

use chrono::{DateTime, Utc};
use sqlx::{Row as _, Sqlite, SqlitePool, Transaction};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Edit to persist; id and timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewEdit {
    pub user_id: String,
    pub content_id: String,
    pub position: Option<u32>,
    pub original_text: String,
    pub edited_text: String,
}

/// A profile write guarded by optimistic versioning.
#[derive(Debug, Clone)]
pub struct ProfileWrite<'a> {
    /// The new profile. Its `version` must already be bumped.
    pub profile: &'a StyleProfile,
    pub ledger: &'a LearningLedger,
    /// Version the caller loaded, or `None` when creating the profile.
    pub expected_version: Option<i64>,
    /// Pending edits this write consumes; all must still be pending.
    pub learned_edit_ids: &'a [String],
    /// Why this version exists, recorded on the snapshot.
    pub reason: &'a str,
    pub max_versions: u32,
}

/// Dead-lettered learning job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub id: String,
    pub user_id: String,
    pub edit_ids: Vec<String>,
    pub attempts: u32,
    pub last_error: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct EditRow {
    id: String,
    user_id: String,
    content_id: String,
    position: Option<i64>,
    original_text: String,
    edited_text: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl EditRow {
    fn into_record(self) -> (EditRecord, EditStatus) {
        let status = match self.status.as_str() {
            "learned" => EditStatus::Learned,
            "discarded" => EditStatus::Discarded,
            _ => EditStatus::Pending,
        };
        let record = EditRecord {
            id: self.id,
            user_id: self.user_id,
            content_id: self.content_id,
            position: self.position.and_then(|p| u32::try_from(p).ok()),
            original_text: self.original_text,
            edited_text: self.edited_text,
            created_at: self.created_at,
        };
        (record, status)
    }
}

/// Wraps the SQLite pool holding every voice table.
pub struct VoiceStore {
    pool: SqlitePool,
}

impl VoiceStore {
    /// Connect to (or create) the database at `path`.
    pub async fn connect(path: &Path) -> Result<Arc<Self>> {
        let db = Db::connect(path).await?;
        Ok(Arc::new(Self { pool: db.sqlite }))
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // -----------------------------------------------------------------------
    // Edits
    // -----------------------------------------------------------------------

    /// Persist edits in one transaction and prune each affected user's oldest
    /// records beyond `max_per_user`.
    pub async fn insert_edits(&self, edits: &[NewEdit], max_per_user: u32) -> Result<Vec<EditRecord>> {
        let mut tx = self.pool.begin().await?;
        let mut records = Vec::with_capacity(edits.len());

        for edit in edits {
            let (seq,): (i64,) = sqlx::query_as(
                "INSERT INTO user_counters (user_id, edit_count, edit_seq) VALUES (?, 1, 1) \
                 ON CONFLICT(user_id) DO UPDATE SET \
                     edit_count = edit_count + 1, \
                     edit_seq = edit_seq + 1 \
                 RETURNING edit_seq",
            )
            .bind(&edit.user_id)
            .fetch_one(&mut *tx)
            .await?;

            let record = EditRecord {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: edit.user_id.clone(),
                content_id: edit.content_id.clone(),
                position: edit.position,
                original_text: edit.original_text.clone(),
                edited_text: edit.edited_text.clone(),
                created_at: Utc::now(),
            };
            sqlx::query(
                "INSERT INTO edit_records \
                 (id, seq, user_id, content_id, position, original_text, edited_text, status, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
            )
            .bind(&record.id)
            .bind(seq)
            .bind(&record.user_id)
            .bind(&record.content_id)
            .bind(record.position.map(i64::from))
            .bind(&record.original_text)
            .bind(&record.edited_text)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
            records.push(record);
        }

        let mut users: Vec<&str> = edits.iter().map(|edit| edit.user_id.as_str()).collect();
        users.sort_unstable();
        users.dedup();
        for user_id in users {
            let pruned = sqlx::query(
                "DELETE FROM edit_records WHERE user_id = ?1 AND id NOT IN ( \
                     SELECT id FROM edit_records WHERE user_id = ?1 ORDER BY seq DESC LIMIT ?2 \
                 )",
            )
            .bind(user_id)
            .bind(i64::from(max_per_user))
            .execute(&mut *tx)
            .await?;
            if pruned.rows_affected() > 0 {
                tracing::debug!(user_id, pruned = pruned.rows_affected(), "pruned oldest edit records");
            }
        }

        tx.commit().await?;
        Ok(records)
    }

    /// Load the given edits for one user in submission order, with status.
    /// Ids that no longer exist (pruned) are skipped.
    pub async fn edits_by_ids(
        &self,
        user_id: &str,
        edit_ids: &[String],
    ) -> Result<Vec<(EditRecord, EditStatus)>> {
        if edit_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; edit_ids.len()].join(", ");
        let query_str = format!(
            "SELECT id, user_id, content_id, position, original_text, edited_text, status, created_at \
             FROM edit_records WHERE user_id = ? AND id IN ({placeholders}) ORDER BY seq ASC"
        );
        let mut query = sqlx::query_as::<_, EditRow>(&query_str).bind(user_id);
        for id in edit_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(EditRow::into_record).collect())
    }

    /// Most recent edits for a user, newest first.
    pub async fn recent_edits(&self, user_id: &str, limit: u32) -> Result<Vec<EditRecord>> {
        let rows = sqlx::query_as::<_, EditRow>(
            "SELECT id, user_id, content_id, position, original_text, edited_text, status, created_at \
             FROM edit_records WHERE user_id = ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.into_record().0).collect())
    }

    /// Number of edit records currently retained for a user.
    pub async fn stored_edit_count(&self, user_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM edit_records WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Lifetime number of edits submitted by a user (unaffected by pruning).
    pub async fn edit_count(&self, user_id: &str) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT edit_count FROM user_counters WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(count,)| count).unwrap_or(0))
    }

    /// All pending edits grouped into one job per user, in submission order.
    pub async fn pending_jobs(&self) -> Result<Vec<LearningJob>> {
        let rows = sqlx::query(
            "SELECT user_id, id FROM edit_records WHERE status = 'pending' ORDER BY user_id, seq",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in rows {
            let user_id: String = row.try_get("user_id")?;
            let id: String = row.try_get("id")?;
            grouped.entry(user_id).or_default().push(id);
        }
        Ok(grouped
            .into_iter()
            .map(|(user_id, edit_ids)| LearningJob { user_id, edit_ids })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Profiles
    // -----------------------------------------------------------------------

    /// Load the profile and its private ledger.
    pub async fn load_profile(&self, user_id: &str) -> Result<Option<(StyleProfile, LearningLedger)>> {
        let row = sqlx::query("SELECT version, document, ledger FROM style_profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let version: i64 = row.try_get("version")?;
        let document: String = row.try_get("document")?;
        let ledger: String = row.try_get("ledger")?;
        let mut profile: StyleProfile = serde_json::from_str(&document)?;
        profile.version = version;
        Ok(Some((profile, serde_json::from_str(&ledger)?)))
    }

    /// Write a profile version atomically: the profile row (guarded by
    /// `expected_version`), the consumed edits, the snapshot, and snapshot
    /// pruning all commit together or not at all.
    pub async fn save_profile(&self, write: ProfileWrite<'_>) -> Result<()> {
        let profile = write.profile;
        let document = serde_json::to_string(profile)?;
        let ledger = serde_json::to_string(write.ledger)?;
        let mut tx = self.pool.begin().await?;

        let affected = match write.expected_version {
            Some(expected) => sqlx::query(
                "UPDATE style_profiles SET version = ?, document = ?, ledger = ?, updated_at = ? \
                 WHERE user_id = ? AND version = ?",
            )
            .bind(profile.version)
            .bind(&document)
            .bind(&ledger)
            .bind(profile.last_updated)
            .bind(&profile.user_id)
            .bind(expected)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            None => sqlx::query(
                "INSERT INTO style_profiles (user_id, version, document, ledger, updated_at) \
                 VALUES (?, ?, ?, ?, ?) ON CONFLICT(user_id) DO NOTHING",
            )
            .bind(&profile.user_id)
            .bind(profile.version)
            .bind(&document)
            .bind(&ledger)
            .bind(profile.last_updated)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
        };
        if affected != 1 {
            return Err(conflict(profile, write.expected_version));
        }

        if !write.learned_edit_ids.is_empty() {
            let consumed = mark_learned(&mut tx, &profile.user_id, write.learned_edit_ids).await?;
            if consumed != write.learned_edit_ids.len() as u64 {
                // Another writer already consumed some of these edits.
                return Err(conflict(profile, write.expected_version));
            }
        }

        insert_snapshot(&mut tx, profile, &document, write.reason).await?;
        sqlx::query(
            "DELETE FROM profile_versions WHERE user_id = ?1 AND id NOT IN ( \
                 SELECT id FROM profile_versions WHERE user_id = ?1 ORDER BY version DESC LIMIT ?2 \
             )",
        )
        .bind(&profile.user_id)
        .bind(i64::from(write.max_versions.max(1)))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Mark every pending edit of a user as discarded. Returns the ids that
    /// were discarded.
    pub async fn discard_pending_edits(&self, user_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "UPDATE edit_records SET status = 'discarded' \
             WHERE user_id = ? AND status = 'pending' RETURNING id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Snapshots for a user, oldest first.
    pub async fn list_snapshots(&self, user_id: &str) -> Result<Vec<ProfileVersionSnapshot>> {
        let rows = sqlx::query(
            "SELECT id, user_id, version, document, reason, created_at FROM profile_versions \
             WHERE user_id = ? ORDER BY version ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    pub async fn get_snapshot(&self, user_id: &str, version: i64) -> Result<Option<ProfileVersionSnapshot>> {
        let row = sqlx::query(
            "SELECT id, user_id, version, document, reason, created_at FROM profile_versions \
             WHERE user_id = ? AND version = ?",
        )
        .bind(user_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    // -----------------------------------------------------------------------
    // Archetypes
    // -----------------------------------------------------------------------

    /// Insert an archetype unless one with the same id exists.
    pub async fn insert_archetype_if_missing(&self, archetype: &Archetype) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO archetypes (id, name, description, category, defaults, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&archetype.id)
        .bind(&archetype.name)
        .bind(&archetype.description)
        .bind(&archetype.category)
        .bind(serde_json::to_string(&archetype.defaults)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_archetypes(&self) -> Result<Vec<Archetype>> {
        let rows = sqlx::query(
            "SELECT id, name, description, category, defaults FROM archetypes ORDER BY category, name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(archetype_from_row).collect()
    }

    pub async fn get_archetype(&self, id: &str) -> Result<Option<Archetype>> {
        let row = sqlx::query("SELECT id, name, description, category, defaults FROM archetypes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(archetype_from_row).transpose()
    }

    // -----------------------------------------------------------------------
    // Dead letters and audit trail
    // -----------------------------------------------------------------------

    pub async fn dead_letter(&self, job: &LearningJob, attempts: u32, last_error: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO learning_dead_letters (id, user_id, edit_ids, attempts, last_error, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&job.user_id)
        .bind(serde_json::to_string(&job.edit_ids)?)
        .bind(i64::from(attempts))
        .bind(last_error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Dead letters not yet replayed, oldest first.
    pub async fn open_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query(
            "SELECT id, user_id, edit_ids, attempts, last_error, created_at FROM learning_dead_letters \
             WHERE replayed_at IS NULL ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let edit_ids: String = row.try_get("edit_ids")?;
                let attempts: i64 = row.try_get("attempts")?;
                Ok(DeadLetter {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    edit_ids: serde_json::from_str(&edit_ids)?,
                    attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
                    last_error: row.try_get("last_error")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn mark_dead_letter_replayed(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE learning_dead_letters SET replayed_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append to the learning audit trail.
    pub async fn log_event(
        &self,
        user_id: &str,
        event_type: &str,
        summary: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO learning_events (id, user_id, event_type, summary, details, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(event_type)
        .bind(summary)
        .bind(details.map(|d| d.to_string()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl std::fmt::Debug for VoiceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceStore").finish_non_exhaustive()
    }
}

fn conflict(profile: &StyleProfile, expected_version: Option<i64>) -> Error {
    Error::Conflict {
        user_id: profile.user_id.clone(),
        expected_version: expected_version.unwrap_or(0),
    }
}

async fn mark_learned(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    edit_ids: &[String],
) -> Result<u64> {
    let placeholders = vec!["?"; edit_ids.len()].join(", ");
    let query_str = format!(
        "UPDATE edit_records SET status = 'learned' \
         WHERE user_id = ? AND status = 'pending' AND id IN ({placeholders})"
    );
    let mut query = sqlx::query(&query_str).bind(user_id);
    for id in edit_ids {
        query = query.bind(id);
    }
    Ok(query.execute(&mut **tx).await?.rows_affected())
}

async fn insert_snapshot(
    tx: &mut Transaction<'_, Sqlite>,
    profile: &StyleProfile,
    document: &str,
    reason: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO profile_versions (id, user_id, version, document, reason, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&profile.user_id)
    .bind(profile.version)
    .bind(document)
    .bind(reason)
    .bind(profile.last_updated)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn snapshot_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ProfileVersionSnapshot> {
    let document: String = row.try_get("document")?;
    let version: i64 = row.try_get("version")?;
    let mut profile: StyleProfile = serde_json::from_str(&document)?;
    profile.version = version;
    Ok(ProfileVersionSnapshot {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        version,
        reason: row.try_get("reason")?,
        profile,
        created_at: row.try_get("created_at")?,
    })
}

fn archetype_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Archetype> {
    let defaults: String = row.try_get("defaults")?;
    Ok(Archetype {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        defaults: serde_json::from_str::<StyleTemplate>(&defaults)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn setup() -> (Arc<VoiceStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = VoiceStore::connect(&dir.path().join("voiceprint.db"))
            .await
            .unwrap();
        (store, dir)
    }

    pub(crate) fn new_edit(user_id: &str, original: &str, edited: &str) -> NewEdit {
        NewEdit {
            user_id: user_id.into(),
            content_id: "post-1".into(),
            position: None,
            original_text: original.into(),
            edited_text: edited.into(),
        }
    }

    #[tokio::test]
    async fn edits_beyond_cap_are_pruned_oldest_first() {
        let (store, _dir) = setup().await;
        for index in 0..7 {
            store
                .insert_edits(&[new_edit("u1", "draft", &format!("edit {index}"))], 5)
                .await
                .unwrap();
        }
        // Another user's edits are unaffected by u1's cap.
        store.insert_edits(&[new_edit("u2", "a", "b")], 5).await.unwrap();

        assert_eq!(store.stored_edit_count("u1").await.unwrap(), 5);
        assert_eq!(store.edit_count("u1").await.unwrap(), 7);
        let recent = store.recent_edits("u1", 10).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|e| e.edited_text.as_str()).collect();
        assert_eq!(texts, vec!["edit 6", "edit 5", "edit 4", "edit 3", "edit 2"]);
        assert_eq!(store.stored_edit_count("u2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn optimistic_write_rejects_stale_version() {
        let (store, _dir) = setup().await;
        let ledger = LearningLedger::default();
        let mut profile = StyleProfile::new_default("u1");
        profile.version = 1;
        store
            .save_profile(ProfileWrite {
                profile: &profile,
                ledger: &ledger,
                expected_version: None,
                learned_edit_ids: &[],
                reason: "created",
                max_versions: 10,
            })
            .await
            .unwrap();

        let mut next = profile.clone();
        next.version = 2;
        let write = ProfileWrite {
            profile: &next,
            ledger: &ledger,
            expected_version: Some(1),
            learned_edit_ids: &[],
            reason: "manual",
            max_versions: 10,
        };
        store.save_profile(write.clone()).await.unwrap();

        // Replaying the same write now targets a stale version.
        let error = store.save_profile(write).await.unwrap_err();
        assert!(error.is_conflict());

        let (loaded, _) = store.load_profile("u1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(store.list_snapshots("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn consuming_an_already_learned_edit_rolls_back() {
        let (store, _dir) = setup().await;
        let records = store
            .insert_edits(&[new_edit("u1", "draft one", "edit one")], 10)
            .await
            .unwrap();
        let ids = vec![records[0].id.clone()];
        let ledger = LearningLedger::default();

        let mut profile = StyleProfile::new_default("u1");
        profile.version = 1;
        store
            .save_profile(ProfileWrite {
                profile: &profile,
                ledger: &ledger,
                expected_version: None,
                learned_edit_ids: &ids,
                reason: "learning",
                max_versions: 10,
            })
            .await
            .unwrap();

        let mut again = profile.clone();
        again.version = 2;
        let error = store
            .save_profile(ProfileWrite {
                profile: &again,
                ledger: &ledger,
                expected_version: Some(1),
                learned_edit_ids: &ids,
                reason: "learning",
                max_versions: 10,
            })
            .await
            .unwrap_err();
        assert!(error.is_conflict());

        // The whole transaction rolled back: still version 1, one snapshot.
        let (loaded, _) = store.load_profile("u1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(store.list_snapshots("u1").await.unwrap().len(), 1);
        let statuses = store.edits_by_ids("u1", &ids).await.unwrap();
        assert_eq!(statuses[0].1, EditStatus::Learned);
    }

    #[tokio::test]
    async fn snapshots_are_capped_oldest_dropped() {
        let (store, _dir) = setup().await;
        let ledger = LearningLedger::default();
        let mut profile = StyleProfile::new_default("u1");
        for version in 1..=6 {
            profile.version = version;
            store
                .save_profile(ProfileWrite {
                    profile: &profile,
                    ledger: &ledger,
                    expected_version: (version > 1).then_some(version - 1),
                    learned_edit_ids: &[],
                    reason: "manual",
                    max_versions: 3,
                })
                .await
                .unwrap();
        }
        let versions: Vec<i64> = store
            .list_snapshots("u1")
            .await
            .unwrap()
            .iter()
            .map(|snapshot| snapshot.version)
            .collect();
        assert_eq!(versions, vec![4, 5, 6]);
        assert!(store.get_snapshot("u1", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_jobs_group_by_user_in_order() {
        let (store, _dir) = setup().await;
        let first = store.insert_edits(&[new_edit("u1", "a", "b")], 10).await.unwrap();
        let second = store.insert_edits(&[new_edit("u1", "c", "d")], 10).await.unwrap();
        store.insert_edits(&[new_edit("u2", "e", "f")], 10).await.unwrap();
        store.discard_pending_edits("u2").await.unwrap();

        let jobs = store.pending_jobs().await.unwrap();
        assert_eq!(
            jobs,
            vec![LearningJob {
                user_id: "u1".into(),
                edit_ids: vec![first[0].id.clone(), second[0].id.clone()],
            }]
        );
    }

    #[tokio::test]
    async fn dead_letters_can_be_listed_and_closed() {
        let (store, _dir) = setup().await;
        let job = LearningJob {
            user_id: "u1".into(),
            edit_ids: vec!["e1".into(), "e2".into()],
        };
        let id = store.dead_letter(&job, 5, "store unavailable").await.unwrap();

        let open = store.open_dead_letters().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].edit_ids, job.edit_ids);
        assert_eq!(open[0].attempts, 5);

        store.mark_dead_letter_replayed(&id).await.unwrap();
        assert!(store.open_dead_letters().await.unwrap().is_empty());
    }
}
