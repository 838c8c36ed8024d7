//! Edit ingestion: validate, persist, and hand off to the learning queue.
//!
//! The caller's save succeeds once the records are durably written. Learning
//! is fire-and-forget from here on.

use super::queue::LearningQueueHandle;
use super::store::{NewEdit, VoiceStore};
use super::types::{EditRecord, LearningJob, ThreadEdit};
use crate::error::{Error, Result};

use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct EditIngestor {
    store: Arc<VoiceStore>,
    queue: LearningQueueHandle,
    max_edits_per_user: u32,
    max_text_length: usize,
}

impl EditIngestor {
    pub fn new(
        store: Arc<VoiceStore>,
        queue: LearningQueueHandle,
        max_edits_per_user: u32,
        max_text_length: usize,
    ) -> Self {
        Self {
            store,
            queue,
            max_edits_per_user,
            max_text_length,
        }
    }

    /// Record one edited post.
    pub async fn submit_edit(
        &self,
        user_id: &str,
        content_id: &str,
        position: Option<u32>,
        original_text: &str,
        edited_text: &str,
    ) -> Result<EditRecord> {
        validate_ids(user_id, content_id)?;
        validate_length(original_text, edited_text, self.max_text_length)?;
        validate_edit(original_text, edited_text)?;

        let edit = NewEdit {
            user_id: user_id.to_string(),
            content_id: content_id.to_string(),
            position,
            original_text: original_text.to_string(),
            edited_text: edited_text.to_string(),
        };
        let mut records = self.persist_and_enqueue(user_id, &[edit]).await?;
        records
            .pop()
            .ok_or_else(|| Error::Other(anyhow::anyhow!("edit insert returned no record")))
    }

    /// Record a thread edit: one record per tweet whose text changed.
    ///
    /// An empty tweet rejects the whole thread. Unchanged tweets are skipped,
    /// and a thread with no changed tweet is rejected as a no-op.
    pub async fn submit_thread_edit(
        &self,
        user_id: &str,
        content_id: &str,
        tweets: &[ThreadEdit],
    ) -> Result<Vec<EditRecord>> {
        validate_ids(user_id, content_id)?;
        if tweets.is_empty() {
            return Err(Error::validation("thread edit contains no tweets"));
        }

        let mut positions = BTreeSet::new();
        let mut edits = Vec::new();
        for tweet in tweets {
            if !positions.insert(tweet.position) {
                return Err(Error::validation(format!(
                    "thread position {} appears more than once",
                    tweet.position
                )));
            }
            if tweet.edited_text.trim().is_empty() {
                return Err(Error::validation(format!(
                    "tweet {} cannot be empty",
                    tweet.position
                )));
            }
            validate_length(&tweet.original_text, &tweet.edited_text, self.max_text_length)?;
            if tweet.edited_text.trim() == tweet.original_text.trim() {
                continue;
            }
            edits.push(NewEdit {
                user_id: user_id.to_string(),
                content_id: content_id.to_string(),
                position: Some(tweet.position),
                original_text: tweet.original_text.clone(),
                edited_text: tweet.edited_text.clone(),
            });
        }

        if edits.is_empty() {
            return Err(Error::validation(
                "no tweet in the thread was changed; nothing to learn from",
            ));
        }
        self.persist_and_enqueue(user_id, &edits).await
    }

    async fn persist_and_enqueue(&self, user_id: &str, edits: &[NewEdit]) -> Result<Vec<EditRecord>> {
        let records = self.store.insert_edits(edits, self.max_edits_per_user).await?;
        self.queue.enqueue(LearningJob {
            user_id: user_id.to_string(),
            edit_ids: records.iter().map(|record| record.id.clone()).collect(),
        });
        tracing::debug!(user_id, edits = records.len(), "edits recorded");
        Ok(records)
    }
}

fn validate_ids(user_id: &str, content_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(Error::validation("user id is required"));
    }
    if content_id.trim().is_empty() {
        return Err(Error::validation("content id is required"));
    }
    Ok(())
}

/// Delta extraction is quadratic in word count, so oversized texts are
/// refused before they reach the store.
fn validate_length(original_text: &str, edited_text: &str, max_chars: usize) -> Result<()> {
    for (label, text) in [("draft", original_text), ("edited text", edited_text)] {
        let length = text.chars().count();
        if length > max_chars {
            return Err(Error::validation(format!(
                "{label} is {length} characters; the limit is {max_chars}"
            )));
        }
    }
    Ok(())
}

fn validate_edit(original_text: &str, edited_text: &str) -> Result<()> {
    if edited_text.trim().is_empty() {
        return Err(Error::validation("edited text cannot be empty"));
    }
    if edited_text.trim() == original_text.trim() {
        return Err(Error::validation(
            "edited text is identical to the draft; nothing to learn from",
        ));
    }
    Ok(())
}
