//! Profile evolution: folds a batch of style deltas into the stored profile.
//!
//! Each category has its own merge step. Numeric fields move by a
//! confidence-weighted moving average, `new = old + w * (observed - old)`,
//! where `w` grows with the edit's magnitude and shrinks as the profile
//! matures. Boolean and categorical fields only change once the ledger has
//! seen the configured number of consistent observations.

use super::cache::ProfileCache;
use super::delta::{StructuralTrait, StyleDelta, extract_delta};
use super::ledger::LearningLedger;
use super::score;
use super::store::{ProfileWrite, VoiceStore};
use super::types::{
    EditRecord, EditStatus, LearningJob, ProfileSource, StyleProfile, Tone, WritingTraits,
    EMOJI_FREQUENCY_MAX,
};
use super::text::clamp_tone;
use crate::config::VoiceConfig;
use crate::error::Result;

use chrono::Utc;
use serde::Serialize;

use std::collections::BTreeSet;
use std::sync::Arc;

/// Learning rate for a minor edit on a brand-new profile.
const BASE_LEARNING_RATE: f64 = 0.3;
/// How quickly the learning rate decays per completed iteration.
const MATURITY_DECAY: f64 = 0.15;
const MIN_SENTENCE_LENGTH: f64 = 1.0;

/// Result of processing one learning job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The batch produced a new profile version.
    Applied(StyleProfile),
    /// Every edit in the job was already learned or discarded.
    Skipped,
}

/// What a merge changed beyond the moving averages. Logged with each iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    pub flipped_traits: Vec<String>,
    pub sentence_length: Option<f64>,
    pub vocabulary: Option<String>,
    pub common_phrases: Vec<String>,
    pub banned_phrases: Vec<String>,
}

impl MergeReport {
    fn summary(&self, edits: usize, profile: &StyleProfile) -> String {
        let mut parts = vec![format!(
            "iteration {} from {edits} edit(s), score {}",
            profile.learning_iterations, profile.evolution_score
        )];
        parts.extend(self.flipped_traits.iter().cloned());
        if !self.banned_phrases.is_empty() {
            parts.push(format!("banned {}", self.banned_phrases.join(", ")));
        }
        if !self.common_phrases.is_empty() {
            parts.push(format!("adopted {}", self.common_phrases.join(", ")));
        }
        parts.join("; ")
    }
}

pub struct ProfileAggregator {
    store: Arc<VoiceStore>,
    cache: Arc<ProfileCache>,
    config: Arc<VoiceConfig>,
}

impl ProfileAggregator {
    pub fn new(store: Arc<VoiceStore>, cache: Arc<ProfileCache>, config: Arc<VoiceConfig>) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Aggregate the still-pending edits of a job into one iteration.
    ///
    /// Safe to redeliver: edits are consumed in the same transaction as the
    /// profile write, so a second delivery finds nothing pending and skips.
    pub async fn process_job(&self, job: &LearningJob) -> Result<JobOutcome> {
        match self.try_process(job).await {
            Err(error) if error.is_conflict() => {
                tracing::debug!(user_id = %job.user_id, %error, "profile moved during aggregation, reloading");
                self.try_process(job).await
            }
            other => other,
        }
    }

    /// Fold already-extracted deltas into the user's profile as one
    /// iteration, creating a default profile on first contact.
    pub async fn apply_deltas(&self, user_id: &str, deltas: &[StyleDelta]) -> Result<StyleProfile> {
        match self.commit(user_id, deltas, &[], &[]).await {
            Err(error) if error.is_conflict() => {
                tracing::debug!(user_id, %error, "profile moved during aggregation, reloading");
                self.commit(user_id, deltas, &[], &[]).await
            }
            other => other,
        }
    }

    async fn try_process(&self, job: &LearningJob) -> Result<JobOutcome> {
        let pending: Vec<EditRecord> = self
            .store
            .edits_by_ids(&job.user_id, &job.edit_ids)
            .await?
            .into_iter()
            .filter(|(_, status)| *status == EditStatus::Pending)
            .map(|(record, _)| record)
            .collect();

        if pending.is_empty() {
            tracing::debug!(user_id = %job.user_id, edits = job.edit_ids.len(), "no pending edits left, skipping job");
            return Ok(JobOutcome::Skipped);
        }

        let threshold = self.config.pattern_threshold_major_change;
        let deltas: Vec<StyleDelta> = pending
            .iter()
            .map(|edit| extract_delta(&edit.original_text, &edit.edited_text, threshold))
            .collect();
        let edit_ids: Vec<String> = pending.iter().map(|edit| edit.id.clone()).collect();
        let samples: Vec<&str> = pending.iter().map(|edit| edit.edited_text.as_str()).collect();

        let profile = self.commit(&job.user_id, &deltas, &edit_ids, &samples).await?;
        Ok(JobOutcome::Applied(profile))
    }

    async fn commit(
        &self,
        user_id: &str,
        deltas: &[StyleDelta],
        edit_ids: &[String],
        samples: &[&str],
    ) -> Result<StyleProfile> {
        let (mut profile, mut ledger, expected_version) = match self.store.load_profile(user_id).await? {
            Some((profile, ledger)) => {
                let version = profile.version;
                (profile, ledger, Some(version))
            }
            None => (
                StyleProfile::new_default(user_id),
                LearningLedger::default(),
                None,
            ),
        };

        let report = merge_deltas(&mut profile, &mut ledger, deltas, &self.config);
        finish_iteration(&mut profile, &mut ledger, samples, self.config.max_sample_posts);

        self.store
            .save_profile(ProfileWrite {
                profile: &profile,
                ledger: &ledger,
                expected_version,
                learned_edit_ids: edit_ids,
                reason: "learning",
                max_versions: self.config.max_profile_versions,
            })
            .await?;
        self.cache.invalidate_user(user_id).await;

        tracing::info!(
            user_id,
            edits = deltas.len(),
            iterations = profile.learning_iterations,
            score = profile.evolution_score,
            version = profile.version,
            "profile evolved"
        );

        let summary = report.summary(deltas.len(), &profile);
        let details = serde_json::json!({
            "edit_ids": edit_ids,
            "version": profile.version,
            "report": report,
        });
        if let Err(error) = self
            .store
            .log_event(user_id, "learning_iteration", &summary, Some(&details))
            .await
        {
            tracing::warn!(%error, user_id, "failed to record learning event");
        }

        Ok(profile)
    }
}

impl std::fmt::Debug for ProfileAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileAggregator").finish_non_exhaustive()
    }
}

/// Fold every delta of a batch into `profile`, in submission order.
pub fn merge_deltas(
    profile: &mut StyleProfile,
    ledger: &mut LearningLedger,
    deltas: &[StyleDelta],
    config: &VoiceConfig,
) -> MergeReport {
    let mut report = MergeReport::default();
    for delta in deltas {
        let weight = learning_weight(delta, profile.learning_iterations);
        merge_tone(&mut profile.tone, delta, weight);
        merge_sentence_length(profile, ledger, delta, weight, config, &mut report);
        merge_traits(&mut profile.writing_traits, ledger, delta, weight, config, &mut report);
        merge_vocabulary(profile, ledger, delta, config, &mut report);
        merge_phrases(profile, ledger, delta, config, &mut report);
    }
    report
}

/// Bookkeeping every successful aggregation performs exactly once.
fn finish_iteration(
    profile: &mut StyleProfile,
    ledger: &mut LearningLedger,
    samples: &[&str],
    max_sample_posts: usize,
) {
    for sample in samples {
        profile.sample_posts.retain(|existing| existing != sample);
        profile.sample_posts.push(sample.to_string());
    }
    let excess = profile.sample_posts.len().saturating_sub(max_sample_posts);
    profile.sample_posts.drain(..excess);

    profile.learning_iterations += 1;
    profile.version += 1;
    profile.last_updated = Utc::now();
    if profile.profile_source == ProfileSource::Default {
        profile.profile_source = ProfileSource::Learned;
    }
    ledger.compact();
    profile.evolution_score = score::evolution_score(profile, ledger);
}

fn learning_weight(delta: &StyleDelta, iterations: u32) -> f64 {
    let weight = BASE_LEARNING_RATE * delta.magnitude_weight() / (1.0 + iterations as f64 * MATURITY_DECAY);
    weight.min(1.0)
}

fn moving_average(old: f64, observed: f64, weight: f64) -> f64 {
    old + weight * (observed - old)
}

fn merge_tone(tone: &mut Tone, delta: &StyleDelta, weight: f64) {
    let shift = &delta.tone_shift;
    // Observed tone is the current tone moved by the edit's shift.
    tone.formality = clamp_tone(tone.formality + weight * shift.formality);
    tone.enthusiasm = clamp_tone(tone.enthusiasm + weight * shift.enthusiasm);
    tone.directness = clamp_tone(tone.directness + weight * shift.directness);
    tone.humor = clamp_tone(tone.humor + weight * shift.humor);
    tone.emotionality = clamp_tone(tone.emotionality + weight * shift.emotionality);
}

fn merge_sentence_length(
    profile: &mut StyleProfile,
    ledger: &mut LearningLedger,
    delta: &StyleDelta,
    weight: f64,
    config: &VoiceConfig,
    report: &mut MergeReport,
) {
    let Some(signal) = delta.sentence_length else {
        return;
    };
    let current = profile.writing_traits.avg_sentence_length;
    if let Some(observed) = ledger.observe_sentence_length(
        current,
        signal.edited,
        config.pattern_threshold_sentence_length,
    ) {
        let updated = moving_average(current, observed, weight).max(MIN_SENTENCE_LENGTH);
        profile.writing_traits.avg_sentence_length = updated;
        ledger.confirm("sentence_length");
        report.sentence_length = Some(updated);
    }
}

fn merge_traits(
    traits: &mut WritingTraits,
    ledger: &mut LearningLedger,
    delta: &StyleDelta,
    weight: f64,
    config: &VoiceConfig,
    report: &mut MergeReport,
) {
    if let Some(frequency) = delta.emoji_frequency {
        traits.emoji_frequency =
            moving_average(traits.emoji_frequency, frequency, weight).clamp(0.0, EMOJI_FREQUENCY_MAX);
    }

    for (&trait_kind, &observed) in &delta.traits {
        let threshold = match trait_kind {
            StructuralTrait::Emojis => config.pattern_threshold_emoji,
            _ => config.pattern_threshold_structure,
        };
        if ledger.observe_trait(trait_kind, observed) < threshold.max(1) {
            continue;
        }
        ledger.confirm(trait_kind.label());
        let field = trait_field(traits, trait_kind);
        if *field != observed {
            *field = observed;
            let verb = if observed { "started using" } else { "stopped using" };
            report.flipped_traits.push(format!("{verb} {}", trait_kind.label()));
        }
        if trait_kind == StructuralTrait::Emojis && !observed {
            traits.emoji_frequency = 0.0;
        }
    }
}

fn trait_field(traits: &mut WritingTraits, trait_kind: StructuralTrait) -> &mut bool {
    match trait_kind {
        StructuralTrait::Emojis => &mut traits.uses_emojis,
        StructuralTrait::BulletPoints => &mut traits.uses_bullet_points,
        StructuralTrait::ShortParagraphs => &mut traits.uses_short_paragraphs,
        StructuralTrait::Hooks => &mut traits.uses_hooks,
        StructuralTrait::Questions => &mut traits.uses_questions_often,
    }
}

fn merge_vocabulary(
    profile: &mut StyleProfile,
    ledger: &mut LearningLedger,
    delta: &StyleDelta,
    config: &VoiceConfig,
    report: &mut MergeReport,
) {
    let Some(level) = delta.vocabulary else {
        return;
    };
    if ledger.observe_vocabulary(level) < config.pattern_threshold_structure.max(1) {
        return;
    }
    ledger.confirm("vocabulary");
    if profile.vocabulary_level != level {
        profile.vocabulary_level = level;
        report.vocabulary = Some(level.to_string());
    }
}

fn merge_phrases(
    profile: &mut StyleProfile,
    ledger: &mut LearningLedger,
    delta: &StyleDelta,
    config: &VoiceConfig,
    report: &mut MergeReport,
) {
    for (key, display) in &delta.phrases_removed {
        if let Some(promoted) =
            ledger.observe_removed_phrase(key, display, config.pattern_threshold_banned_phrase)
        {
            remove_phrase(&mut profile.common_phrases, &promoted.key);
            remove_phrase(&mut profile.banned_phrases, &promoted.key);
            profile.banned_phrases.insert(promoted.display.clone());
            report.banned_phrases.push(promoted.display);
        }
    }
    for (key, display) in &delta.phrases_added {
        if let Some(promoted) =
            ledger.observe_added_phrase(key, display, config.pattern_threshold_common_phrase)
        {
            remove_phrase(&mut profile.banned_phrases, &promoted.key);
            remove_phrase(&mut profile.common_phrases, &promoted.key);
            profile.common_phrases.insert(promoted.display.clone());
            report.common_phrases.push(promoted.display);
        }
    }
}

/// Remove every casing of `key` from a phrase set.
fn remove_phrase(phrases: &mut BTreeSet<String>, key: &str) {
    phrases.retain(|phrase| phrase.to_lowercase() != key);
}
