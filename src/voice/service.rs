//! VoiceService: the operations exposed to the API layer.
//!
//! Every call is request/response. Learning always happens asynchronously in
//! the queue; nothing here waits for it.

use super::aggregator::ProfileAggregator;
use super::analytics::{self, BEFORE_AFTER_EXAMPLES, VoiceAnalytics};
use super::archetypes;
use super::cache::{EvolutionScore, ProfileCache};
use super::ingest::EditIngestor;
use super::ledger::LearningLedger;
use super::queue::{LearningQueue, LearningQueueHandle, QueueSettings};
use super::score;
use super::seed::{self, SeedAnalysis};
use super::store::{ProfileWrite, VoiceStore};
use super::types::{
    Archetype, EditRecord, ProfileSource, ProfileUpdate, ProfileVersionSnapshot, StyleProfile,
    ThreadEdit,
};
use crate::config::VoiceConfig;
use crate::error::{Error, Result};

use chrono::Utc;
use tokio::task::JoinHandle;

use std::sync::Arc;

pub struct VoiceService {
    store: Arc<VoiceStore>,
    cache: Arc<ProfileCache>,
    aggregator: Arc<ProfileAggregator>,
    ingestor: EditIngestor,
    queue: LearningQueueHandle,
    config: Arc<VoiceConfig>,
}

impl VoiceService {
    /// Install archetypes, spawn the learning queue and re-enqueue edits left
    /// pending by a previous run.
    pub async fn start(store: Arc<VoiceStore>, config: VoiceConfig) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let config = Arc::new(config);
        archetypes::install(&store).await?;

        let cache = ProfileCache::new(store.clone(), &config);
        let aggregator = Arc::new(ProfileAggregator::new(
            store.clone(),
            cache.clone(),
            config.clone(),
        ));
        let LearningQueue { handle, task } = LearningQueue::spawn(
            aggregator.clone(),
            store.clone(),
            QueueSettings::from_config(&config),
        );
        handle.recover(&store).await?;

        let service = Self {
            ingestor: EditIngestor::new(
                store.clone(),
                handle.clone(),
                config.max_edit_metadata_per_user,
                config.max_edit_text_length,
            ),
            store,
            cache,
            aggregator,
            queue: handle,
            config,
        };
        Ok((Arc::new(service), task))
    }

    pub fn aggregator(&self) -> &Arc<ProfileAggregator> {
        &self.aggregator
    }

    pub fn queue(&self) -> &LearningQueueHandle {
        &self.queue
    }

    // -----------------------------------------------------------------------
    // Edits
    // -----------------------------------------------------------------------

    pub async fn submit_edit(
        &self,
        user_id: &str,
        content_id: &str,
        position: Option<u32>,
        original_text: &str,
        edited_text: &str,
    ) -> Result<EditRecord> {
        self.ingestor
            .submit_edit(user_id, content_id, position, original_text, edited_text)
            .await
    }

    pub async fn submit_thread_edit(
        &self,
        user_id: &str,
        content_id: &str,
        tweets: &[ThreadEdit],
    ) -> Result<Vec<EditRecord>> {
        self.ingestor.submit_thread_edit(user_id, content_id, tweets).await
    }

    // -----------------------------------------------------------------------
    // Profile reads
    // -----------------------------------------------------------------------

    pub async fn get_profile(&self, user_id: &str) -> Result<StyleProfile> {
        require_user(user_id)?;
        self.cache
            .profile(user_id)
            .await?
            .map(|profile| profile.as_ref().clone())
            .ok_or_else(|| Error::NotFound(format!("voice profile for {user_id}")))
    }

    /// Score for polling. Users without a profile read as zero.
    pub async fn get_evolution_score(&self, user_id: &str) -> Result<EvolutionScore> {
        require_user(user_id)?;
        Ok(self.cache.score(user_id).await?.unwrap_or(EvolutionScore {
            evolution_score: 0,
            learning_iterations: 0,
            version: 0,
        }))
    }

    pub async fn get_analytics(&self, user_id: &str) -> Result<VoiceAnalytics> {
        let profile = self.get_profile(user_id).await?;
        let snapshots = self.store.list_snapshots(user_id).await?;
        let recent = self.store.recent_edits(user_id, BEFORE_AFTER_EXAMPLES).await?;
        let edit_count = self.store.edit_count(user_id).await?;
        Ok(analytics::derive(
            &profile,
            &snapshots,
            &recent,
            edit_count,
            self.config.pattern_threshold_major_change,
        ))
    }

    pub async fn profile_history(&self, user_id: &str) -> Result<Vec<ProfileVersionSnapshot>> {
        require_user(user_id)?;
        self.store.list_snapshots(user_id).await
    }

    // -----------------------------------------------------------------------
    // Profile writes outside the learning algorithm
    // -----------------------------------------------------------------------

    /// Manual edit from the UI. Bypasses learning and bumps `version`.
    pub async fn put_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<StyleProfile> {
        require_user(user_id)?;
        validate_update(&update, self.config.max_sample_posts)?;
        self.rewrite_profile(user_id, "manual", |profile, _| {
            update.clone().apply_to(profile);
            profile.profile_source = ProfileSource::Manual;
            Ok(())
        })
        .await
    }

    /// Start over: zero counters, empty phrase sets, drop pending learning.
    pub async fn reset_profile(&self, user_id: &str) -> Result<StyleProfile> {
        require_user(user_id)?;
        let discarded = self.store.discard_pending_edits(user_id).await?;
        let discarded_count = discarded.len();
        self.queue.discard(user_id, discarded);

        let profile = self
            .rewrite_profile(user_id, "reset", |profile, ledger| {
                *profile = StyleProfile::new_default(user_id);
                *ledger = LearningLedger::default();
                Ok(())
            })
            .await?;
        tracing::info!(
            user_id,
            discarded = discarded_count,
            version = profile.version,
            "profile reset"
        );
        Ok(profile)
    }

    /// Seed the profile from pasted writing samples.
    pub async fn analyze_text(&self, user_id: &str, text: &str) -> Result<StyleProfile> {
        require_user(user_id)?;
        let samples = seed::samples_from_text(text, self.config.min_text_sample_length)?;
        let analysis = seed::analyze_samples(&samples, self.config.max_sample_posts);
        self.apply_seed(user_id, analysis, samples.len(), ProfileSource::TextAnalysis, "text_analysis")
            .await
    }

    /// Seed the profile from an uploaded text file.
    pub async fn analyze_file(&self, user_id: &str, file_name: &str, contents: &str) -> Result<StyleProfile> {
        require_user(user_id)?;
        let samples = seed::samples_from_file(file_name, contents, self.config.min_file_sample_length)?;
        let analysis = seed::analyze_samples(&samples, self.config.max_sample_posts);
        self.apply_seed(user_id, analysis, samples.len(), ProfileSource::FileAnalysis, "file_analysis")
            .await
    }

    pub async fn list_archetypes(&self) -> Result<Arc<Vec<Archetype>>> {
        self.cache.archetypes().await
    }

    /// Adopt an archetype's style. Learning counters and phrases are kept.
    pub async fn apply_archetype(&self, user_id: &str, archetype_id: &str) -> Result<StyleProfile> {
        require_user(user_id)?;
        let cached = self.cache.archetypes().await?;
        let archetype = match cached.iter().find(|archetype| archetype.id == archetype_id) {
            Some(archetype) => archetype.clone(),
            None => self
                .store
                .get_archetype(archetype_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("archetype {archetype_id}")))?,
        };

        self.rewrite_profile(user_id, "archetype", |profile, _| {
            profile.adopt_style_of(&archetype.defaults);
            profile.archetype_base = Some(archetype.id.clone());
            profile.profile_source = ProfileSource::Archetype;
            Ok(())
        })
        .await
    }

    /// Restore the style captured in an earlier snapshot as a new version.
    /// Learning counters and the score stay where they are.
    pub async fn rollback_profile(&self, user_id: &str, version: i64) -> Result<StyleProfile> {
        require_user(user_id)?;
        let snapshot = self
            .store
            .get_snapshot(user_id, version)
            .await?
            .ok_or_else(|| Error::NotFound(format!("profile version {version} for {user_id}")))?;
        let restored = snapshot.profile;

        self.rewrite_profile(user_id, &format!("rollback:{version}"), |profile, _| {
            profile.voice_type = restored.voice_type;
            profile.tone = restored.tone;
            profile.writing_traits = restored.writing_traits.clone();
            profile.structure_preferences = restored.structure_preferences.clone();
            profile.vocabulary_level = restored.vocabulary_level;
            profile.common_phrases = restored.common_phrases.clone();
            profile.banned_phrases = restored.banned_phrases.clone();
            profile.sample_posts = restored.sample_posts.clone();
            profile.profile_source = restored.profile_source;
            profile.archetype_base = restored.archetype_base.clone();
            Ok(())
        })
        .await
    }

    /// Operator replay of dead-lettered learning jobs.
    pub async fn replay_dead_letters(&self) -> Result<usize> {
        self.queue.replay_dead_letters(&self.store).await
    }

    async fn apply_seed(
        &self,
        user_id: &str,
        analysis: SeedAnalysis,
        sample_count: usize,
        source: ProfileSource,
        reason: &str,
    ) -> Result<StyleProfile> {
        let seeded = score::seeded_score(sample_count, analysis.common_phrases.len());
        let max_sample_posts = self.config.max_sample_posts;
        self.rewrite_profile(user_id, reason, |profile, _| {
            profile.adopt_style_of(&analysis.template);
            profile.common_phrases.extend(analysis.common_phrases.iter().cloned());
            for phrase in &profile.common_phrases {
                profile.banned_phrases.remove(phrase);
            }
            profile.sample_posts = analysis.sample_posts.clone();
            profile.sample_posts.truncate(max_sample_posts);
            profile.profile_source = source;
            profile.evolution_score = profile.evolution_score.max(seeded);
            Ok(())
        })
        .await
    }

    /// Load, mutate and write the profile as a new version, retrying once if
    /// a concurrent writer got there first.
    async fn rewrite_profile<F>(&self, user_id: &str, reason: &str, mutate: F) -> Result<StyleProfile>
    where
        F: Fn(&mut StyleProfile, &mut LearningLedger) -> Result<()>,
    {
        let result = match self.try_rewrite(user_id, reason, &mutate).await {
            Err(error) if error.is_conflict() => {
                tracing::debug!(user_id, reason, "profile changed concurrently, retrying write");
                self.try_rewrite(user_id, reason, &mutate).await
            }
            other => other,
        };
        let profile = result?;

        self.cache.invalidate_user(user_id).await;
        let summary = format!("{reason} wrote version {}", profile.version);
        if let Err(error) = self.store.log_event(user_id, reason, &summary, None).await {
            tracing::warn!(%error, user_id, "failed to record profile event");
        }
        Ok(profile)
    }

    async fn try_rewrite<F>(&self, user_id: &str, reason: &str, mutate: &F) -> Result<StyleProfile>
    where
        F: Fn(&mut StyleProfile, &mut LearningLedger) -> Result<()>,
    {
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
        let next_version = expected_version.unwrap_or(0) + 1;

        mutate(&mut profile, &mut ledger)?;
        profile.user_id = user_id.to_string();
        profile.version = next_version;
        profile.last_updated = Utc::now();

        self.store
            .save_profile(ProfileWrite {
                profile: &profile,
                ledger: &ledger,
                expected_version,
                learned_edit_ids: &[],
                reason,
                max_versions: self.config.max_profile_versions,
            })
            .await?;
        Ok(profile)
    }
}

impl std::fmt::Debug for VoiceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceService").finish_non_exhaustive()
    }
}

fn require_user(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(Error::validation("user id is required"));
    }
    Ok(())
}

fn validate_update(update: &ProfileUpdate, max_sample_posts: usize) -> Result<()> {
    let phrase_sets = [&update.common_phrases, &update.banned_phrases];
    for phrases in phrase_sets.into_iter().flatten() {
        if phrases.iter().any(|phrase| phrase.trim().is_empty()) {
            return Err(Error::validation("phrases cannot be empty"));
        }
    }
    if let (Some(common), Some(banned)) = (&update.common_phrases, &update.banned_phrases)
        && let Some(phrase) = common.intersection(banned).next()
    {
        return Err(Error::validation(format!(
            "\"{phrase}\" cannot be both a common and a banned phrase"
        )));
    }
    if let Some(samples) = &update.sample_posts
        && samples.len() > max_sample_posts
    {
        return Err(Error::validation(format!(
            "at most {max_sample_posts} sample posts are kept"
        )));
    }
    if let Some(traits) = &update.writing_traits
        && !(traits.avg_sentence_length.is_finite() && traits.avg_sentence_length > 0.0)
    {
        return Err(Error::validation("average sentence length must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::store::tests::setup;
    use crate::voice::types::{LearningJob, VoiceType};

    use std::collections::BTreeSet;

    const DRAFT: &str = "Leverage synergies to unlock the full potential of our brand new \
        incremental parser, which we have been building for many months.";
    const EDIT: &str = "The new incremental parser is out. Months of work. Try it.";

    fn test_config() -> VoiceConfig {
        VoiceConfig {
            // Keep the background queue out of the way; tests drive the
            // aggregator directly.
            edit_batch_window_minutes: 60,
            ..VoiceConfig::default()
        }
    }

    async fn service() -> (Arc<VoiceService>, Arc<VoiceStore>, tempfile::TempDir) {
        let (store, dir) = setup().await;
        let (service, _task) = VoiceService::start(store.clone(), test_config()).await.unwrap();
        (service, store, dir)
    }

    async fn learn(service: &VoiceService, user_id: &str, ids: Vec<String>) {
        service
            .aggregator()
            .process_job(&LearningJob {
                user_id: user_id.into(),
                edit_ids: ids,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_user_has_no_profile_and_zero_score() {
        let (service, _store, _dir) = service().await;
        assert!(matches!(service.get_profile("u1").await, Err(Error::NotFound(_))));
        assert_eq!(service.get_evolution_score("u1").await.unwrap().evolution_score, 0);
    }

    #[tokio::test]
    async fn reset_zeroes_counters_and_rebuilds_from_scratch() {
        let (service, _store, _dir) = service().await;
        let record = service.submit_edit("u1", "post-1", None, DRAFT, EDIT).await.unwrap();
        learn(&service, "u1", vec![record.id]).await;
        let learned = service.get_profile("u1").await.unwrap();
        assert_eq!(learned.learning_iterations, 1);
        assert!(learned.evolution_score > 0);

        let reset = service.reset_profile("u1").await.unwrap();
        assert_eq!(reset.learning_iterations, 0);
        assert_eq!(reset.evolution_score, 0);
        assert!(reset.common_phrases.is_empty() && reset.banned_phrases.is_empty());
        assert_eq!(reset.version, learned.version + 1);
        assert_eq!(service.get_evolution_score("u1").await.unwrap().evolution_score, 0);

        let record = service.submit_edit("u1", "post-2", None, DRAFT, EDIT).await.unwrap();
        learn(&service, "u1", vec![record.id]).await;
        assert_eq!(service.get_profile("u1").await.unwrap().learning_iterations, 1);
    }

    #[tokio::test]
    async fn reset_short_circuits_pending_learning() {
        let (service, store, _dir) = service().await;
        let record = service.submit_edit("u1", "post-1", None, DRAFT, EDIT).await.unwrap();
        service.reset_profile("u1").await.unwrap();

        learn(&service, "u1", vec![record.id]).await;
        let (profile, _) = store.load_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.learning_iterations, 0);
    }

    #[tokio::test]
    async fn manual_edit_bumps_version_and_keeps_learning_counters() {
        let (service, _store, _dir) = service().await;
        let record = service.submit_edit("u1", "post-1", None, DRAFT, EDIT).await.unwrap();
        learn(&service, "u1", vec![record.id]).await;
        let before = service.get_profile("u1").await.unwrap();

        let updated = service
            .put_profile(
                "u1",
                ProfileUpdate {
                    voice_type: Some(VoiceType::Technical),
                    banned_phrases: Some(BTreeSet::from(["circle back".to_string()])),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, before.version + 1);
        assert_eq!(updated.learning_iterations, before.learning_iterations);
        assert_eq!(updated.evolution_score, before.evolution_score);
        assert_eq!(updated.profile_source, ProfileSource::Manual);
        // Reads see the write immediately.
        assert_eq!(service.get_profile("u1").await.unwrap().voice_type, VoiceType::Technical);
    }

    #[tokio::test]
    async fn contradictory_manual_edit_is_rejected() {
        let (service, _store, _dir) = service().await;
        let phrases = BTreeSet::from(["ship it".to_string()]);
        let result = service
            .put_profile(
                "u1",
                ProfileUpdate {
                    common_phrases: Some(phrases.clone()),
                    banned_phrases: Some(phrases),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn text_analysis_seeds_a_profile() {
        let (service, _store, _dir) = service().await;
        assert!(matches!(
            service.analyze_text("u1", "too short").await,
            Err(Error::Validation(_))
        ));

        let samples = "Shipped the sync engine rewrite today 🚀 Ship small, ship often.\n---\n\
            Ship small, ship often. That is the whole trick to keeping releases boring 🎉\n---\n\
            Why do big releases hurt? Ship small, ship often and they stop hurting.";
        let profile = service.analyze_text("u1", samples).await.unwrap();
        assert_eq!(profile.profile_source, ProfileSource::TextAnalysis);
        assert_eq!(profile.version, 1);
        assert_eq!(profile.sample_posts.len(), 3);
        assert!(profile.evolution_score > 0);
        assert!(profile.common_phrases.contains("Ship small"));
    }

    #[tokio::test]
    async fn archetype_application_overwrites_style_and_records_base() {
        let (service, _store, _dir) = service().await;
        assert_eq!(service.list_archetypes().await.unwrap().len(), archetypes::builtin().len());

        let profile = service.apply_archetype("u1", "deep-diver").await.unwrap();
        assert_eq!(profile.voice_type, VoiceType::Technical);
        assert_eq!(profile.archetype_base.as_deref(), Some("deep-diver"));
        assert_eq!(profile.profile_source, ProfileSource::Archetype);

        assert!(matches!(
            service.apply_archetype("u1", "nope").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rollback_restores_style_as_a_new_version() {
        let (service, _store, _dir) = service().await;
        service.apply_archetype("u1", "deep-diver").await.unwrap();
        service.apply_archetype("u1", "hype-engine").await.unwrap();

        let restored = service.rollback_profile("u1", 1).await.unwrap();
        assert_eq!(restored.version, 3);
        assert_eq!(restored.voice_type, VoiceType::Technical);

        let history = service.profile_history("u1").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].reason, "rollback:1");
        assert!(matches!(
            service.rollback_profile("u1", 42).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn analytics_compose_profile_history_and_edits() {
        let (service, _store, _dir) = service().await;
        let record = service.submit_edit("u1", "post-1", None, DRAFT, EDIT).await.unwrap();
        learn(&service, "u1", vec![record.id]).await;

        let analytics = service.get_analytics("u1").await.unwrap();
        assert_eq!(analytics.edit_count, 1);
        assert_eq!(analytics.learning_iterations, 1);
        assert_eq!(analytics.before_after_examples.len(), 1);
        assert_eq!(analytics.evolution_timeline[0].event, "Profile created");
        assert!(!analytics.suggestions.is_empty());
    }
}
