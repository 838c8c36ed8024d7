//! Read-through caches in front of the voice store.
//!
//! Three independent moka caches with their own TTLs: profiles, evolution
//! scores and the archetype catalog. Writers invalidate instead of updating in
//! place. Concurrent misses on a key share one store read through
//! `try_get_with`. With caching disabled every read goes to the store.
//!
//! A load that started before a write can finish after that write's
//! invalidation. Entries carry the user's write generation from when their
//! load began, and an entry whose generation is behind is treated as a miss.

use super::store::VoiceStore;
use super::types::{Archetype, StyleProfile};
use crate::config::VoiceConfig;
use crate::error::{Error, Result};

use moka::future::Cache;
use serde::Serialize;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const ARCHETYPE_CATALOG_KEY: &str = "catalog";

/// Write generations are striped by user id hash. Users sharing a stripe only
/// cost each other an extra store read.
const GENERATION_STRIPES: usize = 256;

/// Cached value plus the write generation observed before it was loaded.
#[derive(Debug, Clone)]
struct Stamped<T> {
    generation: u64,
    value: T,
}

/// Cheap read model for score polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionScore {
    pub evolution_score: u8,
    pub learning_iterations: u32,
    pub version: i64,
}

impl EvolutionScore {
    fn of(profile: &StyleProfile) -> Self {
        Self {
            evolution_score: profile.evolution_score,
            learning_iterations: profile.learning_iterations,
            version: profile.version,
        }
    }
}

pub struct ProfileCache {
    store: Arc<VoiceStore>,
    enabled: bool,
    profiles: Cache<String, Stamped<Option<Arc<StyleProfile>>>>,
    scores: Cache<String, Stamped<Option<EvolutionScore>>>,
    archetypes: Cache<&'static str, Arc<Vec<Archetype>>>,
    generations: Box<[AtomicU64]>,
    store_reads: AtomicU64,
}

impl ProfileCache {
    pub fn new(store: Arc<VoiceStore>, config: &VoiceConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            enabled: config.cache_enabled,
            profiles: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(config.profile_cache_ttl_seconds))
                .build(),
            scores: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(config.evolution_cache_ttl_seconds))
                .build(),
            archetypes: Cache::builder()
                .max_capacity(1)
                .time_to_live(Duration::from_secs(config.archetype_cache_ttl_seconds))
                .build(),
            generations: (0..GENERATION_STRIPES).map(|_| AtomicU64::new(0)).collect(),
            store_reads: AtomicU64::new(0),
        })
    }

    /// Current profile, or `None` when the user has never had one.
    pub async fn profile(&self, user_id: &str) -> Result<Option<Arc<StyleProfile>>> {
        if !self.enabled {
            return self.load_profile(user_id).await;
        }
        let generation = self.generation(user_id);
        let entry = self
            .profiles
            .try_get_with(user_id.to_string(), async {
                let started = generation.load(Ordering::Acquire);
                let value = self.load_profile(user_id).await?;
                Ok::<_, Error>(Stamped { generation: started, value })
            })
            .await
            .map_err(Error::from)?;
        if entry.generation == generation.load(Ordering::Acquire) {
            return Ok(entry.value);
        }

        tracing::debug!(user_id, "cached profile predates a write, reloading");
        self.profiles.invalidate(user_id).await;
        self.load_profile(user_id).await
    }

    pub async fn score(&self, user_id: &str) -> Result<Option<EvolutionScore>> {
        if !self.enabled {
            return self.load_score(user_id).await;
        }
        let generation = self.generation(user_id);
        let entry = self
            .scores
            .try_get_with(user_id.to_string(), async {
                let started = generation.load(Ordering::Acquire);
                let value = self.load_score(user_id).await?;
                Ok::<_, Error>(Stamped { generation: started, value })
            })
            .await
            .map_err(Error::from)?;
        if entry.generation == generation.load(Ordering::Acquire) {
            return Ok(entry.value);
        }

        tracing::debug!(user_id, "cached score predates a write, reloading");
        self.scores.invalidate(user_id).await;
        self.load_score(user_id).await
    }

    pub async fn archetypes(&self) -> Result<Arc<Vec<Archetype>>> {
        if !self.enabled {
            return self.load_archetypes().await;
        }
        self.archetypes
            .try_get_with(ARCHETYPE_CATALOG_KEY, self.load_archetypes())
            .await
            .map_err(Error::from)
    }

    /// Drop the profile and score entries for a user after a write.
    ///
    /// The generation bump comes first so an in-flight load that read the
    /// old row is rejected even if it lands after the invalidation.
    pub async fn invalidate_user(&self, user_id: &str) {
        self.generation(user_id).fetch_add(1, Ordering::AcqRel);
        self.profiles.invalidate(user_id).await;
        self.scores.invalidate(user_id).await;
    }

    fn generation(&self, user_id: &str) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        &self.generations[(hasher.finish() % GENERATION_STRIPES as u64) as usize]
    }

    /// Number of loads that reached the store.
    pub fn store_reads(&self) -> u64 {
        self.store_reads.load(Ordering::Relaxed)
    }

    async fn load_profile(&self, user_id: &str) -> Result<Option<Arc<StyleProfile>>> {
        self.store_reads.fetch_add(1, Ordering::Relaxed);
        let loaded = self.store.load_profile(user_id).await?;
        Ok(loaded.map(|(profile, _)| Arc::new(profile)))
    }

    async fn load_score(&self, user_id: &str) -> Result<Option<EvolutionScore>> {
        self.store_reads.fetch_add(1, Ordering::Relaxed);
        let loaded = self.store.load_profile(user_id).await?;
        Ok(loaded.map(|(profile, _)| EvolutionScore::of(&profile)))
    }

    async fn load_archetypes(&self) -> Result<Arc<Vec<Archetype>>> {
        self.store_reads.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(self.store.list_archetypes().await?))
    }
}

impl std::fmt::Debug for ProfileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileCache")
            .field("enabled", &self.enabled)
            .field("store_reads", &self.store_reads())
            .finish_non_exhaustive()
    }
}
