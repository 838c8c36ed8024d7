//! Configuration loading: TOML file first, `VOICEPRINT_*` environment second.

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "VOICEPRINT_";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Directory holding `voiceprint.db`.
    pub data_dir: PathBuf,
    pub api: ApiConfig,
    pub voice: VoiceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            api: ApiConfig::default(),
            voice: VoiceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".into(),
        }
    }
}

/// Knobs for the learning pipeline, caches and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct VoiceConfig {
    /// Workers processing learning jobs for different users in parallel.
    pub learning_queue_concurrency: usize,
    /// Minimum spacing between two aggregations for the same user.
    pub learning_rate_limit_minutes: u64,
    /// Trailing debounce window that coalesces a user's edits.
    pub edit_batch_window_minutes: u64,
    /// Attempts per learning job before it is dead-lettered.
    pub learning_max_attempts: u32,
    /// First retry delay; doubles on every further attempt.
    pub learning_retry_base_ms: u64,

    pub profile_cache_ttl_seconds: u64,
    pub evolution_cache_ttl_seconds: u64,
    pub archetype_cache_ttl_seconds: u64,
    /// When false every read goes straight to the store.
    pub cache_enabled: bool,

    pub max_edit_metadata_per_user: u32,
    /// Longest draft or edited text, in characters, accepted for one edit.
    pub max_edit_text_length: usize,
    pub max_profile_versions: u32,
    pub max_sample_posts: usize,

    /// Minimum characters of pasted text accepted for profile seeding.
    pub min_text_sample_length: usize,
    /// Minimum characters of uploaded file content accepted for profile seeding.
    pub min_file_sample_length: usize,

    pub pattern_threshold_sentence_length: u32,
    pub pattern_threshold_emoji: u32,
    pub pattern_threshold_structure: u32,
    pub pattern_threshold_common_phrase: u32,
    pub pattern_threshold_banned_phrase: u32,
    /// Normalized word-level edit distance above which an edit counts as major.
    pub pattern_threshold_major_change: f64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            learning_queue_concurrency: 4,
            learning_rate_limit_minutes: 5,
            edit_batch_window_minutes: 2,
            learning_max_attempts: 5,
            learning_retry_base_ms: 2000,
            profile_cache_ttl_seconds: 3600,
            evolution_cache_ttl_seconds: 300,
            archetype_cache_ttl_seconds: 86_400,
            cache_enabled: true,
            max_edit_metadata_per_user: 100,
            max_edit_text_length: 10_000,
            max_profile_versions: 20,
            max_sample_posts: 5,
            min_text_sample_length: 100,
            min_file_sample_length: 200,
            pattern_threshold_sentence_length: 3,
            pattern_threshold_emoji: 3,
            pattern_threshold_structure: 3,
            pattern_threshold_common_phrase: 3,
            pattern_threshold_banned_phrase: 2,
            pattern_threshold_major_change: 0.5,
        }
    }
}

impl VoiceConfig {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_secs(self.learning_rate_limit_minutes * 60)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_secs(self.edit_batch_window_minutes * 60)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.learning_retry_base_ms)
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str::<Config>(&content)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `VOICEPRINT_*` overrides read through `lookup`.
    ///
    /// Takes a lookup function so tests can feed overrides without touching
    /// the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = get("DATA_DIR") {
            self.data_dir = PathBuf::from(value);
        }
        if let Some(value) = get("BIND") {
            self.api.bind = value;
        }

        let voice = &mut self.voice;
        override_parsed(&get, "LEARNING_QUEUE_CONCURRENCY", &mut voice.learning_queue_concurrency)?;
        override_parsed(&get, "LEARNING_RATE_LIMIT_MINUTES", &mut voice.learning_rate_limit_minutes)?;
        override_parsed(&get, "EDIT_BATCH_WINDOW_MINUTES", &mut voice.edit_batch_window_minutes)?;
        override_parsed(&get, "LEARNING_MAX_ATTEMPTS", &mut voice.learning_max_attempts)?;
        override_parsed(&get, "LEARNING_RETRY_BASE_MS", &mut voice.learning_retry_base_ms)?;
        override_parsed(&get, "PROFILE_CACHE_TTL_SECONDS", &mut voice.profile_cache_ttl_seconds)?;
        override_parsed(&get, "EVOLUTION_CACHE_TTL_SECONDS", &mut voice.evolution_cache_ttl_seconds)?;
        override_parsed(&get, "ARCHETYPE_CACHE_TTL_SECONDS", &mut voice.archetype_cache_ttl_seconds)?;
        override_parsed(&get, "CACHE_ENABLED", &mut voice.cache_enabled)?;
        override_parsed(&get, "MAX_EDIT_METADATA_PER_USER", &mut voice.max_edit_metadata_per_user)?;
        override_parsed(&get, "MAX_EDIT_TEXT_LENGTH", &mut voice.max_edit_text_length)?;
        override_parsed(&get, "MAX_PROFILE_VERSIONS", &mut voice.max_profile_versions)?;
        override_parsed(&get, "MAX_SAMPLE_POSTS", &mut voice.max_sample_posts)?;
        override_parsed(&get, "MIN_TEXT_SAMPLE_LENGTH", &mut voice.min_text_sample_length)?;
        override_parsed(&get, "MIN_FILE_SAMPLE_LENGTH", &mut voice.min_file_sample_length)?;
        override_parsed(
            &get,
            "PATTERN_THRESHOLD_SENTENCE_LENGTH",
            &mut voice.pattern_threshold_sentence_length,
        )?;
        override_parsed(&get, "PATTERN_THRESHOLD_EMOJI", &mut voice.pattern_threshold_emoji)?;
        override_parsed(&get, "PATTERN_THRESHOLD_STRUCTURE", &mut voice.pattern_threshold_structure)?;
        override_parsed(
            &get,
            "PATTERN_THRESHOLD_COMMON_PHRASE",
            &mut voice.pattern_threshold_common_phrase,
        )?;
        override_parsed(
            &get,
            "PATTERN_THRESHOLD_BANNED_PHRASE",
            &mut voice.pattern_threshold_banned_phrase,
        )?;
        override_parsed(
            &get,
            "PATTERN_THRESHOLD_MAJOR_CHANGE",
            &mut voice.pattern_threshold_major_change,
        )?;

        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("voiceprint.db")
    }
}

fn override_parsed<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) -> anyhow::Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = get(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|error| anyhow::anyhow!("invalid value for {ENV_PREFIX}{name}: {error}"))?;
    }
    Ok(())
}
