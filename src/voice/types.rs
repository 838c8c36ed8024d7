//! Data types for the voice profile engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Edits
// ---------------------------------------------------------------------------

/// One edited unit: a whole post, or a single tweet of a thread.
///
/// Immutable once stored. The `status` column that tracks learning progress
/// lives only in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRecord {
    pub id: String,
    pub user_id: String,
    pub content_id: String,
    pub position: Option<u32>,
    pub original_text: String,
    pub edited_text: String,
    pub created_at: DateTime<Utc>,
}

/// One tweet of a thread edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEdit {
    pub position: u32,
    pub original_text: String,
    pub edited_text: String,
}

/// Learning progress of a stored edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStatus {
    /// Waiting for (or being retried by) the learning queue.
    Pending,
    /// Consumed by exactly one aggregation.
    Learned,
    /// Dropped by a profile reset before it was learned.
    Discarded,
}

impl EditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Learned => "learned",
            Self::Discarded => "discarded",
        }
    }
}

/// Unit of work handed from ingestion to the learning queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearningJob {
    pub user_id: String,
    pub edit_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Style profile
// ---------------------------------------------------------------------------

/// Broad voice category shown to the user and passed to the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceType {
    Professional,
    Casual,
    Technical,
    Storyteller,
    Educator,
    Enthusiast,
}

impl VoiceType {
    /// Parse from a string, defaulting to Professional.
    pub fn from_str_lossy(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "casual" => Self::Casual,
            "technical" => Self::Technical,
            "storyteller" => Self::Storyteller,
            "educator" => Self::Educator,
            "enthusiast" => Self::Enthusiast,
            _ => Self::Professional,
        }
    }
}

impl std::fmt::Display for VoiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Professional => write!(f, "professional"),
            Self::Casual => write!(f, "casual"),
            Self::Technical => write!(f, "technical"),
            Self::Storyteller => write!(f, "storyteller"),
            Self::Educator => write!(f, "educator"),
            Self::Enthusiast => write!(f, "enthusiast"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VocabularyLevel {
    Simple,
    Moderate,
    Advanced,
    Technical,
}

impl std::fmt::Display for VocabularyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Moderate => write!(f, "moderate"),
            Self::Advanced => write!(f, "advanced"),
            Self::Technical => write!(f, "technical"),
        }
    }
}

/// Where the current profile content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    Default,
    TextAnalysis,
    FileAnalysis,
    Archetype,
    Manual,
    Learned,
}

pub const TONE_MIN: f64 = 1.0;
pub const TONE_MAX: f64 = 10.0;
pub const EMOJI_FREQUENCY_MAX: f64 = 5.0;

/// Five tone dimensions, each on a 1-10 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tone {
    pub formality: f64,
    pub enthusiasm: f64,
    pub directness: f64,
    pub humor: f64,
    pub emotionality: f64,
}

impl Default for Tone {
    fn default() -> Self {
        Self {
            formality: 5.0,
            enthusiasm: 5.0,
            directness: 5.0,
            humor: 3.0,
            emotionality: 4.0,
        }
    }
}

impl Tone {
    /// Dimension names paired with their values, in display order.
    pub fn dimensions(&self) -> [(&'static str, f64); 5] {
        [
            ("formality", self.formality),
            ("enthusiasm", self.enthusiasm),
            ("directness", self.directness),
            ("humor", self.humor),
            ("emotionality", self.emotionality),
        ]
    }

    pub fn clamped(self) -> Self {
        let clamp = |value: f64| value.clamp(TONE_MIN, TONE_MAX);
        Self {
            formality: clamp(self.formality),
            enthusiasm: clamp(self.enthusiasm),
            directness: clamp(self.directness),
            humor: clamp(self.humor),
            emotionality: clamp(self.emotionality),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritingTraits {
    /// Average words per sentence.
    pub avg_sentence_length: f64,
    pub uses_questions_often: bool,
    pub uses_emojis: bool,
    /// Emojis per 100 words, capped at 5.
    pub emoji_frequency: f64,
    pub uses_bullet_points: bool,
    pub uses_short_paragraphs: bool,
    pub uses_hooks: bool,
}

impl Default for WritingTraits {
    fn default() -> Self {
        Self {
            avg_sentence_length: 15.0,
            uses_questions_often: false,
            uses_emojis: false,
            emoji_frequency: 0.0,
            uses_bullet_points: false,
            uses_short_paragraphs: true,
            uses_hooks: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructurePreferences {
    pub intro_style: String,
    pub body_style: String,
    pub ending_style: String,
}

impl Default for StructurePreferences {
    fn default() -> Self {
        Self {
            intro_style: "hook".into(),
            body_style: "narrative".into(),
            ending_style: "call_to_action".into(),
        }
    }
}

/// A user's persisted writing style. Exactly one per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleProfile {
    pub user_id: String,
    pub voice_type: VoiceType,
    pub tone: Tone,
    pub writing_traits: WritingTraits,
    pub structure_preferences: StructurePreferences,
    pub vocabulary_level: VocabularyLevel,
    pub common_phrases: BTreeSet<String>,
    pub banned_phrases: BTreeSet<String>,
    pub sample_posts: Vec<String>,
    pub learning_iterations: u32,
    pub evolution_score: u8,
    pub last_updated: DateTime<Utc>,
    pub profile_source: ProfileSource,
    pub archetype_base: Option<String>,
    pub version: i64,
}

impl StyleProfile {
    /// Neutral profile used on first contact.
    pub fn new_default(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            voice_type: VoiceType::Professional,
            tone: Tone::default(),
            writing_traits: WritingTraits::default(),
            structure_preferences: StructurePreferences::default(),
            vocabulary_level: VocabularyLevel::Moderate,
            common_phrases: BTreeSet::new(),
            banned_phrases: BTreeSet::new(),
            sample_posts: Vec::new(),
            learning_iterations: 0,
            evolution_score: 0,
            last_updated: Utc::now(),
            profile_source: ProfileSource::Default,
            archetype_base: None,
            version: 0,
        }
    }

    /// Copy the style fields of `template` (tone, traits, structure,
    /// vocabulary, voice type) while keeping identity and learning counters.
    pub fn adopt_style_of(&mut self, template: &StyleTemplate) {
        self.voice_type = template.voice_type;
        self.tone = template.tone.clamped();
        self.writing_traits = template.writing_traits.clone();
        self.structure_preferences = template.structure_preferences.clone();
        self.vocabulary_level = template.vocabulary_level;
    }
}

/// Manual profile edit submitted through the UI. Absent fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileUpdate {
    pub voice_type: Option<VoiceType>,
    pub tone: Option<Tone>,
    pub writing_traits: Option<WritingTraits>,
    pub structure_preferences: Option<StructurePreferences>,
    pub vocabulary_level: Option<VocabularyLevel>,
    pub common_phrases: Option<BTreeSet<String>>,
    pub banned_phrases: Option<BTreeSet<String>>,
    pub sample_posts: Option<Vec<String>>,
}

impl ProfileUpdate {
    pub fn apply_to(self, profile: &mut StyleProfile) {
        if let Some(voice_type) = self.voice_type {
            profile.voice_type = voice_type;
        }
        if let Some(tone) = self.tone {
            profile.tone = tone.clamped();
        }
        if let Some(mut traits) = self.writing_traits {
            traits.emoji_frequency = traits.emoji_frequency.clamp(0.0, EMOJI_FREQUENCY_MAX);
            profile.writing_traits = traits;
        }
        if let Some(structure) = self.structure_preferences {
            profile.structure_preferences = structure;
        }
        if let Some(level) = self.vocabulary_level {
            profile.vocabulary_level = level;
        }
        if let Some(phrases) = self.common_phrases {
            profile.common_phrases = phrases;
        }
        if let Some(phrases) = self.banned_phrases {
            profile.banned_phrases = phrases;
        }
        if let Some(samples) = self.sample_posts {
            profile.sample_posts = samples;
        }
    }
}

/// Immutable copy of a profile at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileVersionSnapshot {
    pub id: String,
    pub user_id: String,
    pub version: i64,
    /// What produced this version (learning, reset, archetype, ...).
    pub reason: String,
    pub profile: StyleProfile,
    pub created_at: DateTime<Utc>,
}

/// Derived timeline entry; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionMilestone {
    pub date: DateTime<Utc>,
    pub event: String,
    pub score: u8,
}

// ---------------------------------------------------------------------------
// Archetypes
// ---------------------------------------------------------------------------

/// Style fields an archetype prescribes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleTemplate {
    pub voice_type: VoiceType,
    pub tone: Tone,
    pub writing_traits: WritingTraits,
    pub structure_preferences: StructurePreferences,
    pub vocabulary_level: VocabularyLevel,
}

/// Predefined starter profile a user can adopt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Archetype {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub defaults: StyleTemplate,
}
