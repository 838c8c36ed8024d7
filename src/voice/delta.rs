//! Style delta extraction: what changed stylistically between an AI draft and
//! the user's edited version.
//!
//! `extract_delta` is a pure function. It reports raw observations only; the
//! threshold gating that turns repeated observations into profile changes
//! lives in the aggregator, because it has to span many batches.

use super::text::{self, TextStats};
use super::types::{Tone, VocabularyLevel};

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

/// Aggregator weight multiplier for major edits.
pub const MAJOR_CHANGE_WEIGHT: f64 = 2.0;

/// Boolean writing traits tracked through threshold-gated observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralTrait {
    Emojis,
    BulletPoints,
    ShortParagraphs,
    Hooks,
    Questions,
}

impl StructuralTrait {
    pub const ALL: [StructuralTrait; 5] = [
        Self::Emojis,
        Self::BulletPoints,
        Self::ShortParagraphs,
        Self::Hooks,
        Self::Questions,
    ];

    fn presence(&self, stats: &TextStats) -> bool {
        match self {
            Self::Emojis => stats.uses_emojis(),
            Self::BulletPoints => stats.has_bullets,
            Self::ShortParagraphs => stats.has_short_paragraphs,
            Self::Hooks => stats.has_hook,
            Self::Questions => stats.uses_questions_often(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Emojis => "emojis",
            Self::BulletPoints => "bullet points",
            Self::ShortParagraphs => "short paragraphs",
            Self::Hooks => "opening hooks",
            Self::Questions => "questions",
        }
    }
}

/// Size class of an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditMagnitude {
    Minor,
    Major,
}

/// Sentence-length observation from one edit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentenceLengthSignal {
    pub original: f64,
    pub edited: f64,
}

impl SentenceLengthSignal {
    pub fn shift(&self) -> f64 {
        self.edited - self.original
    }
}

/// Typed, partial style update extracted from one edit. Never a full profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleDelta {
    /// Present when both texts contain at least one sentence.
    pub sentence_length: Option<SentenceLengthSignal>,
    /// Traits the user actively added (`true`) or removed (`false`).
    /// Traits whose presence did not change carry no signal.
    pub traits: BTreeMap<StructuralTrait, bool>,
    /// Emoji frequency of the edited text, when the emoji trait changed.
    pub emoji_frequency: Option<f64>,
    /// Edited-minus-original tone estimate.
    pub tone_shift: Tone,
    pub vocabulary: Option<VocabularyLevel>,
    /// Lowercase key to surface form of phrases the user introduced.
    pub phrases_added: BTreeMap<String, String>,
    /// Lowercase key to surface form of phrases the user cut from the draft.
    pub phrases_removed: BTreeMap<String, String>,
    pub change_ratio: f64,
    pub magnitude: EditMagnitude,
}

impl StyleDelta {
    /// Relative weight of this delta in the aggregator's moving averages.
    pub fn magnitude_weight(&self) -> f64 {
        match self.magnitude {
            EditMagnitude::Minor => 1.0,
            EditMagnitude::Major => MAJOR_CHANGE_WEIGHT,
        }
    }

    /// Short human-readable summary of the strongest signals.
    pub fn summary(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if let Some(signal) = self.sentence_length {
            if signal.shift() <= -2.0 {
                notes.push("shortened sentences".to_string());
            } else if signal.shift() >= 2.0 {
                notes.push("lengthened sentences".to_string());
            }
        }
        for (trait_kind, added) in &self.traits {
            let verb = if *added { "added" } else { "removed" };
            notes.push(format!("{verb} {}", trait_kind.label()));
        }
        if let Some(phrase) = self.phrases_removed.values().next() {
            notes.push(format!("cut \"{phrase}\""));
        }
        if self.magnitude == EditMagnitude::Major {
            notes.push("major rewrite".to_string());
        }
        notes
    }
}

/// Compare a generated draft with the user's edit.
///
/// `major_change_threshold` is the normalized word-level edit distance above
/// which the delta is flagged major.
pub fn extract_delta(original: &str, edited: &str, major_change_threshold: f64) -> StyleDelta {
    let before = TextStats::analyze(original);
    let after = TextStats::analyze(edited);

    let sentence_length = (before.sentence_count > 0 && after.sentence_count > 0).then_some(
        SentenceLengthSignal {
            original: before.avg_sentence_length,
            edited: after.avg_sentence_length,
        },
    );

    let traits: BTreeMap<StructuralTrait, bool> = StructuralTrait::ALL
        .iter()
        .filter_map(|trait_kind| {
            let was = trait_kind.presence(&before);
            let now = trait_kind.presence(&after);
            (was != now).then_some((*trait_kind, now))
        })
        .collect();

    let emoji_frequency = traits
        .contains_key(&StructuralTrait::Emojis)
        .then_some(after.emoji_frequency);

    let tone_before = text::estimate_tone(original);
    let tone_after = text::estimate_tone(edited);
    let tone_shift = Tone {
        formality: tone_after.formality - tone_before.formality,
        enthusiasm: tone_after.enthusiasm - tone_before.enthusiasm,
        directness: tone_after.directness - tone_before.directness,
        humor: tone_after.humor - tone_before.humor,
        emotionality: tone_after.emotionality - tone_before.emotionality,
    };

    let vocabulary = (after.word_count >= 5).then(|| text::vocabulary_level(edited));

    let original_phrases = text::phrases(original);
    let edited_phrases = text::phrases(edited);
    let phrases_added = difference(&edited_phrases, &original_phrases);
    let phrases_removed = difference(&original_phrases, &edited_phrases);

    let change_ratio = text::change_ratio(original, edited);
    let magnitude = if change_ratio > major_change_threshold {
        EditMagnitude::Major
    } else {
        EditMagnitude::Minor
    };

    StyleDelta {
        sentence_length,
        traits,
        emoji_frequency,
        tone_shift,
        vocabulary,
        phrases_added,
        phrases_removed,
        change_ratio,
        magnitude,
    }
}

fn difference(
    left: &BTreeMap<String, String>,
    right: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    left.iter()
        .filter(|(key, _)| !right.contains_key(*key))
        .map(|(key, surface)| (key.clone(), surface.clone()))
        .collect()
}
