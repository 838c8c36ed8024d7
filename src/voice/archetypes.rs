//! Built-in archetype catalog, installed into the store at startup.

use super::store::VoiceStore;
use super::types::{
    Archetype, StructurePreferences, StyleTemplate, Tone, VocabularyLevel, VoiceType,
    WritingTraits,
};
use crate::error::Result;

struct Preset {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    category: &'static str,
    voice_type: VoiceType,
    tone: [f64; 5],
    avg_sentence_length: f64,
    questions: bool,
    emoji_frequency: f64,
    bullets: bool,
    structure: [&'static str; 3],
    vocabulary: VocabularyLevel,
}

const CATALOG: &[Preset] = &[
    Preset {
        id: "thought-leader",
        name: "Thought Leader",
        description: "Confident, measured takes on where the industry is heading.",
        category: "professional",
        voice_type: VoiceType::Professional,
        tone: [7.5, 5.0, 7.0, 2.0, 4.0],
        avg_sentence_length: 18.0,
        questions: false,
        emoji_frequency: 0.0,
        bullets: false,
        structure: ["bold_claim", "argument", "reflection"],
        vocabulary: VocabularyLevel::Advanced,
    },
    Preset {
        id: "build-in-public",
        name: "Build in Public",
        description: "Candid progress updates with numbers, wins and mistakes.",
        category: "founder",
        voice_type: VoiceType::Casual,
        tone: [3.5, 7.0, 8.0, 5.0, 6.0],
        avg_sentence_length: 10.0,
        questions: true,
        emoji_frequency: 1.5,
        bullets: true,
        structure: ["hook", "list", "question"],
        vocabulary: VocabularyLevel::Simple,
    },
    Preset {
        id: "deep-diver",
        name: "Technical Deep Diver",
        description: "Precise explanations of how things work under the hood.",
        category: "technical",
        voice_type: VoiceType::Technical,
        tone: [6.0, 4.0, 8.0, 2.0, 2.0],
        avg_sentence_length: 16.0,
        questions: false,
        emoji_frequency: 0.0,
        bullets: true,
        structure: ["problem", "walkthrough", "takeaway"],
        vocabulary: VocabularyLevel::Technical,
    },
    Preset {
        id: "storyteller",
        name: "Storyteller",
        description: "Turns commits and launches into a narrative with stakes.",
        category: "creative",
        voice_type: VoiceType::Storyteller,
        tone: [4.0, 6.0, 5.0, 4.0, 8.0],
        avg_sentence_length: 14.0,
        questions: false,
        emoji_frequency: 0.5,
        bullets: false,
        structure: ["scene", "narrative", "lesson"],
        vocabulary: VocabularyLevel::Moderate,
    },
    Preset {
        id: "explainer",
        name: "Patient Explainer",
        description: "Step-by-step explanations that check in with the reader.",
        category: "education",
        voice_type: VoiceType::Educator,
        tone: [5.5, 5.0, 6.0, 3.0, 4.0],
        avg_sentence_length: 13.0,
        questions: true,
        emoji_frequency: 0.5,
        bullets: true,
        structure: ["question", "steps", "summary"],
        vocabulary: VocabularyLevel::Moderate,
    },
    Preset {
        id: "hype-engine",
        name: "Hype Engine",
        description: "High-energy launch posts that celebrate every release.",
        category: "marketing",
        voice_type: VoiceType::Enthusiast,
        tone: [3.0, 9.5, 7.0, 5.0, 7.0],
        avg_sentence_length: 8.0,
        questions: false,
        emoji_frequency: 3.5,
        bullets: true,
        structure: ["hook", "list", "call_to_action"],
        vocabulary: VocabularyLevel::Simple,
    },
];

impl Preset {
    fn to_archetype(&self) -> Archetype {
        let [formality, enthusiasm, directness, humor, emotionality] = self.tone;
        let [intro, body, ending] = self.structure;
        Archetype {
            id: self.id.into(),
            name: self.name.into(),
            description: self.description.into(),
            category: self.category.into(),
            defaults: StyleTemplate {
                voice_type: self.voice_type,
                tone: Tone {
                    formality,
                    enthusiasm,
                    directness,
                    humor,
                    emotionality,
                },
                writing_traits: WritingTraits {
                    avg_sentence_length: self.avg_sentence_length,
                    uses_questions_often: self.questions,
                    uses_emojis: self.emoji_frequency > 0.0,
                    emoji_frequency: self.emoji_frequency,
                    uses_bullet_points: self.bullets,
                    uses_short_paragraphs: self.avg_sentence_length <= 14.0,
                    uses_hooks: intro == "hook" || intro == "bold_claim",
                },
                structure_preferences: StructurePreferences {
                    intro_style: intro.into(),
                    body_style: body.into(),
                    ending_style: ending.into(),
                },
                vocabulary_level: self.vocabulary,
            },
        }
    }
}

pub fn builtin() -> Vec<Archetype> {
    CATALOG.iter().map(Preset::to_archetype).collect()
}

/// Insert built-in archetypes that are not in the store yet. Existing rows
/// (possibly edited by an operator) are left alone.
pub async fn install(store: &VoiceStore) -> Result<usize> {
    let mut inserted = 0;
    for archetype in builtin() {
        if store.insert_archetype_if_missing(&archetype).await? {
            inserted += 1;
        }
    }
    if inserted > 0 {
        tracing::info!(inserted, "installed built-in archetypes");
    }
    Ok(inserted)
}
