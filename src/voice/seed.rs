//! Profile seeding from writing samples the user pastes or uploads.

use super::text::{self, TextStats};
use super::types::{
    StructurePreferences, StyleTemplate, Tone, VocabularyLevel, VoiceType, WritingTraits,
};
use crate::error::{Error, Result};

use std::collections::{BTreeMap, BTreeSet};

/// File extensions accepted for uploaded samples.
const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "text"];
/// Learned phrases taken from a seed at most.
const MAX_SEED_PHRASES: usize = 10;

/// Style estimate built from one or more samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedAnalysis {
    pub template: StyleTemplate,
    /// Phrases that recur across at least two samples.
    pub common_phrases: BTreeSet<String>,
    pub sample_posts: Vec<String>,
}

/// Split pasted text into samples and check its length.
pub fn samples_from_text(text: &str, min_length: usize) -> Result<Vec<String>> {
    let trimmed = text.trim();
    let length = trimmed.chars().count();
    if length < min_length {
        return Err(Error::validation(format!(
            "writing sample is too short ({length} characters, need at least {min_length})"
        )));
    }
    Ok(split_samples(trimmed))
}

/// Validate an uploaded file and split its contents into samples.
pub fn samples_from_file(file_name: &str, contents: &str, min_length: usize) -> Result<Vec<String>> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Error::validation(format!(
            "unsupported file type '{file_name}', expected one of: {}",
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    let trimmed = contents.trim();
    let length = trimmed.chars().count();
    if length < min_length {
        return Err(Error::validation(format!(
            "file '{file_name}' is too short ({length} characters, need at least {min_length})"
        )));
    }
    Ok(split_samples(trimmed))
}

/// Posts are separated by `---` lines or by two or more blank lines.
fn split_samples(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let mut samples = Vec::new();
    let mut current = String::new();
    let mut blank_run = 0;

    for line in normalized.lines() {
        let separator = line.trim() == "---";
        if line.trim().is_empty() {
            blank_run += 1;
        } else if !separator {
            blank_run = 0;
        }

        if separator || blank_run >= 2 {
            push_sample(&mut samples, &mut current);
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    push_sample(&mut samples, &mut current);
    samples
}

fn push_sample(samples: &mut Vec<String>, current: &mut String) {
    let sample = current.trim();
    if !sample.is_empty() {
        samples.push(sample.to_string());
    }
    current.clear();
}

/// Estimate a style from samples.
pub fn analyze_samples(samples: &[String], max_sample_posts: usize) -> SeedAnalysis {
    let combined = samples.join("\n\n");
    let overall = TextStats::analyze(&combined);
    let per_sample: Vec<TextStats> = samples.iter().map(|sample| TextStats::analyze(sample)).collect();
    let majority = |check: fn(&TextStats) -> bool| {
        let hits = per_sample.iter().filter(|stats| check(stats)).count();
        hits * 2 > per_sample.len()
    };

    let writing_traits = WritingTraits {
        avg_sentence_length: if overall.sentence_count == 0 {
            WritingTraits::default().avg_sentence_length
        } else {
            overall.avg_sentence_length
        },
        uses_questions_often: overall.uses_questions_often(),
        uses_emojis: majority(TextStats::uses_emojis),
        emoji_frequency: overall.emoji_frequency,
        uses_bullet_points: majority(|stats| stats.has_bullets),
        uses_short_paragraphs: majority(|stats| stats.has_short_paragraphs),
        uses_hooks: majority(|stats| stats.has_hook),
    };

    let tone = text::estimate_tone(&combined);
    let vocabulary_level = text::vocabulary_level(&combined);
    let voice_type = infer_voice_type(&tone, vocabulary_level, &writing_traits);

    let structure_preferences = StructurePreferences {
        intro_style: if writing_traits.uses_hooks { "hook" } else { "statement" }.into(),
        body_style: if writing_traits.uses_bullet_points { "list" } else { "narrative" }.into(),
        ending_style: if writing_traits.uses_questions_often {
            "question"
        } else {
            "call_to_action"
        }
        .into(),
    };

    let excess = samples.len().saturating_sub(max_sample_posts);
    SeedAnalysis {
        template: StyleTemplate {
            voice_type,
            tone,
            writing_traits,
            structure_preferences,
            vocabulary_level,
        },
        common_phrases: recurring_phrases(samples),
        sample_posts: samples[excess..].to_vec(),
    }
}

fn infer_voice_type(tone: &Tone, vocabulary: VocabularyLevel, traits: &WritingTraits) -> VoiceType {
    if vocabulary == VocabularyLevel::Technical {
        VoiceType::Technical
    } else if tone.enthusiasm >= 7.0 {
        VoiceType::Enthusiast
    } else if tone.humor >= 6.0 || tone.formality <= 3.5 {
        VoiceType::Casual
    } else if traits.uses_questions_often && traits.uses_bullet_points {
        VoiceType::Educator
    } else if tone.emotionality >= 6.0 && traits.avg_sentence_length >= 18.0 {
        VoiceType::Storyteller
    } else {
        VoiceType::Professional
    }
}

/// Phrases present in at least two different samples, most widespread first.
fn recurring_phrases(samples: &[String]) -> BTreeSet<String> {
    let mut seen_in: BTreeMap<String, (usize, String)> = BTreeMap::new();
    for sample in samples {
        for (key, surface) in text::phrases(sample) {
            seen_in.entry(key).or_insert((0, surface)).0 += 1;
        }
    }

    let mut recurring: Vec<(usize, String)> = seen_in
        .into_values()
        .filter(|(count, _)| *count >= 2)
        .collect();
    recurring.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    recurring
        .into_iter()
        .take(MAX_SEED_PHRASES)
        .map(|(_, surface)| surface)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &str = "Shipped the new release today 🚀\n\nIt fixes the flaky sync bug. Ship small, ship often.\n\
        ---\n\
        Ship small, ship often. That is how we kept the parser rewrite sane 🎉\n\
        ---\n\
        Why does every deploy feel scary? Ship small, ship often and it stops being scary.";

    #[test]
    fn short_text_is_rejected() {
        let error = samples_from_text("too short", 100).unwrap_err();
        assert!(matches!(error, Error::Validation(_)));
    }

    #[test]
    fn file_needs_supported_extension_and_length() {
        assert!(matches!(
            samples_from_file("notes.pdf", SAMPLES, 10),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            samples_from_file("notes.md", "tiny", 200),
            Err(Error::Validation(_))
        ));
        assert_eq!(samples_from_file("notes.MD", SAMPLES, 10).unwrap().len(), 3);
    }

    #[test]
    fn samples_split_on_separator_lines_and_double_blank_lines() {
        let samples = split_samples("First post.\n\n\nSecond post.\n---\nThird post.\n\nStill third.");
        assert_eq!(
            samples,
            vec![
                "First post.".to_string(),
                "Second post.".to_string(),
                "Third post.\n\nStill third.".to_string(),
            ]
        );
    }

    #[test]
    fn analysis_picks_up_recurring_phrases_and_emojis() {
        let samples = samples_from_text(SAMPLES, 50).unwrap();
        let analysis = analyze_samples(&samples, 2);

        assert!(analysis.common_phrases.contains("Ship small"));
        assert!(analysis.template.writing_traits.uses_emojis);
        assert_eq!(analysis.sample_posts.len(), 2);
        assert_eq!(analysis.sample_posts[1], samples[2]);
    }
}
