//! Lightweight text statistics shared by the delta extractor and profile seeding.
//!
//! Everything here is pure and deterministic. Detection is deliberately
//! heuristic: a handful of pattern checks and keyword densities rather than a
//! language model, so the same draft always yields the same signals.

use super::types::{EMOJI_FREQUENCY_MAX, TONE_MAX, TONE_MIN, Tone, VocabularyLevel};

use regex::Regex;

use std::collections::BTreeMap;
use std::sync::LazyLock;

/// A line that starts like a list item: `-`, `•`, `*`, `→` or `1.` / `1)`.
static BULLET_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-•*→▪]|\d{1,2}[.)])\s+\S").expect("hardcoded regex"));

static CONTRACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\w+(?:n't|'m|'re|'ll|'ve|'d)\b").expect("hardcoded regex"));

/// Words too generic to anchor a learned phrase.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "i",
    "in", "is", "it", "its", "of", "on", "or", "so", "that", "the", "this", "to", "was", "we",
    "were", "with", "you", "your", "our", "my", "me", "us", "they", "them", "their", "he", "she",
    "his", "her", "will", "can", "just", "do", "did", "not", "no", "if", "then", "than", "into",
];

const FORMAL_MARKERS: &[&str] = &[
    "therefore", "furthermore", "however", "moreover", "consequently", "accordingly",
    "additionally", "regarding", "hence", "thus", "whereas",
];
const CASUAL_MARKERS: &[&str] = &[
    "lol", "gonna", "wanna", "hey", "yeah", "yep", "nope", "kinda", "sorta", "cool", "awesome",
    "stuff", "gotta", "btw", "tbh",
];
const ENTHUSIASM_MARKERS: &[&str] = &[
    "amazing", "excited", "exciting", "love", "awesome", "incredible", "thrilled", "huge",
    "finally", "wow", "fantastic",
];
const HEDGES: &[&str] = &[
    "maybe", "perhaps", "might", "possibly", "somewhat", "probably", "arguably", "seems",
];
const HUMOR_MARKERS: &[&str] = &["lol", "haha", "lmao", "joke", "funny", "hilarious", "pun"];
const HUMOR_EMOJIS: &[char] = &['😂', '🤣', '😅', '🙃', '😜', '😆'];
const EMOTION_MARKERS: &[&str] = &[
    "feel", "felt", "love", "hate", "proud", "grateful", "frustrated", "happy", "sad", "scared",
    "excited", "heart", "angry", "thankful", "painful",
];
const TECHNICAL_MARKERS: &[&str] = &[
    "api", "async", "compiler", "latency", "database", "refactor", "kubernetes", "runtime",
    "deploy", "schema", "backend", "frontend", "algorithm", "cache", "thread", "memory",
    "benchmark", "throughput", "repository", "commit",
];

/// Aggregate statistics of one piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStats {
    pub word_count: usize,
    pub sentence_count: usize,
    pub avg_sentence_length: f64,
    pub question_count: usize,
    pub emoji_count: usize,
    /// Emojis per 100 words, capped at `EMOJI_FREQUENCY_MAX`.
    pub emoji_frequency: f64,
    pub has_bullets: bool,
    pub has_short_paragraphs: bool,
    pub has_hook: bool,
    pub avg_word_length: f64,
}

impl TextStats {
    pub fn analyze(text: &str) -> Self {
        let words = words(text);
        let sentences = sentences(text);
        let word_count = words.len();
        let sentence_count = sentences.len();
        let question_count = sentences.iter().filter(|s| s.ends_with('?')).count();
        let emoji_count = text.chars().filter(|c| is_emoji(*c)).count();

        let avg_sentence_length = if sentence_count == 0 {
            0.0
        } else {
            word_count as f64 / sentence_count as f64
        };
        let emoji_frequency = if word_count == 0 {
            0.0
        } else {
            (emoji_count as f64 * 100.0 / word_count as f64).min(EMOJI_FREQUENCY_MAX)
        };
        let avg_word_length = if word_count == 0 {
            0.0
        } else {
            words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / word_count as f64
        };

        Self {
            word_count,
            sentence_count,
            avg_sentence_length,
            question_count,
            emoji_count,
            emoji_frequency,
            has_bullets: text.lines().any(|line| BULLET_LINE.is_match(line)),
            has_short_paragraphs: has_short_paragraphs(text),
            has_hook: has_hook(text),
            avg_word_length,
        }
    }

    pub fn uses_emojis(&self) -> bool {
        self.emoji_count > 0
    }

    /// At least one in five sentences is a question.
    pub fn uses_questions_often(&self) -> bool {
        self.sentence_count > 0 && self.question_count * 5 >= self.sentence_count
    }
}

/// Unicode ranges covering pictographic emoji, dingbats and flags.
pub fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F300..=0x1FAFF | 0x2600..=0x27BF | 0x1F1E6..=0x1F1FF | 0x2B50 | 0x2B55 | 0x231A..=0x231B)
}

/// Words with surrounding punctuation trimmed; emoji-only tokens are dropped.
pub fn words(text: &str) -> Vec<&str> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .map(|token| token.trim_matches('\''))
        .filter(|token| token.chars().any(|c| c.is_alphanumeric()))
        .collect()
}

/// Sentences split on terminal punctuation and line breaks, trimmed, with
/// their terminal punctuation kept.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut result = Vec::new();
    for line in text.lines() {
        let mut start = 0;
        let bytes: Vec<(usize, char)> = line.char_indices().collect();
        for (index, &(offset, c)) in bytes.iter().enumerate() {
            if matches!(c, '.' | '!' | '?') {
                let next_is_break = bytes
                    .get(index + 1)
                    .is_none_or(|&(_, next)| next.is_whitespace());
                if next_is_break {
                    let end = offset + c.len_utf8();
                    push_sentence(&mut result, &line[start..end]);
                    start = end;
                }
            }
        }
        push_sentence(&mut result, &line[start..]);
    }
    result
}

fn push_sentence<'a>(result: &mut Vec<&'a str>, candidate: &'a str) {
    let trimmed = candidate.trim();
    if trimmed.chars().any(|c| c.is_alphanumeric()) {
        result.push(trimmed);
    }
}

fn paragraphs(text: &str) -> Vec<Vec<&str>> {
    let mut result = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                result.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        result.push(current);
    }
    result
}

/// Two or more paragraphs, none longer than two lines or two sentences.
fn has_short_paragraphs(text: &str) -> bool {
    let paragraphs = paragraphs(text);
    paragraphs.len() >= 2
        && paragraphs.iter().all(|lines| {
            lines.len() <= 2 && sentences(&lines.join(" ")).len() <= 2
        })
}

/// The opening line grabs attention: a question, an exclamation, a colon
/// lead-in, a number-led promise, or a punchy line of at most eight words
/// followed by more text.
fn has_hook(text: &str) -> bool {
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
    let Some(first) = lines.next() else {
        return false;
    };
    let has_more = lines.next().is_some();
    let opening = sentences(first).into_iter().next().unwrap_or(first);

    opening.ends_with('?')
        || opening.ends_with('!')
        || first.ends_with(':')
        || opening.chars().next().is_some_and(|c| c.is_ascii_digit())
        || (has_more && words(opening).len() <= 8)
}

fn density(lower_words: &[String], markers: &[&str]) -> f64 {
    if lower_words.is_empty() {
        return 0.0;
    }
    let hits = lower_words
        .iter()
        .filter(|word| markers.contains(&word.as_str()))
        .count();
    hits as f64 * 100.0 / lower_words.len() as f64
}

fn lower_words(text: &str) -> Vec<String> {
    words(text).into_iter().map(str::to_lowercase).collect()
}

/// Estimate the five tone dimensions of a text on the 1-10 scale.
pub fn estimate_tone(text: &str) -> Tone {
    let stats = TextStats::analyze(text);
    let lower = lower_words(text);
    let word_count = stats.word_count.max(1) as f64;

    let exclamations = text.matches('!').count() as f64 * 100.0 / word_count;
    let contractions = CONTRACTION.find_iter(text).count() as f64 * 100.0 / word_count;
    let humor_emojis = text.chars().filter(|c| HUMOR_EMOJIS.contains(c)).count() as f64;

    let formality = 5.0 + density(&lower, FORMAL_MARKERS) * 1.5
        - density(&lower, CASUAL_MARKERS) * 1.5
        - contractions * 0.4
        + (stats.avg_word_length - 4.7) * 1.2
        - stats.emoji_frequency * 0.5;
    let enthusiasm = 4.0
        + exclamations * 1.2
        + density(&lower, ENTHUSIASM_MARKERS) * 1.5
        + stats.emoji_frequency * 0.6;
    let directness = 6.0 - density(&lower, HEDGES) * 1.5
        - (stats.avg_sentence_length - 15.0).max(0.0) * 0.15
        + (12.0 - stats.avg_sentence_length).max(0.0) * 0.2;
    let humor = 2.5 + density(&lower, HUMOR_MARKERS) * 2.0 + humor_emojis * 1.5;
    let emotionality = 3.5 + density(&lower, EMOTION_MARKERS) * 1.5 + exclamations * 0.4;

    Tone {
        formality,
        enthusiasm,
        directness,
        humor,
        emotionality,
    }
    .clamped()
}

/// Classify vocabulary from technical-term density and average word length.
pub fn vocabulary_level(text: &str) -> VocabularyLevel {
    let lower = lower_words(text);
    if lower.is_empty() {
        return VocabularyLevel::Moderate;
    }
    if density(&lower, TECHNICAL_MARKERS) >= 4.0 {
        return VocabularyLevel::Technical;
    }
    let avg_word_length = TextStats::analyze(text).avg_word_length;
    if avg_word_length < 4.3 {
        VocabularyLevel::Simple
    } else if avg_word_length < 5.3 {
        VocabularyLevel::Moderate
    } else {
        VocabularyLevel::Advanced
    }
}

/// Candidate phrases (2-4 word n-grams) keyed by their lowercase form, mapped
/// to the first surface form seen.
///
/// N-grams never cross sentence punctuation or line breaks, and an n-gram
/// that starts or ends on a stopword is skipped.
pub fn phrases(text: &str) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for segment in text.split(|c: char| matches!(c, '.' | '!' | '?' | ';' | ':' | ',' | '\n')) {
        let tokens = words(segment);
        for size in 2..=4 {
            for window in tokens.windows(size) {
                let first = window[0].to_lowercase();
                let last = window[size - 1].to_lowercase();
                if STOPWORDS.contains(&first.as_str()) || STOPWORDS.contains(&last.as_str()) {
                    continue;
                }
                let surface = window.join(" ");
                result.entry(surface.to_lowercase()).or_insert(surface);
            }
        }
    }
    result
}

/// Word-level Levenshtein distance divided by the longer word count.
///
/// 0.0 means identical word sequences, 1.0 means nothing in common.
pub fn change_ratio(original: &str, edited: &str) -> f64 {
    let a: Vec<String> = lower_words(original);
    let b: Vec<String> = lower_words(edited);
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 0.0;
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, word_a) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, word_b) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(word_a != word_b);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()] as f64 / longest as f64
}

pub fn clamp_tone(value: f64) -> f64 {
    value.clamp(TONE_MIN, TONE_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentences_split_on_terminal_punctuation_and_lines() {
        let text = "Shipping v2 today! It took 3.5 months.\nWhat broke? Nothing.";
        assert_eq!(
            sentences(text),
            vec!["Shipping v2 today!", "It took 3.5 months.", "What broke?", "Nothing."]
        );
    }

    #[test]
    fn stats_detect_structure() {
        let text = "Want faster builds?\n\n- cache deps\n- split crates\n\nTry it today 🚀";
        let stats = TextStats::analyze(text);
        assert!(stats.has_bullets);
        assert!(stats.has_hook);
        assert!(stats.has_short_paragraphs);
        assert!(stats.uses_emojis());
        assert!(stats.uses_questions_often());
        assert_eq!(stats.emoji_count, 1);
    }

    #[test]
    fn plain_paragraph_has_no_structure_signals() {
        let text = "This release refactors the storage layer and improves throughput across \
                    every benchmark that we run in continuous integration.";
        let stats = TextStats::analyze(text);
        assert!(!stats.has_bullets);
        assert!(!stats.has_short_paragraphs);
        assert!(!stats.uses_emojis());
        assert!(!stats.has_hook);
        assert_eq!(stats.sentence_count, 1);
    }

    #[test]
    fn phrases_skip_stopword_edges_and_punctuation() {
        let found = phrases("We Leverage synergies to win. Ship fast");
        assert_eq!(found.get("leverage synergies").map(String::as_str), Some("Leverage synergies"));
        assert!(found.contains_key("ship fast"));
        assert!(!found.contains_key("synergies to"));
        // "win. Ship" crosses a sentence boundary.
        assert!(!found.contains_key("win ship"));
    }

    #[test]
    fn change_ratio_is_normalized() {
        assert_eq!(change_ratio("a b c d", "a b c d"), 0.0);
        assert_eq!(change_ratio("a b c d", "w x y z"), 1.0);
        assert_eq!(change_ratio("one two three four", "one two three"), 0.25);
        assert_eq!(change_ratio("", ""), 0.0);
    }

    #[test]
    fn tone_reacts_to_excitement_and_hedging() {
        let excited = estimate_tone("This is amazing! We finally shipped it! So excited 🎉");
        let hedged = estimate_tone(
            "Perhaps this might possibly be somewhat useful, although it probably seems minor.",
        );
        assert!(excited.enthusiasm > hedged.enthusiasm);
        assert!(hedged.directness < excited.directness);
        for (_, value) in excited.dimensions() {
            assert!((TONE_MIN..=TONE_MAX).contains(&value));
        }
    }

    #[test]
    fn vocabulary_detects_technical_writing() {
        assert_eq!(
            vocabulary_level("The async runtime cuts API latency and database cache misses"),
            VocabularyLevel::Technical
        );
        assert_eq!(vocabulary_level("I got a new cat and he is so fun"), VocabularyLevel::Simple);
    }
}
