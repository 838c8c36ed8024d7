//! Per-user learning bookkeeping persisted alongside the profile.
//!
//! Threshold gating spans batches processed by different workers over time,
//! so streaks, pending sentence-length observations and phrase counters are
//! stored with the profile document rather than held in memory. None of this
//! is exposed through the public profile.

use super::delta::StructuralTrait;
use super::types::VocabularyLevel;

use serde::{Deserialize, Serialize};

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Phrase counters kept per direction before the least-seen ones are evicted.
const MAX_PHRASE_COUNTERS: usize = 500;

/// Run of identical consecutive observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak<T> {
    pub value: T,
    pub count: u32,
}

impl<T: PartialEq + Copy> Streak<T> {
    /// Record an observation and return the length of the current run.
    pub fn observe(slot: &mut Option<Streak<T>>, value: T) -> u32 {
        match slot {
            Some(streak) if streak.value == value => {
                streak.count += 1;
                streak.count
            }
            _ => {
                *slot = Some(Streak { value, count: 1 });
                1
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseCounter {
    /// First surface form seen, used when the phrase is promoted.
    pub display: String,
    pub count: u32,
    /// Learning pass in which the phrase was last observed.
    #[serde(default)]
    pub last_seen: u64,
}

/// Result of recording a phrase observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhrasePromotion {
    pub key: String,
    pub display: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningLedger {
    /// Sentence-length observations not yet folded into the profile. All of
    /// them point in the same direction relative to the profile average.
    #[serde(default)]
    pub pending_sentence_lengths: Vec<f64>,
    #[serde(default)]
    pub trait_streaks: BTreeMap<StructuralTrait, Streak<bool>>,
    #[serde(default)]
    pub vocabulary_streak: Option<Streak<VocabularyLevel>>,
    #[serde(default)]
    pub added_phrases: BTreeMap<String, PhraseCounter>,
    #[serde(default)]
    pub removed_phrases: BTreeMap<String, PhraseCounter>,
    /// Signals that have reached their threshold at least once.
    #[serde(default)]
    pub confirmed_signals: BTreeSet<String>,
    /// Learning passes compacted so far. Stamps phrase observations.
    #[serde(default)]
    pub pass: u64,
}

impl LearningLedger {
    /// Record a boolean trait observation and return the current run length.
    pub fn observe_trait(&mut self, trait_kind: StructuralTrait, value: bool) -> u32 {
        let mut slot = self.trait_streaks.remove(&trait_kind);
        let count = Streak::observe(&mut slot, value);
        if let Some(streak) = slot {
            self.trait_streaks.insert(trait_kind, streak);
        }
        count
    }

    pub fn observe_vocabulary(&mut self, level: VocabularyLevel) -> u32 {
        Streak::observe(&mut self.vocabulary_streak, level)
    }

    /// Queue a sentence-length observation. Returns the mean of the pending
    /// run once it reaches `threshold` consecutive observations in the same
    /// direction relative to `current`, clearing the run.
    pub fn observe_sentence_length(
        &mut self,
        current: f64,
        observed: f64,
        threshold: u32,
    ) -> Option<f64> {
        let direction = |value: f64| (value - current).signum();
        if let Some(&first) = self.pending_sentence_lengths.first()
            && direction(first) != direction(observed)
        {
            self.pending_sentence_lengths.clear();
        }
        self.pending_sentence_lengths.push(observed);

        if self.pending_sentence_lengths.len() as u32 >= threshold.max(1) {
            let run = std::mem::take(&mut self.pending_sentence_lengths);
            Some(run.iter().sum::<f64>() / run.len() as f64)
        } else {
            None
        }
    }

    /// Count a phrase the user added. Returns the phrase when its counter
    /// reaches `threshold` for the first time.
    pub fn observe_added_phrase(
        &mut self,
        key: &str,
        display: &str,
        threshold: u32,
    ) -> Option<PhrasePromotion> {
        observe_phrase(&mut self.added_phrases, self.pass, key, display, threshold)
    }

    /// Count a phrase the user removed from a draft.
    pub fn observe_removed_phrase(
        &mut self,
        key: &str,
        display: &str,
        threshold: u32,
    ) -> Option<PhrasePromotion> {
        observe_phrase(&mut self.removed_phrases, self.pass, key, display, threshold)
    }

    pub fn confirm(&mut self, signal: impl Into<String>) {
        self.confirmed_signals.insert(signal.into());
    }

    /// Bound counter maps so a long-lived profile does not grow without
    /// limit, then close the current pass. Called once per learning pass.
    ///
    /// Counters observed in the closing pass are never evicted, so a single
    /// large pass can leave a map over the bound until the next one.
    pub fn compact(&mut self) {
        compact_counters(&mut self.added_phrases, self.pass);
        compact_counters(&mut self.removed_phrases, self.pass);
        self.pass += 1;
    }
}

fn observe_phrase(
    counters: &mut BTreeMap<String, PhraseCounter>,
    pass: u64,
    key: &str,
    display: &str,
    threshold: u32,
) -> Option<PhrasePromotion> {
    let counter = counters
        .entry(key.to_string())
        .or_insert_with(|| PhraseCounter {
            display: display.to_string(),
            count: 0,
            last_seen: pass,
        });
    counter.count += 1;
    counter.last_seen = pass;
    (counter.count == threshold.max(1)).then(|| PhrasePromotion {
        key: key.to_string(),
        display: counter.display.clone(),
    })
}

/// Evict the least-counted, least recently seen counters. Among equals the
/// longer n-gram goes first; key order only breaks exact ties.
fn compact_counters(counters: &mut BTreeMap<String, PhraseCounter>, current_pass: u64) {
    if counters.len() <= MAX_PHRASE_COUNTERS {
        return;
    }
    let mut stale: Vec<(u32, u64, Reverse<usize>, &String)> = counters
        .iter()
        .filter(|(_, counter)| counter.last_seen < current_pass)
        .map(|(key, counter)| {
            let words = key.split_whitespace().count();
            (counter.count, counter.last_seen, Reverse(words), key)
        })
        .collect();
    stale.sort();
    let excess = counters.len() - MAX_PHRASE_COUNTERS;
    let evicted: Vec<String> = stale
        .into_iter()
        .take(excess)
        .map(|(_, _, _, key)| key.clone())
        .collect();
    for key in evicted {
        counters.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streak_resets_on_opposite_observation() {
        let mut ledger = LearningLedger::default();
        assert_eq!(ledger.observe_trait(StructuralTrait::Emojis, true), 1);
        assert_eq!(ledger.observe_trait(StructuralTrait::Emojis, true), 2);
        assert_eq!(ledger.observe_trait(StructuralTrait::Emojis, false), 1);
        assert_eq!(ledger.observe_trait(StructuralTrait::Emojis, false), 2);
        // Other traits keep independent runs.
        assert_eq!(ledger.observe_trait(StructuralTrait::Hooks, true), 1);
    }

    #[test]
    fn phrase_promotes_exactly_once_at_threshold() {
        let mut ledger = LearningLedger::default();
        let key = "leverage synergies";
        assert!(ledger.observe_removed_phrase(key, "Leverage synergies", 2).is_none());
        let promoted = ledger
            .observe_removed_phrase(key, "leverage SYNERGIES", 2)
            .unwrap();
        assert_eq!(promoted.display, "Leverage synergies");
        assert!(ledger.observe_removed_phrase(key, "Leverage synergies", 2).is_none());
        assert_eq!(ledger.removed_phrases[key].count, 3);
    }

    #[test]
    fn sentence_lengths_fold_after_consecutive_run() {
        let mut ledger = LearningLedger::default();
        assert_eq!(ledger.observe_sentence_length(20.0, 10.0, 3), None);
        assert_eq!(ledger.observe_sentence_length(20.0, 12.0, 3), None);
        assert_eq!(ledger.observe_sentence_length(20.0, 14.0, 3), Some(12.0));
        assert!(ledger.pending_sentence_lengths.is_empty());
    }

    #[test]
    fn direction_change_restarts_sentence_run() {
        let mut ledger = LearningLedger::default();
        ledger.observe_sentence_length(20.0, 10.0, 3);
        ledger.observe_sentence_length(20.0, 12.0, 3);
        assert_eq!(ledger.observe_sentence_length(20.0, 30.0, 3), None);
        assert_eq!(ledger.pending_sentence_lengths, vec![30.0]);
    }

    #[test]
    fn ledger_round_trips_through_json() {
        let mut ledger = LearningLedger::default();
        ledger.observe_trait(StructuralTrait::BulletPoints, true);
        ledger.observe_vocabulary(VocabularyLevel::Technical);
        ledger.observe_added_phrase("ship it", "Ship it", 3);
        ledger.confirm("bullet_points");

        let json = serde_json::to_string(&ledger).unwrap();
        let back: LearningLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ledger);
    }

    #[test]
    fn compact_evicts_least_seen_counters() {
        let mut ledger = LearningLedger::default();
        for index in 0..(MAX_PHRASE_COUNTERS + 10) {
            ledger.observe_added_phrase(&format!("phrase {index}"), "p", 99);
        }
        // Everything was observed in the closing pass, so nothing goes yet.
        ledger.compact();
        assert_eq!(ledger.added_phrases.len(), MAX_PHRASE_COUNTERS + 10);

        ledger.observe_added_phrase("phrase 0", "p", 99);
        ledger.compact();
        assert_eq!(ledger.added_phrases.len(), MAX_PHRASE_COUNTERS);
        assert_eq!(ledger.added_phrases["phrase 0"].count, 2);
        assert_eq!(ledger.pass, 2);
    }

    #[test]
    fn fresh_phrase_survives_a_saturated_ledger_and_promotes() {
        let mut ledger = LearningLedger::default();
        // Fillers sort after the phrase, so key order alone would evict it.
        for index in 0..600 {
            ledger.observe_removed_phrase(&format!("zz filler {index}"), "filler", 2);
        }
        ledger.compact();

        assert!(ledger.observe_removed_phrase("circle back", "Circle back", 2).is_none());
        ledger.compact();
        assert!(ledger.removed_phrases.contains_key("circle back"));
        assert_eq!(ledger.removed_phrases.len(), MAX_PHRASE_COUNTERS);

        let promoted = ledger.observe_removed_phrase("circle back", "Circle back", 2);
        assert_eq!(promoted.map(|promotion| promotion.display).as_deref(), Some("Circle back"));
        ledger.compact();
        assert!(ledger.removed_phrases.contains_key("circle back"));
    }

    #[test]
    fn among_equal_counts_longer_phrases_are_evicted_first() {
        let mut counters = BTreeMap::new();
        for index in 0..MAX_PHRASE_COUNTERS {
            observe_phrase(&mut counters, 0, &format!("a{index} b c"), "x", 9);
        }
        observe_phrase(&mut counters, 0, "zz pair", "zz pair", 9);
        compact_counters(&mut counters, 1);
        assert_eq!(counters.len(), MAX_PHRASE_COUNTERS);
        assert!(counters.contains_key("zz pair"));
    }
}
