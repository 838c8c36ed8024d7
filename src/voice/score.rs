//! Evolution score: a 0-100 summary of how well-trained a profile is.
//!
//! score = 100 × (0.55 · (1 − e^(−iterations/8))
//!              + 0.25 · (1 − e^(−phrases/12))
//!              + 0.20 · confirmed_signals / TRACKED_SIGNALS)
//!
//! Each term is monotonic in its input and saturates, so the sum approaches
//! but never exceeds 100. Because phrase sets and confirmed signals can in
//! principle shrink (manual edits, rollbacks), the published score is the
//! maximum of the previous score and the formula.

use super::ledger::LearningLedger;
use super::types::StyleProfile;

/// Signals that can be confirmed: five structural traits, vocabulary, and
/// sentence length.
pub const TRACKED_SIGNALS: usize = 7;

const ITERATION_WEIGHT: f64 = 0.55;
const PHRASE_WEIGHT: f64 = 0.25;
const CONFIDENCE_WEIGHT: f64 = 0.20;
const ITERATION_SCALE: f64 = 8.0;
const PHRASE_SCALE: f64 = 12.0;

/// Formula value for the given inputs, without the monotonic floor.
pub fn raw_score(iterations: u32, phrase_count: usize, confirmed_signals: usize) -> u8 {
    let iterations = 1.0 - (-(iterations as f64) / ITERATION_SCALE).exp();
    let phrases = 1.0 - (-(phrase_count as f64) / PHRASE_SCALE).exp();
    let confidence = confirmed_signals.min(TRACKED_SIGNALS) as f64 / TRACKED_SIGNALS as f64;

    let score = 100.0
        * (ITERATION_WEIGHT * iterations + PHRASE_WEIGHT * phrases + CONFIDENCE_WEIGHT * confidence);
    score.round().clamp(0.0, 100.0) as u8
}

/// Score to publish after an update: never below the profile's current score.
pub fn evolution_score(profile: &StyleProfile, ledger: &LearningLedger) -> u8 {
    let phrase_count = profile.common_phrases.len() + profile.banned_phrases.len();
    raw_score(
        profile.learning_iterations,
        phrase_count,
        ledger.confirmed_signals.len(),
    )
    .max(profile.evolution_score)
}

/// Starting score for a profile seeded from writing samples: analysis counts
/// as one iteration per sample, capped at three.
pub fn seeded_score(sample_count: usize, phrase_count: usize) -> u8 {
    raw_score(sample_count.min(3) as u32, phrase_count, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_profile_scores_zero() {
        assert_eq!(raw_score(0, 0, 0), 0);
    }

    #[test]
    fn score_is_monotonic_in_every_input() {
        let mut previous = 0;
        for iterations in 0..200 {
            let score = raw_score(iterations, 0, 0);
            assert!(score >= previous);
            previous = score;
        }
        assert!(raw_score(5, 10, 0) >= raw_score(5, 9, 0));
        assert!(raw_score(5, 10, 3) >= raw_score(5, 10, 2));
    }

    #[test]
    fn score_saturates_at_or_below_one_hundred() {
        assert_eq!(raw_score(10_000, 10_000, TRACKED_SIGNALS), 100);
        assert!(raw_score(u32::MAX, usize::MAX, usize::MAX) <= 100);
        assert!(raw_score(8, 0, 0) < 55);
    }

    #[test]
    fn published_score_never_drops() {
        let mut profile = StyleProfile::new_default("u1");
        profile.evolution_score = 80;
        profile.learning_iterations = 1;
        assert_eq!(evolution_score(&profile, &LearningLedger::default()), 80);
    }

    #[test]
    fn first_iteration_moves_score_off_zero() {
        let mut profile = StyleProfile::new_default("u1");
        profile.learning_iterations = 1;
        assert!(evolution_score(&profile, &LearningLedger::default()) > 0);
    }
}
