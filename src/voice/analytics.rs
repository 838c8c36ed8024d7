//! Read-only analytics composed from the profile, its snapshots and recent
//! edits. Nothing here is stored.

use super::delta::extract_delta;
use super::types::{
    EditRecord, EvolutionMilestone, ProfileVersionSnapshot, StyleProfile, WritingTraits,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use std::collections::BTreeSet;

/// Learning-iteration counts that earn a timeline entry.
const ITERATION_MILESTONES: &[u32] = &[1, 5, 10, 25, 50, 100];
/// Score bands that earn a timeline entry when first crossed.
const SCORE_MILESTONES: &[u8] = &[25, 50, 75, 90];
pub const BEFORE_AFTER_EXAMPLES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToneShare {
    pub dimension: String,
    pub value: f64,
    /// Fraction of the summed tone values, 0..=1.
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeAfterExample {
    pub content_id: String,
    pub original_text: String,
    pub edited_text: String,
    pub changes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceAnalytics {
    pub evolution_score: u8,
    pub edit_count: i64,
    pub learning_iterations: u32,
    pub tone_distribution: Vec<ToneShare>,
    pub common_phrases: BTreeSet<String>,
    pub banned_phrases: BTreeSet<String>,
    pub writing_traits: WritingTraits,
    pub evolution_timeline: Vec<EvolutionMilestone>,
    pub before_after_examples: Vec<BeforeAfterExample>,
    pub suggestions: Vec<String>,
}

/// Compose analytics. `snapshots` are oldest first, `recent_edits` newest
/// first.
pub fn derive(
    profile: &StyleProfile,
    snapshots: &[ProfileVersionSnapshot],
    recent_edits: &[EditRecord],
    edit_count: i64,
    major_change_threshold: f64,
) -> VoiceAnalytics {
    VoiceAnalytics {
        evolution_score: profile.evolution_score,
        edit_count,
        learning_iterations: profile.learning_iterations,
        tone_distribution: tone_distribution(profile),
        common_phrases: profile.common_phrases.clone(),
        banned_phrases: profile.banned_phrases.clone(),
        writing_traits: profile.writing_traits.clone(),
        evolution_timeline: timeline(snapshots),
        before_after_examples: recent_edits
            .iter()
            .take(BEFORE_AFTER_EXAMPLES as usize)
            .map(|edit| BeforeAfterExample {
                content_id: edit.content_id.clone(),
                original_text: edit.original_text.clone(),
                edited_text: edit.edited_text.clone(),
                changes: extract_delta(&edit.original_text, &edit.edited_text, major_change_threshold)
                    .summary(),
                created_at: edit.created_at,
            })
            .collect(),
        suggestions: suggestions(profile, edit_count),
    }
}

fn tone_distribution(profile: &StyleProfile) -> Vec<ToneShare> {
    let dimensions = profile.tone.dimensions();
    let total: f64 = dimensions.iter().map(|(_, value)| value).sum();
    dimensions
        .iter()
        .map(|(name, value)| ToneShare {
            dimension: name.to_string(),
            value: *value,
            share: if total > 0.0 { value / total } else { 0.0 },
        })
        .collect()
}

/// Walk consecutive snapshots and emit an entry for every notable change.
fn timeline(snapshots: &[ProfileVersionSnapshot]) -> Vec<EvolutionMilestone> {
    let mut milestones = Vec::new();
    let mut previous: Option<&StyleProfile> = None;

    for snapshot in snapshots {
        let current = &snapshot.profile;
        let mut push = |event: String| {
            milestones.push(EvolutionMilestone {
                date: snapshot.created_at,
                event,
                score: current.evolution_score,
            })
        };

        match snapshot.reason.as_str() {
            "reset" => push("Profile reset".into()),
            "manual" => push("Profile edited manually".into()),
            "text_analysis" => push("Profile seeded from writing samples".into()),
            "file_analysis" => push("Profile seeded from an uploaded file".into()),
            "archetype" => push(format!(
                "Adopted the {} archetype",
                current.archetype_base.as_deref().unwrap_or("selected")
            )),
            reason if reason.starts_with("rollback") => push(format!(
                "Rolled back to version {}",
                reason.trim_start_matches("rollback:")
            )),
            _ if previous.is_none() => push("Profile created".into()),
            _ => {}
        }

        let before_iterations = previous.map(|p| p.learning_iterations).unwrap_or(0);
        for &mark in ITERATION_MILESTONES {
            if before_iterations < mark && current.learning_iterations >= mark {
                push(if mark == 1 {
                    "Learned from your first edits".into()
                } else {
                    format!("{mark} learning iterations")
                });
            }
        }

        let before_score = previous.map(|p| p.evolution_score).unwrap_or(0);
        for &band in SCORE_MILESTONES {
            if before_score < band && current.evolution_score >= band {
                push(format!("Evolution score reached {band}"));
            }
        }

        if let Some(previous) = previous {
            for phrase in current.banned_phrases.difference(&previous.banned_phrases) {
                push(format!("Stopped using \"{phrase}\""));
            }
            for phrase in current.common_phrases.difference(&previous.common_phrases) {
                push(format!("Picked up \"{phrase}\""));
            }
        }

        previous = Some(current);
    }
    milestones
}

fn suggestions(profile: &StyleProfile, edit_count: i64) -> Vec<String> {
    let mut suggestions = Vec::new();
    let score = profile.evolution_score;

    if score < 30 {
        suggestions.push(
            "Provide more writing samples or edit a few more drafts so your profile can learn your voice."
                .to_string(),
        );
    } else if score < 70 {
        suggestions.push("Keep editing drafts; your profile is picking up your style.".to_string());
    } else {
        suggestions.push("Your voice profile is well trained. Keep using it!".to_string());
    }

    if edit_count < 5 {
        suggestions.push(format!(
            "Edit at least {} more generated drafts to give the engine enough signal.",
            5 - edit_count
        ));
    }
    if profile.sample_posts.is_empty() {
        suggestions.push("Add a few of your past posts as samples.".to_string());
    }
    if profile.banned_phrases.is_empty() && edit_count >= 10 {
        suggestions.push(
            "Delete phrases you would never say from drafts; repeated removals get banned automatically."
                .to_string(),
        );
    }
    suggestions
}
