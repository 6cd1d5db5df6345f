//! Aggregates over engine-written emotion scores.
//!
//! Pure functions: nothing here touches the store or the gateway.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{Emotion, EmotionScore, EntryId, ScoredEntry};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DominantEmotion {
    pub emotion: Emotion,
    pub average: f64,
}

/// One point of the mood trend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoodPoint {
    pub entry_date: NaiveDate,
    pub mood_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryEmotion {
    pub entry_id: EntryId,
    pub entry_date: NaiveDate,
    pub main_emotion: Emotion,
    pub intensity: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmotionSummary {
    pub entry_count: usize,
    pub averages: BTreeMap<Emotion, f64>,
    pub dominant: Option<DominantEmotion>,
    pub trend: Vec<MoodPoint>,
    pub entries: Vec<EntryEmotion>,
}

impl EmotionSummary {
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }
}

/// Weighted sum of all dimensions using each emotion's valence.
pub fn mood_score(score: &EmotionScore) -> f64 {
    score
        .intensities()
        .map(|(emotion, intensity)| f64::from(intensity) * emotion.valence())
        .sum()
}

/// Strongest dimension of a single score. Ties go to the earlier emotion in [`Emotion::ALL`].
pub fn main_emotion(score: &EmotionScore) -> (Emotion, f32) {
    score
        .intensities()
        .fold((Emotion::Joy, f32::NEG_INFINITY), |best, (emotion, intensity)| {
            if intensity > best.1 {
                (emotion, intensity)
            } else {
                best
            }
        })
}

/// Summarize scored entries. Input order is kept for the trend and per-entry lists.
pub fn summarize(entries: &[ScoredEntry]) -> EmotionSummary {
    if entries.is_empty() {
        return EmotionSummary::default();
    }

    let count = entries.len() as f64;
    let averages: BTreeMap<Emotion, f64> = Emotion::ALL
        .into_iter()
        .map(|emotion| {
            let total: f64 = entries
                .iter()
                .map(|e| f64::from(e.score.intensity(emotion)))
                .sum();
            (emotion, total / count)
        })
        .collect();

    let mut dominant: Option<DominantEmotion> = None;
    for emotion in Emotion::ALL {
        let average = averages[&emotion];
        if dominant.map_or(true, |d| average > d.average) {
            dominant = Some(DominantEmotion { emotion, average });
        }
    }

    let trend = entries
        .iter()
        .map(|e| MoodPoint {
            entry_date: e.entry_date,
            mood_score: mood_score(&e.score),
        })
        .collect();

    let per_entry = entries
        .iter()
        .map(|e| {
            let (main_emotion, intensity) = main_emotion(&e.score);
            EntryEmotion {
                entry_id: e.score.entry_id,
                entry_date: e.entry_date,
                main_emotion,
                intensity,
            }
        })
        .collect();

    EmotionSummary {
        entry_count: entries.len(),
        averages,
        dominant,
        trend,
        entries: per_entry,
    }
}
