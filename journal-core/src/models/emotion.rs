use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::EntryId;

/// The emotional dimensions the automation engine scores each entry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Joy,
    Sadness,
    Love,
    Anger,
    Fear,
    Surprise,
}

impl Emotion {
    pub const ALL: [Emotion; 6] = [
        Emotion::Joy,
        Emotion::Sadness,
        Emotion::Love,
        Emotion::Anger,
        Emotion::Fear,
        Emotion::Surprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Joy => "joy",
            Emotion::Sadness => "sadness",
            Emotion::Love => "love",
            Emotion::Anger => "anger",
            Emotion::Fear => "fear",
            Emotion::Surprise => "surprise",
        }
    }

    /// Signed weight used when folding all dimensions into one mood score.
    pub fn valence(&self) -> f64 {
        match self {
            Emotion::Joy => 1.0,
            Emotion::Love => 0.8,
            Emotion::Surprise => 0.5,
            Emotion::Fear => -0.5,
            Emotion::Sadness => -0.8,
            Emotion::Anger => -0.9,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-written scores for one entry. Each intensity is in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmotionScore {
    pub entry_id: EntryId,
    pub joy: f32,
    pub sadness: f32,
    pub love: f32,
    pub anger: f32,
    pub fear: f32,
    pub surprise: f32,
    pub analyzed_at: DateTime<Utc>,
}

impl EmotionScore {
    pub fn intensity(&self, emotion: Emotion) -> f32 {
        match emotion {
            Emotion::Joy => self.joy,
            Emotion::Sadness => self.sadness,
            Emotion::Love => self.love,
            Emotion::Anger => self.anger,
            Emotion::Fear => self.fear,
            Emotion::Surprise => self.surprise,
        }
    }

    pub fn intensities(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::ALL.into_iter().map(|e| (e, self.intensity(e)))
    }
}

/// An emotion score joined with the entry it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScoredEntry {
    pub entry_date: NaiveDate,
    pub content: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub score: EmotionScore,
}
