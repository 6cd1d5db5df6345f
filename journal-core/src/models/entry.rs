use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EntryId = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct JournalEntry {
    pub id: EntryId,
    pub content: String,
    pub entry_date: NaiveDate,
    pub file_ref: Option<String>,
    /// Analysis fields written by the automation engine; never set by this service.
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Key identifying this exact entry state for downstream deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.id, self.updated_at.timestamp_micros())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntry {
    pub content: String,
    pub entry_date: NaiveDate,
    #[serde(default)]
    pub file_ref: Option<String>,
}

impl NewEntry {
    pub fn new(content: impl Into<String>, entry_date: NaiveDate) -> Self {
        Self {
            content: content.into(),
            entry_date,
            file_ref: None,
        }
    }

    pub fn with_file_ref(mut self, file_ref: impl Into<String>) -> Self {
        self.file_ref = Some(file_ref.into());
        self
    }
}

/// Inclusive calendar-date bounds; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }

    pub fn is_inverted(&self) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from > to)
    }
}
