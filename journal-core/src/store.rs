//! Entry Store: journal entries and the engine's emotion scores.
//!
//! `PgEntryStore` talks to the managed PostgreSQL database. `MemoryEntryStore` keeps the same
//! contract in process and backs tests and local runs without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{DateRange, EmotionScore, EntryId, JournalEntry, NewEntry, ScoredEntry};

const ENTRY_COLUMNS: &str = "id, content, entry_date, file_ref, metadata, created_at, updated_at";

#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn create(&self, entry: NewEntry) -> Result<JournalEntry, StorageError>;

    /// Replace the content of an existing entry. `file_ref` of `None` keeps the current one.
    async fn update(
        &self,
        id: EntryId,
        content: &str,
        file_ref: Option<&str>,
    ) -> Result<JournalEntry, StorageError>;

    async fn get(&self, id: EntryId) -> Result<JournalEntry, StorageError>;

    async fn find_by_date(&self, date: NaiveDate) -> Result<Option<JournalEntry>, StorageError>;

    /// Entries ordered by entry date, most recent first.
    async fn list(&self, range: DateRange) -> Result<Vec<JournalEntry>, StorageError>;

    async fn count(&self) -> Result<u64, StorageError>;

    /// Scored entries ordered by entry date, oldest first.
    async fn emotion_scores(&self, range: DateRange) -> Result<Vec<ScoredEntry>, StorageError>;

    async fn emotion_score(&self, entry_id: EntryId)
        -> Result<Option<EmotionScore>, StorageError>;

    fn name(&self) -> &str;
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgEntryStore {
    pool: PgPool,
}

impl PgEntryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EntryStore for PgEntryStore {
    async fn create(&self, entry: NewEntry) -> Result<JournalEntry, StorageError> {
        let query = format!(
            "INSERT INTO documents (content, entry_date, file_ref) VALUES ($1, $2, $3) \
             RETURNING {ENTRY_COLUMNS}"
        );
        let created: JournalEntry = sqlx::query_as(&query)
            .bind(&entry.content)
            .bind(entry.entry_date)
            .bind(&entry.file_ref)
            .fetch_one(&self.pool)
            .await?;

        tracing::info!(entry_id = %created.id, entry_date = %created.entry_date, "Journal entry created");
        Ok(created)
    }

    async fn update(
        &self,
        id: EntryId,
        content: &str,
        file_ref: Option<&str>,
    ) -> Result<JournalEntry, StorageError> {
        let query = format!(
            "UPDATE documents SET content = $2, file_ref = COALESCE($3, file_ref), \
             updated_at = clock_timestamp() WHERE id = $1 RETURNING {ENTRY_COLUMNS}"
        );
        let updated: Option<JournalEntry> = sqlx::query_as(&query)
            .bind(id)
            .bind(content)
            .bind(file_ref)
            .fetch_optional(&self.pool)
            .await?;

        let updated = updated.ok_or(StorageError::NotFound(id))?;
        tracing::info!(entry_id = %id, "Journal entry updated");
        Ok(updated)
    }

    async fn get(&self, id: EntryId) -> Result<JournalEntry, StorageError> {
        let query = format!("SELECT {ENTRY_COLUMNS} FROM documents WHERE id = $1");
        sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::NotFound(id))
    }

    async fn find_by_date(&self, date: NaiveDate) -> Result<Option<JournalEntry>, StorageError> {
        let query = format!(
            "SELECT {ENTRY_COLUMNS} FROM documents WHERE entry_date = $1 \
             ORDER BY created_at DESC LIMIT 1"
        );
        Ok(sqlx::query_as(&query)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list(&self, range: DateRange) -> Result<Vec<JournalEntry>, StorageError> {
        let query = format!(
            "SELECT {ENTRY_COLUMNS} FROM documents \
             WHERE ($1::date IS NULL OR entry_date >= $1) \
               AND ($2::date IS NULL OR entry_date <= $2) \
             ORDER BY entry_date DESC, created_at DESC"
        );
        Ok(sqlx::query_as(&query)
            .bind(range.from)
            .bind(range.to)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.max(0) as u64)
    }

    async fn emotion_scores(&self, range: DateRange) -> Result<Vec<ScoredEntry>, StorageError> {
        Ok(sqlx::query_as(
            "SELECT d.entry_date, d.content, s.entry_id, s.joy, s.sadness, s.love, s.anger, \
                    s.fear, s.surprise, s.analyzed_at \
             FROM emotion_scores s JOIN documents d ON d.id = s.entry_id \
             WHERE ($1::date IS NULL OR d.entry_date >= $1) \
               AND ($2::date IS NULL OR d.entry_date <= $2) \
             ORDER BY d.entry_date ASC, d.created_at ASC",
        )
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn emotion_score(
        &self,
        entry_id: EntryId,
    ) -> Result<Option<EmotionScore>, StorageError> {
        Ok(sqlx::query_as(
            "SELECT entry_id, joy, sadness, love, anger, fear, surprise, analyzed_at \
             FROM emotion_scores WHERE entry_id = $1",
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// In-process
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    entries: RwLock<HashMap<EntryId, JournalEntry>>,
    scores: RwLock<HashMap<EntryId, EmotionScore>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stand-in for the automation engine writing its analysis. Scores must reference an
    /// existing entry.
    pub async fn record_emotion_score(&self, score: EmotionScore) -> Result<(), StorageError> {
        if !self.entries.read().await.contains_key(&score.entry_id) {
            return Err(StorageError::Rejected(format!(
                "emotion score references unknown entry {}",
                score.entry_id
            )));
        }
        self.scores.write().await.insert(score.entry_id, score);
        Ok(())
    }
}

/// Marker strictly after `previous`, so every edit produces a distinct idempotency key.
fn next_marker(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn create(&self, entry: NewEntry) -> Result<JournalEntry, StorageError> {
        let now = Utc::now();
        let created = JournalEntry {
            id: Uuid::new_v4(),
            content: entry.content,
            entry_date: entry.entry_date,
            file_ref: entry.file_ref,
            metadata: None,
            created_at: now,
            updated_at: now,
        };
        let mut entries = self.entries.write().await;
        if entries.values().any(|e| e.entry_date == created.entry_date) {
            return Err(StorageError::Rejected(format!(
                "an entry for {} already exists",
                created.entry_date
            )));
        }
        entries.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        id: EntryId,
        content: &str,
        file_ref: Option<&str>,
    ) -> Result<JournalEntry, StorageError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&id).ok_or(StorageError::NotFound(id))?;
        entry.content = content.to_string();
        if let Some(file_ref) = file_ref {
            entry.file_ref = Some(file_ref.to_string());
        }
        entry.updated_at = next_marker(entry.updated_at);
        Ok(entry.clone())
    }

    async fn get(&self, id: EntryId) -> Result<JournalEntry, StorageError> {
        self.entries
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }

    async fn find_by_date(&self, date: NaiveDate) -> Result<Option<JournalEntry>, StorageError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.entry_date == date)
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn list(&self, range: DateRange) -> Result<Vec<JournalEntry>, StorageError> {
        let mut entries: Vec<JournalEntry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| range.contains(e.entry_date))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.entry_date
                .cmp(&a.entry_date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(entries)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.entries.read().await.len() as u64)
    }

    async fn emotion_scores(&self, range: DateRange) -> Result<Vec<ScoredEntry>, StorageError> {
        let entries = self.entries.read().await;
        let scores = self.scores.read().await;
        let mut scored: Vec<(DateTime<Utc>, ScoredEntry)> = scores
            .values()
            .filter_map(|score| {
                let entry = entries.get(&score.entry_id)?;
                range.contains(entry.entry_date).then(|| {
                    (
                        entry.created_at,
                        ScoredEntry {
                            entry_date: entry.entry_date,
                            content: entry.content.clone(),
                            score: score.clone(),
                        },
                    )
                })
            })
            .collect();
        scored.sort_by(|(a_created, a), (b_created, b)| {
            a.entry_date
                .cmp(&b.entry_date)
                .then_with(|| a_created.cmp(b_created))
        });
        Ok(scored.into_iter().map(|(_, s)| s).collect())
    }

    async fn emotion_score(
        &self,
        entry_id: EntryId,
    ) -> Result<Option<EmotionScore>, StorageError> {
        Ok(self.scores.read().await.get(&entry_id).cloned())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn score_for(entry_id: EntryId, joy: f32) -> EmotionScore {
        EmotionScore {
            entry_id,
            joy,
            sadness: 0.1,
            love: 0.0,
            anger: 0.0,
            fear: 0.0,
            surprise: 0.0,
            analyzed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_returns_created_entry() {
        let store = MemoryEntryStore::new();
        let created = store
            .create(NewEntry::new("Walked by the river", date(2025, 3, 14)))
            .await
            .unwrap();

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.content, "Walked by the river");
        assert_eq!(fetched.entry_date, date(2025, 3, 14));
        assert_eq!(fetched.created_at, fetched.updated_at);
    }

    #[tokio::test]
    async fn second_entry_for_date_is_rejected() {
        let store = MemoryEntryStore::new();
        store.create(NewEntry::new("morning", date(2025, 3, 14))).await.unwrap();
        let err = store
            .create(NewEntry::new("evening", date(2025, 3, 14)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Rejected(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let store = MemoryEntryStore::new();
        let id = Uuid::new_v4();
        let err = store.get(id).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn list_orders_by_entry_date_descending() {
        let store = MemoryEntryStore::new();
        store.create(NewEntry::new("b", date(2025, 3, 2))).await.unwrap();
        store.create(NewEntry::new("c", date(2025, 3, 3))).await.unwrap();
        store.create(NewEntry::new("a", date(2025, 3, 1))).await.unwrap();
        store.create(NewEntry::new("earliest", date(2024, 12, 31))).await.unwrap();

        let listed = store.list(DateRange::default()).await.unwrap();
        let contents: Vec<&str> = listed.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["c", "b", "a", "earliest"]);
    }

    #[tokio::test]
    async fn list_respects_inclusive_range() {
        let store = MemoryEntryStore::new();
        for day in 1..=5 {
            store
                .create(NewEntry::new(format!("day {day}"), date(2025, 3, day)))
                .await
                .unwrap();
        }
        let range = DateRange::new(Some(date(2025, 3, 2)), Some(date(2025, 3, 4)));
        let listed = store.list(range).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].entry_date, date(2025, 3, 4));
        assert_eq!(listed[2].entry_date, date(2025, 3, 2));
    }

    #[tokio::test]
    async fn update_bumps_marker_and_keeps_file_ref() {
        let store = MemoryEntryStore::new();
        let created = store
            .create(NewEntry::new("first", date(2025, 3, 1)).with_file_ref("notes/a.txt"))
            .await
            .unwrap();

        let updated = store.update(created.id, "second", None).await.unwrap();
        assert_eq!(updated.content, "second");
        assert_eq!(updated.file_ref.as_deref(), Some("notes/a.txt"));
        assert!(updated.updated_at > created.updated_at);
        assert_ne!(updated.idempotency_key(), created.idempotency_key());
    }

    #[tokio::test]
    async fn find_by_date_and_count() {
        let store = MemoryEntryStore::new();
        assert_eq!(store.count().await.unwrap(), 0);
        store.create(NewEntry::new("x", date(2025, 3, 1))).await.unwrap();
        assert!(store.find_by_date(date(2025, 3, 1)).await.unwrap().is_some());
        assert!(store.find_by_date(date(2025, 3, 2)).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn scores_must_reference_existing_entry() {
        let store = MemoryEntryStore::new();
        let err = store
            .record_emotion_score(score_for(Uuid::new_v4(), 0.5))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Rejected(_)));
    }

    #[tokio::test]
    async fn emotion_scores_join_entries_oldest_first() {
        let store = MemoryEntryStore::new();
        let later = store.create(NewEntry::new("later", date(2025, 3, 5))).await.unwrap();
        let earlier = store.create(NewEntry::new("earlier", date(2025, 3, 1))).await.unwrap();
        store.create(NewEntry::new("unscored", date(2025, 3, 3))).await.unwrap();

        store.record_emotion_score(score_for(later.id, 0.9)).await.unwrap();
        store.record_emotion_score(score_for(earlier.id, 0.2)).await.unwrap();

        let scored = store.emotion_scores(DateRange::default()).await.unwrap();
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].content, "earlier");
        assert_eq!(scored[1].content, "later");

        let only_later = store
            .emotion_scores(DateRange::new(Some(date(2025, 3, 2)), None))
            .await
            .unwrap();
        assert_eq!(only_later.len(), 1);
        assert_eq!(only_later[0].score.entry_id, later.id);
    }
}
