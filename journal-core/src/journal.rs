//! Journal Service: write to the store, then tell the engine.
//!
//! The two steps are separate and both outcomes are reported. A stored entry stays stored even
//! when the notification fails; the caller sees the failure in [`SavedEntry::notification`].

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::analysis::{self, EmotionSummary};
use crate::error::{GatewayError, JournalError, StorageError};
use crate::gateway::{Acknowledgement, Gateway};
use crate::models::{DateRange, EmotionScore, EntryId, JournalEntry, NewEntry};
use crate::store::EntryStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum NotificationStatus {
    Delivered,
    AlreadyDelivered,
    Failed(#[serde(serialize_with = "display")] GatewayError),
}

impl NotificationStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, NotificationStatus::Failed(_))
    }
}

impl From<Result<Acknowledgement, GatewayError>> for NotificationStatus {
    fn from(result: Result<Acknowledgement, GatewayError>) -> Self {
        match result {
            Ok(Acknowledgement::Delivered) => NotificationStatus::Delivered,
            Ok(Acknowledgement::AlreadyDelivered) => NotificationStatus::AlreadyDelivered,
            Err(e) => NotificationStatus::Failed(e),
        }
    }
}

fn display<S: serde::Serializer>(err: &GatewayError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(err)
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedEntry {
    pub entry: JournalEntry,
    pub was_update: bool,
    pub notification: NotificationStatus,
}

/// Whether the engine has written its analysis for an entry yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "scores", rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Available(EmotionScore),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalStats {
    pub entry_count: u64,
    pub today: NaiveDate,
}

#[derive(Clone)]
pub struct JournalService {
    store: Arc<dyn EntryStore>,
    gateway: Arc<dyn Gateway>,
}

impl JournalService {
    pub fn new(store: Arc<dyn EntryStore>, gateway: Arc<dyn Gateway>) -> Self {
        Self { store, gateway }
    }

    pub fn store(&self) -> &dyn EntryStore {
        self.store.as_ref()
    }

    /// Save the entry for `entry_date`, replacing the content of an existing one for that date.
    pub async fn save_entry(
        &self,
        entry_date: NaiveDate,
        content: &str,
        file_ref: Option<&str>,
    ) -> Result<SavedEntry, JournalError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(JournalError::InvalidInput(
                "entry content must not be empty".to_string(),
            ));
        }

        let (entry, was_update) = match self.store.find_by_date(entry_date).await? {
            Some(existing) => (
                self.store.update(existing.id, content, file_ref).await?,
                true,
            ),
            None => {
                let mut new_entry = NewEntry::new(content, entry_date);
                if let Some(file_ref) = file_ref {
                    new_entry = new_entry.with_file_ref(file_ref);
                }
                match self.store.create(new_entry).await {
                    Ok(created) => (created, false),
                    // Lost a race with another save for the same date.
                    Err(StorageError::Rejected(reason)) => {
                        match self.store.find_by_date(entry_date).await? {
                            Some(existing) => (
                                self.store.update(existing.id, content, file_ref).await?,
                                true,
                            ),
                            None => return Err(StorageError::Rejected(reason).into()),
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let notification = self.notify(&entry).await;
        Ok(SavedEntry {
            entry,
            was_update,
            notification,
        })
    }

    pub async fn create_entry(&self, new_entry: NewEntry) -> Result<SavedEntry, JournalError> {
        if new_entry.content.trim().is_empty() {
            return Err(JournalError::InvalidInput(
                "entry content must not be empty".to_string(),
            ));
        }
        let entry = self.store.create(new_entry).await?;
        let notification = self.notify(&entry).await;
        Ok(SavedEntry {
            entry,
            was_update: false,
            notification,
        })
    }

    pub async fn update_entry(
        &self,
        id: EntryId,
        content: &str,
        file_ref: Option<&str>,
    ) -> Result<SavedEntry, JournalError> {
        if content.trim().is_empty() {
            return Err(JournalError::InvalidInput(
                "entry content must not be empty".to_string(),
            ));
        }
        let entry = self.store.update(id, content.trim(), file_ref).await?;
        let notification = self.notify(&entry).await;
        Ok(SavedEntry {
            entry,
            was_update: true,
            notification,
        })
    }

    /// Re-send the current state of an entry. A state the engine already acknowledged is
    /// not sent again.
    pub async fn renotify(&self, id: EntryId) -> Result<NotificationStatus, JournalError> {
        let entry = self.store.get(id).await?;
        Ok(self.notify(&entry).await)
    }

    async fn notify(&self, entry: &JournalEntry) -> NotificationStatus {
        let status = NotificationStatus::from(self.gateway.notify_entry_changed(entry).await);
        if let NotificationStatus::Failed(e) = &status {
            tracing::warn!(
                entry_id = %entry.id,
                error = %e,
                "Entry saved but the engine was not notified"
            );
        }
        status
    }

    pub async fn get_entry(&self, id: EntryId) -> Result<JournalEntry, JournalError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_entries(&self, range: DateRange) -> Result<Vec<JournalEntry>, JournalError> {
        check_range(range)?;
        Ok(self.store.list(range).await?)
    }

    pub async fn analysis_status(&self, id: EntryId) -> Result<AnalysisStatus, JournalError> {
        // Unknown ids are NotFound, not Pending.
        self.store.get(id).await?;
        Ok(match self.store.emotion_score(id).await? {
            Some(score) => AnalysisStatus::Available(score),
            None => AnalysisStatus::Pending,
        })
    }

    pub async fn emotion_summary(&self, range: DateRange) -> Result<EmotionSummary, JournalError> {
        check_range(range)?;
        let scored = self.store.emotion_scores(range).await?;
        Ok(analysis::summarize(&scored))
    }

    pub async fn stats(&self, today: NaiveDate) -> Result<JournalStats, JournalError> {
        Ok(JournalStats {
            entry_count: self.store.count().await?,
            today,
        })
    }
}

fn check_range(range: DateRange) -> Result<(), JournalError> {
    if range.is_inverted() {
        return Err(JournalError::InvalidInput(
            "`from` must not be after `to`".to_string(),
        ));
    }
    Ok(())
}
