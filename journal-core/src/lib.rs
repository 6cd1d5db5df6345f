pub mod analysis;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod journal;
pub mod models;
pub mod session;
pub mod store;

pub use chat::ChatService;
pub use config::JournalConfig;
pub use error::{ConfigurationError, GatewayError, JournalError, SessionError, StorageError};
pub use gateway::{Acknowledgement, Gateway, RetryPolicy, WebhookGatewayClient};
pub use journal::{AnalysisStatus, JournalService, NotificationStatus, SavedEntry};
pub use models::{
    DateRange, Emotion, EmotionScore, EntryId, JournalEntry, NewEntry, Role, ScoredEntry,
    SessionId, Turn,
};
pub use session::{ChatSessionTracker, ExchangeState, SessionSnapshot};
pub use store::{EntryStore, MemoryEntryStore, PgEntryStore};
