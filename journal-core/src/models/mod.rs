pub mod chat;
pub mod emotion;
pub mod entry;

pub use chat::{Role, SessionId, Turn};
pub use emotion::{Emotion, EmotionScore, ScoredEntry};
pub use entry::{DateRange, EntryId, JournalEntry, NewEntry};
