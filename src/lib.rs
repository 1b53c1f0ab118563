//! Local-first catalog cache and sync layer for a driving-theory exam trainer.
//!
//! Mirrors a remote catalog (chapters, licenses, questions, quizzes and their
//! links) into an embedded SQLite database through full-replace
//! synchronization, while tracking user study state (bookmarks, answer
//! history, mistake counters, quiz attempts) that survives across syncs.
//!
//! Provides:
//! - Schema management and a transactional replace-and-repopulate path
//! - A version gate deciding when a full sync is required
//! - Typed query facade over the mirrored catalog
//! - User-state trackers and the exam grading state machine
//!
//! This crate is a library consumed by a presentation layer; it exposes no
//! CLI surface.

pub mod db;
pub mod grading;
pub mod sync;
pub mod types;

pub use db::{
    AnswerHistoryRepository, CatalogRepository, DbError, HistoryRepository, MistakeRepository,
    QuizHistoryRepository, SavedQuestionRepository, SharedRepository, SqliteRepository,
    VersionRepository,
};
pub use grading::{
    AnsweredQuestion, ExamQuestion, ExamResult, ExamSession, ExamState, GradingError,
};
pub use sync::api::{CatalogApi, HttpCatalog};
pub use sync::{
    SyncEngine, SyncError, SyncOutcome, SyncStage, SyncStats, SyncStatus, UpdateCheck,
    HAS_SYNCED_KEY,
};
pub use types::{
    progress_percent, AnswerRecord, CatalogSnapshot, Chapter, ChapterLicenseCount,
    ChapterWithCount, FrequentMistake, License, Question, Quiz, QuizAttempt, QuizSummary,
    SavedQuestion, VersionMarker,
};
