//! Local SQLite database operations.

pub mod error;
pub mod repository;
pub mod schema;

pub use error::DbError;
pub use repository::{
    AnswerHistoryRepository, CatalogRepository, HistoryRepository, MistakeRepository,
    QuizHistoryRepository, SavedQuestionRepository, SqliteRepository, VersionRepository,
};

use std::sync::{Arc, Mutex};

/// Shared handle to the process-wide repository. Opened once and reused;
/// the embedded store serializes concurrent access internally.
pub type SharedRepository = Arc<Mutex<SqliteRepository>>;
