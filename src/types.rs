//! Core types for the exam-prep catalog and user study state.

use serde::{Deserialize, Serialize};

/// Topic grouping for questions. Replaced wholesale on sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub name: String,
}

/// License class defining pass/fail and timing rules for its exams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub total_questions: u32,
    pub required_correct: u32,
    pub duration_minutes: u32,
}

/// A multiple-choice question.
///
/// `options` is persisted as a JSON array column; `correct_answer_index`
/// must index into it. A critical question answered incorrectly forces
/// exam failure regardless of score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub content: String,
    pub options: Vec<String>,
    pub correct_answer_index: usize,
    pub is_critical: bool,
    /// Display ordinal, also used as the image lookup key.
    pub number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<i64>,
}

/// One fixed exam instance belonging to a license class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: i64,
    pub name: String,
    pub license_id: i64,
}

/// Quiz joined with its license name for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizSummary {
    pub id: i64,
    pub name: String,
    pub license_id: i64,
    pub license_name: String,
}

/// One row of the append-only version log. The current catalog version is
/// the row with the greatest id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMarker {
    pub id: i64,
    pub version: String,
    pub created_at: String,
}

/// Chapter with its question count (zero for empty chapters).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterWithCount {
    pub id: i64,
    pub name: String,
    pub question_count: usize,
}

/// Question count per (chapter, license) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterLicenseCount {
    pub chapter_id: i64,
    pub license_id: i64,
    pub question_count: usize,
}

/// User bookmark on a question, with the last answer the user picked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedQuestion {
    pub id: i64,
    pub question_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

/// One row per distinct question ever answered; drives review progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub id: i64,
    pub question_id: i64,
    pub selected_option: usize,
}

/// Running mistake counter for a question answered incorrectly at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequentMistake {
    pub id: i64,
    pub question_id: i64,
    pub mistake_count: u32,
    pub last_mistake_at: String,
}

/// One quiz attempt in the append-only attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: i64,
    pub quiz_id: i64,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub passed: bool,
    pub created_at: String,
}

/// Normalized catalog rows ready to be applied in one replace transaction.
///
/// Junction rows are (parent id, referenced id) pairs; every id must exist
/// in the corresponding parent collection for the apply to commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    pub chapters: Vec<Chapter>,
    pub licenses: Vec<License>,
    pub questions: Vec<Question>,
    /// (question_id, license_id)
    pub question_licenses: Vec<(i64, i64)>,
    pub quizzes: Vec<Quiz>,
    /// (quiz_id, question_id)
    pub quiz_questions: Vec<(i64, i64)>,
}

/// Render a 0..=1 progress fraction as a whole percentage.
pub fn progress_percent(progress: f64) -> u32 {
    (progress * 100.0).round() as u32
}
