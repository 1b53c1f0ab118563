//! Repository pattern for database access.

use crate::db::error::DbError;
use crate::grading::ExamResult;
use crate::types::{
    AnswerRecord, CatalogSnapshot, Chapter, ChapterLicenseCount, ChapterWithCount,
    FrequentMistake, License, Question, Quiz, QuizAttempt, QuizSummary, SavedQuestion,
    VersionMarker,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

type Result<T> = std::result::Result<T, DbError>;

/// Read operations over the mirrored catalog. All queries tolerate an empty
/// pre-first-sync dataset by returning empty collections.
pub trait CatalogRepository {
    fn list_chapters_with_counts(&self) -> Result<Vec<ChapterWithCount>>;
    fn count_questions_by_chapter_and_license(&self) -> Result<Vec<ChapterLicenseCount>>;
    fn list_licenses(&self) -> Result<Vec<License>>;
    fn license_by_id(&self, id: i64) -> Result<Option<License>>;
    fn total_questions_for_license(&self, license_id: i64) -> Result<usize>;
    fn quizzes_for_license(&self, license_id: i64) -> Result<Vec<QuizSummary>>;
    fn questions_for_quiz(&self, quiz_id: i64) -> Result<Vec<Question>>;
    fn question_by_id(&self, id: i64) -> Result<Option<Question>>;
    fn questions_by_ids(&self, ids: &[i64]) -> Result<Vec<Question>>;
}

/// Read access to the append-only version log.
pub trait VersionRepository {
    /// Latest locally recorded catalog version, by greatest row id.
    fn local_version(&self) -> Result<Option<VersionMarker>>;
}

/// Generic settings/history key-value store, latest-wins per key.
pub trait HistoryRepository {
    fn set_value(&self, key: &str, value: &str) -> Result<()>;
    fn get_value(&self, key: &str) -> Result<Option<String>>;
}

/// Repository for question bookmarks.
pub trait SavedQuestionRepository {
    /// Insert a bookmark row. Duplicates are allowed; callers wanting
    /// uniqueness must check `find_by_question_id` first.
    fn save_question(&self, question_id: i64) -> Result<i64>;
    fn record_answer(&self, question_id: i64, answer: &str) -> Result<()>;
    fn remove_saved(&self, id: i64) -> Result<()>;
    /// Bookmarks with their question resolved for display. `None` when the
    /// question is no longer in the catalog.
    fn list_saved(&self) -> Result<Vec<(SavedQuestion, Option<Question>)>>;
    fn find_by_question_id(&self, question_id: i64) -> Result<Option<SavedQuestion>>;
}

/// Repository for per-question answer history (one row per distinct question).
pub trait AnswerHistoryRepository {
    fn upsert_answer(&self, question_id: i64, selected_option: usize) -> Result<()>;
    fn answer_for_question(&self, question_id: i64) -> Result<Option<AnswerRecord>>;
    fn reviewed_count(&self) -> Result<usize>;
    fn reviewed_count_for_license(&self, license_id: i64) -> Result<usize>;
    /// Distinct reviewed questions over the license total, 0.0 when the
    /// license has no questions.
    fn review_progress_for_license(&self, license_id: i64) -> Result<f64>;
}

/// Repository for mistake frequency counters.
pub trait MistakeRepository {
    fn record_mistake(&self, question_id: i64) -> Result<()>;
    /// Worst offenders first: count descending, then recency descending.
    fn list_mistakes(&self) -> Result<Vec<FrequentMistake>>;
    fn clear_mistake(&self, question_id: i64) -> Result<()>;
    fn clear_all_mistakes(&self) -> Result<()>;
}

/// Repository for the append-only quiz attempt log.
pub trait QuizHistoryRepository {
    fn append_attempt(
        &self,
        quiz_id: i64,
        correct_count: u32,
        incorrect_count: u32,
        passed: bool,
    ) -> Result<i64>;
    fn latest_for_quiz(&self, quiz_id: i64) -> Result<Option<QuizAttempt>>;
    fn list_attempts(&self) -> Result<Vec<QuizAttempt>>;
}

/// SQLite implementation of repositories.
pub struct SqliteRepository {
    conn: Connection,
}

impl SqliteRepository {
    /// Open database at path, creating the schema if necessary.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let repo = Self { conn };
        repo.initialize()?;
        Ok(repo)
    }

    /// Open in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let repo = Self { conn };
        repo.initialize()?;
        Ok(repo)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(super::schema::SCHEMA)?;
        Ok(())
    }

    /// Drop and recreate every owned table. Foreign-key enforcement is
    /// disabled for the drop phase so table order cannot fail it.
    pub fn reset_schema(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        self.conn.execute_batch(super::schema::DROP_ALL)?;
        self.conn.execute_batch(super::schema::SCHEMA)?;
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    /// Apply a catalog snapshot in one transaction: upsert every reference
    /// row by its remote id, rebuild the junction tables, delete rows no
    /// longer present, and append the new version marker.
    ///
    /// Either the whole snapshot commits or nothing does; user-state rows
    /// survive except where their referenced question/quiz was dropped
    /// (cascade delete).
    pub fn replace_catalog(&mut self, snapshot: &CatalogSnapshot, version: &str) -> Result<()> {
        let tx = self.conn.transaction()?;

        for chapter in &snapshot.chapters {
            tx.execute(
                "INSERT INTO chapters (id, name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![chapter.id, chapter.name],
            )?;
        }

        for license in &snapshot.licenses {
            tx.execute(
                "INSERT INTO licenses (id, name, description, total_questions, required_correct, duration_minutes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    total_questions = excluded.total_questions,
                    required_correct = excluded.required_correct,
                    duration_minutes = excluded.duration_minutes",
                params![
                    license.id,
                    license.name,
                    license.description,
                    license.total_questions,
                    license.required_correct,
                    license.duration_minutes,
                ],
            )?;
        }

        for question in &snapshot.questions {
            let options_json = serde_json::to_string(&question.options)
                .map_err(|e| DbError::MalformedData(e.to_string()))?;
            tx.execute(
                "INSERT INTO questions (id, content, options, correct_answer_index, is_critical, number, image_name, explanation, chapter_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    options = excluded.options,
                    correct_answer_index = excluded.correct_answer_index,
                    is_critical = excluded.is_critical,
                    number = excluded.number,
                    image_name = excluded.image_name,
                    explanation = excluded.explanation,
                    chapter_id = excluded.chapter_id",
                params![
                    question.id,
                    question.content,
                    options_json,
                    question.correct_answer_index,
                    question.is_critical,
                    question.number,
                    question.image_name,
                    question.explanation,
                    question.chapter_id,
                ],
            )?;
        }

        for quiz in &snapshot.quizzes {
            tx.execute(
                "INSERT INTO quizzes (id, name, license_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    license_id = excluded.license_id",
                params![quiz.id, quiz.name, quiz.license_id],
            )?;
        }

        // Junction tables carry no user state; rebuild them from scratch.
        tx.execute("DELETE FROM question_licenses", [])?;
        for (question_id, license_id) in &snapshot.question_licenses {
            tx.execute(
                "INSERT INTO question_licenses (question_id, license_id) VALUES (?1, ?2)",
                params![question_id, license_id],
            )?;
        }

        tx.execute("DELETE FROM quiz_questions", [])?;
        for (quiz_id, question_id) in &snapshot.quiz_questions {
            tx.execute(
                "INSERT INTO quiz_questions (quiz_id, question_id) VALUES (?1, ?2)",
                params![quiz_id, question_id],
            )?;
        }

        // Drop rows the remote no longer knows about, children before
        // parents so cascades clean dependent user state.
        let quiz_ids: Vec<i64> = snapshot.quizzes.iter().map(|q| q.id).collect();
        Self::delete_stale(&tx, "quizzes", &quiz_ids)?;
        let question_ids: Vec<i64> = snapshot.questions.iter().map(|q| q.id).collect();
        Self::delete_stale(&tx, "questions", &question_ids)?;
        let chapter_ids: Vec<i64> = snapshot.chapters.iter().map(|c| c.id).collect();
        Self::delete_stale(&tx, "chapters", &chapter_ids)?;
        let license_ids: Vec<i64> = snapshot.licenses.iter().map(|l| l.id).collect();
        Self::delete_stale(&tx, "licenses", &license_ids)?;

        tx.execute(
            "INSERT INTO versions (version, created_at) VALUES (?1, ?2)",
            params![version, Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn delete_stale(tx: &rusqlite::Transaction, table: &str, keep_ids: &[i64]) -> Result<()> {
        if keep_ids.is_empty() {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
            return Ok(());
        }

        let placeholders: String = keep_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM {} WHERE id NOT IN ({})", table, placeholders);
        let mut stmt = tx.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            keep_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        stmt.execute(params.as_slice())?;
        Ok(())
    }

    /// Persist a graded exam result: append to the attempt log, record each
    /// answered question in the answer history, and bump mistake counters
    /// for wrong answers. One transaction; a failure on any row leaves all
    /// three trackers untouched.
    pub fn record_exam_outcome(&mut self, result: &ExamResult) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO quiz_history (quiz_id, correct_count, incorrect_count, passed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.quiz_id,
                result.correct_count,
                result.incorrect_count,
                result.passed,
                now
            ],
        )?;

        for answer in &result.answers {
            tx.execute(
                "INSERT INTO history_questions (question_id, selected_option) VALUES (?1, ?2)
                 ON CONFLICT(question_id) DO UPDATE SET selected_option = excluded.selected_option",
                params![answer.question_id, answer.selected_option],
            )?;
            if !answer.correct {
                tx.execute(
                    "INSERT INTO frequent_mistakes (question_id, mistake_count, last_mistake_at)
                     VALUES (?1, 1, ?2)
                     ON CONFLICT(question_id) DO UPDATE SET
                        mistake_count = mistake_count + 1,
                        last_mistake_at = excluded.last_mistake_at",
                    params![answer.question_id, now],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete every user-state row. Reference tables are untouched.
    pub fn clear_user_state(&self) -> Result<()> {
        self.conn.execute("DELETE FROM saved_questions", [])?;
        self.conn.execute("DELETE FROM history_questions", [])?;
        self.conn.execute("DELETE FROM frequent_mistakes", [])?;
        self.conn.execute("DELETE FROM quiz_history", [])?;
        Ok(())
    }

    fn question_from_row(row: &rusqlite::Row) -> rusqlite::Result<RawQuestionRow> {
        Ok(RawQuestionRow {
            id: row.get(0)?,
            content: row.get(1)?,
            options_json: row.get(2)?,
            correct_answer_index: row.get(3)?,
            is_critical: row.get(4)?,
            number: row.get(5)?,
            image_name: row.get(6)?,
            explanation: row.get(7)?,
            chapter_id: row.get(8)?,
        })
    }
}

const QUESTION_COLUMNS: &str =
    "id, content, options, correct_answer_index, is_critical, number, image_name, explanation, chapter_id";

/// Question row before the options column has been deserialized.
struct RawQuestionRow {
    id: i64,
    content: String,
    options_json: String,
    correct_answer_index: usize,
    is_critical: bool,
    number: i64,
    image_name: Option<String>,
    explanation: Option<String>,
    chapter_id: Option<i64>,
}

impl RawQuestionRow {
    fn into_question(self) -> Result<Question> {
        let options: Vec<String> = serde_json::from_str(&self.options_json).map_err(|e| {
            DbError::MalformedData(format!("question {}: bad options: {}", self.id, e))
        })?;

        if self.correct_answer_index >= options.len() {
            return Err(DbError::MalformedData(format!(
                "question {}: correct_answer_index {} out of range for {} options",
                self.id,
                self.correct_answer_index,
                options.len()
            )));
        }

        Ok(Question {
            id: self.id,
            content: self.content,
            options,
            correct_answer_index: self.correct_answer_index,
            is_critical: self.is_critical,
            number: self.number,
            image_name: self.image_name,
            explanation: self.explanation,
            chapter_id: self.chapter_id,
        })
    }
}

impl CatalogRepository for SqliteRepository {
    fn list_chapters_with_counts(&self) -> Result<Vec<ChapterWithCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.name, COUNT(q.id)
             FROM chapters c
             LEFT JOIN questions q ON q.chapter_id = c.id
             GROUP BY c.id, c.name
             ORDER BY c.id",
        )?;

        let chapters = stmt
            .query_map([], |row| {
                Ok(ChapterWithCount {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    question_count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(chapters)
    }

    fn count_questions_by_chapter_and_license(&self) -> Result<Vec<ChapterLicenseCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT q.chapter_id, ql.license_id, COUNT(*)
             FROM questions q
             JOIN question_licenses ql ON ql.question_id = q.id
             WHERE q.chapter_id IS NOT NULL
             GROUP BY q.chapter_id, ql.license_id
             ORDER BY q.chapter_id, ql.license_id",
        )?;

        let counts = stmt
            .query_map([], |row| {
                Ok(ChapterLicenseCount {
                    chapter_id: row.get(0)?,
                    license_id: row.get(1)?,
                    question_count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(counts)
    }

    fn list_licenses(&self) -> Result<Vec<License>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, total_questions, required_correct, duration_minutes
             FROM licenses ORDER BY id",
        )?;

        let licenses = stmt
            .query_map([], |row| {
                Ok(License {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    total_questions: row.get(3)?,
                    required_correct: row.get(4)?,
                    duration_minutes: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(licenses)
    }

    fn license_by_id(&self, id: i64) -> Result<Option<License>> {
        self.conn
            .query_row(
                "SELECT id, name, description, total_questions, required_correct, duration_minutes
                 FROM licenses WHERE id = ?1",
                params![id],
                |row| {
                    Ok(License {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        total_questions: row.get(3)?,
                        required_correct: row.get(4)?,
                        duration_minutes: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    fn total_questions_for_license(&self, license_id: i64) -> Result<usize> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM question_licenses WHERE license_id = ?1",
                params![license_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    fn quizzes_for_license(&self, license_id: i64) -> Result<Vec<QuizSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT z.id, z.name, z.license_id, l.name
             FROM quizzes z
             JOIN licenses l ON l.id = z.license_id
             WHERE z.license_id = ?1
             ORDER BY z.id",
        )?;

        let quizzes = stmt
            .query_map(params![license_id], |row| {
                Ok(QuizSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    license_id: row.get(2)?,
                    license_name: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(quizzes)
    }

    fn questions_for_quiz(&self, quiz_id: i64) -> Result<Vec<Question>> {
        // No order is persisted for quiz membership; question number gives a
        // stable presentation order.
        let sql = format!(
            "SELECT {} FROM questions q
             JOIN quiz_questions qq ON qq.question_id = q.id
             WHERE qq.quiz_id = ?1
             ORDER BY q.number ASC",
            QUESTION_COLUMNS
                .split(", ")
                .map(|c| format!("q.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let rows = stmt
            .query_map(params![quiz_id], Self::question_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawQuestionRow::into_question).collect()
    }

    fn question_by_id(&self, id: i64) -> Result<Option<Question>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM questions WHERE id = ?1", QUESTION_COLUMNS),
                params![id],
                Self::question_from_row,
            )
            .optional()?;

        row.map(RawQuestionRow::into_question).transpose()
    }

    fn questions_by_ids(&self, ids: &[i64]) -> Result<Vec<Question>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: String = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT {} FROM questions WHERE id IN ({})",
            QUESTION_COLUMNS, placeholders
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();

        let rows = stmt
            .query_map(params.as_slice(), Self::question_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawQuestionRow::into_question).collect()
    }
}

impl VersionRepository for SqliteRepository {
    fn local_version(&self) -> Result<Option<VersionMarker>> {
        self.conn
            .query_row(
                "SELECT id, version, created_at FROM versions ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(VersionMarker {
                        id: row.get(0)?,
                        version: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }
}

impl HistoryRepository for SqliteRepository {
    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO history (key, value, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                created_at = excluded.created_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM history WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }
}

impl SavedQuestionRepository for SqliteRepository {
    fn save_question(&self, question_id: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO saved_questions (question_id) VALUES (?1)",
            params![question_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn record_answer(&self, question_id: i64, answer: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE saved_questions SET answer = ?1 WHERE question_id = ?2",
            params![answer, question_id],
        )?;
        Ok(())
    }

    fn remove_saved(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM saved_questions WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn list_saved(&self) -> Result<Vec<(SavedQuestion, Option<Question>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.question_id, s.answer,
                    q.id, q.content, q.options, q.correct_answer_index, q.is_critical,
                    q.number, q.image_name, q.explanation, q.chapter_id
             FROM saved_questions s
             LEFT JOIN questions q ON q.id = s.question_id
             ORDER BY s.id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let saved = SavedQuestion {
                    id: row.get(0)?,
                    question_id: row.get(1)?,
                    answer: row.get(2)?,
                };
                let raw = match row.get::<_, Option<i64>>(3)? {
                    Some(id) => Some(RawQuestionRow {
                        id,
                        content: row.get(4)?,
                        options_json: row.get(5)?,
                        correct_answer_index: row.get(6)?,
                        is_critical: row.get(7)?,
                        number: row.get(8)?,
                        image_name: row.get(9)?,
                        explanation: row.get(10)?,
                        chapter_id: row.get(11)?,
                    }),
                    None => None,
                };
                Ok((saved, raw))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(saved, raw)| Ok((saved, raw.map(RawQuestionRow::into_question).transpose()?)))
            .collect()
    }

    fn find_by_question_id(&self, question_id: i64) -> Result<Option<SavedQuestion>> {
        self.conn
            .query_row(
                "SELECT id, question_id, answer FROM saved_questions WHERE question_id = ?1 LIMIT 1",
                params![question_id],
                |row| {
                    Ok(SavedQuestion {
                        id: row.get(0)?,
                        question_id: row.get(1)?,
                        answer: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }
}

impl AnswerHistoryRepository for SqliteRepository {
    fn upsert_answer(&self, question_id: i64, selected_option: usize) -> Result<()> {
        self.conn.execute(
            "INSERT INTO history_questions (question_id, selected_option) VALUES (?1, ?2)
             ON CONFLICT(question_id) DO UPDATE SET selected_option = excluded.selected_option",
            params![question_id, selected_option],
        )?;
        Ok(())
    }

    fn answer_for_question(&self, question_id: i64) -> Result<Option<AnswerRecord>> {
        self.conn
            .query_row(
                "SELECT id, question_id, selected_option FROM history_questions WHERE question_id = ?1",
                params![question_id],
                |row| {
                    Ok(AnswerRecord {
                        id: row.get(0)?,
                        question_id: row.get(1)?,
                        selected_option: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    fn reviewed_count(&self) -> Result<usize> {
        self.conn
            .query_row("SELECT COUNT(*) FROM history_questions", [], |row| {
                row.get(0)
            })
            .map_err(Into::into)
    }

    fn reviewed_count_for_license(&self, license_id: i64) -> Result<usize> {
        self.conn
            .query_row(
                "SELECT COUNT(DISTINCT h.question_id)
                 FROM history_questions h
                 JOIN question_licenses ql ON ql.question_id = h.question_id
                 WHERE ql.license_id = ?1",
                params![license_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    fn review_progress_for_license(&self, license_id: i64) -> Result<f64> {
        let total = self.total_questions_for_license(license_id)?;
        if total == 0 {
            return Ok(0.0);
        }
        let reviewed = self.reviewed_count_for_license(license_id)?;
        Ok(reviewed as f64 / total as f64)
    }
}

impl MistakeRepository for SqliteRepository {
    fn record_mistake(&self, question_id: i64) -> Result<()> {
        // Single atomic upsert-with-delta; no read-then-write window.
        self.conn.execute(
            "INSERT INTO frequent_mistakes (question_id, mistake_count, last_mistake_at)
             VALUES (?1, 1, ?2)
             ON CONFLICT(question_id) DO UPDATE SET
                mistake_count = mistake_count + 1,
                last_mistake_at = excluded.last_mistake_at",
            params![question_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn list_mistakes(&self) -> Result<Vec<FrequentMistake>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, question_id, mistake_count, last_mistake_at
             FROM frequent_mistakes
             ORDER BY mistake_count DESC, last_mistake_at DESC",
        )?;

        let mistakes = stmt
            .query_map([], |row| {
                Ok(FrequentMistake {
                    id: row.get(0)?,
                    question_id: row.get(1)?,
                    mistake_count: row.get(2)?,
                    last_mistake_at: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(mistakes)
    }

    fn clear_mistake(&self, question_id: i64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM frequent_mistakes WHERE question_id = ?1",
            params![question_id],
        )?;
        Ok(())
    }

    fn clear_all_mistakes(&self) -> Result<()> {
        self.conn.execute("DELETE FROM frequent_mistakes", [])?;
        Ok(())
    }
}

impl QuizHistoryRepository for SqliteRepository {
    fn append_attempt(
        &self,
        quiz_id: i64,
        correct_count: u32,
        incorrect_count: u32,
        passed: bool,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO quiz_history (quiz_id, correct_count, incorrect_count, passed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                quiz_id,
                correct_count,
                incorrect_count,
                passed,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn latest_for_quiz(&self, quiz_id: i64) -> Result<Option<QuizAttempt>> {
        self.conn
            .query_row(
                "SELECT id, quiz_id, correct_count, incorrect_count, passed, created_at
                 FROM quiz_history WHERE quiz_id = ?1
                 ORDER BY id DESC LIMIT 1",
                params![quiz_id],
                |row| {
                    Ok(QuizAttempt {
                        id: row.get(0)?,
                        quiz_id: row.get(1)?,
                        correct_count: row.get(2)?,
                        incorrect_count: row.get(3)?,
                        passed: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    fn list_attempts(&self) -> Result<Vec<QuizAttempt>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, quiz_id, correct_count, incorrect_count, passed, created_at
             FROM quiz_history ORDER BY created_at DESC, id DESC",
        )?;

        let attempts = stmt
            .query_map([], |row| {
                Ok(QuizAttempt {
                    id: row.get(0)?,
                    quiz_id: row.get(1)?,
                    correct_count: row.get(2)?,
                    incorrect_count: row.get(3)?,
                    passed: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::AnsweredQuestion;
    use pretty_assertions::assert_eq;

    fn question(id: i64, number: i64, chapter_id: Option<i64>, critical: bool) -> Question {
        Question {
            id,
            content: format!("question {}", id),
            options: vec![
                "option a".to_string(),
                "option b".to_string(),
                "option c".to_string(),
                "option d".to_string(),
            ],
            correct_answer_index: 1,
            is_critical: critical,
            number,
            image_name: None,
            explanation: Some(format!("because {}", id)),
            chapter_id,
        }
    }

    fn sample_snapshot() -> CatalogSnapshot {
        CatalogSnapshot {
            chapters: vec![
                Chapter { id: 1, name: "Rules of the road".to_string() },
                Chapter { id: 2, name: "Road signs".to_string() },
                Chapter { id: 3, name: "Vehicle handling".to_string() },
            ],
            licenses: vec![
                License {
                    id: 1,
                    name: "A1".to_string(),
                    description: "Motorcycles up to 125cc".to_string(),
                    total_questions: 25,
                    required_correct: 21,
                    duration_minutes: 19,
                },
                License {
                    id: 2,
                    name: "B1".to_string(),
                    description: "Cars up to 9 seats".to_string(),
                    total_questions: 30,
                    required_correct: 27,
                    duration_minutes: 20,
                },
            ],
            questions: vec![
                question(10, 3, Some(1), true),
                question(11, 1, Some(1), false),
                question(12, 2, Some(2), false),
                question(13, 4, None, false),
            ],
            question_licenses: vec![(10, 1), (10, 2), (11, 1), (12, 2), (13, 2)],
            quizzes: vec![
                Quiz { id: 100, name: "A1 exam 1".to_string(), license_id: 1 },
                Quiz { id: 101, name: "B1 exam 1".to_string(), license_id: 2 },
            ],
            quiz_questions: vec![(100, 10), (100, 11), (101, 10), (101, 12), (101, 13)],
        }
    }

    fn repo_with_catalog() -> SqliteRepository {
        let mut repo = SqliteRepository::open_in_memory().unwrap();
        repo.replace_catalog(&sample_snapshot(), "1.0.0").unwrap();
        repo
    }

    fn count(repo: &SqliteRepository, table: &str) -> usize {
        repo.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_empty_dataset_queries_return_empty() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        assert_eq!(repo.list_chapters_with_counts().unwrap(), vec![]);
        assert_eq!(repo.count_questions_by_chapter_and_license().unwrap(), vec![]);
        assert_eq!(repo.quizzes_for_license(1).unwrap(), vec![]);
        assert_eq!(repo.questions_for_quiz(1).unwrap(), vec![]);
        assert_eq!(repo.question_by_id(1).unwrap(), None);
        assert_eq!(repo.questions_by_ids(&[1, 2]).unwrap(), vec![]);
        assert_eq!(repo.total_questions_for_license(1).unwrap(), 0);
        assert_eq!(repo.local_version().unwrap(), None);
    }

    #[test]
    fn test_replace_catalog_populates_all_tables() {
        let repo = repo_with_catalog();
        assert_eq!(count(&repo, "chapters"), 3);
        assert_eq!(count(&repo, "licenses"), 2);
        assert_eq!(count(&repo, "questions"), 4);
        assert_eq!(count(&repo, "question_licenses"), 5);
        assert_eq!(count(&repo, "quizzes"), 2);
        assert_eq!(count(&repo, "quiz_questions"), 5);

        let version = repo.local_version().unwrap().unwrap();
        assert_eq!(version.version, "1.0.0");
    }

    #[test]
    fn test_replace_catalog_idempotent() {
        let mut repo = repo_with_catalog();
        repo.replace_catalog(&sample_snapshot(), "1.0.0").unwrap();

        assert_eq!(count(&repo, "chapters"), 3);
        assert_eq!(count(&repo, "questions"), 4);
        assert_eq!(count(&repo, "question_licenses"), 5);
        assert_eq!(count(&repo, "quiz_questions"), 5);
        // Remote ids are stable across replaces.
        assert_eq!(repo.question_by_id(10).unwrap().unwrap().id, 10);
    }

    #[test]
    fn test_replace_rolls_back_on_constraint_violation() {
        let mut repo = repo_with_catalog();

        let mut bad = sample_snapshot();
        bad.chapters.push(Chapter { id: 4, name: "Extra".to_string() });
        // License 999 does not exist, so the junction insert must fail and
        // roll the whole snapshot back.
        bad.question_licenses.push((10, 999));

        let err = repo.replace_catalog(&bad, "2.0.0");
        assert!(err.is_err());

        assert_eq!(count(&repo, "chapters"), 3);
        assert_eq!(count(&repo, "question_licenses"), 5);
        assert_eq!(repo.local_version().unwrap().unwrap().version, "1.0.0");
    }

    #[test]
    fn test_replace_preserves_user_state_for_surviving_questions() {
        let mut repo = repo_with_catalog();
        repo.save_question(10).unwrap();
        repo.upsert_answer(10, 1).unwrap();
        repo.record_mistake(10).unwrap();

        repo.replace_catalog(&sample_snapshot(), "1.1.0").unwrap();

        assert_eq!(repo.list_saved().unwrap().len(), 1);
        assert_eq!(repo.reviewed_count().unwrap(), 1);
        assert_eq!(repo.list_mistakes().unwrap().len(), 1);
    }

    #[test]
    fn test_replace_cascades_user_state_of_dropped_question() {
        let mut repo = repo_with_catalog();
        repo.save_question(13).unwrap();
        repo.upsert_answer(13, 0).unwrap();
        repo.record_mistake(13).unwrap();

        let mut next = sample_snapshot();
        next.questions.retain(|q| q.id != 13);
        next.question_licenses.retain(|(qid, _)| *qid != 13);
        next.quiz_questions.retain(|(_, qid)| *qid != 13);
        repo.replace_catalog(&next, "1.1.0").unwrap();

        assert_eq!(repo.question_by_id(13).unwrap(), None);
        assert_eq!(repo.list_saved().unwrap(), vec![]);
        assert_eq!(repo.reviewed_count().unwrap(), 0);
        assert_eq!(repo.list_mistakes().unwrap(), vec![]);
    }

    #[test]
    fn test_reset_schema_drops_everything() {
        let repo = repo_with_catalog();
        repo.save_question(10).unwrap();

        repo.reset_schema().unwrap();

        assert_eq!(count(&repo, "chapters"), 0);
        assert_eq!(count(&repo, "saved_questions"), 0);
        assert_eq!(repo.local_version().unwrap(), None);
        // Schema is usable again after the reset.
        assert_eq!(repo.list_chapters_with_counts().unwrap(), vec![]);
    }

    #[test]
    fn test_chapters_with_counts_zero_fill() {
        let repo = repo_with_catalog();
        let chapters = repo.list_chapters_with_counts().unwrap();
        assert_eq!(
            chapters,
            vec![
                ChapterWithCount { id: 1, name: "Rules of the road".to_string(), question_count: 2 },
                ChapterWithCount { id: 2, name: "Road signs".to_string(), question_count: 1 },
                ChapterWithCount { id: 3, name: "Vehicle handling".to_string(), question_count: 0 },
            ]
        );
    }

    #[test]
    fn test_count_questions_by_chapter_and_license() {
        let repo = repo_with_catalog();
        let counts = repo.count_questions_by_chapter_and_license().unwrap();
        assert_eq!(
            counts,
            vec![
                ChapterLicenseCount { chapter_id: 1, license_id: 1, question_count: 2 },
                ChapterLicenseCount { chapter_id: 1, license_id: 2, question_count: 1 },
                ChapterLicenseCount { chapter_id: 2, license_id: 2, question_count: 1 },
            ]
        );
    }

    #[test]
    fn test_quizzes_for_license_carry_license_name() {
        let repo = repo_with_catalog();
        let quizzes = repo.quizzes_for_license(2).unwrap();
        assert_eq!(
            quizzes,
            vec![QuizSummary {
                id: 101,
                name: "B1 exam 1".to_string(),
                license_id: 2,
                license_name: "B1".to_string(),
            }]
        );
    }

    #[test]
    fn test_questions_for_quiz_ordered_by_number() {
        let repo = repo_with_catalog();
        let questions = repo.questions_for_quiz(101).unwrap();
        let numbers: Vec<i64> = questions.iter().map(|q| q.number).collect();
        assert_eq!(numbers, vec![2, 3, 4]);
    }

    #[test]
    fn test_questions_by_ids_batch_fetch() {
        let repo = repo_with_catalog();
        let questions = repo.questions_by_ids(&[10, 12, 999]).unwrap();
        let mut ids: Vec<i64> = questions.iter().map(|q| q.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![10, 12]);
    }

    #[test]
    fn test_malformed_options_surface_at_read_time() {
        let repo = repo_with_catalog();
        repo.conn
            .execute("UPDATE questions SET options = 'not json' WHERE id = 10", [])
            .unwrap();

        let err = repo.question_by_id(10);
        assert!(matches!(err, Err(DbError::MalformedData(_))));
    }

    #[test]
    fn test_out_of_range_answer_index_is_malformed() {
        let repo = repo_with_catalog();
        repo.conn
            .execute("UPDATE questions SET correct_answer_index = 9 WHERE id = 10", [])
            .unwrap();

        let err = repo.question_by_id(10);
        assert!(matches!(err, Err(DbError::MalformedData(_))));
    }

    #[test]
    fn test_saved_question_tracker() {
        let repo = repo_with_catalog();
        assert_eq!(repo.find_by_question_id(11).unwrap(), None);

        let id = repo.save_question(11).unwrap();
        repo.record_answer(11, "option b").unwrap();

        let found = repo.find_by_question_id(11).unwrap().unwrap();
        assert_eq!(found.answer.as_deref(), Some("option b"));

        let listed = repo.list_saved().unwrap();
        assert_eq!(listed.len(), 1);
        let (saved, question) = &listed[0];
        assert_eq!(saved.question_id, 11);
        assert_eq!(question.as_ref().unwrap().content, "question 11");

        repo.remove_saved(id).unwrap();
        assert_eq!(repo.list_saved().unwrap(), vec![]);
    }

    #[test]
    fn test_answer_history_counts_distinct_questions() {
        let repo = repo_with_catalog();
        repo.upsert_answer(10, 0).unwrap();
        repo.upsert_answer(10, 2).unwrap();
        repo.upsert_answer(10, 1).unwrap();

        assert_eq!(repo.reviewed_count().unwrap(), 1);
        let record = repo.answer_for_question(10).unwrap().unwrap();
        assert_eq!(record.selected_option, 1);
        assert_eq!(repo.answer_for_question(11).unwrap(), None);
    }

    #[test]
    fn test_mistake_accumulation() {
        let repo = repo_with_catalog();
        repo.record_mistake(12).unwrap();
        repo.record_mistake(12).unwrap();
        repo.record_mistake(12).unwrap();

        let mistakes = repo.list_mistakes().unwrap();
        assert_eq!(mistakes.len(), 1);
        assert_eq!(mistakes[0].question_id, 12);
        assert_eq!(mistakes[0].mistake_count, 3);
    }

    #[test]
    fn test_mistakes_ordered_worst_first() {
        let repo = repo_with_catalog();
        repo.record_mistake(10).unwrap();
        repo.record_mistake(12).unwrap();
        repo.record_mistake(12).unwrap();

        let mistakes = repo.list_mistakes().unwrap();
        assert_eq!(mistakes[0].question_id, 12);
        assert_eq!(mistakes[1].question_id, 10);

        repo.clear_mistake(12).unwrap();
        assert_eq!(repo.list_mistakes().unwrap().len(), 1);
        repo.clear_all_mistakes().unwrap();
        assert_eq!(repo.list_mistakes().unwrap(), vec![]);
    }

    #[test]
    fn test_quiz_history_append_only_latest_wins() {
        let repo = repo_with_catalog();
        repo.append_attempt(100, 20, 5, false).unwrap();
        repo.append_attempt(100, 23, 2, true).unwrap();

        assert_eq!(repo.list_attempts().unwrap().len(), 2);
        let latest = repo.latest_for_quiz(100).unwrap().unwrap();
        assert_eq!(latest.correct_count, 23);
        assert!(latest.passed);

        assert_eq!(repo.latest_for_quiz(101).unwrap(), None);
    }

    #[test]
    fn test_history_kv_latest_wins() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        repo.set_value("current_license", "A1").unwrap();
        repo.set_value("current_license", "B1").unwrap();

        assert_eq!(repo.get_value("current_license").unwrap().as_deref(), Some("B1"));
        assert_eq!(repo.get_value("missing").unwrap(), None);
        assert_eq!(count(&repo, "history"), 1);
    }

    #[test]
    fn test_review_progress_for_license() {
        let mut repo = SqliteRepository::open_in_memory().unwrap();

        let mut snapshot = sample_snapshot();
        snapshot.questions = (0..10).map(|i| question(20 + i, i, Some(1), false)).collect();
        snapshot.question_licenses = (0..10).map(|i| (20 + i, 1)).collect();
        snapshot.quiz_questions = vec![];
        repo.replace_catalog(&snapshot, "1.0.0").unwrap();

        for id in 20..24 {
            repo.upsert_answer(id, 0).unwrap();
        }

        let progress = repo.review_progress_for_license(1).unwrap();
        assert!((progress - 0.4).abs() < 1e-9);
        assert_eq!(crate::types::progress_percent(progress), 40);

        // A license with no questions reports zero progress, not an error.
        assert_eq!(repo.review_progress_for_license(99).unwrap(), 0.0);
    }

    #[test]
    fn test_record_exam_outcome_persists_everything_once() {
        let mut repo = repo_with_catalog();
        let result = ExamResult {
            quiz_id: 101,
            correct_count: 2,
            incorrect_count: 1,
            has_critical_failure: false,
            passed: false,
            answers: vec![
                AnsweredQuestion { question_id: 10, selected_option: 1, correct: true },
                AnsweredQuestion { question_id: 12, selected_option: 1, correct: true },
                AnsweredQuestion { question_id: 13, selected_option: 0, correct: false },
            ],
        };

        repo.record_exam_outcome(&result).unwrap();

        let latest = repo.latest_for_quiz(101).unwrap().unwrap();
        assert_eq!(latest.correct_count, 2);
        assert_eq!(latest.incorrect_count, 1);
        assert!(!latest.passed);

        assert_eq!(repo.reviewed_count().unwrap(), 3);
        let mistakes = repo.list_mistakes().unwrap();
        assert_eq!(mistakes.len(), 1);
        assert_eq!(mistakes[0].question_id, 13);
    }

    #[test]
    fn test_record_exam_outcome_rolls_back_on_unknown_question() {
        let mut repo = repo_with_catalog();
        let result = ExamResult {
            quiz_id: 101,
            correct_count: 1,
            incorrect_count: 2,
            has_critical_failure: false,
            passed: false,
            answers: vec![
                AnsweredQuestion { question_id: 10, selected_option: 0, correct: true },
                // Not in the catalog: the history insert violates its
                // foreign key and the whole persist must roll back.
                AnsweredQuestion { question_id: 999, selected_option: 1, correct: false },
            ],
        };

        let err = repo.record_exam_outcome(&result);
        assert!(err.is_err());

        assert_eq!(count(&repo, "quiz_history"), 0);
        assert_eq!(repo.latest_for_quiz(101).unwrap(), None);
        assert_eq!(repo.reviewed_count().unwrap(), 0);
        assert_eq!(repo.list_mistakes().unwrap(), vec![]);
    }

    #[test]
    fn test_clear_user_state_leaves_catalog() {
        let repo = repo_with_catalog();
        repo.save_question(10).unwrap();
        repo.upsert_answer(10, 1).unwrap();
        repo.record_mistake(10).unwrap();
        repo.append_attempt(100, 1, 0, true).unwrap();

        repo.clear_user_state().unwrap();

        assert_eq!(repo.list_saved().unwrap(), vec![]);
        assert_eq!(repo.reviewed_count().unwrap(), 0);
        assert_eq!(repo.list_mistakes().unwrap(), vec![]);
        assert_eq!(repo.list_attempts().unwrap(), vec![]);
        assert_eq!(count(&repo, "questions"), 4);
    }
}
