//! SQLite schema definitions.

/// Complete schema for the local catalog mirror and user-state tables.
///
/// Reference tables (chapters, licenses, questions, quizzes and their
/// junctions) are owned by the sync engine and only written inside a sync
/// transaction. User-state tables reference questions/quizzes with
/// ON DELETE CASCADE so rows whose parent disappears during a replace are
/// cleaned up; rows whose parent survives are untouched.
pub const SCHEMA: &str = r#"
-- Reference tables (replaced by sync)
CREATE TABLE IF NOT EXISTS chapters (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS licenses (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    total_questions INTEGER NOT NULL DEFAULT 0,
    required_correct INTEGER NOT NULL DEFAULT 0,
    duration_minutes INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS questions (
    id INTEGER PRIMARY KEY,
    content TEXT NOT NULL,
    options TEXT NOT NULL,
    correct_answer_index INTEGER NOT NULL,
    is_critical INTEGER NOT NULL DEFAULT 0,
    number INTEGER NOT NULL,
    image_name TEXT,
    explanation TEXT,
    chapter_id INTEGER REFERENCES chapters(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS question_licenses (
    question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
    license_id INTEGER NOT NULL REFERENCES licenses(id) ON DELETE CASCADE,
    PRIMARY KEY (question_id, license_id)
);

CREATE TABLE IF NOT EXISTS quizzes (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    license_id INTEGER NOT NULL REFERENCES licenses(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS quiz_questions (
    quiz_id INTEGER NOT NULL REFERENCES quizzes(id) ON DELETE CASCADE,
    question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
    PRIMARY KEY (quiz_id, question_id)
);

-- Append-only version log; current version = greatest id
CREATE TABLE IF NOT EXISTS versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Generic settings/history key-value store (one live row per key)
CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    value TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- User-state tables (never written by sync)
CREATE TABLE IF NOT EXISTS saved_questions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
    answer TEXT
);

CREATE TABLE IF NOT EXISTS history_questions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question_id INTEGER NOT NULL UNIQUE REFERENCES questions(id) ON DELETE CASCADE,
    selected_option INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS frequent_mistakes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question_id INTEGER NOT NULL UNIQUE REFERENCES questions(id) ON DELETE CASCADE,
    mistake_count INTEGER NOT NULL DEFAULT 0,
    last_mistake_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS quiz_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    quiz_id INTEGER NOT NULL REFERENCES quizzes(id) ON DELETE CASCADE,
    correct_count INTEGER NOT NULL,
    incorrect_count INTEGER NOT NULL,
    passed INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_questions_chapter ON questions(chapter_id);
CREATE INDEX IF NOT EXISTS idx_question_licenses_license ON question_licenses(license_id);
CREATE INDEX IF NOT EXISTS idx_quizzes_license ON quizzes(license_id);
"#;

/// Drop statements for every owned table, junctions and dependents first.
/// Executed with foreign-key enforcement disabled to avoid ordering errors.
pub const DROP_ALL: &str = r#"
DROP TABLE IF EXISTS quiz_questions;
DROP TABLE IF EXISTS question_licenses;
DROP TABLE IF EXISTS quiz_history;
DROP TABLE IF EXISTS history_questions;
DROP TABLE IF EXISTS frequent_mistakes;
DROP TABLE IF EXISTS saved_questions;
DROP TABLE IF EXISTS quizzes;
DROP TABLE IF EXISTS questions;
DROP TABLE IF EXISTS chapters;
DROP TABLE IF EXISTS licenses;
DROP TABLE IF EXISTS versions;
DROP TABLE IF EXISTS history;
"#;
