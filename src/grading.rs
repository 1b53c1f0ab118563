//! Exam grading state machine.
//!
//! An [`ExamSession`] moves `InProgress -> Submitted -> Graded` and never
//! back. Timer expiry and manual submission share the same transition, so
//! there is no special-cased auto-fail path. Grading is pure; persisting the
//! result is the repository's job (`record_exam_outcome`) and happens exactly
//! once because `Graded` is terminal.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::types::Question;

#[derive(Debug, Error)]
pub enum GradingError {
    #[error("exam is not in progress")]
    NotInProgress,

    #[error("exam has not been submitted")]
    NotSubmitted,

    #[error("exam is already graded")]
    AlreadyGraded,

    #[error("question {0} is not part of this exam")]
    UnknownQuestion(i64),
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamState {
    InProgress,
    Submitted,
    Graded,
}

/// The grading-relevant slice of a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamQuestion {
    pub question_id: i64,
    pub correct_answer_index: usize,
    pub is_critical: bool,
}

impl From<&Question> for ExamQuestion {
    fn from(question: &Question) -> Self {
        Self {
            question_id: question.id,
            correct_answer_index: question.correct_answer_index,
            is_critical: question.is_critical,
        }
    }
}

/// One answered question in a graded result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnsweredQuestion {
    pub question_id: i64,
    pub selected_option: usize,
    pub correct: bool,
}

/// Outcome of grading one exam attempt.
///
/// `passed` requires both no critical failure and `correct_count` reaching
/// the license's required-correct threshold. Unanswered questions count as
/// incorrect; an unanswered critical question is a critical failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamResult {
    pub quiz_id: i64,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub has_critical_failure: bool,
    pub passed: bool,
    pub answers: Vec<AnsweredQuestion>,
}

/// One exam attempt against a fixed question set.
#[derive(Debug, Clone)]
pub struct ExamSession {
    quiz_id: i64,
    required_correct: u32,
    questions: Vec<ExamQuestion>,
    answers: HashMap<i64, usize>,
    state: ExamState,
}

impl ExamSession {
    pub fn new(quiz_id: i64, questions: Vec<ExamQuestion>, required_correct: u32) -> Self {
        Self {
            quiz_id,
            required_correct,
            questions,
            answers: HashMap::new(),
            state: ExamState::InProgress,
        }
    }

    pub fn state(&self) -> ExamState {
        self.state
    }

    pub fn quiz_id(&self) -> i64 {
        self.quiz_id
    }

    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    /// Record (or change) the selected option for a question. Only valid
    /// while the exam is in progress.
    pub fn answer(&mut self, question_id: i64, selected_option: usize) -> Result<(), GradingError> {
        if self.state != ExamState::InProgress {
            return Err(GradingError::NotInProgress);
        }
        if !self.questions.iter().any(|q| q.question_id == question_id) {
            return Err(GradingError::UnknownQuestion(question_id));
        }
        self.answers.insert(question_id, selected_option);
        Ok(())
    }

    /// Manual submission.
    pub fn submit(&mut self) -> Result<(), GradingError> {
        if self.state != ExamState::InProgress {
            return Err(GradingError::NotInProgress);
        }
        self.state = ExamState::Submitted;
        Ok(())
    }

    /// Timer expiry forces submission through the same transition.
    pub fn expire(&mut self) -> Result<(), GradingError> {
        self.submit()
    }

    /// Grade a submitted exam. Terminal: a session grades at most once.
    pub fn grade(&mut self) -> Result<ExamResult, GradingError> {
        match self.state {
            ExamState::InProgress => return Err(GradingError::NotSubmitted),
            ExamState::Graded => return Err(GradingError::AlreadyGraded),
            ExamState::Submitted => {}
        }

        let mut correct_count = 0u32;
        let mut has_critical_failure = false;
        let mut answers = Vec::with_capacity(self.answers.len());

        for question in &self.questions {
            let selected = self.answers.get(&question.question_id).copied();
            let correct = selected == Some(question.correct_answer_index);

            if correct {
                correct_count += 1;
            } else if question.is_critical {
                has_critical_failure = true;
            }

            if let Some(selected_option) = selected {
                answers.push(AnsweredQuestion {
                    question_id: question.question_id,
                    selected_option,
                    correct,
                });
            }
        }

        let total = self.questions.len() as u32;
        let passed = !has_critical_failure && correct_count >= self.required_correct;

        self.state = ExamState::Graded;
        Ok(ExamResult {
            quiz_id: self.quiz_id,
            correct_count,
            incorrect_count: total - correct_count,
            has_critical_failure,
            passed,
            answers,
        })
    }
}
