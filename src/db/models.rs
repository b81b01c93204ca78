use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::QuestionKind;

/// One student's timed run at one exam. Unique on `(student_id, exam_id)`;
/// the storage layer enforces the constraint, not the application.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attempt {
    pub id: String,
    pub student_id: String,
    pub exam_id: String,
    pub start_time: PrimitiveDateTime,
    pub end_time: Option<PrimitiveDateTime>,
    pub is_completed: bool,
    pub total_score: Option<f64>,
    pub max_score: f64,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

/// The student's response to one question-in-exam. Unique on
/// `(attempt_id, exam_question_id)`; rows cascade-delete with their attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Answer {
    pub id: String,
    pub attempt_id: String,
    pub exam_question_id: String,
    pub selected_option_id: Option<String>,
    pub text_answer: Option<String>,
    pub is_correct: Option<bool>,
    pub score: Option<f64>,
    pub is_graded: bool,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

/// Read-only snapshot of an exam as the engine sees it. Mutating the
/// definition is an authoring concern and happens elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamDefinition {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    /// Ordered by `order_number`.
    pub questions: Vec<GradedQuestion>,
}

impl ExamDefinition {
    pub fn total_points(&self) -> f64 {
        self.questions.iter().map(|question| question.points).sum()
    }

    pub fn question(&self, exam_question_id: &str) -> Option<&GradedQuestion> {
        self.questions.iter().find(|question| question.id == exam_question_id)
    }
}

/// A question bound into a specific exam with a point value and position,
/// distinct from the reusable question-bank entry it references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradedQuestion {
    pub id: String,
    pub question_id: String,
    pub title: String,
    pub text: String,
    pub kind: QuestionKind,
    pub points: f64,
    pub order_number: i32,
    /// Single-choice questions only.
    pub options: Vec<QuestionOption>,
    /// Descriptive questions only.
    pub max_words: Option<i32>,
}

impl GradedQuestion {
    pub fn option(&self, option_id: &str) -> Option<&QuestionOption> {
        self.options.iter().find(|option| option.id == option_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
    pub order_index: i32,
    pub is_correct: bool,
}
