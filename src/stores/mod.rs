pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{Answer, Attempt, ExamDefinition};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub id: String,
    pub student_id: String,
    pub exam_id: String,
    pub start_time: PrimitiveDateTime,
    pub max_score: f64,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

/// Kind-specific payload for an answer upsert. A choice write carries its
/// synchronously computed grade; a text write never touches grading fields,
/// so a previously assigned manual score survives the edit.
#[derive(Debug, Clone)]
pub enum AnswerWrite {
    Choice { selected_option_id: String, is_correct: bool, score: f64 },
    Text { text_answer: String },
}

#[derive(Debug, Clone)]
pub struct AnswerUpsert {
    /// Used only when the row does not exist yet.
    pub id: String,
    pub attempt_id: String,
    pub exam_question_id: String,
    pub write: AnswerWrite,
    pub now: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub struct AnswerGrade {
    pub answer_id: String,
    pub is_correct: Option<bool>,
    pub score: f64,
}

/// Read-only source of exam definitions. `Ok(None)` when the exam does not
/// exist.
#[async_trait]
pub trait ExamDefinitionProvider: Send + Sync {
    async fn get(&self, exam_id: &str) -> Result<Option<ExamDefinition>, StoreError>;
}

#[async_trait]
pub trait EnrollmentChecker: Send + Sync {
    async fn is_enrolled(&self, student_id: &str, course_id: &str) -> Result<bool, StoreError>;
}

/// Durable record of attempts. The `(student_id, exam_id)` uniqueness
/// invariant lives here, not in the engine: `insert` must be atomic and
/// report whether the row was created.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Returns `false` when an attempt for `(student_id, exam_id)` already
    /// exists.
    async fn insert(&self, attempt: NewAttempt) -> Result<bool, StoreError>;

    async fn find_by_id(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError>;

    async fn exists_by_student_and_exam(
        &self,
        student_id: &str,
        exam_id: &str,
    ) -> Result<bool, StoreError>;

    /// Atomically mark the attempt completed, back-fill the given answer
    /// grades, and persist the recomputed total. Guarded on
    /// `is_completed = false`; returns `false` when another caller completed
    /// the attempt first, in which case nothing is written.
    async fn complete(
        &self,
        attempt_id: &str,
        end_time: PrimitiveDateTime,
        grades: &[AnswerGrade],
        total_score: f64,
    ) -> Result<bool, StoreError>;

    async fn update_total_score(
        &self,
        attempt_id: &str,
        total_score: f64,
        now: PrimitiveDateTime,
    ) -> Result<(), StoreError>;

    /// Active attempts whose deadline (`start_time` + exam duration) lies
    /// strictly before `now`.
    async fn list_expired(&self, now: PrimitiveDateTime) -> Result<Vec<Attempt>, StoreError>;
}

/// Durable record of answers, unique per `(attempt_id, exam_question_id)`.
#[async_trait]
pub trait AnswerStore: Send + Sync {
    async fn find_by_attempt_and_question(
        &self,
        attempt_id: &str,
        exam_question_id: &str,
    ) -> Result<Option<Answer>, StoreError>;

    async fn list_by_attempt(&self, attempt_id: &str) -> Result<Vec<Answer>, StoreError>;

    /// Latest-write-wins upsert; the uniqueness constraint is the final guard
    /// against concurrent duplicate creation.
    async fn upsert(&self, upsert: AnswerUpsert) -> Result<(), StoreError>;

    async fn apply_grade(
        &self,
        grade: &AnswerGrade,
        now: PrimitiveDateTime,
    ) -> Result<(), StoreError>;
}
