use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{Answer, Attempt, ExamDefinition};
use crate::repositories;
use crate::stores::{
    AnswerGrade, AnswerStore, AnswerUpsert, AttemptStore, EnrollmentChecker,
    ExamDefinitionProvider, NewAttempt, StoreError,
};

/// Postgres-backed store. The schema's unique constraints on
/// `(student_id, exam_id)` and `(attempt_id, exam_question_id)` are the
/// final guard behind every insert path.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ExamDefinitionProvider for PgStore {
    async fn get(&self, exam_id: &str) -> Result<Option<ExamDefinition>, StoreError> {
        Ok(repositories::exams::find_definition(&self.pool, exam_id).await?)
    }
}

#[async_trait]
impl EnrollmentChecker for PgStore {
    async fn is_enrolled(&self, student_id: &str, course_id: &str) -> Result<bool, StoreError> {
        Ok(repositories::enrollments::is_enrolled(&self.pool, student_id, course_id).await?)
    }
}

#[async_trait]
impl AttemptStore for PgStore {
    async fn insert(&self, attempt: NewAttempt) -> Result<bool, StoreError> {
        Ok(repositories::attempts::create(&self.pool, &attempt).await?)
    }

    async fn find_by_id(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError> {
        Ok(repositories::attempts::find_by_id(&self.pool, attempt_id).await?)
    }

    async fn exists_by_student_and_exam(
        &self,
        student_id: &str,
        exam_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(repositories::attempts::exists_by_student_and_exam(&self.pool, student_id, exam_id)
            .await?)
    }

    async fn complete(
        &self,
        attempt_id: &str,
        end_time: PrimitiveDateTime,
        grades: &[AnswerGrade],
        total_score: f64,
    ) -> Result<bool, StoreError> {
        Ok(repositories::attempts::complete(&self.pool, attempt_id, end_time, grades, total_score)
            .await?)
    }

    async fn update_total_score(
        &self,
        attempt_id: &str,
        total_score: f64,
        now: PrimitiveDateTime,
    ) -> Result<(), StoreError> {
        Ok(repositories::attempts::update_total_score(&self.pool, attempt_id, total_score, now)
            .await?)
    }

    async fn list_expired(&self, now: PrimitiveDateTime) -> Result<Vec<Attempt>, StoreError> {
        Ok(repositories::attempts::list_expired(&self.pool, now).await?)
    }
}

#[async_trait]
impl AnswerStore for PgStore {
    async fn find_by_attempt_and_question(
        &self,
        attempt_id: &str,
        exam_question_id: &str,
    ) -> Result<Option<Answer>, StoreError> {
        Ok(repositories::answers::find_by_attempt_and_question(
            &self.pool,
            attempt_id,
            exam_question_id,
        )
        .await?)
    }

    async fn list_by_attempt(&self, attempt_id: &str) -> Result<Vec<Answer>, StoreError> {
        Ok(repositories::answers::list_by_attempt(&self.pool, attempt_id).await?)
    }

    async fn upsert(&self, upsert: AnswerUpsert) -> Result<(), StoreError> {
        Ok(repositories::answers::upsert(&self.pool, &upsert).await?)
    }

    async fn apply_grade(
        &self,
        grade: &AnswerGrade,
        now: PrimitiveDateTime,
    ) -> Result<(), StoreError> {
        Ok(repositories::answers::apply_grade(&self.pool, grade, now).await?)
    }
}
