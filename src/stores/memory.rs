use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use time::PrimitiveDateTime;

use crate::db::models::{Answer, Attempt, ExamDefinition};
use crate::services::attempt_timing;
use crate::stores::{
    AnswerGrade, AnswerStore, AnswerUpsert, AnswerWrite, AttemptStore, EnrollmentChecker,
    ExamDefinitionProvider, NewAttempt, StoreError,
};

/// In-memory store backing tests and embedders that run without Postgres.
/// One mutex over the whole arena stands in for the database's per-attempt
/// atomicity; each attempt record owns its answers, so the cascading
/// lifetime is structural rather than maintained by cleanup code.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Arena>>,
}

#[derive(Default)]
struct Arena {
    exams: HashMap<String, ExamDefinition>,
    /// `(course_id, student_id)` pairs.
    enrollments: Vec<(String, String)>,
    attempts: HashMap<String, AttemptRecord>,
    /// `(student_id, exam_id)` -> attempt id; the uniqueness invariant.
    attempt_index: HashMap<(String, String), String>,
}

struct AttemptRecord {
    attempt: Attempt,
    /// Keyed by exam question id.
    answers: HashMap<String, Answer>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_exam(&self, exam: ExamDefinition) {
        self.lock().exams.insert(exam.id.clone(), exam);
    }

    pub fn enroll(&self, student_id: &str, course_id: &str) {
        let mut arena = self.lock();
        let pair = (course_id.to_string(), student_id.to_string());
        if !arena.enrollments.contains(&pair) {
            arena.enrollments.push(pair);
        }
    }

    /// Test hook: place an attempt directly, bypassing the engine. Useful for
    /// backdating `start_time`. Re-placing an existing attempt keeps its
    /// stored answers.
    pub fn put_attempt(&self, attempt: Attempt) {
        let mut arena = self.lock();
        let key = (attempt.student_id.clone(), attempt.exam_id.clone());
        arena.attempt_index.insert(key, attempt.id.clone());
        match arena.attempts.get_mut(&attempt.id) {
            Some(record) => record.attempt = attempt,
            None => {
                arena
                    .attempts
                    .insert(attempt.id.clone(), AttemptRecord { attempt, answers: HashMap::new() });
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ExamDefinitionProvider for MemoryStore {
    async fn get(&self, exam_id: &str) -> Result<Option<ExamDefinition>, StoreError> {
        Ok(self.lock().exams.get(exam_id).cloned())
    }
}

#[async_trait]
impl EnrollmentChecker for MemoryStore {
    async fn is_enrolled(&self, student_id: &str, course_id: &str) -> Result<bool, StoreError> {
        let pair = (course_id.to_string(), student_id.to_string());
        Ok(self.lock().enrollments.contains(&pair))
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn insert(&self, attempt: NewAttempt) -> Result<bool, StoreError> {
        let mut arena = self.lock();
        let key = (attempt.student_id.clone(), attempt.exam_id.clone());
        if arena.attempt_index.contains_key(&key) {
            return Ok(false);
        }

        arena.attempt_index.insert(key, attempt.id.clone());
        arena.attempts.insert(
            attempt.id.clone(),
            AttemptRecord {
                attempt: Attempt {
                    id: attempt.id,
                    student_id: attempt.student_id,
                    exam_id: attempt.exam_id,
                    start_time: attempt.start_time,
                    end_time: None,
                    is_completed: false,
                    total_score: None,
                    max_score: attempt.max_score,
                    created_at: attempt.created_at,
                    updated_at: attempt.updated_at,
                },
                answers: HashMap::new(),
            },
        );
        Ok(true)
    }

    async fn find_by_id(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError> {
        Ok(self.lock().attempts.get(attempt_id).map(|record| record.attempt.clone()))
    }

    async fn exists_by_student_and_exam(
        &self,
        student_id: &str,
        exam_id: &str,
    ) -> Result<bool, StoreError> {
        let key = (student_id.to_string(), exam_id.to_string());
        Ok(self.lock().attempt_index.contains_key(&key))
    }

    async fn complete(
        &self,
        attempt_id: &str,
        end_time: PrimitiveDateTime,
        grades: &[AnswerGrade],
        total_score: f64,
    ) -> Result<bool, StoreError> {
        let mut arena = self.lock();
        let record = arena
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| StoreError::Internal(format!("attempt {attempt_id} missing")))?;

        if record.attempt.is_completed {
            return Ok(false);
        }

        record.attempt.is_completed = true;
        record.attempt.end_time = Some(end_time);
        record.attempt.total_score = Some(total_score);
        record.attempt.updated_at = end_time;

        for grade in grades {
            if let Some(answer) =
                record.answers.values_mut().find(|answer| answer.id == grade.answer_id)
            {
                answer.is_correct = grade.is_correct;
                answer.score = Some(grade.score);
                answer.is_graded = true;
                answer.updated_at = end_time;
            }
        }

        Ok(true)
    }

    async fn update_total_score(
        &self,
        attempt_id: &str,
        total_score: f64,
        now: PrimitiveDateTime,
    ) -> Result<(), StoreError> {
        let mut arena = self.lock();
        let record = arena
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| StoreError::Internal(format!("attempt {attempt_id} missing")))?;
        record.attempt.total_score = Some(total_score);
        record.attempt.updated_at = now;
        Ok(())
    }

    async fn list_expired(&self, now: PrimitiveDateTime) -> Result<Vec<Attempt>, StoreError> {
        let arena = self.lock();
        let expired = arena
            .attempts
            .values()
            .filter(|record| !record.attempt.is_completed)
            .filter(|record| {
                arena.exams.get(&record.attempt.exam_id).is_some_and(|exam| {
                    attempt_timing::is_expired(
                        now,
                        record.attempt.start_time,
                        exam.duration_minutes,
                    )
                })
            })
            .map(|record| record.attempt.clone())
            .collect();
        Ok(expired)
    }
}

#[async_trait]
impl AnswerStore for MemoryStore {
    async fn find_by_attempt_and_question(
        &self,
        attempt_id: &str,
        exam_question_id: &str,
    ) -> Result<Option<Answer>, StoreError> {
        Ok(self
            .lock()
            .attempts
            .get(attempt_id)
            .and_then(|record| record.answers.get(exam_question_id))
            .cloned())
    }

    async fn list_by_attempt(&self, attempt_id: &str) -> Result<Vec<Answer>, StoreError> {
        let arena = self.lock();
        let Some(record) = arena.attempts.get(attempt_id) else {
            return Ok(Vec::new());
        };
        let mut answers: Vec<Answer> = record.answers.values().cloned().collect();
        answers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(answers)
    }

    async fn upsert(&self, upsert: AnswerUpsert) -> Result<(), StoreError> {
        let mut arena = self.lock();
        let record = arena
            .attempts
            .get_mut(&upsert.attempt_id)
            .ok_or_else(|| StoreError::Internal(format!("attempt {} missing", upsert.attempt_id)))?;

        let answer = record.answers.entry(upsert.exam_question_id.clone()).or_insert_with(|| {
            Answer {
                id: upsert.id.clone(),
                attempt_id: upsert.attempt_id.clone(),
                exam_question_id: upsert.exam_question_id.clone(),
                selected_option_id: None,
                text_answer: None,
                is_correct: None,
                score: None,
                is_graded: false,
                created_at: upsert.now,
                updated_at: upsert.now,
            }
        });

        match &upsert.write {
            AnswerWrite::Choice { selected_option_id, is_correct, score } => {
                answer.selected_option_id = Some(selected_option_id.clone());
                answer.text_answer = None;
                answer.is_correct = Some(*is_correct);
                answer.score = Some(*score);
                answer.is_graded = true;
            }
            AnswerWrite::Text { text_answer } => {
                // Grading fields stay untouched; a manual score survives
                // the text edit.
                answer.text_answer = Some(text_answer.clone());
            }
        }
        answer.updated_at = upsert.now;

        Ok(())
    }

    async fn apply_grade(
        &self,
        grade: &AnswerGrade,
        now: PrimitiveDateTime,
    ) -> Result<(), StoreError> {
        let mut arena = self.lock();
        for record in arena.attempts.values_mut() {
            if let Some(answer) =
                record.answers.values_mut().find(|answer| answer.id == grade.answer_id)
            {
                answer.is_correct = grade.is_correct;
                answer.score = Some(grade.score);
                answer.is_graded = true;
                answer.updated_at = now;
                return Ok(());
            }
        }
        Err(StoreError::Internal(format!("answer {} missing", grade.answer_id)))
    }
}
