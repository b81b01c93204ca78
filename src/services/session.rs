use std::sync::Arc;

use thiserror::Error;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::time::{format_primitive, primitive_now_utc};
use crate::db::models::{Answer, Attempt, ExamDefinition, GradedQuestion};
use crate::db::types::QuestionKind;
use crate::schemas::session::{
    AnswerDetail, AttemptView, BatchFailure, BatchSubmitReport, OptionView, PreviousAnswer,
    QuestionView, ResultView, SubmitAnswer,
};
use crate::services::{attempt_timing, grading};
use crate::stores::{
    AnswerGrade, AnswerStore, AnswerUpsert, AnswerWrite, AttemptStore, EnrollmentChecker,
    ExamDefinitionProvider, NewAttempt, StoreError,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("student is not enrolled in the exam's course")]
    NotEnrolled,
    #[error("student has already attempted this exam")]
    AlreadyAttempted,
    #[error("attempt belongs to another student")]
    Forbidden,
    #[error("attempt is already completed")]
    AlreadyCompleted,
    #[error("attempt is completed; answers can no longer change")]
    ExamCompleted,
    #[error("exam time has expired")]
    TimeExpired,
    #[error("question does not belong to this exam")]
    QuestionNotInExam,
    #[error("selected option is missing or does not belong to the question")]
    InvalidOption,
    #[error("descriptive answer text must not be empty")]
    EmptyAnswer,
    #[error("attempt is not completed yet")]
    NotYetCompleted,
    #[error("score must be between 0 and {max}")]
    InvalidScore { max: f64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The session engine: governs one student's timed attempt from creation
/// through answer submission to completion and scoring.
///
/// Expiry is evaluated lazily on every access; there is no background timer.
/// When an access finds the deadline passed it force-completes the attempt
/// first and only then reports `TimeExpired`, so the caller's error never
/// masks a lost state transition.
#[derive(Clone)]
pub struct SessionEngine {
    exams: Arc<dyn ExamDefinitionProvider>,
    enrollment: Arc<dyn EnrollmentChecker>,
    attempts: Arc<dyn AttemptStore>,
    answers: Arc<dyn AnswerStore>,
}

impl SessionEngine {
    pub fn new(
        exams: Arc<dyn ExamDefinitionProvider>,
        enrollment: Arc<dyn EnrollmentChecker>,
        attempts: Arc<dyn AttemptStore>,
        answers: Arc<dyn AnswerStore>,
    ) -> Self {
        Self { exams, enrollment, attempts, answers }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(crate::stores::postgres::PgStore::new(pool));
        Self::new(store.clone(), store.clone(), store.clone(), store)
    }

    pub fn in_memory(store: crate::stores::memory::MemoryStore) -> Self {
        let store = Arc::new(store);
        Self::new(store.clone(), store.clone(), store.clone(), store)
    }

    /// Creates the attempt for `(student_id, exam_id)`. The store's unique
    /// constraint is the source of truth for the one-attempt invariant; the
    /// existence lookup is only a fast path, so two concurrent starts cannot
    /// both succeed.
    pub async fn start_exam(
        &self,
        student_id: &str,
        exam_id: &str,
    ) -> Result<AttemptView, SessionError> {
        let exam = self.fetch_exam(exam_id).await?;

        if !self.enrollment.is_enrolled(student_id, &exam.course_id).await? {
            return Err(SessionError::NotEnrolled);
        }

        if self.attempts.exists_by_student_and_exam(student_id, exam_id).await? {
            return Err(SessionError::AlreadyAttempted);
        }

        let now = primitive_now_utc();
        let attempt_id = Uuid::new_v4().to_string();
        let inserted = self
            .attempts
            .insert(NewAttempt {
                id: attempt_id.clone(),
                student_id: student_id.to_string(),
                exam_id: exam_id.to_string(),
                start_time: now,
                max_score: exam.total_points(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        if !inserted {
            return Err(SessionError::AlreadyAttempted);
        }

        tracing::info!(student_id, exam_id, attempt_id, "Attempt started");
        metrics::counter!("attempts_started_total").increment(1);

        let attempt = self
            .attempts
            .find_by_id(&attempt_id)
            .await?
            .ok_or_else(|| StoreError::Internal(format!("attempt {attempt_id} missing")))?;

        Ok(build_attempt_view(&exam, &attempt, &[], now))
    }

    /// Clock and question list for a running attempt. This read can mutate
    /// state: finding the deadline passed force-completes the attempt before
    /// the error is returned.
    pub async fn progress(
        &self,
        student_id: &str,
        attempt_id: &str,
    ) -> Result<AttemptView, SessionError> {
        let (attempt, exam) = self.load_owned(student_id, attempt_id).await?;

        if attempt.is_completed {
            return Err(SessionError::AlreadyCompleted);
        }

        let now = primitive_now_utc();
        if attempt_timing::is_expired(now, attempt.start_time, exam.duration_minutes) {
            self.force_complete(&attempt, &exam).await?;
            return Err(SessionError::TimeExpired);
        }

        let answers = self.answers.list_by_attempt(&attempt.id).await?;
        Ok(build_attempt_view(&exam, &attempt, &answers, now))
    }

    /// Latest-write-wins upsert of one answer. Single-choice answers are
    /// graded synchronously; descriptive answers keep whatever grade they
    /// already carry.
    pub async fn submit_answer(
        &self,
        student_id: &str,
        attempt_id: &str,
        payload: &SubmitAnswer,
    ) -> Result<(), SessionError> {
        let (attempt, exam) = self.load_owned(student_id, attempt_id).await?;

        if attempt.is_completed {
            return Err(SessionError::ExamCompleted);
        }

        let now = primitive_now_utc();
        if attempt_timing::is_expired(now, attempt.start_time, exam.duration_minutes) {
            self.force_complete(&attempt, &exam).await?;
            return Err(SessionError::TimeExpired);
        }

        let question = exam
            .question(&payload.exam_question_id)
            .ok_or(SessionError::QuestionNotInExam)?;

        let write = validate_payload(question, payload)?;

        self.answers
            .upsert(AnswerUpsert {
                id: Uuid::new_v4().to_string(),
                attempt_id: attempt.id.clone(),
                exam_question_id: question.id.clone(),
                write,
                now,
            })
            .await?;

        tracing::info!(
            student_id,
            attempt_id,
            exam_question_id = %payload.exam_question_id,
            "Answer submitted"
        );
        metrics::counter!("answers_submitted_total").increment(1);

        Ok(())
    }

    /// Applies `submit_answer` per item. A failing item is recorded and
    /// logged but never aborts its siblings.
    pub async fn submit_answers(
        &self,
        student_id: &str,
        attempt_id: &str,
        payloads: &[SubmitAnswer],
    ) -> Result<BatchSubmitReport, SessionError> {
        let mut report = BatchSubmitReport::default();

        for payload in payloads {
            match self.submit_answer(student_id, attempt_id, payload).await {
                Ok(()) => report.submitted += 1,
                Err(SessionError::Store(err)) => return Err(SessionError::Store(err)),
                Err(err) => {
                    tracing::warn!(
                        student_id,
                        attempt_id,
                        exam_question_id = %payload.exam_question_id,
                        error = %err,
                        "Skipping failed answer in batch submit"
                    );
                    report.failures.push(BatchFailure {
                        exam_question_id: payload.exam_question_id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Explicit completion by the owning student. One-way: exactly one
    /// caller wins, every later call sees `AlreadyCompleted`.
    pub async fn complete_exam(
        &self,
        student_id: &str,
        attempt_id: &str,
    ) -> Result<ResultView, SessionError> {
        let (attempt, exam) = self.load_owned(student_id, attempt_id).await?;

        if attempt.is_completed {
            return Err(SessionError::AlreadyCompleted);
        }

        if !self.complete_attempt(&attempt, &exam).await? {
            return Err(SessionError::AlreadyCompleted);
        }

        self.assemble_result(&attempt.id, &exam).await
    }

    /// Result of a completed attempt, recomputed from current answer rows so
    /// manual grading performed after completion is reflected.
    pub async fn exam_result(
        &self,
        student_id: &str,
        attempt_id: &str,
    ) -> Result<ResultView, SessionError> {
        let (attempt, exam) = self.load_owned(student_id, attempt_id).await?;

        if !attempt.is_completed {
            return Err(SessionError::NotYetCompleted);
        }

        self.assemble_result(&attempt.id, &exam).await
    }

    /// Pure predicate: enrolled and without an existing attempt.
    pub async fn can_participate(
        &self,
        student_id: &str,
        exam_id: &str,
    ) -> Result<bool, SessionError> {
        let exam = self.fetch_exam(exam_id).await?;

        if !self.enrollment.is_enrolled(student_id, &exam.course_id).await? {
            return Ok(false);
        }

        Ok(!self.attempts.exists_by_student_and_exam(student_id, exam_id).await?)
    }

    /// Instructor-side manual grading of a descriptive answer. Marks the
    /// answer graded and refreshes the attempt's stored total so later
    /// result fetches agree with it.
    pub async fn record_manual_score(
        &self,
        attempt_id: &str,
        exam_question_id: &str,
        score: f64,
    ) -> Result<(), SessionError> {
        let attempt = self
            .attempts
            .find_by_id(attempt_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(format!("attempt {attempt_id}")))?;
        let exam = self.fetch_exam(&attempt.exam_id).await?;

        let question =
            exam.question(exam_question_id).ok_or(SessionError::QuestionNotInExam)?;
        if question.kind != QuestionKind::Descriptive {
            return Err(SessionError::QuestionNotInExam);
        }
        if score < 0.0 || score > question.points {
            return Err(SessionError::InvalidScore { max: question.points });
        }

        let answer = self
            .answers
            .find_by_attempt_and_question(attempt_id, exam_question_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(format!("answer for {exam_question_id}")))?;

        let now = primitive_now_utc();
        self.answers
            .apply_grade(
                &AnswerGrade { answer_id: answer.id.clone(), is_correct: None, score },
                now,
            )
            .await?;

        if attempt.is_completed {
            let answers = self.answers.list_by_attempt(attempt_id).await?;
            let total = grading::total_score(&answers, &[]);
            self.attempts.update_total_score(attempt_id, total, now).await?;
        }

        tracing::info!(attempt_id, exam_question_id, score, "Manual score recorded");
        Ok(())
    }

    /// Force-completes every active attempt whose deadline has passed.
    /// Correctness never depends on this being called; it only shortens the
    /// window in which an attempt is logically expired but still unmarked.
    pub async fn close_expired(&self) -> Result<usize, SessionError> {
        let now = primitive_now_utc();
        let expired = self.attempts.list_expired(now).await?;

        let mut closed = 0;
        for attempt in &expired {
            let Some(exam) = self.exams.get(&attempt.exam_id).await? else {
                tracing::warn!(
                    attempt_id = %attempt.id,
                    exam_id = %attempt.exam_id,
                    "Skipping expired attempt with missing exam definition"
                );
                continue;
            };
            if self.complete_attempt(attempt, &exam).await? {
                closed += 1;
            }
        }

        Ok(closed)
    }

    async fn fetch_exam(&self, exam_id: &str) -> Result<ExamDefinition, SessionError> {
        self.exams
            .get(exam_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(format!("exam {exam_id}")))
    }

    async fn load_owned(
        &self,
        student_id: &str,
        attempt_id: &str,
    ) -> Result<(Attempt, ExamDefinition), SessionError> {
        let attempt = self
            .attempts
            .find_by_id(attempt_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(format!("attempt {attempt_id}")))?;

        if attempt.student_id != student_id {
            return Err(SessionError::Forbidden);
        }

        let exam = self.fetch_exam(&attempt.exam_id).await?;
        Ok((attempt, exam))
    }

    async fn force_complete(
        &self,
        attempt: &Attempt,
        exam: &ExamDefinition,
    ) -> Result<(), SessionError> {
        if self.complete_attempt(attempt, exam).await? {
            tracing::info!(
                attempt_id = %attempt.id,
                student_id = %attempt.student_id,
                "Attempt force-completed after time expiry"
            );
            metrics::counter!("attempts_expired_total").increment(1);
        }
        Ok(())
    }

    /// The one completion path: re-grades any single-choice answer that
    /// slipped past submission-time grading, totals the graded scores, and
    /// applies everything in one atomic store operation. Returns `false`
    /// when a concurrent caller completed the attempt first.
    async fn complete_attempt(
        &self,
        attempt: &Attempt,
        exam: &ExamDefinition,
    ) -> Result<bool, SessionError> {
        let now = primitive_now_utc();
        let answers = self.answers.list_by_attempt(&attempt.id).await?;
        let grades = grading::pending_choice_grades(exam, &answers);
        let total = grading::total_score(&answers, &grades);

        let applied = self.attempts.complete(&attempt.id, now, &grades, total).await?;
        if applied {
            tracing::info!(
                attempt_id = %attempt.id,
                student_id = %attempt.student_id,
                total_score = total,
                "Attempt completed"
            );
            metrics::counter!("attempts_completed_total").increment(1);
        }
        Ok(applied)
    }

    async fn assemble_result(
        &self,
        attempt_id: &str,
        exam: &ExamDefinition,
    ) -> Result<ResultView, SessionError> {
        let attempt = self
            .attempts
            .find_by_id(attempt_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(format!("attempt {attempt_id}")))?;
        let answers = self.answers.list_by_attempt(attempt_id).await?;

        Ok(build_result_view(exam, &attempt, &answers))
    }
}

fn validate_payload(
    question: &GradedQuestion,
    payload: &SubmitAnswer,
) -> Result<AnswerWrite, SessionError> {
    match question.kind {
        QuestionKind::SingleChoice => {
            let option_id =
                payload.selected_option_id.as_deref().ok_or(SessionError::InvalidOption)?;
            let option = question.option(option_id).ok_or(SessionError::InvalidOption)?;
            let (is_correct, score) = grading::grade_choice(option, question.points);
            Ok(AnswerWrite::Choice {
                selected_option_id: option.id.clone(),
                is_correct,
                score,
            })
        }
        QuestionKind::Descriptive => {
            let text = payload
                .text_answer
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .ok_or(SessionError::EmptyAnswer)?;
            Ok(AnswerWrite::Text { text_answer: text.to_string() })
        }
    }
}

fn build_attempt_view(
    exam: &ExamDefinition,
    attempt: &Attempt,
    answers: &[Answer],
    now: PrimitiveDateTime,
) -> AttemptView {
    let questions = exam
        .questions
        .iter()
        .map(|question| {
            let previous = answers
                .iter()
                .find(|answer| answer.exam_question_id == question.id)
                .map(|answer| PreviousAnswer {
                    answer_id: answer.id.clone(),
                    selected_option_id: answer.selected_option_id.clone(),
                    text_answer: answer.text_answer.clone(),
                });

            QuestionView {
                exam_question_id: question.id.clone(),
                question_id: question.question_id.clone(),
                title: question.title.clone(),
                text: question.text.clone(),
                kind: question.kind,
                points: question.points,
                order_number: question.order_number,
                // Correctness flags never leave the engine while the
                // attempt is running.
                options: question
                    .options
                    .iter()
                    .map(|option| OptionView {
                        id: option.id.clone(),
                        text: option.text.clone(),
                        order_index: option.order_index,
                    })
                    .collect(),
                max_words: question.max_words,
                previous_answer: previous,
            }
        })
        .collect();

    AttemptView {
        attempt_id: attempt.id.clone(),
        exam_id: exam.id.clone(),
        exam_title: exam.title.clone(),
        exam_description: exam.description.clone(),
        duration_minutes: exam.duration_minutes,
        start_time: format_primitive(attempt.start_time),
        remaining_seconds: attempt_timing::remaining_seconds(
            now,
            attempt.start_time,
            exam.duration_minutes,
        ),
        total_questions: exam.questions.len(),
        max_score: attempt.max_score,
        questions,
    }
}

fn build_result_view(exam: &ExamDefinition, attempt: &Attempt, answers: &[Answer]) -> ResultView {
    let answered = answers.len();
    let correct = answers.iter().filter(|answer| answer.is_correct == Some(true)).count();
    let graded = answers.iter().filter(|answer| answer.is_graded).count();
    let ungraded = answered - graded;
    let total_score = grading::total_score(answers, &[]);

    let details = answers
        .iter()
        .map(|answer| {
            let question = exam.question(&answer.exam_question_id);
            let selected_option_text = question.and_then(|question| {
                answer
                    .selected_option_id
                    .as_deref()
                    .and_then(|option_id| question.option(option_id))
                    .map(|option| option.text.clone())
            });

            AnswerDetail {
                answer_id: answer.id.clone(),
                exam_question_id: answer.exam_question_id.clone(),
                question_title: question.map(|q| q.title.clone()).unwrap_or_default(),
                question_text: question.map(|q| q.text.clone()).unwrap_or_default(),
                kind: question.map(|q| q.kind).unwrap_or(QuestionKind::Descriptive),
                max_points: question.map(|q| q.points).unwrap_or(0.0),
                score: answer.score,
                is_correct: answer.is_correct,
                is_graded: answer.is_graded,
                selected_option_id: answer.selected_option_id.clone(),
                selected_option_text,
                text_answer: answer.text_answer.clone(),
            }
        })
        .collect();

    ResultView {
        attempt_id: attempt.id.clone(),
        exam_title: exam.title.clone(),
        start_time: format_primitive(attempt.start_time),
        end_time: attempt.end_time.map(format_primitive),
        duration_minutes: exam.duration_minutes,
        total_score,
        max_score: attempt.max_score,
        percentage: grading::percentage(total_score, attempt.max_score),
        total_questions: exam.questions.len(),
        answered_questions: answered,
        correct_answers: correct,
        graded_questions: graded,
        ungraded_questions: ungraded,
        is_fully_graded: ungraded == 0,
        answers: details,
    }
}

#[cfg(test)]
mod tests;
