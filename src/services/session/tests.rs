use time::Duration;

use super::*;
use crate::db::models::QuestionOption;
use crate::stores::memory::MemoryStore;

const STUDENT: &str = "student-1";
const OTHER_STUDENT: &str = "student-2";
const COURSE: &str = "course-1";
const EXAM: &str = "exam-1";

fn choice_question(id: &str, points: f64, order_number: i32) -> GradedQuestion {
    GradedQuestion {
        id: id.to_string(),
        question_id: format!("bank-{id}"),
        title: format!("Question {id}"),
        text: "Pick the right option".to_string(),
        kind: QuestionKind::SingleChoice,
        points,
        order_number,
        options: vec![
            QuestionOption {
                id: format!("{id}-right"),
                text: "Right".to_string(),
                order_index: 0,
                is_correct: true,
            },
            QuestionOption {
                id: format!("{id}-wrong"),
                text: "Wrong".to_string(),
                order_index: 1,
                is_correct: false,
            },
        ],
        max_words: None,
    }
}

fn descriptive_question(id: &str, points: f64, order_number: i32) -> GradedQuestion {
    GradedQuestion {
        id: id.to_string(),
        question_id: format!("bank-{id}"),
        title: format!("Question {id}"),
        text: "Explain in your own words".to_string(),
        kind: QuestionKind::Descriptive,
        points,
        order_number,
        options: Vec::new(),
        max_words: Some(200),
    }
}

fn exam(questions: Vec<GradedQuestion>) -> ExamDefinition {
    ExamDefinition {
        id: EXAM.to_string(),
        course_id: COURSE.to_string(),
        title: "Midterm".to_string(),
        description: Some("Closed book".to_string()),
        duration_minutes: 30,
        questions,
    }
}

/// Store with one enrolled student and a 30-minute exam holding a 5-point
/// single-choice question (`q1`) and a 10-point descriptive one (`q2`).
fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_exam(exam(vec![
        choice_question("q1", 5.0, 1),
        descriptive_question("q2", 10.0, 2),
    ]));
    store.enroll(STUDENT, COURSE);
    store
}

fn engine(store: &MemoryStore) -> SessionEngine {
    SessionEngine::in_memory(store.clone())
}

fn choice(question_id: &str, option_id: &str) -> SubmitAnswer {
    SubmitAnswer {
        exam_question_id: question_id.to_string(),
        selected_option_id: Some(option_id.to_string()),
        text_answer: None,
    }
}

fn text(question_id: &str, body: &str) -> SubmitAnswer {
    SubmitAnswer {
        exam_question_id: question_id.to_string(),
        selected_option_id: None,
        text_answer: Some(body.to_string()),
    }
}

/// Places an already-running attempt whose start time lies `minutes_ago`
/// in the past.
fn backdated_attempt(store: &MemoryStore, minutes_ago: i64) -> String {
    let start = primitive_now_utc() - Duration::minutes(minutes_ago);
    let id = Uuid::new_v4().to_string();
    store.put_attempt(Attempt {
        id: id.clone(),
        student_id: STUDENT.to_string(),
        exam_id: EXAM.to_string(),
        start_time: start,
        end_time: None,
        is_completed: false,
        total_score: None,
        max_score: 15.0,
        created_at: start,
        updated_at: start,
    });
    id
}

#[tokio::test]
async fn start_exam_creates_attempt_with_clock_and_sanitized_questions() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();

    assert_eq!(view.exam_id, EXAM);
    assert_eq!(view.total_questions, 2);
    assert_eq!(view.max_score, 15.0);
    assert!(view.remaining_seconds > 0 && view.remaining_seconds <= 30 * 60);

    let q1 = &view.questions[0];
    assert_eq!(q1.exam_question_id, "q1");
    assert_eq!(q1.options.len(), 2);
    assert!(q1.previous_answer.is_none());
    assert_eq!(view.questions[1].max_words, Some(200));
}

#[tokio::test]
async fn start_exam_rejects_unknown_exam_and_unenrolled_student() {
    let store = seeded_store();
    let engine = engine(&store);

    assert!(matches!(
        engine.start_exam(STUDENT, "missing").await,
        Err(SessionError::NotFound(_))
    ));
    assert!(matches!(
        engine.start_exam(OTHER_STUDENT, EXAM).await,
        Err(SessionError::NotEnrolled)
    ));
}

#[tokio::test]
async fn second_start_is_rejected() {
    let store = seeded_store();
    let engine = engine(&store);

    engine.start_exam(STUDENT, EXAM).await.unwrap();
    assert!(matches!(
        engine.start_exam(STUDENT, EXAM).await,
        Err(SessionError::AlreadyAttempted)
    ));
}

#[tokio::test]
async fn concurrent_starts_produce_exactly_one_attempt() {
    let store = seeded_store();
    let engine = engine(&store);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.start_exam(STUDENT, EXAM).await }));
    }

    let mut started = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => started += 1,
            Err(SessionError::AlreadyAttempted) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(started, 1);
    assert_eq!(rejected, 7);
}

#[tokio::test]
async fn progress_shows_previously_stored_answers() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &choice("q1", "q1-right")).await.unwrap();

    let view = engine.progress(STUDENT, &view.attempt_id).await.unwrap();
    let previous = view.questions[0].previous_answer.as_ref().unwrap();
    assert_eq!(previous.selected_option_id.as_deref(), Some("q1-right"));
    assert!(view.questions[1].previous_answer.is_none());
}

#[tokio::test]
async fn progress_requires_the_owning_student() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    assert!(matches!(
        engine.progress(OTHER_STUDENT, &view.attempt_id).await,
        Err(SessionError::Forbidden)
    ));
}

#[tokio::test]
async fn choice_answers_are_graded_on_submission() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &choice("q1", "q1-wrong")).await.unwrap();

    let answer = store
        .find_by_attempt_and_question(&view.attempt_id, "q1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(answer.is_correct, Some(false));
    assert_eq!(answer.score, Some(0.0));
    assert!(answer.is_graded);
}

#[tokio::test]
async fn resubmission_replaces_the_previous_answer() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &choice("q1", "q1-wrong")).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &choice("q1", "q1-right")).await.unwrap();

    let answers = store.list_by_attempt(&view.attempt_id).await.unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].selected_option_id.as_deref(), Some("q1-right"));
    assert_eq!(answers[0].score, Some(5.0));
    assert_eq!(answers[0].is_correct, Some(true));
}

#[tokio::test]
async fn submission_validates_question_and_payload() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    let attempt_id = view.attempt_id;

    assert!(matches!(
        engine.submit_answer(STUDENT, &attempt_id, &choice("q9", "q1-right")).await,
        Err(SessionError::QuestionNotInExam)
    ));
    assert!(matches!(
        engine.submit_answer(STUDENT, &attempt_id, &choice("q1", "q2-right")).await,
        Err(SessionError::InvalidOption)
    ));
    assert!(matches!(
        engine.submit_answer(STUDENT, &attempt_id, &text("q1", "prose")).await,
        Err(SessionError::InvalidOption)
    ));
    assert!(matches!(
        engine.submit_answer(STUDENT, &attempt_id, &text("q2", "   ")).await,
        Err(SessionError::EmptyAnswer)
    ));
}

#[tokio::test]
async fn batch_submission_reports_failures_without_aborting() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    let report = engine
        .submit_answers(
            STUDENT,
            &view.attempt_id,
            &[
                choice("q1", "q1-right"),
                text("q2", ""),
                text("q9", "not in this exam"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(report.submitted, 1);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].exam_question_id, "q2");
    assert_eq!(report.failures[1].exam_question_id, "q9");

    let answers = store.list_by_attempt(&view.attempt_id).await.unwrap();
    assert_eq!(answers.len(), 1);
}

#[tokio::test]
async fn completion_totals_scores_and_builds_the_result_view() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &choice("q1", "q1-right")).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &text("q2", "An essay")).await.unwrap();

    let result = engine.complete_exam(STUDENT, &view.attempt_id).await.unwrap();

    assert_eq!(result.total_score, 5.0);
    assert_eq!(result.max_score, 15.0);
    assert!((result.percentage - 100.0 * 5.0 / 15.0).abs() < 1e-9);
    assert_eq!(result.answered_questions, 2);
    assert_eq!(result.correct_answers, 1);
    assert_eq!(result.graded_questions, 1);
    assert_eq!(result.ungraded_questions, 1);
    assert!(!result.is_fully_graded);
    assert!(result.end_time.is_some());

    let descriptive = result.answers.iter().find(|a| a.exam_question_id == "q2").unwrap();
    assert!(!descriptive.is_graded);
    assert_eq!(descriptive.score, None);
    assert_eq!(descriptive.text_answer.as_deref(), Some("An essay"));
}

#[tokio::test]
async fn completion_is_one_way() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &choice("q1", "q1-right")).await.unwrap();

    let first = engine.complete_exam(STUDENT, &view.attempt_id).await.unwrap();
    assert!(matches!(
        engine.complete_exam(STUDENT, &view.attempt_id).await,
        Err(SessionError::AlreadyCompleted)
    ));
    assert!(matches!(
        engine.progress(STUDENT, &view.attempt_id).await,
        Err(SessionError::AlreadyCompleted)
    ));
    assert!(matches!(
        engine.submit_answer(STUDENT, &view.attempt_id, &choice("q1", "q1-wrong")).await,
        Err(SessionError::ExamCompleted)
    ));

    // The recorded end time and total are stable under the retries above.
    let result = engine.exam_result(STUDENT, &view.attempt_id).await.unwrap();
    assert_eq!(result.end_time, first.end_time);
    assert_eq!(result.total_score, first.total_score);
}

#[tokio::test]
async fn result_is_unavailable_before_completion() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    assert!(matches!(
        engine.exam_result(STUDENT, &view.attempt_id).await,
        Err(SessionError::NotYetCompleted)
    ));
}

#[tokio::test]
async fn expiry_forces_completion_and_then_serves_the_result() {
    let store = seeded_store();
    let engine = engine(&store);
    let attempt_id = backdated_attempt(&store, 45);

    assert!(matches!(
        engine.progress(STUDENT, &attempt_id).await,
        Err(SessionError::TimeExpired)
    ));

    // The expiry path completed the attempt, so the result is available
    // and later accesses see a completed attempt, not another expiry.
    let result = engine.exam_result(STUDENT, &attempt_id).await.unwrap();
    assert_eq!(result.total_score, 0.0);
    assert!(result.end_time.is_some());
    assert!(matches!(
        engine.progress(STUDENT, &attempt_id).await,
        Err(SessionError::AlreadyCompleted)
    ));
}

#[tokio::test]
async fn expired_submission_is_rejected_after_forcing_completion() {
    let store = seeded_store();
    let engine = engine(&store);
    let attempt_id = backdated_attempt(&store, 45);

    assert!(matches!(
        engine.submit_answer(STUDENT, &attempt_id, &choice("q1", "q1-right")).await,
        Err(SessionError::TimeExpired)
    ));
    assert!(store.list_by_attempt(&attempt_id).await.unwrap().is_empty());
    assert!(engine.exam_result(STUDENT, &attempt_id).await.is_ok());
}

#[tokio::test]
async fn attempt_exactly_at_the_deadline_is_still_active() {
    let store = seeded_store();
    let engine = engine(&store);
    // 30-minute exam started 29 minutes ago: still inside the window.
    let attempt_id = backdated_attempt(&store, 29);

    let view = engine.progress(STUDENT, &attempt_id).await.unwrap();
    assert!(view.remaining_seconds <= 60);
    assert!(view.remaining_seconds > 0);
}

#[tokio::test]
async fn manual_score_survives_a_descriptive_edit() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &text("q2", "First draft")).await.unwrap();
    engine.record_manual_score(&view.attempt_id, "q2", 7.0).await.unwrap();

    engine.submit_answer(STUDENT, &view.attempt_id, &text("q2", "Second draft")).await.unwrap();

    let answer = store
        .find_by_attempt_and_question(&view.attempt_id, "q2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(answer.text_answer.as_deref(), Some("Second draft"));
    assert!(answer.is_graded);
    assert_eq!(answer.score, Some(7.0));
}

#[tokio::test]
async fn manual_grading_updates_a_completed_result() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &choice("q1", "q1-right")).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &text("q2", "An essay")).await.unwrap();
    engine.complete_exam(STUDENT, &view.attempt_id).await.unwrap();

    engine.record_manual_score(&view.attempt_id, "q2", 8.0).await.unwrap();

    let result = engine.exam_result(STUDENT, &view.attempt_id).await.unwrap();
    assert_eq!(result.total_score, 13.0);
    assert_eq!(result.ungraded_questions, 0);
    assert!(result.is_fully_graded);

    let attempt = store.find_by_id(&view.attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.total_score, Some(13.0));
}

#[tokio::test]
async fn manual_score_is_validated_against_the_question() {
    let store = seeded_store();
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &text("q2", "An essay")).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &choice("q1", "q1-right")).await.unwrap();

    assert!(matches!(
        engine.record_manual_score(&view.attempt_id, "q2", 10.5).await,
        Err(SessionError::InvalidScore { max }) if max == 10.0
    ));
    assert!(matches!(
        engine.record_manual_score(&view.attempt_id, "q2", -1.0).await,
        Err(SessionError::InvalidScore { .. })
    ));
    // Manual grading applies to descriptive questions only.
    assert!(matches!(
        engine.record_manual_score(&view.attempt_id, "q1", 3.0).await,
        Err(SessionError::QuestionNotInExam)
    ));
}

#[tokio::test]
async fn zero_point_exam_reports_zero_percentage() {
    let store = MemoryStore::new();
    store.insert_exam(exam(vec![choice_question("q1", 0.0, 1)]));
    store.enroll(STUDENT, COURSE);
    let engine = engine(&store);

    let view = engine.start_exam(STUDENT, EXAM).await.unwrap();
    engine.submit_answer(STUDENT, &view.attempt_id, &choice("q1", "q1-right")).await.unwrap();
    let result = engine.complete_exam(STUDENT, &view.attempt_id).await.unwrap();

    assert_eq!(result.max_score, 0.0);
    assert_eq!(result.percentage, 0.0);
}

#[tokio::test]
async fn can_participate_reflects_enrollment_and_prior_attempts() {
    let store = seeded_store();
    let engine = engine(&store);

    assert!(engine.can_participate(STUDENT, EXAM).await.unwrap());
    assert!(!engine.can_participate(OTHER_STUDENT, EXAM).await.unwrap());

    engine.start_exam(STUDENT, EXAM).await.unwrap();
    assert!(!engine.can_participate(STUDENT, EXAM).await.unwrap());
}

#[tokio::test]
async fn close_expired_sweeps_overdue_attempts_once() {
    let store = seeded_store();
    let engine = engine(&store);
    let attempt_id = backdated_attempt(&store, 45);

    assert_eq!(engine.close_expired().await.unwrap(), 1);
    assert_eq!(engine.close_expired().await.unwrap(), 0);

    let attempt = store.find_by_id(&attempt_id).await.unwrap().unwrap();
    assert!(attempt.is_completed);
    assert_eq!(attempt.total_score, Some(0.0));
}

#[tokio::test]
async fn close_expired_grades_answers_it_finds() {
    let store = seeded_store();
    let engine = engine(&store);
    let attempt_id = backdated_attempt(&store, 20);

    engine.submit_answer(STUDENT, &attempt_id, &choice("q1", "q1-right")).await.unwrap();

    // Push the attempt past its deadline; its stored answer stays in place.
    let mut attempt = store.find_by_id(&attempt_id).await.unwrap().unwrap();
    attempt.start_time -= Duration::minutes(25);
    store.put_attempt(attempt);

    assert_eq!(engine.close_expired().await.unwrap(), 1);
    let result = engine.exam_result(STUDENT, &attempt_id).await.unwrap();
    assert_eq!(result.total_score, 5.0);
}
