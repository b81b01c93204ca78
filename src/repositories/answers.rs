use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Answer;
use crate::stores::{AnswerGrade, AnswerUpsert, AnswerWrite};

pub(crate) const COLUMNS: &str = "\
    id, attempt_id, exam_question_id, selected_option_id, text_answer, \
    is_correct, score, is_graded, created_at, updated_at";

pub(crate) async fn find_by_attempt_and_question(
    pool: &PgPool,
    attempt_id: &str,
    exam_question_id: &str,
) -> Result<Option<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "SELECT {COLUMNS} FROM answers WHERE attempt_id = $1 AND exam_question_id = $2"
    ))
    .bind(attempt_id)
    .bind(exam_question_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_by_attempt(
    pool: &PgPool,
    attempt_id: &str,
) -> Result<Vec<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "SELECT {COLUMNS} FROM answers WHERE attempt_id = $1 ORDER BY created_at"
    ))
    .bind(attempt_id)
    .fetch_all(pool)
    .await
}

/// Latest write wins; the unique constraint on
/// `(attempt_id, exam_question_id)` closes the concurrent-create race. A text
/// upsert deliberately leaves `score`/`is_graded` alone so a manual grade
/// survives the edit.
pub(crate) async fn upsert(
    executor: impl sqlx::PgExecutor<'_>,
    upsert: &AnswerUpsert,
) -> Result<(), sqlx::Error> {
    match &upsert.write {
        AnswerWrite::Choice { selected_option_id, is_correct, score } => {
            sqlx::query(
                "INSERT INTO answers (
                    id, attempt_id, exam_question_id, selected_option_id,
                    is_correct, score, is_graded, created_at, updated_at
                ) VALUES ($1,$2,$3,$4,$5,$6,TRUE,$7,$7)
                ON CONFLICT (attempt_id, exam_question_id) DO UPDATE
                SET selected_option_id = EXCLUDED.selected_option_id,
                    text_answer = NULL,
                    is_correct = EXCLUDED.is_correct,
                    score = EXCLUDED.score,
                    is_graded = TRUE,
                    updated_at = EXCLUDED.updated_at",
            )
            .bind(&upsert.id)
            .bind(&upsert.attempt_id)
            .bind(&upsert.exam_question_id)
            .bind(selected_option_id)
            .bind(is_correct)
            .bind(score)
            .bind(upsert.now)
            .execute(executor)
            .await?;
        }
        AnswerWrite::Text { text_answer } => {
            sqlx::query(
                "INSERT INTO answers (
                    id, attempt_id, exam_question_id, text_answer,
                    is_graded, created_at, updated_at
                ) VALUES ($1,$2,$3,$4,FALSE,$5,$5)
                ON CONFLICT (attempt_id, exam_question_id) DO UPDATE
                SET text_answer = EXCLUDED.text_answer,
                    updated_at = EXCLUDED.updated_at",
            )
            .bind(&upsert.id)
            .bind(&upsert.attempt_id)
            .bind(&upsert.exam_question_id)
            .bind(text_answer)
            .bind(upsert.now)
            .execute(executor)
            .await?;
        }
    }

    Ok(())
}

pub(crate) async fn apply_grade(
    pool: &PgPool,
    grade: &AnswerGrade,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE answers
         SET is_correct = $2, score = $3, is_graded = TRUE, updated_at = $4
         WHERE id = $1",
    )
    .bind(&grade.answer_id)
    .bind(grade.is_correct)
    .bind(grade.score)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}
