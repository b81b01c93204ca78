use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Attempt;
use crate::stores::{AnswerGrade, NewAttempt};

pub(crate) const COLUMNS: &str = "\
    id, student_id, exam_id, start_time, end_time, is_completed, \
    total_score, max_score, created_at, updated_at";

pub(crate) async fn create(
    executor: impl sqlx::PgExecutor<'_>,
    attempt: &NewAttempt,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO attempts (
            id, student_id, exam_id, start_time, is_completed,
            max_score, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,FALSE,$5,$6,$7)
        ON CONFLICT (student_id, exam_id) DO NOTHING",
    )
    .bind(&attempt.id)
    .bind(&attempt.student_id)
    .bind(&attempt.exam_id)
    .bind(attempt.start_time)
    .bind(attempt.max_score)
    .bind(attempt.created_at)
    .bind(attempt.updated_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!("SELECT {COLUMNS} FROM attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn exists_by_student_and_exam(
    executor: impl sqlx::PgExecutor<'_>,
    student_id: &str,
    exam_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM attempts WHERE student_id = $1 AND exam_id = $2",
    )
    .bind(student_id)
    .bind(exam_id)
    .fetch_one(executor)
    .await
    .map(|count| count > 0)
}

/// Completion is a single transaction: the conditional update on
/// `is_completed` decides the winner, the grade back-fills and total ride
/// along with it.
pub(crate) async fn complete(
    pool: &PgPool,
    id: &str,
    end_time: PrimitiveDateTime,
    grades: &[AnswerGrade],
    total_score: f64,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE attempts
         SET is_completed = TRUE, end_time = $2, total_score = $3, updated_at = $2
         WHERE id = $1 AND is_completed = FALSE",
    )
    .bind(id)
    .bind(end_time)
    .bind(total_score)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    for grade in grades {
        sqlx::query(
            "UPDATE answers
             SET is_correct = $2, score = $3, is_graded = TRUE, updated_at = $4
             WHERE id = $1",
        )
        .bind(&grade.answer_id)
        .bind(grade.is_correct)
        .bind(grade.score)
        .bind(end_time)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

pub(crate) async fn update_total_score(
    pool: &PgPool,
    id: &str,
    total_score: f64,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE attempts SET total_score = $2, updated_at = $3 WHERE id = $1")
        .bind(id)
        .bind(total_score)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(())
}

pub(crate) async fn list_expired(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<Vec<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(
        "SELECT a.id, a.student_id, a.exam_id, a.start_time, a.end_time, a.is_completed,
                a.total_score, a.max_score, a.created_at, a.updated_at
         FROM attempts a
         JOIN exams e ON e.id = a.exam_id
         WHERE a.is_completed = FALSE
           AND a.start_time + make_interval(mins => e.duration_minutes) < $1",
    )
    .bind(now)
    .fetch_all(pool)
    .await
}
