use std::collections::HashMap;

use sqlx::PgPool;

use crate::db::models::{ExamDefinition, GradedQuestion, QuestionOption};
use crate::db::types::QuestionKind;

#[derive(Debug, sqlx::FromRow)]
struct ExamRow {
    id: String,
    course_id: String,
    title: String,
    description: Option<String>,
    duration_minutes: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct QuestionRow {
    id: String,
    question_id: String,
    title: String,
    question_text: String,
    kind: QuestionKind,
    points: f64,
    order_number: i32,
    max_words: Option<i32>,
}

#[derive(Debug, sqlx::FromRow)]
struct OptionRow {
    id: String,
    exam_question_id: String,
    option_text: String,
    order_index: i32,
    is_correct: bool,
}

pub(crate) async fn find_definition(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Option<ExamDefinition>, sqlx::Error> {
    let exam = sqlx::query_as::<_, ExamRow>(
        "SELECT id, course_id, title, description, duration_minutes FROM exams WHERE id = $1",
    )
    .bind(exam_id)
    .fetch_optional(pool)
    .await?;

    let Some(exam) = exam else {
        return Ok(None);
    };

    let question_rows = sqlx::query_as::<_, QuestionRow>(
        "SELECT id, question_id, title, question_text, kind, points, order_number, max_words
         FROM exam_questions
         WHERE exam_id = $1
         ORDER BY order_number",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    let option_rows = sqlx::query_as::<_, OptionRow>(
        "SELECT o.id, o.exam_question_id, o.option_text, o.order_index, o.is_correct
         FROM question_options o
         JOIN exam_questions q ON q.id = o.exam_question_id
         WHERE q.exam_id = $1
         ORDER BY o.order_index",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    let mut options_by_question: HashMap<String, Vec<QuestionOption>> = HashMap::new();
    for row in option_rows {
        options_by_question.entry(row.exam_question_id).or_default().push(QuestionOption {
            id: row.id,
            text: row.option_text,
            order_index: row.order_index,
            is_correct: row.is_correct,
        });
    }

    let questions = question_rows
        .into_iter()
        .map(|row| GradedQuestion {
            options: options_by_question.remove(&row.id).unwrap_or_default(),
            id: row.id,
            question_id: row.question_id,
            title: row.title,
            text: row.question_text,
            kind: row.kind,
            points: row.points,
            order_number: row.order_number,
            max_words: row.max_words,
        })
        .collect();

    Ok(Some(ExamDefinition {
        id: exam.id,
        course_id: exam.course_id,
        title: exam.title,
        description: exam.description,
        duration_minutes: exam.duration_minutes,
        questions,
    }))
}
