use crate::db::models::{Answer, ExamDefinition, QuestionOption};
use crate::db::types::QuestionKind;
use crate::stores::AnswerGrade;

pub(crate) fn grade_choice(option: &QuestionOption, points: f64) -> (bool, f64) {
    if option.is_correct {
        (true, points)
    } else {
        (false, 0.0)
    }
}

/// Grades for every ungraded single-choice answer. Submission grades these
/// synchronously, so this normally returns nothing; completion runs it as a
/// final sweep over the attempt.
pub(crate) fn pending_choice_grades(
    exam: &ExamDefinition,
    answers: &[Answer],
) -> Vec<AnswerGrade> {
    answers
        .iter()
        .filter(|answer| !answer.is_graded)
        .filter_map(|answer| {
            let question = exam.question(&answer.exam_question_id)?;
            if question.kind != QuestionKind::SingleChoice {
                return None;
            }
            let option_id = answer.selected_option_id.as_deref()?;
            let option = question.option(option_id)?;
            let (is_correct, score) = grade_choice(option, question.points);
            Some(AnswerGrade {
                answer_id: answer.id.clone(),
                is_correct: Some(is_correct),
                score,
            })
        })
        .collect()
}

/// Sum of awarded scores once `grades` have been applied on top of the
/// stored answers. Ungraded answers contribute nothing.
pub(crate) fn total_score(answers: &[Answer], grades: &[AnswerGrade]) -> f64 {
    answers
        .iter()
        .map(|answer| {
            if let Some(grade) = grades.iter().find(|grade| grade.answer_id == answer.id) {
                grade.score
            } else if answer.is_graded {
                answer.score.unwrap_or(0.0)
            } else {
                0.0
            }
        })
        .sum()
}

pub(crate) fn percentage(total_score: f64, max_score: f64) -> f64 {
    if max_score > 0.0 {
        total_score / max_score * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    use crate::db::models::GradedQuestion;

    fn option(id: &str, is_correct: bool) -> QuestionOption {
        QuestionOption { id: id.to_string(), text: id.to_string(), order_index: 0, is_correct }
    }

    fn answer(id: &str, question_id: &str, option_id: Option<&str>, graded: bool, score: Option<f64>) -> Answer {
        Answer {
            id: id.to_string(),
            attempt_id: "attempt".to_string(),
            exam_question_id: question_id.to_string(),
            selected_option_id: option_id.map(str::to_string),
            text_answer: None,
            is_correct: None,
            score,
            is_graded: graded,
            created_at: datetime!(2025-03-01 10:00:00),
            updated_at: datetime!(2025-03-01 10:00:00),
        }
    }

    fn exam_with_choice_question() -> ExamDefinition {
        ExamDefinition {
            id: "exam".to_string(),
            course_id: "course".to_string(),
            title: "Exam".to_string(),
            description: None,
            duration_minutes: 30,
            questions: vec![GradedQuestion {
                id: "q1".to_string(),
                question_id: "bank-1".to_string(),
                title: "Q1".to_string(),
                text: "Pick one".to_string(),
                kind: QuestionKind::SingleChoice,
                points: 5.0,
                order_number: 1,
                options: vec![option("a", true), option("b", false)],
                max_words: None,
            }],
        }
    }

    #[test]
    fn grade_choice_awards_full_points_or_zero() {
        assert_eq!(grade_choice(&option("a", true), 5.0), (true, 5.0));
        assert_eq!(grade_choice(&option("b", false), 5.0), (false, 0.0));
    }

    #[test]
    fn pending_grades_cover_only_ungraded_choice_answers() {
        let exam = exam_with_choice_question();
        let answers = vec![
            answer("a1", "q1", Some("a"), false, None),
            answer("a2", "q1", Some("b"), true, Some(0.0)),
        ];

        let grades = pending_choice_grades(&exam, &answers);
        assert_eq!(grades.len(), 1);
        assert_eq!(grades[0].answer_id, "a1");
        assert_eq!(grades[0].is_correct, Some(true));
        assert_eq!(grades[0].score, 5.0);
    }

    #[test]
    fn total_score_prefers_fresh_grades_and_skips_ungraded() {
        let answers = vec![
            answer("a1", "q1", None, true, Some(4.0)),
            answer("a2", "q2", None, false, None),
            answer("a3", "q3", None, false, None),
        ];
        let grades =
            vec![AnswerGrade { answer_id: "a3".to_string(), is_correct: Some(true), score: 2.0 }];

        assert_eq!(total_score(&answers, &grades), 6.0);
    }

    #[test]
    fn percentage_guards_against_zero_max() {
        assert_eq!(percentage(5.0, 15.0), 5.0 / 15.0 * 100.0);
        assert_eq!(percentage(0.0, 0.0), 0.0);
    }
}
