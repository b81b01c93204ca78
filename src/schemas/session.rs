use serde::{Deserialize, Serialize};

use crate::db::types::QuestionKind;

/// One answer submission. `selected_option_id` applies to single-choice
/// questions, `text_answer` to descriptive ones; the engine validates the
/// payload against the question's kind.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAnswer {
    pub exam_question_id: String,
    #[serde(default)]
    pub selected_option_id: Option<String>,
    #[serde(default)]
    pub text_answer: Option<String>,
}

/// What a student sees while an attempt is running: the clock and the
/// question list, with correctness flags stripped and previously stored
/// answers attached for client-side resume.
#[derive(Debug, Serialize)]
pub struct AttemptView {
    pub attempt_id: String,
    pub exam_id: String,
    pub exam_title: String,
    pub exam_description: Option<String>,
    pub duration_minutes: i32,
    pub start_time: String,
    pub remaining_seconds: i64,
    pub total_questions: usize,
    pub max_score: f64,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Serialize)]
pub struct QuestionView {
    pub exam_question_id: String,
    pub question_id: String,
    pub title: String,
    pub text: String,
    pub kind: QuestionKind,
    pub points: f64,
    pub order_number: i32,
    pub options: Vec<OptionView>,
    pub max_words: Option<i32>,
    pub previous_answer: Option<PreviousAnswer>,
}

#[derive(Debug, Serialize)]
pub struct OptionView {
    pub id: String,
    pub text: String,
    pub order_index: i32,
}

#[derive(Debug, Serialize)]
pub struct PreviousAnswer {
    pub answer_id: String,
    pub selected_option_id: Option<String>,
    pub text_answer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResultView {
    pub attempt_id: String,
    pub exam_title: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_minutes: i32,
    pub total_score: f64,
    pub max_score: f64,
    pub percentage: f64,
    pub total_questions: usize,
    pub answered_questions: usize,
    pub correct_answers: usize,
    pub graded_questions: usize,
    pub ungraded_questions: usize,
    pub is_fully_graded: bool,
    pub answers: Vec<AnswerDetail>,
}

#[derive(Debug, Serialize)]
pub struct AnswerDetail {
    pub answer_id: String,
    pub exam_question_id: String,
    pub question_title: String,
    pub question_text: String,
    pub kind: QuestionKind,
    pub max_points: f64,
    pub score: Option<f64>,
    pub is_correct: Option<bool>,
    pub is_graded: bool,
    pub selected_option_id: Option<String>,
    pub selected_option_text: Option<String>,
    pub text_answer: Option<String>,
}

/// Outcome of a batch submission. A failed item never aborts its siblings;
/// each failure is recorded here and logged.
#[derive(Debug, Default, Serialize)]
pub struct BatchSubmitReport {
    pub submitted: usize,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Serialize)]
pub struct BatchFailure {
    pub exam_question_id: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_answer_tolerates_missing_optional_fields() {
        let payload: SubmitAnswer =
            serde_json::from_str(r#"{"exam_question_id": "eq-1"}"#).unwrap();
        assert_eq!(payload.exam_question_id, "eq-1");
        assert!(payload.selected_option_id.is_none());
        assert!(payload.text_answer.is_none());
    }

    #[test]
    fn option_view_carries_no_correctness_flag() {
        let view = OptionView { id: "o-1".to_string(), text: "A".to_string(), order_index: 0 };
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("is_correct").is_none());
    }
}
