use sqlx::types::Json;
use time::PrimitiveDateTime;

use crate::db::models::{ExamSession, GradeResult, QuestionOutcome, QuestionSet};
use crate::services::exam_timing::time_taken_seconds;

/// Compares stored answers with the answer key. Answers to questions outside the
/// set are ignored; a missing answer scores zero.
pub(crate) fn grade_session(
    session: &ExamSession,
    set: &QuestionSet,
    graded_at: PrimitiveDateTime,
) -> GradeResult {
    let answers = session.answers();
    let mut earned_points = 0.0;
    let mut total_points = 0.0;
    let mut breakdown = Vec::with_capacity(set.questions.len());

    for question in &set.questions {
        let answer = answers.get(&question.id).cloned();
        let correct = answer
            .as_deref()
            .is_some_and(|given| answers_match(given, &question.answer_key));
        let points_awarded = if correct { question.points } else { 0.0 };

        total_points += question.points;
        earned_points += points_awarded;
        breakdown.push(QuestionOutcome {
            question_id: question.id.clone(),
            answer,
            correct,
            points_awarded,
            points_possible: question.points,
        });
    }

    let score = if total_points > 0.0 { earned_points / total_points * 100.0 } else { 0.0 };

    GradeResult {
        session_id: session.id.clone(),
        score,
        earned_points,
        total_points,
        passed: score >= set.passing_score,
        per_question_breakdown: Json(breakdown),
        time_taken_seconds: time_taken_seconds(
            session.started_at,
            session.deadline,
            session.ended_at,
        ),
        graded_at,
    }
}

/// Free-text answers match the key ignoring case and surrounding whitespace.
fn answers_match(given: &str, key: &str) -> bool {
    given.trim().to_lowercase() == key.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use time::macros::datetime;

    use super::*;
    use crate::db::models::Question;
    use crate::db::types::SessionState;

    fn question(id: &str, key: &str, points: f64) -> Question {
        Question { id: id.to_string(), answer_key: key.to_string(), points }
    }

    fn fixture(answers: &[(&str, &str)]) -> (ExamSession, QuestionSet) {
        let started = datetime!(2025-03-01 10:00);
        let session = ExamSession {
            id: "s1".to_string(),
            user_id: "u1".to_string(),
            exam_id: "e1".to_string(),
            started_at: started,
            deadline: datetime!(2025-03-01 10:30),
            state: SessionState::Submitted,
            answers: Json(
                answers.iter().map(|(q, a)| (q.to_string(), a.to_string())).collect::<HashMap<_, _>>(),
            ),
            attempt_token: Some("t1".to_string()),
            ended_at: Some(datetime!(2025-03-01 10:20)),
            graded_at: None,
            created_at: started,
            updated_at: started,
        };
        let set = QuestionSet {
            exam_id: "e1".to_string(),
            title: "Capitals".to_string(),
            duration_seconds: Some(1800),
            passing_score: 60.0,
            available_from: None,
            available_until: None,
            questions: vec![question("q1", "Paris", 2.0), question("q2", "Rome", 1.0), question("q3", "Oslo", 1.0)],
        };
        (session, set)
    }

    #[test]
    fn weighted_score_and_pass_flag() {
        let (session, set) = fixture(&[("q1", " Paris "), ("q2", "Rome"), ("q3", "Bergen")]);
        let result = grade_session(&session, &set, datetime!(2025-03-01 10:21));

        assert_eq!(result.earned_points, 3.0);
        assert_eq!(result.total_points, 4.0);
        assert_eq!(result.score, 75.0);
        assert!(result.passed);
        assert_eq!(result.time_taken_seconds, 1200);
        assert_eq!(result.per_question_breakdown.0.len(), 3);
        assert!(!result.per_question_breakdown.0[2].correct);
    }

    #[test]
    fn answers_ignore_case_and_surrounding_whitespace() {
        let (session, set) = fixture(&[("q1", "paris"), ("q2", " ROME\n"), ("q3", "Os lo")]);
        let result = grade_session(&session, &set, datetime!(2025-03-01 10:21));

        let correct: Vec<bool> =
            result.per_question_breakdown.0.iter().map(|outcome| outcome.correct).collect();
        assert_eq!(correct, vec![true, true, false]);
        assert_eq!(result.score, 75.0);
    }

    #[test]
    fn unanswered_and_unknown_questions_score_zero() {
        let (session, set) = fixture(&[("q9", "Paris")]);
        let result = grade_session(&session, &set, datetime!(2025-03-01 10:21));

        assert_eq!(result.score, 0.0);
        assert!(!result.passed);
        assert!(result.per_question_breakdown.0.iter().all(|outcome| outcome.answer.is_none()));
    }

    #[test]
    fn empty_question_set_scores_zero() {
        let (session, mut set) = fixture(&[("q1", "Paris")]);
        set.questions.clear();
        set.passing_score = 0.0;
        let result = grade_session(&session, &set, datetime!(2025-03-01 10:21));

        assert_eq!(result.score, 0.0);
        assert!(result.passed);
    }
}
