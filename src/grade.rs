use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::csvq::QuestionKind;

/// A stored question as the grader sees it: 0-based correct option indices.
#[derive(Debug, Clone)]
pub struct GradableQuestion {
    pub id: String,
    pub kind: QuestionKind,
    pub points: i64,
    pub correct: BTreeSet<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
    Ungraded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionVerdict {
    pub question_id: String,
    pub verdict: Verdict,
    pub points_earned: i64,
    pub points_possible: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeOutcome {
    pub earned_points: i64,
    pub total_points: i64,
    pub score_percent: f64,
    pub correct_count: usize,
    pub incorrect_count: usize,
    pub ungraded_count: usize,
    pub per_question: Vec<QuestionVerdict>,
}

/// Grade a set of submitted selections against stored questions.
///
/// Choice questions are correct only on exact set equality with the stored
/// correct indices; a missing submission counts as incorrect. Text questions
/// are ungraded (they go to manual review) and contribute nothing to
/// `total_points` or the percent.
pub fn grade_answers(
    questions: &[GradableQuestion],
    answers: &HashMap<String, Vec<usize>>,
) -> GradeOutcome {
    let mut earned: i64 = 0;
    let mut total: i64 = 0;
    let mut correct_count = 0;
    let mut incorrect_count = 0;
    let mut ungraded_count = 0;
    let mut per_question = Vec::with_capacity(questions.len());

    for q in questions {
        if !q.kind.is_choice() {
            ungraded_count += 1;
            per_question.push(QuestionVerdict {
                question_id: q.id.clone(),
                verdict: Verdict::Ungraded,
                points_earned: 0,
                points_possible: 0,
            });
            continue;
        }

        total += q.points;
        let submitted: BTreeSet<usize> = answers
            .get(&q.id)
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default();

        let is_correct = !submitted.is_empty() && submitted == q.correct;
        let points_earned = if is_correct { q.points } else { 0 };
        earned += points_earned;
        if is_correct {
            correct_count += 1;
        } else {
            incorrect_count += 1;
        }
        per_question.push(QuestionVerdict {
            question_id: q.id.clone(),
            verdict: if is_correct {
                Verdict::Correct
            } else {
                Verdict::Incorrect
            },
            points_earned,
            points_possible: q.points,
        });
    }

    let score_percent = if total > 0 {
        100.0 * (earned as f64) / (total as f64)
    } else {
        0.0
    };

    GradeOutcome {
        earned_points: earned,
        total_points: total,
        score_percent,
        correct_count,
        incorrect_count,
        ungraded_count,
        per_question,
    }
}
