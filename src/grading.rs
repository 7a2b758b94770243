use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::TestDetail;
use crate::storage::{self, QuizStorage};

const LOW_SCORE_BELOW: f64 = 30.0;
const MEDIUM_SCORE_BELOW: f64 = 70.0;

/// Answers picked by a test taker, keyed by question id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub test_id: i64,
    pub selections: BTreeMap<i64, i64>,
}

impl Submission {
    pub fn new(test_id: i64) -> Self {
        Self {
            test_id,
            selections: BTreeMap::new(),
        }
    }

    pub fn select(mut self, question_id: i64, answer_id: i64) -> Self {
        self.selections.insert(question_id, answer_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Low,
    Medium,
    High,
}

impl ScoreBand {
    pub fn for_score(score: f64) -> Self {
        if score < LOW_SCORE_BELOW {
            ScoreBand::Low
        } else if score < MEDIUM_SCORE_BELOW {
            ScoreBand::Medium
        } else {
            ScoreBand::High
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScoreBand::Low => "low",
            ScoreBand::Medium => "medium",
            ScoreBand::High => "high",
        }
    }

    pub fn analysis(self) -> &'static str {
        match self {
            ScoreBand::Low => "Low score: most answers were wrong, the material should be reviewed.",
            ScoreBand::Medium => "Medium score: some areas need attention.",
            ScoreBand::High => "High score: the material is well understood.",
        }
    }
}

impl fmt::Display for ScoreBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScoreBand {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(ScoreBand::Low),
            "medium" => Ok(ScoreBand::Medium),
            "high" => Ok(ScoreBand::High),
            other => Err(AppError::validation("band", format!("unknown score band {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionOutcome {
    pub question_id: i64,
    pub selected_answer_id: Option<i64>,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeReport {
    pub test_id: i64,
    pub correct: u32,
    pub total: u32,
    pub score: f64,
    pub band: ScoreBand,
    pub outcomes: Vec<QuestionOutcome>,
    pub selections: BTreeMap<i64, i64>,
}

impl GradeReport {
    pub fn analysis(&self) -> &'static str {
        self.band.analysis()
    }
}

/// Scores a submission against the correct answers of `detail`.
///
/// Unanswered questions count as wrong. Selecting a question outside the test,
/// or an answer that belongs to another question, is rejected.
pub fn grade(detail: &TestDetail, submission: &Submission) -> AppResult<GradeReport> {
    if submission.test_id != detail.test.id {
        return Err(AppError::validation(
            "test_id",
            format!(
                "submission is for test {} but test {} was loaded",
                submission.test_id, detail.test.id
            ),
        ));
    }
    if !detail.test.is_active {
        return Err(AppError::validation(
            "test",
            format!("test {} is not active", detail.test.id),
        ));
    }

    for (question_id, answer_id) in &submission.selections {
        let question = detail.question(*question_id).ok_or_else(|| {
            AppError::validation(
                "selections",
                format!("question {question_id} is not part of test {}", detail.test.id),
            )
        })?;
        if !question.answers.iter().any(|answer| answer.id == *answer_id) {
            return Err(AppError::validation(
                "selections",
                format!("answer {answer_id} does not belong to question {question_id}"),
            ));
        }
    }

    let outcomes: Vec<QuestionOutcome> = detail
        .questions
        .iter()
        .map(|question_detail| {
            let question_id = question_detail.question.id;
            let selected_answer_id = submission.selections.get(&question_id).copied();
            let is_correct = selected_answer_id.is_some_and(|selected| {
                question_detail
                    .correct_answers()
                    .any(|answer| answer.id == selected)
            });
            QuestionOutcome {
                question_id,
                selected_answer_id,
                is_correct,
            }
        })
        .collect();

    let total = outcomes.len() as u32;
    let correct = outcomes.iter().filter(|outcome| outcome.is_correct).count() as u32;
    let score = if total == 0 {
        0.0
    } else {
        f64::from(correct) * 100.0 / f64::from(total)
    };
    let band = ScoreBand::for_score(score);

    tracing::info!(test_id = detail.test.id, correct, total, score, %band, "graded submission");
    Ok(GradeReport {
        test_id: detail.test.id,
        correct,
        total,
        score,
        band,
        outcomes,
        selections: submission.selections.clone(),
    })
}

pub fn grade_submission(storage: &QuizStorage, submission: &Submission) -> AppResult<GradeReport> {
    let detail = storage.test_detail(submission.test_id)?;
    grade(&detail, submission)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredResult {
    pub id: i64,
    pub test_id: i64,
    pub correct: u32,
    pub total: u32,
    pub score: f64,
    pub band: ScoreBand,
    pub selections: BTreeMap<i64, i64>,
    pub created_at: DateTime<Utc>,
}

fn stored_result_from_row(row: &Row<'_>) -> rusqlite::Result<(StoredResult, String, String)> {
    let result = StoredResult {
        id: row.get(0)?,
        test_id: row.get(1)?,
        correct: row.get(2)?,
        total: row.get(3)?,
        score: row.get(4)?,
        band: ScoreBand::Low,
        selections: BTreeMap::new(),
        created_at: row.get(7)?,
    };
    Ok((result, row.get(5)?, row.get(6)?))
}

pub fn record_result(storage: &QuizStorage, report: &GradeReport) -> AppResult<StoredResult> {
    let selections = serde_json::to_string(&report.selections)?;
    let created_at = Utc::now();

    storage.with_conn(|conn| {
        storage::fetch_test(conn, report.test_id)?;
        conn.execute(
            "INSERT INTO test_results (test_id, correct, total, score, band, selections, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                report.test_id,
                report.correct,
                report.total,
                report.score,
                report.band.as_str(),
                selections,
                created_at
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::info!(id, test_id = report.test_id, "recorded test result");
        Ok(StoredResult {
            id,
            test_id: report.test_id,
            correct: report.correct,
            total: report.total,
            score: report.score,
            band: report.band,
            selections: report.selections.clone(),
            created_at,
        })
    })
}

/// Stored results of a test, newest first.
pub fn results_for_test(storage: &QuizStorage, test_id: i64) -> AppResult<Vec<StoredResult>> {
    let rows = storage.with_conn(|conn| {
        storage::fetch_test(conn, test_id)?;
        let mut stmt = conn.prepare(
            "SELECT id, test_id, correct, total, score, band, selections, created_at
             FROM test_results
             WHERE test_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![test_id], stored_result_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    rows.into_iter()
        .map(|(mut result, band, selections)| -> AppResult<StoredResult> {
            result.band = band.parse()?;
            result.selections = serde_json::from_str(&selections)?;
            Ok(result)
        })
        .collect()
}
