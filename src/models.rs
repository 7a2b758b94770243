use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const TITLE_MAX_LENGTH: usize = 200;
const LABEL_MAX_CHARS: usize = 50;

/// Table metadata shared by every stored record type.
pub trait Model {
    const TABLE: &'static str;
    /// Column names, in the order the row readers expect them.
    const FIELDS: &'static [&'static str];
    /// Default ordering; a leading `-` sorts descending.
    const ORDERING: &'static [&'static str];
    const VERBOSE_NAME: &'static str;
    const VERBOSE_NAME_PLURAL: &'static str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Test {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Model for Test {
    const TABLE: &'static str = "tests";
    const FIELDS: &'static [&'static str] =
        &["id", "title", "description", "created_at", "updated_at", "is_active"];
    const ORDERING: &'static [&'static str] = &["-created_at"];
    const VERBOSE_NAME: &'static str = "test";
    const VERBOSE_NAME_PLURAL: &'static str = "tests";
}

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub test_id: i64,
    pub text: String,
    pub order: u32,
}

impl Model for Question {
    const TABLE: &'static str = "questions";
    const FIELDS: &'static [&'static str] = &["id", "test_id", "text", "order"];
    const ORDERING: &'static [&'static str] = &["order"];
    const VERBOSE_NAME: &'static str = "question";
    const VERBOSE_NAME_PLURAL: &'static str = "questions";
}

impl Question {
    /// Label in the form `"<test title> - <start of text>"`.
    pub fn label(&self, test_title: &str) -> String {
        format!("{} - {}", test_title, truncate_chars(&self.text, LABEL_MAX_CHARS))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub text: String,
    pub is_correct: bool,
}

impl Model for Answer {
    const TABLE: &'static str = "answers";
    const FIELDS: &'static [&'static str] = &["id", "question_id", "text", "is_correct"];
    const ORDERING: &'static [&'static str] = &["id"];
    const VERBOSE_NAME: &'static str = "answer";
    const VERBOSE_NAME_PLURAL: &'static str = "answers";
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(truncate_chars(&self.text, LABEL_MAX_CHARS))
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTest {
    pub title: String,
    pub description: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl NewTest {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            is_active: true,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        validate_title(&self.title)?;
        require_text("description", &self.description)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl TestChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.is_active.is_none()
    }

    pub fn validate(&self) -> AppResult<()> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(description) = &self.description {
            require_text("description", description)?;
        }
        Ok(())
    }

    /// Human readable list of the changed fields, used for the admin log.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.is_active.is_some() {
            fields.push("is_active");
        }
        fields
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewQuestion {
    pub text: String,
    #[serde(default)]
    pub order: u32,
}

impl NewQuestion {
    pub fn new(text: impl Into<String>, order: u32) -> Self {
        Self {
            text: text.into(),
            order,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        require_text("text", &self.text)
    }

    /// An untouched extra row in an inline form.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.order == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionChanges {
    pub text: Option<String>,
    pub order: Option<u32>,
}

impl QuestionChanges {
    pub fn validate(&self) -> AppResult<()> {
        match &self.text {
            Some(text) => require_text("text", text),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewAnswer {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

impl NewAnswer {
    pub fn new(text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            text: text.into(),
            is_correct,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        require_text("text", &self.text)
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && !self.is_correct
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerChanges {
    pub text: Option<String>,
    pub is_correct: Option<bool>,
}

impl AnswerChanges {
    pub fn validate(&self) -> AppResult<()> {
        match &self.text {
            Some(text) => require_text("text", text),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDetail {
    pub question: Question,
    pub answers: Vec<Answer>,
}

impl QuestionDetail {
    pub fn correct_answers(&self) -> impl Iterator<Item = &Answer> {
        self.answers.iter().filter(|answer| answer.is_correct)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDetail {
    pub test: Test,
    pub questions: Vec<QuestionDetail>,
}

impl TestDetail {
    pub fn question(&self, question_id: i64) -> Option<&QuestionDetail> {
        self.questions
            .iter()
            .find(|detail| detail.question.id == question_id)
    }
}

fn validate_title(title: &str) -> AppResult<()> {
    require_text("title", title)?;
    let length = title.chars().count();
    if length > TITLE_MAX_LENGTH {
        return Err(AppError::validation(
            "title",
            format!("at most {TITLE_MAX_LENGTH} characters allowed, got {length}"),
        ));
    }
    Ok(())
}

fn require_text(field: &'static str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(field, "this field is required"));
    }
    Ok(())
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
