//! Model administration: change lists, inline editing and the action log.
//!
//! Each registered model gets a [`ModelAdmin`] describing the columns shown in
//! its change list, the fields searched and the filters offered. Writes go
//! through [`AdminSite`], which requires a staff login, saves a parent together
//! with its inline rows in one transaction and records every change.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::auth::{self, User};
use crate::error::{AppError, AppResult};
use crate::models::{
    Answer, AnswerChanges, Model, NewAnswer, NewQuestion, NewTest, Question, QuestionChanges,
    QuestionDetail, Test, TestChanges, TestDetail,
};
use crate::storage::{self, QuestionQuery, QuizStorage, TestQuery};

/// Declarative configuration of a model's change list.
///
/// `list_display` and `search_fields` name fields that [`ModelAdmin::field_value`]
/// resolves, `list_filter` names the query parameters accepted by
/// [`ModelAdmin::query_from_params`], and `ordering` is handed to the SQL query.
pub trait ModelAdmin {
    type Row;
    type Query: Default;

    fn list_display(&self) -> &'static [&'static str];
    fn list_filter(&self) -> &'static [&'static str];
    fn search_fields(&self) -> &'static [&'static str];
    fn ordering(&self) -> &'static [&'static str];

    /// Rows matching the query, sorted by `ordering()`.
    fn queryset(&self, storage: &QuizStorage, query: &Self::Query) -> AppResult<Vec<Self::Row>>;

    /// Display value of a named field, `None` for unknown names.
    fn field_value(&self, row: &Self::Row, field: &str) -> Option<String>;

    /// Sets one `list_filter` field of the query from its text form.
    fn apply_filter(&self, query: &mut Self::Query, field: &str, value: &str) -> AppResult<()>;

    /// Builds a query from `field=value` pairs; only `list_filter` fields are accepted.
    fn query_from_params(&self, params: &[(String, String)]) -> AppResult<Self::Query> {
        let mut query = Self::Query::default();
        for (field, value) in params {
            if !self.list_filter().contains(&field.as_str()) {
                return Err(AppError::validation(
                    "filter",
                    format!(
                        "unknown filter {field}, expected one of: {}",
                        self.list_filter().join(", ")
                    ),
                ));
            }
            self.apply_filter(&mut query, field, value)?;
        }
        Ok(query)
    }

    /// Values of `search_fields`, in the same order.
    fn search_values(&self, row: &Self::Row) -> Vec<String> {
        self.search_fields()
            .iter()
            .filter_map(|field| self.field_value(row, field))
            .collect()
    }

    /// Cell values of `list_display`, in the same order.
    fn row_values(&self, row: &Self::Row) -> Vec<String> {
        self.list_display()
            .iter()
            .map(|field| self.field_value(row, field).unwrap_or_default())
            .collect()
    }

    fn changelist(
        &self,
        storage: &QuizStorage,
        query: &Self::Query,
        search: Option<&str>,
    ) -> AppResult<Vec<Self::Row>> {
        let mut rows = self.queryset(storage, query)?;
        let terms = search_terms(search.unwrap_or_default());
        if !terms.is_empty() {
            rows.retain(|row| matches_search(&terms, &self.search_values(row)));
        }
        Ok(rows)
    }

    fn render_changelist(&self, rows: &[Self::Row]) -> String {
        let mut builder = Builder::default();
        builder.push_record(self.list_display().iter().map(|column| column.to_string()));
        for row in rows {
            builder.push_record(self.row_values(row));
        }
        let mut table = builder.build();
        table.with(Style::modern());
        table.to_string()
    }
}

/// Inline editing of child rows on a parent's change form.
pub trait InlineAdmin {
    type Form: Default;

    /// Number of blank rows offered for new children.
    fn extra(&self) -> usize;

    fn blank_inline_rows(&self) -> Vec<InlineRow<Self::Form>> {
        (0..self.extra()).map(|_| InlineRow::blank()).collect()
    }
}

/// One row of an inline formset.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineRow<F> {
    pub id: Option<i64>,
    pub form: F,
    pub delete: bool,
}

impl<F: Default> InlineRow<F> {
    pub fn blank() -> Self {
        Self::new(F::default())
    }

    pub fn new(form: F) -> Self {
        Self {
            id: None,
            form,
            delete: false,
        }
    }

    pub fn existing(id: i64, form: F) -> Self {
        Self {
            id: Some(id),
            form,
            delete: false,
        }
    }

    pub fn deletion(id: i64) -> Self {
        Self {
            id: Some(id),
            form: F::default(),
            delete: true,
        }
    }
}

fn parse_filter_value<T: std::str::FromStr>(field: &str, value: &str) -> AppResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::validation("filter", format!("invalid value {value:?} for {field}")))
}

pub struct TestAdmin;

impl ModelAdmin for TestAdmin {
    type Row = Test;
    type Query = TestQuery;

    fn list_display(&self) -> &'static [&'static str] {
        &["title", "created_at", "is_active"]
    }

    fn list_filter(&self) -> &'static [&'static str] {
        &["is_active"]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["title", "description"]
    }

    fn ordering(&self) -> &'static [&'static str] {
        Test::ORDERING
    }

    fn queryset(&self, storage: &QuizStorage, query: &TestQuery) -> AppResult<Vec<Test>> {
        storage.with_conn(|conn| storage::select_tests(conn, query, self.ordering()))
    }

    fn field_value(&self, row: &Test, field: &str) -> Option<String> {
        match field {
            "id" => Some(row.id.to_string()),
            "title" => Some(row.title.clone()),
            "description" => Some(row.description.clone()),
            "created_at" => Some(format_timestamp(&row.created_at)),
            "updated_at" => Some(format_timestamp(&row.updated_at)),
            "is_active" => Some(yes_no(row.is_active).to_string()),
            _ => None,
        }
    }

    fn apply_filter(&self, query: &mut TestQuery, field: &str, value: &str) -> AppResult<()> {
        match field {
            "is_active" => {
                query.is_active = Some(match value.trim() {
                    "yes" | "1" => true,
                    "no" | "0" => false,
                    other => parse_filter_value(field, other)?,
                });
                Ok(())
            }
            _ => Err(AppError::validation("filter", format!("unknown filter {field}"))),
        }
    }
}

/// A question together with the title of its test, as shown in the change list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionRow {
    pub question: Question,
    pub test_title: String,
}

pub struct QuestionAdmin;

impl ModelAdmin for QuestionAdmin {
    type Row = QuestionRow;
    type Query = QuestionQuery;

    fn list_display(&self) -> &'static [&'static str] {
        &["test", "text", "order"]
    }

    fn list_filter(&self) -> &'static [&'static str] {
        &["test"]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["text"]
    }

    fn ordering(&self) -> &'static [&'static str] {
        Question::ORDERING
    }

    fn queryset(
        &self,
        storage: &QuizStorage,
        query: &QuestionQuery,
    ) -> AppResult<Vec<QuestionRow>> {
        storage.with_conn(|conn| {
            if let Some(test_id) = query.test_id {
                storage::fetch_test(conn, test_id)?;
            }
            let titles: HashMap<i64, String> =
                storage::select_tests(conn, &TestQuery::default(), Test::ORDERING)?
                    .into_iter()
                    .map(|test| (test.id, test.title))
                    .collect();

            let rows = storage::select_questions(conn, query, self.ordering())?
                .into_iter()
                .map(|question| QuestionRow {
                    test_title: titles.get(&question.test_id).cloned().unwrap_or_default(),
                    question,
                })
                .collect();
            Ok(rows)
        })
    }

    fn field_value(&self, row: &QuestionRow, field: &str) -> Option<String> {
        match field {
            "id" => Some(row.question.id.to_string()),
            "test" => Some(row.test_title.clone()),
            "text" => Some(row.question.text.clone()),
            "order" => Some(row.question.order.to_string()),
            _ => None,
        }
    }

    fn apply_filter(&self, query: &mut QuestionQuery, field: &str, value: &str) -> AppResult<()> {
        match field {
            "test" => {
                query.test_id = Some(parse_filter_value(field, value)?);
                Ok(())
            }
            _ => Err(AppError::validation("filter", format!("unknown filter {field}"))),
        }
    }
}

pub struct QuestionInline;

impl InlineAdmin for QuestionInline {
    type Form = NewQuestion;

    fn extra(&self) -> usize {
        1
    }
}

pub struct AnswerInline;

impl InlineAdmin for AnswerInline {
    type Form = NewAnswer;

    fn extra(&self) -> usize {
        4
    }
}

/// Splits a search query into lowercase terms.
pub fn search_terms(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

/// Every term has to appear in at least one of the values.
pub fn matches_search<S: AsRef<str>>(terms: &[String], values: &[S]) -> bool {
    let values: Vec<String> = values
        .iter()
        .map(|value| value.as_ref().to_lowercase())
        .collect();
    terms
        .iter()
        .all(|term| values.iter().any(|value| value.contains(term.as_str())))
}

/// Renders a test's change form: the test fields followed by its question inline.
pub fn render_test_detail(detail: &TestDetail) -> String {
    let test = &detail.test;
    let mut content = String::new();
    content.push_str(&format!("Test #{}: {}\n", test.id, test.title));
    content.push_str(&format!("Description: {}\n", test.description));
    content.push_str(&format!("Active: {}\n", yes_no(test.is_active)));
    content.push_str(&format!("Created: {}\n", format_timestamp(&test.created_at)));
    content.push_str(&format!("Updated: {}\n\n", format_timestamp(&test.updated_at)));

    let mut builder = Builder::default();
    builder.push_record(["id", "order", "question", "answers"].map(String::from));
    for question_detail in &detail.questions {
        let answers = question_detail
            .answers
            .iter()
            .map(|answer| {
                let marker = if answer.is_correct { "[x]" } else { "[ ]" };
                format!("{marker} #{} {}", answer.id, answer)
            })
            .collect::<Vec<_>>()
            .join("\n");
        builder.push_record([
            question_detail.question.id.to_string(),
            question_detail.question.order.to_string(),
            question_detail.question.text.clone(),
            answers,
        ]);
    }
    let mut table = builder.build();
    table.with(Style::modern());
    content.push_str(&table.to_string());
    content
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M").to_string()
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionFlag {
    Addition,
    Change,
    Deletion,
}

impl ActionFlag {
    fn code(self) -> i64 {
        match self {
            ActionFlag::Addition => 1,
            ActionFlag::Change => 2,
            ActionFlag::Deletion => 3,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ActionFlag::Addition),
            2 => Some(ActionFlag::Change),
            3 => Some(ActionFlag::Deletion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub action_time: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub object_type: String,
    pub object_id: i64,
    pub object_repr: String,
    pub action_flag: ActionFlag,
    pub change_message: String,
}

fn log_entry_from_row(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    let code: i64 = row.get(6)?;
    let action_flag = ActionFlag::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Integer,
            format!("unknown action flag {code}").into(),
        )
    })?;

    Ok(LogEntry {
        id: row.get(0)?,
        action_time: row.get(1)?,
        user_id: row.get(2)?,
        object_type: row.get(3)?,
        object_id: row.get(4)?,
        object_repr: row.get(5)?,
        action_flag,
        change_message: row.get(7)?,
    })
}

/// Authenticated entry point for every admin write.
pub struct AdminSite<'a> {
    storage: &'a QuizStorage,
    user: User,
}

impl<'a> AdminSite<'a> {
    pub fn login(storage: &'a QuizStorage, username: &str, password: &str) -> AppResult<Self> {
        let user =
            auth::authenticate(storage, username, password)?.ok_or(AppError::InvalidCredentials)?;
        Self::for_user(storage, user)
    }

    pub fn for_user(storage: &'a QuizStorage, user: User) -> AppResult<Self> {
        if !user.can_administer() {
            tracing::warn!(username = %user.username, "refused admin access");
            return Err(AppError::PermissionDenied(format!(
                "{} is not allowed to use the admin site",
                user.username
            )));
        }
        tracing::info!(username = %user.username, "admin session opened");
        Ok(Self { storage, user })
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn storage(&self) -> &QuizStorage {
        self.storage
    }

    pub fn test_changelist(
        &self,
        query: &TestQuery,
        search: Option<&str>,
    ) -> AppResult<Vec<Test>> {
        TestAdmin.changelist(self.storage, query, search)
    }

    pub fn question_changelist(
        &self,
        query: &QuestionQuery,
        search: Option<&str>,
    ) -> AppResult<Vec<QuestionRow>> {
        QuestionAdmin.changelist(self.storage, query, search)
    }

    pub fn test_detail(&self, id: i64) -> AppResult<TestDetail> {
        self.storage.test_detail(id)
    }

    pub fn question_detail(&self, id: i64) -> AppResult<QuestionDetail> {
        self.storage.with_conn(|conn| {
            let question = storage::fetch_question(conn, id)?;
            let answers = storage::select_answers(conn, id)?;
            Ok(QuestionDetail { question, answers })
        })
    }

    /// Adds a test and its inline questions in one transaction.
    pub fn add_test(
        &self,
        form: &NewTest,
        questions: &[InlineRow<NewQuestion>],
    ) -> AppResult<TestDetail> {
        let user_id = self.user.id;
        self.storage.atomic(|conn| {
            let test = storage::insert_test(conn, form)?;
            log_action(
                conn,
                user_id,
                Test::VERBOSE_NAME,
                test.id,
                &test.to_string(),
                ActionFlag::Addition,
                "Added.",
            )?;
            save_question_inline(conn, user_id, &test, questions)?;
            storage::load_test_detail(conn, test.id)
        })
    }

    /// Applies field changes and inline question edits in one transaction.
    pub fn change_test(
        &self,
        id: i64,
        changes: &TestChanges,
        questions: &[InlineRow<NewQuestion>],
    ) -> AppResult<TestDetail> {
        let user_id = self.user.id;
        self.storage.atomic(|conn| {
            let mut test = storage::fetch_test(conn, id)?;
            let mut messages = Vec::new();
            if !changes.is_empty() {
                test = storage::apply_test_changes(conn, id, changes)?;
                messages.push(format!("Changed {}.", changes.changed_fields().join(", ")));
            }
            let inline_messages = save_question_inline(conn, user_id, &test, questions)?;
            if changes.is_empty() && !inline_messages.is_empty() {
                test = storage::touch_test(conn, id)?;
            }
            messages.extend(inline_messages);

            if !messages.is_empty() {
                log_action(
                    conn,
                    user_id,
                    Test::VERBOSE_NAME,
                    test.id,
                    &test.to_string(),
                    ActionFlag::Change,
                    &messages.join(" "),
                )?;
            }
            storage::load_test_detail(conn, id)
        })
    }

    pub fn set_test_active(&self, id: i64, is_active: bool) -> AppResult<Test> {
        let changes = TestChanges {
            is_active: Some(is_active),
            ..TestChanges::default()
        };
        Ok(self.change_test(id, &changes, &[])?.test)
    }

    /// Deletes a test; its questions and answers go with it.
    pub fn delete_test(&self, id: i64) -> AppResult<Test> {
        let user_id = self.user.id;
        self.storage.atomic(|conn| {
            let question_count =
                storage::select_questions(conn, &QuestionQuery::for_test(id), Question::ORDERING)?
                    .len();
            let test = storage::remove_test(conn, id)?;
            let message = format!("Deleted with {question_count} question(s).");
            log_action(
                conn,
                user_id,
                Test::VERBOSE_NAME,
                test.id,
                &test.to_string(),
                ActionFlag::Deletion,
                &message,
            )?;
            Ok(test)
        })
    }

    /// Adds a question to a test together with its inline answers.
    pub fn add_question(
        &self,
        test_id: i64,
        form: &NewQuestion,
        answers: &[InlineRow<NewAnswer>],
    ) -> AppResult<QuestionDetail> {
        let user_id = self.user.id;
        self.storage.atomic(|conn| {
            let test = storage::fetch_test(conn, test_id)?;
            let question = storage::insert_question(conn, test_id, form)?;
            log_action(
                conn,
                user_id,
                Question::VERBOSE_NAME,
                question.id,
                &question.label(&test.title),
                ActionFlag::Addition,
                "Added.",
            )?;
            save_answer_inline(conn, user_id, &question, answers)?;

            let answers = storage::select_answers(conn, question.id)?;
            Ok(QuestionDetail { question, answers })
        })
    }

    pub fn change_question(
        &self,
        id: i64,
        changes: &QuestionChanges,
        answers: &[InlineRow<NewAnswer>],
    ) -> AppResult<QuestionDetail> {
        let user_id = self.user.id;
        self.storage.atomic(|conn| {
            let mut question = storage::fetch_question(conn, id)?;
            let mut messages = Vec::new();
            if changes.text.is_some() || changes.order.is_some() {
                question = storage::apply_question_changes(conn, id, changes)?;
                messages.push("Changed question.".to_string());
            }
            messages.extend(save_answer_inline(conn, user_id, &question, answers)?);

            if !messages.is_empty() {
                let test = storage::fetch_test(conn, question.test_id)?;
                log_action(
                    conn,
                    user_id,
                    Question::VERBOSE_NAME,
                    question.id,
                    &question.label(&test.title),
                    ActionFlag::Change,
                    &messages.join(" "),
                )?;
            }

            let answers = storage::select_answers(conn, id)?;
            Ok(QuestionDetail { question, answers })
        })
    }

    pub fn delete_question(&self, id: i64) -> AppResult<Question> {
        let user_id = self.user.id;
        self.storage.atomic(|conn| {
            let question = storage::fetch_question(conn, id)?;
            let test = storage::fetch_test(conn, question.test_id)?;
            let answer_count = storage::select_answers(conn, id)?.len();
            storage::remove_question(conn, id)?;
            let message = format!("Deleted with {answer_count} answer(s).");
            log_action(
                conn,
                user_id,
                Question::VERBOSE_NAME,
                question.id,
                &question.label(&test.title),
                ActionFlag::Deletion,
                &message,
            )?;
            Ok(question)
        })
    }

    /// Latest admin actions, newest first.
    pub fn recent_actions(&self, limit: usize) -> AppResult<Vec<LogEntry>> {
        self.storage.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, action_time, user_id, object_type, object_id, object_repr, action_flag, change_message
                 FROM admin_log
                 ORDER BY action_time DESC, id DESC
                 LIMIT ?1",
            )?;
            let entries = stmt
                .query_map(params![limit as i64], log_entry_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }
}

fn log_action(
    conn: &Connection,
    user_id: i64,
    object_type: &str,
    object_id: i64,
    object_repr: &str,
    action_flag: ActionFlag,
    change_message: &str,
) -> AppResult<()> {
    conn.execute(
        "INSERT INTO admin_log (action_time, user_id, object_type, object_id, object_repr, action_flag, change_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            Utc::now(),
            user_id,
            object_type,
            object_id,
            object_repr,
            action_flag.code(),
            change_message
        ],
    )?;
    Ok(())
}

/// Saves question rows for `test`; returns change-message fragments.
fn save_question_inline(
    conn: &Connection,
    user_id: i64,
    test: &Test,
    rows: &[InlineRow<NewQuestion>],
) -> AppResult<Vec<String>> {
    let mut messages = Vec::new();
    for row in rows {
        match row.id {
            Some(id) => {
                let question = storage::fetch_question(conn, id)?;
                if question.test_id != test.id {
                    return Err(AppError::validation(
                        "questions",
                        format!("question {id} does not belong to test {}", test.id),
                    ));
                }
                if row.delete {
                    storage::remove_question(conn, id)?;
                    log_action(
                        conn,
                        user_id,
                        Question::VERBOSE_NAME,
                        id,
                        &question.label(&test.title),
                        ActionFlag::Deletion,
                        "Deleted inline.",
                    )?;
                    messages.push(format!("Deleted question #{id}."));
                } else {
                    let changes = QuestionChanges {
                        text: Some(row.form.text.clone()),
                        order: Some(row.form.order),
                    };
                    storage::apply_question_changes(conn, id, &changes)?;
                    messages.push(format!("Changed question #{id}."));
                }
            }
            None if row.delete || row.form.is_blank() => {}
            None => {
                let question = storage::insert_question(conn, test.id, &row.form)?;
                log_action(
                    conn,
                    user_id,
                    Question::VERBOSE_NAME,
                    question.id,
                    &question.label(&test.title),
                    ActionFlag::Addition,
                    "Added inline.",
                )?;
                messages.push(format!("Added question #{}.", question.id));
            }
        }
    }
    Ok(messages)
}

/// Saves answer rows for `question`; returns change-message fragments.
fn save_answer_inline(
    conn: &Connection,
    user_id: i64,
    question: &Question,
    rows: &[InlineRow<NewAnswer>],
) -> AppResult<Vec<String>> {
    let mut messages = Vec::new();
    for row in rows {
        match row.id {
            Some(id) => {
                let answer: Answer = storage::fetch_answer(conn, id)?;
                if answer.question_id != question.id {
                    return Err(AppError::validation(
                        "answers",
                        format!("answer {id} does not belong to question {}", question.id),
                    ));
                }
                if row.delete {
                    storage::remove_answer(conn, id)?;
                    log_action(
                        conn,
                        user_id,
                        Answer::VERBOSE_NAME,
                        id,
                        &answer.to_string(),
                        ActionFlag::Deletion,
                        "Deleted inline.",
                    )?;
                    messages.push(format!("Deleted answer #{id}."));
                } else {
                    let changes = AnswerChanges {
                        text: Some(row.form.text.clone()),
                        is_correct: Some(row.form.is_correct),
                    };
                    storage::apply_answer_changes(conn, id, &changes)?;
                    messages.push(format!("Changed answer #{id}."));
                }
            }
            None if row.delete || row.form.is_blank() => {}
            None => {
                let answer = storage::insert_answer(conn, question.id, &row.form)?;
                log_action(
                    conn,
                    user_id,
                    Answer::VERBOSE_NAME,
                    answer.id,
                    &answer.to_string(),
                    ActionFlag::Addition,
                    "Added inline.",
                )?;
                messages.push(format!("Added answer #{}.", answer.id));
            }
        }
    }
    Ok(messages)
}
