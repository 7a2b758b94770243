use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{AppError, AppResult};
use crate::models::{
    Answer, AnswerChanges, Model, NewAnswer, NewQuestion, NewTest, Question, QuestionChanges,
    QuestionDetail, Test, TestChanges, TestDetail,
};

const DB_FILE_NAME: &str = "quizdesk.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_tests_created_at ON tests(created_at);

CREATE TABLE IF NOT EXISTS questions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_id INTEGER NOT NULL
        REFERENCES tests(id) ON DELETE CASCADE,
    text TEXT NOT NULL,
    "order" INTEGER NOT NULL DEFAULT 0 CHECK ("order" >= 0)
);

CREATE INDEX IF NOT EXISTS idx_questions_test ON questions(test_id, "order");

CREATE TABLE IF NOT EXISTS answers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question_id INTEGER NOT NULL
        REFERENCES questions(id) ON DELETE CASCADE,
    text TEXT NOT NULL,
    is_correct INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL DEFAULT '',
    password_hash TEXT NOT NULL,
    is_staff INTEGER NOT NULL DEFAULT 0,
    is_superuser INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    date_joined TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS admin_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action_time TEXT NOT NULL,
    user_id INTEGER
        REFERENCES users(id) ON DELETE SET NULL,
    object_type TEXT NOT NULL,
    object_id INTEGER NOT NULL,
    object_repr TEXT NOT NULL,
    action_flag INTEGER NOT NULL,
    change_message TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS test_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_id INTEGER NOT NULL
        REFERENCES tests(id) ON DELETE CASCADE,
    correct INTEGER NOT NULL,
    total INTEGER NOT NULL,
    score REAL NOT NULL,
    band TEXT NOT NULL,
    selections TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Filter for [`QuizStorage::list_tests`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TestQuery {
    pub is_active: Option<bool>,
}

/// Filter for [`QuizStorage::list_questions`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuestionQuery {
    pub test_id: Option<i64>,
}

impl QuestionQuery {
    pub fn for_test(test_id: i64) -> Self {
        Self {
            test_id: Some(test_id),
        }
    }
}

pub struct QuizStorage {
    conn: Mutex<Connection>,
}

impl QuizStorage {
    pub fn new(data_dir: &Path) -> AppResult<Self> {
        tracing::info!("Creating quiz storage at {:?}", data_dir);
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join(DB_FILE_NAME);
        tracing::info!("Opening database at {:?}", db_path);
        Self::from_connection(Connection::open(&db_path)?)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> AppResult<Self> {
        // Cascades only fire when the pragma is on for this connection.
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("Lock poisoned".into()))
    }

    /// Run `f` against the connection without a transaction.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> AppResult<T>) -> AppResult<T> {
        let conn = self.lock()?;
        f(&*conn)
    }

    /// Run `f` inside a single transaction. Any error rolls everything back.
    pub fn atomic<T>(&self, f: impl FnOnce(&Connection) -> AppResult<T>) -> AppResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&*tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn create_test(&self, new_test: &NewTest) -> AppResult<Test> {
        self.with_conn(|conn| insert_test(conn, new_test))
    }

    pub fn get_test(&self, id: i64) -> AppResult<Test> {
        self.with_conn(|conn| fetch_test(conn, id))
    }

    pub fn update_test(&self, id: i64, changes: &TestChanges) -> AppResult<Test> {
        self.with_conn(|conn| apply_test_changes(conn, id, changes))
    }

    pub fn set_test_active(&self, id: i64, is_active: bool) -> AppResult<Test> {
        let changes = TestChanges {
            is_active: Some(is_active),
            ..TestChanges::default()
        };
        self.update_test(id, &changes)
    }

    pub fn delete_test(&self, id: i64) -> AppResult<Test> {
        self.with_conn(|conn| remove_test(conn, id))
    }

    /// Tests newest first, optionally filtered by the active flag.
    pub fn list_tests(&self, query: &TestQuery) -> AppResult<Vec<Test>> {
        self.with_conn(|conn| select_tests(conn, query, Test::ORDERING))
    }

    pub fn add_question(&self, test_id: i64, new_question: &NewQuestion) -> AppResult<Question> {
        self.with_conn(|conn| insert_question(conn, test_id, new_question))
    }

    pub fn get_question(&self, id: i64) -> AppResult<Question> {
        self.with_conn(|conn| fetch_question(conn, id))
    }

    pub fn update_question(&self, id: i64, changes: &QuestionChanges) -> AppResult<Question> {
        self.with_conn(|conn| apply_question_changes(conn, id, changes))
    }

    pub fn delete_question(&self, id: i64) -> AppResult<Question> {
        self.with_conn(|conn| remove_question(conn, id))
    }

    /// Questions in ascending `order`, optionally restricted to one test.
    pub fn list_questions(&self, query: &QuestionQuery) -> AppResult<Vec<Question>> {
        self.with_conn(|conn| select_questions(conn, query, Question::ORDERING))
    }

    pub fn questions_for_test(&self, test_id: i64) -> AppResult<Vec<Question>> {
        self.with_conn(|conn| {
            fetch_test(conn, test_id)?;
            select_questions(conn, &QuestionQuery::for_test(test_id), Question::ORDERING)
        })
    }

    pub fn add_answer(&self, question_id: i64, new_answer: &NewAnswer) -> AppResult<Answer> {
        self.with_conn(|conn| insert_answer(conn, question_id, new_answer))
    }

    pub fn get_answer(&self, id: i64) -> AppResult<Answer> {
        self.with_conn(|conn| fetch_answer(conn, id))
    }

    pub fn update_answer(&self, id: i64, changes: &AnswerChanges) -> AppResult<Answer> {
        self.with_conn(|conn| apply_answer_changes(conn, id, changes))
    }

    pub fn delete_answer(&self, id: i64) -> AppResult<Answer> {
        self.with_conn(|conn| remove_answer(conn, id))
    }

    pub fn answers_for_question(&self, question_id: i64) -> AppResult<Vec<Answer>> {
        self.with_conn(|conn| {
            fetch_question(conn, question_id)?;
            select_answers(conn, question_id)
        })
    }

    pub fn test_detail(&self, id: i64) -> AppResult<TestDetail> {
        self.with_conn(|conn| load_test_detail(conn, id))
    }

    pub fn count_questions(&self, test_id: i64) -> AppResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE test_id = ?1", Question::TABLE),
                params![test_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    pub fn count_answers(&self, question_id: i64) -> AppResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE question_id = ?1", Answer::TABLE),
                params![question_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

fn select_from<M: Model>() -> String {
    let columns: Vec<String> = M::FIELDS.iter().map(|field| format!("\"{field}\"")).collect();
    format!("SELECT {} FROM {}", columns.join(", "), M::TABLE)
}

/// Builds an `ORDER BY` list from keys like `-created_at`.
///
/// Every key must name a column of `M`. Rows tied on all keys fall back to
/// `id`, in the direction of the first key.
pub(crate) fn order_by<M: Model>(ordering: &[&str]) -> AppResult<String> {
    let mut clauses = Vec::new();
    let mut tie_break = "ASC";
    for (index, key) in ordering.iter().enumerate() {
        let (field, direction) = match key.strip_prefix('-') {
            Some(field) => (field, "DESC"),
            None => (*key, "ASC"),
        };
        if !M::FIELDS.contains(&field) {
            return Err(AppError::validation(
                "ordering",
                format!("{} has no column {field}", M::TABLE),
            ));
        }
        if index == 0 {
            tie_break = direction;
        }
        clauses.push(format!("\"{field}\" {direction}"));
    }
    if !ordering.iter().any(|key| key.trim_start_matches('-') == "id") {
        clauses.push(format!("\"id\" {tie_break}"));
    }
    Ok(clauses.join(", "))
}

fn test_from_row(row: &Row<'_>) -> rusqlite::Result<Test> {
    Ok(Test {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        is_active: row.get(5)?,
    })
}

fn question_from_row(row: &Row<'_>) -> rusqlite::Result<Question> {
    Ok(Question {
        id: row.get(0)?,
        test_id: row.get(1)?,
        text: row.get(2)?,
        order: row.get(3)?,
    })
}

fn answer_from_row(row: &Row<'_>) -> rusqlite::Result<Answer> {
    Ok(Answer {
        id: row.get(0)?,
        question_id: row.get(1)?,
        text: row.get(2)?,
        is_correct: row.get(3)?,
    })
}

pub(crate) fn insert_test(conn: &Connection, new_test: &NewTest) -> AppResult<Test> {
    new_test.validate()?;
    let now = Utc::now();

    conn.execute(
        &format!(
            "INSERT INTO {} (title, description, created_at, updated_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            Test::TABLE
        ),
        params![new_test.title, new_test.description, now, now, new_test.is_active],
    )?;

    let test = Test {
        id: conn.last_insert_rowid(),
        title: new_test.title.clone(),
        description: new_test.description.clone(),
        created_at: now,
        updated_at: now,
        is_active: new_test.is_active,
    };
    tracing::info!(id = test.id, title = %test.title, "created test");
    Ok(test)
}

pub(crate) fn fetch_test(conn: &Connection, id: i64) -> AppResult<Test> {
    conn.query_row(
        &format!("{} WHERE id = ?1", select_from::<Test>()),
        params![id],
        test_from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found(Test::VERBOSE_NAME, id))
}

pub(crate) fn apply_test_changes(
    conn: &Connection,
    id: i64,
    changes: &TestChanges,
) -> AppResult<Test> {
    changes.validate()?;

    let updated = conn.execute(
        &format!(
            "UPDATE {}
             SET title = COALESCE(?1, title),
                 description = COALESCE(?2, description),
                 is_active = COALESCE(?3, is_active),
                 updated_at = ?4
             WHERE id = ?5",
            Test::TABLE
        ),
        params![
            changes.title,
            changes.description,
            changes.is_active,
            Utc::now(),
            id
        ],
    )?;
    if updated == 0 {
        return Err(AppError::not_found(Test::VERBOSE_NAME, id));
    }

    tracing::info!(id, fields = ?changes.changed_fields(), "updated test");
    fetch_test(conn, id)
}

/// Bumps `updated_at` without touching any other field.
pub(crate) fn touch_test(conn: &Connection, id: i64) -> AppResult<Test> {
    let updated = conn.execute(
        &format!("UPDATE {} SET updated_at = ?1 WHERE id = ?2", Test::TABLE),
        params![Utc::now(), id],
    )?;
    if updated == 0 {
        return Err(AppError::not_found(Test::VERBOSE_NAME, id));
    }
    fetch_test(conn, id)
}

pub(crate) fn remove_test(conn: &Connection, id: i64) -> AppResult<Test> {
    let test = fetch_test(conn, id)?;
    conn.execute(&format!("DELETE FROM {} WHERE id = ?1", Test::TABLE), params![id])?;
    tracing::info!(id, title = %test.title, "deleted test with its questions and answers");
    Ok(test)
}

pub(crate) fn select_tests(
    conn: &Connection,
    query: &TestQuery,
    ordering: &[&str],
) -> AppResult<Vec<Test>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE ?1 IS NULL OR is_active = ?1 ORDER BY {}",
        select_from::<Test>(),
        order_by::<Test>(ordering)?
    ))?;

    let tests = stmt
        .query_map(params![query.is_active], test_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(count = tests.len(), ?query, "listed tests");
    Ok(tests)
}

pub(crate) fn insert_question(
    conn: &Connection,
    test_id: i64,
    new_question: &NewQuestion,
) -> AppResult<Question> {
    new_question.validate()?;
    fetch_test(conn, test_id)?;

    conn.execute(
        &format!(
            r#"INSERT INTO {} (test_id, text, "order") VALUES (?1, ?2, ?3)"#,
            Question::TABLE
        ),
        params![test_id, new_question.text, new_question.order],
    )?;

    let question = Question {
        id: conn.last_insert_rowid(),
        test_id,
        text: new_question.text.clone(),
        order: new_question.order,
    };
    tracing::info!(id = question.id, test_id, order = question.order, "added question");
    Ok(question)
}

pub(crate) fn fetch_question(conn: &Connection, id: i64) -> AppResult<Question> {
    conn.query_row(
        &format!("{} WHERE id = ?1", select_from::<Question>()),
        params![id],
        question_from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found(Question::VERBOSE_NAME, id))
}

pub(crate) fn apply_question_changes(
    conn: &Connection,
    id: i64,
    changes: &QuestionChanges,
) -> AppResult<Question> {
    changes.validate()?;

    let updated = conn.execute(
        &format!(
            r#"UPDATE {}
               SET text = COALESCE(?1, text),
                   "order" = COALESCE(?2, "order")
               WHERE id = ?3"#,
            Question::TABLE
        ),
        params![changes.text, changes.order, id],
    )?;
    if updated == 0 {
        return Err(AppError::not_found(Question::VERBOSE_NAME, id));
    }

    tracing::info!(id, "updated question");
    fetch_question(conn, id)
}

pub(crate) fn remove_question(conn: &Connection, id: i64) -> AppResult<Question> {
    let question = fetch_question(conn, id)?;
    conn.execute(&format!("DELETE FROM {} WHERE id = ?1", Question::TABLE), params![id])?;
    tracing::info!(id, test_id = question.test_id, "deleted question with its answers");
    Ok(question)
}

pub(crate) fn select_questions(
    conn: &Connection,
    query: &QuestionQuery,
    ordering: &[&str],
) -> AppResult<Vec<Question>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE ?1 IS NULL OR test_id = ?1 ORDER BY {}",
        select_from::<Question>(),
        order_by::<Question>(ordering)?
    ))?;

    let questions = stmt
        .query_map(params![query.test_id], question_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(count = questions.len(), ?query, "listed questions");
    Ok(questions)
}

pub(crate) fn insert_answer(
    conn: &Connection,
    question_id: i64,
    new_answer: &NewAnswer,
) -> AppResult<Answer> {
    new_answer.validate()?;
    fetch_question(conn, question_id)?;

    conn.execute(
        &format!(
            "INSERT INTO {} (question_id, text, is_correct) VALUES (?1, ?2, ?3)",
            Answer::TABLE
        ),
        params![question_id, new_answer.text, new_answer.is_correct],
    )?;

    let answer = Answer {
        id: conn.last_insert_rowid(),
        question_id,
        text: new_answer.text.clone(),
        is_correct: new_answer.is_correct,
    };
    tracing::info!(id = answer.id, question_id, is_correct = answer.is_correct, "added answer");
    Ok(answer)
}

pub(crate) fn fetch_answer(conn: &Connection, id: i64) -> AppResult<Answer> {
    conn.query_row(
        &format!("{} WHERE id = ?1", select_from::<Answer>()),
        params![id],
        answer_from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found(Answer::VERBOSE_NAME, id))
}

pub(crate) fn apply_answer_changes(
    conn: &Connection,
    id: i64,
    changes: &AnswerChanges,
) -> AppResult<Answer> {
    changes.validate()?;

    let updated = conn.execute(
        &format!(
            "UPDATE {}
             SET text = COALESCE(?1, text),
                 is_correct = COALESCE(?2, is_correct)
             WHERE id = ?3",
            Answer::TABLE
        ),
        params![changes.text, changes.is_correct, id],
    )?;
    if updated == 0 {
        return Err(AppError::not_found(Answer::VERBOSE_NAME, id));
    }

    tracing::info!(id, "updated answer");
    fetch_answer(conn, id)
}

pub(crate) fn remove_answer(conn: &Connection, id: i64) -> AppResult<Answer> {
    let answer = fetch_answer(conn, id)?;
    conn.execute(&format!("DELETE FROM {} WHERE id = ?1", Answer::TABLE), params![id])?;
    tracing::info!(id, question_id = answer.question_id, "deleted answer");
    Ok(answer)
}

pub(crate) fn select_answers(conn: &Connection, question_id: i64) -> AppResult<Vec<Answer>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE question_id = ?1 ORDER BY {}",
        select_from::<Answer>(),
        order_by::<Answer>(Answer::ORDERING)?
    ))?;

    let answers = stmt
        .query_map(params![question_id], answer_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(answers)
}

pub(crate) fn load_test_detail(conn: &Connection, id: i64) -> AppResult<TestDetail> {
    let test = fetch_test(conn, id)?;

    let mut questions = Vec::new();
    for question in select_questions(conn, &QuestionQuery::for_test(id), Question::ORDERING)? {
        let answers = select_answers(conn, question.id)?;
        questions.push(QuestionDetail { question, answers });
    }

    Ok(TestDetail { test, questions })
}
