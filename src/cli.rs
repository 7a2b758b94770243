use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crate::admin::{AdminSite, InlineRow, ModelAdmin, QuestionAdmin, TestAdmin};
use crate::commands::{ensure_superuser, SuperuserOutcome};
use crate::config::SuperuserConfig;
use crate::error::{AppError, AppResult};
use crate::export::export_test;
use crate::grading::{self, Submission};
use crate::models::{NewAnswer, NewQuestion, NewTest, QuestionChanges, TestChanges};
use crate::storage::QuizStorage;

#[derive(Parser)]
#[command(name = "quizdesk")]
#[command(about = "Manage quiz tests, their questions and answers")]
pub struct Cli {
    /// Directory holding the database
    #[arg(long, env = "QUIZDESK_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,
    /// Admin account used for admin commands
    #[arg(long, env = "QUIZDESK_USERNAME", global = true)]
    pub username: Option<String>,
    /// Password of the admin account
    #[arg(long, env = "QUIZDESK_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,
    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the superuser described by the QUIZDESK_SUPERUSER_* variables
    CreateSuperuser,
    /// Manage tests
    #[command(subcommand)]
    Tests(TestCommands),
    /// Manage questions
    #[command(subcommand)]
    Questions(QuestionCommands),
    /// Manage answers of a question
    #[command(subcommand)]
    Answers(AnswerCommands),
    /// Score a set of picked answers
    Grade {
        test_id: i64,
        /// Picked answer as QUESTION_ID=ANSWER_ID, repeatable
        #[arg(long = "pick", value_parser = parse_pick)]
        picks: Vec<(i64, i64)>,
        /// Store the result
        #[arg(long)]
        save: bool,
    },
    /// List stored results of a test
    Results { test_id: i64 },
    /// Write a test as plain text
    Export { test_id: i64, path: PathBuf },
    /// Show recent admin actions
    Log {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum TestCommands {
    /// List tests, newest first
    List(ListArgs),
    /// Show a test with its questions and answers
    Show { id: i64 },
    /// Add a test, optionally with questions
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        /// Create the test inactive
        #[arg(long)]
        inactive: bool,
        /// Question text, repeatable; order follows the flags
        #[arg(long = "question")]
        questions: Vec<String>,
    },
    /// Change fields of a test
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Activate { id: i64 },
    Deactivate { id: i64 },
    /// Delete a test with its questions and answers
    Delete { id: i64 },
}

#[derive(Args)]
pub struct ListArgs {
    /// Filter as FIELD=VALUE, repeatable (tests: is_active, questions: test)
    #[arg(long = "filter", value_parser = parse_key_value)]
    pub filters: Vec<(String, String)>,
    /// Whitespace-separated terms; all must match
    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Subcommand)]
pub enum QuestionCommands {
    /// List questions by order
    List(ListArgs),
    /// Add a question to a test, optionally with answers
    Add {
        test_id: i64,
        #[arg(long)]
        text: String,
        #[arg(long, default_value_t = 0)]
        order: u32,
        /// Wrong answer text, repeatable
        #[arg(long = "answer")]
        answers: Vec<String>,
        /// Correct answer text, repeatable
        #[arg(long = "correct")]
        correct: Vec<String>,
    },
    Edit {
        id: i64,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        order: Option<u32>,
    },
    /// Delete a question with its answers
    Delete { id: i64 },
}

#[derive(Subcommand)]
pub enum AnswerCommands {
    Add {
        question_id: i64,
        #[arg(long)]
        text: String,
        #[arg(long)]
        correct: bool,
    },
    Edit {
        id: i64,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        correct: Option<bool>,
    },
    Delete { id: i64 },
}

pub(crate) fn parse_key_value(value: &str) -> Result<(String, String), String> {
    let (key, val) = value
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got {value}"))?;
    Ok((key.trim().to_string(), val.to_string()))
}

pub(crate) fn parse_pick(value: &str) -> Result<(i64, i64), String> {
    let (question, answer) = value
        .split_once('=')
        .ok_or_else(|| format!("expected QUESTION_ID=ANSWER_ID, got {value}"))?;
    let question = question
        .trim()
        .parse()
        .map_err(|_| format!("invalid question id {question}"))?;
    let answer = answer
        .trim()
        .parse()
        .map_err(|_| format!("invalid answer id {answer}"))?;
    Ok((question, answer))
}

struct Output {
    json: bool,
}

impl Output {
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> AppResult<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}

fn admin_site<'a>(storage: &'a QuizStorage, cli: &Cli) -> AppResult<AdminSite<'a>> {
    let username = cli
        .username
        .as_deref()
        .ok_or(AppError::MissingConfig("QUIZDESK_USERNAME"))?;
    let password = cli
        .password
        .as_deref()
        .ok_or(AppError::MissingConfig("QUIZDESK_PASSWORD"))?;
    AdminSite::login(storage, username, password)
}

pub async fn execute(cli: &Cli, storage: &QuizStorage) -> AppResult<()> {
    let out = Output { json: cli.json };

    match &cli.command {
        Commands::CreateSuperuser => {
            let config = SuperuserConfig::from_env()?;
            let outcome = ensure_superuser(storage, &config)?;
            out.emit(&outcome, || match &outcome {
                SuperuserOutcome::Created(_) => outcome.message(),
                SuperuserOutcome::AlreadyExists { .. } => format!("warning: {}", outcome.message()),
            })
        }
        Commands::Tests(command) => run_test_command(command, &admin_site(storage, cli)?, &out),
        Commands::Questions(command) => {
            run_question_command(command, &admin_site(storage, cli)?, &out)
        }
        Commands::Answers(command) => run_answer_command(command, &admin_site(storage, cli)?, &out),
        Commands::Grade {
            test_id,
            picks,
            save,
        } => {
            let submission = picks
                .iter()
                .fold(Submission::new(*test_id), |submission, (question, answer)| {
                    submission.select(*question, *answer)
                });
            let report = grading::grade_submission(storage, &submission)?;
            if *save {
                grading::record_result(storage, &report)?;
            }
            out.emit(&report, || {
                format!(
                    "{}/{} correct ({:.1}%)\n{}",
                    report.correct,
                    report.total,
                    report.score,
                    report.analysis()
                )
            })
        }
        Commands::Results { test_id } => {
            let results = grading::results_for_test(storage, *test_id)?;
            out.emit(&results, || {
                results
                    .iter()
                    .map(|result| {
                        format!(
                            "#{} {} {}/{} ({:.1}%, {})",
                            result.id,
                            result.created_at.format("%Y-%m-%d %H:%M"),
                            result.correct,
                            result.total,
                            result.score,
                            result.band
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Commands::Export { test_id, path } => {
            export_test(storage, *test_id, path).await?;
            out.emit(&path, || format!("Exported test {test_id} to {}", path.display()))
        }
        Commands::Log { limit } => {
            let site = admin_site(storage, cli)?;
            let entries = site.recent_actions(*limit)?;
            out.emit(&entries, || {
                entries
                    .iter()
                    .map(|entry| {
                        format!(
                            "{} {:?} {} #{} \"{}\" {}",
                            entry.action_time.format("%Y-%m-%d %H:%M:%S"),
                            entry.action_flag,
                            entry.object_type,
                            entry.object_id,
                            entry.object_repr,
                            entry.change_message
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
    }
}

fn run_test_command(command: &TestCommands, site: &AdminSite<'_>, out: &Output) -> AppResult<()> {
    match command {
        TestCommands::List(args) => {
            let query = TestAdmin.query_from_params(&args.filters)?;
            let tests = site.test_changelist(&query, args.search.as_deref())?;
            out.emit(&tests, || TestAdmin.render_changelist(&tests))
        }
        TestCommands::Show { id } => {
            let detail = site.test_detail(*id)?;
            out.emit(&detail, || crate::admin::render_test_detail(&detail))
        }
        TestCommands::Add {
            title,
            description,
            inactive,
            questions,
        } => {
            let form = NewTest {
                title: title.clone(),
                description: description.clone(),
                is_active: !inactive,
            };
            form.validate()?;
            let rows = questions
                .iter()
                .enumerate()
                .map(|(index, text)| -> AppResult<InlineRow<NewQuestion>> {
                    let form = NewQuestion::new(text.clone(), index as u32 + 1);
                    form.validate()?;
                    Ok(InlineRow::new(form))
                })
                .collect::<AppResult<Vec<_>>>()?;
            let detail = site.add_test(&form, &rows)?;
            out.emit(&detail, || {
                format!("Added test #{} \"{}\"", detail.test.id, detail.test)
            })
        }
        TestCommands::Edit {
            id,
            title,
            description,
        } => {
            let changes = TestChanges {
                title: title.clone(),
                description: description.clone(),
                is_active: None,
            };
            let detail = site.change_test(*id, &changes, &[])?;
            out.emit(&detail, || format!("Changed test #{}", detail.test.id))
        }
        TestCommands::Activate { id } => {
            let test = site.set_test_active(*id, true)?;
            out.emit(&test, || format!("Test #{} is active", test.id))
        }
        TestCommands::Deactivate { id } => {
            let test = site.set_test_active(*id, false)?;
            out.emit(&test, || format!("Test #{} is inactive", test.id))
        }
        TestCommands::Delete { id } => {
            let test = site.delete_test(*id)?;
            out.emit(&test, || format!("Deleted test #{} \"{}\"", test.id, test))
        }
    }
}

fn run_question_command(
    command: &QuestionCommands,
    site: &AdminSite<'_>,
    out: &Output,
) -> AppResult<()> {
    match command {
        QuestionCommands::List(args) => {
            let query = QuestionAdmin.query_from_params(&args.filters)?;
            let rows = site.question_changelist(&query, args.search.as_deref())?;
            out.emit(&rows, || QuestionAdmin.render_changelist(&rows))
        }
        QuestionCommands::Add {
            test_id,
            text,
            order,
            answers,
            correct,
        } => {
            let form = NewQuestion::new(text.clone(), *order);
            form.validate()?;
            let rows = correct
                .iter()
                .map(|text| NewAnswer::new(text.clone(), true))
                .chain(answers.iter().map(|text| NewAnswer::new(text.clone(), false)))
                .map(|answer| -> AppResult<InlineRow<NewAnswer>> {
                    answer.validate()?;
                    Ok(InlineRow::new(answer))
                })
                .collect::<AppResult<Vec<_>>>()?;
            let detail = site.add_question(*test_id, &form, &rows)?;
            out.emit(&detail, || {
                format!(
                    "Added question #{} with {} answer(s)",
                    detail.question.id,
                    detail.answers.len()
                )
            })
        }
        QuestionCommands::Edit { id, text, order } => {
            let changes = QuestionChanges {
                text: text.clone(),
                order: *order,
            };
            let detail = site.change_question(*id, &changes, &[])?;
            out.emit(&detail, || format!("Changed question #{}", detail.question.id))
        }
        QuestionCommands::Delete { id } => {
            let question = site.delete_question(*id)?;
            out.emit(&question, || format!("Deleted question #{}", question.id))
        }
    }
}

fn run_answer_command(
    command: &AnswerCommands,
    site: &AdminSite<'_>,
    out: &Output,
) -> AppResult<()> {
    match command {
        AnswerCommands::Add {
            question_id,
            text,
            correct,
        } => {
            let form = NewAnswer::new(text.clone(), *correct);
            form.validate()?;
            let rows = [InlineRow::new(form)];
            let detail = site.change_question(*question_id, &QuestionChanges::default(), &rows)?;
            out.emit(&detail, || {
                format!(
                    "Question #{} now has {} answer(s)",
                    detail.question.id,
                    detail.answers.len()
                )
            })
        }
        AnswerCommands::Edit { id, text, correct } => {
            let answer = site.storage().get_answer(*id)?;
            let form = NewAnswer {
                text: text.clone().unwrap_or(answer.text),
                is_correct: correct.unwrap_or(answer.is_correct),
            };
            let rows = [InlineRow::existing(*id, form)];
            let detail =
                site.change_question(answer.question_id, &QuestionChanges::default(), &rows)?;
            out.emit(&detail, || format!("Changed answer #{id}"))
        }
        AnswerCommands::Delete { id } => {
            let answer = site.storage().get_answer(*id)?;
            let rows = [InlineRow::<NewAnswer>::deletion(*id)];
            let detail =
                site.change_question(answer.question_id, &QuestionChanges::default(), &rows)?;
            out.emit(&detail, || format!("Deleted answer #{id}"))
        }
    }
}
