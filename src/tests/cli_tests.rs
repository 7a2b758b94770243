// Category 10: Command Line Tests (cli.rs)
// Argument parsing and dispatch of parsed commands against a temp storage

use clap::Parser;

use super::{create_admin, create_test_storage, seed_quiz, ADMIN_PASSWORD, ADMIN_USERNAME};
use crate::admin::{ActionFlag, AdminSite};
use crate::cli::{execute, parse_key_value, parse_pick, Cli, Commands};
use crate::error::{AppError, AppResult};
use crate::grading;
use crate::storage::{QuestionQuery, QuizStorage, TestQuery};

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("quizdesk").chain(args.iter().copied()))
        .expect("Failed to parse arguments")
}

/// Runs `args` logged in as the seeded admin.
async fn run_as_admin(storage: &QuizStorage, args: &[&str]) -> AppResult<()> {
    let mut full = args.to_vec();
    full.extend(["--username", ADMIN_USERNAME, "--password", ADMIN_PASSWORD]);
    execute(&parse(&full), storage).await
}

// Parsing

/// Test Case 10.1: Global flags are accepted after the subcommand
#[test]
fn test_global_flags_after_subcommand() {
    let cli = parse(&["tests", "list", "--json", "--username", "admin"]);

    assert!(cli.json);
    assert_eq!(cli.username.as_deref(), Some("admin"));
    assert!(matches!(cli.command, Commands::Tests(_)));
}

/// Test Case 10.2: Picks parse as QUESTION_ID=ANSWER_ID
#[test]
fn test_parse_pick() {
    assert_eq!(parse_pick("3=7"), Ok((3, 7)));
    assert_eq!(parse_pick(" 3 = 7 "), Ok((3, 7)));
    assert!(parse_pick("3").is_err());
    assert!(parse_pick("a=7").is_err());
    assert!(parse_pick("3=b").is_err());
}

/// Test Case 10.3: Filters parse as FIELD=VALUE
#[test]
fn test_parse_key_value() {
    assert_eq!(
        parse_key_value("is_active=false"),
        Ok(("is_active".to_string(), "false".to_string()))
    );
    assert!(parse_key_value("is_active").is_err());
}

/// Test Case 10.4: Bad pick is rejected while parsing
#[test]
fn test_grade_rejects_bad_pick() {
    let result = Cli::try_parse_from(["quizdesk", "grade", "1", "--pick", "nope"]);
    assert!(result.is_err());

    let cli = parse(&["grade", "1", "--pick", "2=4", "--pick", "3=5", "--save"]);
    match cli.command {
        Commands::Grade {
            test_id,
            picks,
            save,
        } => {
            assert_eq!(test_id, 1);
            assert_eq!(picks, vec![(2, 4), (3, 5)]);
            assert!(save);
        }
        _ => panic!("Expected grade command"),
    }
}

// Login

/// Test Case 10.5: Admin commands need a username
#[tokio::test]
async fn test_admin_command_requires_username() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);

    let err = execute(&parse(&["tests", "list"]), &storage)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MissingConfig("QUIZDESK_USERNAME")));
}

/// Test Case 10.6: Wrong password is refused
#[tokio::test]
async fn test_admin_command_wrong_password() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);

    let cli = parse(&["tests", "list", "--username", ADMIN_USERNAME, "--password", "nope"]);
    let err = execute(&cli, &storage).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidCredentials));
}

// Dispatch

/// Test Case 10.7: tests add creates the test with ordered questions
#[tokio::test]
async fn test_tests_add() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);

    run_as_admin(
        &storage,
        &[
            "tests", "add", "--title", "Algebra", "--description", "Linear",
            "--question", "x + 1 = 2", "--question", "2x = 4",
        ],
    )
    .await
    .unwrap();

    let tests = storage.list_tests(&TestQuery::default()).unwrap();
    assert_eq!(tests.len(), 1);
    let detail = storage.test_detail(tests[0].id).unwrap();
    let texts: Vec<&str> = detail
        .questions
        .iter()
        .map(|q| q.question.text.as_str())
        .collect();
    assert_eq!(texts, vec!["x + 1 = 2", "2x = 4"]);
    assert_eq!(detail.questions[0].question.order, 1);
}

/// Test Case 10.8: An empty question fails wherever it appears
#[tokio::test]
async fn test_tests_add_rejects_empty_question() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);

    for questions in [["", "Real"], ["Real", ""]] {
        let err = run_as_admin(
            &storage,
            &[
                "tests", "add", "--title", "Quiz", "--description", "d",
                "--question", questions[0], "--question", questions[1],
            ],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation { field: "text", .. }));
    }
    assert!(storage.list_tests(&TestQuery::default()).unwrap().is_empty());
}

/// Test Case 10.9: answers add with empty text fails and adds nothing
#[tokio::test]
async fn test_answers_add_rejects_empty_text() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);
    let detail = seed_quiz(&storage);
    let question_id = detail.questions[0].question.id;
    let id = question_id.to_string();

    let err = run_as_admin(&storage, &["answers", "add", &id, "--text", ""])
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation { field: "text", .. }));
    assert_eq!(storage.count_answers(question_id).unwrap(), 2);
}

/// Test Case 10.10: questions add rejects an empty answer and keeps nothing
#[tokio::test]
async fn test_questions_add_rejects_empty_answer() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);
    let detail = seed_quiz(&storage);
    let id = detail.test.id.to_string();

    let err = run_as_admin(
        &storage,
        &[
            "questions", "add", &id, "--text", "Largest ocean",
            "--correct", "Pacific", "--answer", " ",
        ],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::Validation { field: "text", .. }));
    assert_eq!(storage.count_questions(detail.test.id).unwrap(), 2);
}

/// Test Case 10.11: questions add stores correct and wrong answers
#[tokio::test]
async fn test_questions_add_with_answers() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);
    let detail = seed_quiz(&storage);
    let id = detail.test.id.to_string();

    run_as_admin(
        &storage,
        &[
            "questions", "add", &id, "--text", "Largest ocean", "--order", "3",
            "--correct", "Pacific", "--answer", "Atlantic",
        ],
    )
    .await
    .unwrap();

    let questions = storage
        .list_questions(&QuestionQuery::for_test(detail.test.id))
        .unwrap();
    let added = &questions[2];
    assert_eq!(added.text, "Largest ocean");
    let answers = storage.answers_for_question(added.id).unwrap();
    assert_eq!(answers.len(), 2);
    assert!(answers.iter().any(|a| a.text == "Pacific" && a.is_correct));
}

/// Test Case 10.12: answers edit and delete go through the question inline
#[tokio::test]
async fn test_answers_edit_and_delete() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);
    let detail = seed_quiz(&storage);
    let sum = &detail.questions[0];
    let wrong = sum.answers[0].id.to_string();
    let right = sum.answers[1].id.to_string();

    run_as_admin(&storage, &["answers", "edit", &wrong, "--text", "5"])
        .await
        .unwrap();
    run_as_admin(&storage, &["answers", "delete", &right])
        .await
        .unwrap();

    let answers = storage.answers_for_question(sum.question.id).unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].text, "5");
    assert!(!answers[0].is_correct);

    let site = AdminSite::login(&storage, ADMIN_USERNAME, ADMIN_PASSWORD).unwrap();
    let entries = site.recent_actions(10).unwrap();
    let question_changes = entries
        .iter()
        .filter(|entry| {
            entry.object_type == "question"
                && entry.object_id == sum.question.id
                && entry.action_flag == ActionFlag::Change
        })
        .count();
    assert_eq!(question_changes, 2);
    assert!(entries
        .iter()
        .any(|entry| entry.object_type == "answer" && entry.action_flag == ActionFlag::Deletion));
}

/// Test Case 10.13: List filters go through the declared admin filters
#[tokio::test]
async fn test_list_filters() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);
    let detail = seed_quiz(&storage);
    let test_filter = format!("test={}", detail.test.id);

    run_as_admin(&storage, &["tests", "list", "--filter", "is_active=true", "--json"])
        .await
        .unwrap();
    run_as_admin(&storage, &["questions", "list", "--filter", &test_filter])
        .await
        .unwrap();

    let err = run_as_admin(&storage, &["tests", "list", "--filter", "title=Basics"])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { field: "filter", .. }));
}

/// Test Case 10.14: tests deactivate then grade is refused
#[tokio::test]
async fn test_deactivate_blocks_grading() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);
    let detail = seed_quiz(&storage);
    let id = detail.test.id.to_string();

    run_as_admin(&storage, &["tests", "deactivate", &id])
        .await
        .unwrap();
    assert!(!storage.get_test(detail.test.id).unwrap().is_active);

    let err = execute(&parse(&["grade", &id]), &storage).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { field: "test", .. }));
}

/// Test Case 10.15: grade --save stores the result without a login
#[tokio::test]
async fn test_grade_and_save() {
    let (storage, _temp) = create_test_storage();
    let detail = seed_quiz(&storage);
    let sum = &detail.questions[0];
    let id = detail.test.id.to_string();
    let pick = format!("{}={}", sum.question.id, sum.answers[1].id);

    execute(&parse(&["grade", &id, "--pick", &pick, "--save", "--json"]), &storage)
        .await
        .unwrap();

    let results = grading::results_for_test(&storage, detail.test.id).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].correct, 1);
    assert_eq!(results[0].total, 2);

    execute(&parse(&["results", &id]), &storage).await.unwrap();
}

/// Test Case 10.16: export writes the file, creating parent directories
#[tokio::test]
async fn test_export_command() {
    let (storage, temp) = create_test_storage();
    let detail = seed_quiz(&storage);
    let path = temp.path().join("out").join("basics.txt");
    let id = detail.test.id.to_string();

    execute(&parse(&["export", &id, path.to_str().unwrap()]), &storage)
        .await
        .unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.starts_with(&format!("# Test #{}: Basics", detail.test.id)));
}
