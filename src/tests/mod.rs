// Backend Test Suite
// One file per area of the crate

use crate::auth::{self, User};
use crate::models::{NewAnswer, NewQuestion, NewTest, TestDetail};
use crate::storage::QuizStorage;
use tempfile::TempDir;




#[cfg(test)]
mod auth_tests;

#[cfg(test)]
mod config_tests;





#[cfg(test)]
mod cli_tests;

pub(crate) const ADMIN_USERNAME: &str = "admin";
pub(crate) const ADMIN_PASSWORD: &str = "s3cret-pass";

/// Helper to create a test storage instance with temp directory
pub(crate) fn create_test_storage() -> (QuizStorage, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let storage = QuizStorage::new(temp_dir.path()).expect("Failed to create storage");
    (storage, temp_dir)
}

pub(crate) fn create_admin(storage: &QuizStorage) -> User {
    auth::create_superuser(storage, ADMIN_USERNAME, "admin@example.com", ADMIN_PASSWORD)
        .expect("Failed to create superuser")
}

/// A test with two questions: "2 + 2" (order 1) and "Capital of France" (order 2).
pub(crate) fn seed_quiz(storage: &QuizStorage) -> TestDetail {
    let test = storage
        .create_test(&NewTest::new("Basics", "General knowledge warm-up"))
        .unwrap();

    let capital = storage
        .add_question(test.id, &NewQuestion::new("Capital of France", 2))
        .unwrap();
    storage.add_answer(capital.id, &NewAnswer::new("Paris", true)).unwrap();
    storage.add_answer(capital.id, &NewAnswer::new("Lyon", false)).unwrap();

    let sum = storage
        .add_question(test.id, &NewQuestion::new("2 + 2", 1))
        .unwrap();
    storage.add_answer(sum.id, &NewAnswer::new("3", false)).unwrap();
    storage.add_answer(sum.id, &NewAnswer::new("4", true)).unwrap();

    storage.test_detail(test.id).unwrap()
}
