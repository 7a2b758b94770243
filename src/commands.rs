use serde::Serialize;

use crate::auth::{self, User};
use crate::config::SuperuserConfig;
use crate::error::AppResult;
use crate::storage::QuizStorage;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SuperuserOutcome {
    Created(User),
    AlreadyExists { username: String },
}

impl SuperuserOutcome {
    pub fn message(&self) -> String {
        match self {
            SuperuserOutcome::Created(user) => {
                format!("Superuser {} created successfully", user.username)
            }
            SuperuserOutcome::AlreadyExists { username } => {
                format!("Superuser {username} already exists")
            }
        }
    }
}

/// Creates the configured superuser unless an account with that username exists.
/// An existing account is left untouched, whatever its password or flags.
/// The lookup and the insert run in one transaction.
pub fn ensure_superuser(
    storage: &QuizStorage,
    config: &SuperuserConfig,
) -> AppResult<SuperuserOutcome> {
    let outcome = storage.atomic(|conn| {
        if auth::find_user(conn, &config.username)?.is_some() {
            return Ok(SuperuserOutcome::AlreadyExists {
                username: config.username.clone(),
            });
        }
        let user = auth::insert_user(
            conn,
            &config.username,
            &config.email,
            &config.password,
            true,
            true,
        )?;
        Ok(SuperuserOutcome::Created(user))
    })?;

    match &outcome {
        SuperuserOutcome::Created(user) => {
            tracing::info!(username = %user.username, "superuser created");
        }
        SuperuserOutcome::AlreadyExists { username } => {
            tracing::warn!(%username, "superuser already exists");
        }
    }
    Ok(outcome)
}
