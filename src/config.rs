use std::env;
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

pub const DATA_DIR_VAR: &str = "QUIZDESK_DATA_DIR";
pub const LOG_FILTER_VAR: &str = "RUST_LOG";
pub const SUPERUSER_USERNAME_VAR: &str = "QUIZDESK_SUPERUSER_USERNAME";
pub const SUPERUSER_EMAIL_VAR: &str = "QUIZDESK_SUPERUSER_EMAIL";
pub const SUPERUSER_PASSWORD_VAR: &str = "QUIZDESK_SUPERUSER_PASSWORD";

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub log_filter: String,
}

impl Settings {
    /// Reads `.env` first, then the process environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            data_dir: lookup(DATA_DIR_VAR)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            log_filter: lookup(LOG_FILTER_VAR)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct SuperuserConfig {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for SuperuserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuperuserConfig")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

impl SuperuserConfig {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let username = lookup(SUPERUSER_USERNAME_VAR)
            .filter(|value| !value.trim().is_empty())
            .ok_or(AppError::MissingConfig(SUPERUSER_USERNAME_VAR))?;
        let password = lookup(SUPERUSER_PASSWORD_VAR)
            .filter(|value| !value.is_empty())
            .ok_or(AppError::MissingConfig(SUPERUSER_PASSWORD_VAR))?;
        let email = lookup(SUPERUSER_EMAIL_VAR).unwrap_or_default();

        Ok(Self {
            username,
            email,
            password,
        })
    }
}
