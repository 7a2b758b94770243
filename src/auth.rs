use argon2::Argon2;
use chrono::{DateTime, Utc};
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::storage::QuizStorage;

const SALT_LENGTH: usize = 16;

const USER_COLUMNS: &str =
    "id, username, email, is_staff, is_superuser, is_active, date_joined, password_hash";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
}

impl User {
    /// Whether the user may use the admin site at all.
    pub fn can_administer(&self) -> bool {
        self.is_active && (self.is_staff || self.is_superuser)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<(User, String)> {
    let user = User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        is_staff: row.get(3)?,
        is_superuser: row.get(4)?,
        is_active: row.get(5)?,
        date_joined: row.get(6)?,
    };
    Ok((user, row.get(7)?))
}

pub fn user_exists(storage: &QuizStorage, username: &str) -> AppResult<bool> {
    storage.with_conn(|conn| Ok(find_user(conn, username)?.is_some()))
}

pub fn get_user_by_username(storage: &QuizStorage, username: &str) -> AppResult<Option<User>> {
    storage.with_conn(|conn| Ok(find_user(conn, username)?.map(|(user, _)| user)))
}

pub fn create_superuser(
    storage: &QuizStorage,
    username: &str,
    email: &str,
    password: &str,
) -> AppResult<User> {
    storage.atomic(|conn| insert_user(conn, username, email, password, true, true))
}

pub fn create_staff_user(
    storage: &QuizStorage,
    username: &str,
    email: &str,
    password: &str,
) -> AppResult<User> {
    storage.atomic(|conn| insert_user(conn, username, email, password, true, false))
}

pub fn set_user_active(storage: &QuizStorage, username: &str, is_active: bool) -> AppResult<()> {
    storage.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE users SET is_active = ?1 WHERE username = ?2",
            params![is_active, username],
        )?;
        if updated == 0 {
            return Err(AppError::validation("username", format!("no user named {username}")));
        }
        Ok(())
    })
}

/// Returns the user when the credentials match an active account.
pub fn authenticate(
    storage: &QuizStorage,
    username: &str,
    password: &str,
) -> AppResult<Option<User>> {
    let found = storage.with_conn(|conn| find_user(conn, username))?;

    let Some((user, password_hash)) = found else {
        tracing::warn!(username, "login attempt for unknown user");
        return Ok(None);
    };
    if !verify_password(password, &password_hash) {
        tracing::warn!(username, "login attempt with wrong password");
        return Ok(None);
    }
    if !user.is_active {
        tracing::warn!(username, "login attempt for inactive user");
        return Ok(None);
    }

    Ok(Some(user))
}

pub(crate) fn find_user(conn: &Connection, username: &str) -> AppResult<Option<(User, String)>> {
    let found = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            user_from_row,
        )
        .optional()?;
    Ok(found)
}

pub(crate) fn insert_user(
    conn: &Connection,
    username: &str,
    email: &str,
    password: &str,
    is_staff: bool,
    is_superuser: bool,
) -> AppResult<User> {
    if username.trim().is_empty() {
        return Err(AppError::validation("username", "this field is required"));
    }
    if password.is_empty() {
        return Err(AppError::validation("password", "this field is required"));
    }
    if find_user(conn, username)?.is_some() {
        return Err(AppError::validation(
            "username",
            format!("a user named {username} already exists"),
        ));
    }

    let date_joined = Utc::now();
    conn.execute(
        "INSERT INTO users (username, email, password_hash, is_staff, is_superuser, is_active, date_joined)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![
            username,
            email,
            hash_password(password)?,
            is_staff,
            is_superuser,
            date_joined
        ],
    )?;

    tracing::info!(username, is_superuser, "created user");
    Ok(User {
        id: conn.last_insert_rowid(),
        username: username.to_string(),
        email: email.to_string(),
        is_staff,
        is_superuser,
        is_active: true,
        date_joined,
    })
}

/// Hashes with Argon2id and returns the PHC string (`$argon2id$v=19$...`).
pub fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(format!("Failed to encode salt: {e}")))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))
}

/// False for a wrong password and for anything that is not a valid PHC string.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(encoded) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
