// Category 5: Configuration Tests (config.rs)
// Settings are read through a lookup function so tests never touch the process environment

use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::{
    Settings, SuperuserConfig, SUPERUSER_EMAIL_VAR, SUPERUSER_PASSWORD_VAR, SUPERUSER_USERNAME_VAR,
};
use crate::error::AppError;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

/// Test Case 5.1: Defaults without any variables
#[test]
fn test_settings_defaults() {
    let settings = Settings::from_lookup(lookup_from(&[]));

    assert_eq!(settings.data_dir, PathBuf::from("data"));
    assert_eq!(settings.log_filter, "info");
}

/// Test Case 5.2: Variables override defaults
#[test]
fn test_settings_from_variables() {
    let settings = Settings::from_lookup(lookup_from(&[
        ("QUIZDESK_DATA_DIR", "/var/lib/quizdesk"),
        ("RUST_LOG", "debug"),
    ]));

    assert_eq!(settings.data_dir, PathBuf::from("/var/lib/quizdesk"));
    assert_eq!(settings.log_filter, "debug");
}

/// Test Case 5.3: Full superuser configuration
#[test]
fn test_superuser_config() {
    let config = SuperuserConfig::from_lookup(lookup_from(&[
        (SUPERUSER_USERNAME_VAR, "root"),
        (SUPERUSER_EMAIL_VAR, "root@example.com"),
        (SUPERUSER_PASSWORD_VAR, "pw"),
    ]))
    .unwrap();

    assert_eq!(config.username, "root");
    assert_eq!(config.email, "root@example.com");
    assert_eq!(config.password, "pw");
}

/// Test Case 5.4: Email is optional
#[test]
fn test_superuser_email_optional() {
    let config = SuperuserConfig::from_lookup(lookup_from(&[
        (SUPERUSER_USERNAME_VAR, "root"),
        (SUPERUSER_PASSWORD_VAR, "pw"),
    ]))
    .unwrap();

    assert_eq!(config.email, "");
}

/// Test Case 5.5: Username and password are required
#[test]
fn test_superuser_missing_values() {
    let err = SuperuserConfig::from_lookup(lookup_from(&[(SUPERUSER_PASSWORD_VAR, "pw")]))
        .unwrap_err();
    assert!(matches!(err, AppError::MissingConfig(SUPERUSER_USERNAME_VAR)));

    let err = SuperuserConfig::from_lookup(lookup_from(&[(SUPERUSER_USERNAME_VAR, "root")]))
        .unwrap_err();
    assert!(matches!(err, AppError::MissingConfig(SUPERUSER_PASSWORD_VAR)));
}

/// Test Case 5.6: Debug output hides the password
#[test]
fn test_superuser_debug_hides_password() {
    let config = SuperuserConfig {
        username: "root".to_string(),
        email: String::new(),
        password: "hunter2".to_string(),
    };

    let debug = format!("{:?}", config);
    assert!(debug.contains("root"));
    assert!(!debug.contains("hunter2"));
}
