// Category 4: User Tests (auth.rs)
// Tests for password hashing, user creation and authentication

use super::{create_admin, create_test_storage, ADMIN_PASSWORD, ADMIN_USERNAME};
use crate::auth::{self, hash_password, verify_password};
use crate::error::AppError;

/// Test Case 4.1: Hash is an Argon2id PHC string and verifies
#[test]
fn test_hash_and_verify_password() {
    let encoded = hash_password("correct horse").unwrap();

    assert!(encoded.starts_with("$argon2id$"));
    assert!(!encoded.contains("correct horse"));
    assert!(verify_password("correct horse", &encoded));
    assert!(!verify_password("wrong horse", &encoded));
}

/// Test Case 4.2: Same password hashes differently thanks to the salt
#[test]
fn test_hash_is_salted() {
    let first = hash_password("same").unwrap();
    let second = hash_password("same").unwrap();

    assert_ne!(first, second);
    assert!(verify_password("same", &first));
    assert!(verify_password("same", &second));
}

/// Test Case 4.3: Malformed or foreign hashes never verify
#[test]
fn test_verify_malformed_hash() {
    assert!(!verify_password("x", ""));
    assert!(!verify_password("x", "not a hash"));
    assert!(!verify_password("x", "md5$1$salt$digest"));
    assert!(!verify_password("x", "$argon2id$v=19$m=19456,t=2,p=1$bm9wZQ$"));
}

/// Test Case 4.3b: Stored hash is the PHC string, never the password
#[test]
fn test_stored_hash_is_phc_string() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);

    let stored: String = storage
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT password_hash FROM users WHERE username = ?1",
                [ADMIN_USERNAME],
                |row| row.get(0),
            )?)
        })
        .unwrap();

    assert!(stored.starts_with("$argon2id$"));
    assert!(verify_password(ADMIN_PASSWORD, &stored));
}

/// Test Case 4.4: Superuser gets staff and superuser flags
#[test]
fn test_create_superuser() {
    let (storage, _temp) = create_test_storage();

    let user = create_admin(&storage);

    assert!(user.is_superuser);
    assert!(user.is_staff);
    assert!(user.is_active);
    assert!(user.can_administer());
    assert!(auth::user_exists(&storage, ADMIN_USERNAME).unwrap());
    assert_eq!(
        auth::get_user_by_username(&storage, ADMIN_USERNAME).unwrap(),
        Some(user)
    );
}

/// Test Case 4.5: Usernames are unique
#[test]
fn test_duplicate_username_rejected() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);

    let err = auth::create_superuser(&storage, ADMIN_USERNAME, "", "other").unwrap_err();
    assert!(matches!(err, AppError::Validation { field: "username", .. }));
}

/// Test Case 4.6: Empty username or password rejected
#[test]
fn test_required_user_fields() {
    let (storage, _temp) = create_test_storage();

    assert!(auth::create_superuser(&storage, "", "", "pw").is_err());
    assert!(auth::create_superuser(&storage, "bob", "", "").is_err());
    assert!(!auth::user_exists(&storage, "bob").unwrap());
}

/// Test Case 4.7: Authenticate with correct and wrong credentials
#[test]
fn test_authenticate() {
    let (storage, _temp) = create_test_storage();
    let admin = create_admin(&storage);

    let found = auth::authenticate(&storage, ADMIN_USERNAME, ADMIN_PASSWORD).unwrap();
    assert_eq!(found.map(|user| user.id), Some(admin.id));

    assert!(auth::authenticate(&storage, ADMIN_USERNAME, "nope").unwrap().is_none());
    assert!(auth::authenticate(&storage, "ghost", ADMIN_PASSWORD).unwrap().is_none());
}

/// Test Case 4.8: Inactive users cannot authenticate
#[test]
fn test_inactive_user_cannot_authenticate() {
    let (storage, _temp) = create_test_storage();
    create_admin(&storage);

    auth::set_user_active(&storage, ADMIN_USERNAME, false).unwrap();

    assert!(auth::authenticate(&storage, ADMIN_USERNAME, ADMIN_PASSWORD)
        .unwrap()
        .is_none());
}

/// Test Case 4.9: Staff users can administer without being superusers
#[test]
fn test_staff_user_flags() {
    let (storage, _temp) = create_test_storage();

    let staff = auth::create_staff_user(&storage, "editor", "", "pw").unwrap();

    assert!(staff.is_staff);
    assert!(!staff.is_superuser);
    assert!(staff.can_administer());
}

/// Test Case 4.10: Password hash is never serialized
#[test]
fn test_user_serialization_has_no_hash() {
    let (storage, _temp) = create_test_storage();
    let user = create_admin(&storage);

    let json = serde_json::to_value(&user).unwrap();
    assert_eq!(json["username"], ADMIN_USERNAME);
    assert!(json.get("password_hash").is_none());
}
