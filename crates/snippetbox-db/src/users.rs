use std::sync::Arc;

use anyhow::anyhow;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::Utc;
use rusqlite::OptionalExtension;

use snippetbox_types::User;

use crate::{Database, StoreError, format_ts, parse_ts};

/// Capability interface for user storage. `authenticate` is the only way
/// in or out for passwords; the stored hash never crosses this boundary.
pub trait UserStore: Send + Sync {
    /// Create a user. Hashes the password with Argon2id before storing.
    /// Returns `DuplicateEmail` if the email is already registered.
    fn insert(&self, name: &str, email: &str, password: &str) -> Result<(), StoreError>;

    /// Verify an email/password pair, returning the user id on success.
    /// Unknown email and wrong password both map to `InvalidCredentials`,
    /// so callers cannot learn whether an email exists.
    fn authenticate(&self, email: &str, password: &str) -> Result<i64, StoreError>;

    /// Fetch a user by id, or `NoRecord`.
    fn get(&self, id: i64) -> Result<User, StoreError>;
}

pub struct SqliteUsers {
    db: Arc<Database>,
}

impl SqliteUsers {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl UserStore for SqliteUsers {
    fn insert(&self, name: &str, email: &str, password: &str) -> Result<(), StoreError> {
        // Hash with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let hashed = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| StoreError::Other(anyhow!("password hashing failed: {}", e)))?
            .to_string();

        self.db.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO users (name, email, hashed_password, created) VALUES (?1, ?2, ?3, ?4)",
                (name, email, &hashed, format_ts(Utc::now())),
            );

            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, Some(msg)))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation
                        && msg.contains("users.email") =>
                {
                    Err(StoreError::DuplicateEmail)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn authenticate(&self, email: &str, password: &str) -> Result<i64, StoreError> {
        let row: Option<(i64, String)> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, hashed_password FROM users WHERE email = ?1",
                    [email],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;

        let (id, hash) = row.ok_or(StoreError::InvalidCredentials)?;

        let parsed = PasswordHash::new(&hash)
            .map_err(|e| StoreError::Other(anyhow!("corrupt password hash: {}", e)))?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(id),
            Err(_) => Err(StoreError::InvalidCredentials),
        }
    }

    fn get(&self, id: i64) -> Result<User, StoreError> {
        let row: Option<(i64, String, String, String)> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, email, created FROM users WHERE id = ?1",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?)
        })?;

        let (id, name, email, created) = row.ok_or(StoreError::NoRecord)?;

        Ok(User {
            id,
            name,
            email,
            created: parse_ts(&created)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteUsers {
        SqliteUsers::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn authenticate_valid_credentials() {
        let store = store();
        store
            .insert("Alice", "alice@example.com", "pa$$word1234")
            .unwrap();

        let id = store
            .authenticate("alice@example.com", "pa$$word1234")
            .unwrap();
        let user = store.get(id).unwrap();
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.name, "Alice");
    }

    #[test]
    fn wrong_password_and_unknown_email_look_identical() {
        let store = store();
        store
            .insert("Alice", "alice@example.com", "pa$$word1234")
            .unwrap();

        assert!(matches!(
            store.authenticate("alice@example.com", "wrong-password"),
            Err(StoreError::InvalidCredentials)
        ));
        assert!(matches!(
            store.authenticate("nobody@example.com", "pa$$word1234"),
            Err(StoreError::InvalidCredentials)
        ));
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let store = store();
        store
            .insert("Alice", "alice@example.com", "pa$$word1234")
            .unwrap();

        assert!(matches!(
            store.insert("Bob", "alice@example.com", "another-password"),
            Err(StoreError::DuplicateEmail)
        ));
    }

    #[test]
    fn get_missing_is_no_record() {
        let store = store();
        assert!(matches!(store.get(99), Err(StoreError::NoRecord)));
    }
}
