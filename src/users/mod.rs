// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Users
//!
//! The `User` row: `sub`, a case-insensitive-unique `email`, `name`, and
//! `password_reset_required`. Keyed by `sub` in redb; a secondary
//! `email:<lowercased>` row maps an email to its `sub` so login can look
//! up a user without a table scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::db::{Db, DbError, USERS};

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("user not found")]
    NotFound,

    #[error("email already registered")]
    EmailTaken,

    #[error(transparent)]
    Db(#[from] DbError),
}

pub type UserResult<T> = Result<T, UserError>;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub password_reset_required: bool,
    pub created_at: DateTime<Utc>,
}

fn email_key(email: &str) -> String {
    format!("email:{}", email.to_ascii_lowercase())
}

pub struct UserStore {
    db: std::sync::Arc<Db>,
}

impl UserStore {
    pub fn new(db: std::sync::Arc<Db>) -> Self {
        Self { db }
    }

    pub fn find_by_email(&self, email: &str) -> UserResult<Option<User>> {
        let sub: Option<String> = self.db.get(USERS, &email_key(email))?;
        match sub {
            Some(sub) => Ok(self.db.get(USERS, &sub)?),
            None => Ok(None),
        }
    }

    pub fn get(&self, sub: &str) -> UserResult<User> {
        self.db.get(USERS, sub)?.ok_or(UserError::NotFound)
    }

    /// Create a new user. Fails if the email is already taken.
    pub fn create(&self, email: &str, name: &str) -> UserResult<User> {
        if self.find_by_email(email)?.is_some() {
            return Err(UserError::EmailTaken);
        }
        let user = User {
            sub: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: name.to_string(),
            email_verified: false,
            password_reset_required: false,
            created_at: Utc::now(),
        };
        self.db.put(USERS, &user.sub, &user)?;
        self.db.put(USERS, &email_key(email), &user.sub)?;
        Ok(user)
    }

    pub fn set_password_reset_required(&self, sub: &str, required: bool) -> UserResult<User> {
        let mut user = self.get(sub)?;
        user.password_reset_required = required;
        self.db.put(USERS, sub, &user)?;
        Ok(user)
    }

    pub fn mark_email_verified(&self, sub: &str) -> UserResult<User> {
        let mut user = self.get(sub)?;
        user.email_verified = true;
        self.db.put(USERS, sub, &user)?;
        Ok(user)
    }

    /// All users. The table also carries `email:<lowercased> -> sub`
    /// index rows; those fail to deserialize as `User` and are skipped.
    pub fn list(&self) -> UserResult<Vec<User>> {
        let mut rows = self.db.list_ok::<User>(USERS)?;
        rows.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));
        Ok(rows.into_iter().map(|(_, user)| user).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (UserStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = std::sync::Arc::new(Db::open(&dir.path().join("users_test.redb")).unwrap());
        (UserStore::new(db), dir)
    }

    #[test]
    fn create_and_find_by_email_case_insensitive() {
        let (store, _dir) = test_store();
        let created = store.create("Alice@Example.com", "Alice").unwrap();
        let found = store.find_by_email("alice@example.com").unwrap().unwrap();
        assert_eq!(found.sub, created.sub);
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let (store, _dir) = test_store();
        store.create("alice@example.com", "Alice").unwrap();
        assert!(matches!(
            store.create("ALICE@example.com", "Alice Two"),
            Err(UserError::EmailTaken)
        ));
    }

    #[test]
    fn list_skips_email_index_rows() {
        let (store, _dir) = test_store();
        store.create("alice@example.com", "Alice").unwrap();
        store.create("bob@example.com", "Bob").unwrap();
        let users = store.list().unwrap();
        assert_eq!(users.len(), 2);
    }

    #[test]
    fn password_reset_required_round_trips() {
        let (store, _dir) = test_store();
        let user = store.create("bob@example.com", "Bob").unwrap();
        let updated = store.set_password_reset_required(&user.sub, true).unwrap();
        assert!(updated.password_reset_required);
    }
}
