// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Redb-backed session rows, keyed by an opaque session id that doubles as
//! the cookie value. A second index maps a refresh token's hash back to its
//! owning session id, so refresh redemption never has to scan the table.

use std::sync::Arc;

use base64ct::Encoding;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{ReauthToken, SessionData};
use crate::storage::db::{Db, SESSIONS};

const DEFAULT_SESSION_TTL_HOURS: i64 = 12;
const DEFAULT_REFRESH_TTL_DAYS: i64 = 30;
const REAUTH_TOKEN_TTL_MINUTES: i64 = 5;
const TOKEN_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("session cohort mismatch")]
    WrongCohort,

    #[error(transparent)]
    Db(#[from] crate::storage::db::DbError),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    User,
    Admin,
}

impl Cohort {
    fn key_prefix(self) -> &'static str {
        match self {
            Cohort::User => "sess:user:",
            Cohort::Admin => "sess:admin:",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub cohort: Cohort,
    pub sub: String,
    pub data: SessionData,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub refresh_token_hash: Option<String>,
    #[serde(default)]
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

fn hash_token(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    base64ct::Base64UrlUnpadded::encode_string(&digest)
}

fn refresh_index_key(hash: &str) -> String {
    format!("refresh:{hash}")
}

/// Shared session repository, held once in `AppState` behind an `Arc`.
pub struct SessionStore {
    db: Arc<Db>,
}

impl SessionStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Create a new session row for `sub` in the given cohort and return
    /// the opaque session id to set as the cookie value.
    pub fn create(&self, cohort: Cohort, sub: &str, data: SessionData) -> SessionResult<String> {
        let id = generate_token();
        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            cohort,
            sub: sub.to_string(),
            data,
            created_at: now,
            expires_at: now + Duration::hours(DEFAULT_SESSION_TTL_HOURS),
            refresh_token_hash: None,
            refresh_expires_at: None,
        };
        self.db.put(SESSIONS, &row_key(cohort, &id), &session)?;
        Ok(id)
    }

    pub fn get(&self, cohort: Cohort, id: &str) -> SessionResult<Session> {
        let session: Session = self
            .db
            .get(SESSIONS, &row_key(cohort, id))?
            .ok_or(SessionError::NotFound)?;
        if session.cohort != cohort {
            return Err(SessionError::WrongCohort);
        }
        if session.is_expired() {
            return Err(SessionError::Expired);
        }
        Ok(session)
    }

    pub fn update<F>(&self, cohort: Cohort, id: &str, mutate: F) -> SessionResult<Session>
    where
        F: FnOnce(&mut SessionData),
    {
        let mut session = self.get(cohort, id)?;
        mutate(&mut session.data);
        self.db.put(SESSIONS, &row_key(cohort, id), &session)?;
        Ok(session)
    }

    pub fn delete(&self, cohort: Cohort, id: &str) -> SessionResult<()> {
        if let Ok(session) = self.get(cohort, id) {
            if let Some(hash) = &session.refresh_token_hash {
                let _ = self.db.delete(SESSIONS, &refresh_index_key(hash));
            }
        }
        self.db.delete(SESSIONS, &row_key(cohort, id))?;
        Ok(())
    }

    /// Issue a fresh refresh token for this session, invalidating any
    /// previous one. Returns the raw token to set as the refresh cookie.
    pub fn issue_refresh(&self, cohort: Cohort, id: &str) -> SessionResult<String> {
        self.issue_refresh_with_ttl(cohort, id, Duration::days(DEFAULT_REFRESH_TTL_DAYS))
    }

    /// Same as [`Self::issue_refresh`] but with an explicit lifetime —
    /// OIDC clients each carry their own `refresh_token_lifetime_s`.
    pub fn issue_refresh_with_ttl(&self, cohort: Cohort, id: &str, ttl: Duration) -> SessionResult<String> {
        let mut session = self.get(cohort, id)?;
        if let Some(old_hash) = session.refresh_token_hash.take() {
            let _ = self.db.delete(SESSIONS, &refresh_index_key(&old_hash));
        }
        let raw = generate_token();
        let hash = hash_token(&raw);
        session.refresh_token_hash = Some(hash.clone());
        session.refresh_expires_at = Some(Utc::now() + ttl);
        self.db.put(SESSIONS, &row_key(cohort, id), &session)?;
        self.db
            .put(SESSIONS, &refresh_index_key(&hash), &id.to_string())?;
        Ok(raw)
    }

    /// Mint a reauth token bound to this session after a successful OTP or
    /// password re-verify, consumed once by a high-risk mutation.
    pub fn issue_reauth_token(&self, cohort: Cohort, id: &str) -> SessionResult<String> {
        let token = generate_token();
        let expires_at = Utc::now() + Duration::minutes(REAUTH_TOKEN_TTL_MINUTES);
        self.update(cohort, id, |data| {
            data.reauth_tokens.retain(|t| t.expires_at > Utc::now());
            data.reauth_tokens.push(ReauthToken {
                token: token.clone(),
                expires_at,
            });
        })?;
        Ok(token)
    }

    /// Consume a reauth token, returning `true` iff it was present and
    /// unexpired. Single-use: the token is removed from the session either
    /// way.
    pub fn consume_reauth_token(&self, cohort: Cohort, id: &str, token: &str) -> SessionResult<bool> {
        let now = Utc::now();
        let mut valid = false;
        self.update(cohort, id, |data| {
            if let Some(pos) = data.reauth_tokens.iter().position(|t| t.token == token) {
                valid = data.reauth_tokens[pos].expires_at > now;
                data.reauth_tokens.remove(pos);
            }
        })?;
        Ok(valid)
    }

    /// Redeem a raw refresh token, returning the session it belongs to.
    /// Does not rotate the token; callers that want rotation should call
    /// [`Self::issue_refresh`] again after redeeming.
    pub fn redeem_refresh(&self, cohort: Cohort, raw: &str) -> SessionResult<Session> {
        let hash = hash_token(raw);
        let id: String = self
            .db
            .get(SESSIONS, &refresh_index_key(&hash))?
            .ok_or(SessionError::NotFound)?;
        let session = self.get(cohort, &id)?;
        match (&session.refresh_token_hash, &session.refresh_expires_at) {
            (Some(stored_hash), Some(expires_at)) if stored_hash == &hash => {
                if *expires_at < Utc::now() {
                    return Err(SessionError::Expired);
                }
                Ok(session)
            }
            _ => Err(SessionError::NotFound),
        }
    }
}

fn row_key(cohort: Cohort, id: &str) -> String {
    format!("{}{id}", cohort.key_prefix())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&dir.path().join("session_test.redb")).unwrap());
        (SessionStore::new(db), dir)
    }

    #[test]
    fn create_and_fetch_round_trips() {
        let (store, _dir) = test_store();
        let id = store
            .create(Cohort::User, "sub-1", SessionData::default())
            .unwrap();
        let session = store.get(Cohort::User, &id).unwrap();
        assert_eq!(session.sub, "sub-1");
    }

    #[test]
    fn wrong_cohort_is_rejected() {
        let (store, _dir) = test_store();
        let id = store
            .create(Cohort::User, "sub-1", SessionData::default())
            .unwrap();
        assert!(matches!(
            store.get(Cohort::Admin, &id),
            Err(SessionError::NotFound) | Err(SessionError::WrongCohort)
        ));
    }

    #[test]
    fn refresh_token_redeems_once_rotated() {
        let (store, _dir) = test_store();
        let id = store
            .create(Cohort::User, "sub-1", SessionData::default())
            .unwrap();
        let raw = store.issue_refresh(Cohort::User, &id).unwrap();
        let redeemed = store.redeem_refresh(Cohort::User, &raw).unwrap();
        assert_eq!(redeemed.id, id);

        let raw2 = store.issue_refresh(Cohort::User, &id).unwrap();
        assert!(store.redeem_refresh(Cohort::User, &raw).is_err());
        assert!(store.redeem_refresh(Cohort::User, &raw2).is_ok());
    }

    #[test]
    fn delete_clears_refresh_index() {
        let (store, _dir) = test_store();
        let id = store
            .create(Cohort::User, "sub-1", SessionData::default())
            .unwrap();
        let raw = store.issue_refresh(Cohort::User, &id).unwrap();
        store.delete(Cohort::User, &id).unwrap();
        assert!(store.redeem_refresh(Cohort::User, &raw).is_err());
        assert!(store.get(Cohort::User, &id).is_err());
    }

    #[test]
    fn reauth_token_is_single_use() {
        let (store, _dir) = test_store();
        let id = store
            .create(Cohort::User, "sub-1", SessionData::default())
            .unwrap();
        let token = store.issue_reauth_token(Cohort::User, &id).unwrap();
        assert!(store.consume_reauth_token(Cohort::User, &id, &token).unwrap());
        assert!(!store.consume_reauth_token(Cohort::User, &id, &token).unwrap());
    }

    #[test]
    fn update_mutates_session_data() {
        let (store, _dir) = test_store();
        let id = store
            .create(Cohort::User, "sub-1", SessionData::default())
            .unwrap();
        store
            .update(Cohort::User, &id, |data| data.otp_verified = true)
            .unwrap();
        let session = store.get(Cohort::User, &id).unwrap();
        assert!(session.data.otp_verified);
    }
}
