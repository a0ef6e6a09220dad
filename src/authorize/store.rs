// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Redb-backed `AuthorizeRequest` rows.

use std::sync::Arc;

use base64ct::Encoding;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::Scope;
use crate::storage::db::{Db, AUTHORIZE_REQUESTS};

use super::{AuthorizeError, AuthorizeResult};

const REQUEST_TTL_SECONDS: i64 = 300;
const CODE_TTL_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizeStatus {
    Pending,
    Finalized,
    Denied,
    Redeemed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    pub request_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<Scope>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub zk_pub: Option<String>,
    pub has_zk: bool,
    pub state: Option<String>,
    pub status: AuthorizeStatus,
    pub sub: Option<String>,
    pub code: Option<String>,
    pub code_expires_at: Option<DateTime<Utc>>,
    pub code_used_at: Option<DateTime<Utc>>,
    pub drk_hash: Option<String>,
    pub drk_jwe: Option<String>,
    /// The browser session that approved this request, so a minted access
    /// token can be bound back to it — deleting that session must revoke
    /// any token issued off the code it approved.
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Fields supplied by the `GET /authorize` handler to start a new record.
pub struct NewAuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<Scope>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub zk_pub: Option<String>,
    pub has_zk: bool,
    pub state: Option<String>,
}

fn generate_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

fn generate_code() -> String {
    let mut bytes = [0u8; 18];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

fn code_key(code: &str) -> String {
    format!("code:{code}")
}

/// Shared authorize-request repository, held once in `AppState`.
pub struct AuthorizeStore {
    db: Arc<Db>,
}

impl AuthorizeStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn start(&self, new: NewAuthorizeRequest) -> AuthorizeResult<AuthorizeRequest> {
        let now = Utc::now();
        let request = AuthorizeRequest {
            request_id: generate_id(),
            client_id: new.client_id,
            redirect_uri: new.redirect_uri,
            scopes: Scope::normalize_list(new.scopes),
            code_challenge: new.code_challenge,
            code_challenge_method: new.code_challenge_method,
            zk_pub: new.zk_pub,
            has_zk: new.has_zk,
            state: new.state,
            status: AuthorizeStatus::Pending,
            sub: None,
            code: None,
            code_expires_at: None,
            code_used_at: None,
            drk_hash: None,
            drk_jwe: None,
            session_id: None,
            created_at: now,
            expires_at: now + Duration::seconds(REQUEST_TTL_SECONDS),
        };
        self.db
            .put(AUTHORIZE_REQUESTS, &request.request_id, &request)?;
        Ok(request)
    }

    pub fn get(&self, request_id: &str) -> AuthorizeResult<AuthorizeRequest> {
        let request: AuthorizeRequest = self
            .db
            .get(AUTHORIZE_REQUESTS, request_id)?
            .ok_or(AuthorizeError::NotFound)?;
        if request.expires_at < Utc::now() && request.status == AuthorizeStatus::Pending {
            return Err(AuthorizeError::Expired);
        }
        Ok(request)
    }

    /// Approve or deny a pending request. Fails with `NotPending` if this
    /// request was already finalized or denied by a prior call — the
    /// compare-and-set that makes a second `finalize` a conflict rather
    /// than a silent double-issue.
    pub fn finalize(
        &self,
        request_id: &str,
        sub: &str,
        session_id: &str,
        approve: bool,
        drk_hash: Option<String>,
        drk_jwe: Option<String>,
    ) -> AuthorizeResult<AuthorizeRequest> {
        let mut request = self.get(request_id)?;
        if request.status != AuthorizeStatus::Pending {
            return Err(AuthorizeError::NotPending);
        }

        request.sub = Some(sub.to_string());
        if approve {
            request.session_id = Some(session_id.to_string());
            if request.has_zk {
                match (&drk_hash, &drk_jwe) {
                    (Some(hash), Some(jwe)) => {
                        let digest = Sha256::digest(jwe.as_bytes());
                        let expected = base64ct::Base64UrlUnpadded::encode_string(&digest);
                        if hash != &expected {
                            return Err(AuthorizeError::ZkPayloadInvalid);
                        }
                    }
                    _ => return Err(AuthorizeError::ZkPayloadInvalid),
                }
            }

            let now = Utc::now();
            let code = generate_code();
            request.code = Some(code.clone());
            request.code_expires_at = Some(now + Duration::seconds(CODE_TTL_SECONDS));
            request.drk_hash = drk_hash;
            request.drk_jwe = drk_jwe;
            request.status = AuthorizeStatus::Finalized;
            self.db.put(AUTHORIZE_REQUESTS, request_id, &request)?;
            self.db.put(AUTHORIZE_REQUESTS, &code_key(&code), &request_id.to_string())?;
        } else {
            request.status = AuthorizeStatus::Denied;
            self.db.put(AUTHORIZE_REQUESTS, request_id, &request)?;
        }
        Ok(request)
    }

    /// Redeem an authorization code exactly once. A second call with the
    /// same code — even before the `code_expires_at` deadline — fails with
    /// `CodeInvalid`.
    pub fn redeem_code(&self, code: &str) -> AuthorizeResult<AuthorizeRequest> {
        let request_id: String = self
            .db
            .get(AUTHORIZE_REQUESTS, &code_key(code))?
            .ok_or(AuthorizeError::CodeInvalid)?;

        let mut request: AuthorizeRequest = self
            .db
            .get(AUTHORIZE_REQUESTS, &request_id)?
            .ok_or(AuthorizeError::CodeInvalid)?;

        if request.status != AuthorizeStatus::Finalized || request.code.as_deref() != Some(code) {
            return Err(AuthorizeError::CodeInvalid);
        }
        if request.code_used_at.is_some() {
            return Err(AuthorizeError::CodeInvalid);
        }
        let expires_at = request.code_expires_at.ok_or(AuthorizeError::CodeInvalid)?;
        if expires_at < Utc::now() {
            return Err(AuthorizeError::CodeExpired);
        }

        request.code_used_at = Some(Utc::now());
        request.status = AuthorizeStatus::Redeemed;
        self.db.put(AUTHORIZE_REQUESTS, &request_id, &request)?;
        self.db.delete(AUTHORIZE_REQUESTS, &code_key(code))?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (AuthorizeStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&dir.path().join("authorize_test.redb")).unwrap());
        (AuthorizeStore::new(db), dir)
    }

    fn new_request() -> NewAuthorizeRequest {
        NewAuthorizeRequest {
            client_id: "app-web".into(),
            redirect_uri: "https://app/cb".into(),
            scopes: vec![Scope::Simple("profile".into())],
            code_challenge: Some("XYZ".into()),
            code_challenge_method: Some("S256".into()),
            zk_pub: None,
            has_zk: false,
            state: Some("ST".into()),
        }
    }

    #[test]
    fn second_finalize_is_conflict() {
        let (store, _dir) = test_store();
        let request = store.start(new_request()).unwrap();
        store
            .finalize(&request.request_id, "sub-1", "session-1", true, None, None)
            .unwrap();
        assert!(matches!(
            store.finalize(&request.request_id, "sub-1", "session-1", true, None, None),
            Err(AuthorizeError::NotPending)
        ));
    }

    #[test]
    fn code_is_redeemed_once() {
        let (store, _dir) = test_store();
        let request = store.start(new_request()).unwrap();
        let finalized = store
            .finalize(&request.request_id, "sub-1", "session-1", true, None, None)
            .unwrap();
        let code = finalized.code.clone().unwrap();

        let redeemed = store.redeem_code(&code).unwrap();
        assert_eq!(redeemed.sub.as_deref(), Some("sub-1"));
        assert_eq!(redeemed.session_id.as_deref(), Some("session-1"));
        assert!(matches!(
            store.redeem_code(&code),
            Err(AuthorizeError::CodeInvalid)
        ));
    }

    #[test]
    fn denied_request_issues_no_code() {
        let (store, _dir) = test_store();
        let request = store.start(new_request()).unwrap();
        let denied = store
            .finalize(&request.request_id, "sub-1", "session-1", false, None, None)
            .unwrap();
        assert_eq!(denied.status, AuthorizeStatus::Denied);
        assert!(denied.code.is_none());
    }

    fn new_zk_request() -> NewAuthorizeRequest {
        let mut new = new_request();
        new.has_zk = true;
        new.zk_pub = Some("ephemeral-jwk".into());
        new
    }

    #[test]
    fn zk_client_requires_matching_drk_hash() {
        let (store, _dir) = test_store();
        let request = store.start(new_zk_request()).unwrap();

        let jwe = "wrapped-drk-jwe-bytes";
        let digest = Sha256::digest(jwe.as_bytes());
        let hash = base64ct::Base64UrlUnpadded::encode_string(&digest);

        let finalized = store
            .finalize(&request.request_id, "sub-1", "session-1", true, Some(hash.clone()), Some(jwe.to_string()))
            .unwrap();
        assert_eq!(finalized.drk_hash.as_deref(), Some(hash.as_str()));
    }

    #[test]
    fn zk_client_rejects_mismatched_drk_hash() {
        let (store, _dir) = test_store();
        let request = store.start(new_zk_request()).unwrap();
        let result = store.finalize(
            &request.request_id,
            "sub-1",
            "session-1",
            true,
            Some("wrong-hash".into()),
            Some("wrapped-drk-jwe-bytes".into()),
        );
        assert!(matches!(result, Err(AuthorizeError::ZkPayloadInvalid)));
    }

    #[test]
    fn zk_client_rejects_missing_drk_payload() {
        let (store, _dir) = test_store();
        let request = store.start(new_zk_request()).unwrap();
        let result = store.finalize(&request.request_id, "sub-1", "session-1", true, None, None);
        assert!(matches!(result, Err(AuthorizeError::ZkPayloadInvalid)));
    }

    #[test]
    fn approved_request_records_the_approving_session() {
        let (store, _dir) = test_store();
        let request = store.start(new_request()).unwrap();
        let finalized = store
            .finalize(&request.request_id, "sub-1", "session-xyz", true, None, None)
            .unwrap();
        assert_eq!(finalized.session_id.as_deref(), Some("session-xyz"));
    }
}
