// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Application State
//!
//! The shared state handed to every Axum handler via the `State`
//! extractor: one `Arc` per feature-module repository/engine, a shared
//! `redb` handle, the process KeK, and the runtime `Config`.
//!
//! ## Thread safety
//!
//! `AppState` is `Clone` and `Send + Sync` — cloning only bumps reference
//! counts, so handlers can hold their own copy without contention.

use std::sync::Arc;

use crate::authorize::AuthorizeStore;
use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::crypto::kek::Kek;
use crate::crypto::drk::DrkStore;
use crate::jwks::SigningJwks;
use crate::opaque::{OpaqueEngine, OpaqueRecordStore, OpaqueSessionStore};
use crate::otp::OtpEngine;
use crate::rate_limit::RateLimiter;
use crate::session::SessionStore;
use crate::storage::db::Db;
use crate::storage::json_store::JsonStore;
use crate::users::UserStore;

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: Arc<Db>,
    pub kek: Arc<Kek>,
    pub json_store: Arc<JsonStore>,
    pub clients: Arc<ClientRegistry>,
    pub users: Arc<UserStore>,
    pub opaque_engine: Arc<OpaqueEngine>,
    pub opaque_sessions: Arc<OpaqueSessionStore>,
    pub opaque_records: Arc<OpaqueRecordStore>,
    pub otp: Arc<OtpEngine>,
    pub sessions: Arc<SessionStore>,
    pub authorize: Arc<AuthorizeStore>,
    pub jwks: Arc<SigningJwks>,
    pub drk: Arc<DrkStore>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        db: Arc<Db>,
        kek: Arc<Kek>,
        json_store: Arc<JsonStore>,
        clients: Arc<ClientRegistry>,
        opaque_engine: Arc<OpaqueEngine>,
    ) -> Self {
        let users = Arc::new(UserStore::new(db.clone()));
        let opaque_sessions = Arc::new(OpaqueSessionStore::default());
        let opaque_records = Arc::new(OpaqueRecordStore::new(db.clone(), kek.clone()));
        let otp = Arc::new(OtpEngine::new(db.clone(), kek.clone(), config.issuer.clone()));
        let sessions = Arc::new(SessionStore::new(db.clone()));
        let authorize = Arc::new(AuthorizeStore::new(db.clone()));
        let jwks = Arc::new(SigningJwks::new(db.clone(), kek.clone()));
        let drk = Arc::new(DrkStore::new(db.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_capacity,
            config.rate_limit_refill_seconds,
        ));

        Self {
            config,
            db,
            kek,
            json_store,
            clients,
            users,
            opaque_engine,
            opaque_sessions,
            opaque_records,
            otp,
            sessions,
            authorize,
            jwks,
            drk,
            rate_limiter,
        }
    }
}

#[cfg(test)]
impl Default for AppState {
    fn default() -> Self {
        let dir = std::env::temp_dir().join(format!("darkauth-test-state-{}", uuid::Uuid::new_v4()));
        let db = Arc::new(Db::open(&dir.join("state.redb")).expect("open test db"));
        let kek = Arc::new(Kek::for_tests());

        let mut json_store = JsonStore::new(crate::storage::paths::StoragePaths::new(&dir));
        json_store.initialize().expect("initialize test json store");
        let json_store = Arc::new(json_store);

        let clients = Arc::new(
            ClientRegistry::new(dir.to_str().unwrap(), Some(kek.clone()))
                .expect("open test client registry"),
        );
        let opaque_engine = Arc::new(OpaqueEngine::generate());

        Self::new(
            Config::default(),
            db,
            kek,
            json_store,
            clients,
            opaque_engine,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_can_be_cloned() {
        let state = AppState::default();
        let _cloned = state.clone();
    }
}
