// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process, TTL'd maps for the OPAQUE protocol's server-side state
//! between `*_start` and `*_finish`. Entries are single-use: `take()`
//! removes the entry so a replayed finalization message against the same
//! id fails with [`super::OpaqueError::SessionNotFound`] rather than
//! succeeding twice.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OpaqueError, OpaqueResult};

const DEFAULT_TTL: Duration = Duration::from_secs(120);

pub struct PendingRegistration {
    pub credential_identifier: String,
    pub expires_at: Instant,
}

pub struct PendingLogin {
    pub credential_identifier: String,
    pub server_login_state: Vec<u8>,
    pub expires_at: Instant,
}

/// Shared store for both pending-registration and pending-login state.
/// Held once in `AppState` behind an `Arc`.
pub struct OpaqueSessionStore {
    registrations: RwLock<HashMap<Uuid, PendingRegistration>>,
    logins: RwLock<HashMap<Uuid, PendingLogin>>,
    ttl: Duration,
}

impl Default for OpaqueSessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl OpaqueSessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            logins: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn put_registration(&self, credential_identifier: String) -> Uuid {
        let id = Uuid::new_v4();
        let mut map = self.registrations.write().await;
        sweep_registrations(&mut map);
        map.insert(
            id,
            PendingRegistration {
                credential_identifier,
                expires_at: Instant::now() + self.ttl,
            },
        );
        id
    }

    /// Compare-and-delete: a registration id can be finished at most once.
    pub async fn take_registration(&self, id: Uuid) -> OpaqueResult<PendingRegistration> {
        let mut map = self.registrations.write().await;
        let entry = map.remove(&id).ok_or(OpaqueError::SessionNotFound)?;
        if entry.expires_at < Instant::now() {
            return Err(OpaqueError::SessionExpired);
        }
        Ok(entry)
    }

    pub async fn put_login(&self, credential_identifier: String, server_login_state: Vec<u8>) -> Uuid {
        let id = Uuid::new_v4();
        let mut map = self.logins.write().await;
        sweep_logins(&mut map);
        map.insert(
            id,
            PendingLogin {
                credential_identifier,
                server_login_state,
                expires_at: Instant::now() + self.ttl,
            },
        );
        id
    }

    /// Compare-and-delete: a login id can be finished at most once.
    pub async fn take_login(&self, id: Uuid) -> OpaqueResult<PendingLogin> {
        let mut map = self.logins.write().await;
        let entry = map.remove(&id).ok_or(OpaqueError::SessionNotFound)?;
        if entry.expires_at < Instant::now() {
            return Err(OpaqueError::SessionExpired);
        }
        Ok(entry)
    }
}

fn sweep_registrations(map: &mut HashMap<Uuid, PendingRegistration>) {
    let now = Instant::now();
    map.retain(|_, v| v.expires_at > now);
}

fn sweep_logins(map: &mut HashMap<Uuid, PendingLogin>) {
    let now = Instant::now();
    map.retain(|_, v| v.expires_at > now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registration_is_single_use() {
        let store = OpaqueSessionStore::default();
        let id = store.put_registration("alice@example.com".into()).await;
        assert!(store.take_registration(id).await.is_ok());
        assert!(matches!(
            store.take_registration(id).await,
            Err(OpaqueError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn login_is_single_use() {
        let store = OpaqueSessionStore::default();
        let id = store.put_login("alice@example.com".into(), vec![1, 2, 3]).await;
        let entry = store.take_login(id).await.unwrap();
        assert_eq!(entry.server_login_state, vec![1, 2, 3]);
        assert!(matches!(
            store.take_login(id).await,
            Err(OpaqueError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn expired_registration_is_rejected() {
        let store = OpaqueSessionStore::new(Duration::from_millis(1));
        let id = store.put_registration("bob@example.com".into()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            store.take_registration(id).await,
            Err(OpaqueError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn unknown_id_is_rejected() {
        let store = OpaqueSessionStore::default();
        assert!(matches!(
            store.take_login(Uuid::new_v4()).await,
            Err(OpaqueError::SessionNotFound)
        ));
    }
}
