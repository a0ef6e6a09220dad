// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OAuth client registry, one JSON file per client under `DATA_DIR/clients`.
//!
//! Implements the create/update normalization rules: a `public` client
//! always has `token_endpoint_auth_method = "none"` and no secret; a
//! `confidential` client (or anything declaring `client_secret_basic`)
//! gets a server-generated secret, AEAD-wrapped under the KeK.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::crypto::kek::Kek;
use crate::models::Scope;
use crate::storage::json_store::{JsonStore, StorageError, StorageResult};
use crate::storage::paths::StoragePaths;

const DEFAULT_REFRESH_TOKEN_LIFETIME_SECONDS: i64 = 30 * 24 * 60 * 60;
const CLIENT_SECRET_AAD: &[u8] = b"client-secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Public,
    Confidential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredClient {
    pub client_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub client_type: ClientType,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<Scope>,
    pub require_pkce: bool,
    pub token_endpoint_auth_method: String,
    pub refresh_token_lifetime_s: i64,
    pub zk_delivery: Option<String>,
    pub allowed_zk_origins: Vec<String>,
    pub client_secret_enc: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted from a client create/update request. Secret material
/// and timestamps are derived, never accepted from the caller.
pub struct ClientInput {
    pub name: String,
    pub client_type: ClientType,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<Scope>,
    pub require_pkce: bool,
    pub token_endpoint_auth_method: String,
    pub refresh_token_lifetime_s: Option<i64>,
    pub zk_delivery: Option<String>,
    pub allowed_zk_origins: Vec<String>,
}

fn needs_secret(input: &ClientInput) -> bool {
    input.client_type == ClientType::Confidential
        || input.token_endpoint_auth_method == "client_secret_basic"
}

fn generate_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn generate_secret() -> Vec<u8> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.to_vec()
}

pub struct ClientRegistry {
    store: JsonStore,
    kek: Option<Arc<Kek>>,
}

impl ClientRegistry {
    /// `data_dir` is the JSON-repository root (the same one the audit log
    /// uses), not the clients subdirectory itself — [`StoragePaths`]
    /// derives `data_dir/clients` from it.
    pub fn new(data_dir: &str, kek: Option<Arc<Kek>>) -> StorageResult<Self> {
        let mut store = JsonStore::new(StoragePaths::new(data_dir));
        store.initialize()?;
        Ok(Self { store, kek })
    }

    fn path(&self, client_id: &str) -> std::path::PathBuf {
        self.store.paths().client_file(client_id)
    }

    /// Apply the normalization rules: `public` clients force `auth_method
    /// = none` and no secret; confidential clients (or anything using
    /// `client_secret_basic`) get a freshly generated secret, AEAD-wrapped
    /// under the KeK when one is available.
    fn build_record(&self, client_id: String, mut input: ClientInput, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> StoredClient {
        if input.client_type == ClientType::Public {
            input.token_endpoint_auth_method = "none".to_string();
        }
        let client_secret_enc = if needs_secret(&input) {
            let secret = generate_secret();
            self.kek.as_ref().and_then(|kek| kek.wrap(CLIENT_SECRET_AAD, &secret).ok())
        } else {
            None
        };

        StoredClient {
            client_id,
            name: input.name,
            client_type: input.client_type,
            redirect_uris: input.redirect_uris,
            scopes: Scope::normalize_list(input.scopes),
            require_pkce: input.require_pkce,
            token_endpoint_auth_method: input.token_endpoint_auth_method,
            refresh_token_lifetime_s: input
                .refresh_token_lifetime_s
                .unwrap_or(DEFAULT_REFRESH_TOKEN_LIFETIME_SECONDS),
            zk_delivery: input.zk_delivery,
            allowed_zk_origins: input.allowed_zk_origins,
            client_secret_enc,
            created_at,
            updated_at,
        }
    }

    pub fn create(&self, input: ClientInput) -> StorageResult<StoredClient> {
        let client_id = generate_client_id();
        let now = Utc::now();
        let record = self.build_record(client_id.clone(), input, now, now);
        self.store.write_json(self.path(&client_id), &record)?;
        Ok(record)
    }

    pub fn get(&self, client_id: &str) -> StorageResult<StoredClient> {
        self.store
            .read_json(self.path(client_id))
            .map_err(|_| StorageError::NotFound(client_id.to_string()))
    }

    /// Update an existing client. If the update transitions it away from
    /// needing a secret, `client_secret_enc` is cleared per the invariant;
    /// otherwise a fresh secret is (re)generated only if one was missing.
    pub fn update(&self, client_id: &str, input: ClientInput) -> StorageResult<StoredClient> {
        let existing = self.get(client_id)?;
        let mut record = self.build_record(client_id.to_string(), input, existing.created_at, Utc::now());
        if record.client_secret_enc.is_none() {
            // build_record already nulled it when the new config doesn't
            // need one; nothing further to do.
        } else if existing.client_secret_enc.is_some() {
            // Keep the existing secret rather than silently rotating it
            // on every unrelated field update.
            record.client_secret_enc = existing.client_secret_enc;
        }
        self.store.write_json(self.path(client_id), &record)?;
        Ok(record)
    }

    pub fn delete(&self, client_id: &str) -> StorageResult<()> {
        self.store.delete(self.path(client_id))
    }

    pub fn list(&self) -> StorageResult<Vec<StoredClient>> {
        let ids = self.store.list_files(self.store.paths().clients_dir(), "json")?;
        ids.iter().map(|id| self.get(id)).collect()
    }

    /// Reveal the plaintext secret once, at creation time, for the admin
    /// response body. Returns `None` if no KeK is configured or the client
    /// has no secret.
    pub fn reveal_secret(&self, client: &StoredClient) -> Option<Vec<u8>> {
        let kek = self.kek.as_ref()?;
        let enc = client.client_secret_enc.as_ref()?;
        kek.unwrap(CLIENT_SECRET_AAD, enc).ok().map(|z| z.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> (ClientRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = ClientRegistry::new(
            dir.path().to_str().unwrap(),
            Some(Arc::new(Kek::for_tests())),
        )
        .unwrap();
        (registry, dir)
    }

    fn confidential_input() -> ClientInput {
        ClientInput {
            name: "app-web".into(),
            client_type: ClientType::Confidential,
            redirect_uris: vec!["https://app/cb".into()],
            scopes: vec![Scope::Simple("profile".into())],
            require_pkce: true,
            token_endpoint_auth_method: "client_secret_basic".into(),
            refresh_token_lifetime_s: None,
            zk_delivery: Some("fragment-jwe".into()),
            allowed_zk_origins: vec!["https://app".into()],
        }
    }

    #[test]
    fn confidential_client_gets_a_wrapped_secret() {
        let (registry, _dir) = test_registry();
        let client = registry.create(confidential_input()).unwrap();
        assert!(client.client_secret_enc.is_some());
        let revealed = registry.reveal_secret(&client).unwrap();
        assert_eq!(revealed.len(), 32);
    }

    #[test]
    fn public_client_forces_none_auth_method() {
        let (registry, _dir) = test_registry();
        let mut input = confidential_input();
        input.client_type = ClientType::Public;
        let client = registry.create(input).unwrap();
        assert_eq!(client.token_endpoint_auth_method, "none");
        assert!(client.client_secret_enc.is_none());
    }

    #[test]
    fn update_to_public_clears_secret() {
        let (registry, _dir) = test_registry();
        let client = registry.create(confidential_input()).unwrap();
        let mut input = confidential_input();
        input.client_type = ClientType::Public;
        let updated = registry.update(&client.client_id, input).unwrap();
        assert!(updated.client_secret_enc.is_none());
    }

    #[test]
    fn list_returns_all_clients() {
        let (registry, _dir) = test_registry();
        registry.create(confidential_input()).unwrap();
        let mut second = confidential_input();
        second.name = "app-mobile".into();
        registry.create(second).unwrap();
        assert_eq!(registry.list().unwrap().len(), 2);
    }
}
