// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Server-side storage for the client-produced DRK artifacts:
//! `wrapped_drk`, `enc_public_jwk`, `wrapped_enc_private_jwk`. The server
//! never decrypts or derives from any of these — they are accepted and
//! returned as opaque bytes/JSON, keyed by `sub`. This is deliberately a
//! thin wrapper over [`crate::storage::db::Db`]'s `DRK_BLOBS` table, not
//! the KeK: wrapping server-side under the KeK in addition to the
//! client-side wrap would buy nothing, since the server holds no key that
//! could ever unwrap the client's layer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::aead;
use super::error::{CryptoError, CryptoResult};
use crate::storage::db::{Db, DbError, DRK_BLOBS};

pub type DrkResult<T> = Result<T, DbError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrkRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapped_drk: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enc_public_jwk: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapped_enc_private_jwk: Option<Vec<u8>>,
}

pub struct DrkStore {
    db: Arc<Db>,
}

impl DrkStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn get(&self, sub: &str) -> DrkResult<DrkRecord> {
        Ok(self.db.get(DRK_BLOBS, sub)?.unwrap_or_default())
    }

    pub fn put_wrapped_drk(&self, sub: &str, wrapped_drk: Vec<u8>) -> DrkResult<()> {
        let mut record = self.get(sub)?;
        record.wrapped_drk = Some(wrapped_drk);
        self.db.put(DRK_BLOBS, sub, &record)
    }

    pub fn put_enc_public_jwk(&self, sub: &str, enc_public_jwk: Value) -> DrkResult<()> {
        let mut record = self.get(sub)?;
        record.enc_public_jwk = Some(enc_public_jwk);
        self.db.put(DRK_BLOBS, sub, &record)
    }

    pub fn put_wrapped_enc_private_jwk(&self, sub: &str, wrapped: Vec<u8>) -> DrkResult<()> {
        let mut record = self.get(sub)?;
        record.wrapped_enc_private_jwk = Some(wrapped);
        self.db.put(DRK_BLOBS, sub, &record)
    }
}

/// One recipient's wrapped copy of a re-encrypted data-encryption key.
pub struct RecipientWrap {
    pub recipient_sub: String,
    pub wrapped_dek: Vec<u8>,
}

/// Re-encrypt a data-encryption key for a batch of recipients concurrently.
///
/// This is the client-side DEK-fanout primitive behind per-document
/// sharing: each recipient already holds a wrap key of their own (derived
/// the same way `crypto::schedule` derives `KW`), and the sharer wraps the
/// same `dek` under every recipient's key in parallel, the way a
/// `Promise.allSettled` fan-out would. A recipient whose wrap fails does
/// not sink the others — the call only fails if every recipient's wrap
/// failed. No HTTP endpoint calls this yet; it exists so the primitive is
/// implemented and tested ahead of a future sharing API.
pub async fn reencrypt_for_recipients(
    dek: &[u8; 32],
    recipients: &[(String, [u8; 32])],
) -> CryptoResult<Vec<RecipientWrap>> {
    let tasks = recipients.iter().map(|(sub, recipient_key)| {
        let sub = sub.clone();
        let recipient_key = *recipient_key;
        let dek = *dek;
        async move {
            aead::encrypt(&recipient_key, sub.as_bytes(), &dek).map(|wrapped_dek| RecipientWrap {
                recipient_sub: sub,
                wrapped_dek,
            })
        }
    });

    let results = futures::future::join_all(tasks).await;
    let failures = results.iter().filter(|r| r.is_err()).count();
    if failures > 0 {
        tracing::warn!(failures, total = recipients.len(), "some recipient DEK wraps failed");
    }
    let wraps: Vec<RecipientWrap> = results.into_iter().filter_map(Result::ok).collect();
    if wraps.is_empty() && !recipients.is_empty() {
        return Err(CryptoError::AeadEncrypt);
    }
    Ok(wraps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (DrkStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&dir.path().join("drk_test.redb")).unwrap());
        (DrkStore::new(db), dir)
    }

    #[test]
    fn fields_are_independently_settable() {
        let (store, _dir) = test_store();
        store.put_wrapped_drk("sub-1", vec![1, 2, 3]).unwrap();
        store
            .put_enc_public_jwk("sub-1", serde_json::json!({"kty": "EC"}))
            .unwrap();

        let record = store.get("sub-1").unwrap();
        assert_eq!(record.wrapped_drk, Some(vec![1, 2, 3]));
        assert!(record.enc_public_jwk.is_some());
        assert!(record.wrapped_enc_private_jwk.is_none());
    }

    #[test]
    fn missing_sub_returns_empty_record() {
        let (store, _dir) = test_store();
        let record = store.get("unknown").unwrap();
        assert!(record.wrapped_drk.is_none());
    }

    #[tokio::test]
    async fn reencrypt_wraps_for_every_recipient() {
        let dek = [9u8; 32];
        let recipients = vec![
            ("alice".to_string(), [1u8; 32]),
            ("bob".to_string(), [2u8; 32]),
        ];
        let wraps = reencrypt_for_recipients(&dek, &recipients).await.unwrap();
        assert_eq!(wraps.len(), 2);

        let alice_key = recipients[0].1;
        let alice_wrap = wraps.iter().find(|w| w.recipient_sub == "alice").unwrap();
        let recovered = aead::decrypt(&alice_key, b"alice", &alice_wrap.wrapped_dek).unwrap();
        assert_eq!(&recovered[..], &dek[..]);
    }

    #[tokio::test]
    async fn reencrypt_with_no_recipients_succeeds_empty() {
        let dek = [9u8; 32];
        let wraps = reencrypt_for_recipients(&dek, &[]).await.unwrap();
        assert!(wraps.is_empty());
    }
}
