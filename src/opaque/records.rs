// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable storage for the OPAQUE password file ("envelope ciphertext"),
//! one row per `sub`, wrapped under the KeK with the `sub` as AAD. This
//! carries no password material, but the KeK wrap still binds the record
//! to its owner the same way every other at-rest secret is bound.

use std::sync::Arc;

use crate::crypto::kek::Kek;
use crate::storage::db::{Db, OPAQUE_RECORDS};

use super::{OpaqueError, OpaqueResult};

const RECORD_AAD_PREFIX: &str = "opaque-record:";

pub struct OpaqueRecordStore {
    db: Arc<Db>,
    kek: Arc<Kek>,
}

impl OpaqueRecordStore {
    pub fn new(db: Arc<Db>, kek: Arc<Kek>) -> Self {
        Self { db, kek }
    }

    fn aad(sub: &str) -> Vec<u8> {
        format!("{RECORD_AAD_PREFIX}{sub}").into_bytes()
    }

    /// Replace the stored record for `sub`, atomically overwriting any
    /// prior record (registration writes once; password change replaces).
    pub fn put(&self, sub: &str, password_file: &[u8]) -> OpaqueResult<()> {
        let wrapped = self
            .kek
            .wrap(&Self::aad(sub), password_file)
            .map_err(|e| OpaqueError::Internal(e.to_string()))?;
        self.db
            .put_bytes(OPAQUE_RECORDS, sub, &wrapped)
            .map_err(|e| OpaqueError::Internal(e.to_string()))
    }

    pub fn get(&self, sub: &str) -> OpaqueResult<Option<Vec<u8>>> {
        let wrapped = self
            .db
            .get_bytes(OPAQUE_RECORDS, sub)
            .map_err(|e| OpaqueError::Internal(e.to_string()))?;
        match wrapped {
            Some(bytes) => {
                let unwrapped = self
                    .kek
                    .unwrap(&Self::aad(sub), &bytes)
                    .map_err(|e| OpaqueError::Internal(e.to_string()))?;
                Ok(Some(unwrapped.to_vec()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (OpaqueRecordStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&dir.path().join("opaque_records_test.redb")).unwrap());
        let kek = Arc::new(Kek::for_tests());
        (OpaqueRecordStore::new(db, kek), dir)
    }

    #[test]
    fn put_and_get_round_trip() {
        let (store, _dir) = test_store();
        store.put("sub-1", b"password-file-bytes").unwrap();
        let read = store.get("sub-1").unwrap().unwrap();
        assert_eq!(read, b"password-file-bytes");
    }

    #[test]
    fn missing_record_returns_none() {
        let (store, _dir) = test_store();
        assert!(store.get("unknown").unwrap().is_none());
    }

    #[test]
    fn put_replaces_existing_record() {
        let (store, _dir) = test_store();
        store.put("sub-1", b"first").unwrap();
        store.put("sub-1", b"second").unwrap();
        assert_eq!(store.get("sub-1").unwrap().unwrap(), b"second");
    }
}
