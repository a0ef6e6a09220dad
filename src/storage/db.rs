// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ACID store backed by redb, standing in for the transactional
//! relational store named in the core contract. Every table holds
//! `&str key -> JSON bytes value`; callers serialize their own row types.
//! `redb`'s single-writer-multiple-readers model gives us the row-level
//! and single-use semantics the core demands (compare-and-delete for
//! login sessions, compare-and-update for authorization-code redemption)
//! essentially for free, by scoping each mutation to one write
//! transaction.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};

pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
pub const OPAQUE_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("opaque_records");
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
pub const AUTHORIZE_REQUESTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("authorize_requests");
pub const JWKS: TableDefinition<&str, &[u8]> = TableDefinition::new("jwks");
pub const OTP_CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("otp_configs");
pub const AUDIT_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_events");
pub const DRK_BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("drk_blobs");
pub const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const ALL_TABLES: &[TableDefinition<&str, &[u8]>] = &[
    USERS,
    OPAQUE_RECORDS,
    SESSIONS,
    AUTHORIZE_REQUESTS,
    JWKS,
    OTP_CONFIGS,
    AUDIT_EVENTS,
    DRK_BLOBS,
    META,
];

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thin wrapper around a redb `Database` with JSON-valued generic
/// accessors. Feature modules (session, authorize, otp, jwks, ...) each
/// define their own row types and call these helpers with their own
/// table constant.
pub struct Db {
    inner: Database,
}

impl Db {
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let inner = Database::create(path)?;
        let write_txn = inner.begin_write()?;
        for table in ALL_TABLES {
            let _ = write_txn.open_table(*table)?;
        }
        write_txn.commit()?;
        Ok(Self { inner })
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> DbResult<Option<T>> {
        let read_txn = self.inner.begin_read()?;
        let t = read_txn.open_table(table)?;
        match t.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> DbResult<()> {
        let bytes = serde_json::to_vec(value)?;
        let write_txn = self.inner.begin_write()?;
        {
            let mut t = write_txn.open_table(table)?;
            t.insert(key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn delete(&self, table: TableDefinition<&str, &[u8]>, key: &str) -> DbResult<bool> {
        let write_txn = self.inner.begin_write()?;
        let removed = {
            let mut t = write_txn.open_table(table)?;
            t.remove(key)?.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    pub fn list<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
    ) -> DbResult<Vec<(String, T)>> {
        let read_txn = self.inner.begin_read()?;
        let t = read_txn.open_table(table)?;
        let mut out = Vec::new();
        for entry in t.iter()? {
            let (k, v) = entry?;
            out.push((k.value().to_string(), serde_json::from_slice(v.value())?));
        }
        Ok(out)
    }

    /// Like [`Db::list`], but for tables that interleave rows of a
    /// different shape (secondary-index rows keyed by a derived string).
    /// Rows that fail to deserialize as `T` are skipped rather than
    /// aborting the whole scan.
    pub fn list_ok<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
    ) -> DbResult<Vec<(String, T)>> {
        let read_txn = self.inner.begin_read()?;
        let t = read_txn.open_table(table)?;
        let mut out = Vec::new();
        for entry in t.iter()? {
            let (k, v) = entry?;
            if let Ok(value) = serde_json::from_slice(v.value()) {
                out.push((k.value().to_string(), value));
            }
        }
        Ok(out)
    }

    /// Compare-and-delete: remove `key` only if the stored value matches
    /// `expected` under `predicate`. Used for single-use OPAQUE/session
    /// artifacts where a second concurrent consumer must lose the race.
    pub fn compare_and_delete<T, F>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        predicate: F,
    ) -> DbResult<Option<T>>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> bool,
    {
        let write_txn = self.inner.begin_write()?;
        let removed = {
            let mut t = write_txn.open_table(table)?;
            match t.get(key)? {
                Some(value) => {
                    let current: T = serde_json::from_slice(value.value())?;
                    if predicate(&current) {
                        drop(value);
                        t.remove(key)?;
                        Some(current)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Raw byte accessors, for the OPAQUE server setup and other blobs
    /// that are already length-prefixed binary rather than JSON.
    pub fn get_bytes(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> DbResult<Option<Vec<u8>>> {
        let read_txn = self.inner.begin_read()?;
        let t = read_txn.open_table(table)?;
        Ok(t.get(key)?.map(|v| v.value().to_vec()))
    }

    pub fn put_bytes(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &[u8],
    ) -> DbResult<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let mut t = write_txn.open_table(table)?;
            t.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn temp_db() -> (Db, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(&dir.path().join("test.redb")).unwrap();
        (db, dir)
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        value: String,
    }

    #[test]
    fn put_get_delete_round_trip() {
        let (db, _dir) = temp_db();
        let row = Row {
            value: "hello".into(),
        };
        db.put(USERS, "u1", &row).unwrap();
        let read: Row = db.get(USERS, "u1").unwrap().unwrap();
        assert_eq!(read, row);

        assert!(db.delete(USERS, "u1").unwrap());
        let after: Option<Row> = db.get(USERS, "u1").unwrap();
        assert!(after.is_none());
    }

    #[test]
    fn compare_and_delete_only_removes_on_match() {
        let (db, _dir) = temp_db();
        db.put(SESSIONS, "s1", &Row { value: "a".into() }).unwrap();

        let missed: Option<Row> =
            db.compare_and_delete(SESSIONS, "s1", |r: &Row| r.value == "b").unwrap();
        assert!(missed.is_none());
        assert!(db.get::<Row>(SESSIONS, "s1").unwrap().is_some());

        let hit: Option<Row> =
            db.compare_and_delete(SESSIONS, "s1", |r: &Row| r.value == "a").unwrap();
        assert!(hit.is_some());
        assert!(db.get::<Row>(SESSIONS, "s1").unwrap().is_none());
    }

    #[test]
    fn list_returns_all_rows() {
        let (db, _dir) = temp_db();
        db.put(USERS, "u1", &Row { value: "a".into() }).unwrap();
        db.put(USERS, "u2", &Row { value: "b".into() }).unwrap();
        let rows: Vec<(String, Row)> = db.list(USERS).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn raw_bytes_round_trip() {
        let (db, _dir) = temp_db();
        db.put_bytes(META, "server_setup", &[1, 2, 3, 4]).unwrap();
        let bytes = db.get_bytes(META, "server_setup").unwrap().unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }
}
