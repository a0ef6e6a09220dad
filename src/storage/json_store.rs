// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # JSON Repository Storage
//!
//! Plain-filesystem JSON storage for the handful of low-churn,
//! admin-managed entities (OAuth client records) that don't need redb's
//! transactional, indexed access. Every record is its own file, written
//! atomically via a temp-file-then-rename, under [`StoragePaths`]'s
//! directory layout.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use super::StoragePaths;

/// Error type for JSON repository storage operations.
#[derive(Debug)]
pub enum StorageError {
    Io(io::Error),
    Json(serde_json::Error),
    NotFound(String),
    AlreadyExists(String),
    NotInitialized,
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "I/O error: {e}"),
            StorageError::Json(e) => write!(f, "JSON error: {e}"),
            StorageError::NotFound(entity) => write!(f, "not found: {entity}"),
            StorageError::AlreadyExists(entity) => write!(f, "already exists: {entity}"),
            StorageError::NotInitialized => write!(f, "storage not initialized"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            StorageError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(e.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Json(e)
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// JSON-file storage manager rooted at [`StoragePaths`].
#[derive(Debug, Clone)]
pub struct JsonStore {
    paths: StoragePaths,
    initialized: bool,
}

impl JsonStore {
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            initialized: false,
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Create the directory layout. Safe to call multiple times.
    pub fn initialize(&mut self) -> StorageResult<()> {
        fs::create_dir_all(self.paths.clients_dir())?;
        self.initialized = true;
        Ok(())
    }

    pub fn health_check(&self) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        let test_file = self.paths.root().join(".health_check");
        let test_data = b"health_check_data";
        fs::write(&test_file, test_data)?;
        let read_data = fs::read(&test_file)?;
        fs::remove_file(&test_file)?;
        if read_data != test_data {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "health check data mismatch",
            )));
        }
        Ok(())
    }

    pub fn read_json<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> StorageResult<T> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn write_json<T: Serialize>(&self, path: impl AsRef<Path>, value: &T) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        File::open(path.as_ref()).is_ok()
    }

    pub fn delete(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        fs::remove_file(path.as_ref())?;
        Ok(())
    }

    pub fn list_files(&self, dir: impl AsRef<Path>, extension: &str) -> StorageResult<Vec<String>> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        Ok(ids)
    }

    pub fn write_raw(&self, path: impl AsRef<Path>, data: &[u8]) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    pub fn read_raw(&self, path: impl AsRef<Path>) -> StorageResult<Vec<u8>> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        let mut file = File::open(path.as_ref())?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    fn test_store() -> (JsonStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = StoragePaths::new(dir.path());
        let mut store = JsonStore::new(paths);
        store.initialize().unwrap();
        (store, dir)
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestData {
        id: String,
        value: i32,
    }

    #[test]
    fn initialize_creates_clients_dir() {
        let (store, _dir) = test_store();
        assert!(store.paths().clients_dir().exists());
    }

    #[test]
    fn write_and_read_json_round_trips() {
        let (store, _dir) = test_store();
        let data = TestData {
            id: "test-1".into(),
            value: 42,
        };
        let path = store.paths().client_file("test-1");
        store.write_json(&path, &data).unwrap();
        let read: TestData = store.read_json(&path).unwrap();
        assert_eq!(read, data);
    }

    #[test]
    fn list_files_returns_ids() {
        let (store, _dir) = test_store();
        for i in 1..=3 {
            let path = store.paths().client_file(&format!("client-{i}"));
            store
                .write_json(&path, &TestData {
                    id: format!("client-{i}"),
                    value: i,
                })
                .unwrap();
        }
        let ids = store.list_files(store.paths().clients_dir(), "json").unwrap();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn delete_removes_file() {
        let (store, _dir) = test_store();
        let path = store.paths().client_file("to-delete");
        store
            .write_json(&path, &TestData {
                id: "to-delete".into(),
                value: 0,
            })
            .unwrap();
        assert!(store.exists(&path));
        store.delete(&path).unwrap();
        assert!(!store.exists(&path));
    }

    #[test]
    fn uninitialized_store_returns_error() {
        let paths = StoragePaths::new("/tmp/darkauth-never-init");
        let store = JsonStore::new(paths);
        let result = store.read_json::<TestData>("/tmp/any.json");
        assert!(matches!(result, Err(StorageError::NotInitialized)));
    }
}
