// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the JSON-repository storage layout.

use std::path::{Path, PathBuf};

/// Default root for JSON-repository data, overridden in production by
/// `CLIENTS_DIR`'s parent.
pub const DATA_ROOT: &str = "./data";

#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory containing all OAuth client registration records.
    pub fn clients_dir(&self) -> PathBuf {
        self.root.join("clients")
    }

    /// Path to a specific client's JSON record.
    pub fn client_file(&self, client_id: &str) -> PathBuf {
        self.clients_dir().join(format!("{client_id}.json"))
    }

    /// Directory containing daily audit event logs.
    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    /// Path to a daily audit events file (JSONL format).
    pub fn audit_events_file(&self, date: &str) -> PathBuf {
        self.audit_dir().join(format!("{date}.jsonl"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_paths_are_correct() {
        let paths = StoragePaths::new("/tmp/darkauth-data");
        assert_eq!(
            paths.clients_dir(),
            PathBuf::from("/tmp/darkauth-data/clients")
        );
        assert_eq!(
            paths.client_file("app-web"),
            PathBuf::from("/tmp/darkauth-data/clients/app-web.json")
        );
    }

    #[test]
    fn audit_paths_are_correct() {
        let paths = StoragePaths::new("/tmp/darkauth-data");
        assert_eq!(
            paths.audit_events_file("2026-07-26"),
            PathBuf::from("/tmp/darkauth-data/audit/2026-07-26.jsonl")
        );
    }
}
