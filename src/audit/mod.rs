// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations: registration, login,
//! password change, OTP lifecycle, client secret rotation, JWKS rotation,
//! and admin mutations. Events are appended to a daily JSONL file under
//! `audit/`, mirroring the JSON-repository storage used for clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::json_store::{JsonStore, StorageResult};

/// Types of auditable identity-provider events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    UserRegistered,
    LoginSuccess,
    LoginFailure,
    PasswordChanged,
    OtpEnrolled,
    OtpVerified,
    OtpDisabled,
    OtpLockout,
    ClientSecretRotated,
    JwksRotated,
    AuthorizeFinalized,
    AdminClientCreated,
    AdminClientUpdated,
    AdminClientDeleted,
    AdminOtpUnlock,
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub sub: Option<String>,
    pub client_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            sub: None,
            client_id: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_sub(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Append-only repository for audit events, one JSONL file per UTC day.
pub struct AuditLog<'a> {
    store: &'a JsonStore,
}

impl<'a> AuditLog<'a> {
    pub fn new(store: &'a JsonStore) -> Self {
        Self { store }
    }

    pub fn record(&self, event: &AuditEvent) -> StorageResult<()> {
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        let path = self.store.paths().audit_events_file(&date);
        let mut content = self.store.read_raw(&path).unwrap_or_default();
        let line = serde_json::to_string(event)?;
        if !content.is_empty() && !content.ends_with(b"\n") {
            content.push(b'\n');
        }
        content.extend_from_slice(line.as_bytes());
        content.push(b'\n');
        self.store.write_raw(&path, &content)
    }

    pub fn read_day(&self, date: &str) -> StorageResult<Vec<AuditEvent>> {
        let path = self.store.paths().audit_events_file(date);
        let content = self.store.read_raw(&path).unwrap_or_default();
        let text = String::from_utf8_lossy(&content);
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Into::into))
            .collect()
    }
}

/// Run a privileged operation, logging its outcome as both a `tracing`
/// event and an [`AuditEvent`] even when it fails, matching the handler
/// pattern named in the error-handling design: every mutation is wrapped
/// so failures are recorded, not just successes.
pub fn wrap<T, E>(
    store: &JsonStore,
    event_type: AuditEventType,
    sub: Option<&str>,
    result: Result<T, E>,
) -> Result<T, E>
where
    E: std::fmt::Display,
{
    let mut event = AuditEvent::new(event_type);
    if let Some(sub) = sub {
        event = event.with_sub(sub);
    }
    match &result {
        Ok(_) => {
            tracing::info!(?event_type, sub, "privileged operation succeeded");
        }
        Err(e) => {
            tracing::warn!(?event_type, sub, error = %e, "privileged operation failed");
            event = event.failed(e.to_string());
        }
    }
    if let Err(storage_err) = AuditLog::new(store).record(&event) {
        tracing::warn!(error = %storage_err, "failed to persist audit event");
    }
    result
}

/// Record a security event directly, for call sites whose outcome isn't
/// naturally expressed as a `Result<T, E>` for [`wrap`] — login
/// success/failure diverge before any single fallible typed call, and
/// admin mutations often need to log after several independent calls.
pub fn record(
    store: &JsonStore,
    event_type: AuditEventType,
    sub: Option<&str>,
    client_id: Option<&str>,
    success: bool,
    error: Option<&str>,
) {
    let mut event = AuditEvent::new(event_type);
    if let Some(sub) = sub {
        event = event.with_sub(sub);
    }
    if let Some(client_id) = client_id {
        event = event.with_client(client_id);
    }
    if !success {
        event = event.failed(error.unwrap_or("unknown error"));
    }
    if let Err(e) = AuditLog::new(store).record(&event) {
        tracing::warn!(error = %e, "failed to persist audit event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::paths::StoragePaths;

    fn test_store() -> (JsonStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStore::new(StoragePaths::new(dir.path()));
        store.initialize().unwrap();
        std::fs::create_dir_all(store.paths().audit_dir()).unwrap();
        (store, dir)
    }

    #[test]
    fn record_and_read_round_trip() {
        let (store, _dir) = test_store();
        let log = AuditLog::new(&store);
        log.record(&AuditEvent::new(AuditEventType::LoginSuccess).with_sub("user-1")).unwrap();
        log.record(&AuditEvent::new(AuditEventType::LoginFailure).with_sub("user-2").failed("bad password")).unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let events = log.read_day(&today).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].success);
        assert!(!events[1].success);
        assert_eq!(events[1].error.as_deref(), Some("bad password"));
    }

    #[test]
    fn wrap_logs_failure_but_propagates_error() {
        let (store, _dir) = test_store();
        let result: Result<(), String> = wrap(&store, AuditEventType::OtpDisabled, Some("user-1"), Err("locked".to_string()));
        assert!(result.is_err());

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let events = AuditLog::new(&store).read_day(&today).unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
    }
}
