// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Redb-backed `OtpConfig` rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::db::{Db, OTP_CONFIGS};

use super::OtpResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OtpStatus {
    Unset,
    Pending,
    Enabled,
    Locked,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupCode {
    pub hash: String,
    pub used: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpConfig {
    pub sub: String,
    pub secret_enc: Vec<u8>,
    pub verified: bool,
    pub disabled: bool,
    pub failure_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub backup_codes: Vec<BackupCode>,
}

impl OtpConfig {
    pub fn status(&self) -> OtpStatus {
        if self.disabled {
            OtpStatus::Disabled
        } else if let Some(locked_until) = self.locked_until {
            if locked_until > Utc::now() {
                return OtpStatus::Locked;
            }
            OtpStatus::Enabled
        } else if self.verified {
            OtpStatus::Enabled
        } else {
            OtpStatus::Pending
        }
    }
}

pub(super) fn load(db: &Db, sub: &str) -> OtpResult<Option<OtpConfig>> {
    Ok(db.get(OTP_CONFIGS, sub)?)
}

pub(super) fn save(db: &Db, config: &OtpConfig) -> OtpResult<()> {
    db.put(OTP_CONFIGS, &config.sub, config)?;
    Ok(())
}
