// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RFC 6238 TOTP enroll/verify and backup-code issuance, via `totp-rs`.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::crypto::kek::Kek;
use crate::storage::db::Db;

use super::store::{BackupCode, OtpConfig};
use super::{OtpError, OtpResult};

const SECRET_BYTES: usize = 20;
const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECONDS: u64 = 30;
const TOTP_SKEW: u8 = 1;
const BACKUP_CODE_COUNT: usize = 10;
const FAILURE_LOCKOUT_THRESHOLD: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const SECRET_AAD: &[u8] = b"otp-secret";

pub struct OtpSetupInit {
    pub secret_base32: String,
    pub provisioning_uri: String,
}

/// The plaintext backup codes, returned to the caller exactly once at
/// generation time. Never stored in this form.
pub struct BackupCodesIssued {
    pub codes: Vec<String>,
}

pub struct OtpEngine {
    db: Arc<Db>,
    kek: Arc<Kek>,
    issuer: String,
}

impl OtpEngine {
    pub fn new(db: Arc<Db>, kek: Arc<Kek>, issuer: String) -> Self {
        Self { db, kek, issuer }
    }

    fn build_totp(&self, sub: &str, secret: &[u8]) -> OtpResult<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP_SECONDS,
            secret.to_vec(),
            Some(self.issuer.clone()),
            sub.to_string(),
        )
        .map_err(|e| OtpError::Crypto(crate::crypto::CryptoError::InvalidKey(e.to_string())))
    }

    pub fn setup_init(&self, sub: &str) -> OtpResult<OtpSetupInit> {
        let mut secret = vec![0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut secret);

        let totp = self.build_totp(sub, &secret)?;
        let secret_base32 = Secret::Raw(secret.clone()).to_encoded().to_string();
        let provisioning_uri = totp.get_url();

        let secret_enc = self.kek.wrap(SECRET_AAD, &secret)?;
        let config = OtpConfig {
            sub: sub.to_string(),
            secret_enc,
            verified: false,
            disabled: false,
            failure_count: 0,
            locked_until: None,
            last_used_at: None,
            backup_codes: Vec::new(),
        };
        super::store::save(&self.db, &config)?;

        Ok(OtpSetupInit {
            secret_base32,
            provisioning_uri,
        })
    }

    pub fn setup_verify(&self, sub: &str, code: &str) -> OtpResult<BackupCodesIssued> {
        let mut config = super::store::load(&self.db, sub)?.ok_or(OtpError::NotSetUp)?;
        if config.verified {
            return Err(OtpError::AlreadyVerified);
        }

        let secret = self.kek.unwrap(SECRET_AAD, &config.secret_enc)?;
        let totp = self.build_totp(sub, &secret)?;
        if !totp.check_current(code).unwrap_or(false) {
            return Err(OtpError::Mismatch);
        }

        config.verified = true;
        config.last_used_at = Some(Utc::now());
        let codes = generate_backup_codes();
        config.backup_codes = codes
            .iter()
            .map(|c| BackupCode {
                hash: hash_backup_code(c),
                used: false,
            })
            .collect();
        super::store::save(&self.db, &config)?;

        Ok(BackupCodesIssued { codes })
    }

    /// Verify a 6-digit TOTP or a dash-formatted backup code. Returns
    /// `Ok(())` on success; on mismatch, increments the failure counter and
    /// locks the config for [`LOCKOUT_MINUTES`] once the threshold is hit.
    pub fn verify(&self, sub: &str, code: &str) -> OtpResult<()> {
        let mut config = super::store::load(&self.db, sub)?.ok_or(OtpError::NotSetUp)?;

        if let Some(locked_until) = config.locked_until {
            if locked_until > Utc::now() {
                return Err(OtpError::Locked);
            }
            config.locked_until = None;
            config.failure_count = 0;
        }

        let matched = if code.contains('-') {
            self.consume_backup_code(&mut config, code)
        } else {
            let secret = self.kek.unwrap(SECRET_AAD, &config.secret_enc)?;
            let totp = self.build_totp(sub, &secret)?;
            totp.check_current(code).unwrap_or(false)
        };

        if matched {
            config.failure_count = 0;
            config.last_used_at = Some(Utc::now());
            super::store::save(&self.db, &config)?;
            Ok(())
        } else {
            config.failure_count += 1;
            if config.failure_count >= FAILURE_LOCKOUT_THRESHOLD {
                config.locked_until = Some(Utc::now() + Duration::minutes(LOCKOUT_MINUTES));
            }
            super::store::save(&self.db, &config)?;
            Err(OtpError::Mismatch)
        }
    }

    fn consume_backup_code(&self, config: &mut OtpConfig, raw: &str) -> bool {
        let hash = hash_backup_code(raw);
        if let Some(entry) = config.backup_codes.iter_mut().find(|c| c.hash == hash) {
            if entry.used {
                // Idempotent across retries: a replayed redemption of an
                // already-used code is neither a success nor a fresh
                // failure against the counter.
                return false;
            }
            entry.used = true;
            return true;
        }
        false
    }

    pub fn regenerate_backup_codes(&self, sub: &str) -> OtpResult<BackupCodesIssued> {
        let mut config = super::store::load(&self.db, sub)?.ok_or(OtpError::NotSetUp)?;
        let codes = generate_backup_codes();
        config.backup_codes = codes
            .iter()
            .map(|c| BackupCode {
                hash: hash_backup_code(c),
                used: false,
            })
            .collect();
        super::store::save(&self.db, &config)?;
        Ok(BackupCodesIssued { codes })
    }

    pub fn disable(&self, sub: &str) -> OtpResult<()> {
        let mut config = super::store::load(&self.db, sub)?.ok_or(OtpError::NotSetUp)?;
        config.disabled = true;
        super::store::save(&self.db, &config)
    }

    /// Admin unlock: clears the failure counter and lockout regardless of
    /// the configured threshold.
    pub fn admin_unlock(&self, sub: &str) -> OtpResult<()> {
        let mut config = super::store::load(&self.db, sub)?.ok_or(OtpError::NotSetUp)?;
        config.failure_count = 0;
        config.locked_until = None;
        super::store::save(&self.db, &config)
    }

    pub fn status(&self, sub: &str) -> OtpResult<Option<OtpConfig>> {
        super::store::load(&self.db, sub)
    }
}

fn generate_backup_codes() -> Vec<String> {
    (0..BACKUP_CODE_COUNT).map(|_| generate_backup_code()).collect()
}

fn generate_backup_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut rng = rand::thread_rng();
    let mut raw = [0u8; 12];
    for slot in raw.iter_mut() {
        *slot = ALPHABET[(rng.next_u32() as usize) % ALPHABET.len()];
    }
    let raw = std::str::from_utf8(&raw).unwrap();
    format!("{}-{}-{}", &raw[0..4], &raw[4..8], &raw[8..12])
}

fn hash_backup_code(code: &str) -> String {
    let normalized = code.to_ascii_uppercase();
    let digest = Sha256::digest(normalized.as_bytes());
    base64ct::Base64UrlUnpadded::encode_string(&digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kek::Kek;

    fn test_engine() -> (OtpEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&dir.path().join("otp_test.redb")).unwrap());
        let kek = Arc::new(Kek::for_tests());
        (OtpEngine::new(db, kek, "DarkAuth".into()), dir)
    }

    #[test]
    fn setup_verify_issues_ten_backup_codes() {
        let (engine, _dir) = test_engine();
        let init = engine.setup_init("sub-1").unwrap();
        let totp = engine.build_totp("sub-1", &Secret::Encoded(init.secret_base32).to_bytes().unwrap()).unwrap();
        let code = totp.generate_current().unwrap();
        let issued = engine.setup_verify("sub-1", &code).unwrap();
        assert_eq!(issued.codes.len(), BACKUP_CODE_COUNT);
    }

    #[test]
    fn backup_code_is_single_use() {
        let (engine, _dir) = test_engine();
        let init = engine.setup_init("sub-1").unwrap();
        let totp = engine.build_totp("sub-1", &Secret::Encoded(init.secret_base32).to_bytes().unwrap()).unwrap();
        let code = totp.generate_current().unwrap();
        let issued = engine.setup_verify("sub-1", &code).unwrap();
        let backup = &issued.codes[0];

        assert!(engine.verify("sub-1", backup).is_ok());
        assert!(engine.verify("sub-1", backup).is_err());
    }

    #[test]
    fn five_failures_lock_the_account() {
        let (engine, _dir) = test_engine();
        engine.setup_init("sub-1").unwrap();
        // setup_verify never ran, so this config is still `Pending`; verify
        // still runs the lockout counter against it.
        for _ in 0..5 {
            let _ = engine.verify("sub-1", "000000");
        }
        assert!(matches!(engine.verify("sub-1", "000000"), Err(OtpError::Locked)));
    }
}
