// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # OTP Engine
//!
//! TOTP second factor (RFC 6238, via the `totp-rs` crate) plus single-use
//! backup codes. Secrets are AEAD-wrapped under the process KeK before
//! they ever touch the redb row; the plaintext secret and plaintext backup
//! codes exist only for the duration of the enroll/verify call that
//! generates them.

pub mod engine;
pub mod store;

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("otp is not set up for this user")]
    NotSetUp,

    #[error("otp is already verified")]
    AlreadyVerified,

    #[error("otp code did not match")]
    Mismatch,

    #[error("otp is locked until the lockout window elapses")]
    Locked,

    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error(transparent)]
    Db(#[from] crate::storage::db::DbError),
}

pub type OtpResult<T> = Result<T, OtpError>;

pub use engine::{BackupCodesIssued, OtpEngine};
pub use store::{OtpConfig, OtpStatus};
