// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Signing JWKS
//!
//! The server's own token-signing keys, as opposed to a third party's keys
//! fetched and cached for verification. EdDSA (Ed25519) is the only
//! algorithm generated: key generation from the system RNG has no failure
//! mode worth a fallback path, so there is no RSA branch here. Private
//! halves are wrapped under the KeK before they touch storage; the public
//! half is served unauthenticated at `/.well-known/jwks.json`.

pub mod manager;

#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    #[error("no active signing key")]
    NoActiveKey,

    #[error("signing key generation failed: {0}")]
    KeyGeneration(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error(transparent)]
    Db(#[from] crate::storage::db::DbError),
}

pub type JwksResult<T> = Result<T, JwksError>;

pub use manager::{JwkEntry, SigningJwks};
