// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cryptographic Primitives
//!
//! Design principles, carried over from the wider crypto idiom this crate
//! follows:
//! - No custom crypto; every primitive comes from an audited crate
//!   (`aes-gcm`, `hkdf`, `sha2`, `ed25519-dalek`, `opaque-ke`).
//! - Secret material is zeroized on drop and never `Clone`.
//! - Public APIs return opaque newtypes to prevent accidental misuse.
//!
//! ## Module layout
//! - [`kek`] — process-scoped key-encryption key, wraps every at-rest secret
//! - [`aead`] — AES-256-GCM helpers with the exact `iv(12)||tag(16)||ct` layout
//! - [`schedule`] — reference implementation of the client-side key schedule,
//!   used only by tests; the server never runs this code against a real
//!   password.
//! - [`drk`] — server-opaque storage for the client-produced DRK artifacts
//! - [`error`] — unified crypto error type

pub mod aead;
pub mod drk;
pub mod error;
pub mod kek;
pub mod schedule;

pub use error::CryptoError;
pub use drk::{DrkRecord, DrkStore, RecipientWrap, reencrypt_for_recipients};
