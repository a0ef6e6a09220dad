// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # DarkAuth — Zero-Knowledge OPAQUE Identity Provider
//!
//! An OAuth 2.0 / OIDC-shaped identity provider built around the OPAQUE
//! password-authenticated key exchange: the server never sees a
//! plaintext password, and a client-held data recovery key (DRK) lets a
//! relying party recover zero-knowledge-encrypted application data
//! without the server ever holding the key that protects it.
//!
//! ## Modules
//!
//! - [`api`] - HTTP API handlers built on Axum with OpenAPI documentation
//! - [`audit`] - Security-event audit log, one JSONL file per day
//! - [`authorize`] - Authorization-code flow state machine
//! - [`clients`] - OAuth client registry (JSON-repository)
//! - [`config`] - Runtime configuration, assembled once from the environment
//! - [`crypto`] - KeK, AEAD wrapping, DRK blob handling, client key schedule
//! - [`error`] - API error types with HTTP status mapping
//! - [`jwks`] - Server signing-key lifecycle and JWKS document
//! - [`models`] - Shared request/response data structures
//! - [`opaque`] - OPAQUE registration/login engine, session store, and
//!   KeK-wrapped record storage
//! - [`otp`] - TOTP second factor and backup codes
//! - [`rate_limit`] - in-process token-bucket rate limiting
//! - [`session`] - Cookie-backed session store (user/admin/refresh cohorts)
//! - [`state`] - Application state shared across handlers
//! - [`storage`] - `redb` tables plus the JSON-repository storage layer
//! - [`users`] - user records and the email -> `sub` lookup index
//!
//! ## Security model
//!
//! 1. **Password blindness**: the OPAQUE protocol means the server stores
//!    only an opaque registration envelope, never a password or anything
//!    from which it could be recovered.
//! 2. **Zero-knowledge recovery**: DRK artifacts are wrapped and unwrapped
//!    entirely client-side; the server stores and returns opaque bytes.
//! 3. **At-rest secrets wrapped under the KeK**: OPAQUE envelopes, OTP
//!    secrets, JWKS private halves, and OAuth client secrets are all
//!    AEAD-wrapped under a process-scoped key derived from
//!    `KEK_PASSPHRASE` at boot, never persisted in the clear.
//! 4. **Async-first**: Tokio throughout, `redb` for transactional,
//!    single-use-safe persistence.

pub mod api;
pub mod audit;
pub mod authorize;
pub mod clients;
pub mod config;
pub mod crypto;
pub mod error;
pub mod jwks;
pub mod models;
pub mod opaque;
pub mod otp;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod storage;
pub mod users;
