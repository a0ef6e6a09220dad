// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # OPAQUE PAKE Engine
//!
//! Wraps the [`opaque-ke`](https://docs.rs/opaque-ke) crate — the
//! reference Rust implementation of the OPAQUE asymmetric
//! password-authenticated key exchange — behind the two multi-step
//! protocols the core exposes: registration and login. Both are modeled
//! as short-lived server-side state machines so the server never needs to
//! see a plaintext password or derive a long-term key from one.
//!
//! ## Module layout
//! - [`engine`] — the OPAQUE ciphersuite selection and the four protocol
//!   steps (`register_start`, `register_finish`, `login_start`,
//!   `login_finish`)
//! - [`store`] — TTL'd, single-use maps for in-flight registration and
//!   login state

pub mod engine;
pub mod records;
pub mod store;

#[derive(Debug, thiserror::Error)]
pub enum OpaqueError {
    #[error("opaque protocol error: {0}")]
    ProtocolError(String),

    #[error("opaque session expired")]
    SessionExpired,

    #[error("opaque session not found")]
    SessionNotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type OpaqueResult<T> = Result<T, OpaqueError>;

pub use engine::OpaqueEngine;
pub use records::OpaqueRecordStore;
pub use store::{OpaqueSessionStore, PendingLogin, PendingRegistration};
