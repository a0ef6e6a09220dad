// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authorize State Machine
//!
//! The OIDC authorization-code flow's server-side record: one row per
//! `GET /authorize` call, walked through `pending -> finalized|denied`, and
//! then the issued `code` walked through `unused -> redeemed` exactly once.
//! Both transitions are single-row compare-and-set operations against the
//! same redb write transaction, so a second `finalize` or a replayed `code`
//! redemption always loses the race rather than silently succeeding twice.

pub mod store;

#[derive(Debug, thiserror::Error)]
pub enum AuthorizeError {
    #[error("authorize request not found")]
    NotFound,

    #[error("authorize request expired")]
    Expired,

    #[error("authorize request is not pending")]
    NotPending,

    #[error("authorization code already used or unknown")]
    CodeInvalid,

    #[error("authorization code expired")]
    CodeExpired,

    #[error("drk_hash/drk_jwe missing or drk_hash does not match SHA-256(drk_jwe)")]
    ZkPayloadInvalid,

    #[error(transparent)]
    Db(#[from] crate::storage::db::DbError),
}

pub type AuthorizeResult<T> = Result<T, AuthorizeError>;

pub use store::{AuthorizeRequest, AuthorizeStatus, AuthorizeStore, NewAuthorizeRequest};
