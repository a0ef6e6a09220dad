// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Client registry
//!
//! OAuth client registrations: redirect URIs, allowed scopes, PKCE
//! requirements, and (for confidential clients) a KeK-wrapped secret. The
//! admin API is the only writer; the user-facing authorize flow reads
//! through this to validate `client_id`/`redirect_uri` pairs.

pub mod registry;

pub use registry::{ClientInput, ClientRegistry, ClientType, StoredClient};
