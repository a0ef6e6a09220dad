// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Shared Data Model
//!
//! Types that cross module boundaries: OAuth scopes, session payloads, and
//! the small number of request/response DTOs not owned by a single feature
//! module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// =============================================================================
// Scope
// =============================================================================

/// A requested or registered OAuth scope entry.
///
/// Client registrations may list scopes either as bare strings or as
/// `{ key, description }` objects. Both forms are accepted on the wire;
/// internally every scope is normalized to its `key`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(untagged)]
pub enum Scope {
    Simple(String),
    Described {
        key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Key(String),
            Described {
                key: String,
                #[serde(default)]
                description: Option<String>,
            },
        }
        match Raw::deserialize(deserializer)? {
            Raw::Key(key) => Ok(Scope::Simple(key)),
            Raw::Described { key, description } => Ok(Scope::Described { key, description }),
        }
    }
}

impl Scope {
    pub fn key(&self) -> &str {
        match self {
            Scope::Simple(key) => key,
            Scope::Described { key, .. } => key,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Scope::Simple(_) => None,
            Scope::Described { description, .. } => description.as_deref(),
        }
    }

    /// Deduplicate a scope list by key (first occurrence wins) and trim
    /// empty descriptions to `None`.
    pub fn normalize_list(scopes: Vec<Scope>) -> Vec<Scope> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(scopes.len());
        for scope in scopes {
            let scope = match scope {
                Scope::Described { key, description } => {
                    let description = description.filter(|d| !d.trim().is_empty());
                    Scope::Described { key, description }
                }
                other => other,
            };
            if seen.insert(scope.key().to_string()) {
                out.push(scope);
            }
        }
        out
    }
}

// =============================================================================
// Session data
// =============================================================================

/// Single-use, session-bound reauthentication token issued after a
/// step-up OTP challenge. Consumed by password-change and similarly
/// sensitive operations.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReauthToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// The tagged payload carried by every session row. Unknown fields found
/// on deserialize are dropped with a warning rather than failing the read,
/// so older sessions degrade gracefully across a rolling deploy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_role: Option<String>,
    #[serde(default)]
    pub otp_required: bool,
    #[serde(default)]
    pub otp_verified: bool,
    #[serde(default)]
    pub password_reset_required: bool,
    #[serde(default)]
    pub reauth_tokens: Vec<ReauthToken>,
}

// =============================================================================
// Shared error/response shapes
// =============================================================================

/// OIDC discovery document served at `/.well-known/openid-configuration`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OidcDiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub scopes_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_accepts_bare_string_and_object() {
        let from_str: Scope = serde_json::from_str("\"profile\"").unwrap();
        assert_eq!(from_str.key(), "profile");
        assert_eq!(from_str.description(), None);

        let from_obj: Scope =
            serde_json::from_str(r#"{"key":"email","description":"Email address"}"#).unwrap();
        assert_eq!(from_obj.key(), "email");
        assert_eq!(from_obj.description(), Some("Email address"));
    }

    #[test]
    fn normalize_list_dedupes_by_key_first_wins() {
        let scopes = vec![
            Scope::Described {
                key: "profile".into(),
                description: Some("first".into()),
            },
            Scope::Simple("profile".into()),
            Scope::Described {
                key: "email".into(),
                description: Some("   ".into()),
            },
        ];
        let normalized = Scope::normalize_list(scopes);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].description(), Some("first"));
        assert_eq!(normalized[1].description(), None);
    }
}
