// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names and the typed [`Config`] assembled from them
//! at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATABASE_URL` | Path to the embedded redb database file | `./data/darkauth.redb` |
//! | `DATA_DIR` | Root directory for JSON-repository storage (clients, audit log) | `./data` |
//! | `USER_PORT` | Bind port for the user-facing API | `8080` |
//! | `ADMIN_PORT` | Bind port for the admin API | `8081` |
//! | `HOST` | Bind address for both listeners | `0.0.0.0` |
//! | `KEK_PASSPHRASE` | Passphrase used to derive the process KeK | Required |
//! | `IS_DEVELOPMENT` | Relax `Secure` cookies and CORS for local dev | `false` |
//! | `PUBLIC_ORIGIN` | Externally visible origin of the user API | `http://localhost:8080` |
//! | `ISSUER` | OIDC `iss` claim value | `PUBLIC_ORIGIN` |
//! | `RP_ID` | WebAuthn-style relying party id (host only) | derived from `ISSUER` |
//! | `SELF_REGISTRATION_ENABLED` | Allow `/opaque/register/*` without an invite | `true` |
//! | `EMAIL_VERIFICATION_REQUIRED` | Require verified email before login | `false` |
//! | `CORS_ALLOWED_ORIGINS` | Comma-separated ZK-delivery origins allowed to read the fragment | none |
//! | `RATE_LIMIT_CAPACITY` | Token-bucket capacity for login/OTP/password endpoints | `5` |
//! | `RATE_LIMIT_REFILL_SECONDS` | Seconds to refill one token | `30` |
//! | `ADMIN_EMAILS` | Comma-separated emails allowed to authenticate against the admin API | none |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::env;

pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const USER_PORT_ENV: &str = "USER_PORT";
pub const ADMIN_PORT_ENV: &str = "ADMIN_PORT";
pub const HOST_ENV: &str = "HOST";
pub const KEK_PASSPHRASE_ENV: &str = "KEK_PASSPHRASE";
pub const IS_DEVELOPMENT_ENV: &str = "IS_DEVELOPMENT";
pub const PUBLIC_ORIGIN_ENV: &str = "PUBLIC_ORIGIN";
pub const ISSUER_ENV: &str = "ISSUER";
pub const RP_ID_ENV: &str = "RP_ID";
pub const SELF_REGISTRATION_ENABLED_ENV: &str = "SELF_REGISTRATION_ENABLED";
pub const EMAIL_VERIFICATION_REQUIRED_ENV: &str = "EMAIL_VERIFICATION_REQUIRED";
pub const CORS_ALLOWED_ORIGINS_ENV: &str = "CORS_ALLOWED_ORIGINS";
pub const RATE_LIMIT_CAPACITY_ENV: &str = "RATE_LIMIT_CAPACITY";
pub const RATE_LIMIT_REFILL_SECONDS_ENV: &str = "RATE_LIMIT_REFILL_SECONDS";
pub const ADMIN_EMAILS_ENV: &str = "ADMIN_EMAILS";

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Typed runtime configuration, assembled once at boot from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub data_dir: String,
    pub host: String,
    pub user_port: u16,
    pub admin_port: u16,
    pub is_development: bool,
    pub public_origin: String,
    pub issuer: String,
    pub rp_id: String,
    pub self_registration_enabled: bool,
    pub email_verification_required: bool,
    pub cors_allowed_origins: Vec<String>,
    pub rate_limit_capacity: u32,
    pub rate_limit_refill_seconds: u64,
    pub admin_emails: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let public_origin =
            env::var(PUBLIC_ORIGIN_ENV).unwrap_or_else(|_| "http://localhost:8080".to_string());
        let issuer = env::var(ISSUER_ENV).unwrap_or_else(|_| public_origin.clone());
        let rp_id = env::var(RP_ID_ENV).unwrap_or_else(|_| {
            url::Url::parse(&issuer)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_string()))
                .unwrap_or_else(|| "localhost".to_string())
        });
        let is_development = env::var(IS_DEVELOPMENT_ENV)
            .map(|v| parse_bool(&v, false))
            .unwrap_or(false);

        Self {
            database_url: env::var(DATABASE_URL_ENV)
                .unwrap_or_else(|_| "./data/darkauth.redb".to_string()),
            data_dir: env::var(DATA_DIR_ENV).unwrap_or_else(|_| "./data".to_string()),
            host: env::var(HOST_ENV).unwrap_or_else(|_| "0.0.0.0".to_string()),
            user_port: env::var(USER_PORT_ENV)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            admin_port: env::var(ADMIN_PORT_ENV)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8081),
            is_development,
            public_origin,
            issuer,
            rp_id,
            self_registration_enabled: env::var(SELF_REGISTRATION_ENABLED_ENV)
                .map(|v| parse_bool(&v, true))
                .unwrap_or(true),
            email_verification_required: env::var(EMAIL_VERIFICATION_REQUIRED_ENV)
                .map(|v| parse_bool(&v, false))
                .unwrap_or(false),
            cors_allowed_origins: env::var(CORS_ALLOWED_ORIGINS_ENV)
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            rate_limit_capacity: env::var(RATE_LIMIT_CAPACITY_ENV)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            rate_limit_refill_seconds: env::var(RATE_LIMIT_REFILL_SECONDS_ENV)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            admin_emails: env::var(ADMIN_EMAILS_ENV)
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_ascii_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            data_dir: "/tmp/darkauth-test-data".to_string(),
            host: "127.0.0.1".to_string(),
            user_port: 0,
            admin_port: 0,
            is_development: true,
            public_origin: "http://localhost:8080".to_string(),
            issuer: "http://localhost:8080".to_string(),
            rp_id: "localhost".to_string(),
            self_registration_enabled: true,
            email_verification_required: false,
            cors_allowed_origins: Vec::new(),
            rate_limit_capacity: 5,
            rate_limit_refill_seconds: 30,
            admin_emails: vec!["admin@example.com".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_recognizes_truthy_and_falsy() {
        assert!(parse_bool("true", false));
        assert!(parse_bool("1", false));
        assert!(!parse_bool("false", true));
        assert!(!parse_bool("0", true));
        assert!(parse_bool("garbage", true));
    }
}
