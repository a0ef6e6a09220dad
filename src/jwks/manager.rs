// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing-key lifecycle: generate-or-load at boot, rotate on admin
//! request, serve the public set, sign outgoing JWTs with the newest
//! non-rotated key.

use std::sync::Arc;

use base64ct::Encoding;
use chrono::{DateTime, Utc};
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::crypto::kek::Kek;
use crate::storage::db::{Db, JWKS};

use super::{JwksError, JwksResult};

const KEY_AAD: &[u8] = b"signing-key-private";
const MAX_TOKEN_LIFETIME_SECONDS: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkEntry {
    pub kid: String,
    pub public_jwk: Value,
    pub private_key_enc: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
}

fn all_keys(db: &Db) -> JwksResult<Vec<JwkEntry>> {
    let rows: Vec<(String, JwkEntry)> = db.list(JWKS)?;
    Ok(rows.into_iter().map(|(_, v)| v).collect())
}

fn generate_keypair() -> (SigningKey, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let kid = uuid::Uuid::new_v4().to_string();
    (signing_key, kid)
}

fn public_jwk(kid: &str, signing_key: &SigningKey) -> Value {
    let verifying_key = signing_key.verifying_key();
    json!({
        "kty": "OKP",
        "crv": "Ed25519",
        "x": base64ct::Base64UrlUnpadded::encode_string(verifying_key.as_bytes()),
        "kid": kid,
        "use": "sig",
        "alg": "EdDSA",
    })
}

/// Owns the server's signing keys. Held once in `AppState` behind an
/// `Arc`, all methods take `&self` and go straight to redb — key rotation
/// is rare enough that no in-process cache is worth the staleness risk.
pub struct SigningJwks {
    db: Arc<Db>,
    kek: Arc<Kek>,
}

impl SigningJwks {
    pub fn new(db: Arc<Db>, kek: Arc<Kek>) -> Self {
        Self { db, kek }
    }

    /// Ensure at least one active (non-rotated) signing key exists,
    /// generating one if this is a first boot. Idempotent.
    pub fn ensure_key(&self) -> JwksResult<()> {
        let keys = all_keys(&self.db)?;
        if keys.iter().any(|k| k.rotated_at.is_none()) {
            return Ok(());
        }
        self.generate_and_store()?;
        Ok(())
    }

    fn generate_and_store(&self) -> JwksResult<JwkEntry> {
        let (signing_key, kid) = generate_keypair();
        let public_jwk = public_jwk(&kid, &signing_key);
        let pkcs8_der = signing_key
            .to_pkcs8_der()
            .map_err(|e| JwksError::KeyGeneration(e.to_string()))?;
        let private_key_enc = self.kek.wrap(KEY_AAD, pkcs8_der.as_bytes())?;

        let entry = JwkEntry {
            kid: kid.clone(),
            public_jwk,
            private_key_enc,
            created_at: Utc::now(),
            rotated_at: None,
        };
        self.db.put(JWKS, &kid, &entry)?;
        Ok(entry)
    }

    /// Generate a new key and leave the previous active key available for
    /// verification only, stamping its `rotated_at`.
    pub fn rotate_keys(&self) -> JwksResult<JwkEntry> {
        let keys = all_keys(&self.db)?;
        let now = Utc::now();
        for mut key in keys.into_iter().filter(|k| k.rotated_at.is_none()) {
            key.rotated_at = Some(now);
            self.db.put(JWKS, &key.kid.clone(), &key)?;
        }
        self.generate_and_store()
    }

    fn active_signing_key(&self) -> JwksResult<JwkEntry> {
        let keys = all_keys(&self.db)?;
        keys.into_iter()
            .filter(|k| k.rotated_at.is_none())
            .max_by_key(|k| k.created_at)
            .ok_or(JwksError::NoActiveKey)
    }

    /// The public JWKS document: every key whose `rotated_at` is either
    /// null or within `MAX_TOKEN_LIFETIME_SECONDS` of now, matching the
    /// verification window a relying party needs to accept tokens signed
    /// just before a rotation.
    pub fn public_jwks(&self) -> JwksResult<Value> {
        let now = Utc::now();
        let keys = all_keys(&self.db)?;
        let live: Vec<Value> = keys
            .into_iter()
            .filter(|k| match k.rotated_at {
                None => true,
                Some(rotated_at) => {
                    now.signed_duration_since(rotated_at).num_seconds() < MAX_TOKEN_LIFETIME_SECONDS
                }
            })
            .map(|k| k.public_jwk)
            .collect();
        Ok(json!({ "keys": live }))
    }

    /// Sign `claims` with the active key, returning a compact JWT.
    pub fn sign<T: Serialize>(&self, claims: &T) -> JwksResult<String> {
        let entry = self.active_signing_key()?;
        let pkcs8_der = self.kek.unwrap(KEY_AAD, &entry.private_key_enc)?;
        let encoding_key = EncodingKey::from_ed_der(&pkcs8_der);

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(entry.kid.clone());
        encode(&header, claims, &encoding_key).map_err(|e| JwksError::Signing(e.to_string()))
    }

    /// Decode and verify an incoming token's claims against every key in
    /// the verification-valid set, trying each `kid` until one succeeds.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> JwksResult<T> {
        use jsonwebtoken::{decode, DecodingKey, Validation};

        let keys = all_keys(&self.db)?;
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_exp = true;

        for entry in &keys {
            let x = match entry.public_jwk.get("x").and_then(Value::as_str) {
                Some(x) => x,
                None => continue,
            };
            let raw = match base64ct::Base64UrlUnpadded::decode_vec(x) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let decoding_key = DecodingKey::from_ed_der(&raw);
            if let Ok(data) = decode::<T>(token, &decoding_key, &validation) {
                return Ok(data.claims);
            }
        }
        Err(JwksError::Signing("no signing key verified this token".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn test_jwks() -> (SigningJwks, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&dir.path().join("jwks_test.redb")).unwrap());
        let kek = Arc::new(Kek::for_tests());
        (SigningJwks::new(db, kek), dir)
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Claims {
        sub: String,
        exp: usize,
    }

    #[test]
    fn ensure_key_is_idempotent() {
        let (jwks, _dir) = test_jwks();
        jwks.ensure_key().unwrap();
        let first = jwks.public_jwks().unwrap();
        jwks.ensure_key().unwrap();
        let second = jwks.public_jwks().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rotate_keeps_previous_key_for_verification() {
        let (jwks, _dir) = test_jwks();
        jwks.ensure_key().unwrap();
        let before = jwks.public_jwks().unwrap();
        jwks.rotate_keys().unwrap();
        let after = jwks.public_jwks().unwrap();
        assert_eq!(
            after["keys"].as_array().unwrap().len(),
            before["keys"].as_array().unwrap().len() + 1
        );
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let (jwks, _dir) = test_jwks();
        jwks.ensure_key().unwrap();
        let claims = Claims {
            sub: "sub-1".into(),
            exp: (Utc::now().timestamp() + 3600) as usize,
        };
        let token = jwks.sign(&claims).unwrap();
        let verified: Claims = jwks.verify(&token).unwrap();
        assert_eq!(verified, claims);
    }
}
