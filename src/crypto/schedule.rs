// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Reference implementation of the **client-side** key schedule.
//!
//! The server never calls this module from a request handler — the whole
//! point of zero-knowledge delivery is that the DRK and the keys derived
//! from it exist only in the browser. This module exists so that:
//!
//! 1. integration tests can play the client role end to end without a
//!    browser, and
//! 2. the exact byte-level contract (HKDF salts/info strings, AAD values,
//!    AEAD layout) the server's storage format must be compatible with is
//!    pinned down and tested in one place instead of scattered across
//!    handler comments.
//!
//! This schedule is bit-exact with the wire contract; changing any salt,
//! info string, or derivation order here breaks password recovery for
//! every existing user.
//!
//! ## Key schedule
//!
//! ```text
//! salt = SHA-256("DarkAuth|v1|tenant=default|user=<sub>")
//! export_key --HKDF(salt, info="mk")-------------> MK
//! MK  --HKDF(salt="DarkAuth|v1", info="wrap-key")-----> KW       (wraps the DRK)
//! MK  --HKDF(salt="DarkAuth|v1", info="data-derive")--> KDerive  (sharing-keypair derivation)
//! DRK --HKDF(salt="DarkAuth|user-keys", info="private-key-wrap")--> wraps the enc private JWK
//! ```
//!
//! `DRK` itself is 32 random bytes generated once at registration and
//! never derived from the password, so rotating the password does not
//! require re-encrypting data — only rewrapping `wrapped_drk` under the
//! new password's `KW`.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::aead;
use super::error::CryptoResult;

const DEFAULT_TENANT: &str = "default";
const MK_INFO: &[u8] = b"mk";
const SCHEDULE_SALT: &[u8] = b"DarkAuth|v1";
const KW_INFO: &[u8] = b"wrap-key";
const KDERIVE_INFO: &[u8] = b"data-derive";
const PRIVATE_KEY_SALT: &[u8] = b"DarkAuth|user-keys";
const PRIVATE_KEY_INFO: &[u8] = b"private-key-wrap";
const PRIVATE_JWK_AAD: &[u8] = b"user-private-key";

fn hkdf_expand(ikm: &[u8], salt: &[u8], info: &[u8]) -> CryptoResult<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut out = [0u8; 32];
    hk.expand(info, &mut out)
        .map_err(|e| super::CryptoError::KeyDerivation(e.to_string()))?;
    Ok(out)
}

/// Per-user HKDF salt: `SHA-256("DarkAuth|v1|tenant=<tenant>|user=<sub>")`.
fn mk_salt(sub: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(format!("DarkAuth|v1|tenant={DEFAULT_TENANT}|user={sub}").as_bytes());
    hasher.finalize().into()
}

/// Derive the master key from an OPAQUE `export_key`, bound to `sub`.
pub fn derive_mk(export_key: &[u8], sub: &str) -> CryptoResult<Zeroizing<[u8; 32]>> {
    let salt = mk_salt(sub);
    Ok(Zeroizing::new(hkdf_expand(export_key, &salt, MK_INFO)?))
}

/// Derive the DRK-wrap key from MK.
pub fn derive_kw(mk: &[u8]) -> CryptoResult<Zeroizing<[u8; 32]>> {
    Ok(Zeroizing::new(hkdf_expand(mk, SCHEDULE_SALT, KW_INFO)?))
}

/// Derive the data-derive key (sharing-keypair derivation) from MK.
pub fn derive_kderive(mk: &[u8]) -> CryptoResult<Zeroizing<[u8; 32]>> {
    Ok(Zeroizing::new(hkdf_expand(mk, SCHEDULE_SALT, KDERIVE_INFO)?))
}

/// Derive the private-JWK wrap key directly from the DRK, independent of
/// MK/KDerive, so possession of the wrapped enc keypair plus the DRK is
/// enough to recover it even if the password schedule ever changes shape.
pub fn derive_private_jwk_key(drk: &[u8; 32]) -> CryptoResult<Zeroizing<[u8; 32]>> {
    Ok(Zeroizing::new(hkdf_expand(drk, PRIVATE_KEY_SALT, PRIVATE_KEY_INFO)?))
}

/// Generate a fresh 256-bit Data Root Key.
pub fn generate_drk() -> Zeroizing<[u8; 32]> {
    let mut drk = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut drk);
    Zeroizing::new(drk)
}

/// Wrap the DRK under `KW`, AAD-bound to the owning subject id.
pub fn wrap_drk(kw: &[u8; 32], sub: &str, drk: &[u8; 32]) -> CryptoResult<Vec<u8>> {
    aead::encrypt(kw, sub.as_bytes(), drk)
}

/// Unwrap a DRK blob produced by [`wrap_drk`].
pub fn unwrap_drk(kw: &[u8; 32], sub: &str, wrapped: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
    aead::decrypt(kw, sub.as_bytes(), wrapped)
}

/// Wrap the private half of the per-user sharing keypair under the
/// DRK-derived private-key-wrap key.
pub fn wrap_enc_private_jwk(priv_key: &[u8; 32], private_jwk: &[u8]) -> CryptoResult<Vec<u8>> {
    aead::encrypt(priv_key, PRIVATE_JWK_AAD, private_jwk)
}

/// Unwrap a blob produced by [`wrap_enc_private_jwk`].
pub fn unwrap_enc_private_jwk(
    priv_key: &[u8; 32],
    wrapped: &[u8],
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    aead::decrypt(priv_key, PRIVATE_JWK_AAD, wrapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_schedule_round_trips() {
        let export_key = b"opaque-export-key-bytes-from-login-finish";
        let mk = derive_mk(export_key, "sub-42").unwrap();
        let kw = derive_kw(&*mk).unwrap();

        let drk = generate_drk();
        let wrapped_drk = wrap_drk(&kw, "sub-42", &drk).unwrap();
        let recovered_drk = unwrap_drk(&kw, "sub-42", &wrapped_drk).unwrap();
        assert_eq!(&recovered_drk[..], &drk[..]);

        let priv_key = derive_private_jwk_key(&drk).unwrap();
        let private_jwk = br#"{"kty":"OKP","crv":"X25519","d":"..."}"#;
        let wrapped_jwk = wrap_enc_private_jwk(&priv_key, private_jwk).unwrap();
        let recovered_jwk = unwrap_enc_private_jwk(&priv_key, &wrapped_jwk).unwrap();
        assert_eq!(&recovered_jwk[..], private_jwk);
    }

    #[test]
    fn drk_wrapped_under_wrong_subject_fails() {
        let mk = derive_mk(b"export-key", "alice").unwrap();
        let kw = derive_kw(&*mk).unwrap();
        let drk = generate_drk();
        let wrapped = wrap_drk(&kw, "alice", &drk).unwrap();
        assert!(unwrap_drk(&kw, "bob", &wrapped).is_err());
    }

    #[test]
    fn different_export_keys_derive_different_schedules() {
        let mk_a = derive_mk(b"export-key-a", "sub").unwrap();
        let mk_b = derive_mk(b"export-key-b", "sub").unwrap();
        assert_ne!(&*mk_a, &*mk_b);
    }

    #[test]
    fn different_subjects_derive_different_mk_from_same_export_key() {
        let mk_alice = derive_mk(b"export-key", "alice").unwrap();
        let mk_bob = derive_mk(b"export-key", "bob").unwrap();
        assert_ne!(&*mk_alice, &*mk_bob);
    }

    #[test]
    fn mk_salt_matches_the_pinned_wire_format() {
        let mut hasher = Sha256::new();
        hasher.update(b"DarkAuth|v1|tenant=default|user=sub-1");
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(mk_salt("sub-1"), expected);
    }

    #[test]
    fn recovery_rewrap_produces_byte_identical_drk() {
        // Simulates §8 scenario 6: old password's export_key unwraps the
        // DRK, new password's export_key rewraps it, and a subsequent
        // login with the new password must recover the identical bytes.
        let drk = generate_drk();

        let mk_old = derive_mk(b"old-export-key", "sub-1").unwrap();
        let kw_old = derive_kw(&*mk_old).unwrap();
        let wrapped_old = wrap_drk(&kw_old, "sub-1", &drk).unwrap();

        let recovered = unwrap_drk(&kw_old, "sub-1", &wrapped_old).unwrap();
        let mut recovered_drk = [0u8; 32];
        recovered_drk.copy_from_slice(&recovered);

        let mk_new = derive_mk(b"new-export-key", "sub-1").unwrap();
        let kw_new = derive_kw(&*mk_new).unwrap();
        let wrapped_new = wrap_drk(&kw_new, "sub-1", &recovered_drk).unwrap();

        let final_drk = unwrap_drk(&kw_new, "sub-1", &wrapped_new).unwrap();
        assert_eq!(&final_drk[..], &drk[..]);
    }
}
