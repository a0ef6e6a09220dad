// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AES-256-GCM encrypt/decrypt helpers using the exact wire layout the core
//! contract pins: `iv(12 bytes) || tag(16 bytes) || ciphertext`.
//!
//! `aes-gcm` appends the tag to the end of its ciphertext output; this
//! module reorders bytes at the boundary so every wrapped blob on disk and
//! on the wire uses the pinned layout regardless of the underlying crate's
//! internal convention.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use super::error::{CryptoError, CryptoResult};

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypt `plaintext` under `key` with an authenticated `aad` tag,
/// returning `iv || tag || ciphertext`.
pub fn encrypt(key: &[u8; 32], aad: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ct_and_tag = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let split = ct_and_tag.len() - TAG_LEN;
    let (ct, tag) = ct_and_tag.split_at(split);

    let mut out = Vec::with_capacity(IV_LEN + TAG_LEN + ct.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(tag);
    out.extend_from_slice(ct);
    Ok(out)
}

/// Decrypt a blob in `iv || tag || ciphertext` layout, returning the
/// zeroize-on-drop plaintext.
pub fn decrypt(key: &[u8; 32], aad: &[u8], blob: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if blob.len() < IV_LEN + TAG_LEN {
        return Err(CryptoError::InvalidCiphertext(
            "blob shorter than iv+tag".into(),
        ));
    }
    let (iv, rest) = blob.split_at(IV_LEN);
    let (tag, ct) = rest.split_at(TAG_LEN);

    let mut ct_and_tag = Vec::with_capacity(ct.len() + TAG_LEN);
    ct_and_tag.extend_from_slice(ct);
    ct_and_tag.extend_from_slice(tag);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);

    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &ct_and_tag,
                aad,
            },
        )
        .map_err(|_| CryptoError::AeadDecrypt)?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        [7u8; 32]
    }

    #[test]
    fn round_trips_plaintext() {
        let pt = b"data root key material";
        let blob = encrypt(&key(), b"sub-123", pt).unwrap();
        assert_eq!(&blob[..IV_LEN].len(), &IV_LEN);
        let recovered = decrypt(&key(), b"sub-123", &blob).unwrap();
        assert_eq!(&*recovered, pt);
    }

    #[test]
    fn layout_is_iv_then_tag_then_ciphertext() {
        let pt = b"hello";
        let blob = encrypt(&key(), b"aad", pt).unwrap();
        assert_eq!(blob.len(), IV_LEN + TAG_LEN + pt.len());
    }

    #[test]
    fn wrong_aad_fails_authentication() {
        let pt = b"secret";
        let blob = encrypt(&key(), b"correct-aad", pt).unwrap();
        let result = decrypt(&key(), b"wrong-aad", &blob);
        assert!(result.is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let pt = b"secret";
        let mut blob = encrypt(&key(), b"aad", pt).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(decrypt(&key(), b"aad", &blob).is_err());
    }

    #[test]
    fn short_blob_is_rejected() {
        let result = decrypt(&key(), b"aad", &[0u8; 4]);
        assert!(matches!(result, Err(CryptoError::InvalidCiphertext(_))));
    }
}
