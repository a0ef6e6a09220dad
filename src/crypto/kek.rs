// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Process-scoped key-encryption key (KeK).
//!
//! Every server-at-rest secret — OPAQUE envelopes, JWKS private halves,
//! OAuth client secrets, OTP secrets — is wrapped under this key before it
//! touches storage. The KeK itself is derived at boot from
//! `KEK_PASSPHRASE` via HKDF-SHA256 and held only in process memory; it is
//! never itself persisted.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::aead;
use super::error::CryptoResult;

const KEK_INFO: &[u8] = b"darkauth-kek-v1";

#[derive(ZeroizeOnDrop)]
pub struct Kek {
    #[zeroize(skip)]
    _marker: (),
    key: [u8; 32],
}

impl Kek {
    /// Derive the KeK from a boot-time passphrase. `salt` should be a
    /// fixed, non-secret value persisted alongside the database (it need
    /// not be secret — its purpose is domain separation, not hiding).
    pub fn unlock(passphrase: &str, salt: &[u8]) -> CryptoResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(KEK_INFO, &mut key)
            .map_err(|e| super::CryptoError::KeyDerivation(e.to_string()))?;
        Ok(Self {
            _marker: (),
            key,
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::unlock("test-passphrase-not-for-production", b"test-salt").unwrap()
    }

    /// Wrap `plaintext` under the KeK, bound to `aad` (typically the owning
    /// row's primary key, so a wrapped blob cannot be replayed under a
    /// different owner).
    pub fn wrap(&self, aad: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        aead::encrypt(&self.key, aad, plaintext)
    }

    /// Unwrap a blob produced by [`Kek::wrap`].
    pub fn unwrap(&self, aad: &[u8], blob: &[u8]) -> CryptoResult<zeroize::Zeroizing<Vec<u8>>> {
        aead::decrypt(&self.key, aad, blob)
    }
}

impl Drop for Kek {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_round_trips() {
        let kek = Kek::for_tests();
        let wrapped = kek.wrap(b"user-1", b"super secret envelope").unwrap();
        let unwrapped = kek.unwrap(b"user-1", &wrapped).unwrap();
        assert_eq!(&*unwrapped, b"super secret envelope");
    }

    #[test]
    fn unwrap_fails_under_different_aad() {
        let kek = Kek::for_tests();
        let wrapped = kek.wrap(b"user-1", b"secret").unwrap();
        assert!(kek.unwrap(b"user-2", &wrapped).is_err());
    }

    #[test]
    fn same_passphrase_and_salt_derive_same_key() {
        let a = Kek::unlock("pw", b"salt").unwrap();
        let b = Kek::unlock("pw", b"salt").unwrap();
        let wrapped = a.wrap(b"x", b"data").unwrap();
        assert_eq!(&*b.unwrap(b"x", &wrapped).unwrap(), b"data");
    }
}
