// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The OPAQUE ciphersuite and the four protocol steps.
//!
//! Ciphersuite: ristretto255 for the OPRF and key-exchange group, 3DH for
//! key exchange, Argon2 as the password-hardening KSF. Changing curves
//! later is a one-line change to [`DefaultCipherSuite`]'s associated
//! types; every call site goes through this type alias rather than naming
//! a concrete group.

use opaque_ke::{
    CredentialFinalization, CredentialRequest, RegistrationRequest, RegistrationUpload,
    ServerLogin, ServerLoginStartParameters, ServerLoginStartResult, ServerRegistration,
    ServerRegistrationStartResult, ServerSetup,
};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use super::{OpaqueError, OpaqueResult};

/// Ristretto255 group for both the OPRF and the key-exchange group, 3DH
/// key exchange, Argon2 as the KSF. This is the ciphersuite referred to
/// elsewhere as "OPAQUE-P256"'s Rust-ecosystem equivalent — the PAKE
/// guarantees are the same; only the group differs.
pub struct DefaultCipherSuite;

impl opaque_ke::CipherSuite for DefaultCipherSuite {
    type OprfCs = opaque_ke::Ristretto255;
    type KeGroup = opaque_ke::Ristretto255;
    type KeyExchange = opaque_ke::key_exchange::tripledh::TripleDh;
    type Ksf = opaque_ke::ksf::Argon2;
}

/// Long-lived server setup (keypair + OPRF seed). Generated once at first
/// boot and persisted wrapped under the KeK; every registration and login
/// on this server uses the same setup.
pub struct OpaqueEngine {
    setup: ServerSetup<DefaultCipherSuite>,
}

impl OpaqueEngine {
    /// Generate a fresh server setup. Call once, then persist the
    /// serialized bytes via [`OpaqueEngine::export`].
    pub fn generate() -> Self {
        Self {
            setup: ServerSetup::<DefaultCipherSuite>::new(&mut OsRng),
        }
    }

    /// Reconstruct a server setup from bytes previously produced by
    /// [`OpaqueEngine::export`].
    pub fn from_bytes(bytes: &[u8]) -> OpaqueResult<Self> {
        let setup = ServerSetup::<DefaultCipherSuite>::deserialize(bytes)
            .map_err(|e| OpaqueError::Internal(format!("invalid server setup bytes: {e}")))?;
        Ok(Self { setup })
    }

    /// Serialize the server setup for storage. The bytes are secret — the
    /// caller must wrap them under the KeK before writing to disk.
    pub fn export(&self) -> Vec<u8> {
        self.setup.serialize().to_vec()
    }

    /// Step 1 of registration: process the client's blinded password and
    /// return the server's response message.
    pub fn register_start(
        &self,
        registration_request: &[u8],
        credential_identifier: &str,
    ) -> OpaqueResult<(Vec<u8>, ())> {
        let request = RegistrationRequest::<DefaultCipherSuite>::deserialize(registration_request)
            .map_err(|e| OpaqueError::ProtocolError(e.to_string()))?;

        let ServerRegistrationStartResult { message, .. } = ServerRegistration::start(
            &self.setup,
            request,
            credential_identifier.as_bytes(),
        )
        .map_err(|e| OpaqueError::ProtocolError(e.to_string()))?;

        Ok((message.serialize().to_vec(), ()))
    }

    /// Step 2 of registration: the client has finished the OPRF exchange
    /// and uploaded its envelope. Produce the password file to persist
    /// for this user (this is the "OPAQUE record" stored in `§3`'s data
    /// model, never the password itself).
    pub fn register_finish(&self, registration_upload: &[u8]) -> OpaqueResult<Vec<u8>> {
        let upload = RegistrationUpload::<DefaultCipherSuite>::deserialize(registration_upload)
            .map_err(|e| OpaqueError::ProtocolError(e.to_string()))?;

        let password_file = ServerRegistration::finish(upload);
        Ok(password_file.serialize().to_vec())
    }

    /// Step 1 of login: process the client's blinded credential request
    /// against the stored password file, returning the message to send
    /// back to the client and the opaque server-side login state that
    /// must be retained (single-use, TTL'd) until `login_finish`.
    pub fn login_start(
        &self,
        password_file: Option<&[u8]>,
        credential_request: &[u8],
        credential_identifier: &str,
    ) -> OpaqueResult<(Vec<u8>, Vec<u8>)> {
        let password_file = password_file
            .map(ServerRegistration::<DefaultCipherSuite>::deserialize)
            .transpose()
            .map_err(|e| OpaqueError::ProtocolError(e.to_string()))?;

        let request = CredentialRequest::<DefaultCipherSuite>::deserialize(credential_request)
            .map_err(|e| OpaqueError::ProtocolError(e.to_string()))?;

        let ServerLoginStartResult { message, state, .. } = ServerLogin::start(
            &mut OsRng,
            &self.setup,
            password_file,
            request,
            credential_identifier.as_bytes(),
            ServerLoginStartParameters::default(),
        )
        .map_err(|e| OpaqueError::ProtocolError(e.to_string()))?;

        Ok((message.serialize().to_vec(), state.serialize().to_vec()))
    }

    /// Step 2 of login: the client has completed the 3DH exchange.
    /// Verify its finalization message and return the shared session key
    /// (this server never sees the OPAQUE `export_key`; that derivation
    /// happens only in the browser).
    pub fn login_finish(
        &self,
        server_login_state: &[u8],
        credential_finalization: &[u8],
    ) -> OpaqueResult<Zeroizing<Vec<u8>>> {
        let state = ServerLogin::<DefaultCipherSuite>::deserialize(server_login_state)
            .map_err(|e| OpaqueError::ProtocolError(e.to_string()))?;

        let finalization =
            CredentialFinalization::<DefaultCipherSuite>::deserialize(credential_finalization)
                .map_err(|e| OpaqueError::ProtocolError(e.to_string()))?;

        let result = state
            .finish(finalization)
            .map_err(|_| OpaqueError::ProtocolError("credential verification failed".into()))?;

        Ok(Zeroizing::new(result.session_key.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_and_reimport_server_setup() {
        let engine = OpaqueEngine::generate();
        let bytes = engine.export();
        let reimported = OpaqueEngine::from_bytes(&bytes);
        assert!(reimported.is_ok());
    }
}
