// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token persistence backends.
//!
//! The whole token map is serialized as one JSON object (`value ->
//! metadata`) and stored either in memory, in a single OS keychain
//! entry, or in a local file encrypted with a ChaCha20-Poly1305 key
//! whose material lives in the keychain.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::RngCore;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use mahi_core::Token;
use thiserror::Error;

use crate::config::TokenStoreSettings;

const TOKEN_STORE_USER: &str = "token-store";
const ENCRYPTION_KEY_USER: &str = "token-store-key";
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token store error: {0}")]
    Store(String),

    #[error("Failed to decrypt token store")]
    Decrypt,

    #[error("Unknown token store backend '{0}'")]
    UnknownBackend(String),
}

/// Persist issued tokens across daemon restarts.
pub enum TokenStore {
    Memory(Mutex<String>),
    Keychain { service: String },
    EncryptedFile { path: PathBuf, key: [u8; 32] },
}

impl TokenStore {
    pub fn memory() -> Self {
        TokenStore::Memory(Mutex::new("{}".to_string()))
    }

    pub fn keychain(service: impl Into<String>) -> Self {
        TokenStore::Keychain { service: service.into() }
    }

    /// Encrypted-file store; the symmetric key is fetched from (or first
    /// written to) the keychain under `service`.
    pub fn encrypted_file(service: &str, path: PathBuf) -> Result<Self, AuthError> {
        let entry = keyring_entry(service, ENCRYPTION_KEY_USER)?;
        let key = match entry.get_password() {
            Ok(encoded) => decode_key(&encoded)?,
            Err(keyring::Error::NoEntry) => {
                let mut key = [0u8; 32];
                rand::rng().fill_bytes(&mut key);
                entry
                    .set_password(&BASE64.encode(key))
                    .map_err(|e| AuthError::Store(e.to_string()))?;
                key
            }
            Err(e) => return Err(AuthError::Store(e.to_string())),
        };
        Ok(TokenStore::EncryptedFile { path, key })
    }

    /// Encrypted-file store with caller-supplied key material; used by
    /// tests to avoid touching the real keychain.
    pub fn encrypted_file_with_key(path: PathBuf, key: [u8; 32]) -> Self {
        TokenStore::EncryptedFile { path, key }
    }

    pub fn from_settings(settings: &TokenStoreSettings) -> Result<Self, AuthError> {
        match settings.backend.as_str() {
            "memory" => Ok(Self::memory()),
            "keychain" | "keyring" => Ok(Self::keychain(settings.keyring_service.clone())),
            "file" => {
                let path = settings.file_path.clone().ok_or_else(|| {
                    AuthError::Store("file backend requires auth.token_store.file_path".to_string())
                })?;
                Self::encrypted_file(&settings.keyring_service, path)
            }
            other => Err(AuthError::UnknownBackend(other.to_string())),
        }
    }

    pub fn load(&self) -> Result<IndexMap<String, Token>, AuthError> {
        let payload = self.load_raw()?;
        let data: serde_json::Map<String, serde_json::Value> = if payload.trim().is_empty() {
            serde_json::Map::new()
        } else {
            serde_json::from_str(&payload).map_err(|e| AuthError::Store(e.to_string()))?
        };

        let mut records = IndexMap::new();
        for (value, entry) in data {
            // Skip entries that fail to parse rather than losing the store.
            match serde_json::from_value::<Token>(entry) {
                Ok(token) => {
                    records.insert(value, token);
                }
                Err(e) => tracing::warn!(error = %e, "skipping unreadable token record"),
            }
        }
        Ok(records)
    }

    pub fn save(&self, records: &IndexMap<String, Token>) -> Result<(), AuthError> {
        let payload =
            serde_json::to_string(records).map_err(|e| AuthError::Store(e.to_string()))?;
        self.store_raw(&payload)
    }

    fn load_raw(&self) -> Result<String, AuthError> {
        match self {
            TokenStore::Memory(payload) => Ok(payload.lock().clone()),
            TokenStore::Keychain { service } => {
                match keyring_entry(service, TOKEN_STORE_USER)?.get_password() {
                    Ok(payload) => Ok(payload),
                    Err(keyring::Error::NoEntry) => Ok("{}".to_string()),
                    Err(e) => Err(AuthError::Store(e.to_string())),
                }
            }
            TokenStore::EncryptedFile { path, key } => {
                if !path.exists() {
                    return Ok("{}".to_string());
                }
                let ciphertext =
                    std::fs::read(path).map_err(|e| AuthError::Store(e.to_string()))?;
                if ciphertext.is_empty() {
                    return Ok("{}".to_string());
                }
                if ciphertext.len() <= NONCE_LEN {
                    return Err(AuthError::Decrypt);
                }
                let (nonce, body) = ciphertext.split_at(NONCE_LEN);
                let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
                let plaintext = cipher
                    .decrypt(Nonce::from_slice(nonce), body)
                    .map_err(|_| AuthError::Decrypt)?;
                String::from_utf8(plaintext).map_err(|_| AuthError::Decrypt)
            }
        }
    }

    fn store_raw(&self, payload: &str) -> Result<(), AuthError> {
        match self {
            TokenStore::Memory(slot) => {
                *slot.lock() = payload.to_string();
                Ok(())
            }
            TokenStore::Keychain { service } => keyring_entry(service, TOKEN_STORE_USER)?
                .set_password(payload)
                .map_err(|e| AuthError::Store(e.to_string())),
            TokenStore::EncryptedFile { path, key } => {
                let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
                let mut nonce = [0u8; NONCE_LEN];
                rand::rng().fill_bytes(&mut nonce);
                let body = cipher
                    .encrypt(Nonce::from_slice(&nonce), payload.as_bytes())
                    .map_err(|e| AuthError::Store(e.to_string()))?;

                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| AuthError::Store(e.to_string()))?;
                }
                let mut blob = Vec::with_capacity(NONCE_LEN + body.len());
                blob.extend_from_slice(&nonce);
                blob.extend_from_slice(&body);

                // Atomic replace so a crash mid-write cannot corrupt the store.
                let tmp = path.with_extension("tmp");
                std::fs::write(&tmp, &blob).map_err(|e| AuthError::Store(e.to_string()))?;
                std::fs::rename(&tmp, path).map_err(|e| AuthError::Store(e.to_string()))
            }
        }
    }
}

fn keyring_entry(service: &str, user: &str) -> Result<keyring::Entry, AuthError> {
    keyring::Entry::new(service, user).map_err(|e| AuthError::Store(e.to_string()))
}

fn decode_key(encoded: &str) -> Result<[u8; 32], AuthError> {
    let bytes = BASE64.decode(encoded.trim()).map_err(|_| AuthError::Decrypt)?;
    bytes.try_into().map_err(|_| AuthError::Decrypt)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
