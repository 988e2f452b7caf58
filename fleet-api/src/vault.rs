//! Authenticated encryption of kubeconfigs at rest.
//!
//! Sealed values are laid out as `nonce || ciphertext || tag` using AES-256-GCM with a fresh
//! random nonce per call, so sealing the same plaintext twice yields different bytes.

use std::fmt;

use aws_lc_rs::aead::{AES_256_GCM, Aad, NONCE_LEN, Nonce, RandomizedNonceKey};
use aws_lc_rs::rand::fill;
use thiserror::Error;

/// Length in bytes of an encryption key.
pub const KEY_LEN: usize = 32;

/// Length in bytes of the GCM authentication tag appended to every ciphertext.
const TAG_LEN: usize = 16;

/// Errors raised while sealing or unsealing. Messages never contain key or plaintext bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("encryption key must be exactly {KEY_LEN} bytes long, got {0}")]
    BadKey(usize),

    #[error("sealed value is truncated or malformed")]
    Corrupt,

    #[error("sealed value failed its integrity check")]
    AuthFail,

    #[error("the cryptographic backend reported an unspecified failure")]
    Backend,
}

/// A validated 256-bit key ready for sealing and unsealing.
pub struct EncryptionKey {
    key: RandomizedNonceKey,
}

impl EncryptionKey {
    /// Builds a key from raw bytes, which must be exactly [`KEY_LEN`] long.
    pub fn new(key_bytes: &[u8]) -> Result<Self, VaultError> {
        if key_bytes.len() != KEY_LEN {
            return Err(VaultError::BadKey(key_bytes.len()));
        }

        let key = RandomizedNonceKey::new(&AES_256_GCM, key_bytes)
            .map_err(|_| VaultError::BadKey(key_bytes.len()))?;

        Ok(Self { key })
    }

    /// Generates a key from the system's secure random source.
    pub fn generate() -> Result<Self, VaultError> {
        let mut key_bytes = [0u8; KEY_LEN];
        fill(&mut key_bytes).map_err(|_| VaultError::Backend)?;

        Self::new(&key_bytes)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Seals `plaintext`, returning `nonce || ciphertext || tag`.
pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, VaultError> {
    let mut in_out = plaintext.to_vec();
    let nonce = key
        .key
        .seal_in_place_append_tag(Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::Backend)?;
    let nonce_bytes: &[u8; NONCE_LEN] = nonce.as_ref();

    let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
    sealed.extend_from_slice(nonce_bytes);
    sealed.extend_from_slice(&in_out);

    Ok(sealed)
}

/// Opens a value produced by [`seal`] with the same key.
pub fn unseal(sealed: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, VaultError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(VaultError::Corrupt);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| VaultError::Corrupt)?;

    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::AuthFail)?;

    Ok(plaintext.to_vec())
}

/// Like [`seal`] but takes raw key bytes, failing with [`VaultError::BadKey`] on a wrong length.
pub fn seal_with_key_bytes(plaintext: &[u8], key_bytes: &[u8]) -> Result<Vec<u8>, VaultError> {
    seal(plaintext, &EncryptionKey::new(key_bytes)?)
}

/// Like [`unseal`] but takes raw key bytes, failing with [`VaultError::BadKey`] on a wrong length.
pub fn unseal_with_key_bytes(sealed: &[u8], key_bytes: &[u8]) -> Result<Vec<u8>, VaultError> {
    unseal(sealed, &EncryptionKey::new(key_bytes)?)
}
